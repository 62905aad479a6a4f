use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::schema::SCHEMA;
use super::LedgerStore;
use crate::error::LedgerError;
use crate::ledger::{Entry, LedgerConfig, Page};

const ENTRY_COLUMNS: &str = "id, ledger_name, timestamp, content, senders, recipients, \
     related_entry_ids, keywords, signatures, page_number, hash";

const PAGE_COLUMNS: &str =
    "ledger_name, number, timestamp, previous_hash, entry_count, merkle_root, hash";

/// SQLite-backed ledger store.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Ledger database ready at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection keeps it alive.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Applied {} schema statements", SCHEMA.len());
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::DatabaseError(format!("Invalid timestamp '{}': {}", value, e)))
}

fn to_db_int(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value)
        .map_err(|_| LedgerError::DatabaseError(format!("Value {} exceeds SQLite integer range", value)))
}

fn from_db_int(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::DatabaseError(format!("Negative value {} in database", value)))
}

fn row_to_config(row: &SqliteRow) -> Result<LedgerConfig, LedgerError> {
    Ok(LedgerConfig {
        name: row.try_get("name")?,
        entries_per_page: from_db_int(row.try_get("entries_per_page")?)?,
        hash_algorithm: row.try_get("hash_algorithm")?,
        signature_algorithm: row.try_get("signature_algorithm")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_page(row: &SqliteRow) -> Result<Page, LedgerError> {
    Ok(Page {
        ledger_name: row.try_get("ledger_name")?,
        number: from_db_int(row.try_get("number")?)?,
        timestamp: parse_time(&row.try_get::<String, _>("timestamp")?)?,
        previous_hash: row.try_get("previous_hash")?,
        entry_count: from_db_int(row.try_get("entry_count")?)?,
        merkle_root: row.try_get("merkle_root")?,
        hash: row.try_get("hash")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry, LedgerError> {
    let page_number = row
        .try_get::<Option<i64>, _>("page_number")?
        .map(from_db_int)
        .transpose()?;

    Ok(Entry {
        id: row.try_get("id")?,
        ledger_name: row.try_get("ledger_name")?,
        timestamp: parse_time(&row.try_get::<String, _>("timestamp")?)?,
        content: row.try_get("content")?,
        senders: serde_json::from_str(&row.try_get::<String, _>("senders")?)?,
        recipients: serde_json::from_str(&row.try_get::<String, _>("recipients")?)?,
        related_entry_ids: serde_json::from_str(&row.try_get::<String, _>("related_entry_ids")?)?,
        keywords: serde_json::from_str(&row.try_get::<String, _>("keywords")?)?,
        signatures: serde_json::from_str(&row.try_get::<String, _>("signatures")?)?,
        page_number,
        hash: row.try_get("hash")?,
    })
}

async fn upsert_entry<'e, E>(executor: E, entry: &Entry) -> Result<(), LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let page_number = entry.page_number.map(to_db_int).transpose()?;
    sqlx::query(
        r#"
        INSERT INTO entries
        (id, ledger_name, timestamp, content, senders, recipients, related_entry_ids, keywords, signatures, page_number, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            related_entry_ids = excluded.related_entry_ids,
            keywords = excluded.keywords,
            signatures = excluded.signatures,
            page_number = excluded.page_number
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.ledger_name)
    .bind(format_time(&entry.timestamp))
    .bind(&entry.content)
    .bind(serde_json::to_string(&entry.senders)?)
    .bind(serde_json::to_string(&entry.recipients)?)
    .bind(serde_json::to_string(&entry.related_entry_ids)?)
    .bind(serde_json::to_string(&entry.keywords)?)
    .bind(serde_json::to_string(&entry.signatures)?)
    .bind(page_number)
    .bind(&entry.hash)
    .execute(executor)
    .await
    .map_err(|e| LedgerError::DatabaseError(format!("Failed to store entry {}: {}", entry.id, e)))?;
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn save_ledger_config(&self, config: &LedgerConfig) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledgers (name, entries_per_page, hash_algorithm, signature_algorithm, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.name)
        .bind(to_db_int(config.entries_per_page)?)
        .bind(&config.hash_algorithm)
        .bind(&config.signature_algorithm)
        .bind(format_time(&config.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::DuplicateLedger(config.name.clone()))
            }
            Err(e) => Err(LedgerError::DatabaseError(format!(
                "Failed to store ledger config: {}",
                e
            ))),
        }
    }

    async fn get_ledger_config(&self, name: &str) -> Result<Option<LedgerConfig>, LedgerError> {
        let row = sqlx::query(
            "SELECT name, entries_per_page, hash_algorithm, signature_algorithm, created_at FROM ledgers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn list_ledger_configs(&self) -> Result<Vec<LedgerConfig>, LedgerError> {
        let rows = sqlx::query(
            "SELECT name, entries_per_page, hash_algorithm, signature_algorithm, created_at FROM ledgers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_config).collect()
    }

    async fn save_page(&self, page: &Page) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO pages (ledger_name, number, timestamp, previous_hash, entry_count, merkle_root, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&page.ledger_name)
        .bind(to_db_int(page.number)?)
        .bind(format_time(&page.timestamp))
        .bind(&page.previous_hash)
        .bind(to_db_int(page.entry_count)?)
        .bind(&page.merkle_root)
        .bind(&page.hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::DatabaseError(format!(
                    "page {} of ledger '{}' already exists",
                    page.number, page.ledger_name
                )))
            }
            Err(e) => Err(LedgerError::DatabaseError(format!("Failed to store page: {}", e))),
        }
    }

    async fn get_page(&self, ledger_name: &str, number: u64) -> Result<Option<Page>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pages WHERE ledger_name = ? AND number = ?",
            PAGE_COLUMNS
        ))
        .bind(ledger_name)
        .bind(to_db_int(number)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_page).transpose()
    }

    async fn list_pages(&self, ledger_name: &str) -> Result<Vec<Page>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pages WHERE ledger_name = ? ORDER BY number ASC",
            PAGE_COLUMNS
        ))
        .bind(ledger_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_page).collect()
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), LedgerError> {
        upsert_entry(&self.pool, entry).await
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, LedgerError> {
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE ledger_name = ? ORDER BY seq ASC",
            ENTRY_COLUMNS
        ))
        .bind(ledger_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_holding_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE ledger_name = ? AND page_number IS NULL ORDER BY seq ASC",
            ENTRY_COLUMNS
        ))
        .bind(ledger_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_sealed_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE ledger_name = ? AND page_number IS NOT NULL ORDER BY seq ASC",
            ENTRY_COLUMNS
        ))
        .bind(ledger_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_page_entries(
        &self,
        ledger_name: &str,
        number: u64,
    ) -> Result<Vec<Entry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE ledger_name = ? AND page_number = ? ORDER BY seq ASC",
            ENTRY_COLUMNS
        ))
        .bind(ledger_name)
        .bind(to_db_int(number)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn commit_seal(
        &self,
        page: &Page,
        new_entry: &Entry,
        held_entry_ids: &[String],
    ) -> Result<(), LedgerError> {
        let number = to_db_int(page.number)?;
        let mut tx = self.pool.begin().await?;

        for id in held_entry_ids {
            let updated = sqlx::query(
                "UPDATE entries SET page_number = ? WHERE id = ? AND page_number IS NULL",
            )
            .bind(number)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                // Dropping `tx` rolls back.
                return Err(LedgerError::DatabaseError(format!(
                    "entry '{}' is missing or already sealed",
                    id
                )));
            }
        }

        upsert_entry(&mut *tx, new_entry).await?;

        sqlx::query(
            r#"
            INSERT INTO pages (ledger_name, number, timestamp, previous_hash, entry_count, merkle_root, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&page.ledger_name)
        .bind(number)
        .bind(format_time(&page.timestamp))
        .bind(&page.previous_hash)
        .bind(to_db_int(page.entry_count)?)
        .bind(&page.merkle_root)
        .bind(&page.hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to insert page: {}", e)))?;

        tx.commit().await?;
        debug!(
            "Committed page {} of ledger '{}' ({} entries)",
            page.number, page.ledger_name, page.entry_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashing::Sha256Hash;
    use crate::ledger::{NewEntry, GENESIS_HASH};

    fn config(name: &str) -> LedgerConfig {
        LedgerConfig {
            name: name.to_string(),
            entries_per_page: 2,
            hash_algorithm: "SHA-256".to_string(),
            signature_algorithm: "SECP256K1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn entry(id: &str, ledger: &str) -> Entry {
        Entry::create(
            id.to_string(),
            ledger,
            NewEntry::new(format!("content {}", id)).sender("alice"),
            Utc::now(),
            &Sha256Hash,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_config_round_trip_and_duplicate() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let cfg = config("L");
        store.save_ledger_config(&cfg).await.unwrap();

        assert_eq!(store.get_ledger_config("L").await.unwrap(), Some(cfg.clone()));
        assert!(matches!(
            store.save_ledger_config(&cfg).await,
            Err(LedgerError::DuplicateLedger(_))
        ));
        assert!(store.get_ledger_config("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_upsert_keeps_order() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store.save_ledger_config(&config("L")).await.unwrap();

        let first = entry("a", "L");
        let second = entry("b", "L");
        store.save_entry(&first).await.unwrap();
        store.save_entry(&second).await.unwrap();

        let mut edited = first.clone();
        edited.keywords.push("late".to_string());
        store.save_entry(&edited).await.unwrap();

        let listed = store.list_entries("L").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], edited);
        assert_eq!(listed[1], second);
    }

    #[tokio::test]
    async fn test_commit_seal_is_atomic() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store.save_ledger_config(&config("L")).await.unwrap();

        let held = entry("a", "L");
        store.save_entry(&held).await.unwrap();

        let mut closing = entry("b", "L");
        closing.page_number = Some(0);
        let page = Page::seal(
            "L",
            0,
            GENESIS_HASH,
            &[held.hash.clone(), closing.hash.clone()],
            &Sha256Hash,
        )
        .unwrap();

        // Unknown held id: nothing may be written.
        let bad = store
            .commit_seal(&page, &closing, &["a".to_string(), "ghost".to_string()])
            .await;
        assert!(bad.is_err());
        assert!(store.get_page("L", 0).await.unwrap().is_none());
        assert!(store.get_entry("b").await.unwrap().is_none());
        assert_eq!(store.list_holding_entries("L").await.unwrap().len(), 1);

        store
            .commit_seal(&page, &closing, &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(store.get_page("L", 0).await.unwrap(), Some(page));
        assert!(store.list_holding_entries("L").await.unwrap().is_empty());
        assert_eq!(store.list_page_entries("L", 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_saved_page_cannot_be_overwritten() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store.save_ledger_config(&config("L")).await.unwrap();

        let page = Page::seal("L", 0, GENESIS_HASH, &["aa".repeat(32)], &Sha256Hash).unwrap();
        store.save_page(&page).await.unwrap();

        let rewritten = Page::seal("L", 0, GENESIS_HASH, &["bb".repeat(32)], &Sha256Hash).unwrap();
        assert!(matches!(
            store.save_page(&rewritten).await,
            Err(LedgerError::DatabaseError(_))
        ));
        assert_eq!(store.get_page("L", 0).await.unwrap(), Some(page));
    }
}
