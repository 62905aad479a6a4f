//! Sealed Ledger CLI
//!
//! Command-line access to ledgers, proofs and certificates. Every command
//! prints JSON on stdout; logs go to stderr.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sealed_ledger::app::LedgerApp;
use sealed_ledger::config::AppConfig;
use sealed_ledger::crypto::{bytes_to_hex, hex_to_bytes, AlgorithmRegistry};
use sealed_ledger::ledger::NewEntry;
use sealed_ledger::pki::Certificate;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sealed-ledger")]
#[command(about = "Append-only ledger with Merkle-proofed pages and certificate issuance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a ledger
    CreateLedger {
        name: String,

        #[arg(short = 'n', long)]
        entries_per_page: Option<u64>,

        #[arg(long)]
        hash: Option<String>,

        #[arg(long)]
        signature: Option<String>,
    },

    /// Append an entry to a ledger
    Append {
        ledger: String,

        #[arg(short, long)]
        content: String,

        #[arg(long)]
        sender: Vec<String>,

        #[arg(long)]
        recipient: Vec<String>,

        #[arg(long)]
        related: Vec<String>,

        #[arg(short, long)]
        keyword: Vec<String>,
    },

    /// Sign an entry, either with a private key or a precomputed signature
    Sign {
        entry_id: String,

        #[arg(long)]
        signer: String,

        /// Private key (hex); the signature is computed locally
        #[arg(long, conflicts_with = "signature")]
        private_key: Option<String>,

        /// Signature over the entry hash (hex)
        #[arg(long, requires = "public_key")]
        signature: Option<String>,

        /// Public key (hex), required with --signature
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Generate a key pair
    Keygen {
        #[arg(short, long)]
        algorithm: Option<String>,
    },

    /// Show a sealed page
    Page { ledger: String, number: u64 },

    /// Merkle inclusion proof for a sealed entry
    Proof { entry_id: String },

    /// Verify a ledger's hash chain, or a single page
    Validate {
        ledger: String,

        #[arg(long)]
        page: Option<u64>,
    },

    /// Entries a user takes part in but has not signed
    Pending { ledger: String, user: String },

    /// Ledger page and entry counts
    Stats { ledger: String },

    /// Issue a certificate binding a public key to a user
    IssueCert {
        user: String,

        #[arg(long)]
        public_key: String,

        #[arg(short, long)]
        algorithm: Option<String>,
    },

    /// Verify a user certificate; defaults to the one on file
    VerifyCert {
        user: String,

        /// Certificate JSON file to check instead
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show the system certificate, optionally reissuing the system identity
    SystemCert {
        #[arg(long)]
        reissue: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealed_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen { algorithm } => keygen(algorithm.as_deref()),
        command => run(command, cli.config).await,
    }
}

fn keygen(algorithm: Option<&str>) -> Result<()> {
    let registry = AlgorithmRegistry::with_defaults()?;
    let scheme = registry.resolve_signature(algorithm)?;
    let keys = scheme.generate_keypair()?;
    print_json(&json!({
        "algorithm": keys.algorithm,
        "public_key": keys.public_key_hex(),
        "private_key": bytes_to_hex(&keys.private_key),
    }))
}

async fn run(command: Commands, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    let app = LedgerApp::bootstrap(config).await?;
    let engine = &app.engine;

    match command {
        Commands::Keygen { algorithm } => keygen(algorithm.as_deref()),

        Commands::CreateLedger {
            name,
            entries_per_page,
            hash,
            signature,
        } => {
            let config = app
                .create_ledger(&name, entries_per_page, hash.as_deref(), signature.as_deref())
                .await?;
            print_json(&config)
        }

        Commands::Append {
            ledger,
            content,
            sender,
            recipient,
            related,
            keyword,
        } => {
            let fields = NewEntry {
                content,
                senders: sender,
                recipients: recipient,
                related_entry_ids: related,
                keywords: keyword,
            };
            let id = engine.create_entry(&ledger, fields).await?;
            print_json(&engine.get_entry(&id).await?)
        }

        Commands::Sign {
            entry_id,
            signer,
            private_key,
            signature,
            public_key,
        } => {
            let (signature, public_key) = match (private_key, signature, public_key) {
                (Some(private_key), None, _) => {
                    let entry = engine.get_entry(&entry_id).await?;
                    let ledger = engine.get_ledger_config(&entry.ledger_name).await?;
                    let scheme = app
                        .registry
                        .resolve_signature(Some(ledger.signature_algorithm.as_str()))?;
                    let private_key = hex_to_bytes(&private_key)?;
                    let signature = scheme.sign(&private_key, &entry.signing_payload()?)?;
                    let public_key = scheme.public_key_from_private(&private_key)?;
                    (bytes_to_hex(&signature), bytes_to_hex(&public_key))
                }
                (None, Some(signature), Some(public_key)) => (signature, public_key),
                _ => bail!("provide either --private-key or --signature with --public-key"),
            };
            let record = engine
                .sign_entry(&entry_id, &signer, &signature, &public_key)
                .await?;
            print_json(&record)
        }

        Commands::Page { ledger, number } => print_json(&engine.get_page(&ledger, number).await?),

        Commands::Proof { entry_id } => print_json(&engine.get_merkle_proof(&entry_id).await?),

        Commands::Validate { ledger, page } => match page {
            Some(number) => {
                let valid = engine.validate_page(&ledger, number).await?;
                print_json(&json!({ "ledger": ledger, "page": number, "valid": valid }))
            }
            None => print_json(&engine.verify_chain_detailed(&ledger).await?),
        },

        Commands::Pending { ledger, user } => {
            print_json(&engine.get_entries_needing_signature(&ledger, &user).await?)
        }

        Commands::Stats { ledger } => print_json(&engine.ledger_stats(&ledger).await?),

        Commands::IssueCert {
            user,
            public_key,
            algorithm,
        } => {
            let certificate = app
                .pki
                .associate_public_key_with_algorithm(&user, &public_key, algorithm.as_deref())
                .await?;
            print_json(&certificate)
        }

        Commands::VerifyCert { user, file } => {
            let certificate: Certificate = match file {
                Some(path) => {
                    let raw = std::fs::read(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_slice(&raw)?
                }
                None => app
                    .pki
                    .get_user_certificate(&user)
                    .await?
                    .ok_or_else(|| anyhow!("no certificate on file for {}", user))?,
            };
            let valid = app.pki.verify_certificate(&user, &certificate).await;
            print_json(&json!({ "user": user, "serial_number": certificate.serial_number, "valid": valid }))
        }

        Commands::SystemCert { reissue } => {
            let certificate = match reissue {
                Some(reason) => app.pki.reissue_system_identity(&reason).await?,
                None => app.pki.get_system_certificate().await,
            };
            print_json(&certificate)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
