//! Audit Bridge
//!
//! Turns typed events from the auth, files and RBAC subsystems into system
//! entries on per-subsystem ledgers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::ledger::LedgerEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    UserRegistered {
        user_id: String,
    },
    FileUploaded {
        user_id: String,
        file_id: String,
        file_name: String,
    },
    FileDownloaded {
        user_id: String,
        file_id: String,
    },
    FileDeleted {
        user_id: String,
        file_id: String,
    },
    PermissionGranted {
        user_id: String,
        permission: String,
        granted_by: String,
    },
    PermissionRevoked {
        user_id: String,
        permission: String,
        revoked_by: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSubsystem {
    Auth,
    Files,
    Rbac,
}

impl AuditSubsystem {
    pub const ALL: [AuditSubsystem; 3] = [Self::Auth, Self::Files, Self::Rbac];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Files => "files",
            Self::Rbac => "rbac",
        }
    }
}

impl fmt::Display for AuditSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuditEvent {
    pub fn subsystem(&self) -> AuditSubsystem {
        match self {
            Self::UserRegistered { .. } => AuditSubsystem::Auth,
            Self::FileUploaded { .. } | Self::FileDownloaded { .. } | Self::FileDeleted { .. } => {
                AuditSubsystem::Files
            }
            Self::PermissionGranted { .. } | Self::PermissionRevoked { .. } => AuditSubsystem::Rbac,
        }
    }

    /// User the event is about.
    pub fn user_id(&self) -> &str {
        match self {
            Self::UserRegistered { user_id }
            | Self::FileUploaded { user_id, .. }
            | Self::FileDownloaded { user_id, .. }
            | Self::FileDeleted { user_id, .. }
            | Self::PermissionGranted { user_id, .. }
            | Self::PermissionRevoked { user_id, .. } => user_id,
        }
    }

    pub fn details(&self) -> String {
        match self {
            Self::UserRegistered { user_id } => format!("user {} registered", user_id),
            Self::FileUploaded {
                file_id, file_name, ..
            } => format!("uploaded file {} ({})", file_id, file_name),
            Self::FileDownloaded { file_id, .. } => format!("downloaded file {}", file_id),
            Self::FileDeleted { file_id, .. } => format!("deleted file {}", file_id),
            Self::PermissionGranted {
                permission,
                granted_by,
                ..
            } => format!("granted {} by {}", permission, granted_by),
            Self::PermissionRevoked {
                permission,
                revoked_by,
                ..
            } => format!("revoked {} by {}", permission, revoked_by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub auth_ledger: String,
    pub files_ledger: String,
    pub rbac_ledger: String,
    pub entries_per_page: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            auth_ledger: "audit-auth".to_string(),
            files_ledger: "audit-files".to_string(),
            rbac_ledger: "audit-rbac".to_string(),
            entries_per_page: 50,
        }
    }
}

impl AuditSettings {
    pub fn ledger_for(&self, subsystem: AuditSubsystem) -> &str {
        match subsystem {
            AuditSubsystem::Auth => &self.auth_ledger,
            AuditSubsystem::Files => &self.files_ledger,
            AuditSubsystem::Rbac => &self.rbac_ledger,
        }
    }
}

pub struct AuditBridge {
    engine: Arc<LedgerEngine>,
    settings: AuditSettings,
}

impl AuditBridge {
    /// Create the subsystem ledgers that do not exist yet.
    pub async fn new(engine: Arc<LedgerEngine>, settings: AuditSettings) -> Result<Self, LedgerError> {
        for subsystem in AuditSubsystem::ALL {
            let ledger = settings.ledger_for(subsystem);
            match engine
                .create_ledger(ledger, settings.entries_per_page, None, None)
                .await
            {
                Ok(_) => info!("Created audit ledger '{}' for {}", ledger, subsystem),
                Err(LedgerError::DuplicateLedger(_)) => {
                    debug!("Audit ledger '{}' already exists", ledger)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self { engine, settings })
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    /// Append `event` to its subsystem's ledger and return the entry id.
    pub async fn record(&self, event: &AuditEvent) -> Result<String, LedgerError> {
        let subsystem = event.subsystem();
        let ledger = self.settings.ledger_for(subsystem);
        let id = self
            .engine
            .log_system_event(ledger, subsystem.as_str(), Some(event.user_id()), &event.details())
            .await?;
        debug!("Recorded {} audit event as entry {}", subsystem, id);
        Ok(id)
    }
}
