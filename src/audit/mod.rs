//! Audit trail for the auth, files and RBAC subsystems, recorded on ledgers.

pub mod bridge;

pub use bridge::{AuditBridge, AuditEvent, AuditSettings, AuditSubsystem};
