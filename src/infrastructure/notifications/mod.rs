//! Event bus subscribers shipped with the engine.
//!
//! - [`LogNotifier`] - Renders patron notifications into the log
//! - [`AuditTrail`] - Records every event it receives as JSON

pub mod audit_trail;
pub mod log_notifier;

pub use audit_trail::{AuditEntry, AuditTrail};
pub use log_notifier::LogNotifier;
