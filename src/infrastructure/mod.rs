//! Infrastructure layer for external integrations.
//!
//! This layer implements interfaces defined by the domain and application
//! layers.
//!
//! # Modules
//!
//! - [`notifications`] - Event bus subscribers (log notifier, audit trail)
//! - [`persistence`] - PostgreSQL and in-memory repository implementations

pub mod notifications;
pub mod persistence;
