//! Lending repository implementations.
//!
//! # Repositories
//!
//! - [`PgLendingRepository`] - PostgreSQL storage used by the daemon and CLI
//! - [`InMemoryLendingRepository`] - Process-local storage for tests and embedding

pub mod in_memory_lending_repository;
pub mod pg_lending_repository;

pub use in_memory_lending_repository::InMemoryLendingRepository;
pub use pg_lending_repository::PgLendingRepository;
