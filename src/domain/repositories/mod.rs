//! Repository trait definitions for the domain layer.
//!
//! The lending services depend on a single [`LendingRepository`] capability:
//! typed reads plus one atomic [`LendingRepository::commit`] that applies a
//! [`Changeset`] of staged writes.
//!
//! # Architecture
//!
//! - Traits define the contract for data operations
//! - Implementations live in `crate::infrastructure::persistence`
//! - Mock implementations are auto-generated via `mockall` for testing

pub mod changeset;
pub mod lending_repository;

pub use changeset::Changeset;
pub use lending_repository::LendingRepository;

#[cfg(test)]
pub use lending_repository::MockLendingRepository;
