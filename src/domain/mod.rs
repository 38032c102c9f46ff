//! Domain layer containing lending entities and rules.
//!
//! Nothing in here performs I/O. The layer defines what a loan, reservation
//! and fine are, how they may change, the fee arithmetic, the queue
//! discipline, and the events that describe committed changes.
//!
//! # Architecture
//!
//! - [`entities`] - Core business data structures and their status machines
//! - [`queue`] - Per-book reservation queue with contiguous positions
//! - [`fine_calculator`] - Late and lost fee computation
//! - [`events`] - Denormalized event payloads
//! - [`policy`] - Configured fees and time windows
//! - [`clock`] - Injectable time source
//! - [`repositories`] - Data access trait definitions

pub mod clock;
pub mod entities;
pub mod events;
pub mod fine_calculator;
pub mod policy;
pub mod queue;
pub mod repositories;
