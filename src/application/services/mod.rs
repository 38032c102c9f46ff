//! Business logic services for the application layer.

pub mod context;
pub mod loan_service;
mod lookup;
pub mod reservation_service;

pub use context::LendingContext;
pub use loan_service::{LoanService, LossOutcome, ReturnOutcome};
pub use reservation_service::{CopyDisposition, ExpirySweep, ReservationService};
