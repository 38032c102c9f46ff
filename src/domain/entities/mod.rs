//! Core domain entities representing the lending data model.
//!
//! Entities own their status transitions (a loan knows how to close itself,
//! a reservation how to be promoted) but know nothing about queues, fines
//! policy or persistence.
//!
//! # Entity Types
//!
//! - [`Loan`] - One checkout of one copy
//! - [`Reservation`] - A place in a book's waiting list
//! - [`Fine`] - A penalty attached to a loan
//! - [`Book`] / [`User`] - Catalog and patron display data

pub mod book;
pub mod fine;
pub mod ids;
pub mod loan;
pub mod reservation;
pub mod user;

pub use book::Book;
pub use fine::{Fine, FineKind, FineStatus};
pub use ids::{BookId, FineId, LoanId, ReservationId, UserId};
pub use loan::{Loan, LoanStatus};
pub use reservation::{Reservation, ReservationStatus};
pub use user::User;
