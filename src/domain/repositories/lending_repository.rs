//! Repository trait for loans, reservations, fines and copy counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::changeset::Changeset;
use crate::domain::entities::{
    Book, BookId, Fine, FineKind, Loan, LoanId, Reservation, ReservationId, User, UserId,
};
use crate::error::AppError;

/// Persistence capability consumed by the lending services.
///
/// Reads return `Ok(None)` for missing rows; the services decide whether
/// that is a [`AppError::NotFound`]. All writes go through [`Self::commit`].
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgLendingRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::persistence::InMemoryLendingRepository`] - Process-local store
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LendingRepository: Send + Sync {
    /// Loads a loan by id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load_loan(&self, id: LoanId) -> Result<Option<Loan>, AppError>;

    /// Finds the active loan of `book_id` held by `user_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_active_loan(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Loan>, AppError>;

    /// Active loans whose due date is before `now`, oldest due date first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>, AppError>;

    /// Loads a reservation by id, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, AppError>;

    /// Active reservations of one book ordered by queue position.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load_reservations_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<Reservation>, AppError>;

    /// Ready-for-pickup reservations whose deadline is before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_expired_pickups(&self, now: DateTime<Utc>)
    -> Result<Vec<Reservation>, AppError>;

    /// Copies of `book_id` on the shelf.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the book does not exist.
    /// Returns [`AppError::Internal`] on storage errors.
    async fn get_available_copies(&self, book_id: BookId) -> Result<u32, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load_book(&self, id: BookId) -> Result<Option<Book>, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load_user(&self, id: UserId) -> Result<Option<User>, AppError>;

    /// All fines of a loan, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_fines_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fine>, AppError>;

    /// The outstanding fine of `kind` on a loan, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_outstanding_fine(
        &self,
        loan_id: LoanId,
        kind: FineKind,
    ) -> Result<Option<Fine>, AppError>;

    /// Applies every staged write atomically.
    ///
    /// Either the whole changeset is durable when this returns `Ok`, or
    /// nothing of it is.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotAvailable`] if a copy adjustment would take a
    /// shelf counter below zero, [`AppError::InvalidState`] if it would exceed
    /// the total copies, [`AppError::NotFound`] for an unknown book, and
    /// [`AppError::Internal`] on storage errors.
    async fn commit(&self, changeset: Changeset) -> Result<(), AppError>;
}
