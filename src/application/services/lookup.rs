//! Load-or-fail helpers shared by the services.

use serde_json::json;

use crate::domain::entities::{
    Book, BookId, Loan, LoanId, Reservation, ReservationId, User, UserId,
};
use crate::domain::repositories::LendingRepository;
use crate::error::{AppError, AppResult};

pub(crate) async fn require_book<R: LendingRepository>(
    repository: &R,
    id: BookId,
) -> AppResult<Book> {
    repository
        .load_book(id)
        .await?
        .ok_or_else(|| AppError::not_found("Book not found", json!({ "book_id": id })))
}

pub(crate) async fn require_user<R: LendingRepository>(
    repository: &R,
    id: UserId,
) -> AppResult<User> {
    repository
        .load_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found", json!({ "user_id": id })))
}

pub(crate) async fn require_loan<R: LendingRepository>(
    repository: &R,
    id: LoanId,
) -> AppResult<Loan> {
    repository
        .load_loan(id)
        .await?
        .ok_or_else(|| AppError::not_found("Loan not found", json!({ "loan_id": id })))
}

pub(crate) async fn require_reservation<R: LendingRepository>(
    repository: &R,
    id: ReservationId,
) -> AppResult<Reservation> {
    repository.load_reservation(id).await?.ok_or_else(|| {
        AppError::not_found("Reservation not found", json!({ "reservation_id": id }))
    })
}
