//! Loan lifecycle: checkout, return and loss.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::context::LendingContext;
use super::lookup::{require_book, require_loan, require_user};
use super::reservation_service::{CopyDisposition, ReservationService};
use crate::domain::entities::{BookId, Fine, FineKind, Loan, LoanId, ReservationStatus, UserId};
use crate::domain::events::{LateFeeAssessed, LendingEvent, LostFeeAssessed};
use crate::domain::fine_calculator::{days_late, late_fee_for_loan, lost_fee};
use crate::domain::repositories::{Changeset, LendingRepository};
use crate::error::{AppError, AppResult};

/// Result of a successful return.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnOutcome {
    pub loan: Loan,
    /// Late fee assessed by this return, if the copy came back late.
    pub fine: Option<Fine>,
    pub copy: CopyDisposition,
}

/// Result of marking a loan lost.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutcome {
    pub loan: Loan,
    pub fine: Fine,
}

/// Drives each loan through `Active -> Returned | Lost`.
///
/// Transitions run under the book's lock, commit the loan together with
/// its fine, copy counter change and any queue promotion, and publish their
/// events only afterwards.
pub struct LoanService<R: LendingRepository> {
    repository: Arc<R>,
    reservations: Arc<ReservationService<R>>,
    context: LendingContext,
}

impl<R: LendingRepository> LoanService<R> {
    /// Creates a new loan service.
    ///
    /// `context` must be the same one `reservations` was built with.
    pub fn new(
        repository: Arc<R>,
        reservations: Arc<ReservationService<R>>,
        context: LendingContext,
    ) -> Self {
        Self {
            repository,
            reservations,
            context,
        }
    }

    /// Checks out `book_id` to `user_id` for the configured default period.
    ///
    /// # Errors
    ///
    /// See [`Self::checkout`].
    pub async fn checkout_default(&self, book_id: BookId, user_id: UserId) -> AppResult<Loan> {
        self.checkout(book_id, user_id, self.context.policy.default_loan_period_days)
            .await
    }

    /// Lends a copy of `book_id` to `user_id` for `loan_period_days`.
    ///
    /// A patron collecting their ready-for-pickup reservation takes the copy
    /// held for them; anyone else needs a copy on the shelf. Either way a
    /// reservation the patron had on this book is fulfilled, and if copies
    /// remain on the shelf the next patron in line gets one held.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for a zero loan period,
    /// [`AppError::NotFound`] if the book or user does not exist,
    /// [`AppError::DuplicateRequest`] if the user already has this book on
    /// loan, and [`AppError::NotAvailable`] if no copy is free.
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        book_id: BookId,
        user_id: UserId,
        loan_period_days: u32,
    ) -> AppResult<Loan> {
        let now = self.context.clock.now();
        let loan = Loan::open(user_id, book_id, now, loan_period_days)?;

        let guard = self.context.locks.lock(book_id).await;

        let book = require_book(self.repository.as_ref(), book_id).await?;
        require_user(self.repository.as_ref(), user_id).await?;

        if let Some(existing) = self.repository.find_active_loan(book_id, user_id).await? {
            return Err(AppError::duplicate(
                "User already has this book on loan",
                json!({ "book_id": book_id, "user_id": user_id, "loan_id": existing.id }),
            ));
        }

        let mut queue = self.reservations.load_queue(book_id).await?;
        let reservation = queue.find_for_user(user_id).cloned();
        let mut changes = Changeset::new();
        let mut events: Vec<LendingEvent> = Vec::new();
        changes.guard_book(&book);
        let available = self.repository.get_available_copies(book_id).await?;

        let shelf = match &reservation {
            Some(held) if held.is_ready() => {
                changes.save_reservations(queue.withdraw(held.id, ReservationStatus::Fulfilled)?);
                available
            }
            waiting => {
                if available == 0 {
                    return Err(AppError::not_available(
                        "No copy of this book is available",
                        json!({ "book_id": book_id, "queue_length": queue.len() }),
                    ));
                }
                changes.adjust_available_copies(book_id, -1);
                if let Some(waiting) = waiting {
                    changes.save_reservations(
                        queue.withdraw(waiting.id, ReservationStatus::Fulfilled)?,
                    );
                }
                available - 1
            }
        };
        self.reservations
            .stage_shelf_hold(&mut queue, &book, shelf, &mut changes, &mut events, now)
            .await?;
        debug_assert!(queue.is_consistent());

        changes.save_loan(loan.clone());
        self.repository.commit(changes).await?;
        drop(guard);

        info!(
            loan_id = %loan.id,
            due_date = %loan.due_date,
            fulfilled_reservation = reservation.is_some(),
            "Book checked out"
        );
        self.context.bus.publish_all(events).await;

        Ok(loan)
    }

    /// Closes a loan as returned at `returned_at`.
    ///
    /// A late return is charged through the fine calculator. The freed copy
    /// goes to the head of the book's queue, or back on the shelf if nobody
    /// is waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the loan does not exist,
    /// [`AppError::InvalidState`] if it is already returned or lost, and
    /// [`AppError::InvalidInput`] if `returned_at` precedes the checkout.
    #[instrument(skip(self))]
    pub async fn return_book(
        &self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> AppResult<ReturnOutcome> {
        let stored = require_loan(self.repository.as_ref(), loan_id).await?;

        let guard = self.context.locks.lock(stored.book_id).await;

        let book = require_book(self.repository.as_ref(), stored.book_id).await?;
        let user = require_user(self.repository.as_ref(), stored.user_id).await?;
        let mut loan = require_loan(self.repository.as_ref(), loan_id).await?;
        let now = self.context.clock.now();
        let mut changes = Changeset::new();
        changes.guard_book(&book);
        let mut events: Vec<LendingEvent> = Vec::new();

        loan.mark_returned(returned_at, None)?;
        let fee = late_fee_for_loan(&loan, self.context.policy.daily_late_fee)?;
        let fine = if fee.is_zero() {
            None
        } else {
            Some(self.assess(loan.id, FineKind::LateReturn, fee, now).await?)
        };
        loan.accrued_fine = fine.as_ref().map(|f| f.amount);
        changes.save_loan(loan.clone());

        if let Some(fine) = &fine {
            changes.save_fine(fine.clone());
            let days = days_late(loan.due_date, returned_at);
            events.push(LateFeeAssessed::new(fine, &loan, &book, &user, days).into());
        }

        let mut queue = self.reservations.load_queue(book.id).await?;
        let copy = self
            .reservations
            .stage_copy_freed(&mut queue, &book, &mut changes, &mut events, now)
            .await?;

        self.repository.commit(changes).await?;
        drop(guard);

        info!(
            loan_id = %loan.id,
            late_fee = ?fine.as_ref().map(|f| f.amount),
            copy = ?copy,
            "Book returned"
        );
        self.context.bus.publish_all(events).await;

        Ok(ReturnOutcome { loan, fine, copy })
    }

    /// Closes a loan as lost and charges replacement cost plus processing fee.
    ///
    /// The copy is gone: availability does not change and nobody in the
    /// queue is promoted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the loan does not exist and
    /// [`AppError::InvalidState`] if it is already returned or lost.
    #[instrument(skip(self))]
    pub async fn mark_lost(&self, loan_id: LoanId) -> AppResult<LossOutcome> {
        let stored = require_loan(self.repository.as_ref(), loan_id).await?;

        let guard = self.context.locks.lock(stored.book_id).await;

        let book = require_book(self.repository.as_ref(), stored.book_id).await?;
        let user = require_user(self.repository.as_ref(), stored.user_id).await?;
        let mut loan = require_loan(self.repository.as_ref(), loan_id).await?;
        let now = self.context.clock.now();
        let processing_fee = self.context.policy.lost_processing_fee;

        let amount = lost_fee(book.replacement_cost, processing_fee)?;
        loan.mark_lost(now, amount)?;
        let fine = self.assess(loan.id, FineKind::Lost, amount, now).await?;

        let mut changes = Changeset::new();
        changes
            .guard_book(&book)
            .save_loan(loan.clone())
            .save_fine(fine.clone());
        self.repository.commit(changes).await?;
        drop(guard);

        warn!(loan_id = %loan.id, amount = %amount, "Loan marked lost");
        self.context
            .bus
            .publish(LostFeeAssessed {
                fine_id: fine.id,
                loan_id: loan.id,
                patron: (&user).into(),
                book: (&book).into(),
                amount,
                replacement_cost: book.replacement_cost,
                processing_fee,
                assessed_at: now,
            })
            .await;

        Ok(LossOutcome { loan, fine })
    }

    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the loan does not exist.
    pub async fn get(&self, loan_id: LoanId) -> AppResult<Loan> {
        require_loan(self.repository.as_ref(), loan_id).await
    }

    /// Active loans past their due date at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    pub async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let loans = self.repository.find_overdue_loans(now).await?;
        Ok(loans.into_iter().filter(|loan| loan.is_overdue(now)).collect())
    }

    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the loan does not exist.
    pub async fn fines_for_loan(&self, loan_id: LoanId) -> AppResult<Vec<Fine>> {
        require_loan(self.repository.as_ref(), loan_id).await?;
        self.repository.find_fines_for_loan(loan_id).await
    }

    /// Creates an outstanding fine unless one of the same kind already exists.
    async fn assess(
        &self,
        loan_id: LoanId,
        kind: FineKind,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<Fine> {
        if let Some(existing) = self.repository.find_outstanding_fine(loan_id, kind).await? {
            return Err(AppError::duplicate(
                "Loan already has an outstanding fine of this kind",
                json!({ "loan_id": loan_id, "kind": kind.as_str(), "fine_id": existing.id }),
            ));
        }
        Fine::assess(loan_id, kind, amount, now)
    }
}
