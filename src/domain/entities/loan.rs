//! Loan entity and its status state machine.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ids::{BookId, LoanId, UserId};
use crate::domain::policy::MAX_PERIOD_DAYS;
use crate::error::{AppError, AppResult};

/// Persisted loan status.
///
/// `Overdue` is deliberately absent: it is derived at query time through
/// [`Loan::is_overdue`] and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Returned,
    Lost,
}

impl LoanStatus {
    /// Returned and Lost admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Returned | LoanStatus::Lost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Returned => "returned",
            LoanStatus::Lost => "lost",
        }
    }
}

impl TryFrom<&str> for LoanStatus {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(LoanStatus::Active),
            "returned" => Ok(LoanStatus::Returned),
            "lost" => Ok(LoanStatus::Lost),
            other => Err(AppError::internal(
                "Unknown loan status",
                json!({ "status": other }),
            )),
        }
    }
}

/// One checkout of one physical copy by one patron.
///
/// Loans are never deleted; terminal loans stay around for fine history.
/// `return_date` is `Some` exactly when the status is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub checkout_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub accrued_fine: Option<Decimal>,
}

impl Loan {
    /// Opens an active loan due `period_days` after `checkout_date`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] if `period_days` is zero or above
    /// [`MAX_PERIOD_DAYS`], or if the due date falls outside the supported
    /// date range.
    pub fn open(
        user_id: UserId,
        book_id: BookId,
        checkout_date: DateTime<Utc>,
        period_days: u32,
    ) -> AppResult<Self> {
        if !(1..=MAX_PERIOD_DAYS).contains(&period_days) {
            return Err(AppError::invalid_input(
                "Loan period is out of range",
                json!({ "loan_period_days": period_days, "max": MAX_PERIOD_DAYS }),
            ));
        }
        let due_date = checkout_date
            .checked_add_signed(Duration::days(i64::from(period_days)))
            .ok_or_else(|| {
                AppError::invalid_input(
                    "Due date is out of range",
                    json!({ "checkout_date": checkout_date, "loan_period_days": period_days }),
                )
            })?;

        Ok(Self {
            id: LoanId::new(),
            user_id,
            book_id,
            checkout_date,
            due_date,
            return_date: None,
            status: LoanStatus::Active,
            accrued_fine: None,
        })
    }

    /// True while the loan is active and `now` is past the due date.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Active && now > self.due_date
    }

    /// Closes the loan as returned at `returned_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the loan is already terminal and
    /// [`AppError::InvalidInput`] if `returned_at` precedes the checkout.
    pub fn mark_returned(
        &mut self,
        returned_at: DateTime<Utc>,
        fine: Option<Decimal>,
    ) -> AppResult<()> {
        self.ensure_active()?;
        if returned_at < self.checkout_date {
            return Err(AppError::invalid_input(
                "Return date precedes checkout date",
                json!({
                    "loan_id": self.id,
                    "checkout_date": self.checkout_date,
                    "return_date": returned_at,
                }),
            ));
        }

        self.status = LoanStatus::Returned;
        self.return_date = Some(returned_at);
        self.accrued_fine = fine;
        Ok(())
    }

    /// Closes the loan as lost; the copy never comes back.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the loan is already terminal.
    pub fn mark_lost(&mut self, at: DateTime<Utc>, fine: Decimal) -> AppResult<()> {
        self.ensure_active()?;

        self.status = LoanStatus::Lost;
        self.return_date = Some(at);
        self.accrued_fine = Some(fine);
        Ok(())
    }

    fn ensure_active(&self) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::invalid_state(
                "Loan is already closed",
                json!({ "loan_id": self.id, "status": self.status.as_str() }),
            ));
        }
        Ok(())
    }
}
