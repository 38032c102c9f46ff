//! Fine entity: a monetary penalty tied to one loan.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ids::{FineId, LoanId};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineKind {
    LateReturn,
    Lost,
}

impl FineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FineKind::LateReturn => "late_return",
            FineKind::Lost => "lost",
        }
    }
}

impl TryFrom<&str> for FineKind {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "late_return" => Ok(FineKind::LateReturn),
            "lost" => Ok(FineKind::Lost),
            other => Err(AppError::internal(
                "Unknown fine kind",
                json!({ "kind": other }),
            )),
        }
    }
}

/// Payment state. Only `Outstanding` is ever produced by this crate;
/// payment and waiver happen elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineStatus {
    Outstanding,
    Paid,
    Waived,
}

impl FineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FineStatus::Outstanding => "outstanding",
            FineStatus::Paid => "paid",
            FineStatus::Waived => "waived",
        }
    }
}

impl TryFrom<&str> for FineStatus {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "outstanding" => Ok(FineStatus::Outstanding),
            "paid" => Ok(FineStatus::Paid),
            "waived" => Ok(FineStatus::Waived),
            other => Err(AppError::internal(
                "Unknown fine status",
                json!({ "status": other }),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fine {
    pub id: FineId,
    pub loan_id: LoanId,
    pub kind: FineKind,
    pub amount: Decimal,
    pub status: FineStatus,
    pub computed_at: DateTime<Utc>,
}

impl Fine {
    /// Creates an outstanding fine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] if `amount` is negative.
    pub fn assess(
        loan_id: LoanId,
        kind: FineKind,
        amount: Decimal,
        computed_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        if amount < Decimal::ZERO {
            return Err(AppError::invalid_input(
                "Fine amount must not be negative",
                json!({ "loan_id": loan_id, "amount": amount.to_string() }),
            ));
        }

        Ok(Self {
            id: FineId::new(),
            loan_id,
            kind,
            amount,
            status: FineStatus::Outstanding,
            computed_at,
        })
    }

    pub fn is_outstanding(&self) -> bool {
        self.status == FineStatus::Outstanding
    }
}
