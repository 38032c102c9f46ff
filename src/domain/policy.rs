//! Lending rules supplied from configuration.

use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::json;

use crate::error::{AppError, AppResult};

/// Longest loan period or pickup window accepted, in days.
pub const MAX_PERIOD_DAYS: u32 = 3_650;

/// Fee rates and time windows that parameterize the lending engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LendingPolicy {
    /// Charged per started day past the due date.
    pub daily_late_fee: Decimal,
    /// Added on top of the replacement cost when a copy is lost.
    pub lost_processing_fee: Decimal,
    pub default_loan_period_days: u32,
    /// How long a promoted patron has to collect the held copy.
    pub pickup_window_days: u32,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            daily_late_fee: Decimal::new(50, 2),
            lost_processing_fee: Decimal::new(500, 2),
            default_loan_period_days: 14,
            pickup_window_days: 3,
        }
    }
}

impl LendingPolicy {
    /// Checks that fees are non-negative and periods lie within
    /// `1..=MAX_PERIOD_DAYS`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> AppResult<()> {
        if self.daily_late_fee < Decimal::ZERO {
            return Err(AppError::invalid_input(
                "Daily late fee must not be negative",
                json!({ "daily_late_fee": self.daily_late_fee.to_string() }),
            ));
        }
        if self.lost_processing_fee < Decimal::ZERO {
            return Err(AppError::invalid_input(
                "Lost processing fee must not be negative",
                json!({ "lost_processing_fee": self.lost_processing_fee.to_string() }),
            ));
        }
        if !(1..=MAX_PERIOD_DAYS).contains(&self.default_loan_period_days) {
            return Err(AppError::invalid_input(
                "Default loan period is out of range",
                json!({
                    "default_loan_period_days": self.default_loan_period_days,
                    "max": MAX_PERIOD_DAYS,
                }),
            ));
        }
        if !(1..=MAX_PERIOD_DAYS).contains(&self.pickup_window_days) {
            return Err(AppError::invalid_input(
                "Pickup window is out of range",
                json!({ "pickup_window_days": self.pickup_window_days, "max": MAX_PERIOD_DAYS }),
            ));
        }
        Ok(())
    }

    pub fn pickup_window(&self) -> Duration {
        Duration::days(i64::from(self.pickup_window_days))
    }
}
