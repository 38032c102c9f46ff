//! Pure fee arithmetic for late returns and lost copies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use crate::domain::entities::Loan;
use crate::error::{AppError, AppResult};

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole or partial days between `due_date` and `return_date`, rounded up.
///
/// Zero when the return is on time.
pub fn days_late(due_date: DateTime<Utc>, return_date: DateTime<Utc>) -> i64 {
    let seconds = (return_date - due_date).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

/// Late fee: `ceil(days late) * daily_rate`, or zero if returned on time.
///
/// # Errors
///
/// Returns [`AppError::InvalidInput`] if `daily_rate` is negative.
pub fn late_fee(
    due_date: DateTime<Utc>,
    return_date: DateTime<Utc>,
    daily_rate: Decimal,
) -> AppResult<Decimal> {
    ensure_non_negative("daily_rate", daily_rate)?;
    Ok(Decimal::from(days_late(due_date, return_date)) * daily_rate)
}

/// Late fee for a loan that has been closed.
///
/// # Errors
///
/// Returns [`AppError::InvalidInput`] if the loan has no return date yet or
/// `daily_rate` is negative.
pub fn late_fee_for_loan(loan: &Loan, daily_rate: Decimal) -> AppResult<Decimal> {
    let return_date = loan.return_date.ok_or_else(|| {
        AppError::invalid_input(
            "Loan has no return date",
            json!({ "loan_id": loan.id }),
        )
    })?;
    late_fee(loan.due_date, return_date, daily_rate)
}

/// Flat fee assessed when a loaned copy is lost.
///
/// # Errors
///
/// Returns [`AppError::InvalidInput`] if either input is negative.
pub fn lost_fee(replacement_cost: Decimal, processing_fee: Decimal) -> AppResult<Decimal> {
    ensure_non_negative("replacement_cost", replacement_cost)?;
    ensure_non_negative("processing_fee", processing_fee)?;
    Ok(replacement_cost + processing_fee)
}

fn ensure_non_negative(field: &str, value: Decimal) -> AppResult<()> {
    if value < Decimal::ZERO {
        return Err(AppError::invalid_input(
            "Monetary input must not be negative",
            json!({ "field": field, "value": value.to_string() }),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{BookId, UserId};
    use crate::error::ErrorKind;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
    }

    fn rate() -> Decimal {
        Decimal::new(50, 2)
    }

    #[test]
    fn test_on_time_return_is_free() {
        assert_eq!(late_fee(due(), due(), rate()).unwrap(), Decimal::ZERO);
        assert_eq!(
            late_fee(due(), due() - Duration::days(2), rate()).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_one_day_late_costs_one_rate() {
        assert_eq!(
            late_fee(due(), due() + Duration::days(1), rate()).unwrap(),
            rate()
        );
    }

    #[test]
    fn test_partial_day_rounds_up() {
        assert_eq!(days_late(due(), due() + Duration::seconds(1)), 1);
        assert_eq!(days_late(due(), due() + Duration::hours(25)), 2);
    }

    #[test]
    fn test_three_days_late_at_fifty_cents() {
        let returned = Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap();
        assert_eq!(
            late_fee(due(), returned, rate()).unwrap(),
            Decimal::new(150, 2)
        );
    }

    #[test]
    fn test_late_fee_is_monotonic_in_return_date() {
        let mut previous = Decimal::ZERO;
        for hours in 0..(24 * 10) {
            let fee = late_fee(due(), due() + Duration::hours(hours), rate()).unwrap();
            assert!(fee >= previous);
            previous = fee;
        }
    }

    #[test]
    fn test_negative_rate_is_rejected() {
        let err = late_fee(due(), due(), Decimal::new(-1, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_late_fee_for_open_loan_is_rejected() {
        let loan = Loan::open(UserId::new(), BookId::new(), due(), 7).unwrap();
        let err = late_fee_for_loan(&loan, rate()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_late_fee_for_returned_loan() {
        let mut loan = Loan::open(UserId::new(), BookId::new(), due(), 7).unwrap();
        loan.mark_returned(loan.due_date + Duration::days(2), None)
            .unwrap();

        assert_eq!(late_fee_for_loan(&loan, rate()).unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_lost_fee_adds_processing() {
        assert_eq!(
            lost_fee(Decimal::new(2000, 2), Decimal::new(500, 2)).unwrap(),
            Decimal::new(2500, 2)
        );
    }

    #[test]
    fn test_lost_fee_rejects_negative_inputs() {
        assert!(lost_fee(Decimal::new(-1, 0), Decimal::ONE).is_err());
        assert!(lost_fee(Decimal::ONE, Decimal::new(-1, 0)).is_err());
    }
}
