//! Reservation entity: a patron's place in a book's waiting list.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ids::{BookId, ReservationId, UserId};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Waiting,
    ReadyForPickup,
    Expired,
    Fulfilled,
    Cancelled,
}

impl ReservationStatus {
    /// Waiting and ready-for-pickup reservations occupy a queue position.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ReservationStatus::Waiting | ReservationStatus::ReadyForPickup
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Waiting => "waiting",
            ReservationStatus::ReadyForPickup => "ready_for_pickup",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<&str> for ReservationStatus {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting" => Ok(ReservationStatus::Waiting),
            "ready_for_pickup" => Ok(ReservationStatus::ReadyForPickup),
            "expired" => Ok(ReservationStatus::Expired),
            "fulfilled" => Ok(ReservationStatus::Fulfilled),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(AppError::internal(
                "Unknown reservation status",
                json!({ "status": other }),
            )),
        }
    }
}

/// A patron's reservation on a currently unavailable book.
///
/// `position` is meaningful only while the reservation is active; once it
/// leaves the queue the last held position is kept for history.
/// `pickup_deadline` is set only while the status is ready-for-pickup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub reserved_at: DateTime<Utc>,
    pub position: u32,
    pub status: ReservationStatus,
    pub pickup_deadline: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates a waiting reservation at `position`.
    pub fn new(
        user_id: UserId,
        book_id: BookId,
        position: u32,
        reserved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            user_id,
            book_id,
            reserved_at,
            position,
            status: ReservationStatus::Waiting,
            pickup_deadline: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_ready(&self) -> bool {
        self.status == ReservationStatus::ReadyForPickup
    }

    /// True if the reservation is ready and its pickup deadline has passed.
    pub fn is_pickup_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_ready() && self.pickup_deadline.is_some_and(|deadline| now > deadline)
    }

    /// Moves a waiting reservation to ready-for-pickup.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] unless the reservation is waiting,
    /// and [`AppError::InvalidInput`] if the deadline falls outside the
    /// supported date range.
    pub fn promote(&mut self, now: DateTime<Utc>, window: Duration) -> AppResult<()> {
        if self.status != ReservationStatus::Waiting {
            return Err(self.transition_error("promote"));
        }
        let deadline = now.checked_add_signed(window).ok_or_else(|| {
            AppError::invalid_input(
                "Pickup deadline is out of range",
                json!({ "reservation_id": self.id, "window_days": window.num_days() }),
            )
        })?;
        self.status = ReservationStatus::ReadyForPickup;
        self.pickup_deadline = Some(deadline);
        Ok(())
    }

    /// Takes an active reservation out of the queue with a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the reservation is not active,
    /// or if `outcome` is not a terminal status.
    pub fn close(&mut self, outcome: ReservationStatus) -> AppResult<()> {
        if !self.is_active() || outcome.is_active() {
            return Err(self.transition_error(outcome.as_str()));
        }
        self.status = outcome;
        self.pickup_deadline = None;
        Ok(())
    }

    fn transition_error(&self, action: &str) -> AppError {
        AppError::invalid_state(
            "Reservation cannot make this transition",
            json!({
                "reservation_id": self.id,
                "status": self.status.as_str(),
                "action": action,
            }),
        )
    }
}
