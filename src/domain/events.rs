//! Domain events emitted by the lending engine.
//!
//! Every event is an immutable snapshot taken right after the triggering
//! transition was committed. Payloads are denormalized (patron name and
//! email, book title, amounts, deadlines) so subscribers such as notifiers
//! never need to query the repository.
//!
//! # Catalog
//!
//! | Event                  | Emitted by                                   |
//! |------------------------|----------------------------------------------|
//! | [`ReservationCreated`] | `reserve`                                    |
//! | [`ReservationReady`]   | promotion after return, cancel or expiry     |
//! | [`ReservationExpired`] | `expire_overdue`                             |
//! | [`LateFeeAssessed`]    | `return_book` past the due date              |
//! | [`LostFeeAssessed`]    | `mark_lost`                                  |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Debug;

use crate::domain::entities::{
    Book, BookId, Fine, FineId, Loan, LoanId, Reservation, ReservationId, User, UserId,
};

/// Marker for types that can travel over the event bus.
pub trait DomainEvent: Debug + Clone + Serialize + Send + Sync + 'static {
    /// Stable name used in logs, metrics and audit records.
    const EVENT_TYPE: &'static str;
}

/// Patron display data carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatronRef {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl From<&User> for PatronRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Book display data carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleRef {
    pub id: BookId,
    pub title: String,
}

impl From<&Book> for TitleRef {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationCreated {
    pub reservation_id: ReservationId,
    pub patron: PatronRef,
    pub book: TitleRef,
    pub queue_position: u32,
    pub reserved_at: DateTime<Utc>,
}

impl ReservationCreated {
    pub fn new(reservation: &Reservation, book: &Book, user: &User) -> Self {
        Self {
            reservation_id: reservation.id,
            patron: user.into(),
            book: book.into(),
            queue_position: reservation.position,
            reserved_at: reservation.reserved_at,
        }
    }
}

impl DomainEvent for ReservationCreated {
    const EVENT_TYPE: &'static str = "reservation_created";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationReady {
    pub reservation_id: ReservationId,
    pub patron: PatronRef,
    pub book: TitleRef,
    pub promoted_at: DateTime<Utc>,
    pub pickup_deadline: DateTime<Utc>,
}

impl ReservationReady {
    /// Builds the event for a freshly promoted reservation.
    ///
    /// Falls back to `promoted_at` as deadline if the reservation carries
    /// none, which cannot happen for a promotion made through the queue.
    pub fn new(
        reservation: &Reservation,
        book: &Book,
        user: &User,
        promoted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id: reservation.id,
            patron: user.into(),
            book: book.into(),
            promoted_at,
            pickup_deadline: reservation.pickup_deadline.unwrap_or(promoted_at),
        }
    }
}

impl DomainEvent for ReservationReady {
    const EVENT_TYPE: &'static str = "reservation_ready";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationExpired {
    pub reservation_id: ReservationId,
    pub patron: PatronRef,
    pub book: TitleRef,
    pub pickup_deadline: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl DomainEvent for ReservationExpired {
    const EVENT_TYPE: &'static str = "reservation_expired";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LateFeeAssessed {
    pub fine_id: FineId,
    pub loan_id: LoanId,
    pub patron: PatronRef,
    pub book: TitleRef,
    pub amount: Decimal,
    pub days_late: i64,
    pub due_date: DateTime<Utc>,
    pub returned_at: DateTime<Utc>,
}

impl LateFeeAssessed {
    pub fn new(fine: &Fine, loan: &Loan, book: &Book, user: &User, days_late: i64) -> Self {
        Self {
            fine_id: fine.id,
            loan_id: loan.id,
            patron: user.into(),
            book: book.into(),
            amount: fine.amount,
            days_late,
            due_date: loan.due_date,
            returned_at: loan.return_date.unwrap_or(fine.computed_at),
        }
    }
}

impl DomainEvent for LateFeeAssessed {
    const EVENT_TYPE: &'static str = "late_fee_assessed";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LostFeeAssessed {
    pub fine_id: FineId,
    pub loan_id: LoanId,
    pub patron: PatronRef,
    pub book: TitleRef,
    pub amount: Decimal,
    pub replacement_cost: Decimal,
    pub processing_fee: Decimal,
    pub assessed_at: DateTime<Utc>,
}

impl DomainEvent for LostFeeAssessed {
    const EVENT_TYPE: &'static str = "lost_fee_assessed";
}

/// Any event of the catalog, used to queue events until their transition
/// has been committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LendingEvent {
    ReservationCreated(ReservationCreated),
    ReservationReady(ReservationReady),
    ReservationExpired(ReservationExpired),
    LateFeeAssessed(LateFeeAssessed),
    LostFeeAssessed(LostFeeAssessed),
}

impl LendingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LendingEvent::ReservationCreated(_) => ReservationCreated::EVENT_TYPE,
            LendingEvent::ReservationReady(_) => ReservationReady::EVENT_TYPE,
            LendingEvent::ReservationExpired(_) => ReservationExpired::EVENT_TYPE,
            LendingEvent::LateFeeAssessed(_) => LateFeeAssessed::EVENT_TYPE,
            LendingEvent::LostFeeAssessed(_) => LostFeeAssessed::EVENT_TYPE,
        }
    }
}

macro_rules! impl_into_lending_event {
    ($($event:ident),* $(,)?) => {
        $(
            impl From<$event> for LendingEvent {
                fn from(event: $event) -> Self {
                    LendingEvent::$event(event)
                }
            }
        )*
    };
}

impl_into_lending_event!(
    ReservationCreated,
    ReservationReady,
    ReservationExpired,
    LateFeeAssessed,
    LostFeeAssessed,
);
