//! Patron notifications written to the structured log.

use async_trait::async_trait;
use tracing::info;

use crate::application::event_bus::{EventHandler, HandlerError};
use crate::domain::events::{
    LateFeeAssessed, LostFeeAssessed, ReservationCreated, ReservationExpired, ReservationReady,
};

/// Stand-in for an email or SMS gateway.
///
/// Each event becomes one `info` record on the `notifications` target,
/// addressed to the patron's email.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler<ReservationCreated> for LogNotifier {
    fn name(&self) -> &str {
        "log_notifier"
    }

    async fn handle(&self, event: &ReservationCreated) -> Result<(), HandlerError> {
        info!(
            target: "notifications",
            to = %event.patron.email,
            book = %event.book.title,
            position = event.queue_position,
            "You are number {} in line for \"{}\"",
            event.queue_position,
            event.book.title
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ReservationReady> for LogNotifier {
    fn name(&self) -> &str {
        "log_notifier"
    }

    async fn handle(&self, event: &ReservationReady) -> Result<(), HandlerError> {
        info!(
            target: "notifications",
            to = %event.patron.email,
            book = %event.book.title,
            deadline = %event.pickup_deadline,
            "\"{}\" is ready for pickup until {}",
            event.book.title,
            event.pickup_deadline
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ReservationExpired> for LogNotifier {
    fn name(&self) -> &str {
        "log_notifier"
    }

    async fn handle(&self, event: &ReservationExpired) -> Result<(), HandlerError> {
        info!(
            target: "notifications",
            to = %event.patron.email,
            book = %event.book.title,
            "Your hold on \"{}\" expired on {}",
            event.book.title,
            event.pickup_deadline
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<LateFeeAssessed> for LogNotifier {
    fn name(&self) -> &str {
        "log_notifier"
    }

    async fn handle(&self, event: &LateFeeAssessed) -> Result<(), HandlerError> {
        info!(
            target: "notifications",
            to = %event.patron.email,
            book = %event.book.title,
            amount = %event.amount,
            days_late = event.days_late,
            "\"{}\" came back {} day(s) late, a fee of {} was charged",
            event.book.title,
            event.days_late,
            event.amount
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<LostFeeAssessed> for LogNotifier {
    fn name(&self) -> &str {
        "log_notifier"
    }

    async fn handle(&self, event: &LostFeeAssessed) -> Result<(), HandlerError> {
        info!(
            target: "notifications",
            to = %event.patron.email,
            book = %event.book.title,
            amount = %event.amount,
            "\"{}\" was reported lost, you were charged {}",
            event.book.title,
            event.amount
        );
        Ok(())
    }
}
