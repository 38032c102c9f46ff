//! In-memory record of published events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::application::event_bus::{EventHandler, HandlerError};
use crate::domain::events::DomainEvent;

/// One received event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub event_type: &'static str,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Subscriber that keeps every event it receives, in arrival order.
///
/// Cloning shares the underlying log, so one handle can be registered on
/// the bus while another is used to inspect what was delivered.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Event type names in arrival order.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|entry| entry.event_type)
            .collect()
    }

    pub async fn of_type(&self, event_type: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl<E: DomainEvent> EventHandler<E> for AuditTrail {
    fn name(&self) -> &str {
        "audit_trail"
    }

    async fn handle(&self, event: &E) -> Result<(), HandlerError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| HandlerError::failed(format!("cannot serialize event: {e}")))?;
        self.entries.lock().await.push(AuditEntry {
            event_type: E::EVENT_TYPE,
            payload,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::event_bus::EventBus;
    use crate::domain::entities::{Book, Reservation, User};
    use crate::domain::events::{ReservationCreated, ReservationReady};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_records_payload_and_type() {
        let trail = AuditTrail::new();
        let bus = EventBus::builder()
            .subscribe_to_all(Arc::new(trail.clone()))
            .build();

        let book = Book::new("Dune", "Frank Herbert", Decimal::new(2000, 2), 1);
        let user = User::new("Ada", "ada@example.com");
        let reservation = Reservation::new(user.id, book.id, 1, Utc::now());
        bus.publish(ReservationCreated::new(&reservation, &book, &user))
            .await;

        let entries = trail.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "reservation_created");
        assert_eq!(entries[0].payload["queue_position"], 1);
        assert_eq!(entries[0].payload["patron"]["email"], "ada@example.com");
        assert!(trail.of_type("reservation_ready").await.is_empty());
        assert_eq!(bus.handler_count::<ReservationReady>(), 1);
    }
}
