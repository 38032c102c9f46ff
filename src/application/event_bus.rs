//! In-process fan-out of domain events to subscribed handlers.
//!
//! The handler registry is assembled once through [`EventBusBuilder`] and is
//! immutable afterwards. [`EventBus::publish`] runs every handler registered
//! for the event's exact type in its own task, waits for all of them, and
//! contains failures: a handler that returns an error or panics is logged
//! and counted, never reported back to the publisher.

use async_trait::async_trait;
use futures::future::join_all;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::domain::events::{
    DomainEvent, LateFeeAssessed, LendingEvent, LostFeeAssessed, ReservationCreated,
    ReservationExpired, ReservationReady,
};

/// Failure reported by an event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A subscriber for one event type.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    /// Identity used in failure logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// Outcome counters of one `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub event_type: &'static str,
    pub delivered: usize,
    pub failed: usize,
}

// Each entry is an `Arc<dyn EventHandler<E>>` for the `E` of its key.
type Registry = HashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>;

/// Collects handler registrations before the bus is frozen.
#[derive(Default)]
pub struct EventBusBuilder {
    handlers: Registry,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`.
    pub fn subscribe<E, H>(self, handler: H) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        self.subscribe_shared::<E>(Arc::new(handler))
    }

    /// Registers an already shared handler, so the caller can keep a handle
    /// to it (e.g. to inspect an audit log).
    pub fn subscribe_shared<E: DomainEvent>(mut self, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Registers one handler for every event of the catalog.
    pub fn subscribe_to_all<H>(self, handler: Arc<H>) -> Self
    where
        H: EventHandler<ReservationCreated>
            + EventHandler<ReservationReady>
            + EventHandler<ReservationExpired>
            + EventHandler<LateFeeAssessed>
            + EventHandler<LostFeeAssessed>,
    {
        self.subscribe_shared::<ReservationCreated>(handler.clone())
            .subscribe_shared::<ReservationReady>(handler.clone())
            .subscribe_shared::<ReservationExpired>(handler.clone())
            .subscribe_shared::<LateFeeAssessed>(handler.clone())
            .subscribe_shared::<LostFeeAssessed>(handler)
    }

    pub fn build(self) -> EventBus {
        EventBus {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Cheaply cloneable handle to the frozen handler registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Registry>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Number of handlers registered for `E`.
    pub fn handler_count<E: DomainEvent>(&self) -> usize {
        self.handlers_for::<E>().len()
    }

    /// Delivers `event` to every handler registered for its type.
    ///
    /// Handlers run concurrently; this returns once all of them have
    /// finished or failed.
    pub async fn publish<E: DomainEvent>(&self, event: E) -> PublishReport {
        let handlers = self.handlers_for::<E>();
        let mut report = PublishReport {
            event_type: E::EVENT_TYPE,
            delivered: 0,
            failed: 0,
        };

        if handlers.is_empty() {
            debug!(event_type = E::EVENT_TYPE, "No handlers registered");
            return report;
        }

        let event = Arc::new(event);
        let tasks = handlers.into_iter().map(|handler| {
            let event = Arc::clone(&event);
            let name = handler.name().to_string();
            let task = tokio::spawn(async move { handler.handle(&event).await });
            async move { (name, task.await) }
        });

        for (name, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(
                        handler = %name,
                        event_type = E::EVENT_TYPE,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        handler = %name,
                        event_type = E::EVENT_TYPE,
                        error = %e,
                        "Event handler panicked"
                    );
                }
            }
        }

        metrics::counter!("lending_events_published_total", "event_type" => E::EVENT_TYPE)
            .increment(1);
        if report.failed > 0 {
            metrics::counter!("lending_event_handler_failures_total", "event_type" => E::EVENT_TYPE)
                .increment(report.failed as u64);
        }

        report
    }

    /// Publishes queued events in order, one `publish` per event.
    pub async fn publish_all(&self, events: Vec<LendingEvent>) -> Vec<PublishReport> {
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            let report = match event {
                LendingEvent::ReservationCreated(e) => self.publish(e).await,
                LendingEvent::ReservationReady(e) => self.publish(e).await,
                LendingEvent::ReservationExpired(e) => self.publish(e).await,
                LendingEvent::LateFeeAssessed(e) => self.publish(e).await,
                LendingEvent::LostFeeAssessed(e) => self.publish(e).await,
            };
            reports.push(report);
        }
        reports
    }

    fn handlers_for<E: DomainEvent>(&self) -> Vec<Arc<dyn EventHandler<E>>> {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.downcast_ref::<Arc<dyn EventHandler<E>>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
