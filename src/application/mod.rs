//! Application layer orchestrating the lending rules.
//!
//! Services load state through the repository trait, apply domain rules
//! under a per-book lock, commit the result atomically and then publish
//! events.
//!
//! # Modules
//!
//! - [`services`] - Loan lifecycle and reservation queue services
//! - [`event_bus`] - Typed in-process publish/subscribe
//! - [`book_locks`] - Per-book mutual exclusion
//! - [`pickup_sweeper`] - Background expiry of uncollected reservations

pub mod book_locks;
pub mod event_bus;
pub mod pickup_sweeper;
pub mod services;

use std::sync::Arc;

use crate::domain::clock::Clock;
use crate::domain::policy::LendingPolicy;
use crate::domain::repositories::LendingRepository;
use event_bus::EventBus;
use services::{LendingContext, LoanService, ReservationService};

/// Both lending services wired to one repository and one shared context.
pub struct LendingEngine<R: LendingRepository> {
    pub loans: LoanService<R>,
    pub reservations: Arc<ReservationService<R>>,
}

impl<R: LendingRepository> LendingEngine<R> {
    pub fn new(
        repository: Arc<R>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        policy: LendingPolicy,
    ) -> Self {
        let context = LendingContext::new(bus, clock, policy);
        let reservations = Arc::new(ReservationService::new(
            repository.clone(),
            context.clone(),
        ));
        let loans = LoanService::new(repository, reservations.clone(), context);

        Self {
            loans,
            reservations,
        }
    }
}
