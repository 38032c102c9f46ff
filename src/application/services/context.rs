//! Collaborators shared by the lending services.

use std::sync::Arc;

use crate::application::book_locks::BookLocks;
use crate::application::event_bus::EventBus;
use crate::domain::clock::Clock;
use crate::domain::policy::LendingPolicy;

/// Everything a lending service needs besides its repository.
///
/// Both services must share one context (and in particular one
/// [`BookLocks`]) for the per-book exclusion to hold across them.
#[derive(Clone)]
pub struct LendingContext {
    pub bus: EventBus,
    pub locks: BookLocks,
    pub clock: Arc<dyn Clock>,
    pub policy: LendingPolicy,
}

impl LendingContext {
    pub fn new(bus: EventBus, clock: Arc<dyn Clock>, policy: LendingPolicy) -> Self {
        Self {
            bus,
            locks: BookLocks::new(),
            clock,
            policy,
        }
    }
}
