#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use library_lending::application::LendingEngine;
use library_lending::application::event_bus::EventBus;
use library_lending::domain::clock::FixedClock;
use library_lending::domain::entities::{Book, User};
use library_lending::domain::policy::LendingPolicy;
use library_lending::infrastructure::notifications::AuditTrail;
use library_lending::infrastructure::persistence::InMemoryLendingRepository;

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

/// An engine over an in-memory repository with a pinned clock and an audit
/// trail subscribed to every event.
pub struct TestLibrary {
    pub engine: LendingEngine<InMemoryLendingRepository>,
    pub repo: Arc<InMemoryLendingRepository>,
    pub clock: Arc<FixedClock>,
    pub audit: AuditTrail,
}

impl TestLibrary {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_policy(start, LendingPolicy::default())
    }

    pub fn with_policy(start: DateTime<Utc>, policy: LendingPolicy) -> Self {
        let repo = Arc::new(InMemoryLendingRepository::new());
        let clock = Arc::new(FixedClock::new(start));
        let audit = AuditTrail::new();
        let bus = EventBus::builder()
            .subscribe_to_all(Arc::new(audit.clone()))
            .build();
        let engine = LendingEngine::new(repo.clone(), bus, clock.clone(), policy);

        Self {
            engine,
            repo,
            clock,
            audit,
        }
    }

    pub async fn add_book(&self, title: &str, cost: Decimal, copies: u32) -> Book {
        let book = Book::new(title, "Test Author", cost, copies);
        self.repo.add_book(book.clone()).await;
        book
    }

    pub async fn add_user(&self, name: &str) -> User {
        let user = User::new(name, format!("{}@example.com", name.to_lowercase()));
        self.repo.add_user(user.clone()).await;
        user
    }
}
