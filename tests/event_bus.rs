mod common;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use common::{TestLibrary, at};
use library_lending::application::event_bus::{EventBus, EventHandler, HandlerError};
use library_lending::application::pickup_sweeper::run_pickup_sweeper;
use library_lending::domain::clock::Clock;
use library_lending::domain::entities::ReservationStatus;
use library_lending::domain::events::{
    LateFeeAssessed, LostFeeAssessed, ReservationCreated, ReservationExpired, ReservationReady,
};
use library_lending::infrastructure::notifications::{AuditTrail, LogNotifier};

struct Unreachable;

#[async_trait]
impl EventHandler<ReservationCreated> for Unreachable {
    fn name(&self) -> &str {
        "unreachable_gateway"
    }

    async fn handle(&self, _event: &ReservationCreated) -> Result<(), HandlerError> {
        Err(anyhow::anyhow!("connection refused").into())
    }
}

struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl EventHandler<ReservationCreated> for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    async fn handle(&self, _event: &ReservationCreated) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_shipped_subscribers_cover_every_event() {
    let bus = EventBus::builder()
        .subscribe_to_all(Arc::new(LogNotifier::new()))
        .subscribe_to_all(Arc::new(AuditTrail::new()))
        .build();

    assert_eq!(bus.handler_count::<ReservationCreated>(), 2);
    assert_eq!(bus.handler_count::<ReservationReady>(), 2);
    assert_eq!(bus.handler_count::<ReservationExpired>(), 2);
    assert_eq!(bus.handler_count::<LateFeeAssessed>(), 2);
    assert_eq!(bus.handler_count::<LostFeeAssessed>(), 2);
}

#[tokio::test]
async fn test_failing_subscriber_does_not_fail_the_operation() {
    let library = TestLibrary::new(at(1));
    let book = library.add_book("Dune", Decimal::new(2000, 2), 1).await;
    let patron = library.add_user("Alice").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let bus = EventBus::builder()
        .subscribe(Unreachable)
        .subscribe(Counter(calls.clone()))
        .subscribe_to_all(Arc::new(LogNotifier::new()))
        .build();
    let engine = library_lending::application::LendingEngine::new(
        library.repo.clone(),
        bus,
        library.clock.clone(),
        Default::default(),
    );

    let reservation = engine.reservations.reserve(book.id, patron.id).await;

    assert!(reservation.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_events_arrive_in_commit_order() {
    let library = TestLibrary::new(at(1));
    let book = library.add_book("Dune", Decimal::new(2000, 2), 1).await;
    let borrower = library.add_user("Alice").await;
    let waiting = library.add_user("Bob").await;

    let loan = library
        .engine
        .loans
        .checkout(book.id, borrower.id, 9)
        .await
        .unwrap();
    library
        .engine
        .reservations
        .reserve(book.id, waiting.id)
        .await
        .unwrap();
    library.clock.set(at(12));
    library
        .engine
        .loans
        .return_book(loan.id, at(12))
        .await
        .unwrap();

    assert_eq!(
        library.audit.event_types().await,
        vec![
            "reservation_created",
            "late_fee_assessed",
            "reservation_ready"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pickup_sweeper_expires_until_shutdown() {
    let library = TestLibrary::new(at(1));
    let book = library.add_book("Dune", Decimal::new(2000, 2), 1).await;
    let borrower = library.add_user("Alice").await;
    let waiting = library.add_user("Bob").await;

    let loan = library
        .engine
        .loans
        .checkout(book.id, borrower.id, 14)
        .await
        .unwrap();
    let reservation = library
        .engine
        .reservations
        .reserve(book.id, waiting.id)
        .await
        .unwrap();
    library
        .engine
        .loans
        .return_book(loan.id, at(2))
        .await
        .unwrap();
    library.clock.set(at(9));

    let clock: Arc<dyn Clock> = library.clock.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_pickup_sweeper(
        library.engine.reservations.clone(),
        clock,
        Duration::from_millis(10),
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper should stop on shutdown")
        .unwrap();

    let expired = library
        .engine
        .reservations
        .get(reservation.id)
        .await
        .unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(library.audit.of_type("reservation_expired").await.len(), 1);
}
