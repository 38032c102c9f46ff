//! PostgreSQL repository tests. They need a reachable `DATABASE_URL` and run
//! with `cargo test -- --ignored`.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;

use library_lending::application::LendingEngine;
use library_lending::application::event_bus::EventBus;
use library_lending::domain::clock::FixedClock;
use library_lending::domain::entities::{
    Book, Fine, FineKind, Loan, LoanStatus, Reservation, ReservationStatus, User,
};
use library_lending::domain::policy::LendingPolicy;
use library_lending::domain::repositories::{Changeset, LendingRepository};
use library_lending::error::ErrorKind;
use library_lending::infrastructure::persistence::PgLendingRepository;

async fn seeded(pool: PgPool, copies: u32) -> (PgLendingRepository, Book, User) {
    let repo = PgLendingRepository::new(Arc::new(pool));
    let book = Book::new("Dune", "Frank Herbert", Decimal::new(2000, 2), copies);
    let user = User::new("Ada", "ada@example.com");
    repo.add_book(&book).await.unwrap();
    repo.add_user(&user).await.unwrap();
    (repo, book, user)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_round_trips_loan_and_counter(pool: PgPool) {
    let (repo, book, user) = seeded(pool, 2).await;
    let loan = Loan::open(user.id, book.id, Utc::now(), 14).unwrap();

    let mut changes = Changeset::new();
    changes
        .save_loan(loan.clone())
        .adjust_available_copies(book.id, -1);
    repo.commit(changes).await.unwrap();

    assert_eq!(repo.get_available_copies(book.id).await.unwrap(), 1);
    let stored = repo.load_loan(loan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LoanStatus::Active);
    assert_eq!(stored.book_id, book.id);
    assert!(
        repo.find_active_loan(book.id, user.id)
            .await
            .unwrap()
            .is_some()
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_failed_commit_rolls_back(pool: PgPool) {
    let (repo, book, user) = seeded(pool, 0).await;
    let loan = Loan::open(user.id, book.id, Utc::now(), 14).unwrap();

    let mut changes = Changeset::new();
    changes
        .save_loan(loan.clone())
        .adjust_available_copies(book.id, -1);
    let err = repo.commit(changes).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotAvailable);
    assert!(repo.load_loan(loan.id).await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_queue_renumbering_respects_unique_positions(pool: PgPool) {
    let (repo, book, first_user) = seeded(pool, 1).await;
    let second_user = User::new("Bob", "bob@example.com");
    repo.add_user(&second_user).await.unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let mut first = Reservation::new(first_user.id, book.id, 1, now);
    let mut second = Reservation::new(second_user.id, book.id, 2, now);

    let mut changes = Changeset::new();
    changes.save_reservations([first.clone(), second.clone()]);
    repo.commit(changes).await.unwrap();

    first.close(ReservationStatus::Cancelled).unwrap();
    second.position = 1;
    let mut changes = Changeset::new();
    changes.save_reservations([second.clone(), first.clone()]);
    repo.commit(changes).await.unwrap();

    let queue = repo.load_reservations_for_book(book.id).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, second.id);
    assert_eq!(queue[0].position, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_second_outstanding_fine_is_rejected(pool: PgPool) {
    let (repo, book, user) = seeded(pool, 1).await;
    let loan = Loan::open(user.id, book.id, Utc::now(), 14).unwrap();
    let mut changes = Changeset::new();
    changes.save_loan(loan.clone()).save_fine(
        Fine::assess(loan.id, FineKind::Lost, Decimal::new(2500, 2), Utc::now()).unwrap(),
    );
    repo.commit(changes).await.unwrap();

    let mut changes = Changeset::new();
    changes.save_fine(
        Fine::assess(loan.id, FineKind::Lost, Decimal::ONE, Utc::now()).unwrap(),
    );
    let err = repo.commit(changes).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateRequest);
    let fine = repo
        .find_outstanding_fine(loan.id, FineKind::Lost)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fine.amount, Decimal::new(2500, 2));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_against_stale_book_version_is_rejected(pool: PgPool) {
    let (repo, book, user) = seeded(pool, 2).await;
    let first = Loan::open(user.id, book.id, Utc::now(), 14).unwrap();

    let mut changes = Changeset::new();
    changes
        .guard_book(&book)
        .save_loan(first)
        .adjust_available_copies(book.id, -1);
    repo.commit(changes).await.unwrap();
    assert_eq!(repo.load_book(book.id).await.unwrap().unwrap().version, 1);

    let second = Loan::open(user.id, book.id, Utc::now(), 14).unwrap();
    let mut stale = Changeset::new();
    stale
        .guard_book(&book)
        .save_loan(second.clone())
        .adjust_available_copies(book.id, -1);
    let err = repo.commit(stale).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(repo.load_loan(second.id).await.unwrap().is_none());
    assert_eq!(repo.get_available_copies(book.id).await.unwrap(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_racing_returns_through_separate_engines_release_one_copy(pool: PgPool) {
    let (repo, book, user) = seeded(pool.clone(), 1).await;
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let engine = |repository: PgLendingRepository| {
        Arc::new(LendingEngine::new(
            Arc::new(repository),
            EventBus::default(),
            Arc::new(FixedClock::new(now)),
            LendingPolicy::default(),
        ))
    };
    let daemon = engine(repo);
    let cli = engine(PgLendingRepository::new(Arc::new(pool.clone())));
    let storage = PgLendingRepository::new(Arc::new(pool));

    let loan = daemon.loans.checkout(book.id, user.id, 14).await.unwrap();
    let loan_id = loan.id;

    let first = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.loans.return_book(loan_id, now).await })
    };
    let second = {
        let cli = cli.clone();
        tokio::spawn(async move { cli.loans.return_book(loan_id, now).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in &results {
        if let Err(e) = result {
            assert_eq!(e.kind(), ErrorKind::InvalidState);
        }
    }

    let stored = cli.loans.get(loan_id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Returned);
    assert_eq!(storage.get_available_copies(book.id).await.unwrap(), 1);
}
