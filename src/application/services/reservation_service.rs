//! Reservation queue management: reserve, cancel, promotion and expiry.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::context::LendingContext;
use super::lookup::{require_book, require_reservation, require_user};
use crate::domain::entities::{
    Book, BookId, Reservation, ReservationId, ReservationStatus, UserId,
};
use crate::domain::events::{
    LendingEvent, PatronRef, ReservationCreated, ReservationExpired, ReservationReady,
};
use crate::domain::queue::ReservationQueue;
use crate::domain::repositories::{Changeset, LendingRepository};
use crate::error::{AppError, AppResult};

/// What happened to a copy that became free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDisposition {
    /// The copy is held for this reservation, now ready for pickup.
    HeldFor(ReservationId),
    /// Nobody was waiting; the copy went back on the shelf.
    Released,
}

/// Result of one [`ReservationService::expire_overdue`] sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub expired: Vec<Reservation>,
    pub promoted: Vec<Reservation>,
}

/// Maintains each book's waiting list.
///
/// Every queue mutation happens under the book's lock from the shared
/// [`LendingContext`] and is committed as one changeset; events are
/// published only after the commit succeeded and the lock was released.
pub struct ReservationService<R: LendingRepository> {
    repository: Arc<R>,
    context: LendingContext,
}

impl<R: LendingRepository> ReservationService<R> {
    /// Creates a new reservation service.
    pub fn new(repository: Arc<R>, context: LendingContext) -> Self {
        Self {
            repository,
            context,
        }
    }

    /// Appends `user_id` to the waiting list of `book_id`.
    ///
    /// If a copy is on the shelf and nobody holds one yet, the head of the
    /// list is promoted at once and that copy is held for them.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the book or user does not exist and
    /// [`AppError::DuplicateRequest`] if the user already has an active
    /// reservation or an active loan for this book.
    #[instrument(skip(self))]
    pub async fn reserve(&self, book_id: BookId, user_id: UserId) -> AppResult<Reservation> {
        let guard = self.context.locks.lock(book_id).await;

        let book = require_book(self.repository.as_ref(), book_id).await?;
        let user = require_user(self.repository.as_ref(), user_id).await?;

        let mut queue = self.load_queue(book_id).await?;
        if let Some(existing) = queue.find_for_user(user_id) {
            return Err(AppError::duplicate(
                "User already has an active reservation for this book",
                json!({
                    "book_id": book_id,
                    "user_id": user_id,
                    "reservation_id": existing.id,
                }),
            ));
        }
        if let Some(loan) = self.repository.find_active_loan(book_id, user_id).await? {
            return Err(AppError::duplicate(
                "User already has this book on loan",
                json!({ "book_id": book_id, "user_id": user_id, "loan_id": loan.id }),
            ));
        }

        let now = self.context.clock.now();
        let created = queue.enqueue(user_id, now);
        let mut changes = Changeset::new();
        let mut events: Vec<LendingEvent> =
            vec![ReservationCreated::new(&created, &book, &user).into()];
        changes.guard_book(&book).save_reservation(created.clone());

        let shelf = self.repository.get_available_copies(book_id).await?;
        self.stage_shelf_hold(&mut queue, &book, shelf, &mut changes, &mut events, now)
            .await?;
        debug_assert!(queue.is_consistent());

        self.repository.commit(changes).await?;
        drop(guard);

        let reservation = queue.get(created.id).cloned().unwrap_or(created);
        info!(
            reservation_id = %reservation.id,
            position = reservation.position,
            ready = reservation.is_ready(),
            "Reservation created"
        );
        self.context.bus.publish_all(events).await;

        Ok(reservation)
    }

    /// Cancels an active reservation and closes the gap it leaves.
    ///
    /// If the reservation was holding a copy, the copy passes to the next
    /// patron in line (or back to the shelf if nobody is waiting).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the reservation does not exist and
    /// [`AppError::InvalidState`] if it is no longer active.
    #[instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> AppResult<Reservation> {
        let stored = require_reservation(self.repository.as_ref(), reservation_id).await?;

        let guard = self.context.locks.lock(stored.book_id).await;

        let book = require_book(self.repository.as_ref(), stored.book_id).await?;
        let mut queue = self.load_queue(book.id).await?;
        let was_ready = match queue.get(reservation_id) {
            Some(entry) => entry.is_ready(),
            None => {
                return Err(AppError::invalid_state(
                    "Reservation is no longer active",
                    json!({
                        "reservation_id": reservation_id,
                        "status": stored.status.as_str(),
                    }),
                ));
            }
        };

        let now = self.context.clock.now();
        let mut changes = Changeset::new();
        let mut events = Vec::new();

        let changed = queue.withdraw(reservation_id, ReservationStatus::Cancelled)?;
        let cancelled = changed[0].clone();
        changes.guard_book(&book).save_reservations(changed);

        if was_ready {
            self.stage_copy_freed(&mut queue, &book, &mut changes, &mut events, now)
                .await?;
        }
        debug_assert!(queue.is_consistent());

        self.repository.commit(changes).await?;
        drop(guard);

        info!(reservation_id = %reservation_id, was_ready, "Reservation cancelled");
        self.context.bus.publish_all(events).await;

        Ok(cancelled)
    }

    /// Hands a freed copy of `book_id` to the head of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the book does not exist and
    /// [`AppError::InvalidState`] if releasing the copy would exceed the
    /// book's total copies.
    #[instrument(skip(self))]
    pub async fn on_copy_available(&self, book_id: BookId) -> AppResult<CopyDisposition> {
        let guard = self.context.locks.lock(book_id).await;

        let book = require_book(self.repository.as_ref(), book_id).await?;
        let mut queue = self.load_queue(book_id).await?;
        let now = self.context.clock.now();
        let mut changes = Changeset::new();
        changes.guard_book(&book);
        let mut events = Vec::new();
        let disposition = self
            .stage_copy_freed(&mut queue, &book, &mut changes, &mut events, now)
            .await?;

        self.repository.commit(changes).await?;
        drop(guard);

        self.context.bus.publish_all(events).await;
        Ok(disposition)
    }

    /// Expires ready reservations whose pickup deadline passed before `now`
    /// and promotes the next patron of each affected book.
    ///
    /// Running it again with the same `now` changes nothing: expired
    /// reservations leave the queue and fresh promotions get a deadline
    /// after `now`.
    ///
    /// # Errors
    ///
    /// Stops at the first book whose changes cannot be loaded or committed;
    /// books processed before it stay committed.
    #[instrument(skip(self))]
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> AppResult<ExpirySweep> {
        let candidates = self.repository.find_expired_pickups(now).await?;

        let books: BTreeSet<BookId> = candidates.iter().map(|r| r.book_id).collect();

        let mut sweep = ExpirySweep::default();
        for book_id in books {
            self.expire_for_book(book_id, now, &mut sweep).await?;
        }

        if !sweep.expired.is_empty() {
            info!(
                expired = sweep.expired.len(),
                promoted = sweep.promoted.len(),
                "Expired uncollected reservations"
            );
        }
        Ok(sweep)
    }

    /// Active reservations of a book in queue order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the book does not exist.
    pub async fn queue(&self, book_id: BookId) -> AppResult<Vec<Reservation>> {
        require_book(self.repository.as_ref(), book_id).await?;
        Ok(self.load_queue(book_id).await?.entries().to_vec())
    }

    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the reservation does not exist.
    pub async fn get(&self, reservation_id: ReservationId) -> AppResult<Reservation> {
        require_reservation(self.repository.as_ref(), reservation_id).await
    }

    async fn expire_for_book(
        &self,
        book_id: BookId,
        now: DateTime<Utc>,
        sweep: &mut ExpirySweep,
    ) -> AppResult<()> {
        let guard = self.context.locks.lock(book_id).await;

        let book = require_book(self.repository.as_ref(), book_id).await?;
        // Re-check under the lock: a pickup or cancel may have raced the scan.
        let mut queue = self.load_queue(book_id).await?;
        let overdue = queue.expired_pickups(now);
        if overdue.is_empty() {
            debug!(book_id = %book_id, "Nothing left to expire");
            return Ok(());
        }

        let mut changes = Changeset::new();
        changes.guard_book(&book);
        let mut events = Vec::new();
        let mut expired = Vec::new();
        let mut promoted = Vec::new();

        for reservation_id in overdue {
            let deadline = queue
                .get(reservation_id)
                .and_then(|r| r.pickup_deadline)
                .unwrap_or(now);
            let changed = queue.withdraw(reservation_id, ReservationStatus::Expired)?;
            let closed = changed[0].clone();
            let user = require_user(self.repository.as_ref(), closed.user_id).await?;
            events.push(
                ReservationExpired {
                    reservation_id,
                    patron: PatronRef::from(&user),
                    book: (&book).into(),
                    pickup_deadline: deadline,
                    expired_at: now,
                }
                .into(),
            );
            changes.save_reservations(changed);
            expired.push(closed);

            if let CopyDisposition::HeldFor(next) = self
                .stage_copy_freed(&mut queue, &book, &mut changes, &mut events, now)
                .await?
                && let Some(entry) = queue.get(next)
            {
                promoted.push(entry.clone());
            }
        }
        debug_assert!(queue.is_consistent());

        self.repository.commit(changes).await?;
        drop(guard);

        self.context.bus.publish_all(events).await;
        sweep.expired.extend(expired);
        sweep.promoted.extend(promoted);
        Ok(())
    }

    /// Stages what happens to one freed copy of `book` while its lock is held.
    ///
    /// The waiting head is promoted and the copy held for it; with nobody
    /// to promote the copy is released to the shelf.
    pub(crate) async fn stage_copy_freed(
        &self,
        queue: &mut ReservationQueue,
        book: &Book,
        changes: &mut Changeset,
        events: &mut Vec<LendingEvent>,
        now: DateTime<Utc>,
    ) -> AppResult<CopyDisposition> {
        match self.stage_promotion(queue, book, changes, events, now).await? {
            Some(id) => Ok(CopyDisposition::HeldFor(id)),
            None => {
                changes.adjust_available_copies(book.id, 1);
                Ok(CopyDisposition::Released)
            }
        }
    }

    /// Holds one of `shelf` free copies for the head of the queue when
    /// nobody holds a copy yet.
    pub(crate) async fn stage_shelf_hold(
        &self,
        queue: &mut ReservationQueue,
        book: &Book,
        shelf: u32,
        changes: &mut Changeset,
        events: &mut Vec<LendingEvent>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if shelf == 0 {
            return Ok(());
        }
        if self
            .stage_promotion(queue, book, changes, events, now)
            .await?
            .is_some()
        {
            changes.adjust_available_copies(book.id, -1);
        }
        Ok(())
    }

    async fn stage_promotion(
        &self,
        queue: &mut ReservationQueue,
        book: &Book,
        changes: &mut Changeset,
        events: &mut Vec<LendingEvent>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<ReservationId>> {
        let Some(promoted) = queue.promote_head(now, self.context.policy.pickup_window())? else {
            return Ok(None);
        };

        let user = require_user(self.repository.as_ref(), promoted.user_id).await?;
        info!(
            reservation_id = %promoted.id,
            book_id = %book.id,
            deadline = ?promoted.pickup_deadline,
            "Reservation ready for pickup"
        );
        events.push(ReservationReady::new(&promoted, book, &user, now).into());
        let id = promoted.id;
        changes.save_reservation(promoted);
        Ok(Some(id))
    }

    pub(crate) async fn load_queue(&self, book_id: BookId) -> AppResult<ReservationQueue> {
        let reservations = self.repository.load_reservations_for_book(book_id).await?;
        Ok(ReservationQueue::new(book_id, reservations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::event_bus::EventBus;
    use crate::domain::clock::FixedClock;
    use crate::domain::policy::LendingPolicy;
    use crate::domain::repositories::MockLendingRepository;
    use crate::domain::entities::User;
    use crate::error::ErrorKind;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn create_service(repo: MockLendingRepository) -> ReservationService<MockLendingRepository> {
        let context = LendingContext::new(
            EventBus::default(),
            Arc::new(FixedClock::new(now())),
            LendingPolicy::default(),
        );
        ReservationService::new(Arc::new(repo), context)
    }

    fn book() -> Book {
        Book::new("Dune", "Frank Herbert", Decimal::new(2000, 2), 1)
    }

    #[tokio::test]
    async fn test_reserve_twice_is_duplicate() {
        let book = book();
        let user = User::new("Ada", "ada@example.com");
        let queued = Reservation::new(user.id, book.id, 1, now());

        let mut repo = MockLendingRepository::new();
        let returned_book = book.clone();
        let returned_user = user.clone();
        repo.expect_load_book()
            .returning(move |_| Ok(Some(returned_book.clone())));
        repo.expect_load_user()
            .returning(move |_| Ok(Some(returned_user.clone())));
        repo.expect_load_reservations_for_book()
            .returning(move |_| Ok(vec![queued.clone()]));
        repo.expect_commit().times(0);

        let service = create_service(repo);
        let err = service.reserve(book.id, user.id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DuplicateRequest);
    }

    #[tokio::test]
    async fn test_reserve_with_shelf_copy_promotes_at_once() {
        let book = book();
        let book_id = book.id;
        let version = book.version;
        let user = User::new("Ada", "ada@example.com");

        let mut repo = MockLendingRepository::new();
        let returned_book = book.clone();
        let returned_user = user.clone();
        repo.expect_load_book()
            .returning(move |_| Ok(Some(returned_book.clone())));
        repo.expect_load_user()
            .returning(move |_| Ok(Some(returned_user.clone())));
        repo.expect_load_reservations_for_book()
            .returning(|_| Ok(Vec::new()));
        repo.expect_find_active_loan().returning(|_, _| Ok(None));
        repo.expect_get_available_copies().returning(|_| Ok(1));
        repo.expect_commit()
            .withf(move |changes: &Changeset| {
                changes.reservations().len() == 1
                    && changes.reservations()[0].is_ready()
                    && changes.copy_adjustments().collect::<Vec<_>>() == vec![(book_id, -1)]
                    && changes.book_guards() == [(book_id, version)]
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = create_service(repo);
        let reservation = service.reserve(book_id, user.id).await.unwrap();

        assert_eq!(reservation.status, ReservationStatus::ReadyForPickup);
        assert_eq!(reservation.pickup_deadline, Some(now() + Duration::days(3)));
    }

    #[tokio::test]
    async fn test_cancel_of_closed_reservation_is_invalid() {
        let book = book();
        let mut closed = Reservation::new(UserId::new(), book.id, 1, now());
        closed.close(ReservationStatus::Fulfilled).unwrap();
        let closed_id = closed.id;

        let mut repo = MockLendingRepository::new();
        repo.expect_load_reservation()
            .returning(move |_| Ok(Some(closed.clone())));
        let returned_book = book.clone();
        repo.expect_load_book()
            .returning(move |_| Ok(Some(returned_book.clone())));
        repo.expect_load_reservations_for_book()
            .returning(|_| Ok(Vec::new()));
        repo.expect_commit().times(0);

        let service = create_service(repo);
        let err = service.cancel(closed_id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_freed_copy_is_held_for_queue_head() {
        let mut book = book();
        book.available_copies = 0;
        let head = Reservation::new(UserId::new(), book.id, 1, now());
        let head_id = head.id;
        let patron = User {
            id: head.user_id,
            ..User::new("Ada", "ada@example.com")
        };

        let mut repo = MockLendingRepository::new();
        let returned_book = book.clone();
        repo.expect_load_book()
            .returning(move |_| Ok(Some(returned_book.clone())));
        repo.expect_load_user()
            .returning(move |_| Ok(Some(patron.clone())));
        repo.expect_load_reservations_for_book()
            .returning(move |_| Ok(vec![head.clone()]));
        repo.expect_commit()
            .withf(move |changes: &Changeset| {
                let saved = changes.reservations();
                changes.copy_adjustments().next().is_none()
                    && saved.len() == 1
                    && saved[0].id == head_id
                    && saved[0].is_ready()
                    && saved[0].pickup_deadline == Some(now() + Duration::days(3))
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = create_service(repo);
        let disposition = service.on_copy_available(book.id).await.unwrap();

        assert_eq!(disposition, CopyDisposition::HeldFor(head_id));
    }

    #[tokio::test]
    async fn test_freed_copy_without_queue_goes_to_shelf() {
        let mut book = book();
        book.available_copies = 0;
        let book_id = book.id;

        let mut repo = MockLendingRepository::new();
        repo.expect_load_book()
            .returning(move |_| Ok(Some(book.clone())));
        repo.expect_load_reservations_for_book()
            .returning(|_| Ok(Vec::new()));
        repo.expect_commit()
            .withf(move |changes: &Changeset| {
                changes.copy_adjustments().collect::<Vec<_>>() == vec![(book_id, 1)]
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = create_service(repo);
        let disposition = service.on_copy_available(book_id).await.unwrap();

        assert_eq!(disposition, CopyDisposition::Released);
    }

    #[tokio::test]
    async fn test_expire_with_nothing_due_commits_nothing() {
        let mut repo = MockLendingRepository::new();
        repo.expect_find_expired_pickups()
            .returning(|_| Ok(Vec::new()));
        repo.expect_commit().times(0);

        let service = create_service(repo);
        let sweep = service.expire_overdue(now()).await.unwrap();

        assert_eq!(sweep, ExpirySweep::default());
    }
}
