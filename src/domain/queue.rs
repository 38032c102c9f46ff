//! In-memory view of one book's reservation queue.
//!
//! [`ReservationQueue`] is loaded from the active reservations of a single
//! book, mutated under that book's lock, and the reservations it returns are
//! what gets staged for persistence. It keeps two invariants:
//!
//! - active positions are exactly `1..=len`
//! - at most one entry is ready-for-pickup

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::domain::entities::{BookId, Reservation, ReservationId, ReservationStatus, UserId};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ReservationQueue {
    book_id: BookId,
    entries: Vec<Reservation>,
}

impl ReservationQueue {
    /// Builds the queue from stored reservations.
    ///
    /// Inactive and foreign-book reservations are ignored; the rest are
    /// ordered by position.
    pub fn new(book_id: BookId, reservations: Vec<Reservation>) -> Self {
        let mut entries: Vec<Reservation> = reservations
            .into_iter()
            .filter(|r| r.book_id == book_id && r.is_active())
            .collect();
        entries.sort_by_key(|r| r.position);

        Self { book_id, entries }
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Reservation] {
        &self.entries
    }

    pub fn head(&self) -> Option<&Reservation> {
        self.entries.first()
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn find_for_user(&self, user_id: UserId) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.user_id == user_id)
    }

    /// The entry currently holding a copy, if any.
    pub fn ready(&self) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.is_ready())
    }

    /// Position the next reservation would receive.
    pub fn next_position(&self) -> u32 {
        self.entries.iter().map(|r| r.position).max().unwrap_or(0) + 1
    }

    /// Appends a waiting reservation for `user_id` and returns it.
    pub fn enqueue(&mut self, user_id: UserId, reserved_at: DateTime<Utc>) -> Reservation {
        let reservation =
            Reservation::new(user_id, self.book_id, self.next_position(), reserved_at);
        self.entries.push(reservation.clone());
        reservation
    }

    /// Removes an entry with a terminal `outcome` and closes the gap.
    ///
    /// Returns every reservation whose stored state changed: the withdrawn
    /// one first, then each later entry whose position moved down, in
    /// ascending position order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the reservation is not in this
    /// queue, or [`AppError::InvalidState`] if `outcome` is not terminal.
    pub fn withdraw(
        &mut self,
        id: ReservationId,
        outcome: ReservationStatus,
    ) -> AppResult<Vec<Reservation>> {
        let index = self.entries.iter().position(|r| r.id == id).ok_or_else(|| {
            AppError::not_found(
                "Reservation is not queued for this book",
                json!({ "reservation_id": id, "book_id": self.book_id }),
            )
        })?;

        let mut withdrawn = self.entries[index].clone();
        withdrawn.close(outcome)?;
        self.entries.remove(index);

        let mut changed = vec![withdrawn];
        for entry in self.entries.iter_mut().skip(index) {
            entry.position -= 1;
            changed.push(entry.clone());
        }

        Ok(changed)
    }

    /// Promotes the head to ready-for-pickup with a deadline `window` from `now`.
    ///
    /// Returns `None` when the queue is empty or a copy is already held for
    /// someone; only a waiting head is ever promoted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] if the deadline cannot be
    /// represented; the head is left untouched.
    pub fn promote_head(
        &mut self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<Option<Reservation>> {
        if self.ready().is_some() {
            return Ok(None);
        }
        let Some(head) = self.entries.first_mut() else {
            return Ok(None);
        };

        head.promote(now, window)?;
        Ok(Some(head.clone()))
    }

    /// Ready entries whose pickup deadline passed before `now`.
    pub fn expired_pickups(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        self.entries
            .iter()
            .filter(|r| r.is_pickup_expired(now))
            .map(|r| r.id)
            .collect()
    }

    /// Checks both queue invariants.
    pub fn is_consistent(&self) -> bool {
        let contiguous = self
            .entries
            .iter()
            .enumerate()
            .all(|(i, r)| r.position as usize == i + 1);
        let ready = self.entries.iter().filter(|r| r.is_ready()).count();
        contiguous && ready <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn queue_of(n: usize) -> (ReservationQueue, Vec<UserId>) {
        let mut queue = ReservationQueue::new(BookId::new(), vec![]);
        let users: Vec<UserId> = (0..n).map(|_| UserId::new()).collect();
        for user in &users {
            queue.enqueue(*user, now());
        }
        (queue, users)
    }

    #[test]
    fn test_enqueue_assigns_contiguous_positions() {
        let (queue, users) = queue_of(3);

        let positions: Vec<u32> = queue.entries().iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(queue.find_for_user(users[2]).unwrap().position, 3);
        assert!(queue.is_consistent());
    }

    #[test]
    fn test_empty_queue_starts_at_one() {
        let queue = ReservationQueue::new(BookId::new(), vec![]);
        assert_eq!(queue.next_position(), 1);
        assert!(queue.head().is_none());
    }

    #[test]
    fn test_new_ignores_inactive_and_sorts() {
        let book_id = BookId::new();
        let mut cancelled = Reservation::new(UserId::new(), book_id, 1, now());
        cancelled.close(ReservationStatus::Cancelled).unwrap();
        let second = Reservation::new(UserId::new(), book_id, 2, now());
        let first = Reservation::new(UserId::new(), book_id, 1, now());
        let other_book = Reservation::new(UserId::new(), BookId::new(), 3, now());

        let queue = ReservationQueue::new(
            book_id,
            vec![second.clone(), cancelled, other_book, first.clone()],
        );

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head().unwrap().id, first.id);
        assert_eq!(queue.entries()[1].id, second.id);
    }

    #[test]
    fn test_withdraw_shifts_later_entries() {
        let (mut queue, _) = queue_of(4);
        let second = queue.entries()[1].id;

        let changed = queue.withdraw(second, ReservationStatus::Cancelled).unwrap();

        assert_eq!(changed.len(), 3);
        assert_eq!(changed[0].id, second);
        assert_eq!(changed[0].status, ReservationStatus::Cancelled);
        assert_eq!(changed[1].position, 2);
        assert_eq!(changed[2].position, 3);
        assert_eq!(queue.len(), 3);
        assert!(queue.is_consistent());
    }

    #[test]
    fn test_withdraw_last_changes_only_itself() {
        let (mut queue, _) = queue_of(2);
        let last = queue.entries()[1].id;

        let changed = queue.withdraw(last, ReservationStatus::Fulfilled).unwrap();
        assert_eq!(changed.len(), 1);
        assert!(queue.is_consistent());
    }

    #[test]
    fn test_withdraw_unknown_is_not_found() {
        let (mut queue, _) = queue_of(1);
        let err = queue
            .withdraw(ReservationId::new(), ReservationStatus::Cancelled)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_withdraw_with_active_outcome_leaves_queue_untouched() {
        let (mut queue, _) = queue_of(2);
        let head = queue.entries()[0].id;

        let err = queue.withdraw(head, ReservationStatus::Waiting).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_promote_head_once() {
        let (mut queue, users) = queue_of(2);

        let promoted = queue.promote_head(now(), Duration::days(3)).unwrap().unwrap();
        assert_eq!(promoted.user_id, users[0]);
        assert_eq!(promoted.pickup_deadline, Some(now() + Duration::days(3)));

        assert!(queue.promote_head(now(), Duration::days(3)).unwrap().is_none());
        assert!(queue.is_consistent());
    }

    #[test]
    fn test_promote_empty_queue() {
        let mut queue = ReservationQueue::new(BookId::new(), vec![]);
        assert!(queue.promote_head(now(), Duration::days(3)).unwrap().is_none());
    }

    #[test]
    fn test_promote_head_rejects_unrepresentable_deadline() {
        let (mut queue, _) = queue_of(1);

        let err = queue
            .promote_head(now(), Duration::days(i64::from(u32::MAX)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(queue.ready().is_none());
        assert_eq!(queue.entries()[0].status, ReservationStatus::Waiting);
    }

    #[test]
    fn test_expired_pickups() {
        let (mut queue, _) = queue_of(2);
        let promoted = queue.promote_head(now(), Duration::days(3)).unwrap().unwrap();

        assert!(queue.expired_pickups(now() + Duration::days(3)).is_empty());
        assert_eq!(
            queue.expired_pickups(now() + Duration::days(4)),
            vec![promoted.id]
        );
    }

    #[test]
    fn test_positions_stay_contiguous_through_churn() {
        let (mut queue, _) = queue_of(6);

        for pick in [3usize, 0, 2] {
            let id = queue.entries()[pick].id;
            queue.withdraw(id, ReservationStatus::Cancelled).unwrap();
            assert!(queue.is_consistent());
        }
        queue.enqueue(UserId::new(), now());
        assert!(queue.is_consistent());
        assert_eq!(queue.next_position(), 5);
    }
}
