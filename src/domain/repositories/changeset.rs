//! Staged writes applied atomically by [`super::LendingRepository::commit`].

use crate::domain::entities::{Book, BookId, Fine, Loan, Reservation};

/// A batch of writes produced by one state transition.
///
/// Services stage every consequence of a transition here (loan update,
/// fine, queue renumbering, copy counter delta) and hand the whole batch to
/// the repository in a single `commit`, which applies all of it or none.
///
/// A transition also guards the book it was decided on: the commit only
/// goes through while the stored book is still at the version that was
/// read, so writers in other processes cannot interleave with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    loans: Vec<Loan>,
    reservations: Vec<Reservation>,
    fines: Vec<Fine>,
    copy_adjustments: Vec<(BookId, i32)>,
    book_guards: Vec<(BookId, i64)>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the commit conditional on `book` still being at the version it
    /// was loaded with. The commit bumps that version.
    pub fn guard_book(&mut self, book: &Book) -> &mut Self {
        self.book_guards.retain(|(id, _)| *id != book.id);
        self.book_guards.push((book.id, book.version));
        self
    }

    /// Inserts or replaces a loan.
    pub fn save_loan(&mut self, loan: Loan) -> &mut Self {
        self.loans.push(loan);
        self
    }

    /// Inserts or replaces a reservation.
    ///
    /// Later saves of the same reservation win.
    pub fn save_reservation(&mut self, reservation: Reservation) -> &mut Self {
        self.reservations.retain(|r| r.id != reservation.id);
        self.reservations.push(reservation);
        self
    }

    pub fn save_reservations(
        &mut self,
        reservations: impl IntoIterator<Item = Reservation>,
    ) -> &mut Self {
        for reservation in reservations {
            self.save_reservation(reservation);
        }
        self
    }

    pub fn save_fine(&mut self, fine: Fine) -> &mut Self {
        self.fines.push(fine);
        self
    }

    /// Moves the shelf counter of `book_id` by `delta`.
    pub fn adjust_available_copies(&mut self, book_id: BookId, delta: i32) -> &mut Self {
        match self.copy_adjustments.iter_mut().find(|(id, _)| *id == book_id) {
            Some((_, total)) => *total += delta,
            None => self.copy_adjustments.push((book_id, delta)),
        }
        self
    }

    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn fines(&self) -> &[Fine] {
        &self.fines
    }

    /// Reservations in the order a store with a unique active-position
    /// index can apply them: entries leaving the queue first, then active
    /// entries by ascending position.
    pub fn reservations(&self) -> Vec<&Reservation> {
        let mut ordered: Vec<&Reservation> = self.reservations.iter().collect();
        ordered.sort_by_key(|r| (r.is_active(), r.position));
        ordered
    }

    /// Books the commit is conditional on, with their expected versions.
    pub fn book_guards(&self) -> &[(BookId, i64)] {
        &self.book_guards
    }

    /// Net copy adjustments, skipping books whose deltas cancel out.
    pub fn copy_adjustments(&self) -> impl Iterator<Item = (BookId, i32)> + '_ {
        self.copy_adjustments
            .iter()
            .copied()
            .filter(|(_, delta)| *delta != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
            && self.reservations.is_empty()
            && self.fines.is_empty()
            && self.copy_adjustments().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ReservationStatus, UserId};
    use chrono::{Duration, Utc};

    #[test]
    fn test_adjustments_are_netted_per_book() {
        let book = BookId::new();
        let other = BookId::new();
        let mut changes = Changeset::new();
        changes
            .adjust_available_copies(book, -1)
            .adjust_available_copies(other, 1)
            .adjust_available_copies(book, 1);

        let adjustments: Vec<_> = changes.copy_adjustments().collect();
        assert_eq!(adjustments, vec![(other, 1)]);
    }

    #[test]
    fn test_empty_changeset() {
        let mut changes = Changeset::new();
        assert!(changes.is_empty());

        let book = BookId::new();
        changes
            .adjust_available_copies(book, 1)
            .adjust_available_copies(book, -1);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_reservations_ordered_for_unique_positions() {
        let book = BookId::new();
        let now = Utc::now();
        let mut ready = Reservation::new(UserId::new(), book, 1, now);
        ready.promote(now, Duration::days(1)).unwrap();
        let mut cancelled = Reservation::new(UserId::new(), book, 1, now);
        cancelled.close(ReservationStatus::Cancelled).unwrap();
        let waiting = Reservation::new(UserId::new(), book, 2, now);

        let mut changes = Changeset::new();
        changes.save_reservations([waiting.clone(), ready.clone(), cancelled.clone()]);

        let ids: Vec<_> = changes.reservations().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![cancelled.id, ready.id, waiting.id]);
    }

    #[test]
    fn test_book_guard_keeps_latest_version() {
        let mut book = Book::new("Dune", "Frank Herbert", rust_decimal::Decimal::ONE, 1);
        let mut changes = Changeset::new();
        changes.guard_book(&book);
        book.version = 4;
        changes.guard_book(&book);

        assert_eq!(changes.book_guards(), &[(book.id, 4)]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_resaving_reservation_replaces_it() {
        let mut r = Reservation::new(UserId::new(), BookId::new(), 3, Utc::now());
        let mut changes = Changeset::new();
        changes.save_reservation(r.clone());
        r.position = 2;
        changes.save_reservation(r.clone());

        assert_eq!(changes.reservations().len(), 1);
        assert_eq!(changes.reservations()[0].position, 2);
    }
}
