//! Process-local implementation of the lending repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::entities::{
    Book, BookId, Fine, FineKind, Loan, LoanId, LoanStatus, Reservation, ReservationId, User,
    UserId,
};
use crate::domain::repositories::{Changeset, LendingRepository};
use crate::error::AppError;

#[derive(Default)]
struct Store {
    books: HashMap<BookId, Book>,
    users: HashMap<UserId, User>,
    loans: HashMap<LoanId, Loan>,
    reservations: HashMap<ReservationId, Reservation>,
    fines: Vec<Fine>,
}

/// Repository keeping everything in memory behind one `RwLock`.
///
/// A commit validates the whole changeset and applies it under a single
/// write guard, so readers never observe a partially applied transition.
/// Used by tests, demos and embedders that persist elsewhere.
#[derive(Default)]
pub struct InMemoryLendingRepository {
    store: RwLock<Store>,
}

impl InMemoryLendingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog entry.
    pub async fn add_book(&self, book: Book) {
        self.store.write().await.books.insert(book.id, book);
    }

    pub async fn add_user(&self, user: User) {
        self.store.write().await.users.insert(user.id, user);
    }

    /// Every reservation ever made for a book, including closed ones,
    /// ordered by reservation time.
    pub async fn reservation_history(&self, book_id: BookId) -> Vec<Reservation> {
        let store = self.store.read().await;
        let mut history: Vec<Reservation> = store
            .reservations
            .values()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect();
        history.sort_by_key(|r| r.reserved_at);
        history
    }

    pub async fn all_fines(&self) -> Vec<Fine> {
        self.store.read().await.fines.clone()
    }

    pub async fn all_loans(&self) -> Vec<Loan> {
        self.store.read().await.loans.values().cloned().collect()
    }
}

#[async_trait]
impl LendingRepository for InMemoryLendingRepository {
    async fn load_loan(&self, id: LoanId) -> Result<Option<Loan>, AppError> {
        Ok(self.store.read().await.loans.get(&id).cloned())
    }

    async fn find_active_loan(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Loan>, AppError> {
        Ok(self
            .store
            .read()
            .await
            .loans
            .values()
            .find(|l| {
                l.book_id == book_id && l.user_id == user_id && l.status == LoanStatus::Active
            })
            .cloned())
    }

    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>, AppError> {
        let store = self.store.read().await;
        let mut overdue: Vec<Loan> = store
            .loans
            .values()
            .filter(|l| l.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|l| l.due_date);
        Ok(overdue)
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, AppError> {
        Ok(self.store.read().await.reservations.get(&id).cloned())
    }

    async fn load_reservations_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<Reservation>, AppError> {
        let store = self.store.read().await;
        let mut active: Vec<Reservation> = store
            .reservations
            .values()
            .filter(|r| r.book_id == book_id && r.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.position);
        Ok(active)
    }

    async fn find_expired_pickups(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, AppError> {
        Ok(self
            .store
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.is_pickup_expired(now))
            .cloned()
            .collect())
    }

    async fn get_available_copies(&self, book_id: BookId) -> Result<u32, AppError> {
        self.store
            .read()
            .await
            .books
            .get(&book_id)
            .map(|b| b.available_copies)
            .ok_or_else(|| AppError::not_found("Book not found", json!({ "book_id": book_id })))
    }

    async fn load_book(&self, id: BookId) -> Result<Option<Book>, AppError> {
        Ok(self.store.read().await.books.get(&id).cloned())
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, AppError> {
        Ok(self.store.read().await.users.get(&id).cloned())
    }

    async fn find_fines_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fine>, AppError> {
        Ok(self
            .store
            .read()
            .await
            .fines
            .iter()
            .filter(|f| f.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn find_outstanding_fine(
        &self,
        loan_id: LoanId,
        kind: FineKind,
    ) -> Result<Option<Fine>, AppError> {
        Ok(self
            .store
            .read()
            .await
            .fines
            .iter()
            .find(|f| f.loan_id == loan_id && f.kind == kind && f.is_outstanding())
            .cloned())
    }

    async fn commit(&self, changeset: Changeset) -> Result<(), AppError> {
        let mut store = self.store.write().await;

        // Validate everything before touching the store.
        for &(book_id, version) in changeset.book_guards() {
            let book = store.books.get(&book_id).ok_or_else(|| {
                AppError::not_found("Book not found", json!({ "book_id": book_id }))
            })?;
            if book.version != version {
                return Err(AppError::invalid_state(
                    "Book was changed by a concurrent operation",
                    json!({
                        "book_id": book_id,
                        "expected_version": version,
                        "version": book.version,
                    }),
                ));
            }
        }
        let mut counters = Vec::new();
        for (book_id, delta) in changeset.copy_adjustments() {
            let book = store.books.get(&book_id).ok_or_else(|| {
                AppError::not_found("Book not found", json!({ "book_id": book_id }))
            })?;
            let next = i64::from(book.available_copies) + i64::from(delta);
            if next < 0 {
                return Err(AppError::not_available(
                    "No copy of this book is available",
                    json!({ "book_id": book_id }),
                ));
            }
            if next > i64::from(book.total_copies) {
                return Err(AppError::invalid_state(
                    "Available copies would exceed total copies",
                    json!({ "book_id": book_id, "total_copies": book.total_copies }),
                ));
            }
            counters.push((book_id, next as u32));
        }
        for fine in changeset.fines() {
            let duplicate = store.fines.iter().any(|f| {
                f.id != fine.id
                    && f.loan_id == fine.loan_id
                    && f.kind == fine.kind
                    && f.is_outstanding()
                    && fine.is_outstanding()
            });
            if duplicate {
                return Err(AppError::duplicate(
                    "Loan already has an outstanding fine of this kind",
                    json!({ "loan_id": fine.loan_id, "kind": fine.kind.as_str() }),
                ));
            }
        }

        for &(book_id, _) in changeset.book_guards() {
            if let Some(book) = store.books.get_mut(&book_id) {
                book.version += 1;
            }
        }
        for (book_id, available) in counters {
            if let Some(book) = store.books.get_mut(&book_id) {
                book.available_copies = available;
            }
        }
        for loan in changeset.loans() {
            store.loans.insert(loan.id, loan.clone());
        }
        for reservation in changeset.reservations() {
            store
                .reservations
                .insert(reservation.id, reservation.clone());
        }
        for fine in changeset.fines() {
            match store.fines.iter_mut().find(|f| f.id == fine.id) {
                Some(existing) => *existing = fine.clone(),
                None => store.fines.push(fine.clone()),
            }
        }

        Ok(())
    }
}
