//! PostgreSQL implementation of the lending repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{
    Book, BookId, Fine, FineKind, FineStatus, Loan, LoanId, LoanStatus, Reservation,
    ReservationId, ReservationStatus, User, UserId,
};
use crate::domain::repositories::{Changeset, LendingRepository};
use crate::error::AppError;

const LOAN_COLUMNS: &str =
    "id, user_id, book_id, checkout_date, due_date, return_date, status, accrued_fine";
const RESERVATION_COLUMNS: &str =
    "id, user_id, book_id, reserved_at, position, status, pickup_deadline";
const FINE_COLUMNS: &str = "id, loan_id, kind, amount, status, computed_at";

#[derive(FromRow)]
struct BookRow {
    id: Uuid,
    title: String,
    author: String,
    replacement_cost: Decimal,
    total_copies: i32,
    available_copies: i32,
    version: i64,
}

impl TryFrom<BookRow> for Book {
    type Error = AppError;

    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        Ok(Book {
            id: row.id.into(),
            title: row.title,
            author: row.author,
            replacement_cost: row.replacement_cost,
            total_copies: to_count(row.total_copies, "total_copies")?,
            available_copies: to_count(row.available_copies, "available_copies")?,
            version: row.version,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            name: row.name,
            email: row.email,
        }
    }
}

#[derive(FromRow)]
struct LoanRow {
    id: Uuid,
    user_id: Uuid,
    book_id: Uuid,
    checkout_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    return_date: Option<DateTime<Utc>>,
    status: String,
    accrued_fine: Option<Decimal>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = AppError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: row.id.into(),
            user_id: row.user_id.into(),
            book_id: row.book_id.into(),
            checkout_date: row.checkout_date,
            due_date: row.due_date,
            return_date: row.return_date,
            status: LoanStatus::try_from(row.status.as_str())?,
            accrued_fine: row.accrued_fine,
        })
    }
}

#[derive(FromRow)]
struct ReservationRow {
    id: Uuid,
    user_id: Uuid,
    book_id: Uuid,
    reserved_at: DateTime<Utc>,
    position: i32,
    status: String,
    pickup_deadline: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id.into(),
            user_id: row.user_id.into(),
            book_id: row.book_id.into(),
            reserved_at: row.reserved_at,
            position: to_count(row.position, "position")?,
            status: ReservationStatus::try_from(row.status.as_str())?,
            pickup_deadline: row.pickup_deadline,
        })
    }
}

#[derive(FromRow)]
struct FineRow {
    id: Uuid,
    loan_id: Uuid,
    kind: String,
    amount: Decimal,
    status: String,
    computed_at: DateTime<Utc>,
}

impl TryFrom<FineRow> for Fine {
    type Error = AppError;

    fn try_from(row: FineRow) -> Result<Self, Self::Error> {
        Ok(Fine {
            id: row.id.into(),
            loan_id: row.loan_id.into(),
            kind: FineKind::try_from(row.kind.as_str())?,
            amount: row.amount,
            status: FineStatus::try_from(row.status.as_str())?,
            computed_at: row.computed_at,
        })
    }
}

fn to_count(value: i32, column: &str) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| {
        AppError::internal(
            "Negative counter stored in database",
            json!({ "column": column, "value": value }),
        )
    })
}

fn to_column(value: u32, column: &str) -> Result<i32, AppError> {
    i32::try_from(value).map_err(|_| {
        AppError::invalid_input(
            "Counter does not fit the database column",
            json!({ "column": column, "value": value }),
        )
    })
}

fn collect<Row, T>(rows: Vec<Row>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<Row, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// PostgreSQL repository for the lending state.
///
/// Queries are plain runtime statements mapped through `FromRow` row types.
/// [`LendingRepository::commit`] runs in one transaction that first claims
/// each guarded book row by its version, so transitions on the same book
/// from different processes serialize and the later one fails. The partial
/// unique indexes of the schema back the queue and loan invariants.
pub struct PgLendingRepository {
    pool: Arc<PgPool>,
}

impl PgLendingRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the counters violate the schema
    /// and [`AppError::Internal`] on other database errors.
    pub async fn add_book(&self, book: &Book) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO books
                (id, title, author, replacement_cost, total_copies, available_copies, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(book.id.as_uuid())
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.replacement_cost)
        .bind(to_column(book.total_copies, "total_copies")?)
        .bind(to_column(book.available_copies, "available_copies")?)
        .bind(book.version)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Registers a patron.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DuplicateRequest`] if the email is taken.
    pub async fn add_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
            .bind(user.id.as_uuid())
            .bind(&user.name)
            .bind(&user.email)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Bumps the book's version if it still matches `version`. The row lock
    /// taken here holds until the transaction ends.
    async fn claim_book(
        tx: &mut Transaction<'_, Postgres>,
        book_id: BookId,
        version: i64,
    ) -> Result<(), AppError> {
        let updated =
            sqlx::query("UPDATE books SET version = version + 1 WHERE id = $1 AND version = $2")
                .bind(book_id.as_uuid())
                .bind(version)
                .execute(&mut **tx)
                .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM books WHERE id = $1")
            .bind(book_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;

        match current {
            None => Err(AppError::not_found(
                "Book not found",
                json!({ "book_id": book_id }),
            )),
            Some(current) => Err(AppError::invalid_state(
                "Book was changed by a concurrent operation",
                json!({
                    "book_id": book_id,
                    "expected_version": version,
                    "version": current,
                }),
            )),
        }
    }

    async fn upsert_loan(tx: &mut Transaction<'_, Postgres>, loan: &Loan) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, user_id, book_id, checkout_date, due_date, return_date, status, accrued_fine)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                due_date = EXCLUDED.due_date,
                return_date = EXCLUDED.return_date,
                status = EXCLUDED.status,
                accrued_fine = EXCLUDED.accrued_fine
            "#,
        )
        .bind(loan.id.as_uuid())
        .bind(loan.user_id.as_uuid())
        .bind(loan.book_id.as_uuid())
        .bind(loan.checkout_date)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status.as_str())
        .bind(loan.accrued_fine)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_reservation(
        tx: &mut Transaction<'_, Postgres>,
        reservation: &Reservation,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, user_id, book_id, reserved_at, position, status, pickup_deadline)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                position = EXCLUDED.position,
                status = EXCLUDED.status,
                pickup_deadline = EXCLUDED.pickup_deadline
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.user_id.as_uuid())
        .bind(reservation.book_id.as_uuid())
        .bind(reservation.reserved_at)
        .bind(to_column(reservation.position, "position")?)
        .bind(reservation.status.as_str())
        .bind(reservation.pickup_deadline)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_fine(tx: &mut Transaction<'_, Postgres>, fine: &Fine) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO fines (id, loan_id, kind, amount, status, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                amount = EXCLUDED.amount,
                status = EXCLUDED.status
            "#,
        )
        .bind(fine.id.as_uuid())
        .bind(fine.loan_id.as_uuid())
        .bind(fine.kind.as_str())
        .bind(fine.amount)
        .bind(fine.status.as_str())
        .bind(fine.computed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn adjust_copies(
        tx: &mut Transaction<'_, Postgres>,
        book_id: BookId,
        delta: i32,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies + $2
            WHERE id = $1 AND available_copies + $2 BETWEEN 0 AND total_copies
            "#,
        )
        .bind(book_id.as_uuid())
        .bind(delta)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        // Explain why the guarded update matched nothing.
        let counters: Option<(i32, i32)> =
            sqlx::query_as("SELECT available_copies, total_copies FROM books WHERE id = $1")
                .bind(book_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;

        match counters {
            None => Err(AppError::not_found(
                "Book not found",
                json!({ "book_id": book_id }),
            )),
            Some((available, _)) if available + delta < 0 => Err(AppError::not_available(
                "No copy of this book is available",
                json!({ "book_id": book_id }),
            )),
            Some((_, total)) => Err(AppError::invalid_state(
                "Available copies would exceed total copies",
                json!({ "book_id": book_id, "total_copies": total }),
            )),
        }
    }
}

#[async_trait]
impl LendingRepository for PgLendingRepository {
    async fn load_loan(&self, id: LoanId) -> Result<Option<Loan>, AppError> {
        let row: Option<LoanRow> =
            sqlx::query_as(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(self.pool.as_ref())
                .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn find_active_loan(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Loan>, AppError> {
        let row: Option<LoanRow> = sqlx::query_as(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE book_id = $1 AND user_id = $2 AND status = 'active'"
        ))
        .bind(book_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>, AppError> {
        let rows: Vec<LoanRow> = sqlx::query_as(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE status = 'active' AND due_date < $1 ORDER BY due_date"
        ))
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        collect(rows)
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, AppError> {
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Reservation::try_from).transpose()
    }

    async fn load_reservations_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<Reservation>, AppError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE book_id = $1 AND status IN ('waiting', 'ready_for_pickup')
            ORDER BY position
            "#
        ))
        .bind(book_id.as_uuid())
        .fetch_all(self.pool.as_ref())
        .await?;

        collect(rows)
    }

    async fn find_expired_pickups(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, AppError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE status = 'ready_for_pickup' AND pickup_deadline < $1
            ORDER BY pickup_deadline
            "#
        ))
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        collect(rows)
    }

    async fn get_available_copies(&self, book_id: BookId) -> Result<u32, AppError> {
        let available: Option<i32> =
            sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
                .bind(book_id.as_uuid())
                .fetch_optional(self.pool.as_ref())
                .await?;

        match available {
            Some(count) => to_count(count, "available_copies"),
            None => Err(AppError::not_found(
                "Book not found",
                json!({ "book_id": book_id }),
            )),
        }
    }

    async fn load_book(&self, id: BookId) -> Result<Option<Book>, AppError> {
        let row: Option<BookRow> = sqlx::query_as(
            r#"
            SELECT id, title, author, replacement_cost, total_copies, available_copies, version
            FROM books WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Book::try_from).transpose()
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, name, email FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(User::from))
    }

    async fn find_fines_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fine>, AppError> {
        let rows: Vec<FineRow> = sqlx::query_as(&format!(
            "SELECT {FINE_COLUMNS} FROM fines WHERE loan_id = $1 ORDER BY computed_at"
        ))
        .bind(loan_id.as_uuid())
        .fetch_all(self.pool.as_ref())
        .await?;

        collect(rows)
    }

    async fn find_outstanding_fine(
        &self,
        loan_id: LoanId,
        kind: FineKind,
    ) -> Result<Option<Fine>, AppError> {
        let row: Option<FineRow> = sqlx::query_as(&format!(
            "SELECT {FINE_COLUMNS} FROM fines WHERE loan_id = $1 AND kind = $2 AND status = 'outstanding'"
        ))
        .bind(loan_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Fine::try_from).transpose()
    }

    async fn commit(&self, changeset: Changeset) -> Result<(), AppError> {
        if changeset.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for &(book_id, version) in changeset.book_guards() {
            Self::claim_book(&mut tx, book_id, version).await?;
        }
        for (book_id, delta) in changeset.copy_adjustments() {
            Self::adjust_copies(&mut tx, book_id, delta).await?;
        }
        for loan in changeset.loans() {
            Self::upsert_loan(&mut tx, loan).await?;
        }
        // Inactive rows first, then ascending positions, so the partial
        // unique indexes hold after every statement.
        for reservation in changeset.reservations() {
            Self::upsert_reservation(&mut tx, reservation).await?;
        }
        for fine in changeset.fines() {
            Self::upsert_fine(&mut tx, fine).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
