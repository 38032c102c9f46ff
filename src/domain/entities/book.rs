//! Catalog entry for a lendable title.

use rust_decimal::Decimal;

use super::ids::BookId;

/// A title in the catalog together with its copy counters.
///
/// `available_copies` counts copies on the shelf that anyone may check out.
/// Copies held for a ready-for-pickup reservation are not included.
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    /// Charged (plus the processing fee) when a loaned copy is lost.
    pub replacement_cost: Decimal,
    pub total_copies: u32,
    pub available_copies: u32,
    /// Bumped by every committed transition on this book. A changeset
    /// guarded with an older version is rejected.
    pub version: i64,
}

impl Book {
    /// Creates a catalog entry with every copy on the shelf.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        replacement_cost: Decimal,
        total_copies: u32,
    ) -> Self {
        Self {
            id: BookId::new(),
            title: title.into(),
            author: author.into(),
            replacement_cost,
            total_copies,
            available_copies: total_copies,
            version: 0,
        }
    }
}
