//! Library patron.

use super::ids::UserId;

/// A patron who can borrow and reserve books.
///
/// Only the display fields needed by notifications are modelled here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into(),
        }
    }
}
