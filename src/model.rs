use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub publication: String,
    pub borrowed: bool,
    pub borrower: String,
    pub borrowed_at: Option<DateTime<Utc>>,
}

impl Book {
    /// A book that is on the shelf.
    pub fn new(id: i64, title: &str, author: &str, publication: &str) -> Self {
        Book {
            id,
            title: title.to_owned(),
            author: author.to_owned(),
            publication: publication.to_owned(),
            borrowed: false,
            borrower: String::new(),
            borrowed_at: None,
        }
    }

    pub fn borrow_state(&self) -> BorrowState {
        if self.borrowed {
            BorrowState::Borrowed {
                borrower: self.borrower.clone(),
                at: self.borrowed_at.unwrap_or_default(),
            }
        } else {
            BorrowState::Available
        }
    }

    /// Case-insensitive substring match on title or author. `needle` must
    /// already be lowercased.
    pub fn matches_keyword(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.author.to_lowercase().contains(needle)
    }

    /// Whether the (borrowed, borrower, borrowed_at) triple is coherent.
    pub fn is_coherent(&self) -> bool {
        if self.borrowed {
            !self.borrower.is_empty() && self.borrowed_at.is_some()
        } else {
            self.borrower.is_empty() && self.borrowed_at.is_none()
        }
    }
}

/// The only two shapes a record's borrow columns may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowState {
    Available,
    Borrowed { borrower: String, at: DateTime<Utc> },
}

impl BorrowState {
    pub fn is_borrowed(&self) -> bool {
        matches!(self, BorrowState::Borrowed { .. })
    }

    pub fn borrower(&self) -> &str {
        match self {
            BorrowState::Available => "",
            BorrowState::Borrowed { borrower, .. } => borrower,
        }
    }

    pub fn borrowed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            BorrowState::Available => None,
            BorrowState::Borrowed { at, .. } => Some(*at),
        }
    }
}

/// Outcome of a store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LendingPolicy {
    /// Borrow and return must change the borrow state; misses are errors.
    #[default]
    Strict,
    /// Borrow and return overwrite unconditionally and never report misses.
    Lenient,
}

impl LendingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LendingPolicy::Strict => "strict",
            LendingPolicy::Lenient => "lenient",
        }
    }
}
