//! The persistence seam of the catalog.
//!
//! The catalog service only ever talks to a [`CatalogStore`]; every method is
//! a single round trip. The libsql implementation lives in [`crate::db`].

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Book, BorrowState, InsertOutcome};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn count_by_id(&self, id: i64) -> Result<i64>;

    /// Inserts `book`. A uniqueness violation on `id` is reported as
    /// [`InsertOutcome::Conflict`], not as an error.
    async fn insert(&self, book: &Book) -> Result<InsertOutcome>;

    async fn delete_by_id(&self, id: i64) -> Result<u64>;

    /// Case-insensitive literal substring match on title or author.
    async fn find_by_title_or_author(&self, keyword: &str) -> Result<Vec<Book>>;

    /// Writes `state` onto the record and returns the number of rows changed.
    /// With `expect_borrowed` set, only a record whose current `borrowed`
    /// flag equals it is touched.
    async fn update_borrow_state(
        &self,
        id: i64,
        state: &BorrowState,
        expect_borrowed: Option<bool>,
    ) -> Result<u64>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Book>>;

    async fn find_all(&self) -> Result<Vec<Book>>;
}
