//! Catalog service: add, remove, search, borrow, return and list.
//!
//! Every operation validates its input before touching the store, performs
//! one or two store round trips, and never retries. Each round trip is
//! bounded by the configured store timeout.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::config::App;
use crate::error::CatalogError;
use crate::model::{Book, BorrowState, InsertOutcome, LendingPolicy};
use crate::store::CatalogStore;

pub type CatalogResult<T> = Result<T, CatalogError>;

const SAMPLE_BOOKS: &[(i64, &str, &str, &str)] = &[
    (1, "Book 1", "Author 1", "Publication 1"),
    (2, "Book 2", "Author 2", "Publication 2"),
    (3, "Book 3", "Author 3", "Publication 3"),
];

pub struct Catalog<S> {
    store: S,
    policy: LendingPolicy,
    timeout: Duration,
}

fn validate_id(id: i64) -> CatalogResult<()> {
    if id <= 0 {
        return Err(CatalogError::validation(format!(
            "invalid ID {id}: must be a positive integer"
        )));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str) -> CatalogResult<()> {
    if value.trim().is_empty() {
        return Err(CatalogError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl<S: CatalogStore> Catalog<S> {
    pub fn new(store: S, policy: LendingPolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    pub fn from_config(store: S, app: &App) -> Self {
        Self::new(store, app.lending_policy, app.store_timeout())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> LendingPolicy {
        self.policy
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> CatalogResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                tracing::error!(op, error = %source, "store call failed");
                Err(CatalogError::StoreUnavailable { op, source })
            }
            Err(_) => {
                tracing::error!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(CatalogError::Timeout {
                    op,
                    timeout: self.timeout,
                })
            }
        }
    }

    pub async fn add(&self, book: Book) -> CatalogResult<()> {
        validate_id(book.id)?;
        validate_text("title", &book.title)?;
        validate_text("author", &book.author)?;
        validate_text("publication", &book.publication)?;
        if book.borrow_state() != BorrowState::Available || !book.is_coherent() {
            return Err(CatalogError::validation("new books must not be borrowed"));
        }

        if self.call("count_by_id", self.store.count_by_id(book.id)).await? > 0 {
            return Err(CatalogError::DuplicateIdentifier(book.id));
        }

        // The pre-check can race with another writer; the primary key decides.
        match self.call("insert", self.store.insert(&book)).await? {
            InsertOutcome::Inserted => {
                tracing::info!(id = book.id, title = %book.title, "book added");
                Ok(())
            }
            InsertOutcome::Conflict => Err(CatalogError::DuplicateIdentifier(book.id)),
        }
    }

    pub async fn remove(&self, id: i64) -> CatalogResult<()> {
        validate_id(id)?;

        if self.call("delete_by_id", self.store.delete_by_id(id)).await? == 0 {
            return Err(CatalogError::NotFound(id));
        }
        tracing::info!(id, "book removed");
        Ok(())
    }

    pub async fn search(&self, keyword: &str) -> CatalogResult<Vec<Book>> {
        self.call("find_by_title_or_author", self.store.find_by_title_or_author(keyword))
            .await
    }

    pub async fn borrow(&self, id: i64, borrower: &str) -> CatalogResult<()> {
        validate_id(id)?;
        validate_text("borrower", borrower)?;

        let state = BorrowState::Borrowed {
            borrower: borrower.to_string(),
            at: Utc::now(),
        };

        match self.policy {
            LendingPolicy::Strict => {
                let changed = self
                    .call("update_borrow_state", self.store.update_borrow_state(id, &state, Some(false)))
                    .await?;
                if changed == 0 {
                    return Err(match self.call("find_by_id", self.store.find_by_id(id)).await? {
                        None => CatalogError::NotFound(id),
                        Some(book) => CatalogError::AlreadyBorrowed {
                            id,
                            borrower: book.borrower,
                        },
                    });
                }
            }
            LendingPolicy::Lenient => {
                let changed = self
                    .call("update_borrow_state", self.store.update_borrow_state(id, &state, None))
                    .await?;
                if changed == 0 {
                    tracing::debug!(id, "borrow matched no record");
                    return Ok(());
                }
            }
        }

        tracing::info!(id, borrower, "book borrowed");
        Ok(())
    }

    pub async fn return_book(&self, id: i64) -> CatalogResult<()> {
        validate_id(id)?;

        let state = BorrowState::Available;
        match self.policy {
            LendingPolicy::Strict => {
                let changed = self
                    .call("update_borrow_state", self.store.update_borrow_state(id, &state, Some(true)))
                    .await?;
                if changed == 0 {
                    return Err(match self.call("find_by_id", self.store.find_by_id(id)).await? {
                        None => CatalogError::NotFound(id),
                        Some(_) => CatalogError::NotBorrowed(id),
                    });
                }
            }
            LendingPolicy::Lenient => {
                let changed = self
                    .call("update_borrow_state", self.store.update_borrow_state(id, &state, None))
                    .await?;
                if changed == 0 {
                    tracing::debug!(id, "return matched no record");
                    return Ok(());
                }
            }
        }

        tracing::info!(id, "book returned");
        Ok(())
    }

    pub async fn list(&self) -> CatalogResult<Vec<Book>> {
        self.call("find_all", self.store.find_all()).await
    }

    /// Adds the sample books, skipping ids that already exist. Returns how
    /// many were inserted.
    pub async fn seed_samples(&self) -> usize {
        let mut added = 0;
        for &(id, title, author, publication) in SAMPLE_BOOKS {
            match self.add(Book::new(id, title, author, publication)).await {
                Ok(()) => added += 1,
                Err(CatalogError::DuplicateIdentifier(id)) => {
                    tracing::debug!(id, "sample book already present");
                }
                Err(e) => {
                    tracing::warn!(id, error = %crate::unpack_error(&e), "failed to seed sample book");
                }
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::tests::memory_db;
    use async_trait::async_trait;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    async fn catalog(policy: LendingPolicy) -> Catalog<Database> {
        Catalog::new(memory_db().await, policy, Duration::from_secs(5))
    }

    fn go_basics() -> Book {
        Book::new(1, "Go Basics", "Jane Doe", "2020")
    }

    /// Store that is either down or too slow to answer.
    struct BrokenStore {
        delay: Option<Duration>,
    }

    impl BrokenStore {
        async fn fail<T>(&self) -> anyhow::Result<T> {
            match self.delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    anyhow::bail!("answered too late")
                }
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    #[async_trait]
    impl CatalogStore for BrokenStore {
        async fn count_by_id(&self, _id: i64) -> anyhow::Result<i64> {
            self.fail().await
        }

        async fn insert(&self, _book: &Book) -> anyhow::Result<InsertOutcome> {
            self.fail().await
        }

        async fn delete_by_id(&self, _id: i64) -> anyhow::Result<u64> {
            self.fail().await
        }

        async fn find_by_title_or_author(&self, _keyword: &str) -> anyhow::Result<Vec<Book>> {
            self.fail().await
        }

        async fn update_borrow_state(
            &self,
            _id: i64,
            _state: &BorrowState,
            _expect_borrowed: Option<bool>,
        ) -> anyhow::Result<u64> {
            self.fail().await
        }

        async fn find_by_id(&self, _id: i64) -> anyhow::Result<Option<Book>> {
            self.fail().await
        }

        async fn find_all(&self) -> anyhow::Result<Vec<Book>> {
            self.fail().await
        }
    }

    /// Store whose existence check always misses, as when another writer
    /// inserts the same id between the check and the insert.
    struct StaleCheckStore {
        inner: Database,
    }

    #[async_trait]
    impl CatalogStore for StaleCheckStore {
        async fn count_by_id(&self, _id: i64) -> anyhow::Result<i64> {
            Ok(0)
        }

        async fn insert(&self, book: &Book) -> anyhow::Result<InsertOutcome> {
            self.inner.insert(book).await
        }

        async fn delete_by_id(&self, id: i64) -> anyhow::Result<u64> {
            self.inner.delete_by_id(id).await
        }

        async fn find_by_title_or_author(&self, keyword: &str) -> anyhow::Result<Vec<Book>> {
            self.inner.find_by_title_or_author(keyword).await
        }

        async fn update_borrow_state(
            &self,
            id: i64,
            state: &BorrowState,
            expect_borrowed: Option<bool>,
        ) -> anyhow::Result<u64> {
            self.inner.update_borrow_state(id, state, expect_borrowed).await
        }

        async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Book>> {
            self.inner.find_by_id(id).await
        }

        async fn find_all(&self) -> anyhow::Result<Vec<Book>> {
            self.inner.find_all().await
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn test_add_then_search_by_title() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();

        let found = catalog.search("Go Basics").await.unwrap();
        assert_eq!(found, vec![go_basics()]);
    }

    #[tokio::test]
    async fn test_add_duplicate_leaves_existing_record() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();

        let err = catalog
            .add(Book::new(1, "Impostor", "Nobody", "1900"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIdentifier(1)));
        assert_eq!(catalog.list().await.unwrap(), vec![go_basics()]);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_input_before_store() {
        let catalog = Catalog::new(BrokenStore { delay: None }, LendingPolicy::Strict, Duration::from_secs(1));

        for book in [
            Book::new(0, "t", "a", "p"),
            Book::new(-4, "t", "a", "p"),
            Book::new(1, "  ", "a", "p"),
            Book::new(1, "t", "", "p"),
            Book::new(1, "t", "a", ""),
        ] {
            let err = catalog.add(book).await.unwrap_err();
            assert!(matches!(err, CatalogError::Validation(_)), "{err:?}");
        }

        let mut lent = Book::new(1, "t", "a", "p");
        lent.borrowed = true;
        lent.borrower = "Eve".to_string();
        lent.borrowed_at = Some(Utc::now());
        assert!(matches!(catalog.add(lent).await.unwrap_err(), CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_losing_insert_race_is_duplicate() {
        let store = StaleCheckStore {
            inner: memory_db().await,
        };
        let catalog = Catalog::new(store, LendingPolicy::Strict, Duration::from_secs(5));
        catalog.add(go_basics()).await.unwrap();

        let err = catalog
            .add(Book::new(1, "Impostor", "Nobody", "1900"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIdentifier(1)), "{err:?}");
        assert_eq!(catalog.list().await.unwrap(), vec![go_basics()]);
    }

    #[tokio::test]
    async fn test_remove() {
        let catalog = catalog(LendingPolicy::Strict).await;
        assert!(matches!(catalog.remove(8).await.unwrap_err(), CatalogError::NotFound(8)));

        catalog.add(go_basics()).await.unwrap();
        catalog.remove(1).await.unwrap();
        assert!(catalog.list().await.unwrap().is_empty());
        assert!(matches!(catalog.remove(1).await.unwrap_err(), CatalogError::NotFound(1)));
    }

    #[tokio::test]
    async fn test_empty_search_matches_everything() {
        let catalog = catalog(LendingPolicy::Strict).await;
        assert!(catalog.search("").await.unwrap().is_empty());

        assert_eq!(catalog.seed_samples().await, 3);
        assert_eq!(catalog.seed_samples().await, 0);
        assert_eq!(catalog.search("").await.unwrap().len(), 3);
        assert_eq!(catalog.search("").await.unwrap(), catalog.list().await.unwrap());
    }

    #[tokio::test]
    async fn test_borrow_sets_state_and_timestamp() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();

        let before = Utc::now();
        catalog.borrow(1, "Alice").await.unwrap();

        let book = &catalog.list().await.unwrap()[0];
        assert!(book.borrowed);
        assert_eq!(book.borrower, "Alice");
        assert!(book.borrowed_at.unwrap() >= before);
        assert!(book.is_coherent());
    }

    #[tokio::test]
    async fn test_return_clears_state() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();
        catalog.borrow(1, "Alice").await.unwrap();
        catalog.return_book(1).await.unwrap();

        let book = &catalog.search("go").await.unwrap()[0];
        assert!(!book.borrowed);
        assert_eq!(book.borrower, "");
        assert_eq!(book.borrowed_at, None);
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_invalid_transitions() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();

        assert!(matches!(catalog.borrow(9, "Alice").await.unwrap_err(), CatalogError::NotFound(9)));
        assert!(matches!(catalog.return_book(9).await.unwrap_err(), CatalogError::NotFound(9)));
        assert!(matches!(catalog.return_book(1).await.unwrap_err(), CatalogError::NotBorrowed(1)));

        catalog.borrow(1, "Alice").await.unwrap();
        match catalog.borrow(1, "Mallory").await.unwrap_err() {
            CatalogError::AlreadyBorrowed { id, borrower } => {
                assert_eq!(id, 1);
                assert_eq!(borrower, "Alice");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(catalog.list().await.unwrap()[0].borrower, "Alice");
    }

    #[tokio::test]
    async fn test_lenient_policy_overwrites_and_ignores_misses() {
        let catalog = catalog(LendingPolicy::Lenient).await;
        catalog.add(go_basics()).await.unwrap();

        catalog.borrow(9, "Alice").await.unwrap();
        catalog.return_book(9).await.unwrap();
        catalog.return_book(1).await.unwrap();

        catalog.borrow(1, "Alice").await.unwrap();
        catalog.borrow(1, "Mallory").await.unwrap();
        let book = &catalog.list().await.unwrap()[0];
        assert_eq!(book.borrower, "Mallory");
        assert!(book.is_coherent());
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_miss_is_not_logged_as_success() {
        let catalog = catalog(LendingPolicy::Lenient).await;
        let (logs, _guard) = capture_logs();

        catalog.borrow(9, "Alice").await.unwrap();
        catalog.return_book(9).await.unwrap();

        let out = logs.contents();
        assert!(out.contains("borrow matched no record"));
        assert!(out.contains("return matched no record"));
        assert!(!out.contains("book borrowed"));
        assert!(!out.contains("book returned"));

        catalog.add(go_basics()).await.unwrap();
        catalog.borrow(1, "Alice").await.unwrap();
        assert!(logs.contents().contains("book borrowed"));
    }

    #[tokio::test]
    async fn test_borrow_requires_borrower_name() {
        let catalog = catalog(LendingPolicy::Lenient).await;
        catalog.add(go_basics()).await.unwrap();
        assert!(matches!(catalog.borrow(1, " ").await.unwrap_err(), CatalogError::Validation(_)));
        assert!(matches!(catalog.borrow(0, "Bob").await.unwrap_err(), CatalogError::Validation(_)));
        assert!(!catalog.list().await.unwrap()[0].borrowed);
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let catalog = Catalog::new(BrokenStore { delay: None }, LendingPolicy::Strict, Duration::from_secs(1));

        let err = catalog.list().await.unwrap_err();
        assert!(matches!(err, CatalogError::StoreUnavailable { op: "find_all", .. }));
        assert!(catalog.add(go_basics()).await.unwrap_err().is_store_failure());
        assert!(catalog.remove(1).await.unwrap_err().is_store_failure());
        assert!(catalog.borrow(1, "Bob").await.unwrap_err().is_store_failure());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = BrokenStore {
            delay: Some(Duration::from_secs(5)),
        };
        let catalog = Catalog::new(store, LendingPolicy::Strict, Duration::from_millis(20));

        let err = catalog.search("x").await.unwrap_err();
        assert!(matches!(err, CatalogError::Timeout { op: "find_by_title_or_author", .. }));
        assert!(matches!(catalog.return_book(1).await.unwrap_err(), CatalogError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_lending_scenario() {
        let catalog = catalog(LendingPolicy::Strict).await;
        catalog.add(go_basics()).await.unwrap();

        let found = catalog.search("basics").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);

        catalog.borrow(1, "Bob").await.unwrap();
        let listed = catalog.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].borrowed);
        assert_eq!(listed[0].borrower, "Bob");

        catalog.return_book(1).await.unwrap();
        let listed = catalog.list().await.unwrap();
        assert!(!listed[0].borrowed);
        assert_eq!(listed[0].borrower, "");
    }
}
