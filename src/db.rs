use crate::config::Config;
use crate::model::{Book, BorrowState, InsertOutcome};
use crate::store::CatalogStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::{Path, PathBuf};
use std::time::Duration;

const IN_MEMORY: &str = ":memory:";

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_books.sql", include_str!("migrations/001_books.sql"))];

const BOOK_COLUMNS: &str = "id, title, author, publication, borrowed, borrower, borrowed_at";

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    /// Resolves the configured database against `data_dir`. `:memory:` and
    /// absolute paths are used as-is.
    pub fn resolve_path(database: &str, data_dir: &Path) -> PathBuf {
        let path = Path::new(database);
        if database == IN_MEMORY || path.is_absolute() {
            path.to_path_buf()
        } else {
            data_dir.join(path)
        }
    }

    async fn open(cfg: &Config, path: &Path) -> Result<(LibsqlDatabase, Connection)> {
        let db = match (&cfg.app.turso_url, &cfg.app.turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(path).build().await?,
        };

        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        Ok((db, conn))
    }

    /// Opens the store, retrying with exponential backoff up to
    /// `connect_retries` times, then applies pending migrations.
    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = Self::resolve_path(cfg.app.get_db(), data_dir);
        let backoff = cfg.app.connect_backoff();

        let mut attempt: u32 = 0;
        let (db, conn) = loop {
            match Self::open(cfg, &path).await {
                Ok(opened) => break opened,
                Err(e) if attempt < cfg.app.connect_retries => {
                    let delay = backoff.saturating_mul(1 << attempt.min(10));
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "failed to open database, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("failed to open database at {:?}", path)));
                }
            }
        };

        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            turso_url: cfg.app.turso_url.clone(),
            turso_auth_token: cfg.app.turso_auth_token.clone(),
        })
    }

    fn format_timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(raw)
            .map_err(|e| anyhow::anyhow!("invalid borrowed_at {raw:?}: {e}"))?
            .with_timezone(&Utc))
    }

    fn is_unique_violation(e: &libsql::Error) -> bool {
        e.to_string().contains("UNIQUE constraint failed")
    }

    fn row_to_book(row: &libsql::Row) -> Result<Book> {
        let borrowed_at = row
            .get::<Option<String>>(6)?
            .map(|raw| Self::parse_timestamp(&raw))
            .transpose()?;

        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            publication: row.get(3)?,
            borrowed: row.get::<i64>(4)? != 0,
            borrower: row.get::<Option<String>>(5)?.unwrap_or_default(),
            borrowed_at,
        })
    }

    async fn collect_books(mut rows: libsql::Rows) -> Result<Vec<Book>> {
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(Self::row_to_book(&row)?);
        }
        Ok(books)
    }
}

#[async_trait]
impl CatalogStore for Database {
    async fn count_by_id(&self, id: i64) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM books WHERE id = ?", libsql::params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn insert(&self, book: &Book) -> Result<InsertOutcome> {
        let query = r#"
            INSERT INTO books (id, title, author, publication, borrowed, borrower, borrowed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;

        let result = self
            .conn
            .execute(
                query,
                libsql::params![
                    book.id,
                    book.title.as_str(),
                    book.author.as_str(),
                    book.publication.as_str(),
                    book.borrowed as i64,
                    book.borrower.as_str(),
                    book.borrowed_at.map(Self::format_timestamp)
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if Self::is_unique_violation(&e) => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_by_id(&self, id: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute("DELETE FROM books WHERE id = ?", libsql::params![id])
            .await?;
        Ok(affected)
    }

    async fn find_by_title_or_author(&self, keyword: &str) -> Result<Vec<Book>> {
        // SQLite LIKE only folds ASCII, so the match runs here instead.
        let needle = keyword.to_lowercase();
        let query = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id");
        let mut rows = self.conn.query(&query, ()).await?;

        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            let book = Self::row_to_book(&row)?;
            if book.matches_keyword(&needle) {
                books.push(book);
            }
        }
        Ok(books)
    }

    async fn update_borrow_state(
        &self,
        id: i64,
        state: &BorrowState,
        expect_borrowed: Option<bool>,
    ) -> Result<u64> {
        let borrowed = state.is_borrowed() as i64;
        let borrower = state.borrower();
        let borrowed_at = state.borrowed_at().map(Self::format_timestamp);

        let affected = match expect_borrowed {
            None => {
                self.conn
                    .execute(
                        "UPDATE books SET borrowed = ?, borrower = ?, borrowed_at = ? WHERE id = ?",
                        libsql::params![borrowed, borrower, borrowed_at, id],
                    )
                    .await?
            }
            Some(current) => {
                self.conn
                    .execute(
                        "UPDATE books SET borrowed = ?, borrower = ?, borrowed_at = ? WHERE id = ? AND borrowed = ?",
                        libsql::params![borrowed, borrower, borrowed_at, id, current as i64],
                    )
                    .await?
            }
        };
        Ok(affected)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Book>> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
        let mut rows = self.conn.query(&query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_book(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn find_all(&self) -> Result<Vec<Book>> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id");
        let rows = self.conn.query(&query, ()).await?;
        Self::collect_books(rows).await
    }
}
