//! Interactive text menu over the catalog.
//!
//! Reads one line per prompt from `input` and writes human-readable lines to
//! `output`. End of input or cancellation ends the loop.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::model::Book;
use crate::store::CatalogStore;
use crate::unpack_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Exit,
    Add,
    Remove,
    Search,
    Borrow,
    Return,
    Display,
}

impl MenuChoice {
    pub fn from_input(s: &str) -> Option<Self> {
        match s.trim() {
            "0" => Some(MenuChoice::Exit),
            "1" => Some(MenuChoice::Add),
            "2" => Some(MenuChoice::Remove),
            "3" => Some(MenuChoice::Search),
            "4" => Some(MenuChoice::Borrow),
            "5" => Some(MenuChoice::Return),
            "6" => Some(MenuChoice::Display),
            _ => None,
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct Menu<'a, S, R, W> {
    catalog: &'a Catalog<S>,
    input: R,
    output: W,
    cancel: CancellationToken,
}

fn format_book(book: &Book) -> String {
    let borrowed_at = book
        .borrowed_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "ID: {}, Title: {}, Author: {}, Publication: {}, Borrowed: {}, Borrower: {}, Borrowed At: {}",
        book.id, book.title, book.author, book.publication, book.borrowed, book.borrower, borrowed_at
    )
}

fn format_match(book: &Book) -> String {
    format!(
        "ID: {}, Title: {}, Author: {}, Publication: {}",
        book.id, book.title, book.author, book.publication
    )
}

impl<'a, S, R, W> Menu<'a, S, R, W>
where
    S: CatalogStore,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(catalog: &'a Catalog<S>, input: R, output: W, cancel: CancellationToken) -> Self {
        Self {
            catalog,
            input,
            output,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            self.print_menu()?;
            let Some(line) = self.read_line().await? else {
                writeln!(self.output)?;
                break;
            };

            let flow = match MenuChoice::from_input(&line) {
                Some(MenuChoice::Exit) => {
                    writeln!(self.output, "Exiting")?;
                    Flow::Exit
                }
                Some(MenuChoice::Add) => self.add_book().await?,
                Some(MenuChoice::Remove) => self.remove_book().await?,
                Some(MenuChoice::Search) => self.search_books().await?,
                Some(MenuChoice::Borrow) => self.borrow_book().await?,
                Some(MenuChoice::Return) => self.return_book().await?,
                Some(MenuChoice::Display) => self.display_books().await?,
                None => {
                    writeln!(self.output, "Invalid choice")?;
                    Flow::Continue
                }
            };

            if let Flow::Exit = flow {
                break;
            }
        }
        self.output.flush()?;
        Ok(())
    }

    fn print_menu(&mut self) -> Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "===== Library Management System =====")?;
        writeln!(self.output, "1. Add a book")?;
        writeln!(self.output, "2. Remove a book")?;
        writeln!(self.output, "3. Search for a book")?;
        writeln!(self.output, "4. Borrow a book")?;
        writeln!(self.output, "5. Return a book")?;
        writeln!(self.output, "6. Display all books")?;
        writeln!(self.output, "0. Exit")?;
        write!(self.output, "Enter your choice: ")?;
        self.output.flush()?;
        Ok(())
    }

    /// Next trimmed line, or `None` on end of input or cancellation. Lines
    /// that are not UTF-8 are reported and skipped.
    async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            let mut raw = Vec::new();
            tokio::select! {
                read = self.input.read_until(b'\n', &mut raw) => {
                    if read? == 0 {
                        return Ok(None);
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::debug!("menu input cancelled");
                    return Ok(None);
                }
            }

            match String::from_utf8(raw) {
                Ok(line) => return Ok(Some(line.trim().to_string())),
                Err(e) => {
                    tracing::debug!(error = %e, "discarding non UTF-8 input line");
                    writeln!(self.output, "Invalid input. Please enter valid UTF-8 text.")?;
                    self.output.flush()?;
                }
            }
        }
    }

    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        self.read_line().await
    }

    /// Re-prompts until a non-empty answer is given.
    async fn prompt_required(&mut self, label: &str, field: &str) -> Result<Option<String>> {
        loop {
            let Some(value) = self.prompt(label).await? else {
                return Ok(None);
            };
            if !value.is_empty() {
                return Ok(Some(value));
            }
            writeln!(self.output, "Invalid {field}. Please enter a non-empty string.")?;
        }
    }

    /// `Ok(Err(flow))` when the menu should not proceed with the operation.
    async fn prompt_id(&mut self, label: &str) -> Result<std::result::Result<i64, Flow>> {
        let Some(raw) = self.prompt(label).await? else {
            return Ok(Err(Flow::Exit));
        };
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Ok(id)),
            _ => {
                writeln!(self.output, "Invalid ID. Please enter a positive integer.")?;
                Ok(Err(Flow::Continue))
            }
        }
    }

    fn report(&mut self, result: crate::catalog::CatalogResult<()>, success: &str) -> Result<Flow> {
        match result {
            Ok(()) => writeln!(self.output, "{success}")?,
            Err(e) => {
                if !e.is_store_failure() {
                    tracing::debug!(error = %e, "operation rejected");
                }
                writeln!(self.output, "Error: {}", unpack_error(&e))?
            }
        }
        Ok(Flow::Continue)
    }

    async fn add_book(&mut self) -> Result<Flow> {
        let id = match self.prompt_id("Enter ID: ").await? {
            Ok(id) => id,
            Err(flow) => return Ok(flow),
        };
        let Some(title) = self.prompt_required("Enter book title: ", "title").await? else {
            return Ok(Flow::Exit);
        };
        let Some(author) = self.prompt_required("Enter author name: ", "author").await? else {
            return Ok(Flow::Exit);
        };
        let Some(publication) = self.prompt_required("Enter publication: ", "publication").await? else {
            return Ok(Flow::Exit);
        };

        let result = self.catalog.add(Book::new(id, &title, &author, &publication)).await;
        self.report(result, "Book added successfully")
    }

    async fn remove_book(&mut self) -> Result<Flow> {
        let id = match self.prompt_id("Enter book ID: ").await? {
            Ok(id) => id,
            Err(flow) => return Ok(flow),
        };
        let result = self.catalog.remove(id).await;
        self.report(result, "Book removed successfully")
    }

    async fn search_books(&mut self) -> Result<Flow> {
        let Some(keyword) = self.prompt("Enter the keyword to search: ").await? else {
            return Ok(Flow::Exit);
        };

        match self.catalog.search(&keyword).await {
            Ok(books) if books.is_empty() => writeln!(self.output, "No matching books found")?,
            Ok(books) => {
                writeln!(self.output, "Matching Books:")?;
                for book in &books {
                    writeln!(self.output, "{}", format_match(book))?;
                }
            }
            Err(e) => writeln!(self.output, "Error: {}", unpack_error(&e))?,
        }
        Ok(Flow::Continue)
    }

    async fn borrow_book(&mut self) -> Result<Flow> {
        let id = match self.prompt_id("Enter book ID: ").await? {
            Ok(id) => id,
            Err(flow) => return Ok(flow),
        };
        let Some(borrower) = self.prompt("Enter borrower name: ").await? else {
            return Ok(Flow::Exit);
        };
        let result = self.catalog.borrow(id, &borrower).await;
        self.report(result, "Book borrowed successfully")
    }

    async fn return_book(&mut self) -> Result<Flow> {
        let id = match self.prompt_id("Enter book ID: ").await? {
            Ok(id) => id,
            Err(flow) => return Ok(flow),
        };
        let result = self.catalog.return_book(id).await;
        self.report(result, "Book returned successfully")
    }

    async fn display_books(&mut self) -> Result<Flow> {
        match self.catalog.list().await {
            Ok(books) => {
                writeln!(self.output, "All books:")?;
                for book in &books {
                    writeln!(self.output, "{}", format_book(book))?;
                }
            }
            Err(e) => writeln!(self.output, "Error: {}", unpack_error(&e))?,
        }
        Ok(Flow::Continue)
    }
}
