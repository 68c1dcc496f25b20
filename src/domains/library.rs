// Library lending: members, books, borrow/return history

use crate::document::{Document, OnDelete, Relation};
use crate::error::{Refusal, Result};
use crate::store::{Guard, Removal, Store, place};
use crate::views;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STORAGE_KEY: &str = "library_app_v2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxKind {
    Borrow,
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Empty when a return was recorded without knowing the borrower
    #[serde(rename = "memberId", default)]
    pub member_id: String,
    #[serde(rename = "bookId")]
    pub book_id: String,
    #[serde(default)]
    pub date: String,
}

crate::impl_record!(Member, "members");
crate::impl_record!(Book, "books");
crate::impl_record!(Transaction, "transactions");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LibraryDocument {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

crate::impl_holds!(LibraryDocument {
    Member => members,
    Book => books,
    Transaction => transactions,
});

impl Document for LibraryDocument {
    fn storage_key() -> &'static str {
        STORAGE_KEY
    }

    fn collections() -> &'static [&'static str] {
        &["members", "books", "transactions"]
    }

    fn seed() -> Self {
        Self::default()
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![
            Relation::new::<Book, Transaction>(OnDelete::Cascade, |t| t.book_id.as_str()),
            // history survives the member; it shows "Unknown"
            Relation::new::<Member, Transaction>(OnDelete::Keep, |t| t.member_id.as_str()),
        ]
    }
}

pub type LibraryStore = Store<LibraryDocument>;

// ============================================================================
// Mutations
// ============================================================================

/// Register a member. Names are tidied and must be unique ignoring case.
pub fn add_member(store: &mut LibraryStore, name: &str) -> Result<Member> {
    let member = Member {
        id: String::new(),
        created_at: DateTime::default(),
        name: super::required("member name", name)?,
    };
    store.insert_checked(member, &views::unique_name::<Member>(|m| m.name.as_str()))
}

/// Catalogue a book. Titles are tidied and must be unique ignoring case.
pub fn add_book(store: &mut LibraryStore, title: &str) -> Result<Book> {
    let book = Book {
        id: String::new(),
        created_at: DateTime::default(),
        title: super::required("book title", title)?,
        available: true,
    };
    store.insert_checked(book, &views::unique_name::<Book>(|b| b.title.as_str()))
}

/// Lend an available book to a member
pub fn borrow(store: &mut LibraryStore, member_id: &str, book_id: &str) -> Result<Transaction> {
    if store.get::<Member>(member_id).is_none() {
        return Err(unavailable("members", member_id, "member not found").into());
    }
    match store.get::<Book>(book_id) {
        None => return Err(unavailable("books", book_id, "book not found").into()),
        Some(book) if !book.available => return Err(unavailable("books", book_id, "already borrowed").into()),
        Some(_) => {}
    }

    let tx = record_movement(store, TxKind::Borrow, member_id, book_id)?;
    debug!(member_id, book_id, "Book borrowed");
    Ok(tx)
}

/// Take a borrowed book back. Without an explicit member the most recent
/// borrower of the book is recorded.
pub fn return_book(store: &mut LibraryStore, book_id: &str, member_id: Option<&str>) -> Result<Transaction> {
    match store.get::<Book>(book_id) {
        None => return Err(unavailable("books", book_id, "book not found").into()),
        Some(book) if book.available => return Err(unavailable("books", book_id, "already available").into()),
        Some(_) => {}
    }

    let member_id = match member_id {
        Some(id) => id.to_string(),
        None => last_borrower(store.document(), book_id).unwrap_or_default().to_string(),
    };

    let tx = record_movement(store, TxKind::Return, &member_id, book_id)?;
    debug!(member_id = %member_id, book_id, "Book returned");
    Ok(tx)
}

/// Flip the book's availability and log the movement in one write
fn record_movement(store: &mut LibraryStore, kind: TxKind, member_id: &str, book_id: &str) -> Result<Transaction> {
    let tx = Transaction {
        id: String::new(),
        created_at: DateTime::default(),
        kind,
        member_id: member_id.to_string(),
        book_id: book_id.to_string(),
        date: Utc::now().to_rfc3339(),
    };

    store.transact(|doc| {
        let book = doc
            .books
            .iter_mut()
            .find(|b| b.id == book_id)
            .ok_or_else(|| unavailable("books", book_id, "book not found"))?;
        book.available = kind == TxKind::Return;
        Ok(place(doc, tx))
    })
}

fn unavailable(collection: &str, id: &str, reason: &str) -> Refusal {
    Refusal::Unavailable {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

/// Delete a member, refused while they still hold a book
pub fn delete_member(store: &mut LibraryStore, id: &str) -> Result<Option<Removal<Member>>> {
    let holding_books: &Guard<LibraryDocument, Member> = &|doc, member| {
        let held = active_borrows(doc).iter().filter(|b| b.member_id == member.id).count();
        (held > 0).then(|| Refusal::InUse {
            collection: "members".to_string(),
            id: member.id.clone(),
            reason: format!("member has {} borrowed book(s)", held),
        })
    };
    store.remove::<Member>(id, Some(holding_books))
}

/// Delete a book and its history, refused while it is on loan
pub fn delete_book(store: &mut LibraryStore, id: &str) -> Result<Option<Removal<Book>>> {
    let on_loan: &Guard<LibraryDocument, Book> = &|_, book| {
        (!book.available).then(|| Refusal::InUse {
            collection: "books".to_string(),
            id: book.id.clone(),
            reason: "book is borrowed".to_string(),
        })
    };
    store.remove::<Book>(id, Some(on_loan))
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub members: usize,
    pub books: usize,
    pub available: usize,
    pub borrowed: usize,
}

pub fn stats(doc: &LibraryDocument) -> LibraryStats {
    let borrowed = doc.books.iter().filter(|b| !b.available).count();
    LibraryStats {
        members: doc.members.len(),
        books: doc.books.len(),
        available: doc.books.len() - borrowed,
        borrowed,
    }
}

pub fn search_members<'a>(doc: &'a LibraryDocument, query: &str) -> Vec<&'a Member> {
    views::search(&doc.members, query, |m| m.name.as_str())
}

pub fn search_books<'a>(doc: &'a LibraryDocument, query: &str) -> Vec<&'a Book> {
    views::search(&doc.books, query, |b| b.title.as_str())
}

pub fn available_books(doc: &LibraryDocument) -> Vec<&Book> {
    doc.books.iter().filter(|b| b.available).collect()
}

/// Member of the latest borrow of a book
fn last_borrower<'a>(doc: &'a LibraryDocument, book_id: &str) -> Option<&'a str> {
    latest_for_book(doc, book_id, Some(TxKind::Borrow)).map(|t| t.member_id.as_str())
}

/// Newest transaction for a book, optionally of one kind.
/// Transactions are stored newest first.
fn latest_for_book<'a>(doc: &'a LibraryDocument, book_id: &str, kind: Option<TxKind>) -> Option<&'a Transaction> {
    doc.transactions
        .iter()
        .find(|t| t.book_id == book_id && kind.is_none_or(|k| t.kind == k))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveBorrow {
    pub book_id: String,
    pub title: String,
    pub member_id: String,
    pub member: String,
    pub since: String,
}

/// Books currently on loan together with who holds them
pub fn active_borrows(doc: &LibraryDocument) -> Vec<ActiveBorrow> {
    doc.books
        .iter()
        .filter(|b| !b.available)
        .map(|book| {
            let tx = latest_for_book(doc, &book.id, None).filter(|t| t.kind == TxKind::Borrow);
            let member_id = tx.map(|t| t.member_id.clone()).unwrap_or_default();
            ActiveBorrow {
                book_id: book.id.clone(),
                title: book.title.clone(),
                member: views::label(&doc.members, &member_id, |m| m.name.as_str()).to_string(),
                member_id,
                since: tx.map(|t| t.date.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub id: String,
    pub kind: TxKind,
    pub member: String,
    pub book: String,
    pub date: String,
}

/// Most recent transactions with member and book names resolved
pub fn history(doc: &LibraryDocument, limit: usize) -> Vec<HistoryRow> {
    doc.transactions
        .iter()
        .take(limit)
        .map(|t| HistoryRow {
            id: t.id.clone(),
            kind: t.kind,
            member: views::label(&doc.members, &t.member_id, |m| m.name.as_str()).to_string(),
            book: views::label(&doc.books, &t.book_id, |b| b.title.as_str()).to_string(),
            date: t.date.clone(),
        })
        .collect()
}
