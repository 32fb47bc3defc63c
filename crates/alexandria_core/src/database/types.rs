use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Lowest score a rating may carry.
pub const MIN_SCORE: i64 = 1;
/// Highest score a rating may carry.
pub const MAX_SCORE: i64 = 5;

/// Number of days a borrower may keep a book before it is due back.
pub const LOAN_PERIOD_DAYS: i64 = 14;

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl UserRecord {
    #[must_use]
    #[inline]
    pub const fn new(
        user_id: i64,
        username: String,
        email: String,
        first_name: String,
        last_name: String,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            user_id,
            username,
            email,
            first_name,
            last_name,
            created_at,
            updated_at,
        }
    }
}

/// Link between a local user and the external login provider it came from.
///
/// `external_id` is assigned by the provider and never changes once the row
/// exists; only `picture` is ever updated.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct IdentityProfileRecord {
    pub profile_id: i64,
    pub external_id: String,
    pub user_id: i64,
    pub picture: String,
}

impl IdentityProfileRecord {
    #[must_use]
    #[inline]
    pub const fn new(profile_id: i64, external_id: String, user_id: i64, picture: String) -> Self {
        Self {
            profile_id,
            external_id,
            user_id,
            picture,
        }
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct AuthorRecord {
    pub author_id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AuthorRecord {
    #[must_use]
    #[inline]
    pub const fn new(
        author_id: i64,
        name: String,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            author_id,
            name,
            created_at,
            updated_at,
        }
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct CategoryRecord {
    pub category_id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CategoryRecord {
    #[must_use]
    #[inline]
    pub const fn new(
        category_id: i64,
        name: String,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            category_id,
            name,
            created_at,
            updated_at,
        }
    }
}

/// Author entry embedded in a book listing, aggregated as JSON by the query.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct BookAuthorRecord {
    pub author_id: i64,
    pub name: String,
}

impl BookAuthorRecord {
    #[must_use]
    #[inline]
    pub const fn new(author_id: i64, name: String) -> Self {
        Self { author_id, name }
    }
}

/// Whether a book currently has copies on hand.
///
/// Derived from `quantity` on every access and never written to the database,
/// so it cannot go stale relative to concurrent quantity mutations.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    #[serde(rename = "Available")]
    Available,
    #[serde(rename = "Not Available")]
    NotAvailable,
}

impl Availability {
    #[must_use]
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::NotAvailable => "Not Available",
        }
    }
}

impl core::fmt::Display for Availability {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct BookRecord {
    pub book_id: i64,
    pub title: String,
    pub description: String,
    pub quantity: i64,
    pub edition: String,
    pub publisher: String,
    pub isbn: String,
    pub category: String,
    #[sqlx(json)]
    pub authors: Vec<BookAuthorRecord>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BookRecord {
    #[allow(
        clippy::too_many_arguments,
        reason = "Constructor, cannot have fewer arguments"
    )]
    #[must_use]
    #[inline]
    pub const fn new(
        book_id: i64,
        title: String,
        description: String,
        quantity: i64,
        edition: String,
        publisher: String,
        isbn: String,
        category: String,
        authors: Vec<BookAuthorRecord>,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            book_id,
            title,
            description,
            quantity,
            edition,
            publisher,
            isbn,
            category,
            authors,
            created_at,
            updated_at,
        }
    }

    /// Availability derived from the on-hand quantity. Zero or negative
    /// quantities both read as not available.
    #[must_use]
    #[inline]
    pub const fn status(&self) -> Availability {
        if self.quantity > 0 {
            Availability::Available
        } else {
            Availability::NotAvailable
        }
    }
}

/// Fields for a book about to be inserted; `authors` holds author row ids to
/// link against.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone)]
pub struct NewBook {
    pub title: String,
    pub description: String,
    pub quantity: i64,
    pub edition: String,
    pub publisher: String,
    pub isbn: String,
    pub category_id: i64,
    pub authors: Vec<i64>,
}

impl NewBook {
    #[allow(
        clippy::too_many_arguments,
        reason = "Constructor, cannot have fewer arguments"
    )]
    #[must_use]
    #[inline]
    pub const fn new(
        title: String,
        description: String,
        quantity: i64,
        edition: String,
        publisher: String,
        isbn: String,
        category_id: i64,
        authors: Vec<i64>,
    ) -> Self {
        Self {
            title,
            description,
            quantity,
            edition,
            publisher,
            isbn,
            category_id,
            authors,
        }
    }
}

/// Fields for a user about to be created together with its identity profile.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub external_id: String,
    pub picture: String,
}

impl NewUser {
    #[must_use]
    #[inline]
    pub const fn new(
        username: String,
        email: String,
        first_name: String,
        last_name: String,
        external_id: String,
        picture: String,
    ) -> Self {
        Self {
            username,
            email,
            first_name,
            last_name,
            external_id,
            picture,
        }
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct RatingRecord {
    pub rating_id: i64,
    pub comment: String,
    pub score: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl RatingRecord {
    #[must_use]
    #[inline]
    pub const fn new(
        rating_id: i64,
        comment: String,
        score: i64,
        user_id: i64,
        book_id: i64,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            rating_id,
            comment,
            score,
            user_id,
            book_id,
            created_at,
            updated_at,
        }
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct HistoryRecord {
    pub history_id: i64,
    pub lending_date: NaiveDateTime,
    pub return_date: Option<NaiveDateTime>,
    pub returned: bool,
    pub book_id: i64,
    pub user_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl HistoryRecord {
    #[allow(
        clippy::too_many_arguments,
        reason = "Constructor, cannot have fewer arguments"
    )]
    #[must_use]
    #[inline]
    pub const fn new(
        history_id: i64,
        lending_date: NaiveDateTime,
        return_date: Option<NaiveDateTime>,
        returned: bool,
        book_id: i64,
        user_id: i64,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            history_id,
            lending_date,
            return_date,
            returned,
            book_id,
            user_id,
            created_at,
            updated_at,
        }
    }

    /// Due date of the loan, a pure function of the stored lending date.
    /// Deliberately independent of the current date so the value is the same
    /// no matter when it is read.
    #[must_use]
    #[inline]
    pub fn expected_return_date(&self) -> NaiveDateTime {
        self.lending_date + Duration::days(LOAN_PERIOD_DAYS)
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct InterestRecord {
    pub interest_id: i64,
    pub done: bool,
    pub user_id: i64,
    pub book_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl InterestRecord {
    #[must_use]
    #[inline]
    pub const fn new(
        interest_id: i64,
        done: bool,
        user_id: i64,
        book_id: i64,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            interest_id,
            done,
            user_id,
            book_id,
            created_at,
            updated_at,
        }
    }
}

#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, sqlx::FromRow)]
pub struct QuoteRecord {
    pub quote_id: i64,
    pub author: String,
    pub statement: String,
}

impl QuoteRecord {
    #[must_use]
    #[inline]
    pub const fn new(quote_id: i64, author: String, statement: String) -> Self {
        Self {
            quote_id,
            author,
            statement,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum InsertUserError {
    #[error("username already taken ({0})")]
    UsernameTaken(String),

    #[error("identity profile already exists (external_id={0})")]
    ProfileAlreadyExists(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no identity profile for external id {0}")]
    ProfileNotFound(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum InsertRatingError {
    #[error("rating score out of range: {0} (allowed {MIN_SCORE}..={MAX_SCORE})")]
    ScoreOutOfRange(i64),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CreateLoanError {
    #[error("book has no copies available (book_id={0})")]
    BookUnavailable(i64),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RecordReturnError {
    #[error("loan not found (history_id={0})")]
    LoanNotFound(i64),

    #[error("loan already returned (history_id={0})")]
    AlreadyReturned(i64),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn book_with_quantity(quantity: i64) -> BookRecord {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        BookRecord::new(
            1,
            String::from("Dune"),
            String::from("Desert planet epic"),
            quantity,
            String::from("1st"),
            String::from("Chilton Books"),
            String::from("978-0441013593"),
            String::from("Science Fiction"),
            vec![BookAuthorRecord::new(1, String::from("Frank Herbert"))],
            now,
            now,
        )
    }

    #[test]
    fn status_follows_quantity_sign() {
        let cases = [
            (-3, Availability::NotAvailable),
            (0, Availability::NotAvailable),
            (1, Availability::Available),
            (42, Availability::Available),
        ];

        for (quantity, expected) in cases {
            assert_eq!(book_with_quantity(quantity).status(), expected);
        }
    }

    #[test]
    fn status_renders_expected_strings() {
        assert_eq!(book_with_quantity(0).status().to_string(), "Not Available");
        assert_eq!(book_with_quantity(3).status().to_string(), "Available");
    }

    #[test]
    fn status_serializes_to_the_presentation_strings() {
        let available = serde_json::to_string(&book_with_quantity(3).status()).unwrap();
        assert_eq!(available, "\"Available\"");

        let not_available = serde_json::to_string(&book_with_quantity(0).status()).unwrap();
        assert_eq!(not_available, "\"Not Available\"");
    }

    #[test]
    fn expected_return_date_is_fourteen_days_after_lending() {
        let lending = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let record = HistoryRecord::new(1, lending, None, false, 1, 1, lending, lending);

        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(record.expected_return_date(), expected);
    }
}
