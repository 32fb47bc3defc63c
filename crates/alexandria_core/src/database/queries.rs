use crate::database::types::{
    AuthorRecord, BookRecord, CategoryRecord, CreateLoanError, HistoryRecord,
    IdentityProfileRecord, InsertRatingError, InsertUserError, InterestRecord, MAX_SCORE,
    MIN_SCORE, NewBook, NewUser, QuoteRecord, RatingRecord, ReconcileError, RecordReturnError,
    UserRecord,
};
use crate::identity::{IdentityPayload, merge_picture, merge_user_fields};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;

const FETCH_BOOKS_SQL: &str = "WITH authors_info AS (
        SELECT
            bal.book,
            json_group_array(
                json_object('author_id', a.id, 'name', a.name)
            ) AS authors
        FROM
            authors AS a
            JOIN books_authors_link bal ON a.id = bal.author
        GROUP BY
            bal.book
    )
    SELECT
        b.id AS book_id,
        b.title,
        b.description,
        b.quantity,
        b.edition,
        b.publisher,
        b.isbn,
        c.name AS category,
        CASE WHEN authors IS NULL
        OR Trim(authors) = '' THEN '[]' ELSE authors END AS authors,
        b.created_at,
        b.updated_at
    FROM
        books b
        JOIN categories c ON c.id = b.category_id
        LEFT JOIN authors_info ON authors_info.book = b.id";

pub struct Db {
    pool: SqlitePool,
}

impl Db {
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn init(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .foreign_keys(true)
            .filename(path);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database, used by tests and throwaway environments. The pool
    /// is pinned to a single connection because every new in-memory connection
    /// would otherwise start from an empty database.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn init_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().foreign_keys(true).in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<core::time::Duration>)
            .max_lifetime(None::<core::time::Duration>)
            .connect_with(options)
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at end of program"
    )]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_authors(&self) -> Result<Vec<AuthorRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS author_id, name, created_at, updated_at
             FROM authors
             ORDER BY name ASC;",
        )
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_categories(&self) -> Result<Vec<CategoryRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS category_id, name, created_at, updated_at
             FROM categories
             ORDER BY name ASC;",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Books ordered by title, each carrying its category name and authors
    /// aggregated into a JSON array.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Large function, called only when table updates"
    )]
    pub async fn fetch_books(&self) -> Result<Vec<BookRecord>, sqlx::Error> {
        let sql = format!("{FETCH_BOOKS_SQL} ORDER BY b.title ASC;");
        sqlx::query_as(&sql).fetch_all(&self.pool).await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_book(&self, book_id: i64) -> Result<Option<BookRecord>, sqlx::Error> {
        let sql = format!("{FETCH_BOOKS_SQL} WHERE b.id = ?;");
        sqlx::query_as(&sql)
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_history(&self) -> Result<Vec<HistoryRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS history_id, lending_date, return_date, returned,
                    book_id, user_id, created_at, updated_at
             FROM history
             ORDER BY created_at DESC, id DESC;",
        )
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_history_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<HistoryRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS history_id, lending_date, return_date, returned,
                    book_id, user_id, created_at, updated_at
             FROM history
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC;",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_interests(&self) -> Result<Vec<InterestRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS interest_id, done, user_id, book_id, created_at, updated_at
             FROM interests
             ORDER BY created_at DESC, id DESC;",
        )
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_interests_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<InterestRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS interest_id, done, user_id, book_id, created_at, updated_at
             FROM interests
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC;",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_ratings_for_book(
        &self,
        book_id: i64,
    ) -> Result<Vec<RatingRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS rating_id, comment, score, user_id, book_id, created_at, updated_at
             FROM ratings
             WHERE book_id = ?
             ORDER BY created_at DESC, id DESC;",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Listing query")]
    pub async fn fetch_quotes(&self) -> Result<Vec<QuoteRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS quote_id, author, statement
             FROM quotes
             ORDER BY id ASC;",
        )
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT u.id AS user_id, u.username, u.email, u.first_name, u.last_name,
                    u.created_at, u.updated_at
             FROM users u
             JOIN identity_profiles p ON p.user_id = u.id
             WHERE p.external_id = ?;",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn fetch_profile_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<IdentityProfileRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id AS profile_id, external_id, user_id, picture
             FROM identity_profiles
             WHERE external_id = ?;",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Creates one user together with its identity profile in a single
    /// transaction. Either both rows exist afterwards or neither does.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_user(&self, user: &NewUser) -> Result<i64, InsertUserError> {
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;
        let now = Utc::now().naive_utc();

        let user_id_res: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "INSERT INTO users (username, email, first_name, last_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING id;",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let user_id = match user_id_res {
            Ok(id) => id,
            Err(error) => {
                if is_sqlite_unique_violation(&error) {
                    tx.rollback().await.ok();
                    return Err(InsertUserError::UsernameTaken(user.username.clone()));
                }
                return Err(InsertUserError::Db(error));
            }
        };

        let profile_res = sqlx::query(
            "INSERT INTO identity_profiles (external_id, user_id, picture)
             VALUES (?, ?, ?);",
        )
        .bind(&user.external_id)
        .bind(user_id)
        .bind(&user.picture)
        .execute(&mut *tx)
        .await;

        if let Err(error) = profile_res {
            if is_sqlite_unique_violation(&error) {
                tx.rollback().await.ok();
                return Err(InsertUserError::ProfileAlreadyExists(
                    user.external_id.clone(),
                ));
            }
            return Err(InsertUserError::Db(error));
        }

        tx.commit().await?;
        log::info!("created user {} (id={user_id})", user.username);
        Ok(user_id)
    }

    /// Diff-and-update the user fields attached to the payload's external id.
    /// When the merge finds nothing to change, no write happens and the audit
    /// timestamp stays put.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per login callback"
    )]
    pub async fn reconcile_profile(
        &self,
        payload: &IdentityPayload,
    ) -> Result<UserRecord, ReconcileError> {
        let Some(mut user) = self.fetch_user_by_external_id(&payload.external_id).await? else {
            return Err(ReconcileError::ProfileNotFound(payload.external_id.clone()));
        };

        let changes = merge_user_fields(&user, payload);
        if changes.is_empty() {
            return Ok(user);
        }

        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        user.updated_at = Utc::now().naive_utc();

        sqlx::query(
            "UPDATE users
             SET username = ?, email = ?, first_name = ?, last_name = ?, updated_at = ?
             WHERE id = ?;",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.updated_at)
        .bind(user.user_id)
        .execute(&self.pool)
        .await?;

        log::info!("reconciled user fields for external id {}", payload.external_id);
        Ok(user)
    }

    /// Same diff policy as [`Self::reconcile_profile`], applied solely to the
    /// profile picture URI.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per login callback"
    )]
    pub async fn reconcile_picture(
        &self,
        payload: &IdentityPayload,
    ) -> Result<IdentityProfileRecord, ReconcileError> {
        let Some(mut profile) = self.fetch_profile_by_external_id(&payload.external_id).await?
        else {
            return Err(ReconcileError::ProfileNotFound(payload.external_id.clone()));
        };

        if let Some(picture) = merge_picture(&profile, payload) {
            sqlx::query("UPDATE identity_profiles SET picture = ? WHERE id = ?;")
                .bind(&picture)
                .bind(profile.profile_id)
                .execute(&self.pool)
                .await?;
            profile.picture = picture;
        }

        Ok(profile)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_author(&self, name: &str) -> Result<i64, sqlx::Error> {
        let now = Utc::now().naive_utc();
        sqlx::query_scalar(
            "INSERT INTO authors (name, created_at, updated_at)
             VALUES (?, ?, ?)
                 RETURNING id;",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_category(&self, name: &str) -> Result<i64, sqlx::Error> {
        let now = Utc::now().naive_utc();
        sqlx::query_scalar(
            "INSERT INTO categories (name, created_at, updated_at)
             VALUES (?, ?, ?)
                 RETURNING id;",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_quote(&self, author: &str, statement: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO quotes (author, statement)
             VALUES (?, ?)
                 RETURNING id;",
        )
        .bind(author)
        .bind(statement)
        .fetch_one(&self.pool)
        .await
    }

    /// Inserts the book row and its author links in one transaction.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called rarely, large function"
    )]
    pub async fn insert_book(&self, book: &NewBook) -> Result<i64, sqlx::Error> {
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;
        let now = Utc::now().naive_utc();

        let book_id: i64 = sqlx::query_scalar(
            "INSERT INTO books (
                 title,
                 description,
                 quantity,
                 edition,
                 publisher,
                 isbn,
                 category_id,
                 created_at,
                 updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING id;",
        )
        .bind(&book.title)
        .bind(&book.description)
        .bind(book.quantity)
        .bind(&book.edition)
        .bind(&book.publisher)
        .bind(&book.isbn)
        .bind(book.category_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for author_id in &book.authors {
            sqlx::query(
                "INSERT OR IGNORE INTO books_authors_link (book, author)
                 VALUES (?1, ?2);",
            )
            .bind(book_id)
            .bind(author_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(book_id)
    }

    /// Restock/correction path for the on-hand quantity. Availability is
    /// always derived from this column at read time.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn set_book_quantity(&self, book_id: i64, quantity: i64) -> Result<(), sqlx::Error> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("UPDATE books SET quantity = ?, updated_at = ? WHERE id = ?;")
            .bind(quantity)
            .bind(now)
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Scores outside the documented 1..=5 range are rejected before any
    /// write.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_rating(
        &self,
        user_id: i64,
        book_id: i64,
        score: i64,
        comment: &str,
    ) -> Result<i64, InsertRatingError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(InsertRatingError::ScoreOutOfRange(score));
        }

        let now = Utc::now().naive_utc();
        let rating_id = sqlx::query_scalar(
            "INSERT INTO ratings (comment, score, user_id, book_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING id;",
        )
        .bind(comment)
        .bind(score)
        .bind(user_id)
        .bind(book_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(rating_id)
    }

    /// Appends an interest row. The same (user, book) pair may appear any
    /// number of times; interests are an append-only signal log.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn insert_interest(
        &self,
        user_id: i64,
        book_id: i64,
        done: bool,
    ) -> Result<i64, sqlx::Error> {
        let now = Utc::now().naive_utc();
        sqlx::query_scalar(
            "INSERT INTO interests (done, user_id, book_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
                 RETURNING id;",
        )
        .bind(done)
        .bind(user_id)
        .bind(book_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    /// Issues a loan: decrements the book's quantity and writes the ledger row
    /// in one transaction. The decrement is guarded by `quantity > 0`, so two
    /// concurrent issues of the last copy cannot both succeed. The lending
    /// date is set here, never supplied by the caller.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called rarely, large function"
    )]
    pub async fn create_loan(
        &self,
        book_id: i64,
        user_id: i64,
    ) -> Result<HistoryRecord, CreateLoanError> {
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;
        let now = Utc::now().naive_utc();

        let decremented = sqlx::query(
            "UPDATE books
             SET quantity = quantity - 1, updated_at = ?
             WHERE id = ? AND quantity > 0;",
        )
        .bind(now)
        .bind(book_id)
        .execute(&mut *tx)
        .await?;

        if decremented.rows_affected() == 0 {
            tx.rollback().await.ok();
            log::warn!("loan refused, book {book_id} has no copies available");
            return Err(CreateLoanError::BookUnavailable(book_id));
        }

        let history_id: i64 = sqlx::query_scalar(
            "INSERT INTO history (
                 lending_date,
                 return_date,
                 returned,
                 book_id,
                 user_id,
                 created_at,
                 updated_at
             )
             VALUES (?, NULL, 0, ?, ?, ?, ?)
                 RETURNING id;",
        )
        .bind(now)
        .bind(book_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        log::info!("issued loan {history_id} of book {book_id} to user {user_id}");
        Ok(HistoryRecord::new(
            history_id, now, None, false, book_id, user_id, now, now,
        ))
    }

    /// Records a return: sets `return_date` and `returned` together in a
    /// single statement and restores the book's quantity, all in one
    /// transaction. The two columns have no other writer, so they cannot
    /// disagree.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called rarely, large function"
    )]
    pub async fn record_return(&self, history_id: i64) -> Result<(), RecordReturnError> {
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;
        let now = Utc::now().naive_utc();

        let loan: Option<(i64, bool)> =
            sqlx::query_as("SELECT book_id, returned FROM history WHERE id = ?;")
                .bind(history_id)
                .fetch_optional(&mut *tx)
                .await?;

        let book_id = match loan {
            None => {
                tx.rollback().await.ok();
                return Err(RecordReturnError::LoanNotFound(history_id));
            }
            Some((_, true)) => {
                tx.rollback().await.ok();
                return Err(RecordReturnError::AlreadyReturned(history_id));
            }
            Some((book_id, false)) => book_id,
        };

        sqlx::query(
            "UPDATE history
             SET return_date = ?, returned = 1, updated_at = ?
             WHERE id = ?;",
        )
        .bind(now)
        .bind(now)
        .bind(history_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE books SET quantity = quantity + 1, updated_at = ? WHERE id = ?;")
            .bind(now)
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::info!("recorded return of loan {history_id} (book {book_id})");
        Ok(())
    }
}

#[allow(
    clippy::pattern_type_mismatch,
    reason = "False positive, this is the idiomatic pattern"
)]
fn is_sqlite_unique_violation(error: &sqlx::Error) -> bool {
    // Check for unique violation by searching for matching text in error message
    if let sqlx::Error::Database(db_err) = error {
        db_err.message().contains("UNIQUE constraint failed")
    } else {
        false
    }
}
