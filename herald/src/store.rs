//! Durable state behind one interface (spec.md §4.1). Schema creation
//! follows the teacher's `ensure_schema` idempotent `CREATE TABLE IF NOT
//! EXISTS` style (`server.rs`), including the same legacy-schema
//! detection-and-migration technique (`pragma_table_info` probe +
//! rename-copy-drop) generalized to the `read_state` composite-key
//! migration spec.md §4.1 requires.
//!
//! No business logic lives here — callers (Pipeline, Engine) own every
//! decision about *when* to call these primitives; the Store only
//! guarantees the invariants of spec.md §3.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// A new item parsed off a feed, ready for `Store::add_article`.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub guid: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadState {
    pub user_id: i64,
    pub article_id: i64,
    pub read: bool,
    pub starred: bool,
    pub interest_score: Option<f64>,
    pub security_score: Option<f64>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleSummaryRow {
    pub user_id: i64,
    pub article_id: i64,
    pub ai_summary: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleGroup {
    pub id: i64,
    pub user_id: i64,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub embedding: Option<Vec<u8>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupSummaryRow {
    pub group_id: i64,
    pub summary: String,
    pub article_count: i64,
    pub max_interest_score: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FilterRuleRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: Option<i64>,
    pub axis: String,
    pub value: String,
    pub score: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserPreferenceRow {
    pub user_id: i64,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserPromptRow {
    pub user_id: i64,
    pub prompt_type: String,
    pub template: String,
    pub temperature: Option<f32>,
}

/// An article ranked for reading, with its decayed effective score and the
/// raw row (spec.md §4.9).
#[derive(Debug, Clone)]
pub struct RankedArticle {
    pub article: Article,
    pub interest_score: f64,
    pub effective_score: f64,
    pub boost: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddArticleOutcome {
    pub article_id: i64,
    pub created: bool,
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the store against an already-initialized pool, ensuring the
    /// schema exists (creating tables and running the legacy read_state
    /// migration if needed).
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let store = Store { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        tracing::info!("store: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

        // Legacy-schema migration: spec.md §4.1 "detect the legacy single-column
        // read-state primary key (column user_id absent) and, in one transaction,
        // copy rows into a new composite-key table defaulting user_id=1".
        let legacy_read_state_exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='read_state'",
        )
        .fetch_one(&self.pool)
        .await
        .unwrap_or(0)
            > 0;

        if legacy_read_state_exists {
            let has_user_id = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM pragma_table_info('read_state') WHERE name='user_id'",
            )
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0)
                > 0;

            if !has_user_id {
                tracing::info!("store: detected legacy read_state schema, migrating");
                let mut tx = self.pool.begin().await?;
                sqlx::query("ALTER TABLE read_state RENAME TO read_state_old")
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE read_state (
                        user_id INTEGER NOT NULL,
                        article_id INTEGER NOT NULL,
                        read INTEGER NOT NULL DEFAULT 0,
                        starred INTEGER NOT NULL DEFAULT 0,
                        interest_score REAL,
                        security_score REAL,
                        read_at TIMESTAMP,
                        PRIMARY KEY (user_id, article_id)
                    );
                    "#,
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO read_state (user_id, article_id, read, starred, interest_score, security_score, read_at)
                    SELECT 1, article_id, read, starred, interest_score, security_score, read_at FROM read_state_old
                    "#,
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query("DROP TABLE read_state_old").execute(&mut *tx).await?;
                tx.commit().await?;
                tracing::info!("store: read_state migration complete");
            }
        }

        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                last_fetched TIMESTAMP,
                last_error TEXT,
                etag TEXT,
                last_modified TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER NOT NULL REFERENCES users(id),
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                created_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (user_id, feed_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                author TEXT,
                published_at TIMESTAMP,
                fetched_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(feed_id, guid)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS article_authors (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                PRIMARY KEY (article_id, author)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS article_categories (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                PRIMARY KEY (article_id, category)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS read_state (
                user_id INTEGER NOT NULL,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                read INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                interest_score REAL,
                security_score REAL,
                read_at TIMESTAMP,
                PRIMARY KEY (user_id, article_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS article_summaries (
                user_id INTEGER NOT NULL,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                ai_summary TEXT NOT NULL DEFAULT '',
                generated_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (user_id, article_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS article_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                topic TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                embedding BLOB
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS group_members (
                group_id INTEGER NOT NULL REFERENCES article_groups(id) ON DELETE CASCADE,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                added_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (group_id, article_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS group_summaries (
                group_id INTEGER NOT NULL UNIQUE REFERENCES article_groups(id) ON DELETE CASCADE,
                summary TEXT NOT NULL DEFAULT '',
                article_count INTEGER NOT NULL DEFAULT 0,
                max_interest_score REAL,
                generated_at TIMESTAMP NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS filter_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                feed_id INTEGER REFERENCES feeds(id) ON DELETE CASCADE,
                axis TEXT NOT NULL,
                value TEXT NOT NULL,
                score INTEGER NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_prompts (
                user_id INTEGER NOT NULL,
                prompt_type TEXT NOT NULL,
                template TEXT NOT NULL,
                temperature REAL,
                PRIMARY KEY (user_id, prompt_type)
            );
            "#,
        ];

        for s in &stmts {
            sqlx::query(s)
                .execute(&self.pool)
                .await
                .with_context(|| "failed to ensure schema")?;
        }

        tracing::info!("store: schema ensured");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (name) VALUES (?) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert user")?;
        Ok(row)
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, name, created_at FROM users WHERE LOWER(name) = LOWER(?)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query user by name")?;
        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT id, name, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query user")?;
        Ok(row)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>("SELECT id, name, created_at FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list users")?;
        Ok(rows)
    }

    pub async fn users_with_subscriptions(&self) -> Result<Vec<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM subscriptions ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list users with subscriptions")?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Feeds / Subscriptions
    // ---------------------------------------------------------------

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, description, last_fetched, last_error, etag, last_modified, enabled, created_at FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query feed by url")?;
        Ok(row)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, description, last_fetched, last_error, etag, last_modified, enabled, created_at FROM feeds WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query feed")?;
        Ok(row)
    }

    pub async fn create_feed(&self, url: &str, title: &str, description: &str) -> Result<Feed> {
        let row = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (url, title, description) VALUES (?, ?, ?)
            RETURNING id, url, title, description, last_fetched, last_error, etag, last_modified, enabled, created_at
            "#,
        )
        .bind(url)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert feed")?;
        Ok(row)
    }

    pub async fn rename_feed(&self, feed_id: i64, title: &str) -> Result<()> {
        sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
            .bind(title)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to rename feed")?;
        Ok(())
    }

    /// Success outcome of a fetch cycle for one feed (spec.md §4.2): clears
    /// `last_error`, advances `last_fetched`, persists new validators.
    pub async fn record_fetch_success(
        &self,
        feed_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET last_fetched = ?, last_error = NULL, etag = COALESCE(?, etag), last_modified = COALESCE(?, last_modified) WHERE id = ?",
        )
        .bind(now)
        .bind(etag)
        .bind(last_modified)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .context("failed to record fetch success")?;
        Ok(())
    }

    /// 304 outcome (spec.md §4.2): clear last_error, advance last_fetched,
    /// leave validators unchanged.
    pub async fn record_fetch_not_modified(&self, feed_id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_fetched = ?, last_error = NULL WHERE id = ?")
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to record not-modified fetch")?;
        Ok(())
    }

    /// Error outcome (spec.md §4.2): write last_error, do NOT touch
    /// last_fetched or validators.
    pub async fn record_fetch_error(&self, feed_id: i64, message: &str) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_error = ? WHERE id = ?")
            .bind(message)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to record fetch error")?;
        Ok(())
    }

    pub async fn add_subscription(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, feed_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to insert subscription")?;
        Ok(())
    }

    pub async fn remove_subscription(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to remove subscription")?;
        Ok(())
    }

    /// The only path that deletes Feeds (spec.md §4.1, I3).
    pub async fn delete_feed_if_orphaned(&self, feed_id: i64) -> Result<bool> {
        let subscriber_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?",
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count subscribers")?;

        if subscriber_count > 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .context("failed to delete orphaned feed")?;
        Ok(true)
    }

    pub async fn list_feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, Feed>(
            r#"
            SELECT f.id, f.url, f.title, f.description, f.last_fetched, f.last_error, f.etag, f.last_modified, f.enabled, f.created_at
            FROM feeds f
            JOIN subscriptions s ON s.feed_id = f.id
            WHERE s.user_id = ?
            ORDER BY f.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list feeds for user")?;
        Ok(rows)
    }

    pub async fn list_all_subscribed_feeds(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, Feed>(
            r#"
            SELECT DISTINCT f.id, f.url, f.title, f.description, f.last_fetched, f.last_error, f.etag, f.last_modified, f.enabled, f.created_at
            FROM feeds f
            JOIN subscriptions s ON s.feed_id = f.id
            WHERE f.enabled = 1
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list subscribed feeds")?;
        Ok(rows)
    }

    /// Total article count for a feed, for per-feed stats display (spec.md §4.8).
    pub async fn feed_article_count(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to count feed articles")?;
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Articles
    // ---------------------------------------------------------------

    /// Insert-or-ignore on (feed_id, guid); reports whether a new row was
    /// created (spec.md §4.1). Never returns a stale id on conflict.
    pub async fn add_article(&self, feed_id: i64, item: &NewArticle) -> Result<AddArticleOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM articles WHERE feed_id = ? AND guid = ?",
        )
        .bind(feed_id)
        .bind(&item.guid)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check existing article")?;

        if let Some(id) = existing {
            tx.commit().await?;
            return Ok(AddArticleOutcome {
                article_id: id,
                created: false,
            });
        }

        let article_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO articles (feed_id, guid, title, url, content, summary, author, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(&item.guid)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.content)
        .bind(&item.summary)
        .bind(&item.author)
        .bind(item.published_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert article")?;

        for author in &item.authors {
            sqlx::query("INSERT OR IGNORE INTO article_authors (article_id, author) VALUES (?, ?)")
                .bind(article_id)
                .bind(author)
                .execute(&mut *tx)
                .await
                .context("failed to insert article author")?;
        }

        for category in &item.categories {
            sqlx::query(
                "INSERT OR IGNORE INTO article_categories (article_id, category) VALUES (?, ?)",
            )
            .bind(article_id)
            .bind(category)
            .execute(&mut *tx)
            .await
            .context("failed to insert article category")?;
        }

        tx.commit().await?;

        Ok(AddArticleOutcome {
            article_id,
            created: true,
        })
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, Article>(
            "SELECT id, feed_id, guid, title, url, content, summary, author, published_at, fetched_at FROM articles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query article")?;
        Ok(row)
    }

    pub async fn get_article_authors(&self, article_id: i64) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT author FROM article_authors WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query article authors")?;
        Ok(rows)
    }

    pub async fn get_article_categories(&self, article_id: i64) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT category FROM article_categories WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query article categories")?;
        Ok(rows)
    }

    /// Articles observed across a feed, for filter-rule UX (spec.md §4.8).
    pub async fn feed_authors(&self, feed_id: i64) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT aa.author FROM article_authors aa
            JOIN articles a ON a.id = aa.article_id
            WHERE a.feed_id = ?
            ORDER BY aa.author
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query feed authors")?;
        Ok(rows)
    }

    pub async fn feed_categories(&self, feed_id: i64) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT ac.category FROM article_categories ac
            JOIN articles a ON a.id = ac.article_id
            WHERE a.feed_id = ?
            ORDER BY ac.category
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query feed categories")?;
        Ok(rows)
    }

    /// Unread articles for a user, optionally filtered by feed or starred,
    /// newest first (spec.md §4.8). "Unread" per §9 open question: ranking
    /// excludes read articles everywhere, including this listing.
    pub async fn get_unread_articles(
        &self,
        user_id: i64,
        feed_id: Option<i64>,
        starred_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, Article>(
            r#"
            SELECT a.id, a.feed_id, a.guid, a.title, a.url, a.content, a.summary, a.author, a.published_at, a.fetched_at
            FROM articles a
            LEFT JOIN read_state rs ON rs.article_id = a.id AND rs.user_id = ?
            WHERE (rs.read IS NULL OR rs.read = 0)
              AND (?3 IS NULL OR a.feed_id = ?3)
              AND (?4 = 0 OR rs.starred = 1)
            ORDER BY COALESCE(a.published_at, a.fetched_at) DESC
            LIMIT ?5 OFFSET ?6
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(feed_id)
        .bind(starred_only as i64)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to query unread articles")?;
        Ok(rows)
    }

    /// Articles scored (raw interest_score) above `threshold` and unread,
    /// with their feed id attached for filter-rule matching (spec.md §4.1/
    /// §4.9). Decay and boost are applied by the caller (Ranking module) —
    /// this only narrows by the raw-score predicate the Store contract
    /// requires.
    pub async fn candidate_articles_by_interest_score(
        &self,
        user_id: i64,
        threshold: f64,
    ) -> Result<Vec<(Article, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.feed_id, a.guid, a.title, a.url, a.content, a.summary, a.author, a.published_at, a.fetched_at, rs.interest_score
            FROM articles a
            JOIN read_state rs ON rs.article_id = a.id AND rs.user_id = ?
            WHERE rs.read = 0 AND rs.interest_score >= ?
            "#,
        )
        .bind(user_id)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .context("failed to query candidate articles")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let article = Article {
                id: row.get("id"),
                feed_id: row.get("feed_id"),
                guid: row.get("guid"),
                title: row.get("title"),
                url: row.get("url"),
                content: row.get("content"),
                summary: row.get("summary"),
                author: row.get("author"),
                published_at: row.get("published_at"),
                fetched_at: row.get("fetched_at"),
            };
            let score: f64 = row.get("interest_score");
            out.push((article, score));
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // ReadState
    // ---------------------------------------------------------------

    pub async fn get_read_state(&self, user_id: i64, article_id: i64) -> Result<Option<ReadState>> {
        let row = sqlx::query_as::<_, ReadState>(
            "SELECT user_id, article_id, read, starred, interest_score, security_score, read_at FROM read_state WHERE user_id = ? AND article_id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query read state")?;
        Ok(row)
    }

    /// Upsert keyed on (user, article); `None` score arguments leave the
    /// existing score untouched; `read_at` is set to now only on a
    /// transition to read=true (spec.md §4.1).
    pub async fn upsert_read_state(
        &self,
        user_id: i64,
        article_id: i64,
        read: bool,
        interest_score: Option<f64>,
        security_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing = self.get_read_state(user_id, article_id).await?;

        let was_read = existing.as_ref().map(|r| r.read).unwrap_or(false);
        let read_at = if read && !was_read {
            Some(now)
        } else {
            existing.as_ref().and_then(|r| r.read_at)
        };

        let final_interest = interest_score.or(existing.as_ref().and_then(|r| r.interest_score));
        let final_security = security_score.or(existing.as_ref().and_then(|r| r.security_score));
        let starred = existing.as_ref().map(|r| r.starred).unwrap_or(false);

        sqlx::query(
            r#"
            INSERT INTO read_state (user_id, article_id, read, starred, interest_score, security_score, read_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET
                read = excluded.read,
                interest_score = excluded.interest_score,
                security_score = excluded.security_score,
                read_at = excluded.read_at
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(read)
        .bind(starred)
        .bind(final_interest)
        .bind(final_security)
        .bind(read_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert read state")?;

        Ok(())
    }

    pub async fn set_starred(&self, user_id: i64, article_id: i64, starred: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO read_state (user_id, article_id, starred) VALUES (?, ?, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET starred = excluded.starred
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(starred)
        .execute(&self.pool)
        .await
        .context("failed to set starred")?;
        Ok(())
    }

    pub async fn set_read(&self, user_id: i64, article_id: i64, read: bool, now: DateTime<Utc>) -> Result<()> {
        self.upsert_read_state(user_id, article_id, read, None, None, now).await
    }

    /// Articles "unscored for user U": no ReadState row exists for (U,
    /// article) yet (spec.md §4.6). Capped to `limit` per invocation.
    pub async fn unscored_articles_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, Article>(
            r#"
            SELECT a.id, a.feed_id, a.guid, a.title, a.url, a.content, a.summary, a.author, a.published_at, a.fetched_at
            FROM articles a
            JOIN subscriptions s ON s.feed_id = a.feed_id AND s.user_id = ?
            LEFT JOIN read_state rs ON rs.article_id = a.id AND rs.user_id = ?
            WHERE rs.article_id IS NULL
            ORDER BY a.fetched_at ASC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query unscored articles")?;
        Ok(rows)
    }

    pub async fn pending_unscored_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM articles a
            JOIN subscriptions s ON s.feed_id = a.feed_id AND s.user_id = ?
            LEFT JOIN read_state rs ON rs.article_id = a.id AND rs.user_id = ?
            WHERE rs.article_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count unscored articles")?;
        Ok(count)
    }

    pub async fn pending_unsummarized_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM articles a
            JOIN subscriptions s ON s.feed_id = a.feed_id AND s.user_id = ?
            LEFT JOIN article_summaries asum ON asum.article_id = a.id AND asum.user_id = ?
            WHERE asum.article_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count unsummarized articles")?;
        Ok(count)
    }

    // ---------------------------------------------------------------
    // ArticleSummary
    // ---------------------------------------------------------------

    pub async fn get_article_summary(&self, user_id: i64, article_id: i64) -> Result<Option<ArticleSummaryRow>> {
        let row = sqlx::query_as::<_, ArticleSummaryRow>(
            "SELECT user_id, article_id, ai_summary, generated_at FROM article_summaries WHERE user_id = ? AND article_id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query article summary")?;
        Ok(row)
    }

    pub async fn upsert_article_summary(
        &self,
        user_id: i64,
        article_id: i64,
        ai_summary: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_summaries (user_id, article_id, ai_summary, generated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET ai_summary = excluded.ai_summary, generated_at = excluded.generated_at
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(ai_summary)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to upsert article summary")?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Groups
    // ---------------------------------------------------------------

    pub async fn create_group(&self, user_id: i64, topic: &str, now: DateTime<Utc>) -> Result<ArticleGroup> {
        let row = sqlx::query_as::<_, ArticleGroup>(
            r#"
            INSERT INTO article_groups (user_id, topic, created_at, updated_at) VALUES (?, ?, ?, ?)
            RETURNING id, user_id, topic, created_at, updated_at, embedding
            "#,
        )
        .bind(user_id)
        .bind(topic)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert group")?;
        Ok(row)
    }

    pub async fn get_group(&self, group_id: i64) -> Result<Option<ArticleGroup>> {
        let row = sqlx::query_as::<_, ArticleGroup>(
            "SELECT id, user_id, topic, created_at, updated_at, embedding FROM article_groups WHERE id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query group")?;
        Ok(row)
    }

    /// Every group for `user_id` carrying its raw embedding blob for
    /// scoring (spec.md §4.1).
    pub async fn user_groups_with_embeddings(&self, user_id: i64) -> Result<Vec<(i64, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, embedding FROM article_groups WHERE user_id = ? AND embedding IS NOT NULL")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to query group embeddings")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            out.push((id, embedding::decode(&blob)));
        }
        Ok(out)
    }

    pub async fn update_group_topic(&self, group_id: i64, topic: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE article_groups SET topic = ?, updated_at = ? WHERE id = ?")
            .bind(topic)
            .bind(now)
            .bind(group_id)
            .execute(&self.pool)
            .await
            .context("failed to update group topic")?;
        Ok(())
    }

    /// Add `article_id` as a member of `group_id` and fold its embedding
    /// into the group's centroid, all inside one transaction (spec.md §9:
    /// "make that ordering explicit and transactional to avoid races when
    /// two pipelines attach to the same group concurrently"). The member
    /// insert, the member-count read used as the incremental mean's prior
    /// `N`, and the prior-centroid read all happen against the same `tx`,
    /// so a concurrent call attaching to the same group blocks on SQLite's
    /// single-writer lock until this transaction commits rather than
    /// reading a stale count or a stale centroid. Mirrors the transaction
    /// shape `add_article` already uses for its own insert-or-check flow.
    pub async fn attach_member_and_update_centroid(
        &self,
        group_id: i64,
        article_id: i64,
        new_vector: &[f32],
        now: DateTime<Utc>,
    ) -> Result<Vec<f32>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO group_members (group_id, article_id, added_at) VALUES (?, ?, ?)")
            .bind(group_id)
            .bind(article_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("failed to add group member")?;

        let member_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to count group members")?;

        let prior_blob: Option<Vec<u8>> = sqlx::query_scalar("SELECT embedding FROM article_groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to read prior group centroid")?;
        let prior_centroid = prior_blob.map(|b| embedding::decode(&b));

        let prior_count = (member_count - 1).max(0) as u64;
        let updated_centroid = embedding::incremental_mean(prior_centroid.as_deref(), prior_count, new_vector);

        let bytes = embedding::encode(&updated_centroid);
        sqlx::query("UPDATE article_groups SET embedding = ?, updated_at = ? WHERE id = ?")
            .bind(bytes)
            .bind(now)
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .context("failed to update group embedding")?;

        tx.commit().await?;
        Ok(updated_centroid)
    }

    pub async fn list_user_groups(&self, user_id: i64) -> Result<Vec<ArticleGroup>> {
        let rows = sqlx::query_as::<_, ArticleGroup>(
            "SELECT id, user_id, topic, created_at, updated_at, embedding FROM article_groups WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list user groups")?;
        Ok(rows)
    }

    /// `(title, ai_summary, interest_score)` tuples for every current
    /// member of a group, for the group-summary refresh step (spec.md §4.6
    /// step 6).
    pub async fn group_member_tuples(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<Vec<(String, String, Option<f64>)>> {
        let rows = sqlx::query(
            r#"
            SELECT a.title, COALESCE(asum.ai_summary, '') as ai_summary, rs.interest_score
            FROM group_members gm
            JOIN articles a ON a.id = gm.article_id
            LEFT JOIN article_summaries asum ON asum.article_id = a.id AND asum.user_id = ?
            LEFT JOIN read_state rs ON rs.article_id = a.id AND rs.user_id = ?
            WHERE gm.group_id = ?
            ORDER BY gm.added_at ASC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query group member tuples")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("title"), r.get("ai_summary"), r.get("interest_score")))
            .collect())
    }

    pub async fn group_member_article_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT article_id FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to query group member article ids")?;
        Ok(rows)
    }

    pub async fn upsert_group_summary(
        &self,
        group_id: i64,
        summary: &str,
        article_count: i64,
        max_interest_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_summaries (group_id, summary, article_count, max_interest_score, generated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(group_id) DO UPDATE SET
                summary = excluded.summary,
                article_count = excluded.article_count,
                max_interest_score = excluded.max_interest_score,
                generated_at = excluded.generated_at
            "#,
        )
        .bind(group_id)
        .bind(summary)
        .bind(article_count)
        .bind(max_interest_score)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to upsert group summary")?;
        Ok(())
    }

    pub async fn get_group_summary(&self, group_id: i64) -> Result<Option<GroupSummaryRow>> {
        let row = sqlx::query_as::<_, GroupSummaryRow>(
            "SELECT group_id, summary, article_count, max_interest_score, generated_at FROM group_summaries WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query group summary")?;
        Ok(row)
    }

    // ---------------------------------------------------------------
    // Filter rules
    // ---------------------------------------------------------------

    pub async fn list_filter_rules(&self, user_id: i64, feed_id: Option<i64>) -> Result<Vec<FilterRuleRow>> {
        let rows = sqlx::query_as::<_, FilterRuleRow>(
            r#"
            SELECT id, user_id, feed_id, axis, value, score FROM filter_rules
            WHERE user_id = ? AND (feed_id IS NULL OR ?2 IS NULL OR feed_id = ?2)
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list filter rules")?;
        Ok(rows)
    }

    pub async fn add_filter_rule(
        &self,
        user_id: i64,
        feed_id: Option<i64>,
        axis: &str,
        value: &str,
        score: i64,
    ) -> Result<FilterRuleRow> {
        let row = sqlx::query_as::<_, FilterRuleRow>(
            r#"
            INSERT INTO filter_rules (user_id, feed_id, axis, value, score) VALUES (?, ?, ?, ?, ?)
            RETURNING id, user_id, feed_id, axis, value, score
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(axis)
        .bind(value)
        .bind(score)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert filter rule")?;
        Ok(row)
    }

    pub async fn update_filter_rule_score(&self, rule_id: i64, score: i64) -> Result<()> {
        sqlx::query("UPDATE filter_rules SET score = ? WHERE id = ?")
            .bind(score)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("failed to update filter rule score")?;
        Ok(())
    }

    pub async fn delete_filter_rule(&self, rule_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM filter_rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("failed to delete filter rule")?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Preferences
    // ---------------------------------------------------------------

    pub async fn get_all_preferences(&self, user_id: i64) -> Result<Vec<UserPreferenceRow>> {
        let rows = sqlx::query_as::<_, UserPreferenceRow>(
            "SELECT user_id, key, value FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list preferences")?;
        Ok(rows)
    }

    pub async fn set_preference(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("failed to set preference")?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Prompts
    // ---------------------------------------------------------------

    pub async fn get_user_prompt(&self, user_id: i64, prompt_type: &str) -> Result<Option<UserPromptRow>> {
        let row = sqlx::query_as::<_, UserPromptRow>(
            "SELECT user_id, prompt_type, template, temperature FROM user_prompts WHERE user_id = ? AND prompt_type = ?",
        )
        .bind(user_id)
        .bind(prompt_type)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query user prompt")?;
        Ok(row)
    }

    pub async fn set_user_prompt(
        &self,
        user_id: i64,
        prompt_type: &str,
        template: &str,
        temperature: Option<f32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_prompts (user_id, prompt_type, template, temperature) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, prompt_type) DO UPDATE SET template = excluded.template, temperature = excluded.temperature
            "#,
        )
        .bind(user_id)
        .bind(prompt_type)
        .bind(template)
        .bind(temperature)
        .execute(&self.pool)
        .await
        .context("failed to set user prompt")?;
        Ok(())
    }

    pub async fn reset_user_prompt(&self, user_id: i64, prompt_type: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_prompts WHERE user_id = ? AND prompt_type = ?")
            .bind(user_id)
            .bind(prompt_type)
            .execute(&self.pool)
            .await
            .context("failed to reset user prompt")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let pool = common::init_db_pool(":memory:").await.unwrap();
        Store::open(pool).await.unwrap()
    }

    #[tokio::test]
    async fn add_article_is_idempotent_on_feed_guid() {
        let store = test_store().await;
        let user = store.create_user("alice").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();

        let item = NewArticle {
            guid: "g1".to_string(),
            title: "T".to_string(),
            url: "https://x/1".to_string(),
            ..Default::default()
        };

        let first = store.add_article(feed.id, &item).await.unwrap();
        assert!(first.created);

        let second = store.add_article(feed.id, &item).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.article_id, second.article_id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn scenario_1_subscribe_and_first_poll() {
        let store = test_store().await;
        let user = store.create_user("user1").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();

        let item = NewArticle {
            guid: "g1".to_string(),
            title: "T".to_string(),
            url: "https://x/1".to_string(),
            ..Default::default()
        };
        store.add_article(feed.id, &item).await.unwrap();

        let feeds = store.list_feeds_for_user(user.id).await.unwrap();
        assert_eq!(feeds.len(), 1);

        let unread = store.get_unread_articles(user.id, None, false, 50, 0).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "T");
    }

    #[tokio::test]
    async fn scenario_2_security_rejection_hides_from_interest_ranking() {
        let store = test_store().await;
        let user = store.create_user("user1").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();

        let item = NewArticle {
            guid: "g1".to_string(),
            title: "T".to_string(),
            url: "https://x/1".to_string(),
            ..Default::default()
        };
        let outcome = store.add_article(feed.id, &item).await.unwrap();

        // security_score=2 < threshold(7) -> interest forced to 0.0 (I5)
        store
            .upsert_read_state(user.id, outcome.article_id, false, Some(0.0), Some(2.0), Utc::now())
            .await
            .unwrap();

        let unread = store.get_unread_articles(user.id, None, false, 50, 0).await.unwrap();
        assert_eq!(unread.len(), 1, "article stays in unread listing");

        let candidates = store
            .candidate_articles_by_interest_score(user.id, 8.0)
            .await
            .unwrap();
        assert!(candidates.is_empty(), "interest_score==0 excludes it from ranking");
    }

    #[tokio::test]
    async fn scenario_5_orphan_cleanup() {
        let store = test_store().await;
        let user1 = store.create_user("user1").await.unwrap();
        let user2 = store.create_user("user2").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();

        store.add_subscription(user1.id, feed.id).await.unwrap();
        store.add_subscription(user2.id, feed.id).await.unwrap();

        let item = NewArticle {
            guid: "g1".to_string(),
            title: "T".to_string(),
            url: "https://x/1".to_string(),
            ..Default::default()
        };
        let outcome = store.add_article(feed.id, &item).await.unwrap();

        store.remove_subscription(user1.id, feed.id).await.unwrap();
        let deleted = store.delete_feed_if_orphaned(feed.id).await.unwrap();
        assert!(!deleted, "feed still has a subscriber");
        assert!(store.get_feed(feed.id).await.unwrap().is_some());
        assert!(store.get_article(outcome.article_id).await.unwrap().is_some());

        store.remove_subscription(user2.id, feed.id).await.unwrap();
        let deleted = store.delete_feed_if_orphaned(feed.id).await.unwrap();
        assert!(deleted, "last subscriber removed");
        assert!(store.get_feed(feed.id).await.unwrap().is_none());
        assert!(
            store.get_article(outcome.article_id).await.unwrap().is_none(),
            "article cascades with its feed"
        );
    }

    #[tokio::test]
    async fn upsert_read_state_preserves_scores_when_none_passed() {
        let store = test_store().await;
        let user = store.create_user("u").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        let outcome = store
            .add_article(
                feed.id,
                &NewArticle {
                    guid: "g".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .upsert_read_state(user.id, outcome.article_id, false, Some(9.0), Some(8.0), Utc::now())
            .await
            .unwrap();

        // Mark read without touching scores.
        store
            .upsert_read_state(user.id, outcome.article_id, true, None, None, Utc::now())
            .await
            .unwrap();

        let rs = store.get_read_state(user.id, outcome.article_id).await.unwrap().unwrap();
        assert!(rs.read);
        assert_eq!(rs.interest_score, Some(9.0));
        assert_eq!(rs.security_score, Some(8.0));
        assert!(rs.read_at.is_some());
    }

    #[tokio::test]
    async fn prompt_security_type_round_trips_like_any_other_key_at_store_level() {
        // The Store itself has no notion of "security is special" (I7 is
        // enforced by the Engine); this documents that the guard lives one
        // layer up.
        let store = test_store().await;
        let user = store.create_user("u").await.unwrap();
        store
            .set_user_prompt(user.id, "security", "ignored at store layer", None)
            .await
            .unwrap();
        let row = store.get_user_prompt(user.id, "security").await.unwrap();
        assert!(row.is_some());
    }
}
