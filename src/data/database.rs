//! SQLite storage backend
//!
//! Implements every storage contract on a single SQLx pool.
//! Schema lives in `migrations/` and is applied on connect.

use std::path::Path;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Sqlite, SqlitePool};

use super::models::*;
use super::store::*;
use crate::error::{AppError, Result};
use crate::registry::uri_path;

/// Map a unique-constraint violation to `Conflict`, everything else to `Database`
fn map_insert_error(what: &str, error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            AppError::Conflict(format!("{} already exists", what))
        }
        _ => AppError::Database(error),
    }
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open the database named by a `sqlite://<path>` URI
    ///
    /// `sqlite://:memory:` opens a private in-memory database.
    pub async fn open(uri: &str) -> Result<Self> {
        let path = uri_path(uri);
        if path.is_empty() {
            return Err(AppError::Config(format!(
                "sqlite URI needs a path: {}",
                uri
            )));
        }

        if path == ":memory:" {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;
            return Self::migrate(pool).await;
        }

        Self::connect(Path::new(path)).await
    }

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");
        Ok(Self { pool })
    }

    /// Stream rows of `table` created within `range`, oldest first
    async fn scan_table<T>(&self, table: &str, range: TimeRange, f: ScanFn<'_, T>) -> Result<()>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE (? IS NULL OR created_at >= ?) AND (? IS NULL OR created_at < ?) ORDER BY created_at",
            table
        );
        let mut rows = sqlx::query_as::<_, T>(&sql)
            .bind(range.start)
            .bind(range.start)
            .bind(range.end)
            .bind(range.end)
            .fetch(&self.pool);

        while let Some(row) = rows.try_next().await? {
            f(row)?;
        }
        Ok(())
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[async_trait]
impl AccountsDatabase for Database {
    async fn get_account_by_id(&self, id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn add_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, name, display_name, summary, public_key_uri, private_key_uri,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(&account.display_name)
        .bind(&account.summary)
        .bind(&account.public_key_uri)
        .bind(&account.private_key_uri)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("account", e))?;

        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                display_name = ?, summary = ?, public_key_uri = ?, private_key_uri = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.display_name)
        .bind(&account.summary)
        .bind(&account.public_key_uri)
        .bind(&account.private_key_uri)
        .bind(account.updated_at)
        .bind(&account.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("account {}", account.id)));
        }
        Ok(())
    }

    async fn remove_account(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_accounts(&self, range: TimeRange, f: ScanFn<'_, Account>) -> Result<()> {
        self.scan_table("accounts", range, f).await
    }
}

// =============================================================================
// Posts
// =============================================================================

#[async_trait]
impl PostsDatabase for Database {
    async fn get_post_by_id(&self, id: &str) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    async fn add_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            "INSERT INTO posts (id, account_id, content, in_reply_to, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&post.id)
        .bind(&post.account_id)
        .bind(&post.content)
        .bind(&post.in_reply_to)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("post", e))?;
        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        sqlx::query("UPDATE posts SET content = ?, in_reply_to = ?, updated_at = ? WHERE id = ?")
            .bind(&post.content)
            .bind(&post.in_reply_to)
            .bind(post.updated_at)
            .bind(&post.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_post(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_posts(&self, range: TimeRange, f: ScanFn<'_, Post>) -> Result<()> {
        self.scan_table("posts", range, f).await
    }
}

// =============================================================================
// Followers / Following
// =============================================================================

#[async_trait]
impl FollowersDatabase for Database {
    async fn get_follower(&self, account_id: &str, address: &str) -> Result<Option<Follower>> {
        let follower = sqlx::query_as::<_, Follower>(
            "SELECT * FROM followers WHERE account_id = ? AND address = ?",
        )
        .bind(account_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follower)
    }

    async fn add_follower(&self, follower: &Follower) -> Result<()> {
        sqlx::query("INSERT INTO followers (id, account_id, address, created_at) VALUES (?, ?, ?, ?)")
            .bind(&follower.id)
            .bind(&follower.account_id)
            .bind(&follower.address)
            .bind(follower.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error("follower", e))?;
        Ok(())
    }

    async fn remove_follower(&self, account_id: &str, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM followers WHERE account_id = ? AND address = ?")
            .bind(account_id)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn followers_for_account(&self, account_id: &str) -> Result<Vec<Follower>> {
        let followers = sqlx::query_as::<_, Follower>(
            "SELECT * FROM followers WHERE account_id = ? ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(followers)
    }

    async fn count_followers(&self, account_id: &str) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM followers WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn scan_followers(&self, range: TimeRange, f: ScanFn<'_, Follower>) -> Result<()> {
        self.scan_table("followers", range, f).await
    }
}

#[async_trait]
impl FollowingDatabase for Database {
    async fn get_following(&self, account_id: &str, address: &str) -> Result<Option<Following>> {
        let following = sqlx::query_as::<_, Following>(
            "SELECT * FROM following WHERE account_id = ? AND address = ?",
        )
        .bind(account_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(following)
    }

    async fn add_following(&self, following: &Following) -> Result<()> {
        sqlx::query("INSERT INTO following (id, account_id, address, created_at) VALUES (?, ?, ?, ?)")
            .bind(&following.id)
            .bind(&following.account_id)
            .bind(&following.address)
            .bind(following.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error("following", e))?;
        Ok(())
    }

    async fn remove_following(&self, account_id: &str, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM following WHERE account_id = ? AND address = ?")
            .bind(account_id)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn following_for_account(&self, account_id: &str) -> Result<Vec<Following>> {
        let following = sqlx::query_as::<_, Following>(
            "SELECT * FROM following WHERE account_id = ? ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(following)
    }

    async fn count_following(&self, account_id: &str) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM following WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn scan_following(&self, range: TimeRange, f: ScanFn<'_, Following>) -> Result<()> {
        self.scan_table("following", range, f).await
    }
}

// =============================================================================
// Notes / Tags
// =============================================================================

#[async_trait]
impl NotesDatabase for Database {
    async fn get_note_by_id(&self, id: &str) -> Result<Option<Note>> {
        let note = sqlx::query_as::<_, Note>("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(note)
    }

    async fn get_note_by_note_id(
        &self,
        note_id: &str,
        author_address: &str,
    ) -> Result<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(
            "SELECT * FROM notes WHERE note_id = ? AND author_address = ?",
        )
        .bind(note_id)
        .bind(author_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(note)
    }

    async fn add_note(&self, note: &Note) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notes (
                id, account_id, note_id, author_address, body, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&note.id)
        .bind(&note.account_id)
        .bind(&note.note_id)
        .bind(&note.author_address)
        .bind(&note.body)
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("note", e))?;
        Ok(())
    }

    async fn update_note(&self, note: &Note) -> Result<()> {
        sqlx::query("UPDATE notes SET body = ?, updated_at = ? WHERE id = ?")
            .bind(&note.body)
            .bind(note.updated_at)
            .bind(&note.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_note(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_notes(&self, range: TimeRange, f: ScanFn<'_, Note>) -> Result<()> {
        self.scan_table("notes", range, f).await
    }
}

#[async_trait]
impl TagsDatabase for Database {
    async fn add_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query(
            "INSERT INTO tags (id, post_id, account_id, name, href, kind, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tag.id)
        .bind(&tag.post_id)
        .bind(&tag.account_id)
        .bind(&tag.name)
        .bind(&tag.href)
        .bind(&tag.kind)
        .bind(tag.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("tag", e))?;
        Ok(())
    }

    async fn tags_for_post(&self, post_id: &str) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE post_id = ? ORDER BY created_at")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    async fn remove_tag(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_tags(&self, range: TimeRange, f: ScanFn<'_, Tag>) -> Result<()> {
        self.scan_table("tags", range, f).await
    }
}

// =============================================================================
// Deliveries / Activities
// =============================================================================

#[async_trait]
impl DeliveriesDatabase for Database {
    async fn get_delivery_by_id(&self, id: &str) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delivery)
    }

    async fn add_delivery(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (
                id, activity_id, recipient, inbox, created_at, completed_at, success, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.activity_id)
        .bind(&delivery.recipient)
        .bind(&delivery.inbox)
        .bind(delivery.created_at)
        .bind(delivery.completed_at)
        .bind(delivery.success)
        .bind(&delivery.error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("delivery", e))?;
        Ok(())
    }

    async fn count_delivery_attempts(&self, activity_id: &str, recipient: &str) -> Result<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM deliveries WHERE activity_id = ? AND recipient = ?",
        )
        .bind(activity_id)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn has_successful_delivery(&self, activity_id: &str, recipient: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM deliveries WHERE activity_id = ? AND recipient = ? AND success = 1)",
        )
        .bind(activity_id)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    async fn deliveries_for_activity(&self, activity_id: &str) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            "SELECT * FROM deliveries WHERE activity_id = ? ORDER BY created_at",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }

    async fn scan_deliveries(&self, range: TimeRange, f: ScanFn<'_, Delivery>) -> Result<()> {
        self.scan_table("deliveries", range, f).await
    }
}

#[async_trait]
impl ActivitiesDatabase for Database {
    async fn get_activity_by_id(&self, id: &str) -> Result<Option<Activity>> {
        let activity = sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(activity)
    }

    async fn get_activity_by_activity_pub_id(
        &self,
        activity_pub_id: &str,
    ) -> Result<Option<Activity>> {
        let activity =
            sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE activity_pub_id = ?")
                .bind(activity_pub_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(activity)
    }

    async fn latest_activity(
        &self,
        account_id: &str,
        kind: ActivityKind,
        kind_id: &str,
    ) -> Result<Option<Activity>> {
        let activity = sqlx::query_as::<_, Activity>(
            "SELECT * FROM activities WHERE account_id = ? AND kind = ? AND kind_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(kind)
        .bind(kind_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(activity)
    }

    async fn add_activity(&self, activity: &Activity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (
                id, activity_pub_id, kind, kind_id, account_id, body, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.activity_pub_id)
        .bind(activity.kind)
        .bind(&activity.kind_id)
        .bind(&activity.account_id)
        .bind(&activity.body)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("activity", e))?;
        Ok(())
    }

    async fn remove_activity(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM activities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_activities(&self, range: TimeRange, f: ScanFn<'_, Activity>) -> Result<()> {
        self.scan_table("activities", range, f).await
    }
}
