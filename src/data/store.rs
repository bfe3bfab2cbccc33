//! Storage contracts
//!
//! One trait per entity family. Backends implement all of them and are
//! bundled into a cloneable [`Storage`] of trait objects.
//!
//! Uniqueness rules every backend enforces (violations return
//! `AppError::Conflict`):
//! - account name
//! - (account, address) for followers and following
//! - (note id, author address) for notes
//! - activity_pub_id for activities

use std::sync::Arc;

use async_trait::async_trait;

use super::models::*;
use crate::error::Result;
use crate::registry::Registry;

/// Callback invoked once per scanned row; returning an error stops the scan
pub type ScanFn<'a, T> = &'a mut (dyn FnMut(T) -> Result<()> + Send);

#[async_trait]
pub trait AccountsDatabase: Send + Sync {
    async fn get_account_by_id(&self, id: &str) -> Result<Option<Account>>;
    async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>>;
    async fn add_account(&self, account: &Account) -> Result<()>;
    async fn update_account(&self, account: &Account) -> Result<()>;
    async fn remove_account(&self, id: &str) -> Result<()>;
    async fn scan_accounts(&self, range: TimeRange, f: ScanFn<'_, Account>) -> Result<()>;
}

#[async_trait]
pub trait PostsDatabase: Send + Sync {
    async fn get_post_by_id(&self, id: &str) -> Result<Option<Post>>;
    async fn add_post(&self, post: &Post) -> Result<()>;
    async fn update_post(&self, post: &Post) -> Result<()>;
    async fn remove_post(&self, id: &str) -> Result<()>;
    async fn scan_posts(&self, range: TimeRange, f: ScanFn<'_, Post>) -> Result<()>;
}

#[async_trait]
pub trait FollowersDatabase: Send + Sync {
    async fn get_follower(&self, account_id: &str, address: &str) -> Result<Option<Follower>>;
    async fn add_follower(&self, follower: &Follower) -> Result<()>;
    /// Returns whether an edge was removed
    async fn remove_follower(&self, account_id: &str, address: &str) -> Result<bool>;
    async fn followers_for_account(&self, account_id: &str) -> Result<Vec<Follower>>;
    async fn count_followers(&self, account_id: &str) -> Result<u64>;
    async fn scan_followers(&self, range: TimeRange, f: ScanFn<'_, Follower>) -> Result<()>;
}

#[async_trait]
pub trait FollowingDatabase: Send + Sync {
    async fn get_following(&self, account_id: &str, address: &str) -> Result<Option<Following>>;
    async fn add_following(&self, following: &Following) -> Result<()>;
    /// Returns whether an edge was removed
    async fn remove_following(&self, account_id: &str, address: &str) -> Result<bool>;
    async fn following_for_account(&self, account_id: &str) -> Result<Vec<Following>>;
    async fn count_following(&self, account_id: &str) -> Result<u64>;
    async fn scan_following(&self, range: TimeRange, f: ScanFn<'_, Following>) -> Result<()>;
}

#[async_trait]
pub trait NotesDatabase: Send + Sync {
    async fn get_note_by_id(&self, id: &str) -> Result<Option<Note>>;
    async fn get_note_by_note_id(&self, note_id: &str, author_address: &str)
    -> Result<Option<Note>>;
    async fn add_note(&self, note: &Note) -> Result<()>;
    async fn update_note(&self, note: &Note) -> Result<()>;
    async fn remove_note(&self, id: &str) -> Result<()>;
    async fn scan_notes(&self, range: TimeRange, f: ScanFn<'_, Note>) -> Result<()>;
}

#[async_trait]
pub trait TagsDatabase: Send + Sync {
    async fn add_tag(&self, tag: &Tag) -> Result<()>;
    async fn tags_for_post(&self, post_id: &str) -> Result<Vec<Tag>>;
    async fn remove_tag(&self, id: &str) -> Result<()>;
    async fn scan_tags(&self, range: TimeRange, f: ScanFn<'_, Tag>) -> Result<()>;
}

#[async_trait]
pub trait DeliveriesDatabase: Send + Sync {
    async fn get_delivery_by_id(&self, id: &str) -> Result<Option<Delivery>>;
    async fn add_delivery(&self, delivery: &Delivery) -> Result<()>;
    /// Recorded attempts, successful or not, for the pair
    async fn count_delivery_attempts(&self, activity_id: &str, recipient: &str) -> Result<u32>;
    async fn has_successful_delivery(&self, activity_id: &str, recipient: &str) -> Result<bool>;
    async fn deliveries_for_activity(&self, activity_id: &str) -> Result<Vec<Delivery>>;
    async fn scan_deliveries(&self, range: TimeRange, f: ScanFn<'_, Delivery>) -> Result<()>;
}

#[async_trait]
pub trait ActivitiesDatabase: Send + Sync {
    async fn get_activity_by_id(&self, id: &str) -> Result<Option<Activity>>;
    async fn get_activity_by_activity_pub_id(&self, activity_pub_id: &str)
    -> Result<Option<Activity>>;
    /// Most recent activity of `kind` for the account and local object
    async fn latest_activity(
        &self,
        account_id: &str,
        kind: ActivityKind,
        kind_id: &str,
    ) -> Result<Option<Activity>>;
    async fn add_activity(&self, activity: &Activity) -> Result<()>;
    async fn remove_activity(&self, id: &str) -> Result<()>;
    async fn scan_activities(&self, range: TimeRange, f: ScanFn<'_, Activity>) -> Result<()>;
}

/// All storage collaborators
#[derive(Clone)]
pub struct Storage {
    pub accounts: Arc<dyn AccountsDatabase>,
    pub posts: Arc<dyn PostsDatabase>,
    pub followers: Arc<dyn FollowersDatabase>,
    pub following: Arc<dyn FollowingDatabase>,
    pub notes: Arc<dyn NotesDatabase>,
    pub tags: Arc<dyn TagsDatabase>,
    pub deliveries: Arc<dyn DeliveriesDatabase>,
    pub activities: Arc<dyn ActivitiesDatabase>,
}

impl Storage {
    /// Bundle a backend that implements every contract
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AccountsDatabase
            + PostsDatabase
            + FollowersDatabase
            + FollowingDatabase
            + NotesDatabase
            + TagsDatabase
            + DeliveriesDatabase
            + ActivitiesDatabase
            + 'static,
    {
        Self {
            accounts: backend.clone(),
            posts: backend.clone(),
            followers: backend.clone(),
            following: backend.clone(),
            notes: backend.clone(),
            tags: backend.clone(),
            deliveries: backend.clone(),
            activities: backend,
        }
    }
}

async fn open_sqlite(uri: String, _context: ()) -> Result<Storage> {
    let db = super::Database::open(&uri).await?;
    Ok(Storage::from_backend(Arc::new(db)))
}

async fn open_memory(_uri: String, _context: ()) -> Result<Storage> {
    Ok(Storage::from_backend(Arc::new(super::MemoryStore::new())))
}

async fn open_null(_uri: String, _context: ()) -> Result<Storage> {
    Ok(Storage::from_backend(Arc::new(super::NullStore)))
}

/// Registry of storage backends: `sqlite`, `memory`, `null`
pub fn storage_registry() -> Registry<(), Storage> {
    let mut registry = Registry::new("storage");
    registry
        .register("sqlite", open_sqlite)
        .register("memory", open_memory)
        .register("null", open_null);
    registry
}
