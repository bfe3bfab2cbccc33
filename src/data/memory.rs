//! In-memory storage backend
//!
//! Process-local maps behind `tokio::sync::RwLock`, enforcing the same
//! uniqueness rules as the SQLite schema. Used by tests and `memory://`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::*;
use super::store::*;
use crate::error::{AppError, Result};

/// Map-backed store for every entity family
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    posts: RwLock<HashMap<String, Post>>,
    followers: RwLock<HashMap<String, Follower>>,
    following: RwLock<HashMap<String, Following>>,
    notes: RwLock<HashMap<String, Note>>,
    tags: RwLock<HashMap<String, Tag>>,
    deliveries: RwLock<HashMap<String, Delivery>>,
    activities: RwLock<HashMap<String, Activity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Snapshot rows in `range`, oldest first, then feed them to `f` outside the lock
async fn scan_map<T, K>(
    map: &RwLock<HashMap<String, T>>,
    range: TimeRange,
    created_at: K,
    f: ScanFn<'_, T>,
) -> Result<()>
where
    T: Clone + Send + Sync,
    K: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    let mut rows: Vec<T> = {
        let map = map.read().await;
        map.values()
            .filter(|row| range.contains(&created_at(row)))
            .cloned()
            .collect()
    };
    rows.sort_by_key(|row| created_at(row));

    for row in rows {
        f(row)?;
    }
    Ok(())
}

fn duplicate_id(what: &str, id: &str) -> AppError {
    AppError::Conflict(format!("{} {} already exists", what, id))
}

// =============================================================================
// Accounts
// =============================================================================

#[async_trait]
impl AccountsDatabase for MemoryStore {
    async fn get_account_by_id(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.name == name).cloned())
    }

    async fn add_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(duplicate_id("account", &account.id));
        }
        if accounts.values().any(|a| a.name == account.name) {
            return Err(AppError::Conflict("account already exists".to_string()));
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let existing = accounts
            .get_mut(&account.id)
            .ok_or_else(|| AppError::NotFound(format!("account {}", account.id)))?;
        existing.display_name = account.display_name.clone();
        existing.summary = account.summary.clone();
        existing.public_key_uri = account.public_key_uri.clone();
        existing.private_key_uri = account.private_key_uri.clone();
        existing.updated_at = account.updated_at;
        Ok(())
    }

    async fn remove_account(&self, id: &str) -> Result<()> {
        self.accounts.write().await.remove(id);
        Ok(())
    }

    async fn scan_accounts(&self, range: TimeRange, f: ScanFn<'_, Account>) -> Result<()> {
        scan_map(&self.accounts, range, |a: &Account| a.created_at, f).await
    }
}

// =============================================================================
// Posts
// =============================================================================

#[async_trait]
impl PostsDatabase for MemoryStore {
    async fn get_post_by_id(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.posts.read().await.get(id).cloned())
    }

    async fn add_post(&self, post: &Post) -> Result<()> {
        let mut posts = self.posts.write().await;
        if posts.contains_key(&post.id) {
            return Err(duplicate_id("post", &post.id));
        }
        posts.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        if let Some(existing) = self.posts.write().await.get_mut(&post.id) {
            existing.content = post.content.clone();
            existing.in_reply_to = post.in_reply_to.clone();
            existing.updated_at = post.updated_at;
        }
        Ok(())
    }

    async fn remove_post(&self, id: &str) -> Result<()> {
        self.posts.write().await.remove(id);
        Ok(())
    }

    async fn scan_posts(&self, range: TimeRange, f: ScanFn<'_, Post>) -> Result<()> {
        scan_map(&self.posts, range, |p: &Post| p.created_at, f).await
    }
}

// =============================================================================
// Followers / Following
// =============================================================================

#[async_trait]
impl FollowersDatabase for MemoryStore {
    async fn get_follower(&self, account_id: &str, address: &str) -> Result<Option<Follower>> {
        let followers = self.followers.read().await;
        Ok(followers
            .values()
            .find(|f| f.account_id == account_id && f.address == address)
            .cloned())
    }

    async fn add_follower(&self, follower: &Follower) -> Result<()> {
        let mut followers = self.followers.write().await;
        if followers
            .values()
            .any(|f| f.account_id == follower.account_id && f.address == follower.address)
        {
            return Err(AppError::Conflict("follower already exists".to_string()));
        }
        if followers.contains_key(&follower.id) {
            return Err(duplicate_id("follower", &follower.id));
        }
        followers.insert(follower.id.clone(), follower.clone());
        Ok(())
    }

    async fn remove_follower(&self, account_id: &str, address: &str) -> Result<bool> {
        let mut followers = self.followers.write().await;
        let before = followers.len();
        followers.retain(|_, f| !(f.account_id == account_id && f.address == address));
        Ok(followers.len() < before)
    }

    async fn followers_for_account(&self, account_id: &str) -> Result<Vec<Follower>> {
        let followers = self.followers.read().await;
        let mut matching: Vec<Follower> = followers
            .values()
            .filter(|f| f.account_id == account_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn count_followers(&self, account_id: &str) -> Result<u64> {
        let followers = self.followers.read().await;
        Ok(followers.values().filter(|f| f.account_id == account_id).count() as u64)
    }

    async fn scan_followers(&self, range: TimeRange, f: ScanFn<'_, Follower>) -> Result<()> {
        scan_map(&self.followers, range, |row: &Follower| row.created_at, f).await
    }
}

#[async_trait]
impl FollowingDatabase for MemoryStore {
    async fn get_following(&self, account_id: &str, address: &str) -> Result<Option<Following>> {
        let following = self.following.read().await;
        Ok(following
            .values()
            .find(|f| f.account_id == account_id && f.address == address)
            .cloned())
    }

    async fn add_following(&self, following: &Following) -> Result<()> {
        let mut edges = self.following.write().await;
        if edges
            .values()
            .any(|f| f.account_id == following.account_id && f.address == following.address)
        {
            return Err(AppError::Conflict("following already exists".to_string()));
        }
        if edges.contains_key(&following.id) {
            return Err(duplicate_id("following", &following.id));
        }
        edges.insert(following.id.clone(), following.clone());
        Ok(())
    }

    async fn remove_following(&self, account_id: &str, address: &str) -> Result<bool> {
        let mut edges = self.following.write().await;
        let before = edges.len();
        edges.retain(|_, f| !(f.account_id == account_id && f.address == address));
        Ok(edges.len() < before)
    }

    async fn following_for_account(&self, account_id: &str) -> Result<Vec<Following>> {
        let edges = self.following.read().await;
        let mut matching: Vec<Following> = edges
            .values()
            .filter(|f| f.account_id == account_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn count_following(&self, account_id: &str) -> Result<u64> {
        let edges = self.following.read().await;
        Ok(edges.values().filter(|f| f.account_id == account_id).count() as u64)
    }

    async fn scan_following(&self, range: TimeRange, f: ScanFn<'_, Following>) -> Result<()> {
        scan_map(&self.following, range, |row: &Following| row.created_at, f).await
    }
}

// =============================================================================
// Notes / Tags
// =============================================================================

#[async_trait]
impl NotesDatabase for MemoryStore {
    async fn get_note_by_id(&self, id: &str) -> Result<Option<Note>> {
        Ok(self.notes.read().await.get(id).cloned())
    }

    async fn get_note_by_note_id(
        &self,
        note_id: &str,
        author_address: &str,
    ) -> Result<Option<Note>> {
        let notes = self.notes.read().await;
        Ok(notes
            .values()
            .find(|n| n.note_id == note_id && n.author_address == author_address)
            .cloned())
    }

    async fn add_note(&self, note: &Note) -> Result<()> {
        let mut notes = self.notes.write().await;
        if notes
            .values()
            .any(|n| n.note_id == note.note_id && n.author_address == note.author_address)
        {
            return Err(AppError::Conflict("note already exists".to_string()));
        }
        if notes.contains_key(&note.id) {
            return Err(duplicate_id("note", &note.id));
        }
        notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn update_note(&self, note: &Note) -> Result<()> {
        if let Some(existing) = self.notes.write().await.get_mut(&note.id) {
            existing.body = note.body.clone();
            existing.updated_at = note.updated_at;
        }
        Ok(())
    }

    async fn remove_note(&self, id: &str) -> Result<()> {
        self.notes.write().await.remove(id);
        Ok(())
    }

    async fn scan_notes(&self, range: TimeRange, f: ScanFn<'_, Note>) -> Result<()> {
        scan_map(&self.notes, range, |n: &Note| n.created_at, f).await
    }
}

#[async_trait]
impl TagsDatabase for MemoryStore {
    async fn add_tag(&self, tag: &Tag) -> Result<()> {
        let mut tags = self.tags.write().await;
        if tags.contains_key(&tag.id) {
            return Err(duplicate_id("tag", &tag.id));
        }
        tags.insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    async fn tags_for_post(&self, post_id: &str) -> Result<Vec<Tag>> {
        let tags = self.tags.read().await;
        let mut matching: Vec<Tag> = tags
            .values()
            .filter(|t| t.post_id == post_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn remove_tag(&self, id: &str) -> Result<()> {
        self.tags.write().await.remove(id);
        Ok(())
    }

    async fn scan_tags(&self, range: TimeRange, f: ScanFn<'_, Tag>) -> Result<()> {
        scan_map(&self.tags, range, |t: &Tag| t.created_at, f).await
    }
}

// =============================================================================
// Deliveries / Activities
// =============================================================================

#[async_trait]
impl DeliveriesDatabase for MemoryStore {
    async fn get_delivery_by_id(&self, id: &str) -> Result<Option<Delivery>> {
        Ok(self.deliveries.read().await.get(id).cloned())
    }

    async fn add_delivery(&self, delivery: &Delivery) -> Result<()> {
        let mut deliveries = self.deliveries.write().await;
        if deliveries.contains_key(&delivery.id) {
            return Err(duplicate_id("delivery", &delivery.id));
        }
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn count_delivery_attempts(&self, activity_id: &str, recipient: &str) -> Result<u32> {
        let deliveries = self.deliveries.read().await;
        let count = deliveries
            .values()
            .filter(|d| d.activity_id == activity_id && d.recipient == recipient)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn has_successful_delivery(&self, activity_id: &str, recipient: &str) -> Result<bool> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .any(|d| d.activity_id == activity_id && d.recipient == recipient && d.success))
    }

    async fn deliveries_for_activity(&self, activity_id: &str) -> Result<Vec<Delivery>> {
        let deliveries = self.deliveries.read().await;
        let mut matching: Vec<Delivery> = deliveries
            .values()
            .filter(|d| d.activity_id == activity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn scan_deliveries(&self, range: TimeRange, f: ScanFn<'_, Delivery>) -> Result<()> {
        scan_map(&self.deliveries, range, |d: &Delivery| d.created_at, f).await
    }
}

#[async_trait]
impl ActivitiesDatabase for MemoryStore {
    async fn get_activity_by_id(&self, id: &str) -> Result<Option<Activity>> {
        Ok(self.activities.read().await.get(id).cloned())
    }

    async fn get_activity_by_activity_pub_id(
        &self,
        activity_pub_id: &str,
    ) -> Result<Option<Activity>> {
        let activities = self.activities.read().await;
        Ok(activities
            .values()
            .find(|a| a.activity_pub_id == activity_pub_id)
            .cloned())
    }

    async fn latest_activity(
        &self,
        account_id: &str,
        kind: ActivityKind,
        kind_id: &str,
    ) -> Result<Option<Activity>> {
        let activities = self.activities.read().await;
        Ok(activities
            .values()
            .filter(|a| a.account_id == account_id && a.kind == kind && a.kind_id == kind_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn add_activity(&self, activity: &Activity) -> Result<()> {
        let mut activities = self.activities.write().await;
        if activities
            .values()
            .any(|a| a.activity_pub_id == activity.activity_pub_id)
        {
            return Err(AppError::Conflict("activity already exists".to_string()));
        }
        if activities.contains_key(&activity.id) {
            return Err(duplicate_id("activity", &activity.id));
        }
        activities.insert(activity.id.clone(), activity.clone());
        Ok(())
    }

    async fn remove_activity(&self, id: &str) -> Result<()> {
        self.activities.write().await.remove(id);
        Ok(())
    }

    async fn scan_activities(&self, range: TimeRange, f: ScanFn<'_, Activity>) -> Result<()> {
        scan_map(&self.activities, range, |a: &Activity| a.created_at, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn follower(account_id: &str, address: &str) -> Follower {
        Follower {
            id: EntityId::new().0,
            account_id: account_id.to_string(),
            address: address.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn follower_edges_are_unique_per_account_and_address() {
        let store = MemoryStore::new();
        store
            .add_follower(&follower("a1", "bob@remote.example"))
            .await
            .expect("first edge");

        let duplicate = store
            .add_follower(&follower("a1", "bob@remote.example"))
            .await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        store
            .add_follower(&follower("a2", "bob@remote.example"))
            .await
            .expect("other account may have the same follower");
        assert_eq!(store.count_followers("a1").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn remove_follower_reports_whether_an_edge_existed() {
        let store = MemoryStore::new();
        store
            .add_follower(&follower("a1", "bob@remote.example"))
            .await
            .expect("edge");

        assert!(
            store
                .remove_follower("a1", "bob@remote.example")
                .await
                .expect("remove")
        );
        assert!(
            !store
                .remove_follower("a1", "bob@remote.example")
                .await
                .expect("remove again")
        );
    }

    #[tokio::test]
    async fn scan_visits_rows_oldest_first_and_stops_on_error() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (offset, name) in [(2, "c"), (0, "a"), (1, "b")] {
            let mut row = follower("a1", &format!("{name}@remote.example"));
            row.created_at = base + chrono::Duration::seconds(offset);
            store.add_follower(&row).await.expect("edge");
        }

        let mut seen = Vec::new();
        store
            .scan_followers(TimeRange::all(), &mut |row| {
                seen.push(row.address);
                Ok(())
            })
            .await
            .expect("scan");
        assert_eq!(
            seen,
            vec!["a@remote.example", "b@remote.example", "c@remote.example"]
        );

        let mut visited = 0;
        let result = store
            .scan_followers(TimeRange::all(), &mut |_| {
                visited += 1;
                Err(AppError::Persistence("stop".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[tokio::test]
    async fn activity_pub_ids_are_unique() {
        let store = MemoryStore::new();
        let activity = Activity {
            id: EntityId::new().0,
            activity_pub_id: "https://local.example/activities/1".to_string(),
            kind: ActivityKind::Post,
            kind_id: "p1".to_string(),
            account_id: "a1".to_string(),
            body: "{}".to_string(),
            created_at: Utc::now(),
        };
        store.add_activity(&activity).await.expect("first");

        let mut copy = activity.clone();
        copy.id = EntityId::new().0;
        assert!(matches!(
            store.add_activity(&copy).await,
            Err(AppError::Conflict(_))
        ));
    }
}
