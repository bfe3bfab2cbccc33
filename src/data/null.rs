//! No-op storage backend
//!
//! Reads find nothing, writes succeed and are discarded. Selected with
//! `null://` for dry runs and for measuring the engine without storage cost.

use async_trait::async_trait;

use super::models::*;
use super::store::*;
use crate::error::Result;

#[derive(Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl AccountsDatabase for NullStore {
    async fn get_account_by_id(&self, _id: &str) -> Result<Option<Account>> {
        Ok(None)
    }

    async fn get_account_by_name(&self, _name: &str) -> Result<Option<Account>> {
        Ok(None)
    }

    async fn add_account(&self, _account: &Account) -> Result<()> {
        Ok(())
    }

    async fn update_account(&self, _account: &Account) -> Result<()> {
        Ok(())
    }

    async fn remove_account(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn scan_accounts(&self, _range: TimeRange, _f: ScanFn<'_, Account>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PostsDatabase for NullStore {
    async fn get_post_by_id(&self, _id: &str) -> Result<Option<Post>> {
        Ok(None)
    }

    async fn add_post(&self, _post: &Post) -> Result<()> {
        Ok(())
    }

    async fn update_post(&self, _post: &Post) -> Result<()> {
        Ok(())
    }

    async fn remove_post(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn scan_posts(&self, _range: TimeRange, _f: ScanFn<'_, Post>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FollowersDatabase for NullStore {
    async fn get_follower(&self, _account_id: &str, _address: &str) -> Result<Option<Follower>> {
        Ok(None)
    }

    async fn add_follower(&self, _follower: &Follower) -> Result<()> {
        Ok(())
    }

    async fn remove_follower(&self, _account_id: &str, _address: &str) -> Result<bool> {
        Ok(false)
    }

    async fn followers_for_account(&self, _account_id: &str) -> Result<Vec<Follower>> {
        Ok(Vec::new())
    }

    async fn count_followers(&self, _account_id: &str) -> Result<u64> {
        Ok(0)
    }

    async fn scan_followers(&self, _range: TimeRange, _f: ScanFn<'_, Follower>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FollowingDatabase for NullStore {
    async fn get_following(&self, _account_id: &str, _address: &str) -> Result<Option<Following>> {
        Ok(None)
    }

    async fn add_following(&self, _following: &Following) -> Result<()> {
        Ok(())
    }

    async fn remove_following(&self, _account_id: &str, _address: &str) -> Result<bool> {
        Ok(false)
    }

    async fn following_for_account(&self, _account_id: &str) -> Result<Vec<Following>> {
        Ok(Vec::new())
    }

    async fn count_following(&self, _account_id: &str) -> Result<u64> {
        Ok(0)
    }

    async fn scan_following(&self, _range: TimeRange, _f: ScanFn<'_, Following>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl NotesDatabase for NullStore {
    async fn get_note_by_id(&self, _id: &str) -> Result<Option<Note>> {
        Ok(None)
    }

    async fn get_note_by_note_id(
        &self,
        _note_id: &str,
        _author_address: &str,
    ) -> Result<Option<Note>> {
        Ok(None)
    }

    async fn add_note(&self, _note: &Note) -> Result<()> {
        Ok(())
    }

    async fn update_note(&self, _note: &Note) -> Result<()> {
        Ok(())
    }

    async fn remove_note(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn scan_notes(&self, _range: TimeRange, _f: ScanFn<'_, Note>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TagsDatabase for NullStore {
    async fn add_tag(&self, _tag: &Tag) -> Result<()> {
        Ok(())
    }

    async fn tags_for_post(&self, _post_id: &str) -> Result<Vec<Tag>> {
        Ok(Vec::new())
    }

    async fn remove_tag(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn scan_tags(&self, _range: TimeRange, _f: ScanFn<'_, Tag>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DeliveriesDatabase for NullStore {
    async fn get_delivery_by_id(&self, _id: &str) -> Result<Option<Delivery>> {
        Ok(None)
    }

    async fn add_delivery(&self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }

    async fn count_delivery_attempts(&self, _activity_id: &str, _recipient: &str) -> Result<u32> {
        Ok(0)
    }

    async fn has_successful_delivery(&self, _activity_id: &str, _recipient: &str) -> Result<bool> {
        Ok(false)
    }

    async fn deliveries_for_activity(&self, _activity_id: &str) -> Result<Vec<Delivery>> {
        Ok(Vec::new())
    }

    async fn scan_deliveries(&self, _range: TimeRange, _f: ScanFn<'_, Delivery>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ActivitiesDatabase for NullStore {
    async fn get_activity_by_id(&self, _id: &str) -> Result<Option<Activity>> {
        Ok(None)
    }

    async fn get_activity_by_activity_pub_id(
        &self,
        _activity_pub_id: &str,
    ) -> Result<Option<Activity>> {
        Ok(None)
    }

    async fn latest_activity(
        &self,
        _account_id: &str,
        _kind: ActivityKind,
        _kind_id: &str,
    ) -> Result<Option<Activity>> {
        Ok(None)
    }

    async fn add_activity(&self, _activity: &Activity) -> Result<()> {
        Ok(())
    }

    async fn remove_activity(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn scan_activities(&self, _range: TimeRange, _f: ScanFn<'_, Activity>) -> Result<()> {
        Ok(())
    }
}
