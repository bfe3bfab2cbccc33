//! Account service
//!
//! Provisions local accounts and manages the accounts they follow.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use crate::data::secrets::{constant_uri, file_uri, store_secret};
use crate::data::{Account, Activity, ActivityKind, EntityId, Following, Storage};
use crate::error::{AppError, Result};
use crate::federation::{ActivityDispatcher, ActorResolver, builder, generate_keypair, normalize_address};

lazy_static! {
    static ref ACCOUNT_NAME_RE: Regex =
        Regex::new(r"^[a-z0-9_]{1,30}$").expect("account name regex compiles");
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Account service
#[derive(Clone)]
pub struct AccountService {
    storage: Storage,
    resolver: Arc<ActorResolver>,
    dispatcher: ActivityDispatcher,
    base_url: String,
    hostname: String,
    key_dir: Option<PathBuf>,
    key_bits: usize,
    max_attempts: u32,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Storage,
        resolver: Arc<ActorResolver>,
        dispatcher: ActivityDispatcher,
        base_url: impl Into<String>,
        hostname: impl Into<String>,
        key_dir: Option<PathBuf>,
        key_bits: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            storage,
            resolver,
            dispatcher,
            base_url: base_url.into(),
            hostname: hostname.into(),
            key_dir,
            key_bits,
            max_attempts,
        }
    }

    /// Look up a local account by name
    pub async fn get_account(&self, name: &str) -> Result<Account> {
        self.storage
            .accounts
            .get_account_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", name)))
    }

    /// Create a local account with a freshly generated keypair
    ///
    /// # Errors
    /// - `Parse` for names outside `[a-z0-9_]{1,30}`
    /// - `Conflict` when the name is taken
    pub async fn create_account(
        &self,
        name: &str,
        display_name: Option<String>,
        summary: Option<String>,
    ) -> Result<Account> {
        let name = name.trim();
        if !ACCOUNT_NAME_RE.is_match(name) {
            return Err(AppError::Parse(format!("Invalid account name: {}", name)));
        }

        // Fast-path guard before expensive key generation
        if self.storage.accounts.get_account_by_name(name).await?.is_some() {
            return Err(AppError::Conflict(format!("Account {} already exists", name)));
        }

        let bits = self.key_bits;
        let (private_key_pem, public_key_pem) =
            tokio::task::spawn_blocking(move || generate_keypair(bits))
                .await
                .map_err(|e| AppError::Internal(e.into()))??;

        let (private_key_uri, public_key_uri) = match &self.key_dir {
            Some(dir) => {
                let private_uri = file_uri(&dir.join(format!("{}.key.pem", name)));
                let public_uri = file_uri(&dir.join(format!("{}.pub.pem", name)));
                store_secret(&private_uri, &private_key_pem).await?;
                store_secret(&public_uri, &public_key_pem).await?;
                (private_uri, public_uri)
            }
            None => (constant_uri(&private_key_pem), constant_uri(&public_key_pem)),
        };

        let now = Utc::now();
        let account = Account {
            id: EntityId::new().0,
            name: name.to_string(),
            display_name: normalize_optional_text(display_name),
            summary: normalize_optional_text(summary),
            public_key_uri,
            private_key_uri,
            created_at: now,
            updated_at: now,
        };
        self.storage.accounts.add_account(&account).await?;

        tracing::info!(account = %account.name, "Account created");
        Ok(account)
    }

    /// Follow `address` from the local account `name`
    ///
    /// The Following edge is only recorded once the remote inbox accepted
    /// the Follow.
    ///
    /// # Errors
    /// - `Conflict` when already following, or when following itself
    /// - resolution and delivery errors from the dispatcher
    pub async fn follow(&self, name: &str, address: &str) -> Result<Following> {
        let account = self.get_account(name).await?;
        let address = normalize_address(address, &self.hostname)?;
        if address == account.address(&self.hostname) {
            return Err(AppError::Conflict(format!("{} cannot follow itself", address)));
        }
        if self
            .storage
            .following
            .get_following(&account.id, &address)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "{} already follows {}",
                account.name, address
            )));
        }

        let target = self.resolver.retrieve_actor(&address).await?;
        let profile = account.profile_url(&self.base_url);
        let activity = self
            .record_activity(&account, ActivityKind::Follow, &address, |id| {
                builder::follow(id, &profile, &target.id)
            })
            .await?;

        self.dispatcher
            .deliver_activity(&activity, &address, self.max_attempts)
            .await?;

        let following = Following {
            id: EntityId::new().0,
            account_id: account.id.clone(),
            address: address.clone(),
            created_at: Utc::now(),
        };
        self.storage.following.add_following(&following).await?;

        tracing::info!(account = %account.name, following = %address, "Now following");
        Ok(following)
    }

    /// Undo the latest Follow of `address` by `name`
    ///
    /// # Errors
    /// `Conflict` when `name` does not follow `address`
    pub async fn unfollow(&self, name: &str, address: &str) -> Result<()> {
        let account = self.get_account(name).await?;
        let address = normalize_address(address, &self.hostname)?;

        if self
            .storage
            .following
            .get_following(&account.id, &address)
            .await?
            .is_none()
        {
            return Err(AppError::Conflict(format!(
                "{} does not follow {}",
                account.name, address
            )));
        }

        let follow = self
            .storage
            .activities
            .latest_activity(&account.id, ActivityKind::Follow, &address)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Follow of {}", address)))?;
        let follow_body: serde_json::Value = serde_json::from_str(&follow.body)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Stored follow is not JSON: {}", e)))?;

        let profile = account.profile_url(&self.base_url);
        let activity = self
            .record_activity(&account, ActivityKind::Undo, &address, |id| {
                builder::undo(id, &profile, follow_body)
            })
            .await?;

        self.dispatcher
            .deliver_activity(&activity, &address, self.max_attempts)
            .await?;

        self.storage
            .following
            .remove_following(&account.id, &address)
            .await?;

        tracing::info!(account = %account.name, unfollowed = %address, "Stopped following");
        Ok(())
    }

    /// Store an outbound activity whose body is built from its protocol id
    async fn record_activity(
        &self,
        account: &Account,
        kind: ActivityKind,
        kind_id: &str,
        body: impl FnOnce(&str) -> serde_json::Value,
    ) -> Result<Activity> {
        let id = EntityId::new().0;
        let activity_pub_id = format!("{}/activities/{}", account.profile_url(&self.base_url), id);
        let activity = Activity {
            body: body(&activity_pub_id).to_string(),
            id,
            activity_pub_id,
            kind,
            kind_id: kind_id.to_string(),
            account_id: account.id.clone(),
            created_at: Utc::now(),
        };
        self.storage.activities.add_activity(&activity).await?;
        Ok(activity)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::data::secrets::resolve_secret;
    use crate::federation::test_support::{
        FakeRemote, memory_storage, seed_account, test_dispatcher,
    };
    use axum::http::StatusCode;
    use tempfile::TempDir;

    fn service(storage: &Storage, key_dir: Option<PathBuf>) -> AccountService {
        AccountService::new(
            storage.clone(),
            Arc::new(ActorResolver::new(
                reqwest::Client::new(),
                "local.example",
                true,
                Duration::ZERO,
            )),
            test_dispatcher(storage),
            "http://local.example",
            "local.example",
            key_dir,
            1024,
            3,
        )
    }

    #[tokio::test]
    async fn create_account_stores_keys_under_key_dir() {
        let dir = TempDir::new().unwrap();
        let storage = memory_storage();

        let account = service(&storage, Some(dir.path().to_path_buf()))
            .create_account("alice", Some("  Alice ".to_string()), Some("   ".to_string()))
            .await
            .unwrap();

        assert_eq!(account.display_name.as_deref(), Some("Alice"));
        assert_eq!(account.summary, None);
        assert!(account.private_key_uri.starts_with("file://"));
        let pem = resolve_secret(&account.public_key_uri).await.unwrap();
        assert!(pem.contains("BEGIN PUBLIC KEY"));
        assert!(dir.path().join("alice.key.pem").exists());
    }

    #[tokio::test]
    async fn create_account_rejects_bad_and_duplicate_names() {
        let storage = memory_storage();
        seed_account(&storage, "alice").await;
        let service = service(&storage, None);

        assert!(matches!(
            service.create_account("Not Valid!", None, None).await,
            Err(AppError::Parse(_))
        ));
        assert!(matches!(
            service.create_account("alice", None, None).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn follow_delivers_and_records_edge() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        let alice = seed_account(&storage, "alice").await;

        let following = service(&storage, None)
            .follow("alice", &remote.address())
            .await
            .unwrap();

        assert_eq!(following.address, remote.address());
        let bodies = remote.inbox_bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["type"], "Follow");
        assert_eq!(bodies[0]["object"], remote.actor_url);
        assert_eq!(storage.following.count_following(&alice.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_follow_records_no_edge() {
        let remote = FakeRemote::start("bob", StatusCode::FORBIDDEN).await;
        let storage = memory_storage();
        let alice = seed_account(&storage, "alice").await;

        let result = service(&storage, None).follow("alice", &remote.address()).await;

        assert!(matches!(result, Err(AppError::Transport(_))));
        assert_eq!(storage.following.count_following(&alice.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn follow_twice_is_conflict() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        seed_account(&storage, "alice").await;
        let service = service(&storage, None);

        service.follow("alice", &remote.address()).await.unwrap();
        assert!(matches!(
            service.follow("alice", &remote.address()).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(remote.inbox_bodies().len(), 1);
    }

    #[tokio::test]
    async fn unfollow_sends_undo_of_latest_follow() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        let alice = seed_account(&storage, "alice").await;
        let service = service(&storage, None);

        service.follow("alice", &remote.address()).await.unwrap();
        service.unfollow("alice", &remote.address()).await.unwrap();

        let bodies = remote.inbox_bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["type"], "Undo");
        assert_eq!(bodies[1]["object"]["id"], bodies[0]["id"]);
        assert_eq!(storage.following.count_following(&alice.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unfollow_without_follow_is_conflict() {
        let storage = memory_storage();
        seed_account(&storage, "alice").await;

        assert!(matches!(
            service(&storage, None)
                .unfollow("alice", "bob@remote.example")
                .await,
            Err(AppError::Conflict(_))
        ));
    }
}
