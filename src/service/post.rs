//! Post service
//!
//! Publishes local posts and boosts and hands them to fan-out.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::data::{Account, Activity, ActivityKind, EntityId, Post, Storage, Tag};
use crate::error::{AppError, Result};
use crate::federation::{ActorResolver, FanOut, FanOutReport, builder, normalize_address, scan_mentions};

/// Result of publishing a post
#[derive(Debug, Clone)]
pub struct Published {
    pub post: Post,
    pub activity: Activity,
    pub tags: Vec<Tag>,
    pub report: FanOutReport,
}

/// Post service
#[derive(Clone)]
pub struct PostService {
    storage: Storage,
    resolver: Arc<ActorResolver>,
    fanout: FanOut,
    base_url: String,
    hostname: String,
    allow_mentions: bool,
}

impl PostService {
    pub fn new(
        storage: Storage,
        resolver: Arc<ActorResolver>,
        fanout: FanOut,
        base_url: impl Into<String>,
        hostname: impl Into<String>,
        allow_mentions: bool,
    ) -> Self {
        Self {
            storage,
            resolver,
            fanout,
            base_url: base_url.into(),
            hostname: hostname.into(),
            allow_mentions,
        }
    }

    async fn account(&self, name: &str) -> Result<Account> {
        self.storage
            .accounts
            .get_account_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", name)))
    }

    /// Publish `content` as a public Note from `name`
    ///
    /// Mentions that cannot be resolved are logged and dropped; the post is
    /// still published.
    pub async fn publish(
        &self,
        name: &str,
        content: &str,
        in_reply_to: Option<String>,
    ) -> Result<Published> {
        let account = self.account(name).await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Parse("Post content cannot be empty".to_string()));
        }

        let now = Utc::now();
        let post = Post {
            id: EntityId::new().0,
            account_id: account.id.clone(),
            content: content.to_string(),
            in_reply_to,
            created_at: now,
            updated_at: now,
        };
        self.storage.posts.add_post(&post).await?;

        let tags = if self.allow_mentions {
            self.resolve_mentions(&account, &post).await?
        } else {
            Vec::new()
        };

        let note_url = post.url(&account, &self.base_url);
        let profile = account.profile_url(&self.base_url);
        let followers = account.followers_url(&self.base_url);

        let mut cc = vec![followers.as_str()];
        cc.extend(tags.iter().map(|t| t.href.as_str()));
        let note = builder::note(
            &note_url,
            &profile,
            &post.content,
            &now.to_rfc3339(),
            post.in_reply_to.as_deref(),
            vec![builder::PUBLIC],
            cc.clone(),
            tags.iter().map(|t| builder::mention(&t.href, &t.name)).collect(),
        );

        let activity_pub_id = format!("{}/activity", note_url);
        let body = builder::create(&activity_pub_id, &profile, note, vec![builder::PUBLIC], cc);
        let activity = self
            .store_activity(&account, ActivityKind::Post, &post.id, activity_pub_id, body)
            .await?;

        let mentions: Vec<String> = tags.iter().map(|t| t.name.clone()).collect();
        let report = self.fanout.deliver_to_followers(&activity, &mentions).await?;

        tracing::info!(
            account = %account.name,
            post = %post.id,
            mentions = tags.len(),
            "Published post"
        );
        Ok(Published {
            post,
            activity,
            tags,
            report,
        })
    }

    /// Resolve and store the mentions in a post's content
    async fn resolve_mentions(&self, account: &Account, post: &Post) -> Result<Vec<Tag>> {
        let mut addresses: Vec<String> = scan_mentions(&post.content).into_iter().collect();
        addresses.sort();

        let mut tags = Vec::new();
        for address in addresses {
            let actor = match self.resolver.retrieve_actor(&address).await {
                Ok(actor) => actor,
                Err(e) => {
                    tracing::warn!(mention = %address, error = %e, "Dropping unresolvable mention");
                    continue;
                }
            };

            let tag = Tag {
                id: EntityId::new().0,
                post_id: post.id.clone(),
                account_id: account.id.clone(),
                name: address,
                href: actor.id,
                kind: "Mention".to_string(),
                created_at: Utc::now(),
            };
            self.storage.tags.add_tag(&tag).await?;
            tags.push(tag);
        }

        Ok(tags)
    }

    /// Announce `object_url`, authored by `author_address`, from `name`
    ///
    /// The author is a copy recipient so they learn about the boost.
    pub async fn boost(
        &self,
        name: &str,
        object_url: &str,
        author_address: &str,
    ) -> Result<(Activity, FanOutReport)> {
        let account = self.account(name).await?;
        url::Url::parse(object_url)
            .map_err(|e| AppError::Parse(format!("Invalid object URL {}: {}", object_url, e)))?;
        let author = normalize_address(author_address, &self.hostname)?;

        let profile = account.profile_url(&self.base_url);
        let followers = account.followers_url(&self.base_url);
        let author_uri = format!("acct:{}", author);
        let activity_pub_id = format!("{}/activities/{}", profile, EntityId::new().0);
        let body = builder::announce(
            &activity_pub_id,
            &profile,
            object_url,
            vec![builder::PUBLIC],
            vec![followers.as_str(), author_uri.as_str()],
        );

        let activity = self
            .store_activity(&account, ActivityKind::Boost, object_url, activity_pub_id, body)
            .await?;
        let report = self.fanout.deliver_to_followers(&activity, &[]).await?;

        tracing::info!(account = %account.name, object = %object_url, "Boosted");
        Ok((activity, report))
    }

    async fn store_activity(
        &self,
        account: &Account,
        kind: ActivityKind,
        kind_id: &str,
        activity_pub_id: String,
        body: Value,
    ) -> Result<Activity> {
        let activity = Activity {
            id: EntityId::new().0,
            activity_pub_id,
            kind,
            kind_id: kind_id.to_string(),
            account_id: account.id.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.storage.activities.add_activity(&activity).await?;
        Ok(activity)
    }
}
