//! Activity delivery
//!
//! One signed delivery attempt of one activity to one recipient, with the
//! attempt recorded as a `Delivery` row however the attempt ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::actor::ActorResolver;
use super::signature::{SignatureAlgorithm, sign_request};
use super::webfinger::ACTIVITY_JSON;
use crate::data::secrets::resolve_secret;
use crate::data::{Activity, DeliveriesDatabase, Delivery, EntityId, Storage};
use crate::error::{AppError, Result};
use crate::metrics::{
    DELIVERIES_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL,
};

/// Records the outcome of a single delivery attempt
///
/// `finish` persists the row. If the guard is dropped unfinished (the attempt
/// was cancelled or panicked) a failed row is persisted from a spawned task,
/// so every attempt leaves exactly one row behind.
pub struct DeliveryRecorder {
    deliveries: Arc<dyn DeliveriesDatabase>,
    delivery: Option<Delivery>,
}

impl DeliveryRecorder {
    pub fn new(deliveries: Arc<dyn DeliveriesDatabase>, activity_id: &str, recipient: &str) -> Self {
        Self {
            deliveries,
            delivery: Some(Delivery {
                id: EntityId::new().0,
                activity_id: activity_id.to_string(),
                recipient: recipient.to_string(),
                inbox: None,
                created_at: Utc::now(),
                completed_at: None,
                success: false,
                error: None,
            }),
        }
    }

    pub fn set_inbox(&mut self, inbox: &str) {
        if let Some(delivery) = self.delivery.as_mut() {
            delivery.inbox = Some(inbox.to_string());
        }
    }

    /// Persist the row for a finished attempt
    pub async fn finish(mut self, result: &Result<()>) -> Result<()> {
        let Some(mut delivery) = self.delivery.take() else {
            return Ok(());
        };
        delivery.completed_at = Some(Utc::now());
        delivery.success = result.is_ok();
        delivery.error = result.as_ref().err().map(|e| e.to_string());

        DELIVERIES_TOTAL
            .with_label_values(&[if delivery.success { "success" } else { "failure" }])
            .inc();
        self.deliveries.add_delivery(&delivery).await
    }
}

impl Drop for DeliveryRecorder {
    fn drop(&mut self) {
        let Some(mut delivery) = self.delivery.take() else {
            return;
        };
        delivery.completed_at = Some(Utc::now());
        delivery.error = Some("delivery attempt interrupted".to_string());
        DELIVERIES_TOTAL.with_label_values(&["interrupted"]).inc();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let deliveries = self.deliveries.clone();
                handle.spawn(async move {
                    if let Err(e) = deliveries.add_delivery(&delivery).await {
                        tracing::error!(
                            activity_id = %delivery.activity_id,
                            recipient = %delivery.recipient,
                            error = %e,
                            "Failed to record interrupted delivery"
                        );
                    }
                });
            }
            Err(_) => tracing::error!(
                activity_id = %delivery.activity_id,
                recipient = %delivery.recipient,
                "Interrupted delivery dropped outside a runtime; not recorded"
            ),
        }
    }
}

/// Activity delivery service
///
/// Sends stored activities to remote inbox endpoints.
#[derive(Clone)]
pub struct ActivityDispatcher {
    storage: Storage,
    resolver: Arc<ActorResolver>,
    http_client: reqwest::Client,
    base_url: String,
    algorithm: SignatureAlgorithm,
    signature_validity: Duration,
}

impl ActivityDispatcher {
    pub fn new(
        storage: Storage,
        resolver: Arc<ActorResolver>,
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        algorithm: SignatureAlgorithm,
        signature_validity: Duration,
    ) -> Self {
        Self {
            storage,
            resolver,
            http_client,
            base_url: base_url.into(),
            algorithm,
            signature_validity,
        }
    }

    /// Deliver `activity` to `recipient`, at most `max_attempts` times overall
    ///
    /// Once the attempt budget is spent this returns `Ok(())` without any
    /// network traffic.
    ///
    /// # Errors
    /// Resolution, signing and transport failures. Each is recorded as a
    /// failed `Delivery` row before being returned.
    pub async fn deliver_activity(
        &self,
        activity: &Activity,
        recipient: &str,
        max_attempts: u32,
    ) -> Result<()> {
        let attempts = self
            .storage
            .deliveries
            .count_delivery_attempts(&activity.id, recipient)
            .await?;
        if attempts >= max_attempts {
            DELIVERIES_TOTAL.with_label_values(&["capped"]).inc();
            tracing::debug!(
                activity_id = %activity.id,
                recipient = %recipient,
                attempts,
                "Delivery attempts exhausted, skipping"
            );
            return Ok(());
        }

        let mut recorder =
            DeliveryRecorder::new(self.storage.deliveries.clone(), &activity.id, recipient);
        let result = self.attempt(activity, recipient, &mut recorder).await;

        match &result {
            Ok(()) => tracing::info!(
                activity = %activity.activity_pub_id,
                recipient = %recipient,
                "Delivered activity"
            ),
            Err(e) => tracing::warn!(
                activity = %activity.activity_pub_id,
                recipient = %recipient,
                error = %e,
                "Delivery failed"
            ),
        }

        let recorded = recorder.finish(&result).await;
        result?;
        recorded
    }

    async fn attempt(
        &self,
        activity: &Activity,
        recipient: &str,
        recorder: &mut DeliveryRecorder,
    ) -> Result<()> {
        let actor = self.resolver.retrieve_actor(recipient).await?;
        recorder.set_inbox(&actor.inbox);

        let account = self
            .storage
            .accounts
            .get_account_by_id(&activity.account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", activity.account_id)))?;
        let private_key_pem = resolve_secret(&account.private_key_uri).await?;

        self.post_signed(
            &actor.inbox,
            activity.body.as_bytes(),
            &private_key_pem,
            &account.key_id(&self.base_url),
        )
        .await
    }

    /// POST a signed body to an inbox
    ///
    /// # Errors
    /// `Transport` on network failure or a non-2xx response
    pub async fn post_signed(
        &self,
        inbox: &str,
        body: &[u8],
        private_key_pem: &str,
        key_id: &str,
    ) -> Result<()> {
        let sig_headers = sign_request(
            "POST",
            inbox,
            Some(body),
            private_key_pem,
            key_id,
            self.algorithm,
            self.signature_validity,
        )?;

        let mut request = self
            .http_client
            .post(inbox)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Accept", ACTIVITY_JSON)
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let started = Instant::now();
        let result = request.body(body.to_vec()).send().await;
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .observe(started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["outbound", "error"])
                .inc();
            AppError::Transport(format!("Failed to deliver to {}: {}", inbox, e))
        })?;

        let status = response.status();
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", status.as_str()])
            .inc();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox, status
            )));
        }

        Ok(())
    }
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

    /// Build a Follow activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (follower)
    /// * `object` - Object URI (followee)
    pub fn follow(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted, usually its id
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a Create activity
    pub fn create(id: &str, actor: &str, object: Value, to: Vec<&str>, cc: Vec<&str>) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Create",
            "id": id,
            "actor": actor,
            "object": object,
            "to": to,
            "cc": cc,
            "published": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Build an Announce activity (boost)
    pub fn announce(id: &str, actor: &str, object: &str, to: Vec<&str>, cc: Vec<&str>) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Announce",
            "id": id,
            "actor": actor,
            "object": object,
            "to": to,
            "cc": cc,
            "published": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Build an Undo activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (undoer)
    /// * `object` - Original activity being undone
    pub fn undo(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Undo",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a Mention tag
    pub fn mention(href: &str, address: &str) -> Value {
        serde_json::json!({
            "type": "Mention",
            "href": href,
            "name": format!("@{}", address)
        })
    }

    /// Build a Note object
    ///
    /// # Arguments
    /// * `id` - Note ID (unique URI)
    /// * `attributed_to` - Actor URI (author)
    /// * `content` - HTML content
    /// * `published` - Publication timestamp (RFC3339)
    /// * `in_reply_to` - URI of the object being replied to
    /// * `to` - Primary recipients
    /// * `cc` - CC recipients
    /// * `tag` - Mention tags
    #[allow(clippy::too_many_arguments)]
    pub fn note(
        id: &str,
        attributed_to: &str,
        content: &str,
        published: &str,
        in_reply_to: Option<&str>,
        to: Vec<&str>,
        cc: Vec<&str>,
        tag: Vec<Value>,
    ) -> Value {
        serde_json::json!({
            "type": "Note",
            "id": id,
            "attributedTo": attributed_to,
            "content": content,
            "published": published,
            "inReplyTo": in_reply_to,
            "to": to,
            "cc": cc,
            "tag": tag,
            "sensitive": false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TimeRange;
    use crate::federation::test_support::{
        FakeRemote, memory_storage, seed_account, seed_activity, test_dispatcher,
    };
    use axum::http::StatusCode;

    async fn all_deliveries(storage: &Storage) -> Vec<Delivery> {
        let mut rows = Vec::new();
        storage
            .deliveries
            .scan_deliveries(TimeRange::all(), &mut |d| {
                rows.push(d);
                Ok(())
            })
            .await
            .unwrap();
        rows
    }

    #[tokio::test]
    async fn successful_delivery_records_success_with_inbox() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        let account = seed_account(&storage, "alice").await;
        let activity = seed_activity(&storage, &account.id, serde_json::json!({"type": "Create"})).await;

        test_dispatcher(&storage)
            .deliver_activity(&activity, &remote.address(), 3)
            .await
            .expect("delivery should succeed");

        assert_eq!(remote.inbox_bodies().len(), 1);
        assert_eq!(remote.inbox_bodies()[0]["type"], "Create");

        let rows = all_deliveries(&storage).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        assert_eq!(rows[0].inbox.as_deref(), Some(remote.inbox_url().as_str()));
        assert!(rows[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn rejected_delivery_records_failure_and_returns_transport_error() {
        let remote = FakeRemote::start("bob", StatusCode::INTERNAL_SERVER_ERROR).await;
        let storage = memory_storage();
        let account = seed_account(&storage, "alice").await;
        let activity = seed_activity(&storage, &account.id, serde_json::json!({"type": "Create"})).await;

        match test_dispatcher(&storage)
            .deliver_activity(&activity, &remote.address(), 3)
            .await
        {
            Err(AppError::Transport(msg)) => assert!(msg.contains("500")),
            other => panic!("expected transport error, got: {other:?}"),
        }

        let rows = all_deliveries(&storage).await;
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert!(rows[0].error.as_deref().unwrap().contains("500"));
        assert_eq!(rows[0].inbox.as_deref(), Some(remote.inbox_url().as_str()));
    }

    #[tokio::test]
    async fn unresolvable_recipient_is_recorded_without_inbox() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        let account = seed_account(&storage, "alice").await;
        let activity = seed_activity(&storage, &account.id, serde_json::json!({"type": "Create"})).await;

        let result = test_dispatcher(&storage)
            .deliver_activity(&activity, &format!("nobody@{}", remote.host), 3)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let rows = all_deliveries(&storage).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].inbox.is_none());
    }

    #[tokio::test]
    async fn exhausted_attempts_skip_the_network() {
        let remote = FakeRemote::start("bob", StatusCode::ACCEPTED).await;
        let storage = memory_storage();
        let account = seed_account(&storage, "alice").await;
        let activity = seed_activity(&storage, &account.id, serde_json::json!({"type": "Create"})).await;

        for _ in 0..2 {
            let recorder = DeliveryRecorder::new(
                storage.deliveries.clone(),
                &activity.id,
                &remote.address(),
            );
            recorder
                .finish(&Err(AppError::Transport("HTTP 503".to_string())))
                .await
                .unwrap();
        }

        test_dispatcher(&storage)
            .deliver_activity(&activity, &remote.address(), 2)
            .await
            .expect("capped delivery is not an error");

        assert_eq!(remote.actor_fetches(), 0);
        assert!(remote.inbox_bodies().is_empty());
        assert_eq!(all_deliveries(&storage).await.len(), 2);
    }

    #[tokio::test]
    async fn dropped_recorder_persists_interrupted_failure() {
        let storage = memory_storage();
        let mut recorder =
            DeliveryRecorder::new(storage.deliveries.clone(), "activity-1", "bob@remote.example");
        recorder.set_inbox("https://remote.example/users/bob/inbox");
        drop(recorder);

        // The row is written from a spawned task
        for _ in 0..50 {
            if storage
                .deliveries
                .count_delivery_attempts("activity-1", "bob@remote.example")
                .await
                .unwrap()
                == 1
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let rows = storage
            .deliveries
            .deliveries_for_activity("activity-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert_eq!(rows[0].error.as_deref(), Some("delivery attempt interrupted"));
    }

    #[test]
    fn builder_note_carries_reply_and_tags() {
        let note = builder::note(
            "https://local.example/users/alice/posts/1",
            "https://local.example/users/alice",
            "<p>hi</p>",
            "2024-01-01T00:00:00Z",
            Some("https://remote.example/notes/9"),
            vec![builder::PUBLIC],
            vec!["https://local.example/users/alice/followers"],
            vec![builder::mention(
                "https://remote.example/users/bob",
                "bob@remote.example",
            )],
        );
        assert_eq!(note["inReplyTo"], "https://remote.example/notes/9");
        assert_eq!(note["tag"][0]["name"], "@bob@remote.example");
        assert_eq!(note["to"][0], builder::PUBLIC);
    }
}
