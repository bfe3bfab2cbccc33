//! Fan-out of outbound activities
//!
//! Expands an activity into its recipients (followers, mentions and
//! address-shaped copy recipients) and queues one delivery per recipient.

use std::collections::HashSet;
use std::sync::Arc;

use super::address::{normalize_address, parse_address};
use crate::data::{Activity, Storage};
use crate::error::Result;
use crate::metrics::FANOUT_RECIPIENTS_TOTAL;
use crate::queue::DeliveryQueue;

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FanOutReport {
    /// Distinct recipients in first-seen order
    pub recipients: Vec<String>,
    pub queued: usize,
    /// Already delivered successfully
    pub skipped: usize,
    pub failed: usize,
}

/// Normalize and deduplicate recipients, keeping first-seen order
///
/// Entries that are not addresses are dropped.
fn unique_recipients(candidates: Vec<String>, local_host: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();

    for candidate in candidates {
        let address = match normalize_address(&candidate, local_host) {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(recipient = %candidate, error = %e, "Dropping invalid recipient");
                continue;
            }
        };
        if seen.insert(address.clone()) {
            recipients.push(address);
        }
    }

    recipients
}

/// Address-shaped entries of the activity's `cc` list
///
/// Collection URLs and the public audience are not addresses and are skipped.
fn copy_recipients(body: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };
    let Some(cc) = value.get("cc").and_then(|cc| cc.as_array()) else {
        return Vec::new();
    };

    cc.iter()
        .filter_map(|entry| entry.as_str())
        .filter(|entry| {
            parse_address(entry).is_ok_and(|(_, host)| !host.is_empty())
        })
        .map(str::to_string)
        .collect()
}

/// Fan-out orchestrator
#[derive(Clone)]
pub struct FanOut {
    storage: Storage,
    queue: Arc<dyn DeliveryQueue>,
    hostname: String,
    allow_mentions: bool,
    allow_copy_recipients: bool,
}

impl FanOut {
    pub fn new(
        storage: Storage,
        queue: Arc<dyn DeliveryQueue>,
        hostname: impl Into<String>,
        allow_mentions: bool,
        allow_copy_recipients: bool,
    ) -> Self {
        Self {
            storage,
            queue,
            hostname: hostname.into(),
            allow_mentions,
            allow_copy_recipients,
        }
    }

    /// Queue `activity` for the owning account's followers, `mentions` and
    /// the copy recipients named in its body
    ///
    /// A failure for one recipient is logged and counted; the remaining
    /// recipients are still processed.
    ///
    /// # Errors
    /// Only when the follower list cannot be loaded.
    pub async fn deliver_to_followers(
        &self,
        activity: &Activity,
        mentions: &[String],
    ) -> Result<FanOutReport> {
        let followers = self
            .storage
            .followers
            .followers_for_account(&activity.account_id)
            .await?;

        let mut candidates: Vec<String> = followers.into_iter().map(|f| f.address).collect();
        if self.allow_mentions {
            candidates.extend(mentions.iter().cloned());
        }
        if self.allow_copy_recipients {
            candidates.extend(copy_recipients(&activity.body));
        }

        let mut report = FanOutReport {
            recipients: unique_recipients(candidates, &self.hostname),
            ..Default::default()
        };

        for recipient in &report.recipients {
            match self
                .storage
                .deliveries
                .has_successful_delivery(&activity.id, recipient)
                .await
            {
                Ok(true) => {
                    tracing::debug!(recipient = %recipient, "Already delivered, skipping");
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Delivery lookup failed");
                    report.failed += 1;
                    continue;
                }
            }

            match self.queue.enqueue(activity, recipient).await {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Failed to queue delivery");
                    report.failed += 1;
                }
            }
        }

        FANOUT_RECIPIENTS_TOTAL
            .with_label_values(&["queued"])
            .inc_by(report.queued as u64);
        FANOUT_RECIPIENTS_TOTAL
            .with_label_values(&["skipped"])
            .inc_by(report.skipped as u64);
        FANOUT_RECIPIENTS_TOTAL
            .with_label_values(&["failed"])
            .inc_by(report.failed as u64);

        tracing::info!(
            activity = %activity.activity_pub_id,
            recipients = report.recipients.len(),
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed,
            "Fan-out complete"
        );

        Ok(report)
    }
}
