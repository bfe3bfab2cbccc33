//! Inbox protocol handling
//!
//! An inbound POST moves through Unverified → Verified → Dispatched →
//! Responded. Any failure ends processing with the error's HTTP status;
//! nothing is stored before the signature has been verified.

use chrono::Utc;
use serde_json::Value;

use super::activity::{InboundActivity, NoteObject};
use super::actor::Actor;
use super::delivery::builder;
use super::signature::{SignatureVerifier, key_id_matches_actor};
use crate::data::{Account, EntityId, Follower, Note, Storage};
use crate::error::{AppError, Result};
use crate::metrics::ACTIVITIES_RECEIVED;

/// Runs the Follow / Undo / Create state machine for local inboxes
#[derive(Clone)]
pub struct InboxProcessor {
    storage: Storage,
    verifier: SignatureVerifier,
    base_url: String,
    hostname: String,
}

impl InboxProcessor {
    pub fn new(
        storage: Storage,
        verifier: SignatureVerifier,
        base_url: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            verifier,
            base_url: base_url.into(),
            hostname: hostname.into(),
        }
    }

    /// Process one inbox request for `account_name`
    ///
    /// Returns the Accept activity to send back.
    ///
    /// # Errors
    /// - `Parse`: invalid JSON, unsupported type, object not naming the account
    /// - `Auth`: bad signature, or `actor` not the signing key's owner
    /// - `NotFound`: unknown account or unreachable signing key
    /// - `Conflict`: duplicate follow, undo without follow, create from a
    ///   non-followed actor, or a self-interaction
    pub async fn process(
        &self,
        account_name: &str,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: &[u8],
    ) -> Result<Value> {
        let activity = InboundActivity::parse(body)?;
        let label = match &activity {
            InboundActivity::Unsupported(_) => "Unsupported",
            known => known.kind(),
        };
        ACTIVITIES_RECEIVED.with_label_values(&[label]).inc();

        let (Some(id), Some(actor_id)) = (activity.id(), activity.actor()) else {
            return Err(AppError::Parse(format!(
                "Unsupported activity type: {}",
                activity.kind()
            )));
        };

        let sender = self
            .verifier
            .verify_request(method, path, headers, Some(body))
            .await?;
        if !key_id_matches_actor(&sender.id, actor_id) {
            return Err(AppError::Auth(format!(
                "Activity actor {} is not the signer {}",
                actor_id, sender.id
            )));
        }

        let account = self
            .storage
            .accounts
            .get_account_by_name(account_name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", account_name)))?;

        let sender_address = sender.address()?;
        if sender_address == account.address(&self.hostname) {
            return Err(AppError::Conflict(format!(
                "{} cannot interact with itself",
                sender_address
            )));
        }

        match &activity {
            InboundActivity::Follow { object, .. } => {
                self.handle_follow(&account, &sender_address, object).await?
            }
            InboundActivity::Undo { follow_object, .. } => {
                self.handle_undo(&account, &sender_address, follow_object.as_deref())
                    .await?
            }
            InboundActivity::Create { note, .. } => {
                self.handle_create(&account, &sender, &sender_address, note)
                    .await?
            }
            InboundActivity::Unsupported(kind) => {
                return Err(AppError::Parse(format!("Unsupported activity type: {}", kind)));
            }
        }

        let profile = account.profile_url(&self.base_url);
        Ok(builder::accept(
            &format!("{}#accepts/{}", profile, EntityId::new().0),
            &profile,
            Value::String(id.to_string()),
        ))
    }

    /// Whether a Follow object names `account`
    fn targets_account(&self, account: &Account, object: &str) -> bool {
        let address = account.address(&self.hostname);
        object == account.profile_url(&self.base_url)
            || object == format!("acct:{}", address)
            || object == address
    }

    async fn handle_follow(&self, account: &Account, sender: &str, object: &str) -> Result<()> {
        if !self.targets_account(account, object) {
            return Err(AppError::Parse(format!(
                "Follow object {} is not {}",
                object, account.name
            )));
        }

        if self
            .storage
            .followers
            .get_follower(&account.id, sender)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "{} already follows {}",
                sender, account.name
            )));
        }

        // A concurrent Follow may win between the lookup and the insert;
        // the storage conflict is the answer in that case
        self.storage
            .followers
            .add_follower(&Follower {
                id: EntityId::new().0,
                account_id: account.id.clone(),
                address: sender.to_string(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(account = %account.name, follower = %sender, "Accepted follow");
        Ok(())
    }

    async fn handle_undo(
        &self,
        account: &Account,
        sender: &str,
        object: Option<&str>,
    ) -> Result<()> {
        if let Some(object) = object {
            if !self.targets_account(account, object) {
                return Err(AppError::Parse(format!(
                    "Undone follow targeted {}, not {}",
                    object, account.name
                )));
            }
        }

        if !self
            .storage
            .followers
            .remove_follower(&account.id, sender)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "{} does not follow {}",
                sender, account.name
            )));
        }

        tracing::info!(account = %account.name, follower = %sender, "Removed follower");
        Ok(())
    }

    async fn handle_create(
        &self,
        account: &Account,
        sender: &Actor,
        sender_address: &str,
        note: &NoteObject,
    ) -> Result<()> {
        if self
            .storage
            .following
            .get_following(&account.id, sender_address)
            .await?
            .is_none()
        {
            return Err(AppError::Conflict(format!(
                "{} does not follow {}",
                account.name, sender_address
            )));
        }

        if note.attributed_to != sender.id {
            return Err(AppError::Auth(format!(
                "Note {} is attributed to {}, not the sender",
                note.id, note.attributed_to
            )));
        }

        let body = note.raw.to_string();
        let now = Utc::now();
        match self
            .storage
            .notes
            .get_note_by_note_id(&note.id, sender_address)
            .await?
        {
            Some(mut existing) => {
                existing.body = body;
                existing.updated_at = now;
                self.storage.notes.update_note(&existing).await?;
                tracing::info!(account = %account.name, note = %note.id, "Updated note");
            }
            None => {
                self.storage
                    .notes
                    .add_note(&Note {
                        id: EntityId::new().0,
                        account_id: account.id.clone(),
                        note_id: note.id.clone(),
                        author_address: sender_address.to_string(),
                        body,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
                tracing::info!(account = %account.name, note = %note.id, "Stored note");
            }
        }

        Ok(())
    }
}
