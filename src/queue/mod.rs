//! Delivery queue
//!
//! Fan-out hands one job per (activity, recipient) to a `DeliveryQueue`.
//! Backends are chosen by URI scheme through [`queue_registry`]:
//! - `inline://` delivers on the caller's task
//! - `channel://?workers=N&capacity=M` hands jobs to background workers
//! - `log://` logs and drops jobs
//! - `discard://` drops jobs

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::data::{Activity, Storage};
use crate::error::{AppError, Result};
use crate::federation::ActivityDispatcher;
use crate::registry::{Registry, uri_params};

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_CAPACITY: usize = 1024;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Schedule delivery of `activity` to `recipient`
    async fn enqueue(&self, activity: &Activity, recipient: &str) -> Result<()>;
}

/// What queue backends need to run deliveries
#[derive(Clone)]
pub struct QueueContext {
    pub dispatcher: ActivityDispatcher,
    pub storage: Storage,
    pub max_attempts: u32,
}

/// Serialized form of a queued delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub activity_id: String,
    pub recipient: String,
}

/// Runs each delivery immediately on the caller's task
pub struct InlineQueue {
    context: QueueContext,
}

impl InlineQueue {
    pub fn new(context: QueueContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl DeliveryQueue for InlineQueue {
    async fn enqueue(&self, activity: &Activity, recipient: &str) -> Result<()> {
        self.context
            .dispatcher
            .deliver_activity(activity, recipient, self.context.max_attempts)
            .await
    }
}

/// Bounded in-process channel drained by worker tasks
pub struct ChannelQueue {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelQueue {
    /// Spawn `workers` tasks sharing a channel of `capacity` jobs
    pub fn start(context: QueueContext, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..workers.max(1) {
            tokio::spawn(run_worker(worker, receiver.clone(), context.clone()));
        }

        tracing::info!(workers, capacity, "Started delivery workers");
        Self { sender }
    }
}

#[async_trait]
impl DeliveryQueue for ChannelQueue {
    async fn enqueue(&self, activity: &Activity, recipient: &str) -> Result<()> {
        let job = DeliveryJob {
            activity_id: activity.id.clone(),
            recipient: recipient.to_string(),
        };
        let payload = serde_json::to_vec(&job)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode job: {}", e)))?;

        self.sender
            .send(payload)
            .await
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Delivery queue is closed")))
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    context: QueueContext,
) {
    loop {
        let payload = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(payload) = payload else {
            tracing::debug!(worker, "Delivery queue closed, worker exiting");
            break;
        };

        if let Err(e) = process_job(&context, &payload).await {
            tracing::warn!(worker, error = %e, "Queued delivery failed");
        }
    }
}

async fn process_job(context: &QueueContext, payload: &[u8]) -> Result<()> {
    let job: DeliveryJob = serde_json::from_slice(payload)
        .map_err(|e| AppError::Parse(format!("Invalid delivery job: {}", e)))?;

    let activity = context
        .storage
        .activities
        .get_activity_by_id(&job.activity_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Activity {}", job.activity_id)))?;

    // A job may be queued twice before the first run completes
    if context
        .storage
        .deliveries
        .has_successful_delivery(&activity.id, &job.recipient)
        .await?
    {
        tracing::debug!(
            activity_id = %activity.id,
            recipient = %job.recipient,
            "Already delivered, skipping job"
        );
        return Ok(());
    }

    context
        .dispatcher
        .deliver_activity(&activity, &job.recipient, context.max_attempts)
        .await
}

/// Logs jobs instead of delivering them
#[derive(Clone, Default)]
pub struct LogQueue;

#[async_trait]
impl DeliveryQueue for LogQueue {
    async fn enqueue(&self, activity: &Activity, recipient: &str) -> Result<()> {
        tracing::info!(
            activity = %activity.activity_pub_id,
            kind = activity.kind.as_str(),
            recipient = %recipient,
            "Delivery queued (log backend)"
        );
        Ok(())
    }
}

/// Drops every job
#[derive(Clone, Default)]
pub struct DiscardQueue;

#[async_trait]
impl DeliveryQueue for DiscardQueue {
    async fn enqueue(&self, _activity: &Activity, _recipient: &str) -> Result<()> {
        Ok(())
    }
}

fn usize_param(uri: &str, name: &str, default: usize) -> Result<usize> {
    match uri_params(uri).get(name) {
        Some(value) => value.parse().map_err(|_| {
            AppError::Config(format!("Invalid {} '{}' in {}", name, value, uri))
        }),
        None => Ok(default),
    }
}

async fn open_inline(_uri: String, context: QueueContext) -> Result<Arc<dyn DeliveryQueue>> {
    Ok(Arc::new(InlineQueue::new(context)))
}

async fn open_channel(uri: String, context: QueueContext) -> Result<Arc<dyn DeliveryQueue>> {
    let workers = usize_param(&uri, "workers", DEFAULT_WORKERS)?;
    let capacity = usize_param(&uri, "capacity", DEFAULT_CAPACITY)?;
    Ok(Arc::new(ChannelQueue::start(context, workers, capacity)))
}

async fn open_log(_uri: String, _context: QueueContext) -> Result<Arc<dyn DeliveryQueue>> {
    Ok(Arc::new(LogQueue))
}

async fn open_discard(_uri: String, _context: QueueContext) -> Result<Arc<dyn DeliveryQueue>> {
    Ok(Arc::new(DiscardQueue))
}

/// Registry of the bundled queue backends
pub fn queue_registry() -> Registry<QueueContext, Arc<dyn DeliveryQueue>> {
    let mut registry = Registry::new("queue");
    registry
        .register("inline", open_inline)
        .register("channel", open_channel)
        .register("log", open_log)
        .register("discard", open_discard);
    registry
}
