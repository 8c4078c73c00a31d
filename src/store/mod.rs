//! Coordination Store (C1): a thin typed layer over a remote key-value
//! store. Connection failure is tolerated for status queries (degrade to
//! "load = 0", "not cancelled") but fatal for the cancellation-signal write
//! path and for thread-binding, per `SPEC_FULL.md` §4.1.

pub mod keys;

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const CANCEL_TTL_SECS: i64 = 3600;
const THREAD_MESSAGES_TTL_SECS: i64 = 86_400;

/// Who cancelled a task, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelInfo {
    pub cancelled_by: String,
    pub cancelled_by_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One message appended to a thread's feedback inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub message_ts: String,
    pub ts: DateTime<Utc>,
}

/// Redis-backed Coordination Store. A `ConnectionManager` auto-reconnects,
/// so the two OS processes (intake, worker pool) in §5 share state purely
/// through network round trips.
pub struct CoordinationStore {
    conn: ConnectionManager,
}

impl CoordinationStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(StoreError::Command)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(StoreError::Command)?;
        Ok(Self { conn })
    }

    // --- C2: active_tasks set ---------------------------------------------

    /// Degrades to 0 on store failure (availability over correctness for
    /// status queries, per §4.1).
    pub async fn active_task_count(&self, dog: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        match conn.scard::<_, usize>(keys::active_tasks(dog)).await {
            Ok(n) => Ok(n),
            Err(_) => Ok(0),
        }
    }

    pub async fn mark_task_active(&self, dog: &str, task_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(keys::active_tasks(dog), task_id)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    /// Returns whether the task was actually a member (for the idempotence
    /// property in §8: removing a non-member is a no-op, not an error).
    pub async fn mark_task_inactive(&self, dog: &str, task_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(keys::active_tasks(dog), task_id)
            .await
            .map_err(StoreError::Command)?;
        Ok(removed > 0)
    }

    // --- C3: cancellation flag ----------------------------------------------

    /// Fatal on store failure: the cancel button must reliably land.
    pub async fn set_cancelled(&self, task_id: &str, info: &CancelInfo) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = keys::cancel(task_id);
        let fields: [(&str, String); 3] = [
            ("cancelled_by", info.cancelled_by.clone()),
            ("cancelled_by_id", info.cancelled_by_id.clone()),
            ("timestamp", info.timestamp.to_rfc3339()),
        ];
        conn.hset_multiple::<_, _, _, ()>(&key, &fields)
            .await
            .map_err(StoreError::Command)?;
        conn.expire::<_, ()>(&key, CANCEL_TTL_SECS)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    /// Returns `false` on store failure (availability over correctness —
    /// the user will see the task continue and can click again, §4.3).
    pub async fn is_cancelled(&self, task_id: &str) -> bool {
        self.cancel_info(task_id).await.ok().flatten().is_some()
    }

    pub async fn cancel_info(&self, task_id: &str) -> Result<Option<CancelInfo>> {
        let mut conn = self.conn.clone();
        let key = keys::cancel(task_id);
        let fields: std::collections::HashMap<String, String> = match conn.hgetall(&key).await {
            Ok(f) => f,
            Err(_) => return Ok(None),
        };
        if fields.is_empty() {
            return Ok(None);
        }
        let cancelled_by = fields.get("cancelled_by").cloned().unwrap_or_default();
        let cancelled_by_id = fields.get("cancelled_by_id").cloned().unwrap_or_default();
        let timestamp = fields
            .get("timestamp")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Ok(Some(CancelInfo {
            cancelled_by,
            cancelled_by_id,
            timestamp,
        }))
    }

    /// Idempotent (§8).
    pub async fn clear_cancelled(&self, task_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::cancel(task_id))
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    // --- thread <-> task binding --------------------------------------------

    /// Fatal on store failure: thread binding must reliably land so
    /// subsequent messages route to the right task.
    pub async fn bind_thread(&self, thread_ts: &str, task_id: &str, ttl_secs: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = keys::thread_task(thread_ts);
        conn.set::<_, _, ()>(&key, task_id)
            .await
            .map_err(StoreError::Command)?;
        conn.expire::<_, ()>(&key, ttl_secs)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    pub async fn task_for_thread(&self, thread_ts: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(keys::thread_task(thread_ts))
            .await
            .map_err(StoreError::Command)?;
        Ok(value)
    }

    pub async fn unbind_thread(&self, thread_ts: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::thread_task(thread_ts))
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    // --- thread message inbox (C4 backing store) ----------------------------

    /// Appended by the chat-event listener; list append is atomic, so chat
    /// ordering within a thread is preserved (§5).
    pub async fn append_thread_message(&self, thread_ts: &str, message: &ThreadMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = keys::thread_messages(thread_ts);
        let payload = serde_json::to_string(message)
            .map_err(|e| StoreError::Malformed {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        conn.rpush::<_, _, ()>(&key, payload)
            .await
            .map_err(StoreError::Command)?;
        conn.expire::<_, ()>(&key, THREAD_MESSAGES_TTL_SECS)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    /// Range `[start, stop]` inclusive, Redis LRANGE semantics.
    pub async fn thread_messages_range(
        &self,
        thread_ts: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<ThreadMessage>> {
        let mut conn = self.conn.clone();
        let key = keys::thread_messages(thread_ts);
        let raw: Vec<String> = conn
            .lrange(&key, start, stop)
            .await
            .map_err(StoreError::Command)?;
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str(&entry) {
                Ok(msg) => out.push(msg),
                Err(e) => tracing::warn!(%e, "skipping malformed thread message"),
            }
        }
        Ok(out)
    }

    pub async fn thread_message_count(&self, thread_ts: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(keys::thread_messages(thread_ts))
            .await
            .map_err(StoreError::Command)?;
        Ok(len)
    }

    // --- job queue (C12 broker backing) -------------------------------------

    pub async fn enqueue_job(&self, payload_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(keys::job_queue(), payload_json)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    /// Blocking pop with a timeout in seconds; `Ok(None)` on timeout.
    pub async fn dequeue_job(&self, timeout_secs: f64) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .brpop(keys::job_queue(), timeout_secs)
            .await
            .map_err(StoreError::Command)?;
        Ok(result.map(|(_key, payload)| payload))
    }
}
