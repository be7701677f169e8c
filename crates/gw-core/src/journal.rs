use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::GwError;

/// Discriminates the keyspace a message/event belongs to. Group and
/// private messages are keyed by conversation id; notice/request/meta
/// events share one bucket per `self_id` since they have no conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Group,
    Private,
    Notice,
    Request,
    Meta,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Group => "group",
            Kind::Private => "private",
            Kind::Notice => "notice",
            Kind::Request => "request",
            Kind::Meta => "meta",
        }
    }
}

/// Identifies a conversation (or unkeyed bucket) for journal reads/writes.
#[derive(Debug, Clone)]
pub struct ConversationKey {
    pub self_id: i64,
    pub kind: Kind,
    pub conv_id: Option<i64>,
}

impl ConversationKey {
    pub fn conversation(self_id: i64, kind: Kind, conv_id: i64) -> Self {
        Self {
            self_id,
            kind,
            conv_id: Some(conv_id),
        }
    }

    pub fn unkeyed(self_id: i64, kind: Kind) -> Self {
        Self {
            self_id,
            kind,
            conv_id: None,
        }
    }

    fn hash_key(&self) -> String {
        match self.conv_id {
            Some(id) => format!(
                "bot:{}:{}:{}:msg_data",
                self.self_id,
                self.kind.as_str(),
                id
            ),
            None => format!("bot:{}:{}:msg_data", self.self_id, self.kind.as_str()),
        }
    }

    fn time_map_key(&self) -> String {
        match self.conv_id {
            Some(id) => format!(
                "bot:{}:{}:{}:time_map",
                self.self_id,
                self.kind.as_str(),
                id
            ),
            None => format!("bot:{}:{}:time_map", self.self_id, self.kind.as_str()),
        }
    }
}

/// Redis-backed message store: a per-conversation hash of JSON payloads
/// plus a parallel sorted set indexing them by event timestamp.
#[derive(Clone)]
pub struct Journal {
    conn: ConnectionManager,
}

impl Journal {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Writes `payload` under `field` (a message id, or a synthetic UUID
    /// for unkeyed buckets), scored by `timestamp`. The hash write and the
    /// time-index insert happen as one pipeline so a reader never observes
    /// one without the other.
    pub async fn append(
        &self,
        key: &ConversationKey,
        field: &str,
        timestamp: i64,
        payload: &Value,
    ) -> Result<(), GwError> {
        let body = serde_json::to_string(payload).map_err(gw_protocol::DecodeError::from)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(key.hash_key(), field, &body)
            .zadd(key.time_map_key(), field, timestamp)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn append_unkeyed(
        &self,
        self_id: i64,
        kind: Kind,
        timestamp: i64,
        payload: &Value,
    ) -> Result<(), GwError> {
        let key = ConversationKey::unkeyed(self_id, kind);
        let field = Uuid::new_v4().to_string();
        self.append(&key, &field, timestamp, payload).await
    }

    pub async fn get(&self, key: &ConversationKey, field: &str) -> Result<Option<Value>, GwError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(key.hash_key(), field).await?;
        Ok(raw
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(gw_protocol::DecodeError::from)?)
    }

    /// Most recent `count` entries starting `offset` back from the newest.
    pub async fn query_page(
        &self,
        key: &ConversationKey,
        offset: isize,
        count: isize,
    ) -> Result<Vec<Value>, GwError> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = conn
            .zrevrange(key.time_map_key(), offset, offset + count - 1)
            .await?;
        self.hydrate(key, &fields).await
    }

    /// Entries scored between `min_ts` and `max_ts` inclusive, newest first.
    pub async fn query_range(
        &self,
        key: &ConversationKey,
        min_ts: i64,
        max_ts: i64,
    ) -> Result<Vec<Value>, GwError> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = conn
            .zrevrangebyscore(key.time_map_key(), max_ts, min_ts)
            .await?;
        self.hydrate(key, &fields).await
    }

    async fn hydrate(&self, key: &ConversationKey, fields: &[String]) -> Result<Vec<Value>, GwError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = conn.hget(key.hash_key(), fields).await?;
        raws.into_iter()
            .flatten()
            .map(|s| serde_json::from_str(&s).map_err(|e| GwError::from(gw_protocol::DecodeError::from(e))))
            .collect()
    }

    pub async fn delete(&self, key: &ConversationKey, field: &str) -> Result<(), GwError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hdel(key.hash_key(), field)
            .zrem(key.time_map_key(), field)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Nulls out the `local_path` of one segment within a journaled message
    /// using optimistic locking: watch the hash field, re-read it, patch the
    /// segment in memory, and write back only if nothing raced us. Retries
    /// a bounded number of times on a lost race.
    pub async fn clear_segment_local_path(
        &self,
        key: &ConversationKey,
        field: &str,
        segment_index: usize,
    ) -> Result<(), GwError> {
        let hash_key = key.hash_key();
        const MAX_ATTEMPTS: u32 = 5;

        for attempt in 0..MAX_ATTEMPTS {
            let mut conn = self.conn.clone();
            redis::cmd("WATCH")
                .arg(&hash_key)
                .query_async::<_, ()>(&mut conn)
                .await?;

            let raw: Option<String> = conn.hget(&hash_key, field).await?;
            let Some(raw) = raw else {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Ok(());
            };
            let mut value: Value =
                serde_json::from_str(&raw).map_err(gw_protocol::DecodeError::from)?;

            if let Some(segments) = value.get_mut("message").and_then(Value::as_array_mut) {
                if let Some(segment) = segments.get_mut(segment_index) {
                    if let Some(data) = segment.get_mut("data") {
                        data["local_path"] = Value::Null;
                    }
                }
            }

            let body = serde_json::to_string(&value).map_err(gw_protocol::DecodeError::from)?;
            // A watched key changing before EXEC makes the transaction's
            // reply a nil multi-bulk, which redis-rs surfaces as `None`
            // only when the requested type is itself an `Option`.
            let result: redis::RedisResult<Option<()>> = redis::pipe()
                .atomic()
                .hset(&hash_key, field, &body)
                .ignore()
                .query_async(&mut conn)
                .await;

            match result {
                Ok(Some(())) => return Ok(()),
                Ok(None) => {
                    warn!(field, attempt, "optimistic repair lost the race, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(field, "optimistic repair exhausted retries");
        Ok(())
    }
}

/// A bounded queue of pending journal writes drained by a small worker
/// pool, so a slow Redis does not stall the session read loop faster than
/// backpressure is meant to — it stalls it exactly as much as the bound
/// dictates, not more.
pub struct JournalWriteJob {
    pub key: ConversationKey,
    pub field: String,
    pub timestamp: i64,
    pub payload: Value,
}

pub struct JournalQueue {
    sender: mpsc::Sender<JournalWriteJob>,
}

impl JournalQueue {
    pub fn spawn(journal: Journal, capacity: usize, consumers: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = std::sync::Arc::new(Mutex::new(receiver));

        for _ in 0..consumers.max(1) {
            let journal = journal.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    if let Err(e) = journal
                        .append(&job.key, &job.field, job.timestamp, &job.payload)
                        .await
                    {
                        error!(error = %e, field = %job.field, "journal write failed");
                    }
                }
            });
        }

        Self { sender }
    }

    pub async fn enqueue(&self, job: JournalWriteJob) -> Result<(), GwError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| GwError::SessionClosing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_builds_expected_hash_key() {
        let key = ConversationKey::conversation(42, Kind::Group, 7);
        assert_eq!(key.hash_key(), "bot:42:group:7:msg_data");
        assert_eq!(key.time_map_key(), "bot:42:group:7:time_map");
    }

    #[test]
    fn unkeyed_key_omits_conversation_segment() {
        let key = ConversationKey::unkeyed(42, Kind::Notice);
        assert_eq!(key.hash_key(), "bot:42:notice:msg_data");
    }
}
