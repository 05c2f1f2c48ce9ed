use anyhow::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Durable copy of a match, authoritative for history only. Created once,
/// mutated once to set the end, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub participant_id: String,
    pub counterpart_id: String,
    pub is_fake: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Best-effort persistence of match lifecycle to Redis. Writes run on
/// spawned tasks and never gate notification delivery; failures are
/// logged and swallowed. A disabled recorder (no store) is valid for
/// tests and degraded operation.
#[derive(Clone)]
pub struct Recorder {
    store: Option<MatchStore>,
}

impl Recorder {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            store: Some(MatchStore { redis }),
        })
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Persist match creation. Fire-and-forget.
    pub fn record_start(&self, record: MatchRecord) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.create(&record).await {
                warn!(match_id = %record.match_id, %err, "failed to persist match start");
            }
        });
    }

    /// Persist match completion. Fire-and-forget; a missing record (e.g.
    /// the start write failed) is logged and skipped.
    pub fn record_end(&self, match_id: String, ended_at: DateTime<Utc>, duration_ms: i64) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.finish(&match_id, ended_at, duration_ms).await {
                warn!(%match_id, %err, "failed to persist match end");
            }
        });
    }

    /// All durable match records, for the admin reporting surface.
    pub async fn list_matches(&self) -> Result<Vec<MatchRecord>> {
        match &self.store {
            Some(store) => store.list().await,
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Clone)]
struct MatchStore {
    redis: ConnectionManager,
}

impl MatchStore {
    async fn create(&self, record: &MatchRecord) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = match_key(&record.match_id);
        let value = serde_json::to_string(record)?;
        // No TTL: match history is never deleted.
        conn.set::<_, _, ()>(&key, value).await?;
        Ok(())
    }

    async fn finish(
        &self,
        match_id: &str,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = match_key(match_id);
        let value: Option<String> = conn.get(&key).await?;
        let Some(json) = value else {
            anyhow::bail!("no durable record for match {match_id}");
        };
        let mut record: MatchRecord = serde_json::from_str(&json)?;
        record.ended_at = Some(ended_at);
        record.duration_ms = Some(duration_ms);
        conn.set::<_, _, ()>(&key, serde_json::to_string(&record)?)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MatchRecord>> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut results = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg("match:*")
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            if !keys.is_empty() {
                let values: Vec<Option<String>> =
                    redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
                for v in values.into_iter().flatten() {
                    if let Ok(record) = serde_json::from_str::<MatchRecord>(&v) {
                        results.push(record);
                    }
                }
            }
            if cursor == 0 {
                break;
            }
        }
        Ok(results)
    }
}

fn match_key(match_id: &str) -> String {
    format!("match:{}", match_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrips_through_json() {
        let record = MatchRecord {
            match_id: "m-1".into(),
            participant_id: "ada".into(),
            counterpart_id: "grace".into(),
            is_fake: false,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: MatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.match_id, "m-1");
        assert!(parsed.ended_at.is_none());
    }

    #[tokio::test]
    async fn disabled_recorder_is_inert() {
        let recorder = Recorder::disabled();
        assert!(!recorder.is_enabled());
        recorder.record_start(MatchRecord {
            match_id: "m-1".into(),
            participant_id: "ada".into(),
            counterpart_id: "fake1".into(),
            is_fake: true,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        });
        recorder.record_end("m-1".into(), Utc::now(), 1200);
        assert!(recorder.list_matches().await.unwrap().is_empty());
    }
}
