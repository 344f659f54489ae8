//! Persistence boundary - match summaries and moderation records

pub mod client;
pub mod records;

pub use client::{SinkError, StorageClient};
pub use records::{MatchSummary, PlayerSummary, Record};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Cheap handle rooms use to hand records off without awaiting I/O
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
}

impl RecordSender {
    /// Queue a record; dropped with a warning if the sink is saturated
    pub fn send(&self, record: Record) -> Result<(), SinkError> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(record) => {
                warn!(collection = record.collection(), "Record sink full, dropping record");
                SinkError::Full
            }
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

pub fn channel(capacity: usize) -> (RecordSender, mpsc::Receiver<Record>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RecordSender { tx }, rx)
}

/// Drain records until every sender is gone. Without a client records are only logged.
pub async fn run_sink(mut rx: mpsc::Receiver<Record>, client: Option<StorageClient>) -> usize {
    let mut written = 0;
    while let Some(record) = rx.recv().await {
        let collection = record.collection();
        let body = match record.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!(collection, error = %e, "Failed to encode record");
                continue;
            }
        };

        match &client {
            Some(client) => match client.insert(collection, &body).await {
                Ok(()) => {
                    debug!(collection, "Record stored");
                    written += 1;
                }
                Err(e) => warn!(collection, error = %e, "Failed to store record"),
            },
            None => {
                info!(collection, record = %body, "Record");
                written += 1;
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticheat::{ViolationKind, ViolationRecord};
    use chrono::Utc;
    use uuid::Uuid;

    fn violation() -> Record {
        Record::Violation(ViolationRecord {
            user_id: Uuid::new_v4(),
            match_id: Uuid::new_v4(),
            kind: ViolationKind::RapidFire,
            confidence: 0.8,
            detail: serde_json::json!({ "intervalMs": 20.0 }),
            tick: 42,
            recorded_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn log_only_sink_drains_until_senders_drop() {
        let (sender, rx) = channel(4);
        let sink = tokio::spawn(run_sink(rx, None));

        sender.send(violation()).unwrap();
        sender.send(violation()).unwrap();
        drop(sender);

        assert_eq!(sink.await.unwrap(), 2);
    }

    #[test]
    fn full_channel_rejects_without_blocking() {
        let (sender, _rx) = channel(1);
        sender.send(violation()).unwrap();
        assert!(matches!(sender.send(violation()), Err(SinkError::Full)));
    }

    #[test]
    fn violation_json_uses_snake_case_kind() {
        let json = violation().to_json().unwrap();
        assert_eq!(json["kind"], "rapid_fire");
        assert_eq!(json["tick"], 42);
        assert_eq!(violation().collection(), "violations");
    }
}
