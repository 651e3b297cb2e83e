// Out-of-band request/response audit trail.
//
// Records are pushed onto a bounded queue with `try_send` and written by a
// background worker. The search path never waits on the sink and never sees
// its errors. Records stay typed until the sink serializes them on the worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::error::AuditError;
use crate::model::SearchQuery;
use crate::service::FlightList;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuditResponse {
    Flights(FlightList),
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub endpoint: String,
    pub request: SearchQuery,
    pub response: AuditResponse,
    pub status: u16,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn write(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Emits each record as a structured log line under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&record)?;
        tracing::info!(
            target: "audit",
            endpoint = %record.endpoint,
            status = record.status,
            duration_ms = record.duration_ms,
            record = %payload,
            "request audited"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditDispatcher {
    /// Starts the writer task. It stops once every dispatcher clone is dropped
    /// and the queue has drained.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let endpoint = record.endpoint.clone();
                let sink = sink.clone();
                // A panicking sink must not take the writer down with it.
                match tokio::spawn(async move { sink.write(record).await }).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(%endpoint, error = %e, "audit sink failed"),
                    Err(e) => tracing::error!(%endpoint, error = %e, "audit sink panicked"),
                }
            }
            tracing::debug!("audit writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Queues a record without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, record: AuditRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                tracing::warn!(endpoint = %record.endpoint, "audit queue full, record dropped");
                false
            }
            Err(TrySendError::Closed(record)) => {
                tracing::warn!(endpoint = %record.endpoint, "audit writer gone, record dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn write(&self, record: AuditRecord) -> Result<(), AuditError> {
            if record.endpoint == "boom" {
                return Err(AuditError::Sink("disk full".into()));
            }
            if record.endpoint == "panic" {
                panic!("sink exploded");
            }
            self.records.lock().push(record);
            Ok(())
        }
    }

    struct BlockedSink;

    #[async_trait]
    impl AuditSink for BlockedSink {
        async fn write(&self, _record: AuditRecord) -> Result<(), AuditError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    fn record(endpoint: &str) -> AuditRecord {
        AuditRecord {
            endpoint: endpoint.to_string(),
            request: SearchQuery::new("IST", "COV", "2026-11-20".parse().unwrap()).unwrap(),
            response: AuditResponse::Error {
                error: "cache unavailable".to_string(),
            },
            status: 200,
            duration_ms: 3,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_records_reach_sink_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (dispatcher, handle) = AuditDispatcher::spawn(sink.clone(), 8);

        assert!(dispatcher.dispatch(record("all")));
        assert!(dispatcher.dispatch(record("cheapest")));
        drop(dispatcher);
        handle.await.unwrap();

        let endpoints: Vec<String> = sink.records.lock().iter().map(|r| r.endpoint.clone()).collect();
        assert_eq!(endpoints, vec!["all", "cheapest"]);
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_stop_writer() {
        let sink = Arc::new(RecordingSink::default());
        let (dispatcher, handle) = AuditDispatcher::spawn(sink.clone(), 8);

        dispatcher.dispatch(record("boom"));
        dispatcher.dispatch(record("panic"));
        dispatcher.dispatch(record("all"));
        drop(dispatcher);
        handle.await.unwrap();

        assert_eq!(sink.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (dispatcher, _handle) = AuditDispatcher::spawn(Arc::new(BlockedSink), 1);

        // First record is picked up by the stuck writer, second fills the queue.
        assert!(dispatcher.dispatch(record("first")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dispatcher.dispatch(record("second")));

        let accepted = tokio::time::timeout(Duration::from_millis(100), async {
            dispatcher.dispatch(record("third"))
        })
        .await
        .unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_record_serializes_on_demand() {
        let json = serde_json::to_value(record("all")).unwrap();

        assert_eq!(json["request"]["origin"], "IST");
        assert_eq!(json["request"]["departure_date"], "2026-11-20");
        assert_eq!(json["response"]["error"], "cache unavailable");
        assert_eq!(json["status"], 200);
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        tokio_test::assert_ok!(tokio_test::block_on(TracingAuditSink.write(record("all"))));
    }
}
