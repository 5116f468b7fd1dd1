//! Audit trail for auth activity.
//!
//! Every event is mirrored to `tracing` (target `audit`) and appended to an
//! [`AuditSink`]. Sink failures never reach the caller: the event is written
//! to target `audit_fallback` instead.

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::models::{AuditEvent, AuditEventType};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error>;
}

/// Sink that only emits structured log lines. The log pipeline is the store.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        let record = serde_json::to_string(event)?;
        tracing::info!(target: "audit_store", event = %record, "Audit event stored");
        Ok(())
    }
}

/// In-process sink, used in tests and for local inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit sink mutex poisoned: {}", e))?
            .push(event.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Append an event. Completes once the sink has the entry or has failed.
    pub async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            outcome = ?event.outcome,
            user_id = event.user_id.as_deref().unwrap_or("-"),
            email = event.email.as_deref().unwrap_or("-"),
            ip = event.ip_address.as_deref().unwrap_or("-"),
            "Audit event"
        );

        let failure = match tokio::time::timeout(self.timeout, self.sink.append(&event)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.timeout.as_millis()),
        };

        let serialized = serde_json::to_string(&event)
            .unwrap_or_else(|_| format!("{:?}", event));
        tracing::error!(
            target: "audit_fallback",
            error = %failure,
            event = %serialized,
            "Failed to write audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditOutcome;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _event: &AuditEvent) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn append(&self, _event: &AuditEvent) -> Result<(), anyhow::Error> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_reach_the_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone(), Duration::from_secs(1));

        logger
            .record(
                AuditEvent::failure(AuditEventType::LoginFailure)
                    .email("a@b.com")
                    .details(serde_json::json!({"reason": "invalid_password"})),
            )
            .await;

        let events = sink.events_of(AuditEventType::LoginFailure);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Failure);
        assert_eq!(events[0].email.as_deref(), Some("a@b.com"));
        assert!(events[0].user_id.is_none());
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let logger = AuditLogger::new(Arc::new(FailingSink), Duration::from_secs(1));
        logger
            .record(AuditEvent::success(AuditEventType::Logout).user("u1"))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_times_out() {
        let logger = AuditLogger::new(Arc::new(StalledSink), Duration::from_millis(50));
        logger
            .record(AuditEvent::success(AuditEventType::Logout).user("u1"))
            .await;
    }
}
