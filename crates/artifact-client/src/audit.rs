use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verify::{EnforcementMode, SignatureStatus};

/// One verification decision, recorded whether it passed or failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerificationAuditEvent {
    pub reference: String,
    pub artifact_digest: Option<String>,
    pub signature_status: SignatureStatus,
    pub enforcement: EnforcementMode,
    pub environment: Option<String>,
    pub reasons: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only, thread-safe event sink. Events from one operation keep
/// their order; every append is mirrored to the tracing log with stable
/// field names so external collectors can scrape it.
#[derive(Default)]
pub struct AuditSink {
    events: Mutex<Vec<VerificationAuditEvent>>,
}

impl AuditSink {
    pub fn new() -> Self {
        AuditSink::default()
    }

    pub fn emit(&self, event: VerificationAuditEvent) {
        tracing::info!(
            reference = event.reference.as_str(),
            signature_status = ?event.signature_status,
            enforcement = ?event.enforcement,
            environment = event.environment.as_deref().unwrap_or("-"),
            reasons = ?event.reasons,
            "signature verification audited"
        );
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn drain(&self) -> Vec<VerificationAuditEvent> {
        self.events
            .lock()
            .map(|mut events| events.split_off(0))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<VerificationAuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(reference: &str) -> VerificationAuditEvent {
        VerificationAuditEvent {
            reference: reference.to_string(),
            artifact_digest: None,
            signature_status: SignatureStatus::Unsigned,
            enforcement: EnforcementMode::Warn,
            environment: None,
            reasons: vec![],
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn events_keep_emission_order() {
        let sink = AuditSink::new();
        sink.emit(event("first"));
        sink.emit(event("second"));
        let drained = sink.drain();
        assert_eq!(drained[0].reference, "first");
        assert_eq!(drained[1].reference, "second");
        assert!(sink.drain().is_empty());
    }
}
