/// Lifecycle audit events for teebox sessions
/// Every transition attempt, successful or not, leaves one structured event
/// correlated by session id. Events are kept on the session and emitted as
/// JSON under the `teebox::audit` log target.
use crate::config::types::{Operation, SessionState};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "teebox::audit";

/// Event severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleEventType {
    Created,
    ProvisionFailed,
    Uploaded,
    UploadRejected,
    TransferFailed,
    Verified,
    VerificationRejected,
    IntegrityViolation,
    Executed,
    ExecutionFault,
    Destroyed,
    TeardownFailed,
    PreconditionViolation,
}

impl LifecycleEventType {
    pub fn default_severity(&self) -> Severity {
        match self {
            LifecycleEventType::Created
            | LifecycleEventType::Uploaded
            | LifecycleEventType::Verified
            | LifecycleEventType::Executed
            | LifecycleEventType::Destroyed => Severity::Low,

            LifecycleEventType::UploadRejected
            | LifecycleEventType::VerificationRejected
            | LifecycleEventType::PreconditionViolation => Severity::Medium,

            LifecycleEventType::ProvisionFailed
            | LifecycleEventType::TransferFailed
            | LifecycleEventType::ExecutionFault => Severity::High,

            LifecycleEventType::IntegrityViolation | LifecycleEventType::TeardownFailed => {
                Severity::Critical
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub session_id: Uuid,
    pub event_type: LifecycleEventType,
    pub severity: Severity,
    pub operation: Operation,
    pub from: SessionState,
    pub to: SessionState,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// Per-session event log
#[derive(Debug, Clone)]
pub struct AuditTrail {
    session_id: Uuid,
    events: Vec<LifecycleEvent>,
}

impl AuditTrail {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            events: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        event_type: LifecycleEventType,
        operation: Operation,
        from: SessionState,
        to: SessionState,
        details: impl Into<String>,
    ) {
        let event = LifecycleEvent {
            session_id: self.session_id,
            event_type,
            severity: event_type.default_severity(),
            operation,
            from,
            to,
            timestamp: Utc::now(),
            details: details.into(),
        };
        emit(&event);
        self.events.push(event);
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn last(&self) -> Option<&LifecycleEvent> {
        self.events.last()
    }

    pub fn count(&self, event_type: LifecycleEventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

fn emit(event: &LifecycleEvent) {
    let line = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => format!("{:?} (serialization failed: {})", event, e),
    };
    match event.severity {
        Severity::Critical => error!(target: AUDIT_TARGET, "{}", line),
        Severity::High | Severity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
        Severity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }
}
