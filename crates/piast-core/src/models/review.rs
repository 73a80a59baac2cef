use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::history::Actor;

/// Reviewer decisions on an extraction. Decisions are immutable once recorded;
/// a correction is a new decision, never an edit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    ApproveWithChanges,
    RequestReReview,
    Rescan,
}

impl Display for ReviewAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ReviewAction::Approve => write!(f, "approve"),
            ReviewAction::ApproveWithChanges => write!(f, "approve_with_changes"),
            ReviewAction::RequestReReview => write!(f, "request_re_review"),
            ReviewAction::Rescan => write!(f, "rescan"),
        }
    }
}

/// Event types recorded in the audit log. Covers both review decisions and
/// system alerts; the `detail` payload carries reason codes only, never PII.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ReviewApproved,
    ReviewApprovedWithChanges,
    ReReviewRequested,
    RescanRequested,
    MissingRemoteFile,
    RetriesExhausted,
    CreditsExhausted,
    StorageFailure,
    StuckInProcessing,
    CapacityPressure,
    AttemptTimedOut,
}

impl Display for AuditEventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuditEventType::ReviewApproved => write!(f, "review_approved"),
            AuditEventType::ReviewApprovedWithChanges => write!(f, "review_approved_with_changes"),
            AuditEventType::ReReviewRequested => write!(f, "re_review_requested"),
            AuditEventType::RescanRequested => write!(f, "rescan_requested"),
            AuditEventType::MissingRemoteFile => write!(f, "missing_remote_file"),
            AuditEventType::RetriesExhausted => write!(f, "retries_exhausted"),
            AuditEventType::CreditsExhausted => write!(f, "credits_exhausted"),
            AuditEventType::StorageFailure => write!(f, "storage_failure"),
            AuditEventType::StuckInProcessing => write!(f, "stuck_in_processing"),
            AuditEventType::CapacityPressure => write!(f, "capacity_pressure"),
            AuditEventType::AttemptTimedOut => write!(f, "attempt_timed_out"),
        }
    }
}

impl FromStr for AuditEventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review_approved" => Ok(AuditEventType::ReviewApproved),
            "review_approved_with_changes" => Ok(AuditEventType::ReviewApprovedWithChanges),
            "re_review_requested" => Ok(AuditEventType::ReReviewRequested),
            "rescan_requested" => Ok(AuditEventType::RescanRequested),
            "missing_remote_file" => Ok(AuditEventType::MissingRemoteFile),
            "retries_exhausted" => Ok(AuditEventType::RetriesExhausted),
            "credits_exhausted" => Ok(AuditEventType::CreditsExhausted),
            "storage_failure" => Ok(AuditEventType::StorageFailure),
            "stuck_in_processing" => Ok(AuditEventType::StuckInProcessing),
            "capacity_pressure" => Ok(AuditEventType::CapacityPressure),
            "attempt_timed_out" => Ok(AuditEventType::AttemptTimedOut),
            _ => Err(anyhow::anyhow!("Invalid audit event type: {}", s)),
        }
    }
}

impl AuditEventType {
    /// Events that warrant operator attention beyond the audit row itself.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            AuditEventType::MissingRemoteFile
                | AuditEventType::RetriesExhausted
                | AuditEventType::CreditsExhausted
                | AuditEventType::StorageFailure
                | AuditEventType::StuckInProcessing
                | AuditEventType::CapacityPressure
                | AuditEventType::AttemptTimedOut
        )
    }
}

/// A single audit log entry, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub document_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub actor: Actor,
    pub event_type: AuditEventType,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn system(event_type: AuditEventType, detail: serde_json::Value) -> Self {
        Self {
            document_id: None,
            case_id: None,
            actor: Actor::System,
            event_type,
            detail,
            created_at: Utc::now(),
        }
    }

    pub fn for_document(mut self, document_id: Uuid, case_id: Uuid) -> Self {
        self.document_id = Some(document_id);
        self.case_id = Some(case_id);
        self
    }

    pub fn by(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for event in [
            AuditEventType::ReviewApproved,
            AuditEventType::RescanRequested,
            AuditEventType::MissingRemoteFile,
            AuditEventType::StuckInProcessing,
        ] {
            assert_eq!(
                event.to_string().parse::<AuditEventType>().unwrap(),
                event
            );
        }
        assert!("launch".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn test_review_decisions_are_not_alerts() {
        assert!(!AuditEventType::ReviewApproved.is_alert());
        assert!(!AuditEventType::RescanRequested.is_alert());
        assert!(AuditEventType::RetriesExhausted.is_alert());
        assert!(AuditEventType::CreditsExhausted.is_alert());
        assert!(AuditEventType::StuckInProcessing.is_alert());
    }

    #[test]
    fn test_event_builder() {
        let doc_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();
        let reviewer = Uuid::new_v4();
        let event = AuditEvent::system(
            AuditEventType::ReviewApproved,
            serde_json::json!({"action": "approve"}),
        )
        .for_document(doc_id, case_id)
        .by(Actor::User(reviewer));
        assert_eq!(event.document_id, Some(doc_id));
        assert_eq!(event.case_id, Some(case_id));
        assert_eq!(event.actor, Actor::User(reviewer));
    }
}
