use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// OCR processing status of a document.
///
/// Valid transitions:
/// - `pending -> processing` (claim)
/// - `processing -> completed | needs_review | failed | missing_remote_file`
/// - `processing -> pending` (retry scheduled)
/// - `completed | needs_review -> verified` (reviewer approval)
/// - `completed -> needs_review` (reviewer sends back)
/// - `completed | needs_review | failed | missing_remote_file -> pending` (manual rescan)
///
/// `verified` is terminal. `failed` and `missing_remote_file` are terminal for
/// the automatic pipeline; only a manual rescan moves them back to `pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    NeedsReview,
    Failed,
    MissingRemoteFile,
    Verified,
}

impl Display for OcrStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OcrStatus::Pending => write!(f, "pending"),
            OcrStatus::Processing => write!(f, "processing"),
            OcrStatus::Completed => write!(f, "completed"),
            OcrStatus::NeedsReview => write!(f, "needs_review"),
            OcrStatus::Failed => write!(f, "failed"),
            OcrStatus::MissingRemoteFile => write!(f, "missing_remote_file"),
            OcrStatus::Verified => write!(f, "verified"),
        }
    }
}

impl FromStr for OcrStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OcrStatus::Pending),
            "processing" => Ok(OcrStatus::Processing),
            "completed" => Ok(OcrStatus::Completed),
            "needs_review" => Ok(OcrStatus::NeedsReview),
            "failed" => Ok(OcrStatus::Failed),
            "missing_remote_file" => Ok(OcrStatus::MissingRemoteFile),
            "verified" => Ok(OcrStatus::Verified),
            _ => Err(anyhow::anyhow!("Invalid OCR status: {}", s)),
        }
    }
}

impl OcrStatus {
    /// Whether a transition from `self` to `to` is a legal edge of the state machine.
    pub fn can_transition_to(&self, to: OcrStatus) -> bool {
        use OcrStatus::*;
        match (self, to) {
            (Pending, Processing) => true,
            (Processing, Completed)
            | (Processing, NeedsReview)
            | (Processing, Failed)
            | (Processing, MissingRemoteFile)
            | (Processing, Pending) => true,
            (Completed, Verified) | (Completed, NeedsReview) => true,
            (NeedsReview, Verified) => true,
            // Manual rescan resets any reviewed or terminal document to pending.
            (Completed, Pending)
            | (NeedsReview, Pending)
            | (Failed, Pending)
            | (MissingRemoteFile, Pending) => true,
            _ => false,
        }
    }

    /// Terminal for the automatic pipeline: no transition without human action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OcrStatus::Failed | OcrStatus::MissingRemoteFile | OcrStatus::Verified
        )
    }

    /// States from which a reviewer may approve the extraction.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, OcrStatus::Completed | OcrStatus::NeedsReview)
    }
}

/// Declared document category, set at upload time by the intake flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    BirthCertificate,
    MarriageCertificate,
    DeathCertificate,
    Passport,
    MilitaryRecord,
    NaturalizationRecord,
    Other,
}

impl Display for DocumentCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentCategory::BirthCertificate => write!(f, "birth_certificate"),
            DocumentCategory::MarriageCertificate => write!(f, "marriage_certificate"),
            DocumentCategory::DeathCertificate => write!(f, "death_certificate"),
            DocumentCategory::Passport => write!(f, "passport"),
            DocumentCategory::MilitaryRecord => write!(f, "military_record"),
            DocumentCategory::NaturalizationRecord => write!(f, "naturalization_record"),
            DocumentCategory::Other => write!(f, "other"),
        }
    }
}

impl FromStr for DocumentCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "birth_certificate" => Ok(DocumentCategory::BirthCertificate),
            "marriage_certificate" => Ok(DocumentCategory::MarriageCertificate),
            "death_certificate" => Ok(DocumentCategory::DeathCertificate),
            "passport" => Ok(DocumentCategory::Passport),
            "military_record" => Ok(DocumentCategory::MilitaryRecord),
            "naturalization_record" => Ok(DocumentCategory::NaturalizationRecord),
            "other" => Ok(DocumentCategory::Other),
            _ => Err(anyhow::anyhow!("Invalid document category: {}", s)),
        }
    }
}

/// Role of the person the document belongs to within a case's family tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PersonRole {
    Applicant,
    Spouse,
    Parent,
    Grandparent,
    GreatGrandparent,
}

impl Display for PersonRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PersonRole::Applicant => write!(f, "applicant"),
            PersonRole::Spouse => write!(f, "spouse"),
            PersonRole::Parent => write!(f, "parent"),
            PersonRole::Grandparent => write!(f, "grandparent"),
            PersonRole::GreatGrandparent => write!(f, "great_grandparent"),
        }
    }
}

impl FromStr for PersonRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applicant" => Ok(PersonRole::Applicant),
            "spouse" => Ok(PersonRole::Spouse),
            "parent" => Ok(PersonRole::Parent),
            "grandparent" => Ok(PersonRole::Grandparent),
            "great_grandparent" => Ok(PersonRole::GreatGrandparent),
            _ => Err(anyhow::anyhow!("Invalid person role: {}", s)),
        }
    }
}

/// A case file document and its OCR pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub case_id: Uuid,
    pub person_id: Option<Uuid>,
    pub name: String,
    pub storage_path: String,
    pub content_type: String,
    pub file_size: i64,
    pub category: DocumentCategory,
    pub person_role: PersonRole,
    pub metadata: serde_json::Value,
    pub ocr_status: OcrStatus,
    pub ocr_confidence: Option<f64>,
    pub ocr_text: Option<String>,
    pub ocr_data: Option<serde_json::Value>,
    pub ocr_retry_count: i32,
    pub ocr_next_retry_at: Option<DateTime<Utc>>,
    pub ocr_error_message: Option<String>,
    pub ocr_reviewed_by: Option<Uuid>,
    pub ocr_reviewed_at: Option<DateTime<Utc>>,
    pub is_verified_by_hac: bool,
    pub data_applied_to_forms: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Document {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Document {
            id: row.get("id"),
            case_id: row.get("case_id"),
            person_id: row.get("person_id"),
            name: row.get("name"),
            storage_path: row.get("storage_path"),
            content_type: row.get("content_type"),
            file_size: row.get("file_size"),
            category: row.get::<String, _>("category").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse category: {}", e).into())
            })?,
            person_role: row.get::<String, _>("person_role").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse person_role: {}", e).into())
            })?,
            metadata: row.get("metadata"),
            ocr_status: row.get::<String, _>("ocr_status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse ocr_status: {}", e).into())
            })?,
            ocr_confidence: row.get("ocr_confidence"),
            ocr_text: row.get("ocr_text"),
            ocr_data: row.get("ocr_data"),
            ocr_retry_count: row.get("ocr_retry_count"),
            ocr_next_retry_at: row.get("ocr_next_retry_at"),
            ocr_error_message: row.get("ocr_error_message"),
            ocr_reviewed_by: row.get("ocr_reviewed_by"),
            ocr_reviewed_at: row.get("ocr_reviewed_at"),
            is_verified_by_hac: row.get("is_verified_by_hac"),
            data_applied_to_forms: row.get("data_applied_to_forms"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Document {
    /// Whether the scheduler may claim this document right now.
    pub fn is_due_for_processing(&self) -> bool {
        self.ocr_status == OcrStatus::Pending
            && self
                .ocr_next_retry_at
                .map(|at| at <= Utc::now())
                .unwrap_or(true)
    }

    pub fn can_retry(&self, max_retries: i32) -> bool {
        self.ocr_retry_count < max_retries
    }

    /// True when the declared category points at a historical/archival record
    /// (pre-war registries, Cyrillic or Gothic script).
    pub fn is_archival(&self) -> bool {
        self.metadata
            .get("archival")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Per-case document counts by OCR status.
#[derive(Debug, Default, Serialize)]
pub struct DocumentStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub needs_review: i64,
    pub failed: i64,
    pub missing_remote_file: i64,
    pub verified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_round_trip() {
        for status in [
            OcrStatus::Pending,
            OcrStatus::Processing,
            OcrStatus::Completed,
            OcrStatus::NeedsReview,
            OcrStatus::Failed,
            OcrStatus::MissingRemoteFile,
            OcrStatus::Verified,
        ] {
            assert_eq!(status.to_string().parse::<OcrStatus>().unwrap(), status);
        }
        assert!("invalid_status".parse::<OcrStatus>().is_err());
    }

    #[test]
    fn test_claim_is_the_only_edge_out_of_pending() {
        assert!(OcrStatus::Pending.can_transition_to(OcrStatus::Processing));
        assert!(!OcrStatus::Pending.can_transition_to(OcrStatus::Completed));
        assert!(!OcrStatus::Pending.can_transition_to(OcrStatus::Failed));
        assert!(!OcrStatus::Pending.can_transition_to(OcrStatus::Verified));
    }

    #[test]
    fn test_processing_outcomes() {
        for to in [
            OcrStatus::Completed,
            OcrStatus::NeedsReview,
            OcrStatus::Failed,
            OcrStatus::MissingRemoteFile,
            OcrStatus::Pending,
        ] {
            assert!(OcrStatus::Processing.can_transition_to(to), "{:?}", to);
        }
        assert!(!OcrStatus::Processing.can_transition_to(OcrStatus::Verified));
    }

    #[test]
    fn test_review_transitions() {
        assert!(OcrStatus::Completed.can_transition_to(OcrStatus::Verified));
        assert!(OcrStatus::Completed.can_transition_to(OcrStatus::NeedsReview));
        assert!(OcrStatus::NeedsReview.can_transition_to(OcrStatus::Verified));
        assert!(!OcrStatus::NeedsReview.can_transition_to(OcrStatus::Completed));
    }

    #[test]
    fn test_verified_is_terminal() {
        for to in [
            OcrStatus::Pending,
            OcrStatus::Processing,
            OcrStatus::Completed,
            OcrStatus::NeedsReview,
            OcrStatus::Failed,
        ] {
            assert!(!OcrStatus::Verified.can_transition_to(to), "{:?}", to);
        }
        assert!(OcrStatus::Verified.is_terminal());
    }

    #[test]
    fn test_manual_rescan_reaches_pending_from_terminal_failures() {
        assert!(OcrStatus::Failed.can_transition_to(OcrStatus::Pending));
        assert!(OcrStatus::MissingRemoteFile.can_transition_to(OcrStatus::Pending));
        // But never directly back into processing.
        assert!(!OcrStatus::Failed.can_transition_to(OcrStatus::Processing));
    }

    #[test]
    fn test_reviewable_states() {
        assert!(OcrStatus::Completed.is_reviewable());
        assert!(OcrStatus::NeedsReview.is_reviewable());
        assert!(!OcrStatus::Pending.is_reviewable());
        assert!(!OcrStatus::Verified.is_reviewable());
        assert!(!OcrStatus::Failed.is_reviewable());
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(
            "birth_certificate".parse::<DocumentCategory>().unwrap(),
            DocumentCategory::BirthCertificate
        );
        assert_eq!(
            "passport".parse::<DocumentCategory>().unwrap(),
            DocumentCategory::Passport
        );
        assert!("diploma".parse::<DocumentCategory>().is_err());
    }

    #[test]
    fn test_person_role_round_trip() {
        for role in [
            PersonRole::Applicant,
            PersonRole::Spouse,
            PersonRole::Parent,
            PersonRole::Grandparent,
            PersonRole::GreatGrandparent,
        ] {
            assert_eq!(role.to_string().parse::<PersonRole>().unwrap(), role);
        }
    }

    fn sample_document(status: OcrStatus) -> Document {
        Document {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            person_id: None,
            name: "akt-urodzenia.jpg".to_string(),
            storage_path: "cases/abc/akt-urodzenia.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            file_size: 120_000,
            category: DocumentCategory::BirthCertificate,
            person_role: PersonRole::Grandparent,
            metadata: serde_json::json!({}),
            ocr_status: status,
            ocr_confidence: None,
            ocr_text: None,
            ocr_data: None,
            ocr_retry_count: 0,
            ocr_next_retry_at: None,
            ocr_error_message: None,
            ocr_reviewed_by: None,
            ocr_reviewed_at: None,
            is_verified_by_hac: false,
            data_applied_to_forms: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pending_without_retry_time_is_due() {
        let doc = sample_document(OcrStatus::Pending);
        assert!(doc.is_due_for_processing());
    }

    #[test]
    fn test_pending_with_future_retry_time_is_not_due() {
        let mut doc = sample_document(OcrStatus::Pending);
        doc.ocr_next_retry_at = Some(Utc::now() + chrono::Duration::minutes(5));
        assert!(!doc.is_due_for_processing());
    }

    #[test]
    fn test_pending_with_elapsed_retry_time_is_due() {
        let mut doc = sample_document(OcrStatus::Pending);
        doc.ocr_next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(doc.is_due_for_processing());
    }

    #[test]
    fn test_processing_document_is_not_due() {
        let doc = sample_document(OcrStatus::Processing);
        assert!(!doc.is_due_for_processing());
    }

    #[test]
    fn test_can_retry_under_and_at_limit() {
        let mut doc = sample_document(OcrStatus::Pending);
        doc.ocr_retry_count = 2;
        assert!(doc.can_retry(3));
        doc.ocr_retry_count = 3;
        assert!(!doc.can_retry(3));
    }

    #[test]
    fn test_archival_flag_from_metadata() {
        let mut doc = sample_document(OcrStatus::Pending);
        assert!(!doc.is_archival());
        doc.metadata = serde_json::json!({"archival": true});
        assert!(doc.is_archival());
    }
}
