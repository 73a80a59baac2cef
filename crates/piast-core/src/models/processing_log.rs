use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Status of one processing attempt in the audit ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Processing,
    Completed,
    Failed,
}

impl Display for AttemptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AttemptStatus::Processing => write!(f, "processing"),
            AttemptStatus::Completed => write!(f, "completed"),
            AttemptStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(AttemptStatus::Processing),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid attempt status: {}", s)),
        }
    }
}

/// One row per processing attempt. Written when the attempt starts, closed
/// exactly once on completion or failure, never mutated afterward.
///
/// The trailing-window count of these rows per case is the source of truth
/// for case-level rate limiting, so the limit holds across worker instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub id: Uuid,
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_bytes: Option<i64>,
    pub confidence: Option<f64>,
    pub extracted: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ProcessingLogEntry {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ProcessingLogEntry {
            id: row.get("id"),
            document_id: row.get("document_id"),
            case_id: row.get("case_id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse attempt status: {}", e).into())
            })?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            input_bytes: row.get("input_bytes"),
            confidence: row.get("confidence"),
            extracted: row.get("extracted"),
            error_code: row.get("error_code"),
            error_message: row.get("error_message"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_status_round_trip() {
        for status in [
            AttemptStatus::Processing,
            AttemptStatus::Completed,
            AttemptStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<AttemptStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<AttemptStatus>().is_err());
    }
}
