use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::document::OcrStatus;

/// Who triggered a status transition or review decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", untagged)]
pub enum Actor {
    System,
    User(Uuid),
}

impl Display for Actor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Actor::System => write!(f, "system"),
            Actor::User(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for Actor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Actor::System);
        }
        let id = Uuid::parse_str(s)
            .map_err(|_| anyhow::anyhow!("Invalid actor (expected 'system' or a user id): {}", s))?;
        Ok(Actor::User(id))
    }
}

/// Append-only record of one observed status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub document_id: Uuid,
    pub from_status: OcrStatus,
    pub to_status: OcrStatus,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for StatusHistoryEntry {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(StatusHistoryEntry {
            id: row.get("id"),
            document_id: row.get("document_id"),
            from_status: row.get::<String, _>("from_status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse from_status: {}", e).into())
            })?,
            to_status: row.get::<String, _>("to_status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse to_status: {}", e).into())
            })?,
            actor: row
                .get::<String, _>("actor")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse actor: {}", e).into()))?,
            created_at: row.get("created_at"),
        })
    }
}

/// Checks that a sequence of history entries is a legal walk of the state
/// machine. Used by tests and by the consistency audit.
pub fn is_valid_walk(entries: &[StatusHistoryEntry]) -> bool {
    let mut previous: Option<OcrStatus> = None;
    for entry in entries {
        if !entry.from_status.can_transition_to(entry.to_status) {
            return false;
        }
        if let Some(prev) = previous {
            if prev != entry.from_status {
                return false;
            }
        }
        previous = Some(entry.to_status);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_round_trip() {
        assert_eq!("system".parse::<Actor>().unwrap(), Actor::System);
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<Actor>().unwrap(), Actor::User(id));
        assert!("nobody".parse::<Actor>().is_err());
    }

    fn entry(from: OcrStatus, to: OcrStatus) -> StatusHistoryEntry {
        StatusHistoryEntry {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            from_status: from,
            to_status: to,
            actor: Actor::System,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path_is_valid_walk() {
        let entries = vec![
            entry(OcrStatus::Pending, OcrStatus::Processing),
            entry(OcrStatus::Processing, OcrStatus::Completed),
            entry(OcrStatus::Completed, OcrStatus::Verified),
        ];
        assert!(is_valid_walk(&entries));
    }

    #[test]
    fn test_retry_loop_is_valid_walk() {
        let entries = vec![
            entry(OcrStatus::Pending, OcrStatus::Processing),
            entry(OcrStatus::Processing, OcrStatus::Pending),
            entry(OcrStatus::Pending, OcrStatus::Processing),
            entry(OcrStatus::Processing, OcrStatus::Failed),
        ];
        assert!(is_valid_walk(&entries));
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let entries = vec![entry(OcrStatus::Pending, OcrStatus::Completed)];
        assert!(!is_valid_walk(&entries));
    }

    #[test]
    fn test_discontinuous_walk_rejected() {
        let entries = vec![
            entry(OcrStatus::Pending, OcrStatus::Processing),
            entry(OcrStatus::Completed, OcrStatus::Verified),
        ];
        assert!(!is_valid_walk(&entries));
    }
}
