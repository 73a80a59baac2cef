pub mod document;
pub mod extraction;
pub mod history;
pub mod processing_log;
pub mod review;

pub use document::{Document, DocumentCategory, DocumentStats, OcrStatus, PersonRole};
pub use extraction::{DocumentKind, ExtractedFields, ParsedExtraction};
pub use history::{is_valid_walk, Actor, StatusHistoryEntry};
pub use processing_log::{AttemptStatus, ProcessingLogEntry};
pub use review::{AuditEvent, AuditEventType, ReviewAction};
