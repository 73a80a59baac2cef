//! Postgres persistence for the document pipeline.
//!
//! Repositories own their SQL; all state transitions go through conditional
//! status-guarded updates so that two workers racing for the same document can
//! never both win. Status history and the attempt ledger are append-only.

pub mod db;
pub mod store;

pub use db::audit::AuditRepository;
pub use db::documents::{DocumentRepository, NewDocument};
pub use db::processing_log::ProcessingLogRepository;
pub use store::{AuditTrail, DocumentStore, ProcessingLedger};
