//! Document processing pipeline: orchestration, confidence gating, rate
//! limiting, review gate, alerts, and the stuck-document scanner.

pub mod alerts;
pub mod orchestrator;
pub mod outcome;
pub mod rate_limit;
pub mod review;
pub mod stuck;
pub mod test_helpers;

pub use alerts::{AlertService, AlertSink, EmailAlertSink};
pub use orchestrator::{InvokerSelector, Orchestrator, ProcessOutcome, ProcessingPolicy};
pub use outcome::{classify_outcome, ConfidencePolicy, ExtractionDisposition};
pub use rate_limit::CaseRateLimiter;
pub use review::ReviewService;
pub use stuck::StuckScanner;
