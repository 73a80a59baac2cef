//! Worker runtime: polling queue, capacity gate, telemetry, and startup.

pub mod capacity;
pub mod dispatch;
pub mod queue;
pub mod setup;
pub mod telemetry;

pub use capacity::MemoryCapacityGate;
pub use dispatch::DocumentProcessor;
pub use queue::{ProcessingQueue, QueueConfig};
