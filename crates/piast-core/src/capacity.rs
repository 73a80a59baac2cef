//! Capacity gate trait for the pipeline worker.
//!
//! Implementations check whether this instance has enough resources (memory)
//! to start another processing attempt. When the gate is closed the worker
//! skips claiming for that cycle; pending documents stay claimable by other
//! instances.

use async_trait::async_trait;

#[async_trait]
pub trait CapacityGate: Send + Sync {
    /// Returns true if this instance can take on another processing attempt.
    async fn can_accept_work(&self) -> bool;
}
