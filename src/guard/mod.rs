//! Process-wide protective services.
//!
//! Constructed once at startup and shared across sessions: the circuit
//! breaker shields the backend from sustained failure, the resource guard
//! bounds fleet-wide concurrency and memory, and the context monitor warns
//! as conversations approach the backend's context window.

pub mod breaker;
pub mod context;
pub mod resources;

pub use breaker::CircuitBreaker;
pub use context::{ContextMonitor, ContextSeverity};
pub use resources::{HealthStatus, ResourceGuard};
