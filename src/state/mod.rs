//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `TaskState`: lifecycle of a single fetch task (pending, in flight, retryable, terminal)
//! - `ProxyState`: health of a single proxy (active, cooling, banned)
//! - `RequestPacer`: spacing of consecutive fetch starts against the source

mod pacer;
mod proxy_state;
mod task_state;

// Re-export main types
pub use pacer::RequestPacer;
pub use proxy_state::ProxyState;
pub use task_state::{RetryKind, TaskState};
