//! Persistence reconciler
//!
//! This module turns the stream of extracted records into durable rows:
//! - Idempotent, individually transactional upserts per record level
//! - Business-key to surrogate-id resolution, with a bounded holding area
//!   for details that arrive before their item
//! - Per-collection sharding so concurrent writes never race on one key

mod pending;
mod reconciler;
mod writer;

pub use pending::{ItemKey, PendingBuffer, PendingDetail};
pub use reconciler::{DetailOutcome, Reconciler, SweepReport};
pub use writer::PersistenceWriter;
