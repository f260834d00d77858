#![deny(missing_docs)]

//! A disk-spilling FIFO event queue library.
//!
//! Each route gets an [`ElasticQueue`]: a single-producer /
//! single-consumer buffer that keeps a short burst in memory and
//! transparently spills the rest into one shared embedded store, so a
//! slow consumer never forces unbounded heap growth. Draining a queue
//! resets it in place; abandoned on-disk generations are reclaimed by a
//! background cleaner.

mod cleaner;
mod config;
mod error;
mod holding;
mod queue;
mod runtime;
mod store;

pub use cleaner::{Cleaner, CleanerHandle};
pub use config::{Config, DATA_STORE_KEY, DEFAULT_DATA_STORE, RUNNING_IN_CLOUD_KEY};
pub use error::{QueueError, Result};
pub use holding::{
    sweep_stale, Heartbeat, HoldingArea, HEARTBEAT_INTERVAL, RUNNING_MARKER, STALE_AFTER,
};
pub use queue::{ElasticQueue, MAX_EVENTS, MEMORY_BUFFER};
pub use runtime::{shared, shutdown_shared, Runtime};
pub use store::{ScanIter, SledStore, TailStore};

/// The queue type wired to the shared sled store.
pub type Queue = ElasticQueue<SledStore>;

/// Opens a queue for `route` on the process-wide runtime.
///
/// The first call brings the whole subsystem up; see [`shared`].
pub fn open(route: &str) -> Queue {
    runtime::shared().queue(route)
}
