use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, OnceLock};

use log::{error, info};

use crate::cleaner::{Cleaner, CleanerHandle};
use crate::config::Config;
use crate::holding::{Heartbeat, HoldingArea};
use crate::queue::ElasticQueue;
use crate::store::{SledStore, TailStore};
use crate::{Queue, Result};

/// The shared queue subsystem: one holding area, one store, one
/// cleaner, one heartbeat, and the generation counter, owned together.
///
/// Production code uses the process-wide instance behind [`shared`];
/// a `Runtime` can also be built directly against an explicit
/// [`Config`], which is how the integration tests isolate themselves.
pub struct Runtime {
    holding: HoldingArea,
    store: SledStore,
    versions: Arc<AtomicU64>,
    cleaner_handle: CleanerHandle,
    cleaner: Mutex<Option<Cleaner>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl Runtime {
    /// Brings the subsystem up: sweeps stale holding areas, opens the
    /// store, and starts the cleaner and heartbeat workers.
    pub fn init(config: Config) -> Result<Self> {
        let holding = HoldingArea::prepare(&config)?;
        let store = SledStore::open(holding.dir())?;
        let cleaner = Cleaner::spawn(store.clone(), holding.dir().to_path_buf());
        let cleaner_handle = cleaner.handle();
        let heartbeat = holding.start_heartbeat();
        info!("queue subsystem ready");
        Ok(Self {
            holding,
            store,
            versions: Arc::new(AtomicU64::new(0)),
            cleaner_handle,
            cleaner: Mutex::new(Some(cleaner)),
            heartbeat: Mutex::new(Some(heartbeat)),
        })
    }

    /// Builds a queue for the given route on this runtime's store.
    pub fn queue(&self, route: &str) -> Queue {
        ElasticQueue::new(
            route,
            self.store.clone(),
            self.cleaner_handle.clone(),
            self.versions.clone(),
        )
    }

    /// Releases the subsystem: stops the heartbeat, drains and joins
    /// the cleaner, flushes the store, and wipes the holding area.
    ///
    /// Idempotent. Failures are caught and logged per resource so one
    /// does not prevent the others.
    pub fn shutdown(&self) {
        if let Some(mut heartbeat) = self.heartbeat.lock().unwrap().take() {
            heartbeat.stop();
        }
        if let Some(cleaner) = self.cleaner.lock().unwrap().take() {
            cleaner.shutdown();
        } else {
            return; // already shut down
        }
        if let Err(e) = self.store.compact() {
            error!("shutdown: store flush failed: {e}");
        }
        if let Err(e) = self.holding.remove() {
            error!("shutdown: holding area cleanup failed: {e}");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

static SHARED: OnceLock<Runtime> = OnceLock::new();

/// The process-wide runtime, initialized from the ambient [`Config`] on
/// first use.
///
/// The queue subsystem cannot function without its backing store, so a
/// failed open terminates the process with a non-zero status.
pub fn shared() -> &'static Runtime {
    SHARED.get_or_init(|| match Runtime::init(Config::new()) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot open queue backing store: {e}");
            process::exit(1);
        }
    })
}

/// Shuts the process-wide runtime down, if it was ever initialized.
/// Intended to run from the host's shutdown hook.
pub fn shutdown_shared() {
    if let Some(runtime) = SHARED.get() {
        runtime.shutdown();
    }
}
