use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, warn};

use crate::store::TailStore;

/// Capacity of the cleaner command channel. Senders never block; a full
/// channel drops the command, which is safe because keys under a
/// retired generation are inert until the next reclaim.
const QUEUE_DEPTH: usize = 64;

/// Rotated store statistics files older than this are swept.
const STATS_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Commands accepted by the cleaner worker.
enum Command {
    /// Delete every key under `prefix`, then compact the store.
    Reclaim { prefix: String },
    /// Compact the store without deleting anything.
    Compact,
    /// Stop the worker once all earlier commands are done.
    Shutdown,
}

/// The background cleaner: a single worker thread that reclaims
/// abandoned key ranges from the shared store.
///
/// One command is processed at a time; `close` and `destroy` enqueue
/// and return without waiting.
pub struct Cleaner {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

/// Cheap cloneable sending side of the cleaner, held by every queue.
#[derive(Clone)]
pub struct CleanerHandle {
    tx: Sender<Command>,
}

impl CleanerHandle {
    /// Requests deletion of all keys under `prefix`.
    pub fn reclaim(&self, prefix: String) {
        self.send(Command::Reclaim { prefix });
    }

    /// Requests a store compaction.
    pub fn compact(&self) {
        self.send(Command::Compact);
    }

    fn send(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("cleaner queue full, dropping request");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("cleaner stopped, dropping request");
            }
        }
    }
}

impl Cleaner {
    /// Spawns the cleaner worker over the shared store. `stats_dir` is
    /// the holding area swept for rotated statistics files.
    pub fn spawn<S: TailStore>(store: S, stats_dir: PathBuf) -> Self {
        let (tx, rx) = channel::bounded::<Command>(QUEUE_DEPTH);
        let worker = thread::Builder::new()
            .name("queue-cleaner".to_owned())
            .spawn(move || run_worker(store, stats_dir, rx))
            .expect("failed to spawn cleaner thread");
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Returns a sending handle for queue instances.
    pub fn handle(&self) -> CleanerHandle {
        CleanerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Processes all pending commands, then stops and joins the worker.
    pub fn shutdown(mut self) {
        // A blocking send: shutdown must not be dropped by a full queue.
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("cleaner worker panicked");
            }
        }
    }
}

fn run_worker<S: TailStore>(store: S, stats_dir: PathBuf, rx: Receiver<Command>) {
    loop {
        let command = match rx.recv() {
            Ok(command) => command,
            Err(_) => break,
        };
        match command {
            Command::Shutdown => break,
            Command::Reclaim { prefix } => reclaim(&store, &prefix),
            Command::Compact => {
                if let Err(e) = store.compact() {
                    error!("cleaner: compaction failed: {e}");
                }
            }
        }
        sweep_stats_files(&stats_dir);
    }
    debug!("cleaner worker stopped");
}

/// Deletes every key under `prefix` and compacts if anything went.
///
/// Failures are logged and the command ends; leftover keys belong to a
/// retired generation and no instance will ever read them.
fn reclaim<S: TailStore>(store: &S, prefix: &str) {
    let mut deleted = 0u64;
    for pair in store.scan_from(prefix) {
        match pair {
            Ok((key, _)) if key.starts_with(prefix) => {
                if let Err(e) = store.remove(&key) {
                    error!("cleaner: delete of {key} failed: {e}");
                    return;
                }
                deleted += 1;
            }
            Ok(_) => break,
            Err(e) => {
                error!("cleaner: scan under {prefix} failed: {e}");
                return;
            }
        }
    }
    if deleted > 0 {
        debug!("cleaner: reclaimed {deleted} keys under {prefix}");
        if let Err(e) = store.compact() {
            error!("cleaner: compaction failed: {e}");
        }
    }
}

/// Removes rotated store statistics files (`je.stat.*.csv`, keeping the
/// live `je.stat.csv`) older than a day.
fn sweep_stats_files(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cleaner: cannot sweep {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("je.stat.") || !name.ends_with(".csv") || name == "je.stat.csv" {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > STATS_MAX_AGE);
        if stale {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("cleaner: cannot remove {name}: {e}");
            } else {
                debug!("cleaner: removed stale stats file {name}");
            }
        }
    }
}
