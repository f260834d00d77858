use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::Result;

/// Liveness marker file kept fresh by the heartbeat.
pub const RUNNING_MARKER: &str = "RUNNING";

/// Interval between heartbeat rewrites of the marker.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// A holding area whose marker is older than this belongs to a dead
/// process and is reclaimed.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// The on-disk directory holding the shared store files and the
/// liveness marker for one process.
///
/// Outside the cloud each process gets its own subdirectory of the
/// configured root; in cloud mode the root itself is the holding area.
pub struct HoldingArea {
    dir: PathBuf,
    in_cloud: bool,
}

impl HoldingArea {
    /// Resolves and creates the active holding area.
    ///
    /// Leftover areas of crashed predecessors are swept first: a store
    /// whose process died mid-write is unsafe to reopen, so anything
    /// without a fresh marker is deleted before our own store opens.
    pub fn prepare(config: &Config) -> Result<Self> {
        let root = config.data_store();
        let in_cloud = config.running_in_cloud();
        fs::create_dir_all(&root)?;
        sweep_stale(&root, in_cloud, STALE_AFTER)?;

        let dir = if in_cloud {
            root
        } else {
            root.join(instance_id())
        };
        fs::create_dir_all(&dir)?;
        info!("holding area at {}", dir.display());
        Ok(Self { dir, in_cloud })
    }

    /// The active holding directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts the heartbeat worker for this area.
    pub fn start_heartbeat(&self) -> Heartbeat {
        Heartbeat::start(self.dir.join(RUNNING_MARKER))
    }

    /// Releases the area at shutdown.
    ///
    /// In cloud mode only the marker goes, since the directory may be
    /// shared; otherwise the whole tree is deleted.
    pub fn remove(&self) -> Result<()> {
        if self.in_cloud {
            fs::remove_file(self.dir.join(RUNNING_MARKER))?;
        } else {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// Stable directory name for this process under the data store root.
fn instance_id() -> String {
    format!("instance-{}", process::id())
}

/// Removes holding areas whose liveness marker has not been refreshed
/// within `stale_after`.
///
/// Scans each subdirectory of `root`; in cloud mode a stale marker at
/// the root itself is removed as well. Directories without a marker are
/// left alone.
pub fn sweep_stale(root: &Path, in_cloud: bool, stale_after: Duration) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let marker = path.join(RUNNING_MARKER);
        if marker_is_stale(&marker, stale_after) {
            info!("removing stale holding area {}", path.display());
            if let Err(e) = fs::remove_dir_all(&path) {
                warn!("cannot remove stale area {}: {e}", path.display());
            }
        }
    }
    if in_cloud {
        let marker = root.join(RUNNING_MARKER);
        if marker_is_stale(&marker, stale_after) {
            info!("removing stale marker {}", marker.display());
            if let Err(e) = fs::remove_file(&marker) {
                warn!("cannot remove stale marker {}: {e}", marker.display());
            }
        }
    }
    Ok(())
}

/// True when the marker exists and its mtime is older than the window.
fn marker_is_stale(marker: &Path, stale_after: Duration) -> bool {
    let Ok(metadata) = marker.metadata() else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= stale_after)
}

/// Background worker that rewrites the liveness marker every
/// `HEARTBEAT_INTERVAL` until stopped.
///
/// Any rewrite within the staleness window keeps the area alive, so
/// the coarse interval leaves two missed beats of slack.
pub struct Heartbeat {
    stop: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn start(marker: PathBuf) -> Self {
        let (stop, rx) = channel::bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("holding-heartbeat".to_owned())
            .spawn(move || loop {
                write_marker(&marker);
                match rx.recv_timeout(HEARTBEAT_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            })
            .expect("failed to spawn heartbeat thread");
        Self {
            stop,
            worker: Some(worker),
        }
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("heartbeat worker panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_marker(marker: &Path) {
    if let Err(e) = fs::write(marker, Utc::now().to_rfc3339()) {
        warn!("cannot refresh {}: {e}", marker.display());
    } else {
        debug!("refreshed {}", marker.display());
    }
}
