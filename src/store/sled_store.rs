use std::path::Path;

use sled::Db;

use super::{ScanIter, TailStore};
use crate::Result;

/// Checkpoint interval for the backing store, in milliseconds.
const FLUSH_INTERVAL_MS: u64 = 60_000;

/// The shared event store backed by the `sled` embedded database.
///
/// `sled::Db` is internally `Arc`-based, so cloning is cheap and
/// thread-safe by design; concurrent operations on disjoint keys need
/// no external locking.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Opens the store inside the given holding area, creating it if
    /// absent. Writes are checkpointed once a minute; the store is
    /// allowed to fill the device, so out-of-space errors surface to
    /// callers rather than being pre-empted.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::new()
            .path(dir)
            .flush_every_ms(Some(FLUSH_INTERVAL_MS))
            .open()?;
        Ok(Self { db })
    }
}

impl TailStore for SledStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn scan_from(&self, start: &str) -> ScanIter {
        let iter = self
            .db
            .range(start.as_bytes().to_vec()..)
            .map(|pair| -> Result<(String, Vec<u8>)> {
                let (key, value) = pair?;
                Ok((String::from_utf8(key.to_vec())?, value.to_vec()))
            });
        Box::new(iter)
    }

    fn compact(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
