use crate::Result;

/// Iterator over `(key, value)` pairs returned by a store scan.
pub type ScanIter = Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + Send>;

/// Trait for the shared ordered key-value store backing spilled events.
///
/// One store instance is shared by every queue in the process; queues
/// partition its keyspace by `id/version/` prefixes and never touch each
/// other's keys.
///
/// Implementors must be cloneable (cheaply, via `Arc`) and safe to send
/// across threads, so queue instances, the cleaner worker, and the
/// shutdown path can all hold handles to the same store.
pub trait TailStore: Clone + Send + 'static {
    /// Inserts or overwrites a key.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Point lookup.
    ///
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Scans keys in lexicographic order starting at the first key
    /// greater than or equal to `start`.
    fn scan_from(&self, start: &str) -> ScanIter;

    /// Reclaims space from deleted entries. May block briefly.
    fn compact(&self) -> Result<()>;
}

mod sled_store;

pub use self::sled_store::SledStore;
