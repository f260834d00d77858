use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::cleaner::CleanerHandle;
use crate::store::TailStore;
use crate::{QueueError, Result};

/// Number of events held in the in-memory head before writes spill to
/// the shared store.
pub const MEMORY_BUFFER: u64 = 10;

/// Upper bound on events per generation. Sequence numbers are
/// zero-padded to the width of this constant so that lexicographic key
/// order equals write order.
pub const MAX_EVENTS: u64 = 100_000_000;

/// Per-queue mutable state: counters, the in-memory head, and the peek
/// slot. Guarded by one mutex; a single producer and a single consumer
/// are expected, so contention is negligible.
struct State {
    /// Generation adopted from the process-wide counter. Namespaces all
    /// disk keys of this instance.
    version: u64,
    /// Events written in the current generation.
    writes: u64,
    /// Events delivered in the current generation. `reads == writes`
    /// iff the queue is drained.
    reads: u64,
    /// In-memory head holding the first `MEMORY_BUFFER` events.
    head: VecDeque<Vec<u8>>,
    /// Lookahead slot making `peek` idempotent.
    peeked: Option<Vec<u8>>,
}

/// A per-route FIFO event buffer that spills from a small in-memory
/// head to the shared store once `MEMORY_BUFFER` events are pending.
///
/// Clones share state, so a producer thread and a consumer thread can
/// each hold one. Draining the queue to exhaustion resets it in place:
/// a subsequent `write` starts a fresh generation whose disk keys
/// cannot collide with leftovers from the previous one.
pub struct ElasticQueue<S: TailStore> {
    id: Arc<str>,
    store: S,
    cleaner: CleanerHandle,
    versions: Arc<AtomicU64>,
    state: Arc<Mutex<State>>,
}

impl<S: TailStore> Clone for ElasticQueue<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            store: self.store.clone(),
            cleaner: self.cleaner.clone(),
            versions: self.versions.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: TailStore> ElasticQueue<S> {
    /// Creates a queue for the given route.
    ///
    /// The route is sanitized into the queue id. A fresh generation is
    /// taken from `versions`, so two live instances for the same route
    /// never share disk keys.
    pub fn new(route: &str, store: S, cleaner: CleanerHandle, versions: Arc<AtomicU64>) -> Self {
        let version = versions.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            id: sanitize_route(route).into(),
            store,
            cleaner,
            versions,
            state: Arc::new(Mutex::new(State {
                version,
                writes: 0,
                reads: 0,
                head: VecDeque::new(),
                peeked: None,
            })),
        }
    }

    /// The sanitized queue id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when nothing has been written since construction or the
    /// last reset. Note this also holds for a queue that was drained
    /// and is awaiting its next burst.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().writes == 0
    }

    /// Appends one event.
    ///
    /// The first `MEMORY_BUFFER` events of a generation stay in memory;
    /// later ones go to the shared store under a versioned key. Writers
    /// never wait beyond the underlying store `put`.
    pub fn write(&self, event: &[u8]) -> Result<()> {
        if event.is_empty() {
            return Err(QueueError::EmptyEvent);
        }
        let mut state = self.state.lock().unwrap();
        if state.writes < MEMORY_BUFFER {
            state.head.push_back(event.to_vec());
        } else {
            let key = event_key(&self.id, state.version, state.writes);
            self.store.put(&key, event)?;
        }
        state.writes += 1;
        Ok(())
    }

    /// Returns the next event without consuming it.
    ///
    /// Idempotent: repeated peeks without an intervening `read` return
    /// the same event.
    pub fn peek(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if state.peeked.is_none() {
            let next = self.next_event(&mut state)?;
            state.peeked = next;
        }
        Ok(state.peeked.clone())
    }

    /// Removes and returns the next event, or `None` once the queue has
    /// caught up (which resets it for the next burst).
    pub fn read(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.peeked.take() {
            return Ok(Some(event));
        }
        self.next_event(&mut state)
    }

    /// Marks a drain boundary.
    ///
    /// Any unread spilled events are abandoned to the cleaner; counters
    /// reset and a new generation is adopted, so the instance remains
    /// usable. No-op when nothing was written.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        self.close_state(&mut state);
    }

    /// Closes the queue and reclaims every generation this id ever
    /// produced. Intended for when the route is retired.
    pub fn destroy(&self) {
        self.close();
        self.cleaner.reclaim(format!("{}/", self.id));
    }

    fn next_event(&self, state: &mut State) -> Result<Option<Vec<u8>>> {
        if state.reads >= state.writes {
            self.close_state(state);
            return Ok(None);
        }
        if state.reads < MEMORY_BUFFER {
            let event = state.head.pop_front();
            if event.is_some() {
                state.reads += 1;
            } else {
                // Head must be populated while reads < MEMORY_BUFFER <= writes.
                error!(
                    "queue {}: memory head empty at offset {}",
                    self.id, state.reads
                );
            }
            return Ok(event);
        }
        let key = event_key(&self.id, state.version, state.reads);
        match self.store.scan_from(&key).next() {
            Some(Ok((actual, value))) if actual == key => {
                self.store.remove(&key)?;
                state.reads += 1;
                Ok(Some(value))
            }
            Some(Ok((actual, _))) => {
                // Transient miss: do not advance, so the next read
                // retries the same offset.
                warn!("queue {}: expected key {key}, actual {actual}", self.id);
                Ok(None)
            }
            None => {
                warn!("queue {}: expected key {key}, store exhausted", self.id);
                Ok(None)
            }
            Some(Err(e)) => Err(e),
        }
    }

    fn close_state(&self, state: &mut State) {
        if state.writes == 0 {
            return;
        }
        if state.writes > MEMORY_BUFFER {
            if state.reads < state.writes {
                // Reclaim only the generation being abandoned, never
                // the whole id: a new generation may already be live.
                self.cleaner
                    .reclaim(generation_prefix(&self.id, state.version));
            } else {
                self.cleaner.compact();
            }
        }
        state.head.clear();
        state.peeked = None;
        state.writes = 0;
        state.reads = 0;
        state.version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
    }
}

/// Builds the store key for one event of one generation.
fn event_key(id: &str, version: u64, seq: u64) -> String {
    format!("{id}/{version}/{seq:09}")
}

/// Key prefix covering every event of one generation.
fn generation_prefix(id: &str, version: u64) -> String {
    format!("{id}/{version}/")
}

/// Derives a queue id from a service route name.
///
/// Routes already inside the service-name alphabet pass through; any
/// other route is replaced wholesale by a hashed surrogate so ids never
/// contain the `/` key separator.
fn sanitize_route(route: &str) -> String {
    let clean = !route.is_empty()
        && route
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if clean {
        route.to_owned()
    } else {
        let mut hasher = DefaultHasher::new();
        route.hash(&mut hasher);
        format!("route-{:016x}", hasher.finish())
    }
}
