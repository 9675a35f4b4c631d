//! Reference-identity map for object arguments.
//!
//! Object arguments (`Arc`s, interned handles) contribute to a cache key by
//! *which* allocation they point at, never by their contents. Each allocation
//! seen by a class is given a small synthetic id. The map holds only weak
//! probes, so it never keeps an argument alive; when an address is reused by
//! a new allocation after the old one died, the new one receives a fresh id.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Synthetic identifier for one object reference, scoped to one class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning liveness check for a tracked allocation.
pub(crate) trait Liveness: Send {
    fn is_live(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

struct Tracked {
    id: ObjectId,
    probe: Box<dyn Liveness>,
}

/// Tracked-entry count below which no sweep runs.
const MIN_SWEEP_AT: usize = 64;

/// Pointer-identity to [`ObjectId`] map.
///
/// Dead entries are swept whenever the map has doubled since the last sweep,
/// so its size stays proportional to the number of live tracked objects.
pub struct ObjectIdentityMap {
    next_id: u64,
    entries: HashMap<usize, Tracked>,
    sweep_at: usize,
    lookup_only: bool,
    unseen: bool,
}

impl Default for ObjectIdentityMap {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP_AT,
            lookup_only: false,
            unseen: false,
        }
    }
}

impl ObjectIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `derive` with id assignment enabled.
    pub(crate) fn assigning<R>(&mut self, derive: impl FnOnce(&mut Self) -> R) -> R {
        self.lookup_only = false;
        derive(self)
    }

    /// Run `derive` without assigning ids.
    ///
    /// Returns `None` if an object argument has never been seen (or has been
    /// replaced at its address): no key derived from it can be in the pool.
    pub(crate) fn looking_up<R>(&mut self, derive: impl FnOnce(&mut Self) -> R) -> Option<R> {
        self.lookup_only = true;
        self.unseen = false;
        let out = derive(self);
        self.lookup_only = false;
        (!std::mem::take(&mut self.unseen)).then_some(out)
    }

    /// Id for the allocation behind `obj`, assigning one on first sight.
    pub fn identify_arc<T: ?Sized + Send + Sync + 'static>(&mut self, obj: &Arc<T>) -> ObjectId {
        self.identify(Arc::as_ptr(obj).cast::<()>() as usize, || {
            Box::new(Arc::downgrade(obj)) as Box<dyn Liveness>
        })
    }

    /// `probe` is only called when a new id is assigned. In lookup mode an
    /// unknown address marks the derivation as unseen instead.
    pub(crate) fn identify(
        &mut self,
        addr: usize,
        probe: impl FnOnce() -> Box<dyn Liveness>,
    ) -> ObjectId {
        if let Some(tracked) = self.entries.get(&addr) {
            if tracked.probe.is_live() {
                return tracked.id;
            }
        }

        if self.lookup_only {
            self.unseen = true;
            // Never rendered: the caller discards the whole key.
            return ObjectId(u64::MAX);
        }

        if self.entries.len() >= self.sweep_at {
            self.purge();
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_AT);
        }

        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            addr,
            Tracked {
                id,
                probe: probe(),
            },
        );
        id
    }

    /// Number of tracked addresses, including ones whose object has died.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget addresses whose object has been dropped. Returns how many.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, tracked| tracked.probe.is_live());
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sweep_at = MIN_SWEEP_AT;
    }
}

impl core::fmt::Debug for ObjectIdentityMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectIdentityMap")
            .field("next_id", &self.next_id)
            .field("tracked", &self.entries.len())
            .finish()
    }
}
