//! Per-class instance pool.
//!
//! An [`Interner<T>`] hands out [`Interned<T>`] handles. Constructing with
//! arguments that derive the same [`CacheKey`] returns the *same allocation*
//! for as long as any handle to it is alive, so handle equality is pointer
//! equality.
//!
//! The pool holds only `Weak` references. Reclamation is driven by `Drop`:
//! when the last handle goes away the slot removes its own key from the pool
//! (under [`ReclamationPolicy::OnDrop`]), or leaves a dead entry behind to be
//! replaced or purged later (under [`ReclamationPolicy::Manual`]).
//!
//! Lock discipline: user code (the builder closure, and any `Drop` it
//! triggers) never runs while the pool lock is held.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::config::{InternerConfig, ReclamationPolicy};
use crate::error::ValueResult;
use crate::identity::{Liveness, ObjectIdentityMap};
use crate::key::{CacheKey, KeyArg, KeyArgs, KeyPart, key_parts_of};

/// Point-in-time view of a class pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub class: String,
    /// Entries whose instance is still alive.
    pub live: usize,
    /// Entries whose instance is gone but whose key has not been removed yet.
    pub dead: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because their instance was dropped or purged.
    pub reclaimed: u64,
    /// Object references known to the identity map.
    pub tracked_objects: usize,
}

struct PoolState<T> {
    ids: ObjectIdentityMap,
    pool: HashMap<String, Weak<Slot<T>>>,
    hits: u64,
    misses: u64,
    reclaimed: u64,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            ids: ObjectIdentityMap::new(),
            pool: HashMap::new(),
            hits: 0,
            misses: 0,
            reclaimed: 0,
        }
    }

    fn live(&self, key: &CacheKey) -> Option<Interned<T>> {
        self.pool
            .get(key.as_str())
            .and_then(Weak::upgrade)
            .map(|slot| Interned { slot })
    }
}

struct Shared<T> {
    class: String,
    config: InternerConfig,
    state: Mutex<PoolState<T>>,
}

impl<T> Shared<T> {
    // No user code runs under this lock, so a poisoned guard still holds a
    // consistent pool.
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn derive_key<A: KeyArgs + ?Sized>(&self, state: &mut PoolState<T>, args: &A) -> CacheKey {
        let parts = state.ids.assigning(|ids| key_parts_of(args, ids));
        CacheKey::compose(&self.class, self.config.separator, &parts)
    }

    /// Like `derive_key`, but `None` when an object argument is unknown.
    fn lookup_key<A: KeyArgs + ?Sized>(
        &self,
        state: &mut PoolState<T>,
        args: &A,
    ) -> Option<CacheKey> {
        let parts = state.ids.looking_up(|ids| key_parts_of(args, ids))?;
        Some(CacheKey::compose(&self.class, self.config.separator, &parts))
    }
}

struct Slot<T> {
    value: T,
    key: CacheKey,
    owner: Weak<Shared<T>>,
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        let Some(shared) = self.owner.upgrade() else {
            return;
        };
        if shared.config.reclamation != ReclamationPolicy::OnDrop {
            return;
        }

        let mut state = shared.lock();
        // The key may already point at a newer live instance; only a dead
        // entry is ours to remove.
        let dead = state
            .pool
            .get(self.key.as_str())
            .is_some_and(|weak| weak.strong_count() == 0);
        if dead {
            state.pool.remove(self.key.as_str());
            state.reclaimed += 1;
            tracing::debug!("reclaimed {}", self.key);
        }
    }
}

/// Shared handle to an interned instance.
///
/// Cloning is cheap. Equality and hashing are by identity: two handles are
/// equal iff they point at the same instance.
pub struct Interned<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Interned<T> {
    /// Identity comparison (the `===` of value objects).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.slot, &other.slot)
    }

    /// Key this instance was registered under.
    pub fn key(this: &Self) -> &CacheKey {
        &this.slot.key
    }

    /// Number of live handles to this instance.
    pub fn handle_count(this: &Self) -> usize {
        Arc::strong_count(&this.slot)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.slot).cast::<()>() as usize
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> core::ops::Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T> AsRef<T> for Interned<T> {
    fn as_ref(&self) -> &T {
        &self.slot.value
    }
}

impl<T> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.slot.value, f)
    }
}

impl<T: core::fmt::Display> core::fmt::Display for Interned<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.slot.value, f)
    }
}

/// Other value objects passed as arguments are keyed by identity, which for
/// interned handles coincides with value equality.
impl<T: Send + Sync + 'static> KeyArg for Interned<T> {
    fn key_part(&self, ids: &mut ObjectIdentityMap) -> KeyPart {
        KeyPart::Object(ids.identify(self.addr(), || {
            Box::new(Arc::downgrade(&self.slot)) as Box<dyn Liveness>
        }))
    }
}

impl<T: Send + Sync + 'static> KeyArgs for Interned<T> {
    fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
        parts.push(self.key_part(ids));
    }
}

/// Instance pool for one value class.
///
/// Cloning shares the pool.
pub struct Interner<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Interner<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Interner<T> {
    pub fn new(class: impl Into<String>) -> Self {
        Self::from_parts(class.into(), InternerConfig::default())
    }

    pub fn with_config(class: impl Into<String>, config: InternerConfig) -> ValueResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(class.into(), config))
    }

    /// `config` must already be validated.
    pub(crate) fn from_parts(class: String, config: InternerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                class,
                config,
                state: Mutex::new(PoolState::new()),
            }),
        }
    }

    /// Class name used as the first key component.
    pub fn class(&self) -> &str {
        &self.shared.class
    }

    pub fn config(&self) -> &InternerConfig {
        &self.shared.config
    }

    /// Return the live instance for `args`, or build, register and return a
    /// new one.
    ///
    /// `build` runs without the pool lock held, so it may construct other
    /// instances of this class. If the same key is registered while `build`
    /// runs, that instance wins and the freshly built value is dropped.
    pub fn get_or_create<A, F>(&self, args: A, build: F) -> Interned<T>
    where
        A: KeyArgs,
        F: FnOnce(A) -> T,
    {
        let key = {
            let mut state = self.shared.lock();
            let key = self.shared.derive_key(&mut state, &args);
            if let Some(found) = state.live(&key) {
                state.hits += 1;
                tracing::trace!("hit {key}");
                return found;
            }
            state.misses += 1;
            key
        };

        let value = build(args);

        let mut state = self.shared.lock();
        if let Some(found) = state.live(&key) {
            drop(state);
            drop(value);
            tracing::debug!("{key} was registered during construction; using existing instance");
            return found;
        }

        let slot = Arc::new(Slot {
            value,
            key,
            owner: Arc::downgrade(&self.shared),
        });
        state
            .pool
            .insert(slot.key.as_str().to_owned(), Arc::downgrade(&slot));
        tracing::debug!("interned {} ({} entries)", slot.key, state.pool.len());

        Interned { slot }
    }

    /// Live instance for `args`, without constructing one.
    ///
    /// Object arguments this class has never seen are not registered.
    pub fn get<A: KeyArgs + ?Sized>(&self, args: &A) -> Option<Interned<T>> {
        let mut state = self.shared.lock();
        let key = self.shared.lookup_key(&mut state, args)?;
        state.live(&key)
    }

    /// Key that `args` derive for this class.
    ///
    /// `None` if an object argument has no id in this class yet; no id is
    /// assigned by asking.
    pub fn key_for<A: KeyArgs + ?Sized>(&self, args: &A) -> Option<CacheKey> {
        let mut state = self.shared.lock();
        self.shared.lookup_key(&mut state, args)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .pool
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove dead pool entries and forget dead object references.
    ///
    /// Returns the number of pool entries removed.
    pub fn purge(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.pool.len();
        state.pool.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - state.pool.len();
        state.reclaimed += removed as u64;
        let forgotten = state.ids.purge();
        tracing::debug!(
            "purged {removed} entries and {forgotten} object ids from {}",
            self.shared.class
        );
        removed
    }

    /// Forget every entry.
    ///
    /// Existing handles stay valid but are no longer returned; subsequent
    /// constructions build new instances.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        state.pool.clear();
        state.ids.clear();
        tracing::debug!("cleared {}", self.shared.class);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        let live = state
            .pool
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count();
        PoolStats {
            class: self.shared.class.clone(),
            live,
            dead: state.pool.len() - live,
            hits: state.hits,
            misses: state.misses,
            reclaimed: state.reclaimed,
            tracked_objects: state.ids.len(),
        }
    }
}

impl<T> core::fmt::Debug for Interner<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interner")
            .field("class", &self.shared.class)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Money {
        currency: String,
        amount: u64,
    }

    fn money(args: (&str, u64)) -> Money {
        Money {
            currency: args.0.to_string(),
            amount: args.1,
        }
    }

    fn manual_config() -> InternerConfig {
        InternerConfig {
            reclamation: ReclamationPolicy::Manual,
            ..InternerConfig::default()
        }
    }

    #[test]
    fn equal_arguments_return_same_instance() {
        let interner = Interner::new("Money");
        let a = interner.get_or_create(("USD", 1000u64), money);
        let b = interner.get_or_create(("USD", 1000u64), money);

        assert!(Interned::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_eq!(Interned::handle_count(&a), 2);
    }

    #[test]
    fn different_arguments_return_different_instances() {
        let interner = Interner::new("Money");
        let usd = interner.get_or_create(("USD", 1000u64), money);
        let eur = interner.get_or_create(("EUR", 1000u64), money);

        assert_ne!(usd, eur);
        assert_eq!(usd.currency, "USD");
        assert_eq!(eur.currency, "EUR");
    }

    #[test]
    fn hit_does_not_run_builder() {
        let interner = Interner::new("Money");
        let calls = AtomicUsize::new(0);
        let build = |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            money(args)
        };

        let _a = interner.get_or_create(("BTC", 1u64), build);
        let _b = interner.get_or_create(("BTC", 1u64), build);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = interner.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn dropping_last_handle_removes_entry() {
        let interner = Interner::new("Money");
        let a = interner.get_or_create(("USD", 5u64), money);
        let b = a.clone();
        drop(a);
        assert_eq!(interner.len(), 1);

        drop(b);
        let stats = interner.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.dead, 0);
        assert_eq!(stats.reclaimed, 1);
        assert!(interner.get(&("USD", 5u64)).is_none());
    }

    #[test]
    fn manual_policy_leaves_dead_entries_until_purge() {
        let interner = Interner::with_config("Money", manual_config()).unwrap();
        drop(interner.get_or_create(("USD", 5u64), money));

        let stats = interner.stats();
        assert_eq!((stats.live, stats.dead), (0, 1));

        assert_eq!(interner.purge(), 1);
        let stats = interner.stats();
        assert_eq!((stats.live, stats.dead, stats.reclaimed), (0, 0, 1));
    }

    #[test]
    fn dead_entry_is_replaced_on_next_construction() {
        let interner = Interner::with_config("Money", manual_config()).unwrap();
        drop(interner.get_or_create(("USD", 5u64), money));

        let again = interner.get_or_create(("USD", 5u64), money);
        assert_eq!(again.amount, 5);
        let stats = interner.stats();
        assert_eq!((stats.live, stats.dead, stats.misses), (1, 0, 2));
    }

    #[test]
    fn clear_keeps_handles_valid_but_stops_sharing() {
        let interner = Interner::new("Money");
        let before = interner.get_or_create(("USD", 1u64), money);
        interner.clear();
        let after = interner.get_or_create(("USD", 1u64), money);

        assert_ne!(before, after);
        assert_eq!(*before, *after);
        // Dropping the orphaned instance must not evict its successor.
        drop(before);
        assert!(interner.get(&("USD", 1u64)).is_some());
    }

    #[test]
    fn builder_may_construct_same_class_reentrantly() {
        #[derive(Debug)]
        struct Node {
            depth: u32,
            parent: Option<Interned<Node>>,
        }

        let interner: Interner<Node> = Interner::new("Node");
        let inner = interner.clone();
        let leaf = interner.get_or_create(2u32, move |depth| {
            let parent = Some(inner.get_or_create(depth - 1, |depth| Node {
                depth,
                parent: None,
            }));
            Node { depth, parent }
        });

        assert_eq!(leaf.depth, 2);
        let parent = leaf.parent.clone().unwrap();
        assert_eq!(parent.depth, 1);
        assert_eq!(interner.get(&1u32), Some(parent));
    }

    #[test]
    fn interned_arguments_key_by_identity() {
        let currencies: Interner<String> = Interner::new("Currency");
        let prices: Interner<(Interned<String>, u64)> = Interner::new("Price");

        let usd = currencies.get_or_create("USD", |c| c.to_string());
        let p1 = prices.get_or_create((usd.clone(), 10u64), |(c, a)| (c, a));
        let p2 = prices.get_or_create(
            (currencies.get_or_create("USD", |c| c.to_string()), 10u64),
            |(c, a)| (c, a),
        );

        assert_eq!(p1, p2);
        assert_eq!(Interned::key(&p1).as_str(), "Price-#0-10");
    }

    #[test]
    fn identity_map_stays_bounded_under_on_drop() {
        let tagged: Interner<Arc<Vec<u8>>> = Interner::new("Tagged");
        for _ in 0..10_000 {
            drop(tagged.get_or_create(Arc::new(vec![0u8; 8]), |payload| payload));
        }

        let stats = tagged.stats();
        assert_eq!((stats.live, stats.dead, stats.reclaimed), (0, 0, 10_000));
        assert!(stats.tracked_objects <= 64, "tracked {}", stats.tracked_objects);
    }

    #[test]
    fn lookups_do_not_assign_object_ids() {
        let tagged: Interner<Arc<Vec<u8>>> = Interner::new("Tagged");
        let seen = Arc::new(vec![1u8]);
        let _kept = tagged.get_or_create(Arc::clone(&seen), |payload| payload);
        let stranger = Arc::new(vec![1u8]);

        assert!(tagged.get(&stranger).is_none());
        assert!(tagged.key_for(&stranger).is_none());
        assert_eq!(tagged.stats().tracked_objects, 1);

        assert!(tagged.get(&seen).is_some());
        assert_eq!(tagged.key_for(&seen).unwrap().as_str(), "Tagged-#0");

        // The next new object still gets the next id.
        let next = tagged.get_or_create(stranger, |payload| payload);
        assert_eq!(Interned::key(&next).as_str(), "Tagged-#1");
    }

    #[test]
    fn pool_outliving_interner_is_harmless() {
        let interner = Interner::new("Money");
        let handle = interner.get_or_create(("USD", 1u64), money);
        drop(interner);
        assert_eq!(handle.amount, 1);
        drop(handle);
    }

    #[test]
    fn stats_serialize_to_json() {
        let interner = Interner::new("Money");
        let _a = interner.get_or_create(("USD", 1u64), money);
        let json = serde_json::to_value(interner.stats()).unwrap();

        assert_eq!(json["class"], "Money");
        assert_eq!(json["live"], 1);
        assert_eq!(json["misses"], 1);
    }

    #[test]
    fn with_config_rejects_reserved_separator() {
        let config = InternerConfig {
            separator: '\\',
            ..InternerConfig::default()
        };
        assert!(Interner::<Money>::with_config("Money", config).is_err());
    }
}
