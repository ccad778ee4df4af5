use std::cell::Cell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of shards per group. Sized so that hot counters from different
/// threads rarely collide on the same cache line.
const SHARDS: usize = 64;

/// Counter slots per shard. 16 slots × 8 bytes = one 128-byte shard.
pub const SLOTS_PER_GROUP: usize = 16;

thread_local! {
    static THREAD_SHARD: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Pin the calling thread to a specific shard index.
///
/// Worker threads with stable IDs (0, 1, 2, ...) should call this once at
/// startup so each worker owns a shard exclusively. Threads that never call
/// it fall back to a shard derived from the thread ID hash.
pub fn set_thread_shard(shard: usize) {
    THREAD_SHARD.set(shard % SHARDS);
}

fn thread_shard() -> usize {
    let cached = THREAD_SHARD.get();
    if cached != usize::MAX {
        return cached;
    }
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    let shard = (hasher.finish() as usize) % SHARDS;
    THREAD_SHARD.set(shard);
    shard
}

/// One cache-line-sized bank of counter slots.
#[repr(align(128))]
struct Shard {
    slots: [AtomicU64; SLOTS_PER_GROUP],
}

/// Sharded storage for up to [`SLOTS_PER_GROUP`] counters.
///
/// A group is pure storage; individual [`Counter`]s reference a slot within
/// the group. Reads sum across all shards and are not linearizable with
/// respect to concurrent writes, which is fine for monitoring.
pub struct CounterGroup {
    shards: [Shard; SHARDS],
}

impl CounterGroup {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const SHARD: Shard = Shard {
            slots: [ZERO; SLOTS_PER_GROUP],
        };
        CounterGroup {
            shards: [SHARD; SHARDS],
        }
    }

    #[inline]
    fn add(&self, slot: usize, value: u64) {
        self.shards[thread_shard()].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    fn sum(&self, slot: usize) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A monotonic counter referencing one slot of a [`CounterGroup`].
///
/// Implements [`metriken::Metric`] so it can be registered with the
/// `#[metric]` attribute and picked up by exposition endpoints.
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    /// Create a counter for `slot` of `group`.
    ///
    /// # Panics
    ///
    /// Panics (at const-eval time for statics) if `slot` is out of range.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        assert!(slot < SLOTS_PER_GROUP);
        Counter { group, slot }
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Current value, summed across all shards.
    pub fn value(&self) -> u64 {
        self.group.sum(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}
