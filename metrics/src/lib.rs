//! Sharded hot-path counters with metriken integration.
//!
//! A [`CounterGroup`] is a bank of per-thread shards holding up to 16 counter
//! slots. Writers bump an atomic in their own shard (picked by thread ID, or
//! pinned with [`set_thread_shard`]), so counters that live in the same group
//! never contend on a cache line. Reads sum across shards and are meant for
//! scrape-time exposition, not for synchronization.
//!
//! A [`Counter`] names one slot of a group. It implements
//! [`metriken::Metric`], so a static counter can be registered under a stable
//! name with the `#[metric]` attribute and show up wherever the metriken
//! registry is exposed.
//!
//! ```
//! use metrics::{Counter, CounterGroup};
//!
//! mod slots {
//!     pub const INPUT: usize = 0;
//!     pub const OUTPUT: usize = 1;
//! }
//!
//! static EVENT: CounterGroup = CounterGroup::new();
//!
//! static INPUT_EVENTS: Counter = Counter::new(&EVENT, slots::INPUT);
//! static OUTPUT_EVENTS: Counter = Counter::new(&EVENT, slots::OUTPUT);
//!
//! INPUT_EVENTS.increment();
//! OUTPUT_EVENTS.add(2);
//! assert_eq!(OUTPUT_EVENTS.value(), 2);
//! ```
//!
//! Storage cost is per group, not per counter: 64 shards of one 128-byte line
//! each, so a full group of 16 counters costs 8KB and a single counter
//! effectively ~512 bytes.

mod counter;

pub use counter::{Counter, CounterGroup, set_thread_shard};

// Re-export metriken for convenience
pub use metriken;
