//! Event dispatcher metrics.

use metrics::{Counter, CounterGroup};
use metriken::{AtomicHistogram, metric};

// Counter group (sharded storage)
static EVENT: CounterGroup = CounterGroup::new();

/// Counter slot indices for event metrics.
pub mod event {
    pub const INPUT: usize = 0;
    pub const OUTPUT: usize = 1;
    pub const REARMS: usize = 2;
    pub const WAKEUPS: usize = 3;
    pub const CANCELLED: usize = 4;
}

#[metric(
    name = "dispatcher_input_events",
    description = "Input readiness callbacks dispatched"
)]
pub static INPUT_EVENTS: Counter = Counter::new(&EVENT, event::INPUT);

#[metric(
    name = "dispatcher_output_events",
    description = "Output readiness callbacks dispatched"
)]
pub static OUTPUT_EVENTS: Counter = Counter::new(&EVENT, event::OUTPUT);

#[metric(
    name = "dispatcher_rearms",
    description = "One-shot polls re-armed by the completion loop"
)]
pub static REARMS: Counter = Counter::new(&EVENT, event::REARMS);

#[metric(
    name = "dispatcher_wakeups",
    description = "Wakeup-pipe completions observed by the loop"
)]
pub static WAKEUPS: Counter = Counter::new(&EVENT, event::WAKEUPS);

#[metric(
    name = "dispatcher_cancelled",
    description = "Completions discarded as cancelled (-ECANCELED)"
)]
pub static CANCELLED: Counter = Counter::new(&EVENT, event::CANCELLED);

// Latency histograms
#[metric(
    name = "read_latency",
    description = "Input callback latency histogram (nanoseconds)"
)]
pub static READ_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "write_latency",
    description = "Output callback latency histogram (nanoseconds)"
)]
pub static WRITE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
