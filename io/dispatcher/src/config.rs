/// Configuration for the event dispatcher.
///
/// Construction-time only. The dispatcher reads no environment variables and
/// parses no flags; whoever instantiates it decides the knobs.
#[derive(Clone)]
pub struct Config {
    /// Number of SQ entries in the ring.
    pub sq_entries: u32,
    /// Maximum CQEs copied out of the completion ring per loop iteration.
    pub reap_batch: usize,
    /// Registration calls flush to the kernel once this many SQEs have
    /// accumulated. Below the threshold they are left for the loop's
    /// end-of-iteration flush, so this is a throughput knob only; latency is
    /// bounded at one loop iteration either way.
    pub submit_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sq_entries: 256,
            reap_batch: 32,
            submit_batch: 8,
        }
    }
}
