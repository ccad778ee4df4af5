use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::dispatcher::Shared;
use crate::metrics;
use crate::readiness::Readiness;
use crate::ring::{WAKEUP_TOKEN, wait_for_completion};
use crate::scheduler::{EventHandler, TaskAttrs};

/// Body of the completion-loop worker.
///
/// Reaps completions in batches, translates kernel poll masks, dispatches
/// callbacks, and re-arms one-shot polls. Exits when the stop flag is set
/// (delivered through the wakeup pipe) or the completion wait fails.
pub(crate) fn run<H: EventHandler>(shared: Arc<Shared<H>>, attrs: TaskAttrs) {
    let (Some(ctx_mutex), Some(wakeup)) = (shared.ctx.as_ref(), shared.wakeup.as_ref()) else {
        return;
    };

    // Arm the wakeup poll before the first wait so stop() can always reach us.
    {
        let mut ctx = ctx_mutex.lock();
        if let Err(err) = ctx.arm_poll(wakeup.read_fd(), libc::POLLIN as u32, WAKEUP_TOKEN) {
            error!(%err, "failed to arm wakeup poll");
            return;
        }
        if let Err(err) = ctx.submit_now() {
            warn!(%err, "failed to submit wakeup poll");
        }
    }

    let mut batch: Vec<(u64, i32)> = Vec::with_capacity(shared.reap_batch);

    while !shared.stop.load(Ordering::Acquire) {
        batch.clear();
        ctx_mutex.lock().reap(&mut batch, shared.reap_batch);

        if batch.is_empty() {
            match wait_for_completion(shared.ring_fd) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "completion wait failed, dispatcher loop exiting");
                    break;
                }
            }
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            continue;
        }

        for &(user_data, result) in &batch {
            if user_data == WAKEUP_TOKEN {
                wakeup.drain();
                metrics::WAKEUPS.increment();
                if !shared.stop.load(Ordering::Acquire) {
                    let mut ctx = ctx_mutex.lock();
                    if let Err(err) =
                        ctx.arm_poll(wakeup.read_fd(), libc::POLLIN as u32, WAKEUP_TOKEN)
                    {
                        warn!(%err, "failed to re-arm wakeup poll");
                    }
                }
                continue;
            }

            let token = user_data;
            if result < 0 {
                if result == -libc::ECANCELED {
                    metrics::CANCELLED.increment();
                } else {
                    trace!(token, result, "poll completed with error");
                }
                continue;
            }

            let events = Readiness::from_poll_mask(result as u32);

            if events.intersects(Readiness::INPUT_READY) {
                let start = Instant::now();
                shared.handler.on_input_ready(token, events, attrs);
                let _ = metrics::READ_LATENCY.increment(start.elapsed().as_nanos() as u64);
                metrics::INPUT_EVENTS.increment();
            }
            if events.intersects(Readiness::OUTPUT_READY) {
                let start = Instant::now();
                shared.handler.on_output_ready(token, events, attrs);
                let _ = metrics::WRITE_LATENCY.increment(start.elapsed().as_nanos() as u64);
                metrics::OUTPUT_EVENTS.increment();
            }

            // One-shot polls don't self-restore: re-arm with the recorded
            // mask unless the fd hung up or the registration went away
            // (possibly inside the callback just dispatched).
            if !events.contains(Readiness::HANGUP) {
                let mut ctx = ctx_mutex.lock();
                if let Some(fd) = ctx.fd_for(token)
                    && let Some(mask) = ctx.mask_for(fd)
                {
                    match ctx.arm_poll(fd, mask, token) {
                        Ok(()) => metrics::REARMS.increment(),
                        Err(err) => warn!(fd, token, %err, "failed to re-arm poll"),
                    }
                }
            }
        }

        // Arm everything deposited during this iteration (re-arms, wakeup,
        // and concurrent registrations) before the next wait.
        ctx_mutex.lock().flush();
    }

    debug!("dispatcher loop stopped");
}
