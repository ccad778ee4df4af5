use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use io_uring::types::Fd;
use io_uring::{IoUring, opcode, squeue};
use tracing::{debug, warn};

use crate::config::Config;
use crate::readiness::Readiness;

/// Opaque 64-bit identifier the socket layer assigns to a registration. It is
/// carried as the SQE user-data word and handed back verbatim in callbacks.
///
/// Callers must never issue [`WAKEUP_TOKEN`] (zero) as a token; the
/// dispatcher does not validate this.
pub type EventToken = u64;

/// Reserved user-data sentinel for the wakeup-pipe poll registration,
/// distinct from every valid token by the contract above.
pub const WAKEUP_TOKEN: EventToken = 0;

/// Queue depth of the throwaway ring used by the availability probe.
const PROBE_ENTRIES: u32 = 2;

const IORING_ENTER_GETEVENTS: libc::c_uint = 1;

/// Owns the kernel ring and the registration bookkeeping.
///
/// One-shot polls do not self-restore, so the requested mask for each fd is
/// kept in `poll_mask_map` for the completion loop to re-arm with. `fd_map`
/// and `event_to_fd_map` are maintained in lockstep: any fd key has exactly
/// one reverse entry with the matching token.
pub(crate) struct RingContext {
    ring: IoUring,
    fd_map: HashMap<RawFd, EventToken>,
    event_to_fd_map: HashMap<EventToken, RawFd>,
    poll_mask_map: HashMap<RawFd, u32>,
    /// SQEs filled since the last successful submit.
    pending_submissions: usize,
    submit_batch: usize,
}

impl RingContext {
    /// One boot-time check that the kernel supports io_uring: create and tear
    /// down a minimal ring.
    pub(crate) fn probe() -> bool {
        match IoUring::new(PROBE_ENTRIES) {
            Ok(_) => {
                debug!("io_uring is available and functional");
                true
            }
            Err(err) => {
                debug!(%err, "io_uring probe failed");
                false
            }
        }
    }

    pub(crate) fn new(config: &Config) -> io::Result<Self> {
        let ring = IoUring::new(config.sq_entries)?;
        Ok(RingContext {
            ring,
            fd_map: HashMap::new(),
            event_to_fd_map: HashMap::new(),
            poll_mask_map: HashMap::new(),
            pending_submissions: 0,
            submit_batch: config.submit_batch,
        })
    }

    pub(crate) fn ring_fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    /// Push an SQE, flushing once to make room when the SQ is full.
    ///
    /// Returns [`Error::SubmissionQueueFull`] when the queue stays full after
    /// the flush, which callers surface as out-of-memory.
    ///
    /// [`Error::SubmissionQueueFull`]: crate::error::Error::SubmissionQueueFull
    fn push_sqe(&mut self, entry: &squeue::Entry) -> Result<(), crate::error::Error> {
        // SAFETY: poll-add and poll-remove entries reference only the fd and
        // the mask, no caller-owned buffers.
        unsafe {
            if self.ring.submission().push(entry).is_ok() {
                return Ok(());
            }
        }
        match self.ring.submit() {
            Ok(_) => self.pending_submissions = 0,
            Err(err) => {
                warn!(%err, "submit under SQ back-pressure failed");
                return Err(crate::error::Error::SubmissionQueueFull);
            }
        }
        unsafe {
            self.ring
                .submission()
                .push(entry)
                .map_err(|_| crate::error::Error::SubmissionQueueFull)?;
        }
        Ok(())
    }

    /// Fill a one-shot poll-add SQE for `fd` with the raw kernel `mask`,
    /// carrying `token` as user-data.
    pub(crate) fn arm_poll(
        &mut self,
        fd: RawFd,
        mask: u32,
        token: EventToken,
    ) -> Result<(), crate::error::Error> {
        let entry = opcode::PollAdd::new(Fd(fd), mask).build().user_data(token);
        self.push_sqe(&entry)?;
        self.pending_submissions += 1;
        Ok(())
    }

    /// Fill a poll-remove SQE cancelling the poll keyed by `token`.
    ///
    /// The removal's own completion carries the same token: a negative result
    /// is discarded by the loop and a zero result no longer resolves to an fd,
    /// so nothing is dispatched or re-armed. It must not carry the wakeup
    /// sentinel, which would masquerade as a wakeup completion.
    pub(crate) fn cancel_poll(&mut self, token: EventToken) -> Result<(), crate::error::Error> {
        let entry = opcode::PollRemove::new(token).build().user_data(token);
        self.push_sqe(&entry)?;
        self.pending_submissions += 1;
        Ok(())
    }

    /// Record `fd` ↔ `token` and the requested mask, overwriting any previous
    /// registration of either key.
    pub(crate) fn track(&mut self, fd: RawFd, token: EventToken, mask: u32) {
        if let Some(old_token) = self.fd_map.insert(fd, token) {
            self.event_to_fd_map.remove(&old_token);
        }
        if let Some(old_fd) = self.event_to_fd_map.insert(token, fd)
            && old_fd != fd
        {
            self.fd_map.remove(&old_fd);
            self.poll_mask_map.remove(&old_fd);
        }
        self.poll_mask_map.insert(fd, mask);
    }

    /// Erase all three entries for `fd`, returning the token it carried.
    pub(crate) fn untrack(&mut self, fd: RawFd) -> Option<EventToken> {
        let token = self.fd_map.remove(&fd)?;
        self.event_to_fd_map.remove(&token);
        self.poll_mask_map.remove(&fd);
        Some(token)
    }

    /// Rewrite the requested mask for an fd that is already tracked.
    pub(crate) fn set_mask(&mut self, fd: RawFd, mask: u32) {
        if self.fd_map.contains_key(&fd) {
            self.poll_mask_map.insert(fd, mask);
        }
    }

    pub(crate) fn token_for(&self, fd: RawFd) -> Option<EventToken> {
        self.fd_map.get(&fd).copied()
    }

    pub(crate) fn fd_for(&self, token: EventToken) -> Option<RawFd> {
        self.event_to_fd_map.get(&token).copied()
    }

    pub(crate) fn mask_for(&self, fd: RawFd) -> Option<u32> {
        self.poll_mask_map.get(&fd).copied()
    }

    pub(crate) fn readiness_for(&self, fd: RawFd) -> Option<Readiness> {
        self.mask_for(fd).map(Readiness::from_poll_mask)
    }

    pub(crate) fn registration_count(&self) -> usize {
        self.fd_map.len()
    }

    pub(crate) fn pending_submissions(&self) -> usize {
        self.pending_submissions
    }

    /// Submit everything queued, resetting the pending counter on success.
    pub(crate) fn submit_now(&mut self) -> io::Result<usize> {
        let submitted = self.ring.submit()?;
        self.pending_submissions = 0;
        Ok(submitted)
    }

    /// Conditional submit for the registration path: flush once enough SQEs
    /// have accumulated. Returns true when nothing is left pending, false
    /// when the caller should nudge the loop to pick the SQEs up.
    pub(crate) fn maybe_submit(&mut self) -> bool {
        if self.pending_submissions < self.submit_batch {
            return false;
        }
        match self.submit_now() {
            Ok(_) => true,
            Err(err) => {
                // Swallowed: the loop force-flushes every iteration.
                warn!(%err, "batched submit failed, deferring to loop flush");
                false
            }
        }
    }

    /// End-of-iteration force flush. Best-effort; the loop keeps running.
    pub(crate) fn flush(&mut self) {
        if self.pending_submissions == 0 {
            return;
        }
        if let Err(err) = self.submit_now() {
            warn!(%err, "end-of-iteration flush failed");
        }
    }

    /// Copy up to `max` ready completions into `batch` without blocking,
    /// acknowledging them as a batch once copied.
    pub(crate) fn reap(&mut self, batch: &mut Vec<(u64, i32)>, max: usize) {
        for cqe in self.ring.completion().take(max) {
            batch.push((cqe.user_data(), cqe.result()));
        }
    }
}

/// Block until at least one CQE is available on the ring identified by
/// `ring_fd`, without touching the (mutex-guarded) submission side.
///
/// This is the loop's sole long suspension point; taking it through the raw
/// ring fd keeps registration calls from stalling behind the wait.
pub(crate) fn wait_for_completion(ring_fd: RawFd) -> io::Result<()> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_io_uring_enter,
            ring_fd,
            0 as libc::c_uint,
            1 as libc::c_uint,
            IORING_ENTER_GETEVENTS,
            std::ptr::null::<libc::sigset_t>(),
            0 as libc::size_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
