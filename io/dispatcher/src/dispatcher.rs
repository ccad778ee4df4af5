use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::event_loop;
use crate::readiness::Readiness;
use crate::ring::{EventToken, RingContext};
use crate::scheduler::{EventHandler, TaskAttrs, TaskScheduler, ThreadScheduler};

/// Anonymous pipe used to unblock the completion loop in-band: on shutdown,
/// and when registrations leave SQEs for the loop to flush. Both ends are
/// close-on-exec and non-blocking; wakeup bytes coalesce.
pub(crate) struct WakeupPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakeupPipe {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both fds are newly created and owned here.
        unsafe {
            Ok(WakeupPipe {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Write one byte to wake the loop. Best-effort: a full pipe already has
    /// a wakeup pending.
    pub(crate) fn notify(&self) {
        let byte = b'W';
        let _ = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
    }

    /// Drain up to 64 bytes of coalesced wakeups.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        let _ = unsafe {
            libc::read(
                self.read.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
    }
}

/// State shared between the dispatcher handle and the completion-loop worker.
pub(crate) struct Shared<H> {
    /// `None` when the dispatcher is disabled (probe or setup failure).
    pub(crate) ctx: Option<Mutex<RingContext>>,
    pub(crate) wakeup: Option<WakeupPipe>,
    /// Recorded ring fd; negative sentinel when not initialized. The loop
    /// blocks on this fd directly so waits never hold the ring lock.
    pub(crate) ring_fd: RawFd,
    pub(crate) stop: AtomicBool,
    pub(crate) handler: H,
    pub(crate) reap_batch: usize,
}

/// Multiplexes readiness notifications for many fds onto one completion-loop
/// worker, using io_uring one-shot polls as the notification substrate.
///
/// Registration calls may come from any thread: the ring and its bookkeeping
/// sit behind a mutex, registration never suspends while holding it, and the
/// loop's blocking completion wait runs with the mutex released.
pub struct EventDispatcher<H: EventHandler, S: TaskScheduler = ThreadScheduler> {
    shared: Arc<Shared<H>>,
    scheduler: S,
    /// Worker task id; zero when not started.
    tid: AtomicU64,
}

impl<H: EventHandler> EventDispatcher<H> {
    /// Build a dispatcher backed by the thread scheduler.
    ///
    /// Construction never fails: when io_uring is unavailable (kernel older
    /// than 5.10) or ring/pipe setup fails, the dispatcher comes up disabled
    /// and every operation returns [`Error::NotInitialized`].
    pub fn new(config: Config, handler: H) -> Self {
        Self::with_scheduler(config, handler, ThreadScheduler::new())
    }
}

impl<H: EventHandler, S: TaskScheduler> EventDispatcher<H, S> {
    /// Build a dispatcher that spawns its worker through `scheduler`.
    pub fn with_scheduler(config: Config, handler: H, scheduler: S) -> Self {
        let disabled = |handler| Shared {
            ctx: None,
            wakeup: None,
            ring_fd: -1,
            stop: AtomicBool::new(false),
            handler,
            reap_batch: config.reap_batch,
        };

        if !RingContext::probe() {
            warn!("io_uring not available, please check kernel version (need >= 5.10)");
            return EventDispatcher {
                shared: Arc::new(disabled(handler)),
                scheduler,
                tid: AtomicU64::new(0),
            };
        }

        let ctx = match RingContext::new(&config) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(%err, "failed to initialize io_uring");
                return EventDispatcher {
                    shared: Arc::new(disabled(handler)),
                    scheduler,
                    tid: AtomicU64::new(0),
                };
            }
        };
        let ring_fd = ctx.ring_fd();

        let wakeup = match WakeupPipe::new() {
            Ok(pipe) => pipe,
            Err(err) => {
                error!(%err, "failed to create wakeup pipe");
                return EventDispatcher {
                    shared: Arc::new(disabled(handler)),
                    scheduler,
                    tid: AtomicU64::new(0),
                };
            }
        };

        info!("io_uring event dispatcher initialized");
        EventDispatcher {
            shared: Arc::new(Shared {
                ctx: Some(Mutex::new(ctx)),
                wakeup: Some(wakeup),
                ring_fd,
                stop: AtomicBool::new(false),
                handler,
                reap_batch: config.reap_batch,
            }),
            scheduler,
            tid: AtomicU64::new(0),
        }
    }

    /// Whether construction completed and the ring is usable.
    pub fn enabled(&self) -> bool {
        self.shared.ring_fd >= 0
    }

    /// Spawn the completion-loop worker.
    ///
    /// `attrs` are recorded and passed through to every callback; the worker
    /// itself runs with `attrs | NEVER_QUIT | GLOBAL_PRIORITY`.
    pub fn start(&self, attrs: Option<TaskAttrs>) -> Result<(), Error> {
        if self.shared.ring_fd < 0 {
            return Err(Error::NotInitialized);
        }
        if self.tid.load(Ordering::Acquire) != 0 {
            return Err(Error::AlreadyStarted);
        }

        let attrs = attrs.unwrap_or(TaskAttrs::NORMAL);
        let worker_attrs = attrs | TaskAttrs::NEVER_QUIT | TaskAttrs::GLOBAL_PRIORITY;

        let shared = self.shared.clone();
        let id = self.scheduler.spawn_background(
            worker_attrs,
            Box::new(move || event_loop::run(shared, attrs)),
        )?;
        self.tid.store(id, Ordering::Release);
        Ok(())
    }

    /// True iff not stopped, the ring is valid, and a worker is recorded.
    pub fn running(&self) -> bool {
        !self.shared.stop.load(Ordering::Acquire)
            && self.shared.ring_fd >= 0
            && self.tid.load(Ordering::Acquire) != 0
    }

    /// Signal the loop to exit and wake it. Idempotent.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(wakeup) = &self.shared.wakeup {
            wakeup.notify();
        }
    }

    /// Wait for the worker to finish. Idempotent.
    pub fn join(&self) {
        let id = self.tid.swap(0, Ordering::AcqRel);
        if id != 0 {
            self.scheduler.join(id);
        }
    }

    /// Arm a one-shot poll for `fd` with writable interest, plus readable
    /// interest when `want_read` is set, and track `token` ↔ `fd`.
    ///
    /// Writable interest is always included; the registration completes
    /// immediately once the fd is writable and the socket layer downgrades to
    /// read-only interest via [`unregister_event`](Self::unregister_event)
    /// once its write queue drains.
    pub fn register_event(
        &self,
        token: EventToken,
        fd: RawFd,
        want_read: bool,
    ) -> Result<(), Error> {
        let mut mask = libc::POLLOUT as u32;
        if want_read {
            mask |= libc::POLLIN as u32;
        }

        let mut ctx = self.ring()?.lock();
        if let Err(err) = ctx.arm_poll(fd, mask, token) {
            drop(ctx);
            self.nudge();
            return Err(err);
        }
        ctx.track(fd, token, mask);
        self.finish_submit(ctx);
        Ok(())
    }

    /// Downgrade or drop the registration for `fd`.
    ///
    /// With `keep_read`, re-arms the poll with readable interest only (the
    /// write queue has drained); the superseded one-shot poll may deliver one
    /// stale completion, which the loop tolerates. Without it, cancels the
    /// poll keyed by `token` and erases the registration.
    pub fn unregister_event(
        &self,
        token: EventToken,
        fd: RawFd,
        keep_read: bool,
    ) -> Result<(), Error> {
        let mut ctx = self.ring()?.lock();
        if keep_read {
            let mask = libc::POLLIN as u32;
            if let Err(err) = ctx.arm_poll(fd, mask, token) {
                drop(ctx);
                self.nudge();
                return Err(err);
            }
            ctx.set_mask(fd, mask);
        } else {
            if let Err(err) = ctx.cancel_poll(token) {
                drop(ctx);
                self.nudge();
                return Err(err);
            }
            ctx.untrack(fd);
        }
        self.finish_submit(ctx);
        Ok(())
    }

    /// Arm a one-shot poll for `fd` with readable interest and track
    /// `token` ↔ `fd`.
    pub fn add_consumer(&self, token: EventToken, fd: RawFd) -> Result<(), Error> {
        let mask = libc::POLLIN as u32;

        let mut ctx = self.ring()?.lock();
        if let Err(err) = ctx.arm_poll(fd, mask, token) {
            drop(ctx);
            self.nudge();
            return Err(err);
        }
        ctx.track(fd, token, mask);
        self.finish_submit(ctx);
        Ok(())
    }

    /// Cancel the poll for `fd` and erase its registration. A no-op when the
    /// fd is untracked, so double-removal races are safe. Submission failures
    /// are logged and swallowed: the fd may already be closed by the caller.
    pub fn remove_consumer(&self, fd: RawFd) -> Result<(), Error> {
        let mut ctx = self.ring()?.lock();
        let Some(token) = ctx.untrack(fd) else {
            return Ok(());
        };
        if let Err(err) = ctx.cancel_poll(token) {
            warn!(fd, %err, "failed to enqueue poll-remove");
            drop(ctx);
            self.nudge();
            return Ok(());
        }
        self.finish_submit(ctx);
        Ok(())
    }

    /// Number of tracked fd registrations.
    pub fn registration_count(&self) -> usize {
        self.with_ctx(|ctx| ctx.registration_count()).unwrap_or(0)
    }

    /// Token tracked for `fd`, if any.
    pub fn tracked_token(&self, fd: RawFd) -> Option<EventToken> {
        self.with_ctx(|ctx| ctx.token_for(fd)).flatten()
    }

    /// Fd tracked for `token`, if any.
    pub fn tracked_fd(&self, token: EventToken) -> Option<RawFd> {
        self.with_ctx(|ctx| ctx.fd_for(token)).flatten()
    }

    /// Readiness currently requested for `fd`, if tracked.
    pub fn requested_readiness(&self, fd: RawFd) -> Option<Readiness> {
        self.with_ctx(|ctx| ctx.readiness_for(fd)).flatten()
    }

    /// SQEs filled since the last submit.
    pub fn pending_submissions(&self) -> usize {
        self.with_ctx(|ctx| ctx.pending_submissions()).unwrap_or(0)
    }

    fn ring(&self) -> Result<&Mutex<RingContext>, Error> {
        self.shared.ctx.as_ref().ok_or(Error::NotInitialized)
    }

    fn with_ctx<R>(&self, f: impl FnOnce(&RingContext) -> R) -> Option<R> {
        self.shared.ctx.as_ref().map(|ctx| f(&ctx.lock()))
    }

    /// Conditional submit, then a wakeup nudge when SQEs were left pending:
    /// the loop may be parked in its completion wait, and only its
    /// end-of-iteration flush will arm them.
    fn finish_submit(&self, mut ctx: MutexGuard<'_, RingContext>) {
        let flushed = ctx.maybe_submit();
        drop(ctx);
        if !flushed {
            self.nudge();
        }
    }

    fn nudge(&self) {
        if let Some(wakeup) = &self.shared.wakeup {
            wakeup.notify();
        }
    }
}

impl<H: EventHandler, S: TaskScheduler> Drop for EventDispatcher<H, S> {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
