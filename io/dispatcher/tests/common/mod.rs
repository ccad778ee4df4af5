#![allow(dead_code)]

use std::collections::HashMap;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use dispatcher::ring::EventToken;
use dispatcher::scheduler::{EventHandler, TaskAttrs};
use dispatcher::{Config, EventDispatcher, Error, Readiness};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub direction: Direction,
    pub token: EventToken,
    pub events: Readiness,
}

/// Shared view into what the handler observed.
#[derive(Default)]
pub struct RecorderState {
    pub events: Mutex<Vec<RecordedEvent>>,
    /// Read fds drained when their token's input callback fires, so a
    /// re-armed poll doesn't fire again for the same byte.
    pub drain: Mutex<HashMap<EventToken, RawFd>>,
}

impl RecorderState {
    pub fn inputs_for(&self, token: EventToken) -> usize {
        self.count(token, Direction::Input)
    }

    pub fn outputs_for(&self, token: EventToken) -> usize {
        self.count(token, Direction::Output)
    }

    pub fn total(&self) -> usize {
        self.events.lock().len()
    }

    fn count(&self, token: EventToken, direction: Direction) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.token == token && e.direction == direction)
            .count()
    }
}

/// Handler that records every callback and drains registered pipes.
pub struct Recorder {
    pub state: Arc<RecorderState>,
}

impl Recorder {
    pub fn new() -> (Recorder, Arc<RecorderState>) {
        let state = Arc::new(RecorderState::default());
        (
            Recorder {
                state: state.clone(),
            },
            state,
        )
    }
}

impl EventHandler for Recorder {
    fn on_input_ready(&self, token: EventToken, events: Readiness, _attrs: TaskAttrs) {
        self.state.events.lock().push(RecordedEvent {
            direction: Direction::Input,
            token,
            events,
        });
        if let Some(&fd) = self.state.drain.lock().get(&token) {
            drain_fd(fd);
        }
    }

    fn on_output_ready(&self, token: EventToken, events: Readiness, _attrs: TaskAttrs) {
        self.state.events.lock().push(RecordedEvent {
            direction: Direction::Output,
            token,
            events,
        });
    }
}

/// Non-blocking close-on-exec pipe pair (read end, write end).
pub fn pipe_pair() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    assert_eq!(rc, 0, "pipe2 failed");
    unsafe {
        (
            OwnedFd::from_raw_fd(fds[0]),
            OwnedFd::from_raw_fd(fds[1]),
        )
    }
}

pub fn write_byte(fd: RawFd, byte: u8) {
    let n = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    assert_eq!(n, 1, "failed to write byte to fd {fd}");
}

/// Read a non-blocking fd until it would block.
pub fn drain_fd(fd: RawFd) {
    let mut buf = [0u8; 256];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Start the dispatcher, skipping the test when io_uring is unavailable in
/// this environment.
pub fn start_or_skip(dispatcher: &EventDispatcher<Recorder>) -> bool {
    match dispatcher.start(None) {
        Ok(()) => true,
        Err(Error::NotInitialized) => {
            eprintln!("skipping: io_uring unavailable");
            false
        }
        Err(err) => panic!("start failed: {err}"),
    }
}

pub fn default_dispatcher() -> (EventDispatcher<Recorder>, Arc<RecorderState>) {
    let (recorder, state) = Recorder::new();
    (EventDispatcher::new(Config::default(), recorder), state)
}
