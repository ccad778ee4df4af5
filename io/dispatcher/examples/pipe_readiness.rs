//! Minimal end-to-end demo: watch a pipe through the dispatcher and print
//! every readiness callback.
//!
//! Run with `cargo run --example pipe_readiness`.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use dispatcher::ring::EventToken;
use dispatcher::scheduler::{EventHandler, TaskAttrs};
use dispatcher::{Config, EventDispatcher, Readiness};

struct PrintHandler {
    read_fd: RawFd,
}

impl EventHandler for PrintHandler {
    fn on_input_ready(&self, token: EventToken, events: Readiness, _attrs: TaskAttrs) {
        let mut buf = [0u8; 64];
        let n = unsafe {
            libc::read(
                self.read_fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        println!("input ready: token={token:#x} events={events:?} drained={n} bytes");
    }

    fn on_output_ready(&self, token: EventToken, events: Readiness, _attrs: TaskAttrs) {
        println!("output ready: token={token:#x} events={events:?}");
    }
}

fn pipe_pair() -> (OwnedFd, OwnedFd) {
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

fn main() {
    tracing_subscriber::fmt::init();

    let (read_end, write_end) = pipe_pair();
    let handler = PrintHandler {
        read_fd: read_end.as_raw_fd(),
    };

    let dispatcher = EventDispatcher::new(Config::default(), handler);
    if !dispatcher.enabled() {
        eprintln!("io_uring unavailable on this kernel, nothing to demo");
        return;
    }
    dispatcher.start(None).expect("start dispatcher");

    dispatcher
        .add_consumer(0x5678, read_end.as_raw_fd())
        .expect("register pipe");

    for byte in [b'a', b'b', b'c'] {
        let n = unsafe {
            libc::write(
                write_end.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        assert_eq!(n, 1);
        std::thread::sleep(Duration::from_millis(100));
    }

    dispatcher.stop();
    dispatcher.join();
}
