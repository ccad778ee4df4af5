//! Readiness event dispatcher over io_uring one-shot polls.
//!
//! The dispatcher multiplexes "this fd is readable / writable / hung-up"
//! notifications for many file descriptors onto a single completion-loop
//! worker, re-arming the kernel's one-shot polls itself so consumers see
//! level-triggered-like behavior. Linux only; requires kernel 5.10 or newer
//! (probed at construction, falling back to a disabled dispatcher).

pub mod config;
pub mod dispatcher;
pub mod error;
pub(crate) mod event_loop;
pub mod metrics;
pub mod readiness;
pub mod ring;
pub mod scheduler;

// Public API re-exports
pub use config::Config;
pub use dispatcher::EventDispatcher;
pub use error::Error;
pub use readiness::Readiness;
pub use ring::{EventToken, WAKEUP_TOKEN};
pub use scheduler::{EventHandler, TaskAttrs, TaskId, TaskScheduler, ThreadScheduler};
