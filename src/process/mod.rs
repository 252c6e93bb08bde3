/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-participant consensus state machine and the traits it calls out to.
//!
//! A [`Process`] reacts to eight kinds of event: `start`, `start_round`, the receipt of each of the
//! three [message kinds](crate::messages), and the firing of each of the three step timeouts. Every
//! reaction runs under a single process-wide lock, so handlers observe and mutate a totally-ordered
//! view of the [`State`](crate::state::State).
//!
//! The process does not do I/O itself. Storage, block production, block validation, leader
//! scheduling, timeout policy, gossip, and commit notification are the [pluggable](pluggables)
//! capabilities of the surrounding node, and the process calls them through trait objects it owns.
//! All of them must be non-blocking, and none of them may call back into the process synchronously.

pub mod pluggables;

pub mod protocol;

pub use pluggables::{Blockchain, Broadcaster, Observer, Proposer, Scheduler, Timer, Validator};
pub use protocol::Process;
