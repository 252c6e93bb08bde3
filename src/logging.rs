/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [options](crate::replica::Options).
//!
//! This library logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [CommitBlock](crate::events::CommitBlockEvent) is printed:
//!
//! ```text
//! CommitBlock, 1701329264, 4, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the height of the committed block.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the
//!   committed block.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const TIMEOUT: &str = "Timeout";

pub const PROPOSE: &str = "Propose";
pub const PREVOTE: &str = "Prevote";
pub const PRECOMMIT: &str = "Precommit";

pub const RECEIVE_PROPOSE: &str = "ReceivePropose";
pub const RECEIVE_PREVOTE: &str = "ReceivePrevote";
pub const RECEIVE_PRECOMMIT: &str = "ReceivePrecommit";

pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const CATCH_UP: &str = "CatchUp";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(event.timestamp),
                event.height,
                event.round,
                first_seven_base64_chars(&event.proposer.bytes()),
            )
        })
    }
}

impl Logger for TimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &TimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                TIMEOUT,
                secs_since_unix_epoch(event.timestamp),
                event.step,
                event.height,
                event.round,
            )
        })
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                event.propose.height,
                event.propose.round,
                first_seven_base64_chars(&event.propose.block.hash().bytes()),
            )
        })
    }
}

impl Logger for PrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PrevoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREVOTE,
                secs_since_unix_epoch(event.timestamp),
                event.prevote.height,
                event.prevote.round,
                vote_hash(&event.prevote.block_hash),
            )
        })
    }
}

impl Logger for PrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PrecommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PRECOMMIT,
                secs_since_unix_epoch(event.timestamp),
                event.precommit.height,
                event.precommit.round,
                vote_hash(&event.precommit.block_hash),
            )
        })
    }
}

impl Logger for ReceiveProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveProposeEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.propose.signatory.bytes()),
                event.propose.height,
                event.propose.round,
                first_seven_base64_chars(&event.propose.block.hash().bytes()),
            )
        })
    }
}

impl Logger for ReceivePrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceivePrevoteEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PREVOTE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.prevote.signatory.bytes()),
                event.prevote.height,
                event.prevote.round,
                vote_hash(&event.prevote.block_hash),
            )
        })
    }
}

impl Logger for ReceivePrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceivePrecommitEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PRECOMMIT,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.precommit.signatory.bytes()),
                event.precommit.height,
                event.precommit.round,
                vote_hash(&event.precommit.block_hash),
            )
        })
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.height,
                first_seven_base64_chars(&event.block.bytes()),
            )
        })
    }
}

impl Logger for CatchUpEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CatchUpEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CATCH_UP,
                secs_since_unix_epoch(event.timestamp),
                event.old_height,
                event.new_height,
                first_seven_base64_chars(&event.block.bytes()),
            )
        })
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("event occured before the unix epoch")
        .as_secs()
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn vote_hash(block_hash: &crate::types::basic::BlockHash) -> String {
    if block_hash.is_invalid() {
        "nil".to_string()
    } else {
        first_seven_base64_chars(&block_hash.bytes())
    }
}
