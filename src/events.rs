/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local process.
//!
//! Each variant of the [event enum](Event) contains an inner struct type summarizing one kind of
//! occurence: entering a round, broadcasting or receiving a message, committing a block, catching
//! up, or a step timing out. Every inner struct carries a timestamp taken when the event occured.
//!
//! Events are emitted **after** the corresponding occurence is completed; the
//! [commit event](CommitBlockEvent), for example, is emitted only after the block has been
//! persisted to the blockchain.
//!
//! Library users can register event handler closures when building a
//! [replica](crate::replica::Replica), which the [event bus](crate::event_bus) thread calls when
//! the corresponding variant is published. Default handlers that log events out through the
//! [log](https://docs.rs/log/latest/log/) facade can be enabled in the replica's
//! [options](crate::replica::Options).

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::messages::{Precommit, Prevote, Propose};
use crate::types::basic::{BlockHash, Height, Round, Signatory, Step};

/// Enumerates all events defined for this library.
pub enum Event {
    // Progress within a height.
    StartRound(StartRoundEvent),
    Timeout(TimeoutEvent),

    // Events that involve broadcasting a message.
    Propose(ProposeEvent),
    Prevote(PrevoteEvent),
    Precommit(PrecommitEvent),

    // Events that involve receiving a message.
    ReceivePropose(ReceiveProposeEvent),
    ReceivePrevote(ReceivePrevoteEvent),
    ReceivePrecommit(ReceivePrecommitEvent),

    // Events that advance the height.
    CommitBlock(CommitBlockEvent),
    CatchUp(CatchUpEvent),
}

impl Event {
    /// Publishes the event on the event publisher channel (if the channel is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// The process entered a round: its step returned to `Propose`, and the signatory named in
/// `proposer` is expected to propose.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub proposer: Signatory,
}

/// A step timeout fired while its `(height, round)` stamp was still current.
pub struct TimeoutEvent {
    pub timestamp: SystemTime,
    pub step: Step,
    pub height: Height,
    pub round: Round,
}

/// The process broadcast a proposal as the scheduled proposer of its current round.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub propose: Propose,
}

/// The process broadcast a prevote.
pub struct PrevoteEvent {
    pub timestamp: SystemTime,
    pub prevote: Prevote,
}

/// The process broadcast a precommit.
pub struct PrecommitEvent {
    pub timestamp: SystemTime,
    pub precommit: Precommit,
}

/// The process received a proposal.
pub struct ReceiveProposeEvent {
    pub timestamp: SystemTime,
    pub propose: Propose,
}

/// The process received a prevote.
pub struct ReceivePrevoteEvent {
    pub timestamp: SystemTime,
    pub prevote: Prevote,
}

/// The process received a precommit.
pub struct ReceivePrecommitEvent {
    pub timestamp: SystemTime,
    pub precommit: Precommit,
}

/// A block, identifiable by its hash, was committed at `height` and persisted to the blockchain.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub block: BlockHash,
}

/// The process validated a commit certificate from the future and fast-forwarded from
/// `old_height` to `new_height`.
pub struct CatchUpEvent {
    pub timestamp: SystemTime,
    pub old_height: Height,
    pub new_height: Height,
    pub block: BlockHash,
}
