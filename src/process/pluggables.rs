/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definitions for the capabilities a [`Process`](crate::process::Process) consumes.
//!
//! Implementations are expected to be non-blocking: the process calls them while holding its lock,
//! so a capability that blocks stalls consensus, and one that calls back into the process
//! synchronously deadlocks it.

use std::time::Duration;

use crate::messages::Message;
use crate::types::basic::{Height, Round, Signatory, Step};
use crate::types::block::Block;

/// Height-indexed storage for committed blocks.
///
/// The process treats the absence of the genesis block, or of the block below its current height,
/// as storage corruption, and panics.
pub trait Blockchain: Send + 'static {
    /// Insert `block` as the committed block at `height`. Must be idempotent.
    fn insert_block_at_height(&mut self, height: Height, block: Block);

    fn block_at_height(&self, height: Height) -> Option<Block>;

    fn block_exists_at_height(&self, height: Height) -> bool;
}

/// Builds a fresh block for the process to propose when it is the scheduled proposer and has no
/// valid block to re-propose.
pub trait Proposer: Send + 'static {
    fn block_proposal(&mut self, height: Height, round: Round) -> Block;
}

/// Application-level block validity. Must be deterministic: every correct process must return the
/// same verdict for the same block.
pub trait Validator: Send + 'static {
    /// `check_history` is false only when validating the block inside a catch-up certificate,
    /// where the process may not have the intervening history.
    fn is_block_valid(&mut self, block: &Block, check_history: bool) -> bool;
}

/// Maps `(height, round)` to the signatory expected to propose at that position. Must be total,
/// and every correct process must agree on it.
pub trait Scheduler: Send + 'static {
    fn schedule(&self, height: Height, round: Round) -> Signatory;
}

/// Best-effort gossip of a message to every participant.
///
/// The broadcast must also be delivered back to the local replica: the process relies on seeing
/// its own proposals and votes through the same inbound path as everyone else's.
pub trait Broadcaster: Send + 'static {
    fn broadcast(&mut self, message: Message);
}

/// Timeout policy: how long to wait in `step` during `round` before giving up on it. Durations
/// that are monotonically non-decreasing in `round` are recommended for liveness.
pub trait Timer: Send + 'static {
    fn timeout(&self, step: Step, round: Round) -> Duration;
}

/// Notified when the process commits a block. Called exactly once per committed height, after the
/// block has been persisted.
pub trait Observer: Send + 'static {
    fn did_commit_block(&mut self, height: Height);
}

/// The null observer.
impl Observer for () {
    fn did_commit_block(&mut self, _height: Height) {}
}
