/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deduplicated vote stores with threshold edge detection.
//!
//! A [`Tally`] holds messages of one kind -- the [process](crate::process) keeps one for proposes,
//! one for prevotes, and one for precommits -- keyed by `(height, round, signatory)`, so each
//! signatory gets at most one entry per `(height, round)`. If a signatory sends two different votes
//! for the same `(height, round)`, the first one wins and the second is discarded; equivocation
//! handling beyond that is not the tally's concern.
//!
//! [Inserting](Tally::insert) reports not just the resulting count but whether this insertion
//! crossed the `f + 1` or `2f + 1` thresholds *for the first time*. The consensus rules that must
//! fire exactly once per `(height, round)` -- scheduling a step timeout, forming a lock -- key off
//! these edges rather than off the raw counts.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::messages::{Precommit, Prevote, Propose};
use crate::types::basic::{BlockHash, Height, Round, Signatory};

/// Messages that can be stored in a [`Tally`].
pub trait Tallied: Clone {
    fn height(&self) -> Height;

    fn round(&self) -> Round;

    fn signatory(&self) -> Signatory;

    /// The block hash the message supports. For a propose this is the hash of the proposed block;
    /// for a nil vote it is [`BlockHash::invalid`].
    fn block_hash(&self) -> BlockHash;
}

impl Tallied for Propose {
    fn height(&self) -> Height {
        self.height
    }

    fn round(&self) -> Round {
        self.round
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn block_hash(&self) -> BlockHash {
        self.block.hash()
    }
}

impl Tallied for Prevote {
    fn height(&self) -> Height {
        self.height
    }

    fn round(&self) -> Round {
        self.round
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn block_hash(&self) -> BlockHash {
        self.block_hash
    }
}

impl Tallied for Precommit {
    fn height(&self) -> Height {
        self.height
    }

    fn round(&self) -> Round {
        self.round
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn block_hash(&self) -> BlockHash {
        self.block_hash
    }
}

/// The four signals returned by [`Tally::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Number of distinct signatories with a message at the inserted message's `(height, round)`,
    /// after the insertion.
    pub n: u64,
    /// Whether the inserted message is the first at its `(height, round)`.
    pub first_time: bool,
    /// Whether this insertion moved the count past `f` (i.e., to exactly `f + 1`).
    pub first_time_exceeding_f: bool,
    /// Whether this insertion moved the count past `2f` (i.e., to exactly `2f + 1`, a quorum).
    pub first_time_exceeding_2f: bool,
}

impl InsertOutcome {
    fn duplicate(n: u64) -> InsertOutcome {
        InsertOutcome {
            n,
            first_time: false,
            first_time_exceeding_f: false,
            first_time_exceeding_2f: false,
        }
    }
}

/// A deduplicated store of messages of one kind, indexed by `(height, round, signatory)`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Tally<M> {
    f: u64,
    messages: HashMap<Height, HashMap<Round, HashMap<Signatory, M>>>,
}

impl<M: Tallied> Tally<M> {
    /// Create an empty tally for a signatory set tolerating `f` faults.
    pub fn new(f: u64) -> Tally<M> {
        Tally {
            f,
            messages: HashMap::new(),
        }
    }

    /// The maximum number of tolerated Byzantine signatories this tally was configured with.
    pub fn f(&self) -> u64 {
        self.f
    }

    /// Insert a message, deduplicating by `(height, round, signatory)`. A second message from the
    /// same signatory at the same `(height, round)` leaves the tally unchanged, whether or not it
    /// equals the first.
    pub fn insert(&mut self, message: M) -> InsertOutcome {
        let slot = self
            .messages
            .entry(message.height())
            .or_default()
            .entry(message.round())
            .or_default();

        if slot.contains_key(&message.signatory()) {
            return InsertOutcome::duplicate(slot.len() as u64);
        }

        slot.insert(message.signatory(), message);
        let n = slot.len() as u64;
        InsertOutcome {
            n,
            first_time: n == 1,
            first_time_exceeding_f: n == self.f + 1,
            first_time_exceeding_2f: n == 2 * self.f + 1,
        }
    }

    /// Number of distinct signatories with a message at `(height, round)`, regardless of which
    /// block hash each supports.
    pub fn count(&self, height: Height, round: Round) -> u64 {
        self.slot(height, round).map_or(0, |slot| slot.len() as u64)
    }

    /// Number of distinct signatories supporting `block_hash` at `(height, round)`.
    pub fn count_by_block_hash(&self, height: Height, round: Round, block_hash: BlockHash) -> u64 {
        self.slot(height, round).map_or(0, |slot| {
            slot.values()
                .filter(|message| message.block_hash() == block_hash)
                .count() as u64
        })
    }

    /// The message inserted by `signatory` at `(height, round)`, if any.
    pub fn by_signatory(
        &self,
        height: Height,
        round: Round,
        signatory: Signatory,
    ) -> Option<&M> {
        self.slot(height, round)?.get(&signatory)
    }

    /// All messages at the single highest round seen at `height`. Used on the precommit tally to
    /// assemble the commit certificate piggybacked on the next height's proposal.
    pub fn at_highest_round(&self, height: Height) -> Vec<M> {
        let rounds = match self.messages.get(&height) {
            Some(rounds) => rounds,
            None => return Vec::new(),
        };
        rounds
            .iter()
            .max_by_key(|(round, _)| **round)
            .map_or(Vec::new(), |(_, slot)| slot.values().cloned().collect())
    }

    /// Drop every entry below `height`. Entries at `height` itself survive, so the certificate for
    /// a just-committed block stays available after the state reset that follows a commit.
    pub fn reset(&mut self, height: Height) {
        self.messages.retain(|entry_height, _| *entry_height >= height);
    }

    fn slot(&self, height: Height, round: Round) -> Option<&HashMap<Signatory, M>> {
        self.messages.get(&height)?.get(&round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prevote(height: u64, round: i64, hash: u8, signatory: u8) -> Prevote {
        Prevote::new(
            Height::new(height),
            Round::new(round),
            if hash == 0 {
                BlockHash::invalid()
            } else {
                BlockHash::new([hash; 32])
            },
            Signatory::new([signatory; 32]),
        )
    }

    #[test]
    fn duplicate_insert_leaves_counts_unchanged() {
        let mut tally = Tally::new(1);
        let outcome = tally.insert(prevote(1, 0, 7, 1));
        assert_eq!(outcome.n, 1);
        assert!(outcome.first_time);

        // Same signatory, same (height, round), different hash: first vote wins.
        let outcome = tally.insert(prevote(1, 0, 8, 1));
        assert_eq!(outcome, InsertOutcome::duplicate(1));
        assert_eq!(tally.count(Height::new(1), Round::new(0)), 1);
        assert_eq!(
            tally.count_by_block_hash(Height::new(1), Round::new(0), BlockHash::new([7; 32])),
            1
        );
    }

    #[test]
    fn threshold_edges_fire_exactly_once() {
        // f = 1: f + 1 = 2, 2f + 1 = 3.
        let mut tally = Tally::new(1);
        let first = tally.insert(prevote(1, 0, 7, 1));
        assert!(first.first_time && !first.first_time_exceeding_f);

        let second = tally.insert(prevote(1, 0, 7, 2));
        assert!(second.first_time_exceeding_f && !second.first_time_exceeding_2f);

        let third = tally.insert(prevote(1, 0, 7, 3));
        assert!(third.first_time_exceeding_2f);

        let fourth = tally.insert(prevote(1, 0, 7, 4));
        assert!(!fourth.first_time_exceeding_f && !fourth.first_time_exceeding_2f);
        assert_eq!(fourth.n, 4);
    }

    #[test]
    fn counts_are_per_hash_and_per_round() {
        let mut tally = Tally::new(1);
        tally.insert(prevote(1, 0, 7, 1));
        tally.insert(prevote(1, 0, 0, 2));
        tally.insert(prevote(1, 1, 7, 3));

        let height = Height::new(1);
        assert_eq!(tally.count(height, Round::new(0)), 2);
        assert_eq!(
            tally.count_by_block_hash(height, Round::new(0), BlockHash::new([7; 32])),
            1
        );
        assert_eq!(
            tally.count_by_block_hash(height, Round::new(0), BlockHash::invalid()),
            1
        );
        assert_eq!(tally.count(height, Round::new(1)), 1);
    }

    #[test]
    fn at_highest_round_returns_only_the_highest() {
        let mut tally = Tally::new(1);
        tally.insert(prevote(5, 0, 7, 1));
        tally.insert(prevote(5, 2, 8, 2));
        tally.insert(prevote(5, 2, 8, 3));
        tally.insert(prevote(6, 0, 9, 1));

        let highest = tally.at_highest_round(Height::new(5));
        assert_eq!(highest.len(), 2);
        assert!(highest.iter().all(|m| m.round == Round::new(2)));
    }

    #[test]
    fn reset_retains_the_given_height() {
        let mut tally = Tally::new(1);
        tally.insert(prevote(4, 0, 7, 1));
        tally.insert(prevote(5, 1, 8, 2));
        tally.insert(prevote(6, 0, 9, 3));

        tally.reset(Height::new(5));
        assert_eq!(tally.count(Height::new(4), Round::new(0)), 0);
        assert_eq!(tally.count(Height::new(5), Round::new(1)), 1);
        assert_eq!(tally.count(Height::new(6), Round::new(0)), 1);
    }
}
