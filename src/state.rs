/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The isolated state of a [process](crate::process::Process), and its serialized forms.
//!
//! [`State`] is everything a process must carry across a restart: its position in the protocol
//! (`height`, `round`, `step`), the lock and valid-block bookkeeping that preserves safety across
//! rounds, and the three [tallies](crate::tally::Tally). The process owns its `State` exclusively
//! and mutates it only while holding the process lock.
//!
//! Two serialized forms are supported:
//! 1. A stable, flat, little-endian binary layout ([`State::to_bytes`] / [`State::from_bytes`])
//!    for restart persistence: `current_height (u64)`, `current_round (i64)`, `current_step (u8)`,
//!    then the locked block (u64 length prefix + encoding) and locked round (i64), then the valid
//!    block and valid round likewise, then the three tallies, each with a u64 length prefix.
//! 2. JSON ([`serde`]) for operational introspection.

use std::io::{self, ErrorKind};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::messages::{Precommit, Prevote, Propose};
use crate::tally::Tally;
use crate::types::basic::{Height, Round, Step};
use crate::types::block::Block;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub current_height: Height,
    pub current_round: Round,
    pub current_step: Step,
    pub locked_block: Option<Block>,
    pub locked_round: Round,
    pub valid_block: Option<Block>,
    pub valid_round: Round,
    pub proposals: Tally<Propose>,
    pub prevotes: Tally<Prevote>,
    pub precommits: Tally<Precommit>,
}

impl State {
    /// The state of a process that has never taken part in consensus: height 1, round 0, nothing
    /// locked, empty tallies configured for `f` tolerated faults.
    pub fn new(f: u64) -> State {
        State {
            current_height: Height::new(1),
            current_round: Round::new(0),
            current_step: Step::Propose,
            locked_block: None,
            locked_round: Round::invalid(),
            valid_block: None,
            valid_round: Round::invalid(),
            proposals: Tally::new(f),
            prevotes: Tally::new(f),
            precommits: Tally::new(f),
        }
    }

    /// Clear the per-height bookkeeping after committing the block at `committed_height`. Tally
    /// entries below `committed_height` are dropped; entries at `committed_height` itself survive,
    /// so the precommit certificate for the committed block stays available for the
    /// [`LatestCommit`](crate::messages::LatestCommit) piggyback of the next proposal.
    pub fn reset(&mut self, committed_height: Height) {
        self.current_step = Step::Propose;
        self.locked_block = None;
        self.locked_round = Round::invalid();
        self.valid_block = None;
        self.valid_round = Round::invalid();
        self.proposals.reset(committed_height);
        self.prevotes.reset(committed_height);
        self.precommits.reset(committed_height);
    }

    /// Encode the state in its flat little-endian binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.current_height.int().to_le_bytes());
        buf.extend_from_slice(&self.current_round.int().to_le_bytes());
        buf.push(self.current_step.to_u8());
        write_len_prefixed(&mut buf, &self.locked_block.try_to_vec().unwrap());
        buf.extend_from_slice(&self.locked_round.int().to_le_bytes());
        write_len_prefixed(&mut buf, &self.valid_block.try_to_vec().unwrap());
        buf.extend_from_slice(&self.valid_round.int().to_le_bytes());
        write_len_prefixed(&mut buf, &self.proposals.try_to_vec().unwrap());
        write_len_prefixed(&mut buf, &self.prevotes.try_to_vec().unwrap());
        write_len_prefixed(&mut buf, &self.precommits.try_to_vec().unwrap());
        buf
    }

    /// Decode a state from the layout produced by [`State::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> io::Result<State> {
        let mut reader = Reader { data };
        let current_height = Height::new(reader.read_u64()?);
        let current_round = Round::new(reader.read_i64()?);
        let current_step = Step::from_u8(reader.read_u8()?).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, "unknown step tag in serialized state")
        })?;
        let locked_block = Option::<Block>::try_from_slice(reader.read_len_prefixed()?)?;
        let locked_round = Round::new(reader.read_i64()?);
        let valid_block = Option::<Block>::try_from_slice(reader.read_len_prefixed()?)?;
        let valid_round = Round::new(reader.read_i64()?);
        let proposals = Tally::try_from_slice(reader.read_len_prefixed()?)?;
        let prevotes = Tally::try_from_slice(reader.read_len_prefixed()?)?;
        let precommits = Tally::try_from_slice(reader.read_len_prefixed()?)?;
        Ok(State {
            current_height,
            current_round,
            current_step,
            locked_block,
            locked_round,
            valid_block,
            valid_round,
            proposals,
            prevotes,
            precommits,
        })
    }
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "serialized state ends mid-field",
            ));
        }
        let (taken, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(taken)
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_len_prefixed(&mut self) -> io::Result<&'a [u8]> {
        let len = self.read_u64()?;
        let len = usize::try_from(len).map_err(|_| {
            io::Error::new(ErrorKind::InvalidData, "length prefix overflows usize")
        })?;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::Tallied;
    use crate::types::basic::{BlockHash, Data, Signatory};
    use crate::types::block::Header;

    fn populated_state() -> State {
        let mut state = State::new(1);
        let block = Block::new(
            Header::new(BlockHash::invalid(), Height::new(1), Round::new(0), 42, vec![]),
            Data::new(Vec::new()),
        );
        state.current_height = Height::new(1);
        state.current_round = Round::new(2);
        state.current_step = Step::Prevote;
        state.locked_block = Some(block.clone());
        state.locked_round = Round::new(1);
        state.valid_block = Some(block.clone());
        state.valid_round = Round::new(1);
        for signatory in 1..=3u8 {
            state.prevotes.insert(Prevote::new(
                Height::new(1),
                Round::new(1),
                block.hash(),
                Signatory::new([signatory; 32]),
            ));
            state.precommits.insert(Precommit::new(
                Height::new(1),
                Round::new(1),
                block.hash(),
                Signatory::new([signatory; 32]),
            ));
        }
        state
    }

    #[test]
    fn binary_round_trip() {
        let state = populated_state();
        let decoded = State::from_bytes(&state.to_bytes()).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn binary_round_trip_of_fresh_state() {
        let state = State::new(3);
        let decoded = State::from_bytes(&state.to_bytes()).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = populated_state().to_bytes();
        assert!(State::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(State::from_bytes(&[]).is_err());
    }

    #[test]
    fn json_round_trip() {
        let state = populated_state();
        let json = serde_json::to_string(&state).unwrap();
        let decoded: State = serde_json::from_str(&json).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn reset_clears_locks_and_old_heights() {
        let mut state = populated_state();
        state.precommits.insert(Precommit::new(
            Height::new(2),
            Round::new(0),
            BlockHash::new([9; 32]),
            Signatory::new([1; 32]),
        ));

        state.reset(Height::new(1));
        assert_eq!(state.current_step, Step::Propose);
        assert!(state.locked_block.is_none());
        assert!(state.locked_round.is_invalid());
        assert!(state.valid_block.is_none());
        assert!(state.valid_round.is_invalid());
        // Entries at the committed height survive for the piggyback certificate.
        assert_eq!(state.precommits.count(Height::new(1), Round::new(1)), 3);

        state.reset(Height::new(2));
        assert_eq!(state.precommits.count(Height::new(1), Round::new(1)), 0);
        assert_eq!(state.precommits.count(Height::new(2), Round::new(0)), 1);
    }

    #[test]
    fn highest_round_certificate_survives_reset() {
        let mut state = populated_state();
        state.reset(Height::new(1));
        let certificate = state.precommits.at_highest_round(Height::new(1));
        assert_eq!(certificate.len(), 3);
        assert!(certificate.iter().all(|p| p.round() == Round::new(1)));
    }
}
