/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its methods.
//!
//! A [`Block`] is the unit of agreement: the application decides what goes into
//! [`Data`](crate::types::basic::Data), the process decides which block is committed at which
//! height. The process inspects only a block's [hash](Block::hash), [height](Block::height),
//! [round](Block::round), and, for the genesis block alone, its [signatories](Header::signatories).

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

use super::basic::{BlockHash, Data, Height, Round, Signatory};

/// Header of a [`Block`].
///
/// `signatories` is empty in every block except the genesis block, whose header carries the
/// signatory set of the chain. The process consults it when validating catch-up certificates.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: BlockHash,
    pub height: Height,
    pub round: Round,
    pub timestamp: u64,
    pub signatories: Vec<Signatory>,
}

impl Header {
    pub fn new(
        parent_hash: BlockHash,
        height: Height,
        round: Round,
        timestamp: u64,
        signatories: Vec<Signatory>,
    ) -> Header {
        Header {
            parent_hash,
            height,
            round,
            timestamp,
            signatories,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Block {
    hash: BlockHash,
    header: Header,
    data: Data,
}

impl Block {
    pub fn new(header: Header, data: Data) -> Block {
        Block {
            hash: Block::compute_hash(&header, &data),
            header,
            data,
        }
    }

    /// The genesis block at height 0, carrying the signatory set of the chain in its header.
    pub fn genesis(signatories: Vec<Signatory>, timestamp: u64) -> Block {
        Block::new(
            Header::new(
                BlockHash::invalid(),
                Height::new(0),
                Round::new(0),
                timestamp,
                signatories,
            ),
            Data::new(Vec::new()),
        )
    }

    pub fn compute_hash(header: &Header, data: &Data) -> BlockHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(header.try_to_vec().unwrap());
        hasher.update(data.try_to_vec().unwrap());
        BlockHash::new(hasher.finalize().into())
    }

    /// Checks if the block's hash matches its contents.
    pub fn is_correct(&self) -> bool {
        self.hash == Block::compute_hash(&self.header, &self.data)
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn round(&self) -> Round {
        self.header.round
    }
}
