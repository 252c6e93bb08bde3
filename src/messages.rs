/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the messages exchanged between processes, and their authentication.
//!
//! There are three kinds of message: [`Propose`], [`Prevote`], and [`Precommit`], combined in the
//! [`Message`] enum. Every message names its issuing [`Signatory`] and carries an Ed25519 signature
//! over the fields that safety depends on; [`Signed`] defines how the signed bytes are derived and
//! how a signature is checked against the issuer's key.
//!
//! A propose additionally piggybacks a [`LatestCommit`]: the previous block together with the
//! precommits that committed it, which lets a lagging process
//! [catch up](crate::process::Process::on_propose) without a separate sync protocol.
//!
//! Authentication happens in the [replica](crate::replica) harness before a message reaches the
//! process; the process itself re-checks signatures only on the precommits inside a
//! `LatestCommit`, since those arrive bundled rather than as first-class messages.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::types::basic::{BlockHash, Height, Round, SignatureBytes, Signatory};
use crate::types::block::Block;

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against the verifying key named by the issuer's [`Signatory`].
pub trait Signed {
    /// Get the bytes that are passed as input into the signing function to form the signature of
    /// the message.
    fn message_bytes(&self) -> Vec<u8>;

    fn signatory(&self) -> Signatory;

    fn signature_bytes(&self) -> SignatureBytes;

    fn set_signature(&mut self, signature: SignatureBytes);

    /// Sign the message with the given key, replacing any signature it carries.
    fn sign(&mut self, signing_key: &SigningKey) {
        let signature = signing_key.sign(&self.message_bytes());
        self.set_signature(SignatureBytes::new(signature.to_bytes()));
    }

    /// Verify that the signature was created over `message_bytes` by the key named by the issuer's
    /// signatory.
    fn is_correctly_signed(&self) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.signatory().bytes()) {
            Ok(verifying_key) => verifying_key,
            Err(_) => return false,
        };
        let signature = Signature::from_bytes(&self.signature_bytes().bytes());
        verifying_key
            .verify(&self.message_bytes(), &signature)
            .is_ok()
    }
}

/// A candidate block for `(height, round)`, broadcast by the round's scheduled proposer.
///
/// `valid_round` is [`Round::invalid`] for a fresh proposal, or the round in which `block` last
/// gathered a prevote quorum if the proposer is re-proposing its valid block.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Propose {
    pub height: Height,
    pub round: Round,
    pub block: Block,
    pub valid_round: Round,
    pub latest_commit: LatestCommit,
    pub signatory: Signatory,
    pub signature: SignatureBytes,
}

impl Propose {
    pub fn new(
        height: Height,
        round: Round,
        block: Block,
        valid_round: Round,
        latest_commit: LatestCommit,
        signatory: Signatory,
    ) -> Propose {
        Propose {
            height,
            round,
            block,
            valid_round,
            latest_commit,
            signatory,
            signature: SignatureBytes::zero(),
        }
    }

    pub fn block_hash(&self) -> BlockHash {
        self.block.hash()
    }
}

impl Signed for Propose {
    fn message_bytes(&self) -> Vec<u8> {
        // The block is covered through its hash; the latest commit is excluded because each
        // precommit inside it carries its own signature.
        (0u8, self.height, self.round, self.block.hash(), self.valid_round)
            .try_to_vec()
            .unwrap()
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn set_signature(&mut self, signature: SignatureBytes) {
        self.signature = signature
    }
}

/// A first-phase vote for `(height, round)`. `block_hash` is [`BlockHash::invalid`] for a nil
/// prevote.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Prevote {
    pub height: Height,
    pub round: Round,
    pub block_hash: BlockHash,
    pub signatory: Signatory,
    pub signature: SignatureBytes,
}

impl Prevote {
    pub fn new(height: Height, round: Round, block_hash: BlockHash, signatory: Signatory) -> Prevote {
        Prevote {
            height,
            round,
            block_hash,
            signatory,
            signature: SignatureBytes::zero(),
        }
    }
}

impl Signed for Prevote {
    fn message_bytes(&self) -> Vec<u8> {
        (1u8, self.height, self.round, self.block_hash)
            .try_to_vec()
            .unwrap()
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn set_signature(&mut self, signature: SignatureBytes) {
        self.signature = signature
    }
}

/// A second-phase vote for `(height, round)`. `block_hash` is [`BlockHash::invalid`] for a nil
/// precommit.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Precommit {
    pub height: Height,
    pub round: Round,
    pub block_hash: BlockHash,
    pub signatory: Signatory,
    pub signature: SignatureBytes,
}

impl Precommit {
    pub fn new(
        height: Height,
        round: Round,
        block_hash: BlockHash,
        signatory: Signatory,
    ) -> Precommit {
        Precommit {
            height,
            round,
            block_hash,
            signatory,
            signature: SignatureBytes::zero(),
        }
    }
}

impl Signed for Precommit {
    fn message_bytes(&self) -> Vec<u8> {
        (2u8, self.height, self.round, self.block_hash)
            .try_to_vec()
            .unwrap()
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn set_signature(&mut self, signature: SignatureBytes) {
        self.signature = signature
    }
}

/// The commit certificate piggybacked on a [`Propose`]: a block together with precommits for it
/// from a quorum of signatories. A process that receives a certificate for a height beyond its own
/// verifies it and fast-forwards.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct LatestCommit {
    pub block: Block,
    pub precommits: Vec<Precommit>,
}

impl LatestCommit {
    pub fn new(block: Block, precommits: Vec<Precommit>) -> LatestCommit {
        LatestCommit { block, precommits }
    }
}

/// Tagged union over the three message kinds.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub enum Message {
    Propose(Propose),
    Prevote(Prevote),
    Precommit(Precommit),
}

impl Message {
    pub fn height(&self) -> Height {
        match self {
            Message::Propose(propose) => propose.height,
            Message::Prevote(prevote) => prevote.height,
            Message::Precommit(precommit) => precommit.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            Message::Propose(propose) => propose.round,
            Message::Prevote(prevote) => prevote.round,
            Message::Precommit(precommit) => precommit.round,
        }
    }

    pub fn signatory(&self) -> Signatory {
        match self {
            Message::Propose(propose) => propose.signatory,
            Message::Prevote(prevote) => prevote.signatory,
            Message::Precommit(precommit) => precommit.signatory,
        }
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        match self {
            Message::Propose(propose) => propose.sign(signing_key),
            Message::Prevote(prevote) => prevote.sign(signing_key),
            Message::Precommit(precommit) => precommit.sign(signing_key),
        }
    }

    pub fn is_correctly_signed(&self) -> bool {
        match self {
            Message::Propose(propose) => propose.is_correctly_signed(),
            Message::Prevote(prevote) => prevote.is_correctly_signed(),
            Message::Precommit(precommit) => precommit.is_correctly_signed(),
        }
    }
}

impl From<Propose> for Message {
    fn from(propose: Propose) -> Message {
        Message::Propose(propose)
    }
}

impl From<Prevote> for Message {
    fn from(prevote: Prevote) -> Message {
        Message::Prevote(prevote)
    }
}

impl From<Precommit> for Message {
    fn from(precommit: Precommit) -> Message {
        Message::Precommit(precommit)
    }
}
