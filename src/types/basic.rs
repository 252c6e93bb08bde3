/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Newtypes for the scalars of the protocol.
//!
//! These are "inert" types: they are sent around and inspected, but have no active behavior. Each
//! follows the newtype pattern, with a `new` constructor and accessors for the primitive
//! representation. Two of them carry a sentinel value with protocol meaning:
//! 1. [`Round::invalid`] (-1), the "no such round" marker used for the absent `valid_round` of a
//!    proposal and for the locked/valid round of a fresh height.
//! 2. [`BlockHash::invalid`] (all zeroes), which in a prevote or precommit denotes a nil vote.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Height of a block in the blockchain. Height 0 is the genesis block; consensus begins at
/// height 1.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
pub struct Height(u64);

impl Height {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Height {
    type Output = Height;

    fn add(self, rhs: u64) -> Self::Output {
        Height(self.0.add(rhs))
    }
}

impl AddAssign<u64> for Height {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<u64> for Height {
    type Output = Height;

    fn sub(self, rhs: u64) -> Self::Output {
        Height(self.0.sub(rhs))
    }
}

/// Round within a height. Rounds count up from 0; the sentinel [`Round::invalid`] (-1) means "no
/// round", and is what the representation is signed for.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
pub struct Round(i64);

impl Round {
    pub const fn new(int: i64) -> Self {
        Self(int)
    }

    pub const fn invalid() -> Self {
        Self(-1)
    }

    pub const fn int(&self) -> i64 {
        self.0
    }

    pub const fn is_invalid(&self) -> bool {
        self.0 == -1
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<i64> for Round {
    type Output = Round;

    fn add(self, rhs: i64) -> Self::Output {
        Round(self.0.add(rhs))
    }
}

/// Phase of a round. A process walks `Propose -> Prevote -> Precommit` within a round, with no
/// reversals; starting a round forces the step back to `Propose`.
///
/// `Nil` is the step of a process that has not started yet. A running process never re-enters it,
/// but it keeps the zero value of the serialized form representable.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
pub enum Step {
    Nil,
    Propose,
    Prevote,
    Precommit,
}

impl Step {
    pub(crate) fn from_u8(int: u8) -> Option<Step> {
        match int {
            0 => Some(Step::Nil),
            1 => Some(Step::Propose),
            2 => Some(Step::Prevote),
            3 => Some(Step::Precommit),
            _ => None,
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Step::Nil => 0,
            Step::Propose => 1,
            Step::Prevote => 2,
            Step::Precommit => 3,
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// The hash of a block. The all-zero hash is the sentinel [`BlockHash::invalid`]: in a prevote or
/// precommit it denotes a nil vote.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn invalid() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&STANDARD_NO_PAD.encode(self.0), f)
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(BlockHash(base64_bytes(deserializer)?))
    }
}

/// Identity of a consensus participant: the Ed25519 verifying key of the participant, in its
/// 32-byte encoding. Messages are authenticated against the key recovered from this value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Signatory([u8; 32]);

impl Signatory {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<&ed25519_dalek::VerifyingKey> for Signatory {
    fn from(verifying_key: &ed25519_dalek::VerifyingKey) -> Self {
        Signatory(verifying_key.to_bytes())
    }
}

impl Display for Signatory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&STANDARD_NO_PAD.encode(self.0), f)
    }
}

impl Debug for Signatory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for Signatory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signatory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Signatory(base64_bytes(deserializer)?))
    }
}

/// An Ed25519 signature in its 64-byte encoding.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The signature of a message that has not been signed yet.
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&STANDARD_NO_PAD.encode(self.0), f)
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(SignatureBytes(base64_bytes(deserializer)?))
    }
}

/// Data stored in a [block](crate::types::block::Block).
#[derive(
    Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize, Default,
)]
pub struct Data(Vec<Datum>);

impl Data {
    pub fn new(datum_vec: Vec<Datum>) -> Self {
        Self(datum_vec)
    }

    pub const fn vec(&self) -> &Vec<Datum> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Datum> {
        self.0.iter()
    }
}

/// Single datum stored in a block's [`Data`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
pub struct Datum(Vec<u8>);

impl Datum {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// Decode a base64 string into a fixed-width byte array. Shared by the `Deserialize` impls of the
/// byte-valued newtypes above, whose JSON form is a base64 string rather than an array of numbers.
fn base64_bytes<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    let string = <String as serde::Deserialize>::deserialize(deserializer)?;
    let bytes = STANDARD_NO_PAD
        .decode(&string)
        .map_err(de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|_| de::Error::custom("base64 string decodes to the wrong number of bytes"))
}
