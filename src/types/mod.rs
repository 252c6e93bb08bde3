/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert data types shared by every subsystem of the library.
//!
//! The types defined in [`basic`] follow the newtype pattern: each scalar in the protocol gets its
//! own struct wrapping its primitive representation, so that heights, rounds, hashes, and
//! signatories cannot be confused for one another at the type level. [`block`] defines the unit of
//! agreement, the [`Block`](block::Block).

pub mod basic;

pub mod block;

pub use basic::*;
pub use block::{Block, Header};
