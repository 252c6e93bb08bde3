/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Mock capabilities shared by the test suites: an in-memory blockchain, a proposer and validator
//! for a toy chain whose blocks carry their height as data, a recording broadcaster for directed
//! tests, a channel-based broadcaster for multi-process tests, and a commit log observer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;

use riptide::messages::Message;
use riptide::process::{Blockchain, Broadcaster, Observer, Proposer, Validator};
use riptide::types::basic::{Data, Datum, Height, Round, Signatory};
use riptide::types::block::{Block, Header};

static LOGGER_INIT: Once = Once::new();

/// Set up a logger that logs all log messages with level Trace and above.
pub fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

/// Deterministic signing keys for a signatory set of size `n`.
pub fn keypairs(n: u8) -> Vec<SigningKey> {
    (1..=n).map(|i| SigningKey::from_bytes(&[i; 32])).collect()
}

/// Freshly generated signing keys for a signatory set of size `n`.
pub fn random_keypairs(n: u8) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprg)).collect()
}

pub fn signatories(keypairs: &[SigningKey]) -> Vec<Signatory> {
    keypairs
        .iter()
        .map(|keypair| Signatory::from(&keypair.verifying_key()))
        .collect()
}

/// A simple, volatile, in-memory implementation of [`Blockchain`]. Cloning yields a handle to the
/// same store, which lets tests inspect what a process has persisted.
#[derive(Clone)]
pub struct MemBlockchain(Arc<Mutex<HashMap<Height, Block>>>);

impl MemBlockchain {
    /// A new store holding only the given genesis block at height 0.
    pub fn with_genesis(genesis: Block) -> MemBlockchain {
        let mut blocks = HashMap::new();
        blocks.insert(Height::new(0), genesis);
        MemBlockchain(Arc::new(Mutex::new(blocks)))
    }

    pub fn get(&self, height: u64) -> Option<Block> {
        self.0.lock().unwrap().get(&Height::new(height)).cloned()
    }
}

impl Blockchain for MemBlockchain {
    fn insert_block_at_height(&mut self, height: Height, block: Block) {
        self.0.lock().unwrap().entry(height).or_insert(block);
    }

    fn block_at_height(&self, height: Height) -> Option<Block> {
        self.0.lock().unwrap().get(&height).cloned()
    }

    fn block_exists_at_height(&self, height: Height) -> bool {
        self.0.lock().unwrap().contains_key(&height)
    }
}

/// Proposes blocks that extend the chain in the backing store with their height as data.
pub struct ChainProposer {
    blockchain: MemBlockchain,
}

impl ChainProposer {
    pub fn new(blockchain: MemBlockchain) -> ChainProposer {
        ChainProposer { blockchain }
    }
}

impl Proposer for ChainProposer {
    fn block_proposal(&mut self, height: Height, round: Round) -> Block {
        let parent = self
            .blockchain
            .block_at_height(height - 1)
            .expect("proposing on top of a missing block");
        make_block(&parent, height, round, 0)
    }
}

/// Accepts a block if its parent hash matches the stored block one height below. With
/// `check_history` false (catch-up), only the block's internal consistency is checked.
pub struct ChainValidator {
    blockchain: MemBlockchain,
}

impl ChainValidator {
    pub fn new(blockchain: MemBlockchain) -> ChainValidator {
        ChainValidator { blockchain }
    }
}

impl Validator for ChainValidator {
    fn is_block_valid(&mut self, block: &Block, check_history: bool) -> bool {
        if !block.is_correct() {
            return false;
        }
        if !check_history {
            return true;
        }
        match self.blockchain.block_at_height(block.height() - 1) {
            Some(parent) => block.header().parent_hash == parent.hash(),
            None => false,
        }
    }
}

/// Build a block extending `parent`. `tag` goes into the block data, so tests can make two
/// distinct blocks for the same position.
pub fn make_block(parent: &Block, height: Height, round: Round, tag: u8) -> Block {
    let data = Data::new(vec![Datum::new(vec![tag]), Datum::new(height.int().to_le_bytes().to_vec())]);
    Block::new(
        Header::new(parent.hash(), height, round, height.int(), vec![]),
        data,
    )
}

/// Records every broadcast message for later inspection.
#[derive(Clone)]
pub struct RecordingBroadcaster(Arc<Mutex<Vec<Message>>>);

impl RecordingBroadcaster {
    pub fn new() -> RecordingBroadcaster {
        RecordingBroadcaster(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn sent(&self) -> Vec<Message> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Message> {
        self.0.lock().unwrap().last().cloned()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&mut self, message: Message) {
        self.0.lock().unwrap().push(message);
    }
}

/// Sends every broadcast message to every process' inbox, the local process' included.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    inboxes: Vec<Sender<Message>>,
}

impl ChannelBroadcaster {
    pub fn new(inboxes: Vec<Sender<Message>>) -> ChannelBroadcaster {
        ChannelBroadcaster { inboxes }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&mut self, message: Message) {
        for inbox in &self.inboxes {
            // A send to a stopped process fails; the network is best-effort.
            let _ = inbox.send(message.clone());
        }
    }
}

/// Records the heights handed to [`Observer::did_commit_block`].
#[derive(Clone)]
pub struct CommitLog(Arc<Mutex<Vec<Height>>>);

impl CommitLog {
    pub fn new() -> CommitLog {
        CommitLog(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn commits(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(|h| h.int()).collect()
    }
}

impl Observer for CommitLog {
    fn did_commit_block(&mut self, height: Height) {
        self.0.lock().unwrap().push(height);
    }
}

/// Poll `condition` until it holds, panicking if it does not within `timeout`.
pub fn wait_until(timeout: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("timed out waiting for: {}", what);
        }
        thread::sleep(Duration::from_millis(100));
    }
}
