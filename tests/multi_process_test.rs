/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Integration tests that run several [replicas](riptide::replica::Replica) against each other
//! over a mock network of channels, with real timers, and poll their blockchains until consensus
//! has visibly made progress.
//!
//! The mock network delivers every broadcast to every process (the sender included), with no
//! ordering guarantees across senders. Persistence is a hashmap, so the tests leave no artifacts.

mod common;

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use log::LevelFilter;

use riptide::event_bus::EventHandlers;
use riptide::messages::Message;
use riptide::replica::{Options, Replica};
use riptide::timer::LinearTimer;
use riptide::types::basic::Signatory;
use riptide::types::block::Block;

use common::{
    random_keypairs, setup_logger, signatories, wait_until, ChainProposer, ChainValidator,
    ChannelBroadcaster, CommitLog, MemBlockchain,
};

type TestReplica = Replica<
    MemBlockchain,
    ChainProposer,
    ChainValidator,
    ChannelBroadcaster,
    LinearTimer,
    CommitLog,
>;

struct Node {
    _replica: Arc<TestReplica>,
    blockchain: MemBlockchain,
    commits: CommitLog,
}

impl Node {
    fn start(
        keypair: SigningKey,
        signatories: Vec<Signatory>,
        genesis: Block,
        inboxes: Vec<Sender<Message>>,
        receiver: Receiver<Message>,
    ) -> Node {
        let blockchain = MemBlockchain::with_genesis(genesis);
        let commits = CommitLog::new();
        let replica = Arc::new(Replica::start(
            Options {
                message_queue_capacity: 1024,
                log_events: true,
            },
            keypair,
            signatories,
            blockchain.clone(),
            ChainProposer::new(blockchain.clone()),
            ChainValidator::new(blockchain.clone()),
            commits.clone(),
            ChannelBroadcaster::new(inboxes),
            LinearTimer::new(Duration::from_millis(200), Duration::from_millis(200)),
            EventHandlers::default(),
        ));

        // Pump the node's inbox into the replica.
        let pump = Arc::clone(&replica);
        thread::spawn(move || {
            while let Ok(message) = receiver.recv() {
                pump.deliver(message);
            }
        });

        Node {
            _replica: replica,
            blockchain,
            commits,
        }
    }
}

/// Start the nodes at the `active` indices of a signatory set of size `count`. Inactive indices
/// get no node: messages to them vanish, as if the process were down.
fn start_network(count: u8, active: &[usize]) -> Vec<Node> {
    let keypairs = random_keypairs(count);
    let signatories = signatories(&keypairs);
    let genesis = Block::genesis(signatories.clone(), 0);

    let (inboxes, receivers): (Vec<Sender<Message>>, Vec<Receiver<Message>>) =
        (0..count).map(|_| mpsc::channel()).unzip();

    keypairs
        .into_iter()
        .zip(receivers)
        .enumerate()
        .filter(|(index, _)| active.contains(index))
        .map(|(_, (keypair, receiver))| {
            Node::start(
                keypair,
                signatories.clone(),
                genesis.clone(),
                inboxes.clone(),
                receiver,
            )
        })
        .collect()
}

#[test]
fn four_processes_commit_the_same_chain() {
    setup_logger(LevelFilter::Info);

    let nodes = start_network(4, &[0, 1, 2, 3]);

    wait_until(Duration::from_secs(120), "every process commits height 3", || {
        nodes.iter().all(|node| node.commits.commits().len() >= 3)
    });

    for height in 1..=3u64 {
        let hashes: HashSet<[u8; 32]> = nodes
            .iter()
            .map(|node| node.blockchain.get(height).unwrap().hash().bytes())
            .collect();
        assert_eq!(hashes.len(), 1, "processes disagree at height {}", height);
    }

    // The observer fired exactly once per height, in order.
    for node in &nodes {
        assert_eq!(node.commits.commits()[..3].to_vec(), vec![1, 2, 3]);
    }
}

#[test]
fn progress_survives_a_silent_proposer() {
    setup_logger(LevelFilter::Info);

    // The proposer of (height 1, round 0) is index 1. It never starts; the three live processes
    // are exactly a quorum, and must get past it through the propose timeout and a later round.
    let nodes = start_network(4, &[0, 2, 3]);

    wait_until(Duration::from_secs(120), "every live process commits height 2", || {
        nodes.iter().all(|node| node.commits.commits().len() >= 2)
    });

    let hashes: HashSet<[u8; 32]> = nodes
        .iter()
        .map(|node| node.blockchain.get(1).unwrap().hash().bytes())
        .collect();
    assert_eq!(hashes.len(), 1);

    // Height 1 cannot have committed in round 0, whose proposer was down.
    let committed = nodes[0].blockchain.get(1).unwrap();
    assert!(committed.round().int() >= 1);
}
