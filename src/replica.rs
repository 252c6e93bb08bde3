/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that start a replica, as well as [the type](Replica) which keeps the replica alive.
//!
//! A replica is one participant in the replicated state machine: a
//! [process](crate::process::Process) together with the harness that feeds it. The harness
//! receives messages from the user's networking provider via [`Replica::deliver`], and sanitises
//! them before they reach the process:
//! 1. Messages from signatories outside the known signatory set are dropped.
//! 2. Messages below the process' current height are dropped.
//! 3. Messages whose signature does not verify against the issuer's key are dropped.
//!
//! Surviving messages are pushed through the [message queue](crate::mq::MessageQueue), which
//! orders and deduplicates each burst before handing it to the process.
//!
//! Outbound messages take the reverse path: the process hands them to a [`Signer`], which signs
//! them with the replica's key before passing them to the user's
//! [`Broadcaster`](crate::process::Broadcaster). The broadcaster must deliver broadcasts back to
//! the local replica as well; a process learns about its own proposals and votes the same way it
//! learns about everyone else's.

use std::collections::HashSet;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use ed25519_dalek::SigningKey;

use crate::event_bus::{start_event_bus, EventHandlers};
use crate::messages::Message;
use crate::mq::MessageQueue;
use crate::process::{Blockchain, Broadcaster, Observer, Process, Proposer, Timer, Validator};
use crate::scheduler::RoundRobin;
use crate::state::State;
use crate::types::basic::{Height, Signatory};

/// Configuration as specified by the operator.
#[derive(Clone)]
pub struct Options {
    /// Maximum number of inbound messages buffered between the network and the process.
    pub message_queue_capacity: usize,
    /// Whether to install the default logging event handlers defined in this library.
    pub log_events: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            message_queue_capacity: 1024,
            log_events: false,
        }
    }
}

/// A [`Broadcaster`] middleware that signs every outbound message with the replica's key before
/// handing it to the inner broadcaster.
pub struct Signer<N: Broadcaster> {
    signing_key: SigningKey,
    inner: N,
}

impl<N: Broadcaster> Signer<N> {
    pub(crate) fn new(signing_key: SigningKey, inner: N) -> Signer<N> {
        Signer { signing_key, inner }
    }
}

impl<N: Broadcaster> Broadcaster for Signer<N> {
    fn broadcast(&mut self, mut message: Message) {
        message.sign(&self.signing_key);
        self.inner.broadcast(message)
    }
}

enum ReplicaInput {
    Message(Message),
    Shutdown,
}

/// A running replica. Dropping it shuts down the threads it started.
pub struct Replica<B, P, V, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    process: Process<B, P, V, RoundRobin, Signer<N>, T, O>,
    to_handler: Sender<ReplicaInput>,
    handler: Option<JoinHandle<()>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<B, P, V, N, T, O> Replica<B, P, V, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    /// Start a replica participating under `signing_key` in the consensus run by `signatories`.
    ///
    /// `signatories` must be the signatory set carried by the genesis block, in the same order on
    /// every replica; the proposer schedule is a round-robin over it, and `f` is derived from its
    /// size. `blockchain` must already contain the genesis block at height 0.
    ///
    /// The replica starts its process at height 1 immediately. To resume a process from a
    /// persisted [`State`](crate::state::State) instead, drive a
    /// [`Process`](crate::process::Process) directly.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        options: Options,
        signing_key: SigningKey,
        signatories: Vec<Signatory>,
        blockchain: B,
        proposer: P,
        validator: V,
        observer: O,
        broadcaster: N,
        timer: T,
        mut user_handlers: EventHandlers,
    ) -> Replica<B, P, V, N, T, O> {
        let f = signatories.len() as u64 / 3;
        let signatory = Signatory::from(&signing_key.verifying_key());
        let allowed: HashSet<Signatory> = signatories.iter().copied().collect();
        let scheduler = RoundRobin::new(signatories);

        let (event_publisher, event_bus, event_bus_shutdown) = {
            if options.log_events {
                user_handlers.add_default_loggers();
            }
            if user_handlers.is_empty() {
                (None, None, None)
            } else {
                let (event_publisher, event_subscriber) = mpsc::channel();
                let (shutdown_sender, shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(user_handlers, event_subscriber, shutdown_receiver);
                (Some(event_publisher), Some(event_bus), Some(shutdown_sender))
            }
        };

        let process = Process::new(
            signatory,
            State::new(f),
            blockchain,
            proposer,
            validator,
            observer,
            Signer::new(signing_key, broadcaster),
            scheduler,
            timer,
            event_publisher,
        );

        let (to_handler, from_replica) = mpsc::channel();
        let handler = {
            let process = process.clone();
            let mut mq = MessageQueue::new(options.message_queue_capacity);
            thread::spawn(move || loop {
                let message = match from_replica.recv() {
                    Ok(ReplicaInput::Message(message)) => message,
                    Ok(ReplicaInput::Shutdown) | Err(_) => return,
                };

                if !allowed.contains(&message.signatory()) {
                    log::debug!("dropping message from unknown signatory {}", message.signatory());
                    continue;
                }
                if message.height() < process.current_height() {
                    continue;
                }
                if !message.is_correctly_signed() {
                    log::debug!("dropping incorrectly signed message from {}", message.signatory());
                    continue;
                }
                mq.insert(message);

                loop {
                    let consumed = mq.consume(process.current_height(), |message| match message {
                        Message::Propose(propose) => process.on_propose(propose),
                        Message::Prevote(prevote) => process.on_prevote(prevote),
                        Message::Precommit(precommit) => process.on_precommit(precommit),
                    });
                    if consumed == 0 {
                        break;
                    }
                }
            })
        };

        process.start();

        Replica {
            process,
            to_handler,
            handler: Some(handler),
            event_bus,
            event_bus_shutdown,
        }
    }

    /// Hand an inbound message to the replica. The message is filtered and enqueued
    /// asynchronously; this never blocks.
    pub fn deliver(&self, message: Message) {
        let _ = self.to_handler.send(ReplicaInput::Message(message));
    }

    /// The height the replica's process is currently at.
    pub fn current_height(&self) -> Height {
        self.process.current_height()
    }

    pub fn signatory(&self) -> Signatory {
        self.process.signatory()
    }

    /// A copy of the process' isolated state, for persistence or inspection.
    pub fn state(&self) -> State {
        self.process.state()
    }
}

impl<B, P, V, N, T, O> Drop for Replica<B, P, V, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    fn drop(&mut self) {
        // The handler thread is stopped before the event bus so that every event it publishes is
        // still received.
        let _ = self.to_handler.send(ReplicaInput::Shutdown);
        let _ = self.handler.take().unwrap().join();

        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
            let _ = self.event_bus.take().unwrap().join();
        }
    }
}
