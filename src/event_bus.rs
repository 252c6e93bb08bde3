/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the [process](crate::process) and passes them to event
//! handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it triggers the
//! execution of all handlers defined for the contained event type, where the handlers for each
//! event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers`, this thread is not
//! started.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the handlers registered for each pre-defined event type from [events](crate::events).
///
/// User-defined handlers are pushed onto the per-event vectors before the replica is started; the
/// default logging handlers defined in [logging](crate::logging) are appended when logging is
/// enabled in the replica's [options](crate::replica::Options).
#[derive(Default)]
pub struct EventHandlers {
    pub start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub timeout_handlers: Vec<HandlerPtr<TimeoutEvent>>,
    pub propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub prevote_handlers: Vec<HandlerPtr<PrevoteEvent>>,
    pub precommit_handlers: Vec<HandlerPtr<PrecommitEvent>>,
    pub receive_propose_handlers: Vec<HandlerPtr<ReceiveProposeEvent>>,
    pub receive_prevote_handlers: Vec<HandlerPtr<ReceivePrevoteEvent>>,
    pub receive_precommit_handlers: Vec<HandlerPtr<ReceivePrecommitEvent>>,
    pub commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub catch_up_handlers: Vec<HandlerPtr<CatchUpEvent>>,
}

impl EventHandlers {
    /// Append the default logging handler for every event type.
    pub(crate) fn add_default_loggers(&mut self) {
        self.start_round_handlers.push(StartRoundEvent::get_logger());
        self.timeout_handlers.push(TimeoutEvent::get_logger());
        self.propose_handlers.push(ProposeEvent::get_logger());
        self.prevote_handlers.push(PrevoteEvent::get_logger());
        self.precommit_handlers.push(PrecommitEvent::get_logger());
        self.receive_propose_handlers
            .push(ReceiveProposeEvent::get_logger());
        self.receive_prevote_handlers
            .push(ReceivePrevoteEvent::get_logger());
        self.receive_precommit_handlers
            .push(ReceivePrecommitEvent::get_logger());
        self.commit_block_handlers.push(CommitBlockEvent::get_logger());
        self.catch_up_handlers.push(CatchUpEvent::get_logger());
    }

    /// Checks if no handlers are defined for any event type.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.timeout_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prevote_handlers.is_empty()
            && self.precommit_handlers.is_empty()
            && self.receive_propose_handlers.is_empty()
            && self.receive_prevote_handlers.is_empty()
            && self.receive_precommit_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.catch_up_handlers.is_empty()
    }

    fn fire(&self, event: &Event) {
        match event {
            Event::StartRound(e) => self.start_round_handlers.iter().for_each(|h| h(e)),
            Event::Timeout(e) => self.timeout_handlers.iter().for_each(|h| h(e)),
            Event::Propose(e) => self.propose_handlers.iter().for_each(|h| h(e)),
            Event::Prevote(e) => self.prevote_handlers.iter().for_each(|h| h(e)),
            Event::Precommit(e) => self.precommit_handlers.iter().for_each(|h| h(e)),
            Event::ReceivePropose(e) => self.receive_propose_handlers.iter().for_each(|h| h(e)),
            Event::ReceivePrevote(e) => self.receive_prevote_handlers.iter().for_each(|h| h(e)),
            Event::ReceivePrecommit(e) => {
                self.receive_precommit_handlers.iter().for_each(|h| h(e))
            }
            Event::CommitBlock(e) => self.commit_block_handlers.iter().for_each(|h| h(e)),
            Event::CatchUp(e) => self.catch_up_handlers.iter().for_each(|h| h(e)),
        }
    }
}

/// Spawn the event bus thread. It fires the registered handlers for every event received on
/// `event_subscriber`, until it receives a shutdown signal.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event_handlers.fire(&event),
            // The process was dropped; nothing further will arrive, but keep waiting for shutdown.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout) => (),
        }
    })
}
