/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of the consensus state machine.
//!
//! The reaction rules implemented here are those of the Tendermint algorithm
//! (<https://arxiv.org/pdf/1807.04938.pdf>), driven by the threshold edges reported by the
//! [tallies](crate::tally::Tally):
//! - A proposal from the scheduled proposer moves the process from `Propose` to `Prevote`, voting
//!   for the block if it is valid and compatible with the process' lock, and nil otherwise.
//! - A prevote quorum for the proposed block forms a lock and moves the process to `Precommit`; a
//!   nil prevote quorum moves it to `Precommit` voting nil.
//! - A precommit quorum for the proposed block commits it and starts round 0 of the next height.
//! - `f + 1` messages of one kind at a higher round of the current height are proof that a correct
//!   process is ahead, and the process skips to that round.
//! - Each step schedules a timeout; a timeout that fires while its `(height, round, step)` stamp is
//!   still current pushes the process onward with a nil vote, or into the next round.
//!
//! Additionally, every proposal piggybacks a [`LatestCommit`] certificate for the proposer's
//! previous block, and every received proposal is first run through catch-up, which lets a process
//! that has fallen behind jump straight to the certificate's height.

use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::events::*;
use crate::messages::{LatestCommit, Message, Precommit, Prevote, Propose, Signed};
use crate::state::State;
use crate::types::basic::{BlockHash, Height, Round, Signatory, Step};

use super::pluggables::{
    Blockchain, Broadcaster, Observer, Proposer, Scheduler, Timer, Validator,
};

/// A single participant in the replicated state machine.
///
/// `Process` is a cheaply cloneable handle to the state machine proper; every clone addresses the
/// same underlying state. All of its methods acquire the process lock for their full duration, so
/// they may be called from any thread, including the timeout tasks the process spawns for itself.
pub struct Process<B, P, V, S, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    S: Scheduler,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    inner: Arc<Mutex<ProcessInner<B, P, V, S, N, T, O>>>,
}

impl<B, P, V, S, N, T, O> Clone for Process<B, P, V, S, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    S: Scheduler,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    fn clone(&self) -> Self {
        Process {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B, P, V, S, N, T, O> Process<B, P, V, S, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    S: Scheduler,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    /// Create a process around the given state. The process does nothing until [`start`](Self::start)
    /// is called.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signatory: Signatory,
        state: State,
        blockchain: B,
        proposer: P,
        validator: V,
        observer: O,
        broadcaster: N,
        scheduler: S,
        timer: T,
        event_publisher: Option<Sender<Event>>,
    ) -> Process<B, P, V, S, N, T, O> {
        let inner = Arc::new_cyclic(|handle| {
            Mutex::new(ProcessInner {
                handle: handle.clone(),
                signatory,
                state,
                blockchain,
                proposer,
                validator,
                scheduler,
                broadcaster,
                timer,
                observer,
                event_publisher,
            })
        });
        Process { inner }
    }

    /// Enter the current round of the current height. Called once after construction, or after
    /// restoring a persisted state.
    pub fn start(&self) {
        let mut process = self.inner.lock().unwrap();
        let round = process.state.current_round;
        process.start_round(round);
    }

    pub fn start_round(&self, round: Round) {
        self.inner.lock().unwrap().start_round(round)
    }

    pub fn on_propose(&self, propose: Propose) {
        self.inner.lock().unwrap().handle_propose(propose)
    }

    pub fn on_prevote(&self, prevote: Prevote) {
        self.inner.lock().unwrap().handle_prevote(prevote)
    }

    pub fn on_precommit(&self, precommit: Precommit) {
        self.inner.lock().unwrap().handle_precommit(precommit)
    }

    /// Handle a propose timeout stamped with `(height, round)`. A no-op unless the stamp is still
    /// current and the process is still in the `Propose` step.
    pub fn on_timeout_propose(&self, height: Height, round: Round) {
        self.inner.lock().unwrap().timeout_propose(height, round)
    }

    /// Handle a prevote timeout stamped with `(height, round)`. A no-op unless the stamp is still
    /// current and the process is still in the `Prevote` step.
    pub fn on_timeout_prevote(&self, height: Height, round: Round) {
        self.inner.lock().unwrap().timeout_prevote(height, round)
    }

    /// Handle a precommit timeout stamped with `(height, round)`. A no-op unless the stamp is
    /// still current; if it is, the process moves to the next round.
    pub fn on_timeout_precommit(&self, height: Height, round: Round) {
        self.inner.lock().unwrap().timeout_precommit(height, round)
    }

    /// A copy of the process' isolated state, for persistence or inspection.
    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn current_height(&self) -> Height {
        self.inner.lock().unwrap().state.current_height
    }

    pub fn signatory(&self) -> Signatory {
        self.inner.lock().unwrap().signatory
    }
}

struct ProcessInner<B, P, V, S, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    S: Scheduler,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    // Weak self-reference handed to timeout tasks, so that a timeout firing after the process has
    // been dropped is a no-op rather than a use of a dead process.
    handle: Weak<Mutex<ProcessInner<B, P, V, S, N, T, O>>>,

    signatory: Signatory,
    state: State,

    blockchain: B,
    proposer: P,
    validator: V,
    scheduler: S,
    broadcaster: N,
    timer: T,
    observer: O,

    event_publisher: Option<Sender<Event>>,
}

impl<B, P, V, S, N, T, O> ProcessInner<B, P, V, S, N, T, O>
where
    B: Blockchain,
    P: Proposer,
    V: Validator,
    S: Scheduler,
    N: Broadcaster,
    T: Timer,
    O: Observer,
{
    fn start_round(&mut self, round: Round) {
        self.state.current_round = round;
        self.state.current_step = Step::Propose;

        let current_height = self.state.current_height;
        let proposer_for_round = self.scheduler.schedule(current_height, round);
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            height: current_height,
            round,
            proposer: proposer_for_round,
        })
        .publish(&self.event_publisher);

        if self.signatory == proposer_for_round {
            let proposal = match &self.state.valid_block {
                Some(block) => block.clone(),
                None => self.proposer.block_proposal(current_height, round),
            };

            // Piggyback the previous block and its precommit certificate so that processes which
            // missed the commit can catch up from this proposal alone.
            let previous_block = self
                .blockchain
                .block_at_height(current_height - 1)
                .unwrap_or_else(|| {
                    panic!(
                        "invariant violation: no block in storage at height {}",
                        current_height - 1
                    )
                });
            let commits = self
                .state
                .precommits
                .at_highest_round(current_height - 1)
                .into_iter()
                .filter(|precommit| precommit.block_hash == previous_block.hash())
                .collect();

            let propose = Propose::new(
                current_height,
                round,
                proposal,
                self.state.valid_round,
                LatestCommit::new(previous_block, commits),
                self.signatory,
            );
            log::info!(
                "proposing block {} at height {}, round {}",
                propose.block.hash(),
                current_height,
                round
            );
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                propose: propose.clone(),
            })
            .publish(&self.event_publisher);
            self.broadcaster.broadcast(Message::Propose(propose));
        } else {
            let duration = self.timer.timeout(Step::Propose, round);
            self.schedule_timeout(Step::Propose, current_height, round, duration);
        }
    }

    fn handle_propose(&mut self, propose: Propose) {
        Event::ReceivePropose(ReceiveProposeEvent {
            timestamp: SystemTime::now(),
            propose: propose.clone(),
        })
        .publish(&self.event_publisher);

        // The piggybacked certificate may move this process to a later height; every check below
        // runs against the possibly-advanced state.
        self.sync_latest_commit(&propose.latest_commit);

        let outcome = self.state.proposals.insert(propose.clone());

        // upon Propose{current_height, current_round, block, invalid} from the scheduled proposer
        // while step = Propose
        if propose.height == self.state.current_height
            && propose.round == self.state.current_round
            && propose.valid_round.is_invalid()
            && propose.signatory
                == self
                    .scheduler
                    .schedule(self.state.current_height, self.state.current_round)
            && self.state.current_step == Step::Propose
        {
            let prevote = if self.validator.is_block_valid(&propose.block, true)
                && (self.state.locked_round.is_invalid()
                    || self.state.locked_block.as_ref() == Some(&propose.block))
            {
                Prevote::new(
                    self.state.current_height,
                    self.state.current_round,
                    propose.block.hash(),
                    self.signatory,
                )
            } else {
                Prevote::new(
                    self.state.current_height,
                    self.state.current_round,
                    BlockHash::invalid(),
                    self.signatory,
                )
            };
            self.state.current_step = Step::Prevote;
            self.broadcast_prevote(prevote);
        }

        // upon f+1 Propose{current_height, round, *, *} with round > current_round
        if outcome.n > self.state.proposals.f()
            && propose.height == self.state.current_height
            && propose.round > self.state.current_round
        {
            self.start_round(propose.round);
        }

        self.check_propose_with_prevotes_at_current();
        if outcome.first_time {
            self.check_propose_with_prevotes_at_current_first_time();
        }
        self.check_propose_with_precommits(propose.round);
    }

    fn handle_prevote(&mut self, prevote: Prevote) {
        Event::ReceivePrevote(ReceivePrevoteEvent {
            timestamp: SystemTime::now(),
            prevote: prevote.clone(),
        })
        .publish(&self.event_publisher);

        let outcome = self.state.prevotes.insert(prevote.clone());

        // upon 2f+1 Prevote{current_height, current_round, *} while step = Prevote, for the first
        // time
        if outcome.first_time_exceeding_2f
            && prevote.height == self.state.current_height
            && prevote.round == self.state.current_round
            && self.state.current_step == Step::Prevote
        {
            let duration = self
                .timer
                .timeout(Step::Prevote, self.state.current_round);
            self.schedule_timeout(
                Step::Prevote,
                self.state.current_height,
                self.state.current_round,
                duration,
            );
        }

        // upon 2f+1 Prevote{current_height, current_round, nil} while step = Prevote
        let nil_prevotes = self.state.prevotes.count_by_block_hash(
            self.state.current_height,
            self.state.current_round,
            BlockHash::invalid(),
        );
        if nil_prevotes > 2 * self.state.prevotes.f() && self.state.current_step == Step::Prevote {
            let precommit = Precommit::new(
                self.state.current_height,
                self.state.current_round,
                BlockHash::invalid(),
                self.signatory,
            );
            self.state.current_step = Step::Precommit;
            self.broadcast_precommit(precommit);
        }

        // upon f+1 Prevote{current_height, round, *} with round > current_round
        if outcome.n > self.state.prevotes.f()
            && prevote.height == self.state.current_height
            && prevote.round > self.state.current_round
        {
            self.start_round(prevote.round);
        }

        self.check_propose_with_prevotes_at_current();
        if outcome.first_time_exceeding_2f {
            self.check_propose_with_prevotes_at_current_first_time();
        }
    }

    fn handle_precommit(&mut self, precommit: Precommit) {
        Event::ReceivePrecommit(ReceivePrecommitEvent {
            timestamp: SystemTime::now(),
            precommit: precommit.clone(),
        })
        .publish(&self.event_publisher);

        let outcome = self.state.precommits.insert(precommit.clone());

        // upon 2f+1 Precommit{current_height, current_round, *} for the first time
        if outcome.first_time_exceeding_2f
            && precommit.height == self.state.current_height
            && precommit.round == self.state.current_round
        {
            let duration = self
                .timer
                .timeout(Step::Precommit, self.state.current_round);
            self.schedule_timeout(
                Step::Precommit,
                self.state.current_height,
                self.state.current_round,
                duration,
            );
        }

        // upon f+1 Precommit{current_height, round, *} with round > current_round
        if outcome.n > self.state.precommits.f()
            && precommit.height == self.state.current_height
            && precommit.round > self.state.current_round
        {
            self.start_round(precommit.round);
        }

        self.check_propose_with_precommits(precommit.round);
    }

    fn timeout_propose(&mut self, height: Height, round: Round) {
        if height == self.state.current_height
            && round == self.state.current_round
            && self.state.current_step == Step::Propose
        {
            Event::Timeout(TimeoutEvent {
                timestamp: SystemTime::now(),
                step: Step::Propose,
                height,
                round,
            })
            .publish(&self.event_publisher);
            let prevote = Prevote::new(height, round, BlockHash::invalid(), self.signatory);
            self.state.current_step = Step::Prevote;
            self.broadcast_prevote(prevote);
        }
    }

    fn timeout_prevote(&mut self, height: Height, round: Round) {
        if height == self.state.current_height
            && round == self.state.current_round
            && self.state.current_step == Step::Prevote
        {
            Event::Timeout(TimeoutEvent {
                timestamp: SystemTime::now(),
                step: Step::Prevote,
                height,
                round,
            })
            .publish(&self.event_publisher);
            let precommit = Precommit::new(height, round, BlockHash::invalid(), self.signatory);
            self.state.current_step = Step::Precommit;
            self.broadcast_precommit(precommit);
        }
    }

    fn timeout_precommit(&mut self, height: Height, round: Round) {
        if height == self.state.current_height && round == self.state.current_round {
            Event::Timeout(TimeoutEvent {
                timestamp: SystemTime::now(),
                step: Step::Precommit,
                height,
                round,
            })
            .publish(&self.event_publisher);
            self.start_round(self.state.current_round + 1);
        }
    }

    /// upon Propose{current_height, current_round, block, valid_round} from the scheduled proposer
    /// and 2f+1 Prevote{current_height, valid_round, block_hash}, while step = Propose and
    /// 0 <= valid_round < current_round: prevote for the block if it is valid and the lock allows.
    fn check_propose_with_prevotes_at_current(&mut self) {
        let current_height = self.state.current_height;
        let current_round = self.state.current_round;
        let proposer = self.scheduler.schedule(current_height, current_round);
        let propose = match self
            .state
            .proposals
            .by_signatory(current_height, current_round, proposer)
        {
            Some(propose) => propose.clone(),
            None => return,
        };

        if propose.valid_round > Round::invalid() {
            let n = self.state.prevotes.count_by_block_hash(
                current_height,
                propose.valid_round,
                propose.block_hash(),
            );
            if n > 2 * self.state.prevotes.f()
                && self.state.current_step == Step::Propose
                && propose.valid_round < current_round
            {
                let prevote = if self.validator.is_block_valid(&propose.block, true)
                    && (self.state.locked_round <= propose.valid_round
                        || self.state.locked_block.as_ref() == Some(&propose.block))
                {
                    Prevote::new(
                        current_height,
                        current_round,
                        propose.block.hash(),
                        self.signatory,
                    )
                } else {
                    Prevote::new(
                        current_height,
                        current_round,
                        BlockHash::invalid(),
                        self.signatory,
                    )
                };
                self.state.current_step = Step::Prevote;
                self.broadcast_prevote(prevote);
            }
        }
    }

    /// upon Propose{current_height, current_round, block, *} from the scheduled proposer and 2f+1
    /// Prevote{current_height, current_round, block_hash}, for the first time, while
    /// step >= Prevote and the block is valid: record the valid block, and if still in the Prevote
    /// step, lock it and precommit for it.
    ///
    /// Must only be called when the proposal or the quorum is new at the current
    /// `(height, round)`: when a proposal is inserted for the first time, or when the prevote count
    /// first exceeds 2f.
    fn check_propose_with_prevotes_at_current_first_time(&mut self) {
        let current_height = self.state.current_height;
        let current_round = self.state.current_round;
        let proposer = self.scheduler.schedule(current_height, current_round);
        let propose = match self
            .state
            .proposals
            .by_signatory(current_height, current_round, proposer)
        {
            Some(propose) => propose.clone(),
            None => return,
        };

        let n = self.state.prevotes.count_by_block_hash(
            current_height,
            current_round,
            propose.block_hash(),
        );
        if n > 2 * self.state.prevotes.f()
            && self.state.current_step >= Step::Prevote
            && self.validator.is_block_valid(&propose.block, true)
        {
            self.state.valid_block = Some(propose.block.clone());
            self.state.valid_round = current_round;
            if self.state.current_step == Step::Prevote {
                self.state.locked_block = Some(propose.block.clone());
                self.state.locked_round = current_round;
                self.state.current_step = Step::Precommit;
                let precommit = Precommit::new(
                    current_height,
                    current_round,
                    propose.block.hash(),
                    self.signatory,
                );
                self.broadcast_precommit(precommit);
            }
        }
    }

    /// upon Propose{current_height, round, block, *} from the scheduled proposer of `round` and
    /// 2f+1 Precommit{current_height, round, block_hash}, while no block is persisted at
    /// current_height and the block is valid: commit.
    fn check_propose_with_precommits(&mut self, round: Round) {
        let current_height = self.state.current_height;
        let proposer = self.scheduler.schedule(current_height, round);
        let propose = match self
            .state
            .proposals
            .by_signatory(current_height, round, proposer)
        {
            Some(propose) => propose.clone(),
            None => return,
        };

        let n = self.state.precommits.count_by_block_hash(
            current_height,
            round,
            propose.block_hash(),
        );
        if n > 2 * self.state.precommits.f()
            && !self.blockchain.block_exists_at_height(current_height)
            && self.validator.is_block_valid(&propose.block, true)
        {
            self.blockchain
                .insert_block_at_height(current_height, propose.block.clone());
            self.state.current_height += 1;
            let committed_height = self.state.current_height - 1;
            self.state.reset(committed_height);
            self.observer.did_commit_block(committed_height);
            log::info!(
                "committed block {} at height {}",
                propose.block.hash(),
                committed_height
            );
            Event::CommitBlock(CommitBlockEvent {
                timestamp: SystemTime::now(),
                height: committed_height,
                block: propose.block.hash(),
            })
            .publish(&self.event_publisher);
            self.start_round(Round::new(0));
        }
    }

    /// Validate the commit certificate piggybacked on a proposal, and fast-forward to its height
    /// if it proves a commit beyond the current height.
    fn sync_latest_commit(&mut self, latest_commit: &LatestCommit) {
        // Only a certificate from the future can advance this process.
        if latest_commit.block.height() <= self.state.current_height {
            return;
        }

        if !self.validator.is_block_valid(&latest_commit.block, false) {
            return;
        }

        // The signatory set is static for the lifetime of the chain, so commits from any height
        // are checked against the genesis header.
        let genesis = self
            .blockchain
            .block_at_height(Height::new(0))
            .unwrap_or_else(|| panic!("invariant violation: no genesis block in storage"));
        let allowed: HashSet<Signatory> =
            genesis.header().signatories.iter().copied().collect();

        for precommit in &latest_commit.precommits {
            if !precommit.is_correctly_signed()
                || !allowed.contains(&precommit.signatory)
                || precommit.block_hash != latest_commit.block.hash()
                || precommit.height != latest_commit.block.height()
                || precommit.round != latest_commit.block.round()
            {
                log::debug!(
                    "dropping latest commit for height {}: bad precommit from {}",
                    latest_commit.block.height(),
                    precommit.signatory
                );
                return;
            }
        }

        let distinct: HashSet<Signatory> = latest_commit
            .precommits
            .iter()
            .map(|precommit| precommit.signatory)
            .collect();
        if (distinct.len() as u64) < 2 * self.state.precommits.f() + 1 {
            log::debug!(
                "dropping latest commit for height {}: {} distinct signatories is not a quorum",
                latest_commit.block.height(),
                distinct.len()
            );
            return;
        }

        let commit_height = latest_commit.block.height();
        if !self.blockchain.block_exists_at_height(commit_height) {
            self.blockchain
                .insert_block_at_height(commit_height, latest_commit.block.clone());
        }

        let old_height = self.state.current_height;
        self.state.current_height = commit_height + 1;
        self.state.current_round = Round::new(0);
        self.state.reset(commit_height);
        // Adopt the certificate, so a proposal by this process at the new height can piggyback it.
        for precommit in &latest_commit.precommits {
            self.state.precommits.insert(precommit.clone());
        }

        log::info!(
            "caught up from height {} to height {}",
            old_height,
            self.state.current_height
        );
        Event::CatchUp(CatchUpEvent {
            timestamp: SystemTime::now(),
            old_height,
            new_height: self.state.current_height,
            block: latest_commit.block.hash(),
        })
        .publish(&self.event_publisher);
        self.start_round(Round::new(0));
    }

    /// Spawn a task that sleeps for `duration`, then re-acquires the process lock and fires the
    /// timeout handler for `step`, stamped with `(height, round)`. There is no cancellation: a
    /// stale timeout is discarded by the stamp checks in the handlers.
    fn schedule_timeout(&self, step: Step, height: Height, round: Round, duration: Duration) {
        let process = self.handle.clone();
        thread::spawn(move || {
            thread::sleep(duration);
            let process = match process.upgrade() {
                Some(process) => process,
                None => return,
            };
            let mut process = process.lock().unwrap();
            match step {
                Step::Propose => process.timeout_propose(height, round),
                Step::Prevote => process.timeout_prevote(height, round),
                Step::Precommit => process.timeout_precommit(height, round),
                Step::Nil => {}
            }
        });
    }

    fn broadcast_prevote(&mut self, prevote: Prevote) {
        Event::Prevote(PrevoteEvent {
            timestamp: SystemTime::now(),
            prevote: prevote.clone(),
        })
        .publish(&self.event_publisher);
        self.broadcaster.broadcast(Message::Prevote(prevote));
    }

    fn broadcast_precommit(&mut self, precommit: Precommit) {
        Event::Precommit(PrecommitEvent {
            timestamp: SystemTime::now(),
            precommit: precommit.clone(),
        })
        .publish(&self.event_publisher);
        self.broadcaster.broadcast(Message::Precommit(precommit));
    }
}
