/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordering and deduplicating queue that sits between the network and the
//! [process](crate::process::Process).
//!
//! Inbound messages arrive in whatever order the network delivers them. The
//! [replica](crate::replica) inserts them into a [`MessageQueue`] and then drains it, which hands
//! the process each burst in ascending `(height, round)` order, with proposals before prevotes
//! before precommits at the same position. The process is insensitive to arrival order, but
//! feeding it in this order means fewer messages sit in the tallies waiting for the proposal they
//! refer to.
//!
//! The queue holds at most one message per `(signatory, height, round, kind)`; a later duplicate
//! replaces the earlier one. Capacity is bounded: when full, the message at the highest
//! `(height, round)` is dropped, keeping the queue's front dense.

use std::collections::BTreeMap;

use crate::messages::Message;
use crate::types::basic::{Height, Round, Signatory};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    height: Height,
    round: Round,
    kind: u8,
    signatory: Signatory,
}

impl QueueKey {
    fn of(message: &Message) -> QueueKey {
        QueueKey {
            height: message.height(),
            round: message.round(),
            kind: match message {
                Message::Propose(_) => 0,
                Message::Prevote(_) => 1,
                Message::Precommit(_) => 2,
            },
            signatory: message.signatory(),
        }
    }
}

pub struct MessageQueue {
    capacity: usize,
    queue: BTreeMap<QueueKey, Message>,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> MessageQueue {
        assert!(capacity > 0, "message queue capacity must be non-zero");
        MessageQueue {
            capacity,
            queue: BTreeMap::new(),
        }
    }

    /// Insert a message, replacing any queued message with the same
    /// `(signatory, height, round, kind)`. Returns false if the queue was full and the message was
    /// at a higher `(height, round)` than everything queued, in which case it is dropped.
    pub fn insert(&mut self, message: Message) -> bool {
        let key = QueueKey::of(&message);
        if self.queue.contains_key(&key) {
            self.queue.insert(key, message);
            return true;
        }
        if self.queue.len() >= self.capacity {
            // Evict from the back so the lowest heights and rounds, which the process needs next,
            // are the ones that survive.
            let back = *self.queue.last_key_value().unwrap().0;
            if key >= back {
                return false;
            }
            self.queue.remove(&back);
        }
        self.queue.insert(key, message);
        true
    }

    /// Drain the queue in ascending `(height, round, kind)` order, passing each message at or above
    /// `height` to `consume` and silently dropping the stale remainder. Returns the number of
    /// messages consumed.
    pub fn consume(&mut self, height: Height, mut consume: impl FnMut(Message)) -> usize {
        let mut consumed = 0;
        for (key, message) in std::mem::take(&mut self.queue) {
            if key.height < height {
                continue;
            }
            consume(message);
            consumed += 1;
        }
        consumed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Precommit, Prevote};
    use crate::types::basic::BlockHash;

    fn prevote(height: u64, round: i64, signatory: u8) -> Message {
        Message::Prevote(Prevote::new(
            Height::new(height),
            Round::new(round),
            BlockHash::invalid(),
            Signatory::new([signatory; 32]),
        ))
    }

    fn precommit(height: u64, round: i64, signatory: u8) -> Message {
        Message::Precommit(Precommit::new(
            Height::new(height),
            Round::new(round),
            BlockHash::invalid(),
            Signatory::new([signatory; 32]),
        ))
    }

    #[test]
    fn consumes_in_height_round_kind_order() {
        let mut queue = MessageQueue::new(16);
        queue.insert(precommit(2, 0, 1));
        queue.insert(prevote(1, 1, 1));
        queue.insert(precommit(1, 0, 1));
        queue.insert(prevote(1, 0, 1));

        let mut order = Vec::new();
        let consumed = queue.consume(Height::new(1), |message| {
            order.push((message.height().int(), message.round().int()));
        });
        assert_eq!(consumed, 4);
        assert_eq!(order, vec![(1, 0), (1, 0), (1, 1), (2, 0)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn prevote_consumed_before_precommit_at_same_position() {
        let mut queue = MessageQueue::new(16);
        queue.insert(precommit(1, 0, 1));
        queue.insert(prevote(1, 0, 1));

        let mut kinds = Vec::new();
        queue.consume(Height::new(1), |message| {
            kinds.push(matches!(message, Message::Prevote(_)));
        });
        assert_eq!(kinds, vec![true, false]);
    }

    #[test]
    fn duplicate_keys_are_replaced_not_accumulated() {
        let mut queue = MessageQueue::new(16);
        queue.insert(prevote(1, 0, 1));
        queue.insert(prevote(1, 0, 1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn stale_heights_are_dropped_on_consume() {
        let mut queue = MessageQueue::new(16);
        queue.insert(prevote(1, 0, 1));
        queue.insert(prevote(3, 0, 1));

        let mut heights = Vec::new();
        let consumed = queue.consume(Height::new(2), |message| heights.push(message.height().int()));
        assert_eq!(consumed, 1);
        assert_eq!(heights, vec![3]);
    }

    #[test]
    fn eviction_keeps_the_front_dense() {
        let mut queue = MessageQueue::new(2);
        assert!(queue.insert(prevote(5, 0, 1)));
        assert!(queue.insert(prevote(4, 0, 1)));
        // Full. A message beyond the back is refused...
        assert!(!queue.insert(prevote(6, 0, 1)));
        // ...while a message before the back evicts it.
        assert!(queue.insert(prevote(3, 0, 1)));

        let mut heights = Vec::new();
        queue.consume(Height::new(0), |message| heights.push(message.height().int()));
        assert_eq!(heights, vec![3, 4]);
    }
}
