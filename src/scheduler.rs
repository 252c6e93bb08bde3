/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A round-robin implementation of the [`Scheduler`](crate::process::Scheduler) trait.

use crate::process::Scheduler;
use crate::types::basic::{Height, Round, Signatory};

/// Rotates the proposer role through a fixed signatory list: the proposer for `(height, round)` is
/// the signatory at index `(height + round) mod n`. Every correct process must construct the
/// round-robin from the same list in the same order for the schedules to agree.
#[derive(Clone)]
pub struct RoundRobin {
    signatories: Vec<Signatory>,
}

impl RoundRobin {
    pub fn new(signatories: Vec<Signatory>) -> RoundRobin {
        assert!(
            !signatories.is_empty(),
            "a round-robin schedule needs at least one signatory"
        );
        RoundRobin { signatories }
    }
}

impl Scheduler for RoundRobin {
    fn schedule(&self, height: Height, round: Round) -> Signatory {
        debug_assert!(!round.is_invalid());
        let n = self.signatories.len() as u64;
        let index = height.int().wrapping_add(round.int() as u64) % n;
        self.signatories[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signatories(n: u8) -> Vec<Signatory> {
        (0..n).map(|i| Signatory::new([i; 32])).collect()
    }

    #[test]
    fn rotates_through_heights_and_rounds() {
        let signatories = signatories(4);
        let round_robin = RoundRobin::new(signatories.clone());

        assert_eq!(
            round_robin.schedule(Height::new(1), Round::new(0)),
            signatories[1]
        );
        assert_eq!(
            round_robin.schedule(Height::new(1), Round::new(1)),
            signatories[2]
        );
        assert_eq!(
            round_robin.schedule(Height::new(2), Round::new(0)),
            signatories[2]
        );
        // Wraps around.
        assert_eq!(
            round_robin.schedule(Height::new(1), Round::new(3)),
            signatories[0]
        );
    }

    #[test]
    fn total_over_many_positions() {
        let round_robin = RoundRobin::new(signatories(3));
        for height in 0..100u64 {
            for round in 0..10i64 {
                // Must never panic, whatever the position.
                round_robin.schedule(Height::new(height), Round::new(round));
            }
        }
    }
}
