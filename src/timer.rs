/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A linear-backoff implementation of the [`Timer`](crate::process::Timer) trait.

use std::time::Duration;

use crate::process::Timer;
use crate::types::basic::{Round, Step};

/// Waits `base_timeout + round * timeout_scaling` in every step. The wait grows with the round
/// number so that under partial synchrony, rounds eventually become long enough for an honest
/// proposer's messages to arrive before anyone times out.
#[derive(Clone)]
pub struct LinearTimer {
    base_timeout: Duration,
    timeout_scaling: Duration,
}

impl LinearTimer {
    pub fn new(base_timeout: Duration, timeout_scaling: Duration) -> LinearTimer {
        LinearTimer {
            base_timeout,
            timeout_scaling,
        }
    }
}

impl Timer for LinearTimer {
    fn timeout(&self, _step: Step, round: Round) -> Duration {
        let round = u32::try_from(round.int().max(0)).unwrap_or(u32::MAX);
        self.base_timeout + self.timeout_scaling * round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_decreasing_in_round() {
        let timer = LinearTimer::new(Duration::from_millis(100), Duration::from_millis(50));
        let mut previous = Duration::ZERO;
        for round in 0..10 {
            let timeout = timer.timeout(Step::Propose, Round::new(round));
            assert!(timeout >= previous);
            previous = timeout;
        }
        assert_eq!(
            timer.timeout(Step::Prevote, Round::new(4)),
            Duration::from_millis(300)
        );
    }
}
