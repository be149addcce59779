/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/clock.rs
*
* A narrow seam over wall-clock time and randomness. The drift controller
* consumes both through the `Clock` trait so that its scheduling decisions
* can be replayed deterministically under test with a pinned instant and a
* seeded random source.
*
* SPDX-License-Identifier: Apache-2.0 */

use chrono::{DateTime, Utc};
use rand::Rng;

/// Time and jitter source used by the drift election loop.
///
/// `rand_fraction` returns a uniform value in `[0, 1)`; it feeds the
/// candidate shuffle and nothing else.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn rand_fraction(&self) -> f64;
}

/// Production clock backed by the system time and the thread-local RNG.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn rand_fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_fraction_is_in_unit_interval() {
        let clock = SystemClock;
        for _ in 0..100 {
            let f = clock.rand_fraction();
            assert!((0.0..1.0).contains(&f));
        }
    }

    #[test]
    fn fixed_clock_pins_the_instant() {
        let now = Utc::now();
        let clock = fixed::FixedClock::at(now);
        assert_eq!(clock.now(), now);
        assert_eq!(clock.now(), now);
    }

    #[test]
    fn fixed_clock_random_stream_is_deterministic() {
        let now = Utc::now();
        let a = fixed::FixedClock::at(now);
        let b = fixed::FixedClock::at(now);
        let left: Vec<f64> = (0..16).map(|_| a.rand_fraction()).collect();
        let right: Vec<f64> = (0..16).map(|_| b.rand_fraction()).collect();
        assert_eq!(left, right);
    }
}
