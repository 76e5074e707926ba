// Expirebot
// Copyright (C) 2025 Throneless Tech

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::time::Duration;

/// Truncated binary exponential backoff: `initial`, `2 * initial`, ... up to
/// `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            attempt: 0,
        }
    }

    /// Returns the delay for the current attempt and moves to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.calculate_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn calculate_delay(&self) -> Duration {
        // 2^20 is far past any useful cap.
        let multiplier = 1u32 << self.attempt.min(20);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(32));

        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32, 32]);
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn backoff_survives_many_attempts() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(32));
        for _ in 0..100 {
            backoff.next_delay();
        }

        assert_eq!(backoff.calculate_delay(), Duration::from_secs(32));
    }
}
