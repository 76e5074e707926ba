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

use expirebot_common::error::{ExpirebotError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::backoff::ExponentialBackoff;
use crate::config::EvictionSettings;
use crate::matrix::MessagingService;

/// Redacts messages one at a time, keeping a minimum gap between requests and
/// backing off while the homeserver rate limits us.
///
/// There is one actuator per process. Every redaction goes through `evict`,
/// which holds the actuator's lock for the whole call, so at most one request
/// is in flight no matter how many callers share it.
pub struct EvictionActuator {
    messaging: Arc<dyn MessagingService>,
    settings: EvictionSettings,
    /// Completion time of the previous request. The mutex is the eviction
    /// permit.
    last_call: Mutex<Option<Instant>>,
}

impl EvictionActuator {
    pub fn new(messaging: Arc<dyn MessagingService>, settings: EvictionSettings) -> Self {
        Self {
            messaging,
            settings,
            last_call: Mutex::new(None),
        }
    }

    /// Redacts one message. `Ok` means the homeserver accepted the redaction.
    pub async fn evict(&self, room_id: &str, event_id: &str) -> Result<()> {
        let mut last_call = self.last_call.lock().await;
        let mut backoff =
            ExponentialBackoff::new(self.settings.initial_backoff(), self.settings.max_backoff());

        while backoff.attempt() < self.settings.max_attempts {
            if let Some(previous) = *last_call {
                let elapsed = previous.elapsed();
                let spacing = self.settings.min_spacing();
                if elapsed < spacing {
                    sleep(spacing - elapsed).await;
                }
            }

            let result = self
                .messaging
                .delete_message(room_id, event_id, &self.settings.reason)
                .await;
            *last_call = Some(Instant::now());

            match result {
                Ok(()) => {
                    debug!(room_id, event_id, "redaction accepted");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    let delay = e
                        .retry_after()
                        .map_or(delay, |hint| hint.min(self.settings.max_backoff()).max(delay));
                    warn!(
                        room_id,
                        event_id,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "redaction rate limited, backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExpirebotError::RetriesExhausted(self.settings.max_attempts))
    }
}

#[cfg(test)]
mod test_actuator {
    use super::*;
    use crate::utils::MockMessaging;
    use std::time::Duration;

    fn actuator(messaging: Arc<MockMessaging>) -> EvictionActuator {
        EvictionActuator::new(messaging, EvictionSettings::default())
    }

    fn rate_limited() -> Result<()> {
        Err(ExpirebotError::RateLimited {
            retry_after_ms: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_redact_once_on_success() {
        let messaging = Arc::new(MockMessaging::default());
        let actuator = actuator(messaging.clone());

        actuator.evict("!room:example.org", "$event").await.unwrap();

        assert_eq!(
            messaging.deletions(),
            vec![("!room:example.org".to_owned(), "$event".to_owned())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_not_retry_other_failures() {
        let messaging = Arc::new(MockMessaging::default());
        messaging.queue_delete(Err(ExpirebotError::Remote("M_FORBIDDEN".to_owned())));
        let actuator = actuator(messaging.clone());

        let err = actuator
            .evict("!room:example.org", "$event")
            .await
            .unwrap_err();

        assert!(matches!(err, ExpirebotError::Remote(_)));
        assert_eq!(messaging.deletions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_back_off_and_give_up_after_five_attempts() {
        let messaging = Arc::new(MockMessaging::default());
        for _ in 0..6 {
            messaging.queue_delete(rate_limited());
        }
        let actuator = actuator(messaging.clone());

        let start = Instant::now();
        let err = actuator
            .evict("!room:example.org", "$event")
            .await
            .unwrap_err();

        assert!(matches!(err, ExpirebotError::RetriesExhausted(5)));
        let times = messaging.deletion_times();
        assert_eq!(times.len(), 5);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
        // The fifth rejection is still followed by its 16s delay.
        assert_eq!(start.elapsed(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_recover_after_a_rate_limit() {
        let messaging = Arc::new(MockMessaging::default());
        messaging.queue_delete(rate_limited());
        messaging.queue_delete(rate_limited());
        messaging.queue_delete(Ok(()));
        let actuator = actuator(messaging.clone());

        actuator.evict("!room:example.org", "$event").await.unwrap();

        assert_eq!(messaging.deletions().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_honour_a_longer_server_hint() {
        let messaging = Arc::new(MockMessaging::default());
        messaging.queue_delete(Err(ExpirebotError::RateLimited {
            retry_after_ms: Some(5_000),
        }));
        let actuator = actuator(messaging.clone());

        actuator.evict("!room:example.org", "$event").await.unwrap();

        let times = messaging.deletion_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_space_consecutive_redactions() {
        let messaging = Arc::new(MockMessaging::default());
        let actuator = actuator(messaging.clone());

        actuator.evict("!room:example.org", "$one").await.unwrap();
        actuator.evict("!room:example.org", "$two").await.unwrap();

        let times = messaging.deletion_times();
        assert!(times[1] - times[0] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn it_should_serialize_concurrent_callers() {
        let messaging = Arc::new(MockMessaging::default().with_delete_delay(Duration::from_millis(50)));
        let actuator = Arc::new(actuator(messaging.clone()));

        let (a, b) = tokio::join!(
            actuator.evict("!a:example.org", "$one"),
            actuator.evict("!b:example.org", "$two"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(messaging.max_in_flight(), 1);
        let times = messaging.deletion_times();
        assert!(times[1] - times[0] >= Duration::from_millis(150));
    }
}
