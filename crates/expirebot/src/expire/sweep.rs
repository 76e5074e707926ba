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

use expirebot_common::error::Result;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actuator::EvictionActuator;
use crate::config::SweepSettings;
use crate::db::tracked::{self, ExpiryCandidate};
use crate::matrix::MessagingService;

/// Outcome of a single pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub evicted: usize,
    /// Due messages the actuator could not redact. They stay tracked.
    pub failed: usize,
    /// Rows skipped because their timestamp or untracking failed.
    pub errors: usize,
}

impl SweepReport {
    fn log(&self) {
        if self.evicted > 0 || self.failed > 0 || self.errors > 0 {
            info!(
                examined = self.examined,
                evicted = self.evicted,
                failed = self.failed,
                errors = self.errors,
                "sweep complete"
            );
        } else {
            debug!(examined = self.examined, "sweep complete, nothing due");
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct Sweeper {
    db: DatabaseConnection,
    messaging: Arc<dyn MessagingService>,
    actuator: Arc<EvictionActuator>,
    settings: SweepSettings,
}

impl Sweeper {
    pub fn new(
        db: DatabaseConnection,
        messaging: Arc<dyn MessagingService>,
        actuator: Arc<EvictionActuator>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            db,
            messaging,
            actuator,
            settings,
        }
    }

    /// Runs one pass against the wall-clock time `now_ms`.
    ///
    /// Only a failure to read the tracked entries aborts the pass. Anything
    /// that goes wrong with a single row is logged, counted and left for the
    /// next pass.
    pub async fn sweep(&self, now_ms: i64) -> Result<SweepReport> {
        let candidates = tracked::list_expired(now_ms, &self.db).await?;
        let mut report = SweepReport::default();

        let batch_size = self.settings.batch_size.max(1);
        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            if index > 0 {
                sleep(self.settings.batch_pause()).await;
            }
            for candidate in batch {
                report.examined += 1;
                self.process(candidate, &mut report).await;
            }
        }

        Ok(report)
    }

    async fn process(&self, candidate: &ExpiryCandidate, report: &mut SweepReport) {
        let room_id = candidate.room_id.as_str();
        let event_id = candidate.event_id.as_str();

        let observed = match self.messaging.get_event_timestamp(room_id, event_id).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(room_id, event_id, error = %e, "failed to look up message timestamp");
                report.errors += 1;
                return;
            }
        };

        if !candidate.is_expired(observed) {
            return;
        }

        match self.actuator.evict(room_id, event_id).await {
            Ok(()) => match tracked::delete(event_id, &self.db).await {
                Ok(_) => {
                    info!(room_id, event_id, ttl_ms = candidate.ttl_ms, "message expired");
                    report.evicted += 1;
                }
                Err(e) => {
                    error!(room_id, event_id, error = %e, "redacted message could not be untracked");
                    report.errors += 1;
                }
            },
            Err(e) => {
                warn!(room_id, event_id, error = %e, "failed to redact message");
                report.failed += 1;
            }
        }
    }

    /// Sweeps until `token` is cancelled, starting with an immediate pass.
    pub async fn run(self, token: CancellationToken) {
        info!(interval_secs = self.settings.interval_secs, "sweep loop started");

        loop {
            let pass = self.clone();
            let mut handle = tokio::spawn(async move { pass.sweep(now_ms()).await });

            tokio::select! {
                _ = token.cancelled() => {
                    handle.abort();
                    let _ = handle.await;
                    break;
                }
                result = &mut handle => match result {
                    Ok(Ok(report)) => report.log(),
                    Ok(Err(e)) => warn!(error = %e, "sweep failed"),
                    Err(e) => error!(error = %e, "sweep task panicked"),
                },
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.settings.interval()) => {}
            }
        }

        info!("sweep loop stopped");
    }
}
