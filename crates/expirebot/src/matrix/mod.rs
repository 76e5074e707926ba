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

pub mod client;
pub mod sync;

use async_trait::async_trait;
use expirebot_common::error::Result;
use serde::Deserialize;
use std::collections::HashMap;

pub use client::MatrixClient;

/// Power level needed to redact when the room does not say otherwise.
pub const DEFAULT_REDACTION_LEVEL: i64 = 50;

const REDACTION_EVENT_TYPE: &str = "m.room.redaction";

/// Content of a room's `m.room.power_levels` state event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: HashMap<String, i64>,
}

impl PowerLevels {
    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }

    pub fn redaction_level(&self) -> i64 {
        self.events
            .get(REDACTION_EVENT_TYPE)
            .copied()
            .unwrap_or(DEFAULT_REDACTION_LEVEL)
    }
}

/// Remote operations the bot needs from the homeserver.
///
/// Implementations report rate limiting as `ExpirebotError::RateLimited` and
/// vanished events as `ExpirebotError::NotFound`; everything else is
/// `ExpirebotError::Remote`.
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn get_room_power_levels(&self, room_id: &str) -> Result<PowerLevels>;

    /// Milliseconds since the epoch at which the homeserver received the event.
    async fn get_event_timestamp(&self, room_id: &str, event_id: &str) -> Result<i64>;

    async fn delete_message(&self, room_id: &str, event_id: &str, reason: &str) -> Result<()>;

    async fn send_notice(&self, room_id: &str, text: &str) -> Result<()>;
}
