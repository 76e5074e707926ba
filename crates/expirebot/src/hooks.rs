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

use expirebot_common::{
    duration::format_duration,
    error::{ExpirebotError, Result},
};
use tracing::{debug, info, warn};

use crate::auth::require_redact_rights;
use crate::bot::BotState;
use crate::db::{policy, tracked};

const TRACKABLE_MSGTYPES: [&str; 7] = [
    "m.text",
    "m.notice",
    "m.emote",
    "m.file",
    "m.image",
    "m.video",
    "m.location",
];

pub fn is_trackable_msgtype(msgtype: Option<&str>) -> bool {
    msgtype.is_some_and(|msgtype| TRACKABLE_MSGTYPES.contains(&msgtype))
}

pub fn missing_rights_notice(required: i64) -> String {
    format!(
        "I need power level {required} to redact messages in this room. \
         Expired messages will stay until I am given that level."
    )
}

/// Gives a newly joined room the default policy unless it already has one,
/// then tells the room if the bot cannot redact there. Unreadable power levels
/// are returned as an error after the policy is in place.
pub async fn on_bot_joined(state: &BotState, room_id: &str) -> Result<()> {
    if policy::insert_default(room_id, state.default_ttl_ms, &state.db).await? {
        info!(
            room_id,
            ttl = %format_duration(state.default_ttl_ms.unsigned_abs()),
            "applied default expiration policy"
        );
    }

    match require_redact_rights(state.messaging.as_ref(), room_id, &state.user_id).await {
        Ok(()) => Ok(()),
        Err(ExpirebotError::PermissionDenied { required, actual }) => {
            warn!(room_id, required, actual, "bot cannot redact in this room");
            state
                .messaging
                .send_notice(room_id, &missing_rights_notice(required))
                .await
        }
        Err(e) => Err(e),
    }
}

/// Forgets a room the bot is no longer in, along with its tracked messages.
pub async fn on_bot_left(state: &BotState, room_id: &str) -> Result<bool> {
    let removed = policy::delete(room_id, &state.db).await?;
    if removed {
        info!(room_id, "dropped expiration policy after leaving room");
    }
    Ok(removed)
}

/// Tracks a message if its room has a policy. The caller decides whether the
/// event type is trackable at all.
pub async fn track_message(state: &BotState, room_id: &str, event_id: &str) -> Result<bool> {
    if policy::get(room_id, &state.db).await?.is_none() {
        return Ok(false);
    }
    let inserted = tracked::insert(event_id, room_id, &state.db).await?;
    debug!(room_id, event_id, inserted, "tracking message");
    Ok(inserted)
}
