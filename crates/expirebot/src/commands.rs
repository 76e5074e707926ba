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
    duration::{format_duration, parse_duration},
    error::ExpirebotError,
};
use tracing::{error, info};

use crate::auth::require_redact_rights;
use crate::bot::BotState;
use crate::db::{policy, tracked};
use crate::hooks::missing_rights_notice;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Set(String),
    Unset,
    Show,
}

impl Command {
    /// Reads a command out of a message body. Messages that do not start with
    /// `prefix` as a whole word are not commands. Unknown subcommands get help.
    pub fn parse(prefix: &str, body: &str) -> Option<Self> {
        let mut words = body.split_whitespace();
        if words.next()? != prefix {
            return None;
        }

        let command = match words.next() {
            Some("set") => Self::Set(words.collect::<Vec<_>>().join(" ")),
            Some("unset") => Self::Unset,
            Some("show") => Self::Show,
            _ => Self::Help,
        };
        Some(command)
    }
}

fn help(prefix: &str) -> String {
    format!(
        "Available subcommands:\n\
         \x20 {prefix} set <time> - Set expiration time (e.g. {prefix} set 24h)\n\
         \x20 {prefix} unset - Disable message expiration\n\
         \x20 {prefix} show - Show current expiration settings"
    )
}

/// Returns the reply to send when `sender` may not change the room's policy.
/// Unreadable power levels deny the change.
async fn deny(state: &BotState, room_id: &str, sender: &str) -> Option<String> {
    match require_redact_rights(state.messaging.as_ref(), room_id, sender).await {
        Ok(()) => None,
        Err(ExpirebotError::PermissionDenied { required, .. }) => Some(format!(
            "Only users with power level {required} or higher can change message expiration."
        )),
        Err(e) => {
            error!(room_id, sender, error = %e, "failed to check permissions");
            Some("Failed to check your permissions. Please try again later.".to_owned())
        }
    }
}

async fn set(state: &BotState, room_id: &str, sender: &str, arg: &str) -> String {
    if let Some(reply) = deny(state, room_id, sender).await {
        return reply;
    }

    let prefix = &state.command_prefix;
    if arg.is_empty() {
        return format!("Usage: {prefix} set <time>, e.g. {prefix} set 24h or {prefix} set 1d2h30m");
    }
    let ttl_ms = match parse_duration(arg).map(i64::try_from) {
        Ok(Ok(0)) => return "Expiration time must be longer than zero.".to_owned(),
        Ok(Ok(ttl_ms)) => ttl_ms,
        Ok(Err(_)) | Err(_) => {
            return format!("Error parsing duration: `{arg}` is not a time like 24h or 1d2h30m");
        }
    };

    if let Err(e) = policy::upsert(room_id, ttl_ms, &state.db).await {
        error!(room_id, error = %e, "failed to store expiration policy");
        return "Failed to update room expiration settings. Please try again later.".to_owned();
    }
    info!(room_id, sender, ttl_ms, "expiration policy set");

    let mut reply = format!(
        "Message expiration for this room set to {}",
        format_duration(ttl_ms.unsigned_abs())
    );
    if let Err(ExpirebotError::PermissionDenied { required, .. }) =
        require_redact_rights(state.messaging.as_ref(), room_id, &state.user_id).await
    {
        reply.push_str("\n\n");
        reply.push_str(&missing_rights_notice(required));
    }
    reply
}

async fn unset(state: &BotState, room_id: &str, sender: &str) -> String {
    if let Some(reply) = deny(state, room_id, sender).await {
        return reply;
    }

    match policy::delete(room_id, &state.db).await {
        Ok(true) => {
            info!(room_id, sender, "expiration policy removed");
            "Message expiration for this room has been disabled. Messages already sent will be kept."
                .to_owned()
        }
        Ok(false) => "No message expiration was set for this room.".to_owned(),
        Err(e) => {
            error!(room_id, error = %e, "failed to remove expiration policy");
            "Failed to disable room expiration. Please try again later.".to_owned()
        }
    }
}

async fn show(state: &BotState, room_id: &str) -> String {
    let ttl_ms = match policy::get(room_id, &state.db).await {
        Ok(Some(ttl_ms)) => ttl_ms,
        Ok(None) => return "No message expiration is set for this room".to_owned(),
        Err(e) => {
            error!(room_id, error = %e, "failed to read expiration policy");
            return "Failed to fetch room expiration settings. Please try again later.".to_owned();
        }
    };

    let duration = format_duration(ttl_ms.unsigned_abs());
    match tracked::count_by_room(room_id, &state.db).await {
        Ok(count) => format!(
            "Messages in this room expire after {duration}. {count} message(s) waiting to expire."
        ),
        Err(e) => {
            error!(room_id, error = %e, "failed to count tracked messages");
            format!("Messages in this room expire after {duration}")
        }
    }
}

/// Runs a command and returns the reply for the room.
pub async fn handle(state: &BotState, room_id: &str, sender: &str, command: Command) -> String {
    match command {
        Command::Help => help(&state.command_prefix),
        Command::Set(arg) => set(state, room_id, sender, &arg).await,
        Command::Unset => unset(state, room_id, sender).await,
        Command::Show => show(state, room_id).await,
    }
}
