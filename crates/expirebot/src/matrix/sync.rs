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
use serde_json::Value;

const MEMBER_EVENT_TYPE: &str = "m.room.member";
const MESSAGE_EVENT_TYPE: &str = "m.room.message";
const STICKER_EVENT_TYPE: &str = "m.sticker";

/// Something that happened in a room, reduced to what the bot reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomEvent {
    Invited {
        room_id: String,
    },
    /// The bot's own membership became `join`.
    Joined {
        room_id: String,
    },
    /// The bot left, or was kicked or banned.
    Left {
        room_id: String,
    },
    Message {
        room_id: String,
        event_id: String,
        sender: String,
        msgtype: Option<String>,
        body: String,
    },
    Sticker {
        room_id: String,
        event_id: String,
        sender: String,
    },
}

impl RoomEvent {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Invited { room_id }
            | Self::Joined { room_id }
            | Self::Left { room_id }
            | Self::Message { room_id, .. }
            | Self::Sticker { room_id, .. } => room_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<RoomEvent>,
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(|v| v.as_str())
}

fn events_at<'a>(room: &'a Value, pointer: &str) -> impl Iterator<Item = &'a Value> {
    room.pointer(pointer)
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
}

fn is_own_join(event: &Value, bot_user_id: &str) -> bool {
    if str_at(event, "/type") != Some(MEMBER_EVENT_TYPE)
        || str_at(event, "/state_key") != Some(bot_user_id)
        || str_at(event, "/content/membership") != Some("join")
    {
        return false;
    }
    // Profile changes re-send a join; only a change from another membership counts.
    let previous = str_at(event, "/unsigned/prev_content/membership")
        .or_else(|| str_at(event, "/prev_content/membership"));
    previous != Some("join")
}

fn timeline_event(room_id: &str, event: &Value, bot_user_id: &str) -> Option<RoomEvent> {
    let sender = str_at(event, "/sender")?;
    if sender == bot_user_id {
        return None;
    }
    let event_id = str_at(event, "/event_id")?;

    match str_at(event, "/type")? {
        MESSAGE_EVENT_TYPE => Some(RoomEvent::Message {
            room_id: room_id.to_owned(),
            event_id: event_id.to_owned(),
            sender: sender.to_owned(),
            msgtype: str_at(event, "/content/msgtype").map(ToOwned::to_owned),
            body: str_at(event, "/content/body").unwrap_or("").to_owned(),
        }),
        STICKER_EVENT_TYPE => Some(RoomEvent::Sticker {
            room_id: room_id.to_owned(),
            event_id: event_id.to_owned(),
            sender: sender.to_owned(),
        }),
        _ => None,
    }
}

impl SyncBatch {
    /// Extracts the events the bot cares about from a `/sync` response body.
    pub fn parse(payload: &Value, bot_user_id: &str) -> Result<Self> {
        let next_batch = str_at(payload, "/next_batch")
            .ok_or_else(|| ExpirebotError::Remote("sync response missing next_batch".to_owned()))?
            .to_owned();

        let mut events = vec![];

        if let Some(invited) = payload.pointer("/rooms/invite").and_then(|v| v.as_object()) {
            for room_id in invited.keys() {
                events.push(RoomEvent::Invited {
                    room_id: room_id.to_owned(),
                });
            }
        }

        if let Some(joined) = payload.pointer("/rooms/join").and_then(|v| v.as_object()) {
            for (room_id, room) in joined {
                let mut announced = false;
                for event in events_at(room, "/state/events") {
                    if !announced && is_own_join(event, bot_user_id) {
                        announced = true;
                        events.push(RoomEvent::Joined {
                            room_id: room_id.to_owned(),
                        });
                    }
                }
                for event in events_at(room, "/timeline/events") {
                    if is_own_join(event, bot_user_id) {
                        if !announced {
                            announced = true;
                            events.push(RoomEvent::Joined {
                                room_id: room_id.to_owned(),
                            });
                        }
                        continue;
                    }
                    if let Some(event) = timeline_event(room_id, event, bot_user_id) {
                        events.push(event);
                    }
                }
            }
        }

        if let Some(left) = payload.pointer("/rooms/leave").and_then(|v| v.as_object()) {
            for room_id in left.keys() {
                events.push(RoomEvent::Left {
                    room_id: room_id.to_owned(),
                });
            }
        }

        Ok(Self { next_batch, events })
    }
}
