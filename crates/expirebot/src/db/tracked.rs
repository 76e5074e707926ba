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
use sea_orm::sea_query::OnConflict;
use sea_orm::*;

use super::entities::{prelude::*, *};

/// A tracked message whose room still has a policy, along with the cutoff
/// the message's timestamp is compared against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiryCandidate {
    pub event_id: String,
    pub room_id: String,
    pub ttl_ms: i64,
    pub cutoff_ms: i64,
}

impl ExpiryCandidate {
    pub fn is_expired(&self, observed_ts: i64) -> bool {
        observed_ts < self.cutoff_ms
    }
}

#[derive(Debug, FromQueryResult)]
struct ExpiryRow {
    event_id: String,
    room_id: String,
    ttl_ms: i64,
}

/// Starts tracking a message. Tracking the same event twice is not an error.
/// Returns whether a new row was written.
pub async fn insert(event_id: &str, room_id: &str, db: &DatabaseConnection) -> Result<bool> {
    let entry = tracked_entry::ActiveModel {
        event_id: ActiveValue::Set(event_id.to_owned()),
        room_id: ActiveValue::Set(room_id.to_owned()),
    };
    let inserted = TrackedEntry::insert(entry)
        .on_conflict(
            OnConflict::column(tracked_entry::Column::EventId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(inserted > 0)
}

pub async fn delete(event_id: &str, db: &DatabaseConnection) -> Result<bool> {
    let res = TrackedEntry::delete_by_id(event_id.to_owned())
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

pub async fn count_by_room(room_id: &str, db: &DatabaseConnection) -> Result<u64> {
    let count = TrackedEntry::find()
        .filter(tracked_entry::Column::RoomId.eq(room_id))
        .count(db)
        .await?;
    Ok(count)
}

/// Joins every tracked message with its room's policy. Whether a message is
/// actually past its cutoff depends on its timestamp on the homeserver, which
/// the caller has to look up.
pub async fn list_expired(now_ms: i64, db: &DatabaseConnection) -> Result<Vec<ExpiryCandidate>> {
    let rows = TrackedEntry::find()
        .select_only()
        .column_as(tracked_entry::Column::EventId, "event_id")
        .column_as(tracked_entry::Column::RoomId, "room_id")
        .column_as(room_policy::Column::TtlMs, "ttl_ms")
        .inner_join(RoomPolicy)
        .into_model::<ExpiryRow>()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| ExpiryCandidate {
            cutoff_ms: now_ms.saturating_sub(row.ttl_ms),
            event_id: row.event_id,
            room_id: row.room_id,
            ttl_ms: row.ttl_ms,
        })
        .collect())
}
