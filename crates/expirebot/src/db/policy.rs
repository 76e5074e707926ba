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

/// Sets the TTL for a room, replacing any previous value in one statement.
pub async fn upsert(room_id: &str, ttl_ms: i64, db: &DatabaseConnection) -> Result<()> {
    let entry = room_policy::ActiveModel {
        room_id: ActiveValue::Set(room_id.to_owned()),
        ttl_ms: ActiveValue::Set(ttl_ms),
    };
    RoomPolicy::insert(entry)
        .on_conflict(
            OnConflict::column(room_policy::Column::RoomId)
                .update_column(room_policy::Column::TtlMs)
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Creates a policy only when the room has none. Returns whether one was
/// created.
pub async fn insert_default(room_id: &str, ttl_ms: i64, db: &DatabaseConnection) -> Result<bool> {
    let entry = room_policy::ActiveModel {
        room_id: ActiveValue::Set(room_id.to_owned()),
        ttl_ms: ActiveValue::Set(ttl_ms),
    };
    let inserted = RoomPolicy::insert(entry)
        .on_conflict(
            OnConflict::column(room_policy::Column::RoomId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(inserted > 0)
}

pub async fn get(room_id: &str, db: &DatabaseConnection) -> Result<Option<i64>> {
    let entry = RoomPolicy::find_by_id(room_id.to_owned()).one(db).await?;

    Ok(entry.map(|e| e.ttl_ms))
}

pub async fn list(db: &DatabaseConnection) -> Result<Vec<room_policy::Model>> {
    let entries = RoomPolicy::find()
        .order_by(room_policy::Column::RoomId, Order::Asc)
        .all(db)
        .await?;

    Ok(entries)
}

/// Removes a room's policy. The schema cascades the delete to every tracked
/// entry of the room. Returns whether a policy existed.
pub async fn delete(room_id: &str, db: &DatabaseConnection) -> Result<bool> {
    let res = RoomPolicy::delete_by_id(room_id.to_owned()).exec(db).await?;
    Ok(res.rows_affected > 0)
}
