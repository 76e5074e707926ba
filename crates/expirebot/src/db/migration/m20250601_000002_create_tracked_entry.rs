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

use sea_orm_migration::prelude::*;

use super::m20250601_000001_create_room_policy::RoomPolicy;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TrackedEntry::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackedEntry::EventId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TrackedEntry::RoomId).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tracked_entry_room_id")
                            .from(TrackedEntry::Table, TrackedEntry::RoomId)
                            .to(RoomPolicy::Table, RoomPolicy::RoomId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tracked_entry_room_id")
                    .table(TrackedEntry::Table)
                    .col(TrackedEntry::RoomId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TrackedEntry::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TrackedEntry {
    Table,
    EventId,
    RoomId,
}
