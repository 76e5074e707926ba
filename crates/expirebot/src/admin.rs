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

use clap::Args;
use expirebot_common::{duration::format_duration, error::Result};
use sea_orm::DatabaseConnection;
use std::path::PathBuf;

use crate::config::{self, Settings};
use crate::db::{self, policy, tracked};

#[derive(Debug, Args)]
pub struct PoliciesArgs {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

/// One line per room: room ID, TTL and number of tracked messages.
async fn policy_lines(db: &DatabaseConnection) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in policy::list(db).await? {
        let count = tracked::count_by_room(&entry.room_id, db).await?;
        lines.push(format!(
            "{}\t{}\t{count}",
            entry.room_id,
            format_duration(entry.ttl_ms.unsigned_abs())
        ));
    }
    Ok(lines)
}

pub async fn list_policies(args: PoliciesArgs) -> Result<()> {
    let settings: Settings =
        config::figment(args.config.as_deref(), args.database.as_deref())?.extract()?;
    settings.validate_storage()?;
    let db = db::connect(&settings.database).await?;

    let lines = policy_lines(&db).await?;
    if lines.is_empty() {
        println!("No rooms have message expiration set.");
        return Ok(());
    }
    println!("ROOM\tTTL\tTRACKED");
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
