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

pub mod entities;
pub mod migration;
pub mod policy;
pub mod tracked;

use expirebot_common::error::Result;
use sea_orm::{Database, DatabaseConnection};
use std::path::Path;
use tracing::info;

/// Opens (creating if needed) the SQLite database at `path` and brings its
/// schema up to date.
pub async fn connect(path: &Path) -> Result<DatabaseConnection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let uri = format!("sqlite://{}?mode=rwc", path.display());
    let db = Database::connect(&uri).await?;
    migration::migrate(&db).await?;
    info!(path = %path.display(), "database ready");
    Ok(db)
}
