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

use figment;
use sea_orm::DbErr;
use serde_json::Error as SerdeError;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpirebotError {
    #[error("Invalid duration format: `{0}`")]
    InvalidFormat(String),
    #[error("Database error: `{0}`")]
    Db(#[from] DbErr),
    #[error("Rate limited by homeserver")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Still rate limited after {0} attempts")]
    RetriesExhausted(u32),
    #[error("Not found: `{0}`")]
    NotFound(String),
    #[error("Homeserver error: `{0}`")]
    Remote(String),
    #[error("Permission denied: power level {required} required, have {actual}")]
    PermissionDenied { required: i64, actual: i64 },
    #[error("Configuration error: `{0}`")]
    Config(String),
    #[error("Figment error: `{0}`")]
    Figment(#[from] figment::Error),
    #[error("I/O error: `{0}`")]
    Io(#[from] io::Error),
    #[error("Serialization/deserialization error")]
    Serde(#[from] SerdeError),
}

impl ExpirebotError {
    /// Whether the homeserver asked us to slow down. Only these are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// How long the homeserver asked us to wait, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExpirebotError>;
