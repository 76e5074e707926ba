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

use directories::ProjectDirs;
use expirebot_common::{
    duration::parse_duration,
    error::{ExpirebotError, Result},
};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use figment_file_provider_adapter::FileAdapter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const ENV_PREFIX: &str = "EXPIREBOT_";
const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "expirebot.db";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("tech", "throneless", "expirebot")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(DATABASE_FILE))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SweepSettings {
    /// Idle time between two passes.
    pub interval_secs: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 10,
            batch_pause_ms: 500,
        }
    }
}

impl SweepSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvictionSettings {
    /// Minimum gap between two redaction requests.
    pub min_spacing_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Redaction reason shown to room members.
    pub reason: String,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            min_spacing_ms: 100,
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            reason: "Message expired".to_owned(),
        }
    }
}

impl EvictionSettings {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub homeserver_url: String,
    pub access_token: String,
    /// Looked up with `/account/whoami` when unset.
    pub user_id: Option<String>,
    pub database: PathBuf,
    pub command_prefix: String,
    /// TTL given to rooms the bot joins, as a compact duration.
    pub default_ttl: String,
    pub autojoin: bool,
    pub sync_timeout_ms: u64,
    /// Upper bound for every homeserver request other than the sync long-poll.
    pub request_timeout_ms: u64,
    pub sweep: SweepSettings,
    pub eviction: EvictionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            homeserver_url: "http://localhost:8008".to_owned(),
            access_token: String::new(),
            user_id: None,
            database: default_database_path(),
            command_prefix: "!expire".to_owned(),
            default_ttl: "7d".to_owned(),
            autojoin: true,
            sync_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            sweep: SweepSettings::default(),
            eviction: EvictionSettings::default(),
        }
    }
}

impl Settings {
    pub fn homeserver(&self) -> Result<Url> {
        Url::parse(&self.homeserver_url)
            .map_err(|e| ExpirebotError::Config(format!("invalid homeserver_url: {e}")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_ttl_ms(&self) -> Result<i64> {
        let ms = parse_duration(&self.default_ttl)?;
        match i64::try_from(ms) {
            Ok(ms) if ms > 0 => Ok(ms),
            _ => Err(ExpirebotError::InvalidFormat(self.default_ttl.clone())),
        }
    }

    /// Checks only what is needed to talk to the database.
    pub fn validate_storage(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            return Err(ExpirebotError::Config("database path is empty".to_owned()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_storage()?;
        self.homeserver()?;
        self.default_ttl_ms()?;
        if self.access_token.trim().is_empty() {
            return Err(ExpirebotError::Config("access_token is required".to_owned()));
        }
        if self.command_prefix.trim().is_empty() {
            return Err(ExpirebotError::Config("command_prefix is empty".to_owned()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ExpirebotError::Config(
                "request_timeout_ms must be at least 1".to_owned(),
            ));
        }
        if self.sweep.batch_size == 0 {
            return Err(ExpirebotError::Config(
                "sweep.batch_size must be at least 1".to_owned(),
            ));
        }
        if self.eviction.max_attempts == 0 {
            return Err(ExpirebotError::Config(
                "eviction.max_attempts must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Builds the settings from every source without validating them.
pub fn figment(config: Option<&Path>, database: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    match config {
        Some(path) => {
            if !path.exists() {
                return Err(ExpirebotError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(path) = default_config_path() {
                figment = figment.merge(Toml::file(path));
            }
        }
    }

    figment = figment.merge(FileAdapter::wrap(Env::prefixed(ENV_PREFIX).split("__")));

    if let Some(database) = database {
        figment = figment.merge(Serialized::default("database", database));
    }

    Ok(figment)
}

pub fn load(config: Option<&Path>, database: Option<&Path>) -> Result<Settings> {
    let settings: Settings = figment(config, database)?.extract()?;
    settings.validate()?;
    Ok(settings)
}
