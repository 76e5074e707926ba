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

pub mod admin;
pub mod auth;
pub mod bot;
pub mod commands;
pub mod config;
pub mod db;
pub mod expire;
pub mod hooks;
pub mod matrix;
pub mod utils;

use clap::{Parser, Subcommand};
use expirebot_common::error::ExpirebotError;

/// Expirebot redacts Matrix messages once they outlive their room's TTL
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect to the homeserver and start expiring messages
    Run(bot::BotArgs),
    /// Print every room's expiration policy
    Policies(admin::PoliciesArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ExpirebotError> {
    let args = Cli::parse();
    match args.command {
        Commands::Run(args) => bot::init_bot(args).await,
        Commands::Policies(args) => admin::list_policies(args).await,
    }
}
