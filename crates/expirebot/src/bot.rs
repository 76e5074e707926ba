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
use clap_verbosity_flag::Verbosity;
use expirebot_common::error::{ExpirebotError, Result};
use sea_orm::DatabaseConnection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_log::AsTrace;

use crate::commands::{self, Command};
use crate::config::{self, Settings};
use crate::db;
use crate::expire::{EvictionActuator, Sweeper};
use crate::hooks;
use crate::matrix::sync::{RoomEvent, SyncBatch};
use crate::matrix::{MatrixClient, MessagingService};

const SYNC_RETRY: Duration = Duration::from_secs(5);
const COMMAND_MSGTYPE: &str = "m.text";

#[derive(Debug, Args)]
pub struct BotArgs {
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

/// Everything event and command handlers need.
#[derive(Clone)]
pub struct BotState {
    pub db: DatabaseConnection,
    pub messaging: Arc<dyn MessagingService>,
    /// The bot's own Matrix ID.
    pub user_id: String,
    pub default_ttl_ms: i64,
    pub command_prefix: String,
}

async fn handle_message(
    state: &BotState,
    room_id: &str,
    event_id: &str,
    sender: &str,
    msgtype: Option<&str>,
    body: &str,
) -> Result<()> {
    if hooks::is_trackable_msgtype(msgtype) {
        if let Err(e) = hooks::track_message(state, room_id, event_id).await {
            warn!(room_id, event_id, error = %e, "failed to track message");
        }
    }

    if msgtype != Some(COMMAND_MSGTYPE) {
        return Ok(());
    }
    let Some(command) = Command::parse(&state.command_prefix, body) else {
        return Ok(());
    };
    debug!(room_id, sender, ?command, "running command");
    let reply = commands::handle(state, room_id, sender, command).await;
    state.messaging.send_notice(room_id, &reply).await
}

/// Handles one room event. Invites are answered by the sync loop, which owns
/// the client that can join rooms.
pub async fn dispatch(state: &BotState, event: &RoomEvent) -> Result<()> {
    match event {
        RoomEvent::Invited { .. } => Ok(()),
        RoomEvent::Joined { room_id } => hooks::on_bot_joined(state, room_id).await,
        RoomEvent::Left { room_id } => hooks::on_bot_left(state, room_id).await.map(|_| ()),
        RoomEvent::Message {
            room_id,
            event_id,
            sender,
            msgtype,
            body,
        } => handle_message(state, room_id, event_id, sender, msgtype.as_deref(), body).await,
        RoomEvent::Sticker {
            room_id, event_id, ..
        } => hooks::track_message(state, room_id, event_id)
            .await
            .map(|_| ()),
    }
}

fn retry_delay(error: &ExpirebotError) -> Duration {
    error.retry_after().unwrap_or(SYNC_RETRY)
}

async fn accept_invite(client: &MatrixClient, room_id: &str) {
    info!(room_id, "accepting invite");
    if let Err(e) = client.join_room(room_id).await {
        warn!(room_id, error = %e, "failed to join room");
    }
}

async fn sync_loop(
    state: &BotState,
    client: &MatrixClient,
    settings: &Settings,
    token: &CancellationToken,
) {
    let mut since: Option<String> = None;

    while !token.is_cancelled() {
        let batch = client
            .sync(since.as_deref(), settings.sync_timeout_ms)
            .await
            .and_then(|payload| SyncBatch::parse(&payload, &state.user_id));
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                let delay = retry_delay(&e);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "sync failed");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        // Messages from before start-up are history, but pending invites are
        // only ever reported here.
        let initial = since.is_none();
        if initial {
            info!("initial sync complete");
        }

        for event in &batch.events {
            if let RoomEvent::Invited { room_id } = event {
                if settings.autojoin {
                    accept_invite(client, room_id).await;
                }
                continue;
            }
            if initial {
                continue;
            }
            if let Err(e) = dispatch(state, event).await {
                warn!(room_id = event.room_id(), error = %e, "failed to handle event");
            }
        }
        since = Some(batch.next_batch);
    }
}

pub async fn init_bot(args: BotArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(args.verbose.log_level_filter().as_trace())
        .init();

    let settings = config::load(args.config.as_deref(), args.database.as_deref())?;
    let homeserver = settings.homeserver()?;
    let db = db::connect(&settings.database).await?;

    let client = Arc::new(MatrixClient::new(
        &homeserver,
        &settings.access_token,
        settings.request_timeout(),
    )?);
    let user_id = match &settings.user_id {
        Some(user_id) => user_id.clone(),
        None => client.whoami().await?,
    };
    info!(%homeserver, user_id = %user_id, "expirebot is starting");

    let messaging: Arc<dyn MessagingService> = client.clone();
    let state = BotState {
        db: db.clone(),
        messaging: messaging.clone(),
        user_id,
        default_ttl_ms: settings.default_ttl_ms()?,
        command_prefix: settings.command_prefix.clone(),
    };

    let actuator = Arc::new(EvictionActuator::new(
        messaging.clone(),
        settings.eviction.clone(),
    ));
    let sweeper = Sweeper::new(db, messaging, actuator, settings.sweep.clone());
    let token = CancellationToken::new();
    let sweep_task = tokio::spawn(sweeper.run(token.clone()));

    tokio::select! {
        _ = sync_loop(&state, &client, &settings, &token) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutting down");
        }
    }

    token.cancel();
    if let Err(e) = sweep_task.await {
        error!(error = %e, "sweep task ended abnormally");
    }
    Ok(())
}

#[cfg(test)]
mod test_bot {
    use super::*;
    use crate::db::{policy, tracked};
    use crate::matrix::PowerLevels;
    use crate::utils::{MockMessaging, get_test_db};
    use serde_json::json;
    use std::collections::HashMap;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param, query_param_is_missing},
    };

    const ROOM: &str = "!room:example.org";
    const BOT: &str = "@expirebot:example.org";

    async fn state(messaging: &Arc<MockMessaging>) -> BotState {
        messaging.set_power_levels(
            ROOM,
            PowerLevels {
                users: HashMap::from([(BOT.to_owned(), 100), ("@mod:example.org".to_owned(), 50)]),
                ..Default::default()
            },
        );
        BotState {
            db: get_test_db().await,
            messaging: messaging.clone(),
            user_id: BOT.to_owned(),
            default_ttl_ms: 604_800_000,
            command_prefix: "!expire".to_owned(),
        }
    }

    fn message(event_id: &str, msgtype: &str, body: &str) -> RoomEvent {
        RoomEvent::Message {
            room_id: ROOM.to_owned(),
            event_id: event_id.to_owned(),
            sender: "@mod:example.org".to_owned(),
            msgtype: Some(msgtype.to_owned()),
            body: body.to_owned(),
        }
    }

    #[tokio::test]
    async fn it_should_follow_the_room_lifecycle() {
        let messaging = Arc::new(MockMessaging::default());
        let state = state(&messaging).await;

        dispatch(&state, &RoomEvent::Joined { room_id: ROOM.to_owned() })
            .await
            .unwrap();
        assert_eq!(policy::get(ROOM, &state.db).await.unwrap(), Some(604_800_000));

        dispatch(&state, &message("$text", "m.text", "hello")).await.unwrap();
        dispatch(&state, &message("$audio", "m.audio", "voice note")).await.unwrap();
        dispatch(
            &state,
            &RoomEvent::Sticker {
                room_id: ROOM.to_owned(),
                event_id: "$sticker".to_owned(),
                sender: "@mod:example.org".to_owned(),
            },
        )
        .await
        .unwrap();
        assert_eq!(tracked::count_by_room(ROOM, &state.db).await.unwrap(), 2);

        dispatch(&state, &RoomEvent::Left { room_id: ROOM.to_owned() })
            .await
            .unwrap();
        assert_eq!(policy::get(ROOM, &state.db).await.unwrap(), None);
        assert_eq!(tracked::count_by_room(ROOM, &state.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn it_should_reply_to_commands_with_notices() {
        let messaging = Arc::new(MockMessaging::default());
        let state = state(&messaging).await;

        dispatch(&state, &message("$cmd", "m.text", "!expire set 24h"))
            .await
            .unwrap();

        assert_eq!(policy::get(ROOM, &state.db).await.unwrap(), Some(86_400_000));
        assert_eq!(
            messaging.notices(),
            vec![(
                ROOM.to_owned(),
                "Message expiration for this room set to 1d".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn it_should_not_treat_notices_as_commands() {
        let messaging = Arc::new(MockMessaging::default());
        let state = state(&messaging).await;

        dispatch(&state, &message("$notice", "m.notice", "!expire show"))
            .await
            .unwrap();

        assert!(messaging.notices().is_empty());
    }

    #[test]
    fn it_should_honour_the_server_retry_hint() {
        assert_eq!(
            retry_delay(&ExpirebotError::RateLimited {
                retry_after_ms: Some(1_500)
            }),
            Duration::from_millis(1_500)
        );
        assert_eq!(
            retry_delay(&ExpirebotError::Remote("M_UNKNOWN".to_owned())),
            SYNC_RETRY
        );
    }

    #[tokio::test]
    async fn it_should_accept_invites_pending_at_start_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .and(query_param_is_missing("since"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next_batch": "s1",
                "rooms": {
                    "invite": { "!invited:example.org": { "invite_state": { "events": [] } } },
                    "join": { "!room:example.org": { "timeline": { "events": [{
                        "type": "m.room.message",
                        "event_id": "$old",
                        "sender": "@mod:example.org",
                        "content": { "msgtype": "m.text", "body": "!expire set 1h" }
                    }] } } }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .and(query_param("since", "s1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "next_batch": "s1" }))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/join/%21invited%3Aexample.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "room_id": "!invited:example.org"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MatrixClient::new(
            &Url::parse(&server.uri()).unwrap(),
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        let messaging = Arc::new(MockMessaging::default());
        let state = state(&messaging).await;
        let settings = Settings::default();
        let token = CancellationToken::new();

        let stop = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        };
        tokio::join!(sync_loop(&state, &client, &settings, &token), stop);

        assert!(messaging.notices().is_empty());
        assert_eq!(policy::get(ROOM, &state.db).await.unwrap(), None);
    }
}
