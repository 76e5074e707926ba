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

use async_trait::async_trait;
use expirebot_common::error::{ExpirebotError, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{MessagingService, PowerLevels};

const RATE_LIMITED: &str = "M_LIMIT_EXCEEDED";
const NOT_FOUND: &str = "M_NOT_FOUND";

/// Client-server API access for a single bot account.
#[derive(Clone, Debug)]
pub struct MatrixClient {
    homeserver: String,
    access_token: String,
    request_timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixErrorBody {
    errcode: Option<String>,
    error: Option<String>,
    retry_after_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EventTimestamp {
    origin_server_ts: i64,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    user_id: String,
}

/// Maps a failed response onto the error kinds callers make decisions on.
fn classify(status: StatusCode, body: &str) -> ExpirebotError {
    let body: MatrixErrorBody = serde_json::from_str(body).unwrap_or_default();
    let errcode = body.errcode.as_deref().unwrap_or("");
    let message = body.error.as_deref().unwrap_or("");

    if status == StatusCode::TOO_MANY_REQUESTS || errcode == RATE_LIMITED {
        ExpirebotError::RateLimited {
            retry_after_ms: body.retry_after_ms,
        }
    } else if errcode == NOT_FOUND {
        ExpirebotError::NotFound(format!("{errcode} {message}").trim().to_owned())
    } else {
        ExpirebotError::Remote(format!("HTTP {status} {errcode} {message}").trim().to_owned())
    }
}

fn txn_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn room_path(room_id: &str) -> String {
    format!("/rooms/{}", urlencoding::encode(room_id))
}

impl MatrixClient {
    /// `request_timeout` bounds every call except `/sync`, which gets its
    /// long-poll timeout on top.
    pub fn new(homeserver_url: &Url, access_token: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ExpirebotError::Remote(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            homeserver: homeserver_url.as_str().trim_end_matches('/').to_owned(),
            access_token: access_token.trim().to_owned(),
            request_timeout,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{path}", self.homeserver)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ExpirebotError::Remote(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ExpirebotError::Remote(format!("invalid response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body.chars().take(300).collect::<String>(), "request rejected");
        Err(classify(status, &body))
    }

    /// The account the access token belongs to.
    pub async fn whoami(&self) -> Result<String> {
        let res: WhoAmI = self
            .execute(self.http.get(self.endpoint("/account/whoami")))
            .await?;
        Ok(res.user_id)
    }

    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/join/{}", urlencoding::encode(room_id)));
        let _: Value = self.execute(self.http.post(url).json(&json!({}))).await?;
        Ok(())
    }

    /// One long-poll round of `/sync`. The raw payload is parsed by
    /// `sync::SyncBatch`.
    pub async fn sync(&self, since: Option<&str>, timeout_ms: u64) -> Result<Value> {
        let mut request = self
            .http
            .get(self.endpoint("/sync"))
            .timeout(Duration::from_millis(timeout_ms) + self.request_timeout)
            .query(&[("timeout", timeout_ms)]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        self.execute(request).await
    }
}

#[async_trait]
impl MessagingService for MatrixClient {
    async fn get_room_power_levels(&self, room_id: &str) -> Result<PowerLevels> {
        let url = self.endpoint(&format!(
            "{}/state/m.room.power_levels/",
            room_path(room_id)
        ));
        self.execute(self.http.get(url)).await
    }

    async fn get_event_timestamp(&self, room_id: &str, event_id: &str) -> Result<i64> {
        let url = self.endpoint(&format!(
            "{}/event/{}",
            room_path(room_id),
            urlencoding::encode(event_id)
        ));
        let event: EventTimestamp = self.execute(self.http.get(url)).await?;
        Ok(event.origin_server_ts)
    }

    async fn delete_message(&self, room_id: &str, event_id: &str, reason: &str) -> Result<()> {
        let url = self.endpoint(&format!(
            "{}/redact/{}/{}",
            room_path(room_id),
            urlencoding::encode(event_id),
            txn_id()
        ));
        let _: Value = self
            .execute(self.http.put(url).json(&json!({ "reason": reason })))
            .await?;
        Ok(())
    }

    async fn send_notice(&self, room_id: &str, text: &str) -> Result<()> {
        let url = self.endpoint(&format!(
            "{}/send/m.room.message/{}",
            room_path(room_id),
            txn_id()
        ));
        let body = json!({
            "msgtype": "m.notice",
            "body": text,
        });
        let _: Value = self.execute(self.http.put(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test_client {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, path_regex, query_param},
    };

    async fn client_for(server: &MockServer) -> MatrixClient {
        MatrixClient::new(
            &Url::parse(&server.uri()).unwrap(),
            "secret",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn it_should_classify_rate_limits() {
        let err = classify(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"errcode":"M_LIMIT_EXCEEDED","error":"Too many requests","retry_after_ms":2000}"#,
        );
        assert!(matches!(
            err,
            ExpirebotError::RateLimited {
                retry_after_ms: Some(2000)
            }
        ));

        let err = classify(StatusCode::BAD_REQUEST, r#"{"errcode":"M_LIMIT_EXCEEDED"}"#);
        assert!(err.is_transient());
    }

    #[test]
    fn it_should_classify_other_failures() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "<html>nginx 404</html>"),
            ExpirebotError::Remote(_)
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, r#"{"errcode":"M_UNRECOGNIZED"}"#),
            ExpirebotError::Remote(_)
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, r#"{"errcode":"M_NOT_FOUND"}"#),
            ExpirebotError::NotFound(_)
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, r#"{"errcode":"M_FORBIDDEN"}"#),
            ExpirebotError::Remote(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, ""),
            ExpirebotError::Remote(_)
        ));
    }

    #[tokio::test]
    async fn it_should_fetch_an_event_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/_matrix/client/v3/rooms/%21room%3Aexample.org/event/%24event",
            ))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "event_id": "$event",
                "type": "m.room.message",
                "origin_server_ts": 1_700_000_000_000i64,
                "content": { "msgtype": "m.text", "body": "hello" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ts = client
            .get_event_timestamp("!room:example.org", "$event")
            .await
            .unwrap();

        assert_eq!(ts, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn it_should_report_missing_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/_matrix/client/v3/rooms/[^/]+/event/[^/]+$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errcode": "M_NOT_FOUND",
                "error": "Event not found."
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_event_timestamp("!room:example.org", "$gone")
            .await
            .unwrap_err();

        assert!(matches!(err, ExpirebotError::NotFound(_)));
    }

    #[tokio::test]
    async fn it_should_redact_with_a_reason() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(
                r"^/_matrix/client/v3/rooms/%21room%3Aexample\.org/redact/%24event/[^/]+$",
            ))
            .and(body_json(json!({ "reason": "Message expired" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "event_id": "$redaction"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .delete_message("!room:example.org", "$event", "Message expired")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn it_should_surface_rate_limited_redactions() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/_matrix/client/v3/rooms/[^/]+/redact/"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "errcode": "M_LIMIT_EXCEEDED",
                "error": "Too Many Requests",
                "retry_after_ms": 1500
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .delete_message("!room:example.org", "$event", "Message expired")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExpirebotError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
    }

    #[tokio::test]
    async fn it_should_fetch_power_levels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/_matrix/client/v3/rooms/%21room%3Aexample.org/state/m.room.power_levels/",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": { "@admin:example.org": 100 },
                "events": { "m.room.redaction": 60 }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let levels = client
            .get_room_power_levels("!room:example.org")
            .await
            .unwrap();

        assert_eq!(levels.redaction_level(), 60);
        assert_eq!(levels.user_level("@admin:example.org"), 100);
    }

    #[tokio::test]
    async fn it_should_send_notices() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(
                r"^/_matrix/client/v3/rooms/%21room%3Aexample\.org/send/m\.room\.message/[^/]+$",
            ))
            .and(body_json(json!({ "msgtype": "m.notice", "body": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "event_id": "$notice"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .send_notice("!room:example.org", "hello")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn it_should_resolve_the_bot_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "@expirebot:example.org"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.whoami().await.unwrap(), "@expirebot:example.org");
    }

    #[tokio::test]
    async fn it_should_pass_the_sync_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .and(query_param("since", "s72594_4483_1934"))
            .and(query_param("timeout", "30000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next_batch": "s72595_4483_1934"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let payload = client
            .sync(Some("s72594_4483_1934"), 30_000)
            .await
            .unwrap();

        assert_eq!(payload["next_batch"], "s72595_4483_1934");
    }

    #[tokio::test]
    async fn it_should_give_up_on_a_hung_redaction() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/_matrix/client/v3/rooms/[^/]+/redact/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "event_id": "$redaction" }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = MatrixClient::new(
            &Url::parse(&server.uri()).unwrap(),
            "secret",
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client
            .delete_message("!room:example.org", "$event", "Message expired")
            .await
            .unwrap_err();

        assert!(matches!(err, ExpirebotError::Remote(_)));
    }

    #[tokio::test]
    async fn it_should_let_a_long_poll_outlast_the_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "next_batch": "s2" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = MatrixClient::new(
            &Url::parse(&server.uri()).unwrap(),
            "secret",
            Duration::from_millis(200),
        )
        .unwrap();
        let payload = client.sync(None, 1_000).await.unwrap();

        assert_eq!(payload["next_batch"], "s2");
    }
}
