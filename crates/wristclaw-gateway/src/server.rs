// SPDX-License-Identifier: Apache-2.0
//! `ServerClient`: the REST surface, built on the fetch utility so every
//! call gets the same timeout/retry/backoff behavior for free.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::error::FetchError;
use crate::events::{
    BotIdentity, ChannelMessagesResponse, ConversationsResponse, PairListResponse,
};
use crate::fetch::{fetch, FetchOptions, FetchRequest, HttpClient, ReqwestHttpClient};

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

/// True iff `id` matches the wire format's `[A-Za-z0-9_-]+` requirement for
/// channel/message ids.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id_pattern().is_match(id)
}

pub struct ServerClient<C: HttpClient = ReqwestHttpClient> {
    client: C,
    base_url: String,
    api_key: String,
    options: FetchOptions,
}

impl ServerClient<ReqwestHttpClient> {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, options: FetchOptions) -> Self {
        Self {
            client: ReqwestHttpClient::new(reqwest::Client::new()),
            base_url: base_url.into(),
            api_key: api_key.into(),
            options,
        }
    }
}

impl<C: HttpClient> ServerClient<C> {
    pub fn with_client(client: C, base_url: impl Into<String>, api_key: impl Into<String>, options: FetchOptions) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            options,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let req = FetchRequest::get(self.url(path)).header("Authorization", format!("Bearer {}", self.api_key));
        let resp = fetch(&self.client, req, &self.options).await?;
        if resp.status >= 400 {
            return Err(FetchError::Status(resp.status));
        }
        serde_json::from_slice(&resp.body).map_err(|e| FetchError::Transport(e.to_string()))
    }

    pub async fn me(&self) -> Result<BotIdentity, FetchError> {
        self.get_json("/v1/me").await
    }

    pub async fn conversations(&self) -> Result<ConversationsResponse, FetchError> {
        self.get_json("/v1/conversations").await
    }

    pub async fn pair_list(&self) -> Result<PairListResponse, FetchError> {
        self.get_json("/v1/pair/list").await
    }

    /// `GET /v1/channels/{channelId}/messages?after={messageId}&limit=50`.
    /// Both ids must match `[A-Za-z0-9_-]+`; returns `Ok(None)` (not an
    /// error) when either is malformed, matching the catch-up skip path.
    pub async fn channel_messages_after(
        &self,
        channel_id: &str,
        after_message_id: &str,
        limit: u32,
    ) -> Result<Option<ChannelMessagesResponse>, FetchError> {
        if !is_valid_id(channel_id) || !is_valid_id(after_message_id) {
            warn!(channel_id, after_message_id, "skipping catch-up: malformed id");
            return Ok(None);
        }
        let path = format!(
            "/v1/channels/{channel_id}/messages?after={after_message_id}&limit={limit}"
        );
        self.get_json(&path).await.map(Some)
    }

    pub async fn health(&self) -> Result<serde_json::Value, FetchError> {
        self.get_json("/health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::fetch::FetchResponse;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<FetchResponse, FetchError>>>,
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, _req: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn json_response(body: serde_json::Value) -> Result<FetchResponse, FetchError> {
        Ok(FetchResponse {
            status: 200,
            headers: Vec::new(),
            body: serde_json::to_vec(&body).unwrap(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn me_deserializes_bot_identity() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![json_response(serde_json::json!({
                "user_id": "bot-1",
                "display_name": "bot"
            }))]),
        };
        let server = ServerClient::with_client(client, "https://chat.example.com", "k", FetchOptions::default());
        let identity = server.me().await.unwrap();
        assert_eq!(identity.user_id, "bot-1");
    }

    #[tokio::test(start_paused = true)]
    async fn channel_messages_after_rejects_malformed_ids() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![]),
        };
        let server = ServerClient::with_client(client, "https://chat.example.com", "k", FetchOptions::default());
        let result = server.channel_messages_after("bad id!", "m1", 50).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("abc-123_XYZ"));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("semi;colon"));
    }
}
