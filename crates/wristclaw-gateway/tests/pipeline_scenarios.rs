// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios run against the public pipeline
//! API with a recording `HostRuntime` fake — distinct from `pipeline.rs`'s
//! own unit tests in that these wire multiple subsystems together (the
//! media-group buffer feeding the pipeline, the REST catch-up client
//! feeding cross-account dedup) rather than exercising one in isolation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wristclaw_config::{Account, DmPolicy, GroupPolicy};
use wristclaw_gateway::dedup::{CrossAccountDedup, PerAccountDedup};
use wristclaw_gateway::events::{MessageContent, MessageNewPayload, TypingStatus};
use wristclaw_gateway::fetch::FetchOptions;
use wristclaw_gateway::error::GatewayError;
use wristclaw_gateway::group_history::GroupHistoryStore;
use wristclaw_gateway::host::{
    ChunkMode, EnvelopeFormatOptions, InboundContext, InboundHistoryEntry, MediaApi, OutboundApi,
    ReplyApi, ReplyChunkStream, RouteRequest, RoutingApi, SavedMedia, SessionApi, TextApi,
};
use wristclaw_gateway::media_group::MediaGroupBuffer;
use wristclaw_gateway::pipeline::{InboundMessage, PipelineContext, TypingSink, process_message};
use wristclaw_gateway::rate_limit::RateLimiter;
use wristclaw_gateway::server::ServerClient;
use wristclaw_gateway::status::StatusSink;
use wristclaw_gateway::voice_waiter::VoiceWaiter;

struct RecordingHost {
    sent: StdMutex<Vec<(String, String)>>,
    reply_chunks: Vec<String>,
}

impl RecordingHost {
    fn new(reply_chunks: Vec<&str>) -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            reply_chunks: reply_chunks.into_iter().map(String::from).collect(),
        }
    }
}

#[async_trait]
impl RoutingApi for RecordingHost {
    async fn resolve_agent_route(&self, _req: RouteRequest<'_>) -> Result<String, GatewayError> {
        Ok("default-agent".to_string())
    }
}

#[async_trait]
impl SessionApi for RecordingHost {
    async fn resolve_store_path(&self, _session_key: &str) -> Result<String, GatewayError> {
        Ok("/tmp/session".to_string())
    }
    async fn read_session_updated_at(
        &self,
        _session_key: &str,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        Ok(None)
    }
    async fn record_inbound_session(
        &self,
        _session_key: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[async_trait]
impl ReplyApi for RecordingHost {
    async fn resolve_envelope_format_options(
        &self,
        channel_id: &str,
        sender_id: &str,
        _sender_name: Option<&str>,
    ) -> Result<EnvelopeFormatOptions, GatewayError> {
        Ok(EnvelopeFormatOptions {
            channel_label: channel_id.to_string(),
            sender_label: sender_id.to_string(),
        })
    }
    async fn format_agent_envelope(
        &self,
        _opts: &EnvelopeFormatOptions,
        body: &str,
        _now: DateTime<Utc>,
        _prior: Option<DateTime<Utc>>,
    ) -> Result<String, GatewayError> {
        Ok(body.to_string())
    }
    async fn finalize_inbound_context(
        &self,
        envelope: String,
        history: Vec<InboundHistoryEntry>,
        media_paths: Vec<String>,
    ) -> Result<InboundContext, GatewayError> {
        Ok(InboundContext { envelope, history, media_paths })
    }
    async fn dispatch_reply_with_buffered_block_dispatcher(
        &self,
        _agent_id: &str,
        _session_key: &str,
        _ctx: InboundContext,
    ) -> Result<ReplyChunkStream, GatewayError> {
        let chunks = self.reply_chunks.clone();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
    fn create_reply_prefix_options(&self, text_preview: &str) -> String {
        format!("> {text_preview}")
    }
}

#[async_trait]
impl TextApi for RecordingHost {
    fn convert_markdown_tables(&self, text: &str) -> String {
        text.to_string()
    }
    fn resolve_chunk_mode(&self, _channel_id: &str) -> ChunkMode {
        ChunkMode::Plain
    }
    fn chunk_markdown_text_with_mode(&self, text: &str, _mode: ChunkMode, _max_len: usize) -> Vec<String> {
        vec![text.to_string()]
    }
}

#[async_trait]
impl MediaApi for RecordingHost {
    async fn fetch_remote_media(&self, _url: &str, _max_bytes: u64) -> Result<Vec<u8>, GatewayError> {
        Ok(vec![1, 2, 3])
    }
    async fn save_media_buffer(&self, _buf: Vec<u8>, _content_type: &str) -> Result<SavedMedia, GatewayError> {
        Ok(SavedMedia { local_path: "/media/x.png".to_string() })
    }
}

#[async_trait]
impl OutboundApi for RecordingHost {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct NoopTyping;
#[async_trait]
impl TypingSink for NoopTyping {
    async fn send_typing(&self, _channel_id: &str, _status: TypingStatus) {}
}

fn account() -> Account {
    Account {
        account_id: "acc-1".into(),
        server_base_url: "https://chat.example.com".into(),
        api_key: "k".into(),
        owner_user_id: Some("owner-1".into()),
        dm_policy: DmPolicy::Open,
        dm_allowlist: Vec::new(),
        group_policy: GroupPolicy::Mention,
        group_allowlist: Vec::new(),
        mention_names: HashSet::new(),
        group_history_limit: 20,
        secretary_agent_id: None,
    }
}

fn image_event(message_id: &str, author_id: &str, media_url: &str) -> MessageNewPayload {
    MessageNewPayload {
        message_id: message_id.to_string(),
        channel_id: None,
        author_id: author_id.to_string(),
        sender_name: None,
        created_at: None,
        pair_id: None,
        media_url: Some(media_url.to_string()),
        reply_to: None,
        content: MessageContent {
            content_type: "image".to_string(),
            text: None,
            media_url: Some(media_url.to_string()),
            duration_sec: None,
            via: None,
        },
        channel: None,
    }
}

struct Harness {
    host: RecordingHost,
    cross_dedup: CrossAccountDedup,
    per_account_dedup: StdMutex<PerAccountDedup>,
    rate_limiter: StdMutex<RateLimiter>,
    voice_waiter: VoiceWaiter,
    history: GroupHistoryStore,
    account: Account,
    status: StatusSink,
}

impl Harness {
    fn new(reply_chunks: Vec<&str>) -> Self {
        Self {
            host: RecordingHost::new(reply_chunks),
            cross_dedup: CrossAccountDedup::new(2000, Duration::from_secs(300)),
            per_account_dedup: StdMutex::new(PerAccountDedup::new(1000)),
            rate_limiter: StdMutex::new(RateLimiter::new(Duration::from_secs(60), 10)),
            voice_waiter: VoiceWaiter::new(Duration::from_millis(1000)),
            history: GroupHistoryStore::new(),
            account: account(),
            status: StatusSink::new(),
        }
    }

    fn ctx(&self) -> PipelineContext<'_, RecordingHost> {
        PipelineContext {
            account: &self.account,
            bot_user_id: Some("bot-1"),
            bot_display_name: Some("bot"),
            host: &self.host,
            history: &self.history,
            cross_dedup: &self.cross_dedup,
            per_account_dedup: &self.per_account_dedup,
            rate_limiter: &self.rate_limiter,
            voice_waiter: &self.voice_waiter,
            typing: &NoopTyping,
            status: &self.status,
            voice_empty_fallback: false,
            typing_heartbeat: Duration::from_millis(3500),
        }
    }
}

/// A burst of three images from the same sender in
/// the same channel, arriving within the 800ms debounce window, collapses
/// into exactly one dispatch carrying the "📷 N 張圖片" placeholder body.
#[tokio::test(start_paused = true)]
async fn media_burst_collapses_into_single_dispatch() {
    let harness = Arc::new(Harness::new(vec!["noted"]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let buffer = MediaGroupBuffer::new(Duration::from_millis(800), move |flushed| {
        tx.send(flushed).expect("receiver dropped");
    });

    let key = "ch-1:u1".to_string();
    buffer.try_buffer(
        key.clone(),
        image_event("m1", "u1", "/files/a.png"),
        "ch-1".into(),
        "channel:ch-1".into(),
        Some("/files/a.png".into()),
        true,
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    buffer.try_buffer(
        key.clone(),
        image_event("m2", "u1", "/files/b.png"),
        "ch-1".into(),
        "channel:ch-1".into(),
        Some("/files/b.png".into()),
        true,
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    buffer.try_buffer(
        key,
        image_event("m3", "u1", "/files/c.png"),
        "ch-1".into(),
        "channel:ch-1".into(),
        Some("/files/c.png".into()),
        true,
    );

    tokio::time::sleep(Duration::from_millis(900)).await;
    let flushed = rx.try_recv().expect("buffer should have flushed by now");
    assert!(rx.try_recv().is_err(), "only one flush expected");

    let msg = InboundMessage {
        event: flushed.primary,
        channel_id: flushed.channel_id,
        ws_channel: flushed.ws_channel,
        is_group: false,
        extra_media_urls: flushed.extra_media_urls,
    };
    process_message(&harness.ctx(), msg).await.unwrap();

    let sent = harness.host.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "noted");
    // Body building ran against the un-dispatched placeholder text; the
    // reply itself comes from the fake dispatcher, so what we actually
    // assert here is that the whole burst produced exactly one send.
}

/// Reconnect catch-up fetches a message over REST
/// that the live WebSocket connection also redelivers once the socket
/// comes back up. Cross-account dedup — shared by both paths — ensures
/// only the catch-up delivery (whichever wins the race) is dispatched.
#[tokio::test]
async fn catch_up_and_live_redelivery_dedup_to_one_dispatch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/channels/ch-1/messages"))
        .and(header("Authorization", "Bearer k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [{
                "message_id": "m-catchup-1",
                "author_id": "owner-1",
                "channel_id": "ch-1",
                "created_at": "2026-01-01T00:00:00Z",
                "payload": {"content_type": "text", "text": "missed while offline"},
            }]
        })))
        .mount(&mock_server)
        .await;

    let server = ServerClient::new(mock_server.uri(), "k", FetchOptions::default());
    let page = server
        .channel_messages_after("ch-1", "m-before", 50)
        .await
        .unwrap()
        .expect("well-formed ids should not be skipped");
    assert_eq!(page.messages.len(), 1);
    let caught_up = &page.messages[0];

    let harness = Harness::new(vec!["ack"]);

    let from_catchup = InboundMessage {
        event: MessageNewPayload {
            message_id: caught_up.message_id.clone(),
            channel_id: Some(caught_up.channel_id.clone()),
            author_id: caught_up.author_id.clone(),
            sender_name: None,
            created_at: Some(caught_up.created_at.clone()),
            pair_id: None,
            media_url: None,
            reply_to: None,
            content: MessageContent {
                content_type: caught_up.payload.content_type.clone(),
                text: caught_up.payload.text.clone(),
                media_url: None,
                duration_sec: None,
                via: None,
            },
            channel: None,
        },
        channel_id: caught_up.channel_id.clone(),
        ws_channel: format!("channel:{}", caught_up.channel_id),
        is_group: false,
        extra_media_urls: Vec::new(),
    };

    // The live socket redelivers the same messageId once it reconnects.
    let from_live = InboundMessage {
        event: MessageNewPayload {
            message_id: caught_up.message_id.clone(),
            channel_id: Some(caught_up.channel_id.clone()),
            author_id: caught_up.author_id.clone(),
            sender_name: None,
            created_at: None,
            pair_id: None,
            media_url: None,
            reply_to: None,
            content: MessageContent {
                content_type: "text".to_string(),
                text: Some("missed while offline".to_string()),
                media_url: None,
                duration_sec: None,
                via: None,
            },
            channel: None,
        },
        channel_id: "ch-1".to_string(),
        ws_channel: "channel:ch-1".to_string(),
        is_group: false,
        extra_media_urls: Vec::new(),
    };

    process_message(&harness.ctx(), from_catchup).await.unwrap();
    process_message(&harness.ctx(), from_live).await.unwrap();

    assert_eq!(
        harness.host.sent.lock().unwrap().len(),
        1,
        "cross-account dedup must collapse the catch-up and live copies to one dispatch"
    );
}
