// SPDX-License-Identifier: Apache-2.0
//! The monitor session loop: one long-lived WebSocket per
//! account, driving `connecting → authenticating → subscribing → running →
//! draining → stopped`, with reconnect backoff between exits. This is the
//! hard part the rest of the crate exists to serve — the closure-captured
//! state of a hand-rolled client becomes the fields of [`Inner`], and the
//! `Monitor` handle (cheap to clone, `Arc`-backed) is a shared handle
//! multiple tasks hold, with one event loop owning the
//! actual connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use wristclaw_config::{Account, GatewaySettings};

use crate::bounded::BoundedMap;
use crate::dedup::{CrossAccountDedup, PerAccountDedup};
use crate::error::GatewayError;
use crate::events::{
    AuthPayload, ConversationType, InboundEvent, MessageContent, MessageNewPayload, OutboundFrame,
    TypingPayload, TypingStatus,
};
use crate::fetch::FetchOptions;
use crate::group_history::GroupHistoryStore;
use crate::host::HostRuntime;
use crate::media_group::{FlushedGroup, MediaGroupBuffer};
use crate::pipeline::{process_message, InboundMessage, PipelineContext, TypingSink};
use crate::rate_limit::RateLimiter;
use crate::server::ServerClient;
use crate::status::StatusSink;
use crate::voice_waiter::VoiceWaiter;

/// Derive the WebSocket URL from the account's HTTP base URL: swap
/// `http`/`https` for `ws`/`wss` and point at `/v1/ws`.
pub fn derive_ws_url(http_base: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(http_base).map_err(|e| GatewayError::Fatal(format!("invalid server url: {e}")))?;
    let new_scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(GatewayError::Fatal(format!("unsupported server url scheme {other:?}"))),
    };
    url.set_scheme(new_scheme)
        .map_err(|_| GatewayError::Fatal("failed to rewrite url scheme".to_string()))?;
    url.set_path("/v1/ws");
    url.set_query(None);
    Ok(url)
}

/// `ws://` to anything but a loopback host would transmit the API key in
/// cleartext; the monitor refuses to connect rather than silently leaking
/// credentials.
pub fn is_cleartext_to_remote_host(url: &Url) -> bool {
    if url.scheme() != "ws" {
        return false;
    }
    !matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"))
}

/// Resolve a `message:new` event's channel id: explicit `channelId`, else
/// a `pairId` lookup, else strip the `channel:` prefix off the subscription
/// name the event arrived on, if any. `None` means genuinely unroutable.
pub fn resolve_channel_id(
    payload_channel_id: Option<&str>,
    payload_pair_id: Option<&str>,
    pair_to_channel: &HashMap<String, String>,
    ws_channel: Option<&str>,
) -> Option<String> {
    if let Some(id) = payload_channel_id {
        return Some(id.to_string());
    }
    if let Some(pid) = payload_pair_id {
        if let Some(ch) = pair_to_channel.get(pid) {
            return Some(ch.clone());
        }
    }
    ws_channel.and_then(|ws| ws.strip_prefix("channel:")).map(|s| s.to_string())
}

/// Queue of outbound WebSocket frames, decoupled from the connection's read
/// loop so pipeline dispatch tasks (typing indicators) can enqueue sends
/// without contending with the reader. A fresh queue/writer pair is
/// created per connection attempt; the old one is simply dropped on
/// reconnect and its sends silently fail closed.
struct OutboundQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
}

impl OutboundQueue {
    fn new() -> Self {
        Self { tx: Mutex::new(None) }
    }

    fn set(&self, tx: Option<mpsc::UnboundedSender<WsMessage>>) {
        *self.tx.lock().expect("outbound queue mutex poisoned") = tx;
    }

    fn send_text(&self, text: String) {
        let guard = self.tx.lock().expect("outbound queue mutex poisoned");
        if let Some(tx) = guard.as_ref() {
            if tx.send(WsMessage::Text(text)).is_err() {
                debug!("outbound send failed: writer closed");
            }
        }
    }

    fn send_frame(&self, frame: &OutboundFrame<'_>) {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(text),
            Err(e) => warn!(error = %e, "failed to serialize outbound frame"),
        }
    }
}

struct MonitorTypingSink {
    queue: Arc<OutboundQueue>,
}

#[async_trait]
impl TypingSink for MonitorTypingSink {
    async fn send_typing(&self, channel_id: &str, status: TypingStatus) {
        self.queue.send_frame(&OutboundFrame::Typing {
            channel: channel_id,
            payload: TypingPayload { status },
        });
    }
}

struct Inner<H: HostRuntime + 'static> {
    account: Account,
    settings: GatewaySettings,
    host: Arc<H>,
    server: ServerClient,
    status: Arc<StatusSink>,
    cross_dedup: Arc<CrossAccountDedup>,
    history: GroupHistoryStore,
    per_account_dedup: Mutex<PerAccountDedup>,
    rate_limiter: Mutex<RateLimiter>,
    voice_waiter: VoiceWaiter,
    message_author_cache: Mutex<BoundedMap<String, String>>,
    last_seen: Mutex<HashMap<String, String>>,
    pair_to_channel: Mutex<HashMap<String, String>>,
    group_channel_ids: Mutex<HashSet<String>>,
    bot_identity: Mutex<Option<(String, String)>>, // (user_id, display_name)
    first_connect: AtomicBool,
    reconnect_backoff_ms: AtomicU64,
    dispatch_semaphore: Arc<Semaphore>,
    outbound: Arc<OutboundQueue>,
    media_group: MediaGroupBuffer,
    cancel: CancellationToken,
}

impl<H: HostRuntime + 'static> Inner<H> {
    fn is_group_channel(&self, channel_id: &str) -> bool {
        self.group_channel_ids
            .lock()
            .expect("group channel ids mutex poisoned")
            .contains(channel_id)
    }

    fn subscribe(&self, channel: String) {
        self.outbound.send_frame(&OutboundFrame::Subscribe { channel });
    }

    fn current_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.load(Ordering::SeqCst))
    }

    fn set_backoff(&self, backoff: Duration) {
        self.reconnect_backoff_ms.store(backoff.as_millis() as u64, Ordering::SeqCst);
    }

    /// On every successful re-authentication the backoff resets, so a
    /// connection that holds up for a while doesn't inherit a stale,
    /// already-doubled wait from an earlier flaky stretch.
    fn reset_backoff(&self) {
        self.set_backoff(Duration::from_millis(self.settings.reconnect_initial_backoff_ms));
    }

    /// Acquire a dispatch permit and spawn the pipeline for one message.
    /// Drops the message silently when the concurrency cap is already hit.
    fn submit_for_dispatch(self: &Arc<Self>, msg: InboundMessage) {
        let permit = match self.dispatch_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(channel_id = %msg.channel_id, "dropping message: dispatch concurrency cap reached");
                return;
            }
        };
        let inner = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let typing = MonitorTypingSink { queue: inner.outbound.clone() };
            // Clone the identity out of the mutex before building `ctx`: a
            // `MutexGuard` is a temporary dropped at the end of this
            // statement, so borrowing `&str` from it into a field that
            // outlives the statement would dangle.
            let bot_identity = inner.bot_identity.lock().expect("bot identity mutex poisoned").clone();
            let ctx = PipelineContext {
                account: &inner.account,
                bot_user_id: bot_identity.as_ref().map(|(id, _)| id.as_str()),
                bot_display_name: bot_identity.as_ref().map(|(_, name)| name.as_str()),
                host: inner.host.as_ref(),
                history: &inner.history,
                cross_dedup: inner.cross_dedup.as_ref(),
                per_account_dedup: &inner.per_account_dedup,
                rate_limiter: &inner.rate_limiter,
                voice_waiter: &inner.voice_waiter,
                typing: &typing,
                status: &inner.status,
                voice_empty_fallback: inner.settings.voice_empty_fallback,
                typing_heartbeat: Duration::from_millis(inner.settings.typing_heartbeat_ms),
            };
            if let Err(e) = process_message(&ctx, msg).await {
                warn!(error = %e, "message pipeline returned an error");
            }
        });
    }
}

/// A clone-able handle to one account's monitor. Cloning is cheap (an
/// `Arc` bump); every clone drives the same underlying connection.
pub struct Monitor<H: HostRuntime + 'static> {
    inner: Arc<Inner<H>>,
}

impl<H: HostRuntime + 'static> Clone for Monitor<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<H: HostRuntime + 'static> Monitor<H> {
    pub fn new(account: Account, settings: GatewaySettings, host: Arc<H>, cross_dedup: Arc<CrossAccountDedup>) -> Self {
        let server = ServerClient::new(
            account.server_base_url.clone(),
            account.api_key.clone(),
            FetchOptions {
                timeout: Duration::from_millis(settings.fetch_timeout_ms),
                retries: settings.fetch_retries,
                ..FetchOptions::default()
            },
        );
        let message_author_cache_capacity = settings.message_author_cache_capacity;
        let per_account_dedup_capacity = settings.per_account_dedup_capacity;
        let rate_limit = RateLimiter::new(Duration::from_secs(settings.rate_limit_window_secs), settings.rate_limit_max);
        let dispatch_semaphore = Arc::new(Semaphore::new(settings.max_concurrent_dispatches));
        let media_group_debounce = Duration::from_millis(settings.media_group_debounce_ms);
        let voice_waiter_timeout = Duration::from_millis(settings.voice_waiter_timeout_ms);
        let reconnect_initial_backoff_ms = settings.reconnect_initial_backoff_ms;
        let outbound = Arc::new(OutboundQueue::new());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<H>>| {
            let weak_for_flush = weak.clone();
            let media_group = MediaGroupBuffer::new(media_group_debounce, move |flushed: FlushedGroup| {
                if let Some(inner) = weak_for_flush.upgrade() {
                    let is_group = inner.is_group_channel(&flushed.channel_id);
                    let msg = InboundMessage {
                        event: flushed.primary,
                        channel_id: flushed.channel_id,
                        ws_channel: flushed.ws_channel,
                        is_group,
                        extra_media_urls: flushed.extra_media_urls,
                    };
                    inner.submit_for_dispatch(msg);
                }
            });

            Inner {
                account,
                settings,
                host,
                server,
                status: Arc::new(StatusSink::new()),
                cross_dedup,
                history: GroupHistoryStore::new(),
                per_account_dedup: Mutex::new(PerAccountDedup::new(per_account_dedup_capacity)),
                rate_limiter: Mutex::new(rate_limit),
                voice_waiter: VoiceWaiter::new(voice_waiter_timeout),
                message_author_cache: Mutex::new(BoundedMap::new(message_author_cache_capacity)),
                last_seen: Mutex::new(HashMap::new()),
                pair_to_channel: Mutex::new(HashMap::new()),
                group_channel_ids: Mutex::new(HashSet::new()),
                bot_identity: Mutex::new(None),
                first_connect: AtomicBool::new(true),
                reconnect_backoff_ms: AtomicU64::new(reconnect_initial_backoff_ms),
                dispatch_semaphore,
                outbound,
                media_group,
                cancel: CancellationToken::new(),
            }
        });

        Self { inner }
    }

    pub fn status(&self) -> Arc<StatusSink> {
        self.inner.status.clone()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Drive the session loop until stopped or aborted. Reconnects with
    /// exponential backoff (capped) on every non-fatal exit.
    pub async fn run(self) -> Result<(), GatewayError> {
        self.inner.status.mark_started();

        let ws_url = derive_ws_url(&self.inner.account.server_base_url)?;
        if is_cleartext_to_remote_host(&ws_url) {
            let message = format!(
                "refusing to connect over ws:// to non-local host {:?} — api key would be sent in cleartext",
                ws_url.host_str()
            );
            error!(%message);
            self.inner.status.mark_error(message.clone());
            return Err(GatewayError::Fatal(message));
        }

        let max_backoff = Duration::from_millis(self.inner.settings.reconnect_max_backoff_ms);

        loop {
            if self.inner.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_process(&ws_url).await {
                Ok(true) => break,
                Ok(false) => {
                    if self.wait_for_reconnect(max_backoff).await.is_zero() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "monitor connection attempt failed");
                    self.inner.status.mark_error(e.to_string());
                    if self.wait_for_reconnect(max_backoff).await.is_zero() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Sleep for the backoff held in `Inner`, doubling it capped at
    /// `max_backoff` for next time and persisting the result so it survives
    /// across reconnects, or return `Duration::ZERO` if cancelled mid-sleep
    /// (signal to the caller to stop rather than reconnect). A successful
    /// re-authentication resets this back to the configured initial value
    /// via [`Inner::reset_backoff`].
    async fn wait_for_reconnect(&self, max_backoff: Duration) -> Duration {
        let backoff = self.inner.current_backoff();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {
                let next = (backoff * 2).min(max_backoff);
                self.inner.set_backoff(next);
                next
            }
            _ = self.inner.cancel.cancelled() => Duration::ZERO,
        }
    }

    async fn shutdown(&self) {
        self.inner.media_group.dispose();
        self.inner.voice_waiter.dispose();
        self.inner.outbound.set(None);
        self.inner.status.mark_stopped();
        info!(account_id = %self.inner.account.account_id, "monitor stopped");
    }

    /// One connection attempt's full lifecycle: connect, authenticate,
    /// subscribe, run until close/error/abort. Returns `Ok(true)` if the
    /// monitor should stop entirely (user/abort), `Ok(false)` if it should
    /// reconnect with backoff.
    async fn connect_and_process(&self, ws_url: &Url) -> Result<bool, GatewayError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        self.inner.outbound.set(Some(tx));
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        self.inner.outbound.send_frame(&OutboundFrame::Auth {
            payload: AuthPayload { api_key: &self.inner.account.api_key },
        });

        let mut ping_active = false;
        let mut pong_deadline: Option<tokio::time::Instant> = None;
        let ping_interval_dur = Duration::from_secs(self.inner.settings.ping_interval_secs);
        let pong_timeout_dur = Duration::from_secs(self.inner.settings.pong_timeout_secs);
        let mut ping_ticker = tokio::time::interval(ping_interval_dur);
        ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut rate_cleanup = tokio::time::interval(Duration::from_secs(self.inner.settings.rate_limit_cleanup_secs));
        rate_cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result: ConnectOutcome = loop {
            let pong_wait = async {
                match pong_deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(deadline).await;
                    }
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_frame(&text, &mut ping_active, &mut pong_deadline).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            break ConnectOutcome::Closed;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            break ConnectOutcome::Closed;
                        }
                        _ => {}
                    }
                }
                _ = ping_ticker.tick(), if ping_active => {
                    self.inner.outbound.send_frame(&OutboundFrame::Ping);
                    pong_deadline = Some(tokio::time::Instant::now() + pong_timeout_dur);
                }
                _ = pong_wait, if pong_deadline.is_some() => {
                    warn!("pong timeout, forcing reconnect");
                    break ConnectOutcome::Closed;
                }
                _ = rate_cleanup.tick() => {
                    self.inner.rate_limiter.lock().expect("rate limiter mutex poisoned").cleanup();
                }
                _ = self.inner.cancel.cancelled() => {
                    break ConnectOutcome::Stopped;
                }
            }
        };

        self.inner.outbound.set(None);
        writer.abort();

        match result {
            ConnectOutcome::Stopped => Ok(true),
            ConnectOutcome::Closed => Ok(false),
        }
    }

    async fn handle_frame(&self, text: &str, ping_active: &mut bool, pong_deadline: &mut Option<tokio::time::Instant>) {
        let event: InboundEvent = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "failed to parse websocket frame");
                return;
            }
        };

        match event {
            InboundEvent::Authenticated => {
                *ping_active = true;
                *pong_deadline = None;
                if let Err(e) = self.on_authenticated().await {
                    warn!(error = %e, "post-authentication setup failed");
                }
            }
            InboundEvent::Pong => {
                *pong_deadline = None;
            }
            InboundEvent::Subscribed => {}
            InboundEvent::MessageNew(payload) => {
                let ws_channel = payload.channel.clone();
                self.handle_message_new(payload, ws_channel.as_deref()).await;
            }
            InboundEvent::MessageUpdate(payload) => {
                if let Some(text) = payload.text {
                    self.inner.voice_waiter.resolve(&payload.message_id, text);
                }
            }
            InboundEvent::VoiceTranscribed(payload) => {
                self.handle_voice_transcribed(payload).await;
            }
            InboundEvent::PairCreated => {
                if let Err(e) = self.refresh_pairs().await {
                    warn!(error = %e, "failed to refresh pair list after pair:created");
                }
            }
            InboundEvent::GroupMemberAdded(payload) => {
                self.inner
                    .group_channel_ids
                    .lock()
                    .expect("group channel ids mutex poisoned")
                    .insert(payload.channel_id.clone());
                self.inner.subscribe(format!("channel:{}", payload.channel_id));
            }
            InboundEvent::GroupMemberChanged | InboundEvent::Error(_) | InboundEvent::Unknown => {}
        }
    }

    async fn on_authenticated(&self) -> Result<(), GatewayError> {
        info!(account_id = %self.inner.account.account_id, "authenticated");
        self.inner.reset_backoff();

        // Fetching the bot's own identity only needs to happen once per
        // monitor lifetime, but the `user:<botUserId>` subscription itself
        // must be re-sent on every reconnect like any other subscription.
        let existing_identity = self.inner.bot_identity.lock().expect("bot identity mutex poisoned").clone();
        let bot_user_id = match existing_identity {
            Some((user_id, _)) => user_id,
            None => {
                let identity = self
                    .inner
                    .server
                    .me()
                    .await
                    .map_err(|e| GatewayError::Auth(e.to_string()))?;
                *self.inner.bot_identity.lock().expect("bot identity mutex poisoned") =
                    Some((identity.user_id.clone(), identity.display_name.clone()));
                identity.user_id
            }
        };
        self.inner.subscribe(format!("user:{bot_user_id}"));

        let conversations = self
            .inner
            .server
            .conversations()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let mut pair_map = HashMap::new();
        let mut group_ids = HashSet::new();
        for c in conversations.conversations {
            match c.kind {
                ConversationType::Pair => {
                    if let Some(pid) = &c.pair_id {
                        pair_map.insert(pid.clone(), c.channel_id.clone());
                    }
                }
                ConversationType::Group => {
                    group_ids.insert(c.channel_id.clone());
                }
            }
            self.inner.subscribe(format!("channel:{}", c.channel_id));
        }
        *self.inner.pair_to_channel.lock().expect("pair map mutex poisoned") = pair_map;
        *self.inner.group_channel_ids.lock().expect("group ids mutex poisoned") = group_ids;

        let was_first = self.inner.first_connect.swap(false, Ordering::SeqCst);
        if !was_first {
            self.catch_up().await;
        }
        Ok(())
    }

    async fn refresh_pairs(&self) -> Result<(), GatewayError> {
        let pairs = self
            .inner
            .server
            .pair_list()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let mut pair_map = self.inner.pair_to_channel.lock().expect("pair map mutex poisoned");
        for p in pairs.pairs {
            if !pair_map.contains_key(&p.pair_id) {
                pair_map.insert(p.pair_id.clone(), p.channel_id.clone());
                self.inner.subscribe(format!("channel:{}", p.channel_id));
            }
        }
        Ok(())
    }

    async fn handle_message_new(&self, payload: MessageNewPayload, ws_channel: Option<&str>) {
        let pair_map = self.inner.pair_to_channel.lock().expect("pair map mutex poisoned").clone();
        let Some(channel_id) = resolve_channel_id(
            payload.channel_id.as_deref(),
            payload.pair_id.as_deref(),
            &pair_map,
            ws_channel,
        ) else {
            debug!(message_id = %payload.message_id, "dropping unroutable message:new");
            return;
        };
        let ws_channel = ws_channel.map(str::to_string).unwrap_or_else(|| format!("channel:{channel_id}"));

        self.inner
            .last_seen
            .lock()
            .expect("last seen mutex poisoned")
            .insert(channel_id.clone(), payload.message_id.clone());
        self.inner
            .message_author_cache
            .lock()
            .expect("message author cache mutex poisoned")
            .set(payload.message_id.clone(), payload.author_id.clone());
        self.inner.status.mark_inbound();

        let is_image = payload.content.content_type == "image";
        let media_url = payload.content.media_url.clone().filter(|u| {
            crate::policy::is_safe_media_url(u, &self.inner.account.server_base_url)
        });
        let key = format!("{channel_id}:{}", payload.author_id);
        let is_group = self.inner.is_group_channel(&channel_id);

        let consumed = self.inner.media_group.try_buffer(
            key,
            payload.clone(),
            channel_id.clone(),
            ws_channel.clone(),
            media_url,
            is_image,
        );
        if consumed {
            return;
        }

        let msg = InboundMessage {
            event: payload,
            channel_id,
            ws_channel,
            is_group,
            extra_media_urls: Vec::new(),
        };
        self.inner.submit_for_dispatch(msg);
    }

    async fn handle_voice_transcribed(&self, payload: crate::events::VoiceTranscribedPayload) {
        let pair_map = self.inner.pair_to_channel.lock().expect("pair map mutex poisoned").clone();
        // `voice:transcribed` carries no pair id or subscription tag of its own;
        // only the explicit `channel_id` path can resolve it.
        let Some(channel_id) = resolve_channel_id(payload.channel_id.as_deref(), None, &pair_map, None) else {
            debug!(message_id = %payload.message_id, "dropping unroutable voice:transcribed");
            return;
        };

        let author_id = payload.author_id.clone().unwrap_or_else(|| {
            self.inner
                .message_author_cache
                .lock()
                .expect("message author cache mutex poisoned")
                .get(&payload.message_id)
                .cloned()
                .unwrap_or_default()
        });

        let is_group = self.inner.is_group_channel(&channel_id);
        let event = MessageNewPayload {
            message_id: payload.message_id,
            channel_id: Some(channel_id.clone()),
            author_id,
            sender_name: None,
            created_at: None,
            pair_id: None,
            media_url: None,
            reply_to: None,
            content: MessageContent {
                content_type: "voice".to_string(),
                text: payload.text,
                media_url: None,
                duration_sec: None,
                via: None,
            },
            channel: None,
        };
        self.inner.submit_for_dispatch(InboundMessage {
            event,
            channel_id: channel_id.clone(),
            ws_channel: format!("channel:{channel_id}"),
            is_group,
            extra_media_urls: Vec::new(),
        });
    }

    /// Replay messages missed while disconnected, per channel with a known
    /// `lastSeenMessageId`, through the same concurrency-gated pipeline as
    /// live events.
    async fn catch_up(&self) {
        let channels: Vec<(String, String)> = self
            .inner
            .last_seen
            .lock()
            .expect("last seen mutex poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (channel_id, last_message_id) in channels {
            let page = self
                .inner
                .server
                .channel_messages_after(&channel_id, &last_message_id, self.inner.settings.catchup_page_limit)
                .await;

            let response = match page {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    warn!(channel_id, error = %e, "catch-up fetch failed for channel");
                    continue;
                }
            };

            let bot_user_id = self
                .inner
                .bot_identity
                .lock()
                .expect("bot identity mutex poisoned")
                .as_ref()
                .map(|(id, _)| id.clone());

            for m in response.messages {
                if m.payload.via.as_deref() == Some("openclaw") {
                    continue;
                }
                if bot_user_id.as_deref() == Some(m.author_id.as_str()) {
                    continue;
                }

                self.inner
                    .last_seen
                    .lock()
                    .expect("last seen mutex poisoned")
                    .insert(channel_id.clone(), m.message_id.clone());

                let is_group = self.inner.is_group_channel(&channel_id);
                let event = MessageNewPayload {
                    message_id: m.message_id.clone(),
                    channel_id: Some(channel_id.clone()),
                    author_id: m.author_id.clone(),
                    sender_name: None,
                    created_at: Some(m.created_at.clone()),
                    pair_id: None,
                    media_url: m.media_url.clone(),
                    reply_to: None,
                    content: MessageContent {
                        content_type: m.payload.content_type.clone(),
                        text: m.payload.text.clone(),
                        media_url: m.payload.media_url.clone(),
                        duration_sec: m.payload.duration_sec,
                        via: m.payload.via.clone(),
                    },
                    channel: None,
                };
                self.inner.submit_for_dispatch(InboundMessage {
                    event,
                    channel_id: channel_id.clone(),
                    ws_channel: format!("channel:{channel_id}"),
                    is_group,
                    extra_media_urls: Vec::new(),
                });
            }
        }
    }
}

enum ConnectOutcome {
    Stopped,
    Closed,
}
