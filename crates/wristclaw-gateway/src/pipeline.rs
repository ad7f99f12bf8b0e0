// SPDX-License-Identifier: Apache-2.0
//! The message pipeline: policy gates → body
//! building → envelope → dispatch → reply delivery, run in order for a
//! single inbound message. Any early return is silent — not an error.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, warn};

use wristclaw_config::Account;

use crate::dedup::{CrossAccountDedup, PerAccountDedup};
use crate::error::GatewayError;
use crate::events::MessageNewPayload;
use crate::group_history::GroupHistoryStore;
use crate::host::{
    EnvelopeFormatOptions, HistoryApi, HostRuntime, InboundHistoryEntry, MediaApi, OutboundApi,
    PeerKind, ReplyApi, RouteRequest, RoutingApi, SessionApi, TextApi,
};
use crate::policy::{self, GateDecision};
use crate::rate_limit::RateLimiter;
use crate::voice_waiter::VoiceWaiter;

const MAX_REPLY_CHUNK_LEN: usize = 4000;
const MAX_MEDIA_BYTES: u64 = 10 * 1024 * 1024;

/// Typing-indicator frames the pipeline sends over the account's WebSocket
/// while a dispatch is in flight. Kept separate from [`HostRuntime`]: this
/// is wire-plane behavior the `Monitor` owns, not something a host
/// implements.
#[async_trait]
pub trait TypingSink: Send + Sync {
    async fn send_typing(&self, channel_id: &str, status: crate::events::TypingStatus);
}

/// An inbound `message:new`, already resolved to a concrete channel and
/// possibly carrying extra media URLs folded in by the media-group buffer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub event: MessageNewPayload,
    pub channel_id: String,
    pub ws_channel: String,
    pub is_group: bool,
    pub extra_media_urls: Vec<String>,
}

/// Everything the pipeline needs from its owning `Monitor` for one
/// account, gathered behind short-lived references so `process_message`
/// can be called concurrently (bounded by the caller's semaphore) without
/// each call owning its own copy of shared state.
pub struct PipelineContext<'a, H: HostRuntime> {
    pub account: &'a Account,
    pub bot_user_id: Option<&'a str>,
    pub bot_display_name: Option<&'a str>,
    pub host: &'a H,
    pub history: &'a GroupHistoryStore,
    pub cross_dedup: &'a CrossAccountDedup,
    pub per_account_dedup: &'a Mutex<PerAccountDedup>,
    pub rate_limiter: &'a Mutex<RateLimiter>,
    pub voice_waiter: &'a VoiceWaiter,
    pub typing: &'a dyn TypingSink,
    pub status: &'a crate::status::StatusSink,
    pub voice_empty_fallback: bool,
    pub typing_heartbeat: Duration,
}

/// Run the full pipeline for one inbound message. Every early return is a
/// silent drop — never an `Err` — a dropped message is not an error condition.
pub async fn process_message<H: HostRuntime>(
    ctx: &PipelineContext<'_, H>,
    msg: InboundMessage,
) -> Result<(), GatewayError> {
    let event = &msg.event;

    // Step 1: parse nested fields.
    let via = event.content.via.as_deref();
    let content_type = event.content.content_type.as_str();
    let text = event.content.text.clone().unwrap_or_default();
    let media_url = event
        .content
        .media_url
        .clone()
        .map(|u| resolve_media_url(&u, &ctx.account.server_base_url));
    let sender_id = event.author_id.clone();
    let sender_name = event.sender_name.clone();

    // Step 2: echo suppression.
    if policy::is_echo(via, &sender_id, ctx.bot_user_id) {
        debug!(message_id = %event.message_id, "dropping echo");
        return Ok(());
    }

    // Step 3: cross-account dedup.
    if !ctx.cross_dedup.claim(&event.message_id) {
        debug!(message_id = %event.message_id, "dropping cross-account duplicate");
        return Ok(());
    }

    // Step 4: per-account dedup.
    {
        let mut dedup = ctx.per_account_dedup.lock().expect("per-account dedup mutex poisoned");
        if !dedup.claim(&event.message_id) {
            debug!(message_id = %event.message_id, "dropping per-account duplicate");
            return Ok(());
        }
    }

    // Step 5: access gate.
    let gate = if msg.is_group {
        policy::group_gate(ctx.account, &sender_id)
    } else {
        policy::dm_gate(ctx.account, &sender_id)
    };
    if gate == GateDecision::Deny {
        debug!(sender_id, channel_id = %msg.channel_id, "dropping: access gate denied");
        return Ok(());
    }

    // Step 6: rate limit.
    {
        let mut limiter = ctx.rate_limiter.lock().expect("rate limiter mutex poisoned");
        if limiter.is_limited(&sender_id) {
            debug!(sender_id, "dropping: rate limited");
            return Ok(());
        }
    }

    // Step 7: body building.
    let mut body = match content_type {
        "text" => {
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                debug!("dropping: empty text body");
                return Ok(());
            }
            trimmed
        }
        "voice" => {
            let trimmed = text.trim().to_string();
            let resolved = if !trimmed.is_empty() {
                trimmed
            } else {
                ctx.voice_waiter.wait(event.message_id.clone()).await
            };
            if resolved.is_empty() {
                if ctx.voice_empty_fallback {
                    "🎤 語音訊息".to_string()
                } else {
                    debug!(message_id = %event.message_id, "dropping: empty voice transcription");
                    return Ok(());
                }
            } else {
                resolved
            }
        }
        "image" => {
            let trimmed = text.trim().to_string();
            if !trimmed.is_empty() {
                trimmed
            } else {
                let count = 1 + msg.extra_media_urls.len();
                if count > 1 {
                    format!("📷 {count} 張圖片")
                } else {
                    "📷 圖片".to_string()
                }
            }
        }
        "interactive" => {
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                "📋 互動訊息".to_string()
            } else {
                trimmed
            }
        }
        _ => {
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                debug!(content_type, "dropping: empty body for unrecognized content type");
                return Ok(());
            }
            trimmed
        }
    };

    // Step 8: image media fetch.
    let mut media_paths: Vec<String> = Vec::new();
    if content_type == "image" {
        let mut urls: Vec<String> = Vec::new();
        if let Some(u) = &media_url {
            urls.push(u.clone());
        }
        for extra in &msg.extra_media_urls {
            urls.push(resolve_media_url(extra, &ctx.account.server_base_url));
        }
        for url in urls {
            if !policy::is_safe_media_url(&url, &ctx.account.server_base_url) {
                warn!(url, "skipping unsafe media url");
                continue;
            }
            match ctx.host.fetch_remote_media(&url, MAX_MEDIA_BYTES).await {
                Ok(bytes) => match ctx.host.save_media_buffer(bytes, "image").await {
                    Ok(saved) => media_paths.push(saved.local_path),
                    Err(e) => warn!(url, error = %e, "failed to save fetched media"),
                },
                Err(e) => warn!(url, error = %e, "failed to fetch media"),
            }
        }
    }

    // Step 9: @mention gate for groups with policy `mention`.
    if msg.is_group && gate == GateDecision::RecordOnly {
        let pool = policy::mention_pool(ctx.account, ctx.bot_display_name);
        let result = policy::detect_and_strip_mention(&body, &pool);
        if !result.mentioned {
            ctx.history
                .record_pending_history_entry_if_enabled(
                    &msg.channel_id,
                    InboundHistoryEntry {
                        sender: sender_name.clone().unwrap_or_else(|| sender_id.clone()),
                        body: body.clone(),
                        timestamp: Utc::now(),
                        message_id: event.message_id.clone(),
                    },
                    ctx.account.group_history_limit,
                )
                .await?;
            debug!(channel_id = %msg.channel_id, "recorded non-mention group message to history");
            return Ok(());
        }
        body = result.stripped;
        if body.is_empty() {
            debug!(message_id = %event.message_id, "dropping: empty body after mention strip");
            return Ok(());
        }
    }

    // Step 10: reply-context prefix.
    if let Some(reply_to) = &event.reply_to {
        if let Some(preview) = reply_to.text_preview.as_deref() {
            let sanitized = sanitize_reply_preview(preview);
            if !sanitized.is_empty() {
                let prefix = ctx.host.create_reply_prefix_options(&sanitized);
                body = format!("{prefix}\n{body}");
            }
        }
    }

    // Step 11: agent routing.
    let is_owner = ctx.account.is_owner(&sender_id);
    let peer = if is_owner { PeerKind::Owner } else { PeerKind::Visitor };
    let agent_id = ctx
        .host
        .resolve_agent_route(RouteRequest {
            account_id: &ctx.account.account_id,
            channel_id: &msg.channel_id,
            peer,
            secretary_agent_id: ctx.account.secretary_agent_id.as_deref(),
        })
        .await?;
    let kind = if msg.is_group { "group" } else { "direct" };
    // An `[<accountId>:]` segment is deliberately left out: channel ids are
    // already scoped to one account's server, so nothing disambiguates on it.
    let session_key = format!("agent:wristclaw:{kind}:ch:{}", msg.channel_id);

    // Step 12: envelope + history context.
    let opts: EnvelopeFormatOptions = ctx
        .host
        .resolve_envelope_format_options(&msg.channel_id, &sender_id, sender_name.as_deref())
        .await?;
    let prior_session_updated_at = ctx.host.read_session_updated_at(&session_key).await?;
    let now = Utc::now();

    let history_entries: Vec<InboundHistoryEntry> = if msg.is_group && ctx.account.group_history_limit > 0 {
        ctx.history.build_pending_history_context_from_map(&msg.channel_id).await?
    } else {
        Vec::new()
    };

    let envelope_body = if history_entries.is_empty() {
        body
    } else {
        let mut rendered = String::new();
        for entry in &history_entries {
            rendered.push_str(&format!(
                "[{}] {}: {}\n",
                entry.timestamp.format("%H:%M"),
                entry.sender,
                entry.body
            ));
        }
        rendered.push_str(&body);
        rendered
    };

    let envelope = ctx
        .host
        .format_agent_envelope(&opts, &envelope_body, now, prior_session_updated_at)
        .await?;
    let inbound_ctx = ctx
        .host
        .finalize_inbound_context(envelope, history_entries, media_paths)
        .await?;

    // Step 13: record inbound session (non-fatal on error).
    if let Err(e) = ctx.host.record_inbound_session(&session_key, now).await {
        warn!(session_key, error = %e, "failed to record inbound session");
    }

    // Step 14: dispatch, with typing indicator heartbeat.
    dispatch_with_typing(ctx, &agent_id, &session_key, &msg.channel_id, inbound_ctx).await;

    // Step 15: finalize — clear group history if this was a mention reply.
    if msg.is_group && gate == GateDecision::RecordOnly {
        ctx.history.clear_history_entries_if_enabled(&msg.channel_id).await?;
    }

    Ok(())
}

async fn dispatch_with_typing<H: HostRuntime>(
    ctx: &PipelineContext<'_, H>,
    agent_id: &str,
    session_key: &str,
    channel_id: &str,
    inbound_ctx: crate::host::InboundContext,
) {
    use crate::events::TypingStatus;

    ctx.typing.send_typing(channel_id, TypingStatus::Thinking).await;

    // The heartbeat re-sends the current status on a ticker rather than a
    // separately spawned task: `typing` borrows from the monitor for the
    // duration of one account's event loop, not `'static`, so the ticker
    // lives in this same future and is driven by the `select!` below
    // instead of being spawned off.
    let status_switched = std::sync::atomic::AtomicBool::new(false);

    let mut stream = match ctx
        .host
        .dispatch_reply_with_buffered_block_dispatcher(agent_id, session_key, inbound_ctx)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(session_key, error = %e, "reply dispatch failed");
            return;
        }
    };

    let mut heartbeat_interval = tokio::time::interval(ctx.typing_heartbeat);
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat_interval.tick().await; // first tick fires immediately; consume it.

    loop {
        tokio::select! {
            chunk = stream.next() => {
                let Some(chunk) = chunk else { break };
                if !status_switched.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    ctx.typing.send_typing(channel_id, TypingStatus::Typing).await;
                }
                deliver_chunk(ctx, channel_id, &chunk).await;
            }
            _ = heartbeat_interval.tick() => {
                let status = if status_switched.load(std::sync::atomic::Ordering::SeqCst) {
                    TypingStatus::Typing
                } else {
                    TypingStatus::Thinking
                };
                ctx.typing.send_typing(channel_id, status).await;
            }
        }
    }
}

async fn deliver_chunk<H: HostRuntime>(ctx: &PipelineContext<'_, H>, channel_id: &str, chunk: &str) {
    let converted = ctx.host.convert_markdown_tables(chunk);
    let mode = ctx.host.resolve_chunk_mode(channel_id);
    let pieces = ctx
        .host
        .chunk_markdown_text_with_mode(&converted, mode, MAX_REPLY_CHUNK_LEN);
    for piece in pieces {
        match ctx.host.send(channel_id, &piece).await {
            Ok(()) => ctx.status.mark_outbound(),
            Err(e) => warn!(channel_id, error = %e, "failed to deliver reply chunk"),
        }
    }
}

fn resolve_media_url(url: &str, base: &str) -> String {
    if let Some(path) = url.strip_prefix('/') {
        format!("{}/{}", base.trim_end_matches('/'), path)
    } else {
        url.to_string()
    }
}

/// Reply-context preview: first 100 chars, ASCII control bytes stripped
/// except tab/newline/carriage-return.
fn sanitize_reply_preview(preview: &str) -> String {
    preview
        .chars()
        .take(100)
        .filter(|c| {
            let b = *c as u32;
            !(b <= 0x1f && !matches!(*c, '\t' | '\n' | '\r'))
        })
        .collect::<String>()
        .trim()
        .to_string()
}
