// SPDX-License-Identifier: Apache-2.0
//! The `HostRuntime` capability set: everything the gateway core
//! consumes from the conversational-AI host rather than owns. Expressed
//! as one small `#[async_trait]` per named sub-surface (routing, session,
//! reply, text, media, history) combined behind a single supertrait so the
//! message pipeline takes one generic parameter, following the same
//! "capability trait at the seam" shape the fetch utility uses for
//! `HttpClient`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GatewayError;

/// Who is addressed by a dispatch: the account owner, or any other sender
/// ("visitor") who may be routed to a configured secretary agent instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Owner,
    Visitor,
}

/// Inputs to agent-route resolution.
#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    pub account_id: &'a str,
    pub channel_id: &'a str,
    pub peer: PeerKind,
    pub secretary_agent_id: Option<&'a str>,
}

#[async_trait]
pub trait RoutingApi: Send + Sync {
    /// Resolve which agent id should handle this peer/channel. Owners
    /// always route to the host's default agent; visitors route to
    /// `secretary_agent_id` when the account configures one, else also the
    /// default agent.
    async fn resolve_agent_route(&self, req: RouteRequest<'_>) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Filesystem/storage path the host uses to persist this session, for
    /// diagnostics only — the core never reads or writes it directly.
    async fn resolve_store_path(&self, session_key: &str) -> Result<String, GatewayError>;

    /// Last time this session produced a reply, used to render the "prior
    /// session timestamp" line in the envelope. `None` for a brand-new
    /// session.
    async fn read_session_updated_at(
        &self,
        session_key: &str,
    ) -> Result<Option<DateTime<Utc>>, GatewayError>;

    /// Record that an inbound message was routed to `session_key`. Errors
    /// are logged by the caller and never fail the pipeline.
    async fn record_inbound_session(
        &self,
        session_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}

/// One prior message folded into a group's history buffer, handed to the
/// agent as context for a mention-triggered reply.
#[derive(Debug, Clone)]
pub struct InboundHistoryEntry {
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
}

/// Options controlling how the envelope wraps the raw body (channel name,
/// sender label, timestamps) — resolved once per account/channel by the
/// host so formatting stays centralized there.
#[derive(Debug, Clone)]
pub struct EnvelopeFormatOptions {
    pub channel_label: String,
    pub sender_label: String,
}

/// Fully-formed context handed to the host's reply dispatcher: the
/// envelope-wrapped body, any folded-in group history, and local paths of
/// media the pipeline already fetched and saved.
#[derive(Debug, Clone)]
pub struct InboundContext {
    pub envelope: String,
    pub history: Vec<InboundHistoryEntry>,
    pub media_paths: Vec<String>,
}

#[async_trait]
pub trait ReplyApi: Send + Sync {
    /// Resolve per-channel envelope formatting options (channel/sender
    /// labels) ahead of formatting.
    async fn resolve_envelope_format_options(
        &self,
        channel_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<EnvelopeFormatOptions, GatewayError>;

    /// Wrap `body` with the envelope: channel name, sender label, current
    /// timestamp, and the prior session timestamp.
    async fn format_agent_envelope(
        &self,
        opts: &EnvelopeFormatOptions,
        body: &str,
        now: DateTime<Utc>,
        prior_session_updated_at: Option<DateTime<Utc>>,
    ) -> Result<String, GatewayError>;

    /// Combine the formatted envelope with structured history and attached
    /// media paths into the final payload the dispatcher consumes.
    async fn finalize_inbound_context(
        &self,
        envelope: String,
        history: Vec<InboundHistoryEntry>,
        media_paths: Vec<String>,
    ) -> Result<InboundContext, GatewayError>;

    /// Dispatch `ctx` to `agent_id` under `session_key`, returning a stream
    /// of raw reply chunks as the agent produces them. The pipeline owns
    /// turning each chunk into one or more outbound sends (table
    /// conversion, length-chunking, `OutboundApi::send`); this call itself
    /// never throws out of the pipeline — delivery failures are the
    /// pipeline's concern to log per chunk, not the host's.
    async fn dispatch_reply_with_buffered_block_dispatcher(
        &self,
        agent_id: &str,
        session_key: &str,
        ctx: InboundContext,
    ) -> Result<ReplyChunkStream, GatewayError>;

    /// Build the reply-context prefix options for a quoted `replyTo`
    /// preview.
    fn create_reply_prefix_options(&self, text_preview: &str) -> String;
}

/// A stream of raw reply chunks from the host's agent runtime, consumed by
/// the pipeline's dispatch step via `while let Ok(ev) = events.recv().await` —
/// `BoxStream` rather than a concrete channel type keeps `ReplyApi` generic
/// over however the host actually produces chunks (broadcast channel, SSE,
/// in-process generator).
pub type ReplyChunkStream = futures::stream::BoxStream<'static, String>;

/// Chunking mode resolved per-channel (plain text vs. something needing
/// markdown-table conversion first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Plain,
    Markdown,
}

#[async_trait]
pub trait TextApi: Send + Sync {
    /// Rewrite Github-flavored markdown tables into a rendering the target
    /// channel can display, a no-op when the channel has no special table
    /// handling.
    fn convert_markdown_tables(&self, text: &str) -> String;

    /// Resolve which chunk mode a channel uses.
    fn resolve_chunk_mode(&self, channel_id: &str) -> ChunkMode;

    /// Split `text` into pieces no larger than `max_len`, respecting
    /// `mode`'s chunk boundaries (paragraph/table-aware for `Markdown`).
    fn chunk_markdown_text_with_mode(&self, text: &str, mode: ChunkMode, max_len: usize) -> Vec<String>;
}

/// A media blob fetched and saved by the host, ready to attach to a
/// dispatch.
#[derive(Debug, Clone)]
pub struct SavedMedia {
    pub local_path: String,
}

#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Fetch `url` capped at `max_bytes`. Distinct from the gateway's own
    /// `fetch` utility: this
    /// is the host's download+cap helper, reused here rather than
    /// reimplemented.
    async fn fetch_remote_media(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, GatewayError>;

    /// Persist a fetched buffer under the host's media store, tagged
    /// `"inbound"`.
    async fn save_media_buffer(
        &self,
        buf: Vec<u8>,
        content_type: &str,
    ) -> Result<SavedMedia, GatewayError>;
}

/// The group-history buffer's recording/read/clear operations. These may be
/// implemented inline since they trivially wrap the group-history
/// structure — [`crate::group_history::GroupHistoryStore`]
/// implements this trait directly rather than routing through a
/// host-provided adapter, which is why it is kept separate from
/// [`HostRuntime`]: the pipeline takes a `GroupHistoryStore` as its own
/// argument instead of folding it into the generic host parameter.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn record_pending_history_entry_if_enabled(
        &self,
        channel_id: &str,
        entry: InboundHistoryEntry,
        limit: usize,
    ) -> Result<(), GatewayError>;

    async fn build_pending_history_context_from_map(
        &self,
        channel_id: &str,
    ) -> Result<Vec<InboundHistoryEntry>, GatewayError>;

    async fn clear_history_entries_if_enabled(&self, channel_id: &str) -> Result<(), GatewayError>;
}

/// The outbound send capability, owned by a separate "outbound helper":
/// formatting, button templates, and media upload are
/// out of scope here, but the core still needs to hand it finished text.
#[async_trait]
pub trait OutboundApi: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), GatewayError>;
}

/// The capability set the message pipeline needs from the enclosing host
/// for everything except group-history bookkeeping (see [`HistoryApi`]'s
/// doc comment for why that one is separate). Implementers may name
/// concrete types however they wish; the pipeline only ever depends on
/// this supertrait.
pub trait HostRuntime: RoutingApi + SessionApi + ReplyApi + TextApi + MediaApi + OutboundApi {}

impl<T> HostRuntime for T where T: RoutingApi + SessionApi + ReplyApi + TextApi + MediaApi + OutboundApi {}
