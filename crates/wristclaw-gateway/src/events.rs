// SPDX-License-Identifier: Apache-2.0
//! Wire types for the WebSocket control plane and the REST data plane.

use serde::{Deserialize, Serialize};

fn default_content_type() -> String {
    "text".to_string()
}

/// Nested content carried by a `message:new`/`message:update` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub via: Option<String>,
}

impl Default for MessageContent {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            text: None,
            media_url: None,
            duration_sec: None,
            via: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyToPreview {
    pub message_id: String,
    pub author_id: String,
    #[serde(default)]
    pub text_preview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNewPayload {
    pub message_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyToPreview>,
    #[serde(default)]
    pub content: MessageContent,
    /// The subscription name (`channel:<ID>`, `user:<ID>`, or `pair:<ID>`)
    /// this frame was pushed on. Only used as a last-resort channel-id
    /// source when `channel_id` and `pair_id` are both absent.
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdatePayload {
    pub message_id: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceTranscribedPayload {
    pub message_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberAddedPayload {
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
}

/// Server-pushed WebSocket events. Unknown tags deserialize
/// to `Unknown` and are ignored without error.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "subscribed")]
    Subscribed,
    #[serde(rename = "message:new")]
    MessageNew(MessageNewPayload),
    #[serde(rename = "message:update")]
    MessageUpdate(MessageUpdatePayload),
    #[serde(rename = "voice:transcribed")]
    VoiceTranscribed(VoiceTranscribedPayload),
    #[serde(rename = "pair:created")]
    PairCreated,
    #[serde(rename = "group:member_added")]
    GroupMemberAdded(GroupMemberAddedPayload),
    #[serde(rename = "group:member_changed")]
    GroupMemberChanged,
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(other)]
    Unknown,
}

// ── Outbound WebSocket frames ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    Auth {
        payload: AuthPayload<'a>,
    },
    Subscribe {
        channel: String,
    },
    Ping,
    Typing {
        channel: &'a str,
        payload: TypingPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload<'a> {
    #[serde(rename = "apiKey")]
    pub api_key: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TypingStatus {
    Thinking,
    Typing,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypingPayload {
    pub status: TypingStatus,
}

// ── REST wire shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Pair,
    Group,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: ConversationType,
    pub channel_id: String,
    #[serde(default)]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairListResponse {
    pub pairs: Vec<PairItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairItem {
    pub pair_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessagePayload {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub via: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub message_id: String,
    pub author_id: String,
    pub channel_id: String,
    pub created_at: String,
    pub payload: ApiMessagePayload,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessagesResponse {
    pub messages: Vec<ApiMessage>,
}
