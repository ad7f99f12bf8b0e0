// SPDX-License-Identifier: Apache-2.0
//! Inbound gateway core for the WristClaw channel plugin.
//!
//! A process hosts one [`monitor::Monitor`] per configured account; each
//! owns a single authenticated WebSocket, subscribes to every conversation
//! the account participates in, and runs inbound events through
//! [`pipeline::process_message`] before handing the result to a
//! [`host::HostRuntime`] implementation supplied by the embedding plugin.
//! The only state shared across monitors is [`dedup::CrossAccountDedup`].

pub mod bounded;
pub mod dedup;
pub mod error;
pub mod events;
pub mod fetch;
pub mod group_history;
pub mod host;
pub mod media_group;
pub mod monitor;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod server;
pub mod status;
pub mod voice_waiter;

pub use dedup::CrossAccountDedup;
pub use error::{FetchError, GatewayError};
pub use host::HostRuntime;
pub use monitor::Monitor;
pub use status::{StatusSink, StatusSnapshot};
