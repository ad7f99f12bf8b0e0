// SPDX-License-Identifier: Apache-2.0
//! Media-group buffer: collapses a burst of images from the
//! same sender in the same channel into one dispatch carrying a primary
//! event and a list of extra URLs, debounced by `D` (default 800ms).
//!
//! Callers are expected to have already run `mediaUrl` through
//! [`crate::policy::is_safe_media_url`] before calling [`MediaGroupBuffer::try_buffer`] —
//! this module only buffers, it does not re-validate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::events::MessageNewPayload;

/// What a flushed entry hands back to the caller for dispatch.
#[derive(Debug, Clone)]
pub struct FlushedGroup {
    pub primary: MessageNewPayload,
    pub channel_id: String,
    pub ws_channel: String,
    pub extra_media_urls: Vec<String>,
}

struct Entry {
    primary: MessageNewPayload,
    channel_id: String,
    ws_channel: String,
    extras: Vec<String>,
    timer: JoinHandle<()>,
}

type OnFlush = Arc<dyn Fn(FlushedGroup) + Send + Sync>;

/// One `Monitor`'s media-group state, keyed by `"channelId:senderId"`.
pub struct MediaGroupBuffer {
    debounce: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    on_flush: OnFlush,
}

impl MediaGroupBuffer {
    pub fn new(debounce: Duration, on_flush: impl Fn(FlushedGroup) + Send + Sync + 'static) -> Self {
        Self {
            debounce,
            entries: Arc::new(Mutex::new(HashMap::new())),
            on_flush: Arc::new(on_flush),
        }
    }

    /// Returns `true` iff the caller should treat
    /// this event as consumed (an image, buffered or newly opened); `false`
    /// means the caller must process the event normally (non-image, or an
    /// image that just flushed a *different* in-flight entry first).
    pub fn try_buffer(
        &self,
        key: String,
        event: MessageNewPayload,
        channel_id: String,
        ws_channel: String,
        media_url: Option<String>,
        is_image: bool,
    ) -> bool {
        if !is_image {
            self.flush(&key);
            return false;
        }

        let mut entries = self.entries.lock().expect("media group mutex poisoned");
        if let Some(entry) = entries.get_mut(&key) {
            if let Some(url) = media_url {
                entry.extras.push(url);
            }
            entry.timer.abort();
            entry.timer = self.spawn_timer(key.clone());
        } else {
            let timer = self.spawn_timer(key.clone());
            entries.insert(
                key,
                Entry {
                    primary: event,
                    channel_id,
                    ws_channel,
                    extras: Vec::new(),
                    timer,
                },
            );
        }
        true
    }

    fn spawn_timer(&self, key: String) -> JoinHandle<()> {
        let entries = self.entries.clone();
        let on_flush = self.on_flush.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let flushed = entries.lock().expect("media group mutex poisoned").remove(&key);
            if let Some(entry) = flushed {
                on_flush(entry.into_flushed());
            }
        })
    }

    /// Flush and emit the entry for `key` exactly once, if one exists.
    pub fn flush(&self, key: &str) {
        let entry = self
            .entries
            .lock()
            .expect("media group mutex poisoned")
            .remove(key);
        if let Some(entry) = entry {
            entry.timer.abort();
            (self.on_flush)(entry.into_flushed());
        }
    }

    /// Flush every pending entry (shutdown path), cancelling each timer
    /// first.
    pub fn dispose(&self) {
        let all: Vec<Entry> = {
            let mut entries = self.entries.lock().expect("media group mutex poisoned");
            entries.drain().map(|(_, v)| v).collect()
        };
        for entry in all {
            entry.timer.abort();
            (self.on_flush)(entry.into_flushed());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("media group mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Entry {
    fn into_flushed(self) -> FlushedGroup {
        FlushedGroup {
            primary: self.primary,
            channel_id: self.channel_id,
            ws_channel: self.ws_channel,
            extra_media_urls: self.extras,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn event(id: &str) -> MessageNewPayload {
        serde_json::from_value(serde_json::json!({
            "messageId": id,
            "authorId": "u1",
            "content": {"contentType": "image"},
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn non_image_flushes_pending_entry_and_returns_false() {
        let flushed: Arc<AsyncMutex<Vec<FlushedGroup>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = flushed.clone();
        let buf = MediaGroupBuffer::new(Duration::from_millis(800), move |g| {
            sink.try_lock().unwrap().push(g);
        });

        assert!(buf.try_buffer(
            "ch:u1".into(),
            event("m1"),
            "ch".into(),
            "channel:ch".into(),
            Some("u1".into()),
            true
        ));
        assert!(!buf.try_buffer(
            "ch:u1".into(),
            event("m2"),
            "ch".into(),
            "channel:ch".into(),
            None,
            false
        ));
        let got = flushed.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].primary.message_id, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn successive_images_collapse_into_one_flush_with_all_extras() {
        let flushed: Arc<AsyncMutex<Vec<FlushedGroup>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = flushed.clone();
        let buf = MediaGroupBuffer::new(Duration::from_millis(800), move |g| {
            sink.try_lock().unwrap().push(g);
        });

        buf.try_buffer("ch:u1".into(), event("m1"), "ch".into(), "channel:ch".into(), Some("u1".into()), true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        buf.try_buffer("ch:u1".into(), event("m2"), "ch".into(), "channel:ch".into(), Some("u2".into()), true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        buf.try_buffer("ch:u1".into(), event("m3"), "ch".into(), "channel:ch".into(), Some("u3".into()), true);

        tokio::time::sleep(Duration::from_millis(900)).await;

        let got = flushed.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].primary.message_id, "m1");
        assert_eq!(got[0].extra_media_urls, vec!["u2".to_string(), "u3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_flushes_every_pending_entry_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let buf = MediaGroupBuffer::new(Duration::from_millis(800), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        buf.try_buffer("a".into(), event("m1"), "ch".into(), "channel:ch".into(), None, true);
        buf.try_buffer("b".into(), event("m2"), "ch".into(), "channel:ch".into(), None, true);
        buf.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(buf.is_empty());
    }
}
