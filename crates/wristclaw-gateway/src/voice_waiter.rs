// SPDX-License-Identifier: Apache-2.0
//! Voice waiter: a voice `message:new` often arrives before its
//! transcription. `wait(messageId)` suspends up to `W_v` ms for a later
//! `message:update` carrying the same id; [`VoiceWaiter::resolve`] supplies
//! the transcription if it lands in time, otherwise the wait resolves to
//! the empty string. Exactly one resolution per waiter, enforced by the
//! mutex guarding removal from `pending`: whichever of resolve/cancel/timer
//! wins the race is the only one to find (and consume) the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Pending {
    tx: oneshot::Sender<String>,
    timer: JoinHandle<()>,
}

pub struct VoiceWaiter {
    timeout: Duration,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl VoiceWaiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Suspend for up to `timeout` waiting for [`resolve`](Self::resolve).
    /// A prior waiter for the same `message_id` is cancelled (resolved to
    /// empty) first.
    pub async fn wait(&self, message_id: String) -> String {
        self.cancel(&message_id);

        let (tx, rx) = oneshot::channel();
        let pending = self.pending.clone();
        let key = message_id.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending.lock().expect("voice waiter mutex poisoned").remove(&key);
            if let Some(entry) = entry {
                let _ = entry.tx.send(String::new());
            }
        });

        self.pending
            .lock()
            .expect("voice waiter mutex poisoned")
            .insert(message_id, Pending { tx, timer });

        rx.await.unwrap_or_default()
    }

    /// Resolve the pending waiter for `message_id` with `text`. Returns
    /// `false` if there was no waiter (already resolved, cancelled, or
    /// timed out).
    pub fn resolve(&self, message_id: &str, text: String) -> bool {
        let entry = self
            .pending
            .lock()
            .expect("voice waiter mutex poisoned")
            .remove(message_id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.tx.send(text);
                true
            }
            None => false,
        }
    }

    /// Force the pending waiter for `message_id` to resolve to the empty
    /// string. Returns `false` if there was none.
    pub fn cancel(&self, message_id: &str) -> bool {
        let entry = self
            .pending
            .lock()
            .expect("voice waiter mutex poisoned")
            .remove(message_id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.tx.send(String::new());
                true
            }
            None => false,
        }
    }

    /// Force every pending waiter to resolve to the empty string
    /// (shutdown path).
    pub fn dispose(&self) {
        let all: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("voice waiter mutex poisoned");
            pending.drain().map(|(_, v)| v).collect()
        };
        for entry in all {
            entry.timer.abort();
            let _ = entry.tx.send(String::new());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("voice waiter mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolve_before_timeout_delivers_text() {
        let waiter = Arc::new(VoiceWaiter::new(Duration::from_millis(1000)));
        let w = waiter.clone();
        let handle = tokio::spawn(async move { w.wait("m1".to_string()).await });
        tokio::task::yield_now().await;
        assert!(waiter.resolve("m1", "hello".to_string()));
        let text = handle.await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_to_empty_string() {
        let waiter = Arc::new(VoiceWaiter::new(Duration::from_millis(100)));
        let w = waiter.clone();
        let handle = tokio::spawn(async move { w.wait("m1".to_string()).await });
        tokio::time::advance(Duration::from_millis(150)).await;
        let text = handle.await.unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_after_timeout_returns_false() {
        let waiter = VoiceWaiter::new(Duration::from_millis(50));
        let text = waiter.wait("m1".to_string()).await;
        assert_eq!(text, "");
        assert!(!waiter.resolve("m1", "late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_wait_for_same_id_cancels_first() {
        let waiter = Arc::new(VoiceWaiter::new(Duration::from_millis(1000)));
        let w = waiter.clone();
        let first = tokio::spawn(async move { w.wait("m1".to_string()).await });
        tokio::task::yield_now().await;
        let w2 = waiter.clone();
        let _second = tokio::spawn(async move { w2.wait("m1".to_string()).await });
        let first_text = first.await.unwrap();
        assert_eq!(first_text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_resolves_all_pending_to_empty() {
        let waiter = Arc::new(VoiceWaiter::new(Duration::from_secs(30)));
        let w1 = waiter.clone();
        let h1 = tokio::spawn(async move { w1.wait("m1".to_string()).await });
        let w2 = waiter.clone();
        let h2 = tokio::spawn(async move { w2.wait("m2".to_string()).await });
        tokio::task::yield_now().await;
        waiter.dispose();
        assert_eq!(h1.await.unwrap(), "");
        assert_eq!(h2.await.unwrap(), "");
    }
}
