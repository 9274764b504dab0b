//! Single-item rendezvous between the notification handler and the task
//! waiting for a command result.
//!
//! There is no sequencing: a value written before the previous one was taken
//! replaces it.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct ResponseSlot {
    inner: Arc<SlotInner>,
}

#[derive(Default)]
struct SlotInner {
    value: Mutex<Option<u8>>,
    ready: Notify,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `byte`, overwriting anything unread
    pub fn put(&self, byte: u8) {
        if let Ok(mut value) = self.inner.value.lock() {
            *value = Some(byte);
        }
        self.inner.ready.notify_one();
    }

    /// Take the stored value without waiting
    pub fn take(&self) -> Option<u8> {
        self.inner.value.lock().ok().and_then(|mut value| value.take())
    }

    /// Drop any unread value
    pub fn clear(&self) {
        self.take();
    }

    /// Wait until a value is available and take it
    pub async fn recv(&self) -> u8 {
        loop {
            if let Some(byte) = self.take() {
                return byte;
            }
            self.inner.ready.notified().await;
        }
    }
}
