//! Registry of live device sessions.
//!
//! Mutated only by the session authenticate/close paths; reads are safe
//! concurrently. Authenticating a device that already has a live
//! session evicts the previous one by cancelling it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::messages::Outbound;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn next_session_seq() -> u64 {
    SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone)]
pub struct SessionHandle {
    pub sender: mpsc::Sender<Outbound>,
    pub cancel: CancellationToken,
    pub seq: u64,
}

#[derive(Clone, Default)]
pub struct ConnectionMap {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a device id to a session, evicting any prior session for
    /// the same id.
    pub async fn register(&self, device_id: &str, handle: SessionHandle) {
        let previous = self
            .inner
            .write()
            .await
            .insert(device_id.to_string(), handle);
        if let Some(previous) = previous {
            tracing::info!(device_id, "evicting superseded session");
            previous.cancel.cancel();
        }
    }

    /// Remove the binding, but only if it still belongs to the closing
    /// session; a newer session for the same device stays registered.
    pub async fn remove(&self, device_id: &str, seq: u64) {
        let mut map = self.inner.write().await;
        if map.get(device_id).is_some_and(|h| h.seq == seq) {
            map.remove(device_id);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.inner.read().await.contains_key(device_id)
    }
}
