use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{DispatchNotifier, OfferChannel};
use crate::error::DispatchError;
use crate::model::MatchOffer;

/// Identifies one registration so a stale session cannot unregister its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

struct Session {
    id: SessionId,
    channel: Arc<dyn OfferChannel>,
}

/// Live driver sessions. Registering a driver again closes the previous channel.
#[derive(Default)]
pub struct ChannelRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    next_session: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver_id: &str, channel: Arc<dyn OfferChannel>) -> SessionId {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let replaced = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions.insert(driver_id.to_string(), Session { id, channel })
        };
        if let Some(old) = replaced {
            tracing::info!(driver_id, "replacing existing driver session");
            old.channel.close();
        }
        id
    }

    /// Remove and close the session if it is still the registered one.
    /// Returns whether it was removed.
    pub fn unregister(&self, driver_id: &str, session: SessionId) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(driver_id) {
                Some(current) if current.id == session => sessions.remove(driver_id),
                _ => None,
            }
        };
        match removed {
            Some(old) => {
                old.channel.close();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, driver_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(driver_id)
    }

    pub fn connected(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Serialize `offer` and send it on the driver's channel.
    pub async fn offer_to(&self, driver_id: &str, offer: &MatchOffer) -> Result<(), DispatchError> {
        let channel = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(driver_id) {
                Some(session) => Arc::clone(&session.channel),
                None => return Err(DispatchError::NoSession(driver_id.to_string())),
            }
        };
        let payload = serde_json::to_string(offer)?;
        channel.send(payload).await
    }
}

#[async_trait]
impl DispatchNotifier for ChannelRegistry {
    async fn offer(&self, _ride_id: &str, offer: &MatchOffer) -> Result<(), DispatchError> {
        self.offer_to(&offer.driver_id, offer).await
    }
}

/// Bounded in-process channel. Sends never block; a full buffer is an error.
pub struct MpscOfferChannel {
    driver_id: String,
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl MpscOfferChannel {
    pub fn new(driver_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Self {
            driver_id: driver_id.into(),
            sender: Mutex::new(Some(tx)),
        };
        (channel, rx)
    }
}

#[async_trait]
impl OfferChannel for MpscOfferChannel {
    async fn send(&self, payload: String) -> Result<(), DispatchError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(DispatchError::ChannelClosed(self.driver_id.clone()));
        };
        tx.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => DispatchError::ChannelFull(self.driver_id.clone()),
            TrySendError::Closed(_) => DispatchError::ChannelClosed(self.driver_id.clone()),
        })
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(driver_id: &str) -> MatchOffer {
        MatchOffer {
            driver_id: driver_id.into(),
            eta_seconds: 12.0,
            cost: 42.0,
        }
    }

    #[tokio::test]
    async fn offer_without_session_is_no_session() {
        let registry = ChannelRegistry::new();
        let err = registry.offer("ride-1", &offer("d1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoSession(id) if id == "d1"));
    }

    #[tokio::test]
    async fn offer_reaches_registered_channel_as_json() {
        let registry = ChannelRegistry::new();
        let (channel, mut rx) = MpscOfferChannel::new("d1", 4);
        registry.register("d1", Arc::new(channel));

        registry.offer("ride-1", &offer("d1")).await.expect("delivered");
        let payload = rx.recv().await.expect("payload");
        let decoded: MatchOffer = serde_json::from_str(&payload).expect("json");
        assert_eq!(decoded, offer("d1"));
    }

    #[tokio::test]
    async fn reregistering_closes_previous_channel() {
        let registry = ChannelRegistry::new();
        let (first, mut first_rx) = MpscOfferChannel::new("d1", 4);
        let first = Arc::new(first);
        let first_session = registry.register("d1", first.clone());

        let (second, mut second_rx) = MpscOfferChannel::new("d1", 4);
        let second_session = registry.register("d1", Arc::new(second));
        assert!(first.is_closed());
        assert!(first_rx.recv().await.is_none());
        assert_eq!(registry.connected(), 1);

        // stale session must not evict its replacement
        assert!(!registry.unregister("d1", first_session));
        registry.offer("ride-1", &offer("d1")).await.expect("delivered");
        assert!(second_rx.recv().await.is_some());

        assert!(registry.unregister("d1", second_session));
        assert!(!registry.is_connected("d1"));
    }

    #[tokio::test]
    async fn full_and_closed_channels_report_errors() {
        let (channel, rx) = MpscOfferChannel::new("d1", 1);
        channel.send("a".into()).await.expect("first fits");
        assert!(matches!(
            channel.send("b".into()).await,
            Err(DispatchError::ChannelFull(_))
        ));

        drop(rx);
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send("c".into()).await,
            Err(DispatchError::ChannelClosed(_))
        ));
    }
}
