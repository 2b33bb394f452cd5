//! In-process transport
//!
//! Delivers published messages only for subscribed topics and can simulate a
//! reconnect, which drops every subscription like a real broker session loss.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::error::{AlarmError, Result};
use crate::traits::{Transport, TransportEvent};

const EVENT_BUFFER: usize = 1024;

#[derive(Default)]
struct Inner {
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    subscribed: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    subscribe_calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message; returns whether it was delivered
    pub fn publish(&self, topic: &str, body: impl Into<Bytes>) -> bool {
        let inner = self.inner.lock();
        let Some(tx) = inner.events_tx.as_ref() else {
            return false;
        };
        if !inner.subscribed.contains(topic) {
            return false;
        }
        tx.try_send(TransportEvent::Message {
            topic: topic.to_string(),
            payload: body.into(),
        })
        .is_ok()
    }

    /// Drop all subscriptions and emit `Reconnected`
    pub fn simulate_reconnect(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.subscribed.clear();
        match inner.events_tx.as_ref() {
            Some(tx) => tx.try_send(TransportEvent::Reconnected).is_ok(),
            None => false,
        }
    }

    /// Currently subscribed topics, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().subscribed.iter().cloned().collect()
    }

    /// Number of `subscribe` calls received
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut inner = self.inner.lock();
        inner.events_tx = Some(tx);
        inner.subscribed.clear();
        Ok(rx)
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.events_tx.is_none() {
            return Err(AlarmError::Transport("not connected".to_string()));
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        inner.subscribed.extend(topics.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        for topic in topics {
            inner.subscribed.remove(topic);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().events_tx.is_some()
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.events_tx = None;
        inner.subscribed.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_only_subscribed_topics() {
        let transport = MemoryTransport::new();
        let mut events = transport.connect().await.unwrap();
        transport.subscribe(&["a".to_string()]).await.unwrap();

        assert!(transport.publish("a", "{}"));
        assert!(!transport.publish("b", "{}"));

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Message {
                topic: "a".to_string(),
                payload: Bytes::from_static(b"{}"),
            }
        );
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let transport = MemoryTransport::new();
        assert!(!transport.is_connected());
        assert!(transport.subscribe(&["a".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let transport = MemoryTransport::new();
        let mut events = transport.connect().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_drops_subscriptions() {
        let transport = MemoryTransport::new();
        let mut events = transport.connect().await.unwrap();
        transport.subscribe(&["a".to_string()]).await.unwrap();

        assert!(transport.simulate_reconnect());
        assert!(transport.subscriptions().is_empty());
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Reconnected);
    }
}
