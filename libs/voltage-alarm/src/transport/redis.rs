//! Redis pub/sub transport
//!
//! One background task owns the `PubSub` connection. Subscription changes are
//! sent to it over a control channel because the message stream borrows the
//! connection mutably. When the stream ends the task reconnects with a doubling
//! delay and emits `TransportEvent::Reconnected`; Redis drops subscriptions
//! with the old connection, so the engine re-subscribes on that event.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AlarmError, Result};
use crate::traits::{Transport, TransportEvent};

const EVENT_BUFFER: usize = 4096;
const CONTROL_BUFFER: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisTransportConfig {
    pub url: String,
    /// First reconnect delay
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay
    pub reconnect_max_delay_ms: u64,
}

impl Default for RedisTransportConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            reconnect_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

enum Control {
    Subscribe(Vec<String>, oneshot::Sender<Result<()>>),
    Unsubscribe(Vec<String>, oneshot::Sender<Result<()>>),
}

struct Session {
    control_tx: mpsc::Sender<Control>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RedisTransport {
    client: redis::Client,
    config: RedisTransportConfig,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl RedisTransport {
    /// Validate the URL; no connection is made until `connect`
    pub fn new(config: RedisTransportConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        })
    }

    async fn send_control(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> Control,
    ) -> Result<()> {
        let control_tx = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.control_tx.clone())
            .ok_or_else(|| AlarmError::Transport("not connected".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        control_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| AlarmError::Transport("pub/sub task has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| AlarmError::Transport("pub/sub task has stopped".to_string()))?
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.session.lock().is_some() {
            return Err(AlarmError::Transport("already connected".to_string()));
        }

        let pubsub = self.client.get_async_pubsub().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Redis pub/sub connected: {}", self.config.url);

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let token = CancellationToken::new();

        let task = SessionTask {
            client: self.client.clone(),
            config: self.config.clone(),
            connected: Arc::clone(&self.connected),
            events_tx,
            control_rx,
            token: token.clone(),
        };
        let handle = tokio::spawn(task.run(pubsub));

        *self.session.lock() = Some(Session {
            control_tx,
            token,
            handle,
        });
        Ok(events_rx)
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let topics = topics.to_vec();
        self.send_control(|reply| Control::Subscribe(topics, reply))
            .await
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        let topics = topics.to_vec();
        self.send_control(|reply| Control::Unsubscribe(topics, reply))
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        session.token.cancel();
        match tokio::time::timeout(CLOSE_TIMEOUT, session.handle).await {
            Ok(Ok(())) => info!("Redis pub/sub closed"),
            Ok(Err(e)) => warn!("Redis pub/sub task error: {}", e),
            Err(_) => warn!("Redis pub/sub task timeout, forcing stop"),
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

enum Step {
    Stop,
    Disconnected,
    Message(String, Bytes),
    Control(Control),
}

struct SessionTask {
    client: redis::Client,
    config: RedisTransportConfig,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::Sender<TransportEvent>,
    control_rx: mpsc::Receiver<Control>,
    token: CancellationToken,
}

impl SessionTask {
    async fn run(mut self, mut pubsub: redis::aio::PubSub) {
        let mut subscribed: BTreeSet<String> = BTreeSet::new();

        loop {
            if !self.serve(&mut pubsub, &mut subscribed).await {
                break;
            }

            self.connected.store(false, Ordering::SeqCst);
            subscribed.clear();
            warn!("Redis pub/sub connection lost, reconnecting");

            match self.reconnect().await {
                Some(fresh) => pubsub = fresh,
                None => break,
            }

            self.connected.store(true, Ordering::SeqCst);
            info!("Redis pub/sub reconnected");
            if self.events_tx.send(TransportEvent::Reconnected).await.is_err() {
                break;
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        debug!("Redis pub/sub task exited");
    }

    /// Pump one connection; false when the task should exit, true on disconnect
    async fn serve(
        &mut self,
        pubsub: &mut redis::aio::PubSub,
        subscribed: &mut BTreeSet<String>,
    ) -> bool {
        loop {
            let step = {
                let mut stream = pubsub.on_message();
                tokio::select! {
                    _ = self.token.cancelled() => Step::Stop,
                    msg = stream.next() => match msg {
                        Some(msg) => Step::Message(
                            msg.get_channel_name().to_string(),
                            Bytes::copy_from_slice(msg.get_payload_bytes()),
                        ),
                        None => Step::Disconnected,
                    },
                    cmd = self.control_rx.recv() => match cmd {
                        Some(cmd) => Step::Control(cmd),
                        None => Step::Stop,
                    },
                }
            };

            match step {
                Step::Stop => return false,
                Step::Disconnected => return true,
                Step::Message(topic, payload) => {
                    let event = TransportEvent::Message { topic, payload };
                    if self.events_tx.send(event).await.is_err() {
                        return false;
                    }
                },
                Step::Control(Control::Subscribe(topics, reply)) => {
                    let fresh: Vec<String> = topics
                        .into_iter()
                        .filter(|t| !subscribed.contains(t))
                        .collect();
                    let result = if fresh.is_empty() {
                        Ok(())
                    } else {
                        pubsub.subscribe(&fresh).await.map_err(AlarmError::from)
                    };
                    if result.is_ok() {
                        debug!("Subscribed to {:?}", fresh);
                        subscribed.extend(fresh);
                    }
                    let _ = reply.send(result);
                },
                Step::Control(Control::Unsubscribe(topics, reply)) => {
                    let known: Vec<String> = topics
                        .into_iter()
                        .filter(|t| subscribed.contains(t))
                        .collect();
                    let result = if known.is_empty() {
                        Ok(())
                    } else {
                        pubsub.unsubscribe(&known).await.map_err(AlarmError::from)
                    };
                    if result.is_ok() {
                        debug!("Unsubscribed from {:?}", known);
                        for topic in &known {
                            subscribed.remove(topic);
                        }
                    }
                    let _ = reply.send(result);
                },
            }
        }
    }

    /// Retry until connected or cancelled
    async fn reconnect(&self) -> Option<redis::aio::PubSub> {
        let max_delay = Duration::from_millis(self.config.reconnect_max_delay_ms.max(1));
        let mut delay = Duration::from_millis(self.config.reconnect_delay_ms.max(1)).min(max_delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {},
            }

            match self.client.get_async_pubsub().await {
                Ok(pubsub) => return Some(pubsub),
                Err(e) => {
                    warn!("Redis reconnect failed: {}, next attempt in {:?}", e, delay);
                    delay = (delay * 2).min(max_delay);
                },
            }
        }
    }
}
