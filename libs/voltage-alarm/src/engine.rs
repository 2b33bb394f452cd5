//! Alarm engine lifecycle
//!
//! `AlarmEngine` is constructed explicitly by the owning service with its
//! transport, config source and log sink, then started once:
//!
//! 1. hydrate state from open log rows (optional)
//! 2. load rules and build the topic index
//! 3. connect the transport and subscribe the topic set
//! 4. spawn the transition shards and the consuming loop
//!
//! On `TransportEvent::Reconnected` the loop reloads rules and re-subscribes.
//! In-memory activation state is kept for rules still present in the reload.
//! A reload in progress is abandoned when the engine stops.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::RetryPolicy;

use crate::dispatcher::{ApplyOutcome, Dispatcher, TransitionWorker};
use crate::error::{AlarmError, Result};
use crate::loader::{ConfigLoader, RuleIndex};
use crate::logger::EventLogger;
use crate::router::MessageRouter;
use crate::state::StateStore;
use crate::subscriber::TopicSubscriber;
use crate::traits::{ConfigSource, LogSink, Transport, TransportEvent};

const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of transition shards
    pub workers: usize,
    /// Bounded queue length per shard
    pub queue_capacity: usize,
    /// Seed state from open log rows before subscribing
    pub hydrate_on_start: bool,
    /// Retry policy for log writes
    pub persist_retry: RetryPolicy,
    /// Retry policy for rule reloads after a reconnect
    pub reload_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            hydrate_on_start: true,
            persist_retry: RetryPolicy::default(),
            reload_retry: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 500,
                max_delay_ms: 10_000,
            },
        }
    }
}

struct RunningState {
    token: CancellationToken,
    handle: JoinHandle<()>,
    dispatcher: Arc<Dispatcher>,
}

pub struct AlarmEngine {
    transport: Arc<dyn Transport>,
    loader: Arc<ConfigLoader>,
    sink: Arc<dyn LogSink>,
    subscriber: Arc<TopicSubscriber>,
    router: Arc<MessageRouter>,
    state: Arc<StateStore>,
    config: EngineConfig,
    running: Mutex<Option<RunningState>>,
}

impl AlarmEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        config_source: Arc<dyn ConfigSource>,
        sink: Arc<dyn LogSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            subscriber: Arc::new(TopicSubscriber::new(Arc::clone(&transport))),
            transport,
            loader: Arc::new(ConfigLoader::new(config_source)),
            sink,
            router: Arc::new(MessageRouter::new(RuleIndex::default())),
            state: Arc::new(StateStore::new()),
            config,
            running: Mutex::new(None),
        }
    }

    /// Load rules, subscribe and begin consuming
    ///
    /// Rule-load and transport errors are returned; the engine stays stopped.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AlarmError::AlreadyRunning);
        }

        if self.config.hydrate_on_start {
            let open = self.sink.list_open_logs().await?;
            let seeded = self.state.hydrate(&open);
            info!("Hydrated {} active alarm states from open log rows", seeded);
        }

        let index = self.loader.load_all().await?;
        let topics = index.topics();
        let rule_count = index.rule_count();
        self.router.replace_index(index);

        let events = self.transport.connect().await?;
        if let Err(e) = self.subscriber.sync(&topics).await {
            self.subscriber.reset();
            if let Err(close_err) = self.transport.close().await {
                warn!("Transport close after failed subscribe: {}", close_err);
            }
            return Err(e);
        }

        let worker = Arc::new(TransitionWorker::new(
            Arc::clone(&self.state),
            EventLogger::new(Arc::clone(&self.sink), self.config.persist_retry),
        ));
        let dispatcher = Arc::new(Dispatcher::start(
            worker,
            self.config.workers,
            self.config.queue_capacity,
        ));

        let token = CancellationToken::new();
        let event_loop = EventLoop {
            loader: Arc::clone(&self.loader),
            subscriber: Arc::clone(&self.subscriber),
            router: Arc::clone(&self.router),
            state: Arc::clone(&self.state),
            dispatcher: Arc::clone(&dispatcher),
            reload_retry: self.config.reload_retry,
            token: token.clone(),
        };
        let handle = tokio::spawn(event_loop.run(events));

        *running = Some(RunningState {
            token,
            handle,
            dispatcher,
        });

        info!(
            "Alarm engine started: {} rules on {} topics",
            rule_count,
            topics.len()
        );
        Ok(())
    }

    /// Stop consuming, unsubscribe, drain queued transitions, close the transport
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            debug!("Alarm engine stop requested while not running");
            return Ok(());
        };

        running.token.cancel();
        let mut handle = running.handle;
        match tokio::time::timeout(LOOP_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Alarm event loop stopped"),
            Ok(Err(e)) => warn!("Alarm event loop task error: {}", e),
            Err(_) => {
                warn!("Alarm event loop stop timeout, aborting");
                handle.abort();
            },
        }

        if let Err(e) = self.subscriber.unsubscribe_all().await {
            warn!("Unsubscribe on stop failed: {}", e);
        }
        running.dispatcher.shutdown().await;
        self.transport.close().await?;

        info!("Alarm engine stopped");
        Ok(())
    }

    /// Route one message through the engine and wait for its transitions
    ///
    /// Same path as messages delivered by the transport.
    pub async fn process(&self, topic: &str, body: &[u8]) -> Result<Vec<ApplyOutcome>> {
        let dispatcher = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.dispatcher))
            .ok_or(AlarmError::NotRunning)?;

        let observations = self.router.route(topic, body);
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        dispatcher.dispatch_and_wait(observations).await
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Current rule snapshot
    pub fn rule_index(&self) -> Arc<RuleIndex> {
        self.router.index()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriber.topics()
    }
}

/// Single consuming loop over transport events
struct EventLoop {
    loader: Arc<ConfigLoader>,
    subscriber: Arc<TopicSubscriber>,
    router: Arc<MessageRouter>,
    state: Arc<StateStore>,
    dispatcher: Arc<Dispatcher>,
    reload_retry: RetryPolicy,
    token: CancellationToken,
}

impl EventLoop {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                event = events.recv() => match event {
                    Some(TransportEvent::Message { topic, payload }) => {
                        if !self.on_message(&topic, &payload).await {
                            break;
                        }
                    },
                    Some(TransportEvent::Reconnected) => tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = self.on_reconnect() => {},
                    },
                    None => {
                        warn!("Transport event stream closed");
                        break;
                    },
                },
            }
        }
        debug!("Alarm event loop exited");
    }

    /// False once the dispatcher no longer accepts work
    async fn on_message(&self, topic: &str, payload: &[u8]) -> bool {
        for obs in self.router.route(topic, payload) {
            if let Err(e) = self.dispatcher.dispatch(obs).await {
                error!("Dispatch failed on {}: {}", topic, e);
                return false;
            }
        }
        true
    }

    async fn on_reconnect(&self) {
        info!("Transport reconnected, reloading alarm rules");

        let loader: &ConfigLoader = &self.loader;
        let reloaded = self
            .reload_retry
            .run("reload alarm rules", move || loader.load_all(), AlarmError::is_transient)
            .await;
        match reloaded {
            Ok(index) => {
                let pruned = self.state.retain(|key| index.tracks(key));
                if pruned > 0 {
                    debug!("Dropped {} activation states of removed rules", pruned);
                }
                self.router.replace_index(index);
            },
            Err(e) => warn!("Alarm rule reload failed: {}, keeping previous rules", e),
        }

        self.subscriber.reset();
        let topics = self.router.index().topics();
        if let Err(e) = self.subscriber.sync(&topics).await {
            warn!("Re-subscribe after reconnect failed: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory_impl::{MemoryLogSink, StaticConfigSource};
    use crate::transport::MemoryTransport;
    use crate::types::{RuleConfig, RuleKind};

    fn direct_rule() -> RuleConfig {
        RuleConfig {
            id: 1,
            device_id: 1,
            topic: "dev/1".to_string(),
            key: "alarm".to_string(),
            name: "Door".to_string(),
            kind: RuleKind::Direct,
        }
    }

    fn engine(source: Arc<StaticConfigSource>) -> (AlarmEngine, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let engine = AlarmEngine::new(
            transport.clone(),
            source,
            Arc::new(MemoryLogSink::new()),
            EngineConfig::default(),
        );
        (engine, transport)
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert!(config.hydrate_on_start);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (engine, _transport) = engine(Arc::new(StaticConfigSource::new(vec![direct_rule()])));
        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(AlarmError::AlreadyRunning)));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_process_requires_running_engine() {
        let (engine, _transport) = engine(Arc::new(StaticConfigSource::new(vec![direct_rule()])));
        let err = engine.process("dev/1", br#"{"alarm": true}"#).await.unwrap_err();
        assert!(matches!(err, AlarmError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_failure_leaves_engine_stopped() {
        let source = Arc::new(StaticConfigSource::new(vec![direct_rule()]));
        source.fail_next_loads(1);
        let (engine, transport) = engine(source);

        assert!(engine.start().await.is_err());
        assert!(!engine.is_running().await);
        assert!(!transport.is_connected());

        engine.start().await.unwrap();
        assert_eq!(engine.subscribed_topics(), vec!["dev/1"]);
        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let (engine, _transport) = engine(Arc::new(StaticConfigSource::new(vec![])));
        engine.stop().await.unwrap();
    }
}
