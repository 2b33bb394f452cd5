//! Per-key serialized transition workers
//!
//! Observations are sharded by `StateKey` hash onto single-writer queues, so
//! the read-compare-set plus log write for one key always runs on one worker
//! in arrival order. Different keys proceed in parallel on other shards.
//!
//! ```text
//! router ──► hash(key) % N ──► [queue 0] ──► worker 0 ─┐
//!                         └──► [queue 1] ──► worker 1 ─┼──► StateStore + EventLogger
//!                         └──► [queue N] ──► worker N ─┘
//! ```

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AlarmError, Result};
use crate::logger::EventLogger;
use crate::router::Observation;
use crate::state::StateStore;
use crate::types::{ActivationState, LogAction, StateKey};

/// What applying one observation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State did not change
    Unchanged,
    /// First observation was inactive; recorded without a log row
    Baseline,
    /// Became active; `None` when an existing open row was adopted
    Activated { log_id: Option<i64> },
    /// Became inactive; `None` when no open row existed
    Cleared { log_id: Option<i64> },
    /// Log write failed; state restored to its previous value
    RolledBack,
}

/// Applies observations to the state store and the activation log
pub struct TransitionWorker {
    state: Arc<StateStore>,
    logger: EventLogger,
}

impl TransitionWorker {
    pub fn new(state: Arc<StateStore>, logger: EventLogger) -> Self {
        Self { state, logger }
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub async fn apply(&self, obs: &Observation) -> ApplyOutcome {
        let prev = self.state.get(&obs.key);
        let (next, action) = prev.advance(obs.active);
        if next == prev {
            return ApplyOutcome::Unchanged;
        }

        if !self.state.compare_and_set(obs.key, prev, next) {
            // Only possible if two writers share a key
            warn!("Concurrent state change on {}, observation ignored", obs.key);
            return ApplyOutcome::Unchanged;
        }

        match action {
            None => {
                debug!("{} baseline recorded as {:?}", obs.key, next);
                ApplyOutcome::Baseline
            },
            Some(LogAction::Open) => match self.logger.open(obs.key, &obs.label, &obs.value).await {
                Ok(log_id) => ApplyOutcome::Activated { log_id },
                Err(e) => self.rollback(obs.key, next, prev, &e),
            },
            Some(LogAction::Close) => match self.logger.close(obs.key, &obs.label).await {
                Ok(log_id) => ApplyOutcome::Cleared { log_id },
                Err(e) => self.rollback(obs.key, next, prev, &e),
            },
        }
    }

    fn rollback(
        &self,
        key: StateKey,
        current: ActivationState,
        prev: ActivationState,
        err: &AlarmError,
    ) -> ApplyOutcome {
        warn!(
            "Persisting {:?} for {} failed: {}, state rolled back to {:?}",
            current, key, err, prev
        );
        if !self.state.compare_and_set(key, current, prev) {
            warn!("State of {} changed during rollback", key);
        }
        ApplyOutcome::RolledBack
    }
}

struct Job {
    obs: Observation,
    ack: Option<oneshot::Sender<ApplyOutcome>>,
}

/// Hash-sharded worker pool
pub struct Dispatcher {
    senders: RwLock<Option<Vec<mpsc::Sender<Job>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `workers` shards with bounded queues of `queue_capacity`
    pub fn start(worker: Arc<TransitionWorker>, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity.max(1));
            let worker = Arc::clone(&worker);
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let outcome = worker.apply(&job.obs).await;
                    if let Some(ack) = job.ack {
                        let _ = ack.send(outcome);
                    }
                }
                debug!("Transition shard {} drained", shard);
            }));
            senders.push(tx);
        }

        info!("Transition dispatcher started with {} shards", workers);
        Self {
            senders: RwLock::new(Some(senders)),
            handles: Mutex::new(handles),
        }
    }

    fn sender_for(&self, key: &StateKey) -> Result<mpsc::Sender<Job>> {
        let guard = self.senders.read();
        let senders = guard.as_ref().ok_or(AlarmError::NotRunning)?;
        Ok(senders[shard_of(key, senders.len())].clone())
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        let tx = self.sender_for(&job.obs.key)?;
        tx.send(job).await.map_err(|_| AlarmError::NotRunning)
    }

    /// Queue an observation without waiting for it to be applied
    pub async fn dispatch(&self, obs: Observation) -> Result<()> {
        self.enqueue(Job { obs, ack: None }).await
    }

    /// Queue observations and wait for every outcome, in input order
    pub async fn dispatch_and_wait(
        &self,
        observations: Vec<Observation>,
    ) -> Result<Vec<ApplyOutcome>> {
        let mut pending = Vec::with_capacity(observations.len());
        for obs in observations {
            let (ack_tx, ack_rx) = oneshot::channel();
            self.enqueue(Job {
                obs,
                ack: Some(ack_tx),
            })
            .await?;
            pending.push(ack_rx);
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for ack in pending {
            outcomes.push(ack.await.map_err(|_| AlarmError::NotRunning)?);
        }
        Ok(outcomes)
    }

    /// Close the queues and wait for queued work to finish
    pub async fn shutdown(&self) {
        // Dropping the senders lets each worker drain and exit
        drop(self.senders.write().take());

        let handles = std::mem::take(&mut *self.handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Transition worker failed: {}", e);
            }
        }
        info!("Transition dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.senders.read().is_some()
    }
}

fn shard_of(key: &StateKey, shards: usize) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}
