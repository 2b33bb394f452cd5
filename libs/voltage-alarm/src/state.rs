//! In-memory activation state
//!
//! One tri-state per `StateKey`. Keys never observed read as `Unknown`.
//! All updates go through `compare_and_set`, which runs under the DashMap
//! shard lock, so a read-modify-write for one key is a single critical section.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::types::{ActivationState, LogEntry, StateKey};

#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<StateKey, ActivationState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> ActivationState {
        self.states.get(key).map(|s| *s).unwrap_or_default()
    }

    /// Replace `expected` with `new` atomically
    ///
    /// Returns false (and changes nothing) when the current state differs
    /// from `expected`. Storing `Unknown` removes the entry.
    pub fn compare_and_set(
        &self,
        key: StateKey,
        expected: ActivationState,
        new: ActivationState,
    ) -> bool {
        match self.states.entry(key) {
            Entry::Occupied(mut entry) => {
                if *entry.get() != expected {
                    return false;
                }
                if new == ActivationState::Unknown {
                    entry.remove();
                } else {
                    entry.insert(new);
                }
                true
            },
            Entry::Vacant(entry) => {
                if expected != ActivationState::Unknown {
                    return false;
                }
                if new != ActivationState::Unknown {
                    entry.insert(new);
                }
                true
            },
        }
    }

    /// Seed `Active` for every open log row; returns the number of keys seeded
    pub fn hydrate<'a>(&self, open_logs: impl IntoIterator<Item = &'a LogEntry>) -> usize {
        let mut seeded = 0;
        for log in open_logs.into_iter().filter(|l| l.is_open()) {
            debug!("Hydrating {} as active (log {})", log.key(), log.id);
            self.states.insert(log.key(), ActivationState::Active);
            seeded += 1;
        }
        seeded
    }

    /// Forget every key `keep` rejects; returns the number removed
    pub fn retain(&self, keep: impl Fn(&StateKey) -> bool) -> usize {
        let before = self.states.len();
        self.states.retain(|key, _| keep(key));
        before.saturating_sub(self.states.len())
    }

    /// Number of keys with a known state
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
