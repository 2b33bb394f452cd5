//! Message routing
//!
//! Maps (topic, body) to per-key observations using the current rule index.
//! The body is decoded once per message; each rule is then evaluated on its
//! own, so a bad value for one rule never affects the others.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::evaluator::{evaluate, Evaluation};
use crate::extractor::{value_to_string, PayloadExtractor};
use crate::loader::RuleIndex;
use crate::types::StateKey;

/// Evaluated activation for one key, ready for the state transition
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: StateKey,
    pub active: bool,
    /// Stringified triggering value
    pub value: String,
    /// Custom name of the rule or bit
    pub label: String,
}

pub struct MessageRouter {
    index: RwLock<Arc<RuleIndex>>,
}

impl MessageRouter {
    pub fn new(index: RuleIndex) -> Self {
        Self {
            index: RwLock::new(Arc::new(index)),
        }
    }

    /// Swap in a freshly loaded snapshot
    pub fn replace_index(&self, index: RuleIndex) {
        *self.index.write() = Arc::new(index);
    }

    /// Current snapshot
    pub fn index(&self) -> Arc<RuleIndex> {
        Arc::clone(&self.index.read())
    }

    /// Observations produced by one message
    ///
    /// Unknown topics and undecodable bodies yield nothing.
    pub fn route(&self, topic: &str, body: &[u8]) -> Vec<Observation> {
        let index = self.index();
        let rules = index.rules_for(topic);
        if rules.is_empty() {
            trace!("No alarm rules for topic {}, message dropped", topic);
            return Vec::new();
        }

        let document = match PayloadExtractor::decode(body) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    "Undecodable message on {} ({} rules skipped): {}",
                    topic,
                    rules.len(),
                    e
                );
                return Vec::new();
            },
        };

        let mut observations = Vec::new();
        for rule in rules {
            let Some(value) = document.get(&rule.key) else {
                debug!("Rule {} key '{}' missing on {}, skipped", rule.id, rule.key, topic);
                continue;
            };

            match evaluate(rule, value) {
                Evaluation::Skipped(reason) => {
                    debug!(
                        "Rule {} value {} not usable ({:?}), skipped",
                        rule.id, value, reason
                    );
                },
                Evaluation::Flags(flags) => {
                    let value = value_to_string(value);
                    observations.extend(flags.into_iter().map(|flag| Observation {
                        key: flag.key,
                        active: flag.active,
                        value: value.clone(),
                        label: flag.label,
                    }));
                },
            }
        }
        observations
    }
}
