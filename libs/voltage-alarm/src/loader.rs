//! Rule loading
//!
//! Reads every rule from the config source and groups them by topic. The
//! resulting `RuleIndex` is an immutable snapshot; reloads build a new one.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::ConfigSource;
use crate::types::{RuleConfig, RuleKind, StateKey, MAX_BIT_POSITION};

/// Topic -> rules snapshot
#[derive(Debug, Default, Clone)]
pub struct RuleIndex {
    by_topic: FxHashMap<String, Vec<Arc<RuleConfig>>>,
    keys: FxHashSet<StateKey>,
    rule_count: usize,
}

impl RuleIndex {
    /// Build an index, dropping rules and bits that cannot be evaluated
    pub fn build(rules: Vec<RuleConfig>) -> Self {
        let mut by_topic: FxHashMap<String, Vec<Arc<RuleConfig>>> = FxHashMap::default();
        let mut keys = FxHashSet::default();
        let mut rule_count = 0;

        for rule in rules {
            let Some(rule) = sanitize(rule) else {
                continue;
            };
            rule_count += 1;
            match &rule.kind {
                RuleKind::BitValue { bits } => {
                    keys.extend(bits.iter().map(|b| StateKey::bit(rule.id, b.position)));
                },
                _ => {
                    keys.insert(StateKey::rule(rule.id));
                },
            }
            by_topic
                .entry(rule.topic.clone())
                .or_default()
                .push(Arc::new(rule));
        }

        Self {
            by_topic,
            keys,
            rule_count,
        }
    }

    /// Rules listening on `topic`; empty when none are registered
    pub fn rules_for(&self, topic: &str) -> &[Arc<RuleConfig>] {
        self.by_topic.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Whether some rule in this snapshot evaluates `key`
    pub fn tracks(&self, key: &StateKey) -> bool {
        self.keys.contains(key)
    }

    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }
}

fn sanitize(mut rule: RuleConfig) -> Option<RuleConfig> {
    if rule.topic.trim().is_empty() {
        warn!("Rule {} '{}' has no topic, skipped", rule.id, rule.name);
        return None;
    }
    if rule.key.trim().is_empty() {
        warn!("Rule {} '{}' has no property key, skipped", rule.id, rule.name);
        return None;
    }

    if let RuleKind::BitValue { bits } = &mut rule.kind {
        let mut seen = FxHashSet::default();
        bits.retain(|bit| {
            if bit.position > MAX_BIT_POSITION {
                warn!(
                    "Rule {} bit rule {} has position {} outside 0-{}, skipped",
                    rule.id, bit.id, bit.position, MAX_BIT_POSITION
                );
                return false;
            }
            if !seen.insert(bit.position) {
                warn!(
                    "Rule {} defines bit {} more than once, keeping the first",
                    rule.id, bit.position
                );
                return false;
            }
            true
        });
        if bits.is_empty() {
            debug!("Rule {} has no bit rules configured", rule.id);
        }
    }

    Some(rule)
}

pub struct ConfigLoader {
    source: Arc<dyn ConfigSource>,
}

impl ConfigLoader {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    /// Load every rule and index it by topic; source errors propagate
    pub async fn load_all(&self) -> Result<RuleIndex> {
        let rules = self.source.list_rule_configs().await?;
        let index = RuleIndex::build(rules);
        info!(
            "Loaded {} alarm rules on {} topics",
            index.rule_count(),
            index.topic_count()
        );
        Ok(index)
    }
}
