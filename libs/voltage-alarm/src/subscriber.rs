//! Transport subscription set
//!
//! Tracks which topics this engine has subscribed and brings the transport in
//! line with a new topic set by subscribing the additions and unsubscribing
//! the removals.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::traits::Transport;

pub struct TopicSubscriber {
    transport: Arc<dyn Transport>,
    subscribed: Mutex<BTreeSet<String>>,
}

impl TopicSubscriber {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subscribed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make the subscription set equal to `topics`
    pub async fn sync(&self, topics: &[String]) -> Result<()> {
        let wanted: BTreeSet<String> = topics.iter().cloned().collect();
        let (added, removed) = {
            let current = self.subscribed.lock();
            let added: Vec<String> = wanted.difference(&current).cloned().collect();
            let removed: Vec<String> = current.difference(&wanted).cloned().collect();
            (added, removed)
        };

        if added.is_empty() && removed.is_empty() {
            debug!("Subscriptions unchanged ({} topics)", wanted.len());
            return Ok(());
        }

        if !removed.is_empty() {
            self.transport.unsubscribe(&removed).await?;
            let mut current = self.subscribed.lock();
            for topic in &removed {
                current.remove(topic);
            }
        }

        if !added.is_empty() {
            self.transport.subscribe(&added).await?;
            self.subscribed.lock().extend(added.iter().cloned());
        }

        info!(
            "Subscriptions updated: +{} -{} ({} topics)",
            added.len(),
            removed.len(),
            wanted.len()
        );
        Ok(())
    }

    /// Forget the subscription set after the transport lost it
    pub fn reset(&self) {
        self.subscribed.lock().clear();
    }

    pub async fn unsubscribe_all(&self) -> Result<()> {
        let topics: Vec<String> = std::mem::take(&mut *self.subscribed.lock())
            .into_iter()
            .collect();
        if topics.is_empty() {
            return Ok(());
        }
        self.transport.unsubscribe(&topics).await?;
        info!("Unsubscribed from {} topics", topics.len());
        Ok(())
    }

    /// Currently subscribed topics, sorted
    pub fn topics(&self) -> Vec<String> {
        self.subscribed.lock().iter().cloned().collect()
    }
}
