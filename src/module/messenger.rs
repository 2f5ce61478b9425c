//! Topic broadcast between components sharing one rendered screen
//!
//! The screen manager creates one [`Messenger`] per screen surface and hands
//! a clone to the screen's context and to every service bound from it. Components subscribe to named
//! topics and broadcast to all subscribers, their own subscriptions
//! included. Closing the messenger drops every subscription.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::utils::{isolate_panic, lock_unpoisoned};

pub type Subscriber = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct MessengerState {
    open: bool,
    next_id: u64,
    topics: BTreeMap<String, Vec<(SubscriptionId, Subscriber)>>,
}

/// Per-screen publish/subscribe hub
#[derive(Clone)]
pub struct Messenger {
    state: Arc<Mutex<MessengerState>>,
}

impl Messenger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MessengerState {
                open: true,
                next_id: 0,
                topics: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, subscriber: F) -> SubscriptionId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let mut state = lock_unpoisoned(&self.state);
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        if state.open {
            state
                .topics
                .entry(topic.into())
                .or_default()
                .push((id, Arc::new(subscriber)));
        }
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        let Some(subscribers) = state.topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            state.topics.remove(topic);
        }
        removed
    }

    /// Deliver `args` to every subscriber of `topic`
    ///
    /// Returns how many subscribers were invoked.
    pub fn broadcast(&self, topic: &str, args: &[Value]) -> usize {
        let subscribers: Vec<Subscriber> = {
            let state = lock_unpoisoned(&self.state);
            match state.topics.get(topic) {
                Some(subs) if state.open => subs.iter().map(|(_, s)| Arc::clone(s)).collect(),
                _ => return 0,
            }
        };
        trace!("Broadcasting {} to {} subscribers", topic, subscribers.len());
        let context = format!("messenger subscriber for {}", topic);
        for subscriber in &subscribers {
            isolate_panic(|| subscriber(args), &context);
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock_unpoisoned(&self.state)
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Drop all subscriptions; later broadcasts deliver nothing
    pub fn close(&self) {
        let mut state = lock_unpoisoned(&self.state);
        if state.open {
            debug!("Closing messenger with {} topics", state.topics.len());
        }
        state.open = false;
        state.topics.clear();
    }

    pub fn is_open(&self) -> bool {
        lock_unpoisoned(&self.state).open
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_unpoisoned(&self.state);
        f.debug_struct("Messenger")
            .field("open", &state.open)
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .finish()
    }
}
