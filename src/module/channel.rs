//! Per-bind duplex event channel
//!
//! A [`Channel`] is created for exactly one bind between a caller and a
//! component instance. Each side holds a [`ChannelEnd`]: listeners a side
//! registers with [`ChannelEnd::receive`] are invoked only when the *other*
//! side sends. Nothing is buffered, so an event sent before the peer
//! registers a listener for it is lost.
//!
//! When the bind ends the host closes the channel: both listener maps are
//! cleared and every later `send` is a no-op.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::utils::{isolate_panic, lock_unpoisoned};

/// Listener invoked with the arguments of a received event
pub type ChannelListener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Identity of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Which party of the bind an end belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSide {
    Caller,
    Component,
}

impl ChannelSide {
    pub fn peer(self) -> Self {
        match self {
            ChannelSide::Caller => ChannelSide::Component,
            ChannelSide::Component => ChannelSide::Caller,
        }
    }
}

struct ListenerEntry {
    id: ListenerId,
    listener: ChannelListener,
}

type ListenerMap = HashMap<String, Vec<ListenerEntry>>;

struct ChannelState {
    open: bool,
    next_listener_id: u64,
    caller: ListenerMap,
    component: ListenerMap,
}

impl ChannelState {
    fn listeners(&self, side: ChannelSide) -> &ListenerMap {
        match side {
            ChannelSide::Caller => &self.caller,
            ChannelSide::Component => &self.component,
        }
    }

    fn listeners_mut(&mut self, side: ChannelSide) -> &mut ListenerMap {
        match side {
            ChannelSide::Caller => &mut self.caller,
            ChannelSide::Component => &mut self.component,
        }
    }
}

struct ChannelShared {
    id: ChannelId,
    state: Mutex<ChannelState>,
}

/// Host-side owner of a bind's channel
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Create an open channel with no listeners
    pub fn new() -> Self {
        let shared = Arc::new(ChannelShared {
            id: ChannelId(Uuid::new_v4()),
            state: Mutex::new(ChannelState {
                open: true,
                next_listener_id: 0,
                caller: HashMap::new(),
                component: HashMap::new(),
            }),
        });
        Self { shared }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    /// End handed to the binder
    pub fn caller_end(&self) -> ChannelEnd {
        self.end(ChannelSide::Caller)
    }

    /// End handed to the component's `on_bind`
    pub fn component_end(&self) -> ChannelEnd {
        self.end(ChannelSide::Component)
    }

    fn end(&self, side: ChannelSide) -> ChannelEnd {
        ChannelEnd {
            shared: Arc::clone(&self.shared),
            side,
        }
    }

    pub fn is_open(&self) -> bool {
        lock_unpoisoned(&self.shared.state).open
    }

    /// Tear the channel down
    ///
    /// Idempotent. Listener maps are cleared so captured state is released.
    pub fn close(&self) {
        let mut state = lock_unpoisoned(&self.shared.state);
        if state.open {
            debug!("Closing channel {}", self.shared.id);
        }
        state.open = false;
        state.caller.clear();
        state.component.clear();
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// One party's handle on a channel
#[derive(Clone)]
pub struct ChannelEnd {
    shared: Arc<ChannelShared>,
    side: ChannelSide,
}

impl ChannelEnd {
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn side(&self) -> ChannelSide {
        self.side
    }

    pub fn is_open(&self) -> bool {
        lock_unpoisoned(&self.shared.state).open
    }

    /// Register a listener for events the peer sends under `event`
    ///
    /// On a closed channel the listener is dropped and never invoked.
    pub fn receive<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let event = event.into();
        let mut state = lock_unpoisoned(&self.shared.state);
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        if state.open {
            trace!("Channel {} {:?} listening for {}", self.shared.id, self.side, event);
            state
                .listeners_mut(self.side)
                .entry(event)
                .or_default()
                .push(ListenerEntry {
                    id,
                    listener: Arc::new(listener),
                });
        }
        id
    }

    /// Remove a listener previously registered on this end
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut state = lock_unpoisoned(&self.shared.state);
        let listeners = state.listeners_mut(self.side);
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Deliver an event to the peer's listeners, in registration order
    ///
    /// Returns the number of listeners invoked. Sending on a closed channel,
    /// or for an event the peer does not listen to, delivers nothing.
    pub fn send(&self, event: &str, args: &[Value]) -> usize {
        let listeners: Vec<ChannelListener> = {
            let state = lock_unpoisoned(&self.shared.state);
            if !state.open {
                trace!("Dropping {} on closed channel {}", event, self.shared.id);
                return 0;
            }
            match state.listeners(self.side.peer()).get(event) {
                Some(entries) => entries.iter().map(|e| Arc::clone(&e.listener)).collect(),
                None => return 0,
            }
        };

        let context = format!("channel {} listener for {}", self.shared.id, event);
        for listener in &listeners {
            isolate_panic(|| listener(args), &context);
        }
        listeners.len()
    }

    /// True if the peer listens for every name in `events`
    pub fn contains_on_another_side(&self, events: &[&str]) -> bool {
        let state = lock_unpoisoned(&self.shared.state);
        let peer = state.listeners(self.side.peer());
        events.iter().all(|event| peer.contains_key(*event))
    }

    /// Events this end currently listens for, sorted
    pub fn registered_events(&self) -> Vec<String> {
        let state = lock_unpoisoned(&self.shared.state);
        let mut events: Vec<String> = state.listeners(self.side).keys().cloned().collect();
        events.sort();
        events
    }
}

impl fmt::Debug for ChannelEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEnd")
            .field("id", &self.shared.id)
            .field("side", &self.side)
            .finish()
    }
}
