//! Observable host state
//!
//! A [`Monitorable`] is a single value owned by a host subsystem (robot
//! pose, servo state, program state) that any number of component contexts
//! observe. Every update notifies every registered observer, in
//! registration order, with the new value.
//!
//! Observers are keyed by `(ContextId, callback)` pairs. The same callback
//! registered under two contexts is two observers; unregistering one leaves
//! the other firing. Contexts must unregister before they are destroyed.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::module::traits::ContextId;
use crate::utils::{isolate_panic, lock_unpoisoned};

pub type MonitorCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct MonitorState<T> {
    value: T,
    prev_value: Option<T>,
    observers: Vec<(ContextId, MonitorCallback<T>)>,
}

/// Reactive single-value cell
pub struct Monitorable<T> {
    name: String,
    state: Mutex<MonitorState<T>>,
}

/// Compare callbacks by the address of their closure data
fn same_callback<T>(a: &MonitorCallback<T>, b: &MonitorCallback<T>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

impl<T: Clone + Send + 'static> Monitorable<T> {
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MonitorState {
                value: initial,
                prev_value: None,
                observers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> T {
        lock_unpoisoned(&self.state).value.clone()
    }

    /// Value before the most recent `set`, `None` until the first update
    pub fn prev_value(&self) -> Option<T> {
        lock_unpoisoned(&self.state).prev_value.clone()
    }

    /// Add an observer owned by `context`
    ///
    /// With `callback_after_register` the callback is invoked once,
    /// synchronously, with the current value before this returns.
    pub fn register(
        &self,
        context: ContextId,
        callback: MonitorCallback<T>,
        callback_after_register: bool,
    ) {
        let current = {
            let mut state = lock_unpoisoned(&self.state);
            state.observers.push((context, Arc::clone(&callback)));
            callback_after_register.then(|| state.value.clone())
        };
        if let Some(value) = current {
            let context = format!("{} initial callback", self.name);
            isolate_panic(|| callback(&value), &context);
        }
    }

    /// Remove the observer registered as exactly `(context, callback)`
    ///
    /// Only the first matching pair is removed.
    pub fn unregister(&self, context: ContextId, callback: &MonitorCallback<T>) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        let position = state
            .observers
            .iter()
            .position(|(ctx, cb)| *ctx == context && same_callback(cb, callback));
        match position {
            Some(index) => {
                state.observers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every observer owned by `context`, returning how many
    pub fn unregister_context(&self, context: ContextId) -> usize {
        let mut state = lock_unpoisoned(&self.state);
        let before = state.observers.len();
        state.observers.retain(|(ctx, _)| *ctx != context);
        before - state.observers.len()
    }

    /// Replace the value and notify every observer
    ///
    /// Observers added during the round are not called until the next one.
    pub fn set(&self, value: T) {
        let observers: Vec<MonitorCallback<T>> = {
            let mut state = lock_unpoisoned(&self.state);
            let previous = std::mem::replace(&mut state.value, value.clone());
            state.prev_value = Some(previous);
            state.observers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        trace!("{} changed, notifying {} observers", self.name, observers.len());
        let context = format!("{} observer", self.name);
        for observer in &observers {
            isolate_panic(|| observer(&value), &context);
        }
    }

    pub fn observer_count(&self) -> usize {
        lock_unpoisoned(&self.state).observers.len()
    }
}

impl<T> fmt::Debug for Monitorable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitorable").field("name", &self.name).finish()
    }
}

/// Publishes into a [`Monitorable`] only while the consumer is visible
///
/// While hidden the latest value is held back. Becoming visible again
/// publishes it, so observers see the newest state immediately.
pub struct PublishGate<T> {
    target: Arc<Monitorable<T>>,
    inner: Mutex<GateState<T>>,
}

struct GateState<T> {
    visible: bool,
    pending: Option<T>,
}

impl<T: Clone + Send + 'static> PublishGate<T> {
    pub fn new(target: Arc<Monitorable<T>>, visible: bool) -> Self {
        Self {
            target,
            inner: Mutex::new(GateState {
                visible,
                pending: None,
            }),
        }
    }

    pub fn target(&self) -> &Arc<Monitorable<T>> {
        &self.target
    }

    pub fn is_visible(&self) -> bool {
        lock_unpoisoned(&self.inner).visible
    }

    /// Publish now if visible, otherwise hold as the pending value
    pub fn publish(&self, value: T) {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            if !inner.visible {
                inner.pending = Some(value);
                return;
            }
        }
        self.target.set(value);
    }

    pub fn set_visible(&self, visible: bool) {
        let pending = {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.visible = visible;
            if visible {
                inner.pending.take()
            } else {
                None
            }
        };
        if let Some(value) = pending {
            self.target.set(value);
        }
    }
}
