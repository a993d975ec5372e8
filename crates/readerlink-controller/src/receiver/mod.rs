//! Receivers of connector notifications.
//!
//! A receiver is registered under an operation id in the [`ReceiverIndex`]
//! of a callback handler. Drain tasks look ids up and hand the data to the
//! matching receiver. The set of receivers is closed:
//!
//! | Receiver | Lifetime | Callers |
//! |----------|----------|---------|
//! | [`TagOperator`] | until its last caller is removed | one per logical reader |
//! | [`PortObservator`] | until its last caller is removed | one per logical reader |
//! | [`TagExecutor`] | one execution | exactly one |
//! | [`PortExecutor`] | one execution | exactly one |
//!
//! The index only holds weak references; the controller owns operators and
//! the running job owns executors. Every receiver carries a
//! [`Registration`] that removes its entry exactly once.

mod executor;
mod operator;

pub use executor::{PortExecutor, SharedErrorState, TagExecutor};
pub use operator::{PortObservator, TagOperator};

use crate::caller::SharedCaller;
use readerlink_core::{Port, Tag};
use readerlink_hardware::AnyConnector;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::warn;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Weak handle on a registered receiver.
#[derive(Debug, Clone)]
pub(crate) enum Receiver {
    TagOperator(Weak<TagOperator>),
    PortObservator(Weak<PortObservator>),
    TagExecutor(Weak<TagExecutor>),
    PortExecutor(Weak<PortExecutor>),
}

impl Receiver {
    /// Hand a tag to the receiver.
    ///
    /// Returns `false` if the receiver is gone or does not take tags.
    pub(crate) fn receive_tag(&self, tag: Tag) -> bool {
        match self {
            Self::TagOperator(operator) => match operator.upgrade() {
                Some(operator) => {
                    operator.receive(tag);
                    true
                }
                None => false,
            },
            Self::TagExecutor(executor) => match executor.upgrade() {
                Some(executor) => {
                    executor.receive(tag);
                    true
                }
                None => false,
            },
            Self::PortObservator(_) | Self::PortExecutor(_) => false,
        }
    }

    /// Hand a port event to the receiver.
    ///
    /// Returns `false` if the receiver is gone or does not take port events.
    pub(crate) fn receive_port(&self, port: Port) -> bool {
        match self {
            Self::PortObservator(observator) => match observator.upgrade() {
                Some(observator) => {
                    observator.receive(port);
                    true
                }
                None => false,
            },
            Self::PortExecutor(executor) => match executor.upgrade() {
                Some(executor) => {
                    executor.receive(port);
                    true
                }
                None => false,
            },
            Self::TagOperator(_) | Self::TagExecutor(_) => false,
        }
    }
}

/// Receivers by operation id.
#[derive(Debug, Default)]
pub(crate) struct ReceiverIndex {
    receivers: Mutex<HashMap<u32, Receiver>>,
}

impl ReceiverIndex {
    /// Register `receiver` under `id`. An occupied id is left untouched and
    /// `false` is returned.
    pub(crate) fn add(&self, id: u32, receiver: Receiver) -> bool {
        match lock(&self.receivers).entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(receiver);
                true
            }
        }
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        lock(&self.receivers).contains_key(&id)
    }

    pub(crate) fn remove(&self, id: u32) -> bool {
        lock(&self.receivers).remove(&id).is_some()
    }

    pub(crate) fn get(&self, id: u32) -> Option<Receiver> {
        lock(&self.receivers).get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.receivers).len()
    }
}

/// Entry of a receiver in the index, removed exactly once.
///
/// Removal happens on the first call to [`Registration::remove`] or when the
/// registration is dropped, whichever comes first. A registration whose id
/// was already taken starts out removed and never touches the other entry.
#[derive(Debug)]
pub(crate) struct Registration {
    id: u32,
    index: Arc<ReceiverIndex>,
    removed: AtomicBool,
}

impl Registration {
    pub(crate) fn new(index: Arc<ReceiverIndex>, id: u32, receiver: Receiver) -> Self {
        let added = index.add(id, receiver);
        if !added {
            warn!("Receiver id {} is already registered", id);
        }
        Self {
            id,
            index,
            removed: AtomicBool::new(!added),
        }
    }

    /// Whether this registration currently owns its index entry.
    pub(crate) fn is_registered(&self) -> bool {
        !self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn remove(&self) {
        if !self.removed.swap(true, Ordering::AcqRel) {
            self.index.remove(self.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.remove();
    }
}

/// What every receiver needs from its controller.
#[derive(Debug, Clone)]
pub(crate) struct ReceiverContext {
    /// Controller name passed to callers.
    pub(crate) controller: Arc<str>,

    pub(crate) connector: Arc<tokio::sync::Mutex<AnyConnector>>,

    pub(crate) index: Arc<ReceiverIndex>,
}

/// Callers of an operator by logical reader name, plus its active flag.
pub(crate) struct CallerSet<T> {
    callers: Mutex<HashMap<String, SharedCaller<T>>>,
    active: AtomicBool,
}

impl<T: Clone> CallerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            callers: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
        }
    }

    /// Add or replace the caller of `name`.
    pub(crate) fn insert(&self, name: &str, caller: SharedCaller<T>) {
        lock(&self.callers).insert(name.to_string(), caller);
    }

    /// Remove the caller of `name`, returning how many remain.
    pub(crate) fn remove(&self, name: &str) -> usize {
        let mut callers = lock(&self.callers);
        callers.remove(name);
        callers.len()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.callers).keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Set the active flag, returning the previous value.
    pub(crate) fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel)
    }

    /// Invoke every caller with its own copy of `data`.
    ///
    /// A failing caller is logged and the remaining callers still run.
    pub(crate) fn deliver(&self, id: u32, data: T, controller: &str) {
        let callers: Vec<(String, SharedCaller<T>)> = lock(&self.callers)
            .iter()
            .map(|(name, caller)| (name.clone(), caller.clone()))
            .collect();

        for (name, caller) in callers {
            if let Err(e) = caller.invoke(data.clone(), controller) {
                warn!(
                    "Caller {} of operation {} on {} failed: {}",
                    name, id, controller, e
                );
            }
        }
    }
}

impl<T> std::fmt::Debug for CallerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = lock(&self.callers).keys().cloned().collect();
        names.sort();
        f.debug_struct("CallerSet")
            .field("callers", &names)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}
