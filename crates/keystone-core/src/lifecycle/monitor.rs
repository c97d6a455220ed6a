use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::lifecycle::State;
use crate::registry::name::ComponentName;
use crate::registry::query::NameQuery;

/// Type for listener identifiers
pub type ListenerId = u64;

/// One observed state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub name: ComponentName,
    pub from: State,
    pub to: State,
    /// Kernel-wide transition counter, assigned when the transition happens
    pub sequence: u64,
}

/// Receives lifecycle transitions
pub trait LifecycleListener: Send + Sync {
    fn on_transition(&self, event: &LifecycleEvent);
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_transition(&self, event: &LifecycleEvent) {
        self(event)
    }
}

struct Registration {
    id: ListenerId,
    filter: Option<NameQuery>,
    listener: Arc<dyn LifecycleListener>,
}

/// Fans transitions out to registered listeners.
pub struct LifecycleMonitor {
    listeners: Mutex<Vec<Registration>>,
    next_listener_id: AtomicU64,
    sequence: AtomicU64,
}

impl LifecycleMonitor {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a listener, optionally restricted to components matching `filter`.
    pub async fn add_listener(&self, filter: Option<NameQuery>, listener: Arc<dyn LifecycleListener>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().await.push(Registration { id, filter, listener });
        id
    }

    /// Unregister a listener by its ID
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().await;
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Claims the next sequence number. Called while the new state is being
    /// written so numbering follows the order in which states become visible.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Delivers a transition to every listener whose filter matches.
    pub(crate) async fn notify(&self, event: &LifecycleEvent, interfaces: &BTreeSet<String>) {
        log::debug!("{}: {} -> {} (#{})", event.name, event.from, event.to, event.sequence);
        let listeners = self.listeners.lock().await;
        for registration in listeners.iter() {
            let wanted = registration
                .filter
                .as_ref()
                .is_none_or(|q| q.matches(&event.name, interfaces));
            if wanted {
                registration.listener.on_transition(event);
            }
        }
    }
}

impl Default for LifecycleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleMonitor")
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
