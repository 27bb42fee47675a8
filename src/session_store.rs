//! Observable cache of the current auth session.
//!
//! SYSTEM CONTEXT
//! ==============
//! Screens read the session to decide what to render and register listeners
//! to react when it changes. The store never talks to the backend on reads;
//! it is fed once by a startup lookup and afterwards by the backend's
//! auth-change notifications.
//!
//! DESIGN
//! ======
//! One current-value slot plus a list of listener callbacks. Subscribing
//! replays the current value, then every publish reaches every listener in
//! registration order. Writes are last-write-wins with no staleness check.
//!
//! Replays and publishes are serialized by one dispatch lock, so a listener
//! always ends on the value `current()` reports. Listeners therefore must not
//! call `publish` or `subscribe` on the same store from inside the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::types::Session;

type Listener = Arc<dyn Fn(Option<&Session>) + Send + Sync>;

#[derive(Default)]
struct StoreInner {
    dispatch: Mutex<()>,
    current: Mutex<Option<Session>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Cheap-to-clone handle to the shared session cell.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Empty store with no backend wiring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store fed by `backend`: looks up the existing session, then follows
    /// auth-change notifications for the rest of the process.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(backend: Arc<dyn Backend>) -> Self {
        let store = Self::new();
        // Subscribe before the lookup so no transition slips between them.
        let mut changes = backend.auth_changes();
        let publisher = store.clone();
        tokio::spawn(async move {
            match backend.get_session().await {
                Ok(session) => publisher.publish(session),
                Err(e) => warn!(error = %e, "startup session lookup failed"),
            }
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(event = ?change.event, "auth state changed");
                        publisher.publish(change.session);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "session store lagged behind auth changes"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        store
    }

    /// Latest known session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        lock(&self.inner.current).clone()
    }

    /// True when a session is cached.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        lock(&self.inner.current).is_some()
    }

    /// Register `listener`. It is called with the current value right away
    /// and with every later value until the handle is dropped.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let _dispatch = lock(&self.inner.dispatch);
        let snapshot = {
            let current = lock(&self.inner.current);
            lock(&self.inner.listeners).push((id, Arc::clone(&listener)));
            current.clone()
        };
        listener(snapshot.as_ref());
        ListenerHandle { id, store: Arc::downgrade(&self.inner) }
    }

    /// Replace the cached value and notify every listener.
    pub fn publish(&self, session: Option<Session>) {
        let _dispatch = lock(&self.inner.dispatch);
        let listeners = {
            let mut current = lock(&self.inner.current);
            *current = session.clone();
            lock(&self.inner.listeners)
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>()
        };
        for listener in listeners {
            listener(session.as_ref());
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping the handle unsubscribes the listener"]
pub struct ListenerHandle {
    id: u64,
    store: Weak<StoreInner>,
}

impl ListenerHandle {
    /// Stop delivery to this listener.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            lock(&store.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Listeners run outside the data locks; a poisoned guard is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[path = "session_store_test.rs"]
mod tests;
