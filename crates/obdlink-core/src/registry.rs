//! Listener registry for state and data notifications.
//!
//! The registry itself is a plain single-threaded structure: it is owned by
//! the supervisor control task and only ever touched from there, so
//! observer-set mutation can never race with an in-flight notification.
//! Callers register and unregister through the supervisor handle, which
//! forwards the mutation as a message to the control task.

use std::collections::HashMap;
use std::sync::Arc;

use obdlink_types::{ConnectionState, ServiceState};
use tracing::trace;

/// Observer of service, connection and data events.
///
/// All methods default to no-ops so implementors only override what they
/// care about. Dispatch happens on the supervisor control task; callbacks
/// must not block.
pub trait StateListener: Send + Sync {
    fn on_service_state(&self, _state: ServiceState) {}
    fn on_connection_state(&self, _state: ConnectionState) {}
    fn on_data_received(&self, _payload: &str) {}
}

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Set of registered listeners with unique membership.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<ListenerId, Arc<dyn StateListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `id`. Re-adding an existing id is a no-op.
    pub fn add(&mut self, id: ListenerId, listener: Arc<dyn StateListener>) {
        self.listeners.entry(id).or_insert(listener);
    }

    /// Remove a listener. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    /// Drop all listeners (service teardown).
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify_service_state(&self, state: ServiceState) {
        trace!("notifying {} listener(s): service {}", self.len(), state);
        for listener in self.listeners.values() {
            listener.on_service_state(state);
        }
    }

    pub fn notify_connection_state(&self, state: ConnectionState) {
        trace!("notifying {} listener(s): connection {}", self.len(), state);
        for listener in self.listeners.values() {
            listener.on_connection_state(state);
        }
    }

    pub fn notify_data(&self, payload: &str) {
        for listener in self.listeners.values() {
            listener.on_data_received(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        connection: Mutex<Vec<ConnectionState>>,
        service: Mutex<Vec<ServiceState>>,
        data: Mutex<Vec<String>>,
    }

    impl StateListener for Recording {
        fn on_service_state(&self, state: ServiceState) {
            self.service.lock().unwrap().push(state);
        }
        fn on_connection_state(&self, state: ConnectionState) {
            self.connection.lock().unwrap().push(state);
        }
        fn on_data_received(&self, payload: &str) {
            self.data.lock().unwrap().push(payload.to_string());
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = ListenerRegistry::new();
        let listener = Arc::new(Recording::default());
        registry.add(ListenerId(1), listener.clone());
        registry.add(ListenerId(1), listener.clone());
        assert_eq!(registry.len(), 1);

        registry.notify_connection_state(ConnectionState::Connected);
        assert_eq!(listener.connection.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = ListenerRegistry::new();
        registry.remove(ListenerId(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_all_kinds() {
        let mut registry = ListenerRegistry::new();
        let listener = Arc::new(Recording::default());
        registry.add(ListenerId(1), listener.clone());

        registry.notify_service_state(ServiceState::Running);
        registry.notify_connection_state(ConnectionState::Offline);
        registry.notify_data("{\"mnemonic\":\"RPM\", \"value\":\"2500\", \"unit\":\"rpm\"}");

        assert_eq!(*listener.service.lock().unwrap(), vec![ServiceState::Running]);
        assert_eq!(
            *listener.connection.lock().unwrap(),
            vec![ConnectionState::Offline]
        );
        assert_eq!(listener.data.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_stops_dispatch() {
        let mut registry = ListenerRegistry::new();
        let listener = Arc::new(Recording::default());
        registry.add(ListenerId(1), listener.clone());
        registry.clear();

        registry.notify_connection_state(ConnectionState::Connected);
        assert!(listener.connection.lock().unwrap().is_empty());
    }
}
