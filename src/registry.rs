//! Session registry: creates sessions and makes them discoverable by id.
//!
//! The registry is an ordinary owned value. Whoever embeds the bridge
//! constructs one (with a [`Connector`]) and passes references to the
//! components that need it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::config::SessionSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Connector, SessionHandle};

const SESSION_ID_PREFIX: &str = "session-";

/// Snapshot of one registered session, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    number: u64,
    handle: SessionHandle,
    created_at: SystemTime,
}

pub struct SessionRegistry<C: Connector> {
    connector: C,
    settings: SessionSettings,
    sessions: DashMap<String, SessionEntry>,
    next_number: AtomicU64,
    closed: AtomicBool,
}

impl<C: Connector> SessionRegistry<C> {
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
            sessions: DashMap::new(),
            next_number: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a backend, wrap it in a session and register it.
    ///
    /// Nothing is registered if the backend cannot be started.
    pub async fn create_session(&self) -> BridgeResult<(String, SessionHandle)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::RegistryClosed);
        }

        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}{}", SESSION_ID_PREFIX, number);

        debug!(target: "dap_bridge::registry", "[{}] Connecting to backend", id);
        let connection = self.connector.connect().await.inspect_err(|e| {
            warn!(
                target: "dap_bridge::registry",
                "[{}] Backend setup failed: {}",
                id,
                e
            );
        })?;

        let handle = SessionHandle::spawn(id.clone(), connection, &self.settings);
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                number,
                handle: handle.clone(),
                created_at: SystemTime::now(),
            },
        );

        // Checked after inserting: a shutdown that set the flag before this
        // load may have taken its snapshot without this entry.
        if self.closed.load(Ordering::SeqCst) {
            self.sessions.remove(&id);
            if let Err(e) = handle.stop(self.settings.stop_grace).await {
                debug!(target: "dap_bridge::registry", "[{}] {}", id, e);
            }
            return Err(BridgeError::RegistryClosed);
        }

        info!(target: "dap_bridge::registry", "[{}] Session created", id);
        Ok((id, handle))
    }

    /// Resolve an id to a live handle.
    pub fn lookup(&self, id: &str) -> BridgeResult<SessionHandle> {
        self.sessions
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    /// Registered sessions in creation order.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut entries: Vec<(u64, SessionInfo)> = self
            .sessions
            .iter()
            .map(|entry| {
                (
                    entry.number,
                    SessionInfo {
                        id: entry.key().clone(),
                        created_at: entry.created_at,
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(number, _)| *number);
        entries.into_iter().map(|(_, info)| info).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Unregister a session and stop it.
    pub async fn stop_session(&self, id: &str) -> BridgeResult<()> {
        let (_, entry) = self
            .sessions
            .remove(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        entry.handle.stop(self.settings.stop_grace).await
    }

    /// Stop every session in parallel under the global shutdown timeout and
    /// refuse new sessions from then on.
    ///
    /// Sessions still stopping when the timeout expires are abandoned; their
    /// backend processes are killed when their actors drop them.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<SessionHandle> = ids
            .iter()
            .filter_map(|id| self.sessions.remove(id).map(|(_, entry)| entry.handle))
            .collect();
        if handles.is_empty() {
            return;
        }

        let grace = self.settings.stop_grace;
        let mut join_set = tokio::task::JoinSet::new();
        for handle in handles {
            join_set.spawn(async move {
                debug!(
                    target: "dap_bridge::registry",
                    "[{}] Stopping session for shutdown",
                    handle.id()
                );
                if let Err(e) = handle.stop(grace).await {
                    debug!(target: "dap_bridge::registry", "[{}] {}", handle.id(), e);
                }
            });
        }

        let timeout = self.settings.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, drain_join_set(&mut join_set)).await;
        if drained.is_err() {
            warn!(
                target: "dap_bridge::registry",
                "Shutdown timed out after {:?} with {} session(s) still stopping",
                timeout,
                join_set.len()
            );
            join_set.abort_all();
        }
        info!(target: "dap_bridge::registry", "All sessions stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn connector(&self) -> &C {
        &self.connector
    }
}

/// Drains a JoinSet, logging any task panics.
async fn drain_join_set(join_set: &mut tokio::task::JoinSet<()>) {
    while let Some(result) = join_set.join_next().await {
        if let Err(e) = result {
            log::error!(target: "dap_bridge::registry", "Stop task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::BackendConnection;
    use crate::testing::{FakeBackend, FakeBackendHandle, FakeConnector};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Connector that holds every connect until the gate opens.
    #[derive(Default)]
    struct GatedConnector {
        gate: Arc<Notify>,
        backends: Mutex<Vec<FakeBackendHandle>>,
    }

    impl Connector for GatedConnector {
        async fn connect(&self) -> BridgeResult<BackendConnection> {
            self.gate.notified().await;
            let (connection, handle) = FakeBackend::new().spawn();
            self.backends.lock().unwrap().push(handle);
            Ok(connection)
        }
    }

    fn registry(connector: FakeConnector) -> SessionRegistry<FakeConnector> {
        let settings = SessionSettings {
            stop_grace: Duration::from_millis(200),
            ..SessionSettings::default()
        };
        SessionRegistry::new(connector, settings)
    }

    #[tokio::test]
    async fn ids_are_sequential_and_prefixed() {
        let registry = registry(FakeConnector::new(FakeBackend::new()));

        let (first, _) = registry.create_session().await.unwrap();
        let (second, _) = registry.create_session().await.unwrap();

        assert_eq!(first, "session-1");
        assert_eq!(second, "session-2");
        let listed: Vec<String> = registry.sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec!["session-1", "session-2"]);
    }

    #[tokio::test]
    async fn lookup_resolves_registered_handle() {
        let registry = registry(FakeConnector::new(
            FakeBackend::new().respond("threads", json!({"threads": []})),
        ));
        let (id, _) = registry.create_session().await.unwrap();

        let handle = registry.lookup(&id).unwrap();
        assert_eq!(handle.id(), id);

        assert!(matches!(
            registry.lookup("session-99"),
            Err(BridgeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_setup_registers_nothing() {
        let registry = registry(FakeConnector::failing());

        let err = registry.create_session().await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }), "got: {:?}", err);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_creation_yields_unique_ids() {
        let registry = Arc::new(registry(FakeConnector::new(FakeBackend::new())));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.spawn(async move { registry.create_session().await.map(|(id, _)| id) });
        }

        let mut ids = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            ids.insert(result.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(registry.len(), 16);
    }

    #[tokio::test]
    async fn stop_session_unregisters_and_stops() {
        let registry = registry(FakeConnector::new(
            FakeBackend::new().respond("disconnect", json!({})),
        ));
        let (id, handle) = registry.create_session().await.unwrap();

        registry.stop_session(&id).await.unwrap();

        assert!(handle.is_stopped());
        assert!(registry.lookup(&id).is_err());
        assert!(matches!(
            registry.stop_session(&id).await,
            Err(BridgeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_closes_registry() {
        let registry = registry(FakeConnector::new(
            FakeBackend::new().respond("disconnect", json!({})),
        ));
        let (_, first) = registry.create_session().await.unwrap();
        let (_, second) = registry.create_session().await.unwrap();

        registry.shutdown().await;

        assert!(first.is_stopped());
        assert!(second.is_stopped());
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(matches!(
            registry.create_session().await,
            Err(BridgeError::RegistryClosed)
        ));
        assert_eq!(registry.connector().backends().len(), 2);
    }

    #[tokio::test]
    async fn session_connected_during_shutdown_is_stopped_not_registered() {
        let connector = GatedConnector::default();
        let gate = Arc::clone(&connector.gate);
        let registry = Arc::new(SessionRegistry::new(
            connector,
            SessionSettings {
                stop_grace: Duration::from_millis(200),
                ..SessionSettings::default()
            },
        ));

        let creating = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.create_session().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        registry.shutdown().await;
        gate.notify_one();

        let result = creating.await.unwrap();
        assert!(matches!(result, Err(BridgeError::RegistryClosed)));
        assert!(registry.is_empty());

        let backends = registry.connector().backends.lock().unwrap().clone();
        assert_eq!(backends.len(), 1);
        assert!(
            backends[0]
                .requests()
                .iter()
                .any(|r| r.command == "disconnect"),
            "late session should have been stopped"
        );
    }
}
