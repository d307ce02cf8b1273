//! `SessionRegistry`: the process-wide set of live sessions and the
//! admission policy gating new ones.
//!
//! Adapted from the teacher's `PtyRegistry`, stripped of reconnect/replay
//! bookkeeping (out of scope per §1 Non-goals: this bridge does not persist
//! sessions across reconnects) and narrowed to what admission control and
//! `once`-mode shutdown actually need: a live count and a rejection policy.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;

/// Why an admission attempt was refused, evaluated in the order listed in
/// §4.4 so the first applicable reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    OnceAlreadyServed,
    AtCapacity,
}

/// Process-wide registry of admitted sessions.
pub struct SessionRegistry {
    config: Arc<ServerConfig>,
    clients: Mutex<HashSet<u64>>,
    next_id: std::sync::atomic::AtomicU64,
    /// Set once the first `once`-mode session has been admitted, so a
    /// concurrent second connection is rejected even before that session's
    /// count is visible (closes a narrow admit/remove race).
    once_served: std::sync::atomic::AtomicBool,
}

impl SessionRegistry {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            clients: Mutex::new(HashSet::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
            once_served: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Evaluate admission policy and, if accepted, register the session and
    /// return its id. The origin/host check happens afterward, in
    /// `server::ws::handle_upgrade`, so that once-mode/capacity rejections
    /// take precedence per §4.4; this only enforces the count-based caps
    /// that require the registry's shared state.
    pub async fn admit(&self) -> Result<u64, AdmissionError> {
        if self.config.once
            && self
                .once_served
                .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(AdmissionError::OnceAlreadyServed);
        }

        let mut clients = self.clients.lock().await;
        if self.config.max_clients > 0 && clients.len() as u32 >= self.config.max_clients {
            if self.config.once {
                // Undo the reservation above; this wasn't a `once` rejection.
                self.once_served
                    .store(false, std::sync::atomic::Ordering::SeqCst);
            }
            return Err(AdmissionError::AtCapacity);
        }

        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        clients.insert(id);
        Ok(id)
    }

    /// Remove a session from the registry, returning the remaining count.
    pub async fn remove(&self, id: u64) -> usize {
        let mut clients = self.clients.lock().await;
        clients.remove(&id);
        clients.len()
    }

    pub async fn count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(once: bool, max_clients: u32) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            argv: vec!["cat".to_string()],
            credential: None,
            readonly: false,
            check_origin: false,
            once,
            max_clients,
            sig_code: 1,
            sig_name: "SIGHUP".to_string(),
            reconnect: 10,
            prefs_json: "{}".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            kill_grace: None,
        })
    }

    #[tokio::test]
    async fn admits_under_cap_and_rejects_at_cap() {
        let registry = SessionRegistry::new(config(false, 2));
        let a = registry.admit().await.unwrap();
        let _b = registry.admit().await.unwrap();
        assert_eq!(
            registry.admit().await.unwrap_err(),
            AdmissionError::AtCapacity
        );
        assert_eq!(registry.count().await, 2);

        registry.remove(a).await;
        assert_eq!(registry.count().await, 1);
        assert!(registry.admit().await.is_ok());
    }

    #[tokio::test]
    async fn once_mode_admits_exactly_one_session() {
        let registry = SessionRegistry::new(config(true, 0));
        let id = registry.admit().await.unwrap();
        assert_eq!(
            registry.admit().await.unwrap_err(),
            AdmissionError::OnceAlreadyServed
        );

        let remaining = registry.remove(id).await;
        assert_eq!(remaining, 0);
        // Once served and closed, no further sessions are ever admitted.
        assert_eq!(
            registry.admit().await.unwrap_err(),
            AdmissionError::OnceAlreadyServed
        );
    }

    #[tokio::test]
    async fn unlimited_max_clients_never_rejects_on_capacity() {
        let registry = SessionRegistry::new(config(false, 0));
        for _ in 0..50 {
            registry.admit().await.unwrap();
        }
        assert_eq!(registry.count().await, 50);
    }
}
