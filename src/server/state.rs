//! Shared application state handed to every `axum` handler.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: ShutdownState,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.clone()));
        Self {
            config,
            registry,
            shutdown: ShutdownState::new(),
        }
    }
}
