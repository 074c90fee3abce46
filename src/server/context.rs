//! Shared gateway context

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::GatewayConfig;
use crate::git::{GitOpError, RepositoryManager};
use crate::server::handler::OperationHandler;
use crate::server::protocol::capabilities;
use crate::transport::{ConfigCredentialStore, TransportSelector};

/// State handed to every WebSocket connection
#[derive(Clone)]
pub struct AppContext {
    pub handler: Arc<OperationHandler>,
    pub capabilities: Arc<Vec<String>>,
    pub idle_eviction: Option<Duration>,
}

impl AppContext {
    pub fn new(handler: Arc<OperationHandler>, idle_eviction: Option<Duration>) -> Self {
        Self {
            handler,
            capabilities: Arc::new(capabilities()),
            idle_eviction,
        }
    }

    /// Build the manager, credential store and handler described by `config`
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GitOpError> {
        let store = ConfigCredentialStore::new(config.credentials.clone());
        let selector = TransportSelector::new(Arc::new(store));
        let manager = RepositoryManager::new(
            &config.repositories.root,
            config.repositories.busy_mode,
            config.transport.clone(),
            selector,
        )?
        .with_worker_limit(config.operations.workers);
        info!(
            backend = %config.transport.backend,
            workers = config.operations.workers,
            timeout_secs = config.operations.timeout_secs,
            credentials = config.credentials.len(),
            "gateway context ready"
        );
        let handler = OperationHandler::new(Arc::new(manager), config.operation_timeout());
        Ok(Self::new(Arc::new(handler), config.idle_eviction()))
    }
}
