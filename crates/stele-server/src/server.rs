use std::sync::Arc;

use stele_backend::BackendRegistry;
use stele_forward::{Forwarder, HttpDelivery};
use stele_store::{ForwardSink, StatementStore};
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{AllowAll, AuthProvider, StaticCredentials};
use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StatementStore>,
    pub auth: Arc<dyn AuthProvider>,
}

/// The Stele LRS server.
pub struct SteleServer {
    config: Config,
}

impl SteleServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve configuration into running components.
    ///
    /// Must run inside a tokio runtime when forwarding targets are
    /// configured. The returned forwarder, when present, outlives the
    /// server and is shut down after it stops.
    pub fn build(&self) -> ServerResult<(AppState, Option<Arc<Forwarder>>)> {
        let backend = BackendRegistry::with_defaults().build(&self.config.backend)?;

        let forwarder = if self.config.forwarding.targets.is_empty() {
            None
        } else {
            let delivery = Arc::new(HttpDelivery::new()?);
            Some(Arc::new(Forwarder::start(
                self.config.forwarding.targets.clone(),
                delivery,
            )?))
        };

        let mut store = StatementStore::new(
            backend,
            self.config.authority.to_authority(),
            self.config.limits,
        );
        if let Some(forwarder) = &forwarder {
            store = store.with_forwarding(forwarder.clone() as Arc<dyn ForwardSink>);
        }

        let auth: Arc<dyn AuthProvider> = if self.config.auth.users.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(StaticCredentials::new(self.config.auth.users.clone()))
        };

        Ok((
            AppState {
                store: Arc::new(store),
                auth,
            },
            forwarder,
        ))
    }

    /// Bind and serve until the listener fails.
    pub async fn serve(self) -> ServerResult<()> {
        self.config.validate()?;
        let (state, forwarder) = self.build()?;
        let app = build_router(state.clone());

        let listener = TcpListener::bind(&self.config.server.bind_addr).await?;
        info!(
            addr = %self.config.server.bind_addr,
            backend = state.store.backend_name(),
            "stele server listening"
        );
        let result = axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        if let Some(forwarder) = forwarder {
            forwarder.shutdown().await;
        }
        result
    }
}
