//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::{ServiceConfig, StorageBackend};
use crate::error::{ServiceError, ServiceResult};
use crate::scheduler::DetectionScheduler;
use appetite_adapters::{FixtureSet, PgCollaborators};
use appetite_core::{Collaborators, InMemoryCollaborators};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Risk appetite service
pub struct Server {
    config: ServiceConfig,
    state: AppState,
}

/// Pick collaborators for the configured backend.
async fn build_collaborators(config: &ServiceConfig) -> ServiceResult<Collaborators> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let collaborators = InMemoryCollaborators::new();
            if let Some(path) = &config.storage.fixtures_path {
                FixtureSet::load(path)?.seed(&collaborators).await?;
            }
            Ok(collaborators.collaborators())
        }
        StorageBackend::Postgres => {
            let url = config.storage.database_url.as_deref().ok_or_else(|| {
                ServiceError::Config("postgres collaborators need storage.database_url".to_string())
            })?;
            let pg = Arc::new(PgCollaborators::connect(url, config.storage.max_connections).await?);
            pg.ensure_schema().await?;
            Ok(Collaborators {
                data: pg.clone(),
                alerts: pg.clone(),
                audit: pg.clone(),
                flags: pg,
            })
        }
    }
}

impl Server {
    /// Connect storage and collaborators, and wire the engine
    pub async fn new(config: ServiceConfig) -> ServiceResult<Self> {
        let storage_config = config.storage.storage_config()?;
        let storage = storage_config.bootstrap().await?;
        let collaborators = build_collaborators(&config).await?;

        let state = AppState::new(
            storage,
            collaborators,
            config.engine.engine_config(),
            storage_config.label(),
        );

        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server
    pub async fn run(self) -> ServiceResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(self.state.clone());
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("appetited listening on {}", addr);
        tracing::info!(storage = self.state.storage_backend, "Storage backend ready");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = DetectionScheduler::new(
            self.config.scheduler.clone(),
            self.state.engine.clone(),
        );
        let scheduler_handle = tokio::spawn(scheduler.start(shutdown_rx));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServiceError::Server(e.to_string()))?;

        tracing::info!("appetited shutting down");

        let _ = shutdown_tx.send(true);
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
