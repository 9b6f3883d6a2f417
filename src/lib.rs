pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pacer;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod wa;

use std::sync::Arc;

use anyhow::Context;
use tokio::time::Duration;

use crate::{
    app::{AppState, build_router},
    auth::{AuthStateStore, RemoteStore, S3RemoteStore},
    config::Config,
    registry::{RegistrationPolicy, RegistryClient, WorkerIdentity},
    session::{EngineSettings, SessionManager},
    wa::WaSocketFactory,
};

/// Starts the worker runtime with the given protocol adapter.
///
/// Returns once graceful shutdown completed. Initialization order: storage,
/// engine, registry, HTTP; teardown runs in reverse after the HTTP server
/// stopped accepting requests.
pub async fn run(factory: Arc<dyn WaSocketFactory>) -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        worker_id = %config.worker_id,
        bind_addr = %config.bind_addr,
        max_sessions = config.max_sessions,
        backend = config.backend_enabled(),
        "starting whatsam-worker"
    );

    if config.backend_enabled() && config.worker_auth_token.is_none() {
        tracing::error!("WORKER_AUTH_TOKEN is not set; backend calls will be rejected");
    }

    // Storage first: the engine and recovery both sit on top of it.
    let remote: Option<Arc<dyn RemoteStore>> = match &config.object_store {
        Some(store_config) => {
            let store = S3RemoteStore::connect(store_config)
                .context("object store configuration invalid")?;
            tracing::info!(endpoint = %store_config.endpoint, "object store connected");
            Some(Arc::new(store))
        }
        None => {
            tracing::warn!("object store not configured; auth persistence is local-only");
            None
        }
    };
    let auth = Arc::new(AuthStateStore::new(config.session_path.clone(), remote));

    let settings = EngineSettings {
        max_qr_attempts: config.max_qr_attempts,
        qr_timeout: config.qr_timeout,
        reconnect_interval: config.reconnect_interval,
        max_reconnect_attempts: config.max_reconnect_attempts,
        ..EngineSettings::default()
    };
    let manager = SessionManager::new(auth.clone(), factory, settings);

    let registry = if config.backend_enabled() {
        let base_url = config.backend_url.clone().expect("checked by backend_enabled");
        let identity = WorkerIdentity {
            worker_id: config.worker_id.clone(),
            endpoint: config.worker_endpoint.clone(),
            max_sessions: config.max_sessions,
            environment: config.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            description: "whatsam gateway worker".to_owned(),
        };
        let policy = RegistrationPolicy {
            max_retries: config.max_registration_retries,
            retry_interval: config.registration_retry_interval,
            startup_delay: config.worker_startup_delay,
        };
        Some(Arc::new(RegistryClient::new(
            base_url,
            config.worker_auth_token.clone().unwrap_or_default(),
            identity,
            policy,
        )))
    } else {
        tracing::info!("running standalone, backend registration disabled");
        None
    };

    let state = AppState::new(manager.clone(), auth.clone(), registry.clone(), config.clone());
    let started_at = state.started_at();

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    state.set_ready(true);

    // Registration and recovery run after the server is listening so the
    // backend can reach the advertised endpoint immediately.
    let mut background = Vec::new();
    if let Some(registry) = registry.clone() {
        let manager = manager.clone();
        let auth = auth.clone();
        let config = config.clone();
        background.push(tokio::spawn(async move {
            match registry.register_with_retry().await {
                Ok(response) => {
                    let _ = registry.spawn_heartbeat(
                        manager.clone(),
                        config.heartbeat_interval,
                        started_at,
                    );
                    let _ = registry.spawn_event_pump(manager.subscribe());

                    if response.recovery_required && config.recovery_enabled {
                        recovery::run_recovery(
                            &manager,
                            &registry,
                            &auth,
                            config.recovery_startup_delay,
                        )
                        .await;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "registration exhausted retries, continuing unregistered");
                }
            }
        }));
    }

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown sequence: the server stopped accepting above; preserve
    // sessions, leave the backend, then tear the engine down.
    tracing::info!("shutting down");
    state.set_ready(false);
    for task in background {
        task.abort();
    }

    recovery::preserve_sessions(&manager, &auth, registry.as_ref()).await;
    if let Some(registry) = &registry {
        registry.unregister().await;
    }
    manager.shutdown_all().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Completes on the first SIGINT/SIGTERM. Later signals are swallowed by the
/// installed handlers, so a second one cannot interrupt the teardown.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
    // Give in-flight webhook posts a beat before the server drains.
    tokio::time::sleep(Duration::from_millis(50)).await;
}
