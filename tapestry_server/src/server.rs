use crate::routes;
use axum::routing::get;
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapestry_core::credentials::{
    CredentialStore, HttpConnectionBroker, OAuthStateSigner, SecretBox,
};
use tapestry_core::operations::{Operation, OperationBus};
use tapestry_core::store::Store;
use tapestry_core::sync::{Scheduler, SyncEngine};
use tapestry_core::webhooks::{SubscriptionManager, WebhookDispatcher};
use tapestry_core::{EngineConfig, IntegrationRegistry};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Keepalive period of the operation stream.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<IntegrationRegistry>,
    pub engine: Arc<SyncEngine>,
    pub dispatcher: WebhookDispatcher,
    pub bus: OperationBus,
    pub oauth_state: OAuthStateSigner,
    /// Outbound client shared with the engine; also used for OAuth code exchange.
    pub http: reqwest::Client,
    pub config: EngineConfig,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the engine, webhook intake and OAuth signer around `store`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<IntegrationRegistry>,
        secrets: &SecretBox,
        config: EngineConfig,
    ) -> tapestry_core::Result<Self> {
        config.validate()?;
        let http = config.http_client()?;
        let bus = OperationBus::new(config.operation_bus_capacity);

        let mut credentials = CredentialStore::new();
        if let Some(broker) = &config.broker {
            credentials = credentials.with_broker(Arc::new(HttpConnectionBroker::new(
                http.clone(),
                broker.url.clone(),
                broker.secret.clone(),
            )));
        }

        let mut engine = SyncEngine::new(store.clone(), registry.clone(), credentials, bus.clone())
            .with_http_client(http.clone())
            .with_max_concurrent_datasets(config.max_concurrent_datasets);
        match &config.public_base_url {
            Some(base) => {
                engine = engine.with_webhook_setup(SubscriptionManager::new(store.clone(), base.clone()));
            }
            None => tracing::info!("no public base url; webhook subscription setup disabled"),
        }

        let dispatcher =
            WebhookDispatcher::new(registry.clone(), store.clone(), engine.upserter().clone())
                .with_max_body_bytes(config.max_webhook_bytes);

        Ok(Self {
            store,
            registry,
            engine: Arc::new(engine),
            dispatcher,
            bus,
            oauth_state: OAuthStateSigner::new(secrets),
            http,
            config,
            started_at: Instant::now(),
        })
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let max_webhook_bytes = state.config.max_webhook_bytes;
    let state = Arc::new(state);
    let request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::router(max_webhook_bytes))
        .route("/health", get(routes::health::get_health))
        .layer(Extension(state))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Publish a `Ping` on `bus` every `period` until cancelled.
pub fn spawn_pinger(
    bus: OperationBus,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let receivers = bus.publish(Operation::Ping);
                    tracing::trace!(receivers, "operation stream ping");
                }
            }
        }
    })
}

#[tracing::instrument(level = "info", skip_all, fields(%addr))]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(vec![state.engine.clone()], state.config.sync_interval)?
        .run_on_startup(state.config.sync_on_startup)
        .start();
    let cancel = CancellationToken::new();
    let pinger = spawn_pinger(state.bus.clone(), PING_INTERVAL, cancel.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    if let Err(e) = pinger.await {
        tracing::warn!(error = %e, "operation stream pinger ended abnormally");
    }
    scheduler.stop().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
