//! HTTP server wiring: shared state, router and graceful shutdown.

use crate::backend::{build_backend, ConversionBackend};
use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::orchestrator::{CancelHandle, CancelSignal, Orchestrator};
use crate::pipeline::upload::UploadLimits;
use crate::routes;
use crate::snapshot::SnapshotClient;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_SLACK_BYTES: u64 = 64 * 1024;

/// State shared by every request.
///
/// Built once at startup; everything request-scoped lives in the handlers.
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub snapshot: SnapshotClient,
    pub limits: UploadLimits,
    shutdown: CancelHandle,
}

impl AppState {
    /// Build the backend selected by `config` and the state around it.
    pub fn new(config: ServiceConfig) -> Result<Self, ConvertError> {
        let http = http_client(&config)?;
        let backend = build_backend(&config, http.clone())?;
        let orchestrator = Orchestrator::new(
            backend,
            config.poll,
            config.allowed_extensions.clone(),
        );
        Ok(Self::from_parts(config, orchestrator, http))
    }

    /// Build state around an existing backend.
    pub fn with_backend(config: ServiceConfig, backend: Arc<dyn ConversionBackend>) -> Result<Self, ConvertError> {
        let http = http_client(&config)?;
        let orchestrator = Orchestrator::new(
            backend,
            config.poll,
            config.allowed_extensions.clone(),
        );
        Ok(Self::from_parts(config, orchestrator, http))
    }

    /// Assemble state from a fully configured orchestrator.
    pub fn from_parts(config: ServiceConfig, orchestrator: Orchestrator, http: reqwest::Client) -> Self {
        let snapshot = SnapshotClient::new(
            http,
            config.snapshot_api_base.clone(),
            config.snapshot_api_key.clone(),
        );
        Self {
            limits: UploadLimits::from_config(&config),
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            snapshot,
            shutdown: CancelHandle::new(),
        }
    }

    /// Signal that fires when the server starts shutting down.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.shutdown.signal()
    }

    /// Ask in-flight conversions to stop at their next poll boundary.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn http_client(config: &ServiceConfig) -> Result<reqwest::Client, ConvertError> {
    reqwest::Client::builder()
        .timeout(config.api_timeout())
        .user_agent(concat!("doc2pdf/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConvertError::InvalidConfig(format!("HTTP client: {e}")))
}

fn cors_layer(origin: &str, methods: impl Into<AllowMethods>) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!("Ignoring unusable CORS origin '{}': {}", origin, e);
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .limits
        .max_bytes
        .saturating_add(MULTIPART_SLACK_BYTES)
        .min(usize::MAX as u64) as usize;

    let origin = state.config.cors_origin.as_str();

    // `OPTIONS` is answered in front of the CORS layer, which would otherwise
    // treat every `OPTIONS` as a browser preflight.
    let upload_routes = Router::new()
        .route(
            "/convert",
            post(routes::convert).fallback(routes::method_not_allowed),
        )
        .route(
            "/snapshot",
            post(routes::snapshot).fallback(routes::method_not_allowed),
        )
        .layer(cors_layer(origin, [Method::POST, Method::OPTIONS]))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::answer_options,
        ));

    let read_routes = Router::new()
        .route("/health", get(routes::health))
        .route(
            "/preview",
            get(routes::preview).fallback(routes::method_not_allowed),
        )
        .layer(cors_layer(origin, [Method::GET]));

    Router::new()
        .merge(upload_routes)
        .merge(read_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    serve_until(listener, state, shutdown_signal()).await
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
///
/// In-flight conversions are told to stop so draining does not wait out
/// their full poll budget.
pub async fn serve_until<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(
            "Listening on http://{} ({} backend)",
            addr,
            state.config.backend
        );
    }
    let app = router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down");
            state.begin_shutdown();
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
