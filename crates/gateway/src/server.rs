use std::{any::Any, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        middleware::from_fn_with_state,
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    serde_json::{Value, json},
    tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer},
    tracing::{error, info, warn},
};

use dealgate_config::DealgateConfig;

use crate::{
    bootstrap::{Bootstrap, BootstrapSettings},
    error::{ApiError, panic_message},
    gate,
    origin::enforce_origin,
    routes::RouteGroup,
    sqlite::SqliteConnector,
    state::GatewayState,
    ws::ws_upgrade_handler,
};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// Layers, outermost first: tracing, origin enforcement, panic boundary,
/// library CORS, routes. Health, root, test and realtime routes are never
/// gated; every [`RouteGroup`] is.
pub fn build_app(state: Arc<GatewayState>, groups: Vec<RouteGroup>) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/test", get(test_handler))
        .route("/ws", get(ws_upgrade_handler));

    for group in groups {
        let (prefix, group_router) = group.into_parts();
        let group_router = gate::gated(group_router, state.readiness.clone());
        router = if prefix == "/" {
            router.merge(group_router)
        } else {
            router.nest(&prefix, group_router)
        };
    }

    let origin = Arc::clone(&state.origin);
    router
        .layer(origin.cors_layer())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(origin, enforce_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-request fault boundary: a panicking handler fails only its request.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    error!(panic = %panic_message(&*payload), "request handler panicked");
    ApiError::Internal.into_response()
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Start the gateway against the configured SQLite store and serve until
/// Ctrl-C / SIGTERM.
pub async fn start_gateway(config: &DealgateConfig) -> anyhow::Result<()> {
    let connector = Arc::new(SqliteConnector::new(
        &config.store.url,
        config.store.max_connections,
    ));
    let gateway = Bootstrap::new(BootstrapSettings::from_config(config), connector)
        .start()
        .await?;
    gateway.serve_until(shutdown_signal()).await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C"),
            Err(e) => {
                warn!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal");
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_report(state: &GatewayState) -> Value {
    let readiness = state.readiness();
    let connections = state.realtime.count().await;
    json!({
        "status": if readiness.store_connected { "ok" } else { "degraded" },
        "storeConnected": readiness.store_connected,
        "listenerActive": readiness.listener_active,
        "version": state.version,
        "hostname": state.hostname,
        "connections": connections,
    })
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(health_report(&state).await)
}

async fn root_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let mut report = health_report(&state).await;
    report["message"] = json!("dealgate gateway");
    Json(report)
}

async fn test_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "message": "Test route working!",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "port": state.port,
    }))
}
