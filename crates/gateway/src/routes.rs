use std::sync::Arc;

use {
    axum::{Json, Router, extract::State, routing::get},
    serde_json::{Value, json},
};

use crate::{error::ApiError, state::GatewayState};

/// Route groups mounted by default, each under `/api/<name>`.
pub const DEFAULT_GROUPS: &[&str] = &["auth", "deals", "flash-orders"];

/// A data-dependent route group. The server mounts every group behind the
/// request gate; there is no way to mount one without it.
pub struct RouteGroup {
    prefix: String,
    router: Router<Arc<GatewayState>>,
}

impl RouteGroup {
    pub fn new(prefix: impl AsRef<str>, router: Router<Arc<GatewayState>>) -> Self {
        let prefix = format!("/{}", prefix.as_ref().trim_matches('/'));
        Self { prefix, router }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn into_parts(self) -> (String, Router<Arc<GatewayState>>) {
        (self.prefix, self.router)
    }
}

pub fn default_groups() -> Vec<RouteGroup> {
    DEFAULT_GROUPS
        .iter()
        .map(|&name| RouteGroup::new(format!("api/{name}"), status_router(name)))
        .collect()
}

fn status_router(group: &'static str) -> Router<Arc<GatewayState>> {
    Router::new().route(
        "/status",
        get(move |State(state): State<Arc<GatewayState>>| group_status(state, group)),
    )
}

async fn group_status(state: Arc<GatewayState>, group: &'static str) -> Result<Json<Value>, ApiError> {
    let store = state.store().ok_or(ApiError::StoreNotReady)?;
    store.ping().await?;
    Ok(Json(json!({ "group": group, "store": "ok" })))
}
