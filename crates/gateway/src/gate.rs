//! Request gate for data-dependent route groups.

use {
    axum::{
        Router,
        extract::{Request, State},
        middleware::{Next, from_fn_with_state},
        response::{IntoResponse, Response},
    },
    tracing::debug,
};

use crate::{
    error::ApiError,
    readiness::{Readiness, ReadinessState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    StoreNotReady,
}

/// Pure gate decision; depends on nothing but the snapshot.
pub fn decide(snapshot: ReadinessState) -> GateDecision {
    if snapshot.store_connected {
        GateDecision::Pass
    } else {
        GateDecision::StoreNotReady
    }
}

/// Short-circuit with 503 until the store is connected. Never waits, never
/// retries; the client decides when to try again.
pub async fn require_store(
    State(readiness): State<Readiness>,
    req: Request,
    next: Next,
) -> Response {
    match decide(readiness.snapshot()) {
        GateDecision::Pass => next.run(req).await,
        GateDecision::StoreNotReady => {
            debug!(method = %req.method(), path = %req.uri().path(), "store not ready, request gated");
            ApiError::StoreNotReady.into_response()
        },
    }
}

/// Wrap every route of `router` in [`require_store`].
pub fn gated<S>(router: Router<S>, readiness: Readiness) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(from_fn_with_state(readiness, require_store))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        axum::{
            body::{Body, to_bytes},
            http::{Request as HttpRequest, StatusCode},
            routing::get,
        },
        tower::ServiceExt,
    };

    use {super::*, crate::readiness};

    fn spy_router(calls: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/deals",
            get(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "deals"
                }
            }),
        )
    }

    fn get_deals() -> HttpRequest<Body> {
        HttpRequest::get("/deals").body(Body::empty()).unwrap()
    }

    #[test]
    fn decision_follows_store_flag_only() {
        assert_eq!(
            decide(ReadinessState {
                store_connected: false,
                listener_active: true,
            }),
            GateDecision::StoreNotReady
        );
        assert_eq!(
            decide(ReadinessState {
                store_connected: true,
                listener_active: false,
            }),
            GateDecision::Pass
        );
    }

    #[tokio::test]
    async fn gated_route_not_invoked_before_store_connects() {
        let (writer, reader) = readiness::channel();
        writer.mark_listener_active();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = gated(spy_router(Arc::clone(&calls)), reader);

        let response = app.oneshot(get_deals()).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, serde_json::json!({ "message": "Database not ready" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gated_route_passes_after_store_connects() {
        let (writer, reader) = readiness::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = gated(spy_router(Arc::clone(&calls)), reader);

        let before = app.clone().oneshot(get_deals()).await.unwrap();
        assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);

        writer.mark_store_connected();

        let after = app.oneshot(get_deals()).await.unwrap();
        assert_eq!(after.status(), StatusCode::OK);
        let body = to_bytes(after.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"deals");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
