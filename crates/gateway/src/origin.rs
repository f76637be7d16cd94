//! Cross-origin policy.
//!
//! One allow-list drives both the `tower-http` [`CorsLayer`] and the outer
//! [`enforce_origin`] middleware. The middleware always `insert`s, so running
//! both layers leaves a single value per CORS header. The same policy
//! validates the realtime handshake.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        extract::{Request, State},
        http::{
            HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
            header::{
                ACCEPT, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
                ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
                AUTHORIZATION, CONTENT_TYPE, ORIGIN, VARY,
            },
            request::Parts,
        },
        middleware::Next,
        response::{IntoResponse, Response},
    },
    tower_http::cors::{AllowOrigin, CorsLayer},
    tracing::{debug, warn},
};

use {crate::error::ApiError, dealgate_config::CorsConfig};

const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With, Accept, Origin";

/// Outcome of evaluating a request's declared origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header (curl, server-to-server, health probes).
    AllowNoOrigin,
    /// Origin is on the allow-list; carries the origin to echo back.
    AllowListed(String),
    DenyUnlisted,
}

impl OriginDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, OriginDecision::DenyUnlisted)
    }
}

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    max_age: Duration,
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: Vec<String> = Vec::new();
        for origin in origins {
            let origin = normalize(origin.as_ref());
            if !origin.is_empty() && !allowed.iter().any(|o| o == origin) {
                allowed.push(origin.to_string());
            }
        }
        Self {
            allowed,
            max_age: Duration::from_secs(600),
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(&config.allowed_origins).with_max_age(Duration::from_secs(config.max_age_secs))
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed
    }

    pub fn is_listed(&self, origin: &str) -> bool {
        let origin = normalize(origin);
        self.allowed.iter().any(|o| o == origin)
    }

    pub fn evaluate(&self, origin: Option<&str>) -> OriginDecision {
        match origin {
            None => OriginDecision::AllowNoOrigin,
            Some(origin) if self.is_listed(origin) => {
                OriginDecision::AllowListed(normalize(origin).to_string())
            },
            Some(_) => OriginDecision::DenyUnlisted,
        }
    }

    /// Evaluate the `Origin` header. A header that is not visible ASCII is
    /// treated as unlisted.
    pub fn evaluate_headers(&self, headers: &HeaderMap) -> OriginDecision {
        match headers.get(ORIGIN) {
            None => OriginDecision::AllowNoOrigin,
            Some(value) => match value.to_str() {
                Ok(origin) => self.evaluate(Some(origin)),
                Err(_) => OriginDecision::DenyUnlisted,
            },
        }
    }

    /// Attach CORS headers for an admitted request. Safe to call repeatedly.
    pub fn apply_headers(&self, decision: &OriginDecision, headers: &mut HeaderMap, preflight: bool) {
        let allow_origin = match decision {
            OriginDecision::AllowNoOrigin => HeaderValue::from_static("*"),
            OriginDecision::AllowListed(origin) => match HeaderValue::from_str(origin) {
                Ok(value) => value,
                Err(_) => return,
            },
            OriginDecision::DenyUnlisted => return,
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        if preflight {
            headers.insert(
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from(self.max_age.as_secs()),
            );
        }
        if matches!(decision, OriginDecision::AllowListed(_)) && !headers.contains_key(VARY) {
            headers.insert(VARY, HeaderValue::from_static("origin"));
        }
    }

    /// Library-level CORS layer driven by the same allow-list.
    pub fn cors_layer(self: &Arc<Self>) -> CorsLayer {
        let policy = Arc::clone(self);
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _parts: &Parts| {
                    origin.to_str().is_ok_and(|o| policy.is_listed(o))
                },
            ))
            .allow_methods(allowed_methods())
            .allow_headers(allowed_headers())
            .allow_credentials(true)
            .max_age(self.max_age)
    }
}

fn allowed_methods() -> [Method; 6] {
    [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ]
}

fn allowed_headers() -> [HeaderName; 5] {
    [
        CONTENT_TYPE,
        AUTHORIZATION,
        HeaderName::from_static("x-requested-with"),
        ACCEPT,
        ORIGIN,
    ]
}

/// Outermost CORS middleware.
///
/// Denied origins get a 403 JSON response instead of a dropped connection.
/// Preflight requests are answered here with an empty 200 and never reach the
/// gate or any route.
pub async fn enforce_origin(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    let decision = policy.evaluate_headers(req.headers());

    if !decision.is_allowed() {
        warn!(
            origin = ?req.headers().get(ORIGIN),
            method = %req.method(),
            path = %req.uri().path(),
            "origin not allowed"
        );
        let mut response = ApiError::OriginDenied.into_response();
        response
            .headers_mut()
            .insert(VARY, HeaderValue::from_static("origin"));
        return response;
    }

    if req.method() == Method::OPTIONS {
        debug!(path = %req.uri().path(), "answering preflight");
        let mut response = StatusCode::OK.into_response();
        policy.apply_headers(&decision, response.headers_mut(), true);
        return response;
    }

    let mut response = next.run(req).await;
    policy.apply_headers(&decision, response.headers_mut(), false);
    response
}
