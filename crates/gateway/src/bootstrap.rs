//! Startup sequencing: bind the listener, connect the store, seed the admin
//! account.
//!
//! The sequencer owns the only [`ReadinessWriter`]. With the default
//! [`StartupOrdering::ListenerFirst`] the process goes
//! `INIT → LISTENING(store=false) → LISTENING(store=true)`, and a store that
//! never connects leaves it serving in `LISTENING(store=false)` instead of
//! exiting. Only a failed bind is fatal.

use std::{future::Future, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    axum::Router,
    futures::FutureExt,
    serde_json::json,
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use dealgate_config::{DealgateConfig, StartupOrdering, StoreConfig};

use crate::{
    error::{BootstrapError, StoreError, panic_message},
    origin::OriginPolicy,
    readiness::{self, ReadinessWriter},
    routes::{self, RouteGroup},
    server::build_app,
    state::GatewayState,
    store::{AdminSeed, SeedOutcome, StoreConnector},
};

/// How hard to try reaching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Upper bound for one attempt.
    pub timeout: Duration,
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Attempt `n` is followed by a `n * backoff` pause.
    pub backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl ConnectPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.connect_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// How the store phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// `seed` is `None` when no admin is configured or seeding failed.
    Connected { seed: Option<SeedOutcome> },
    Failed { error: String },
}

impl StoreOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, StoreOutcome::Connected { .. })
    }
}

pub struct BootstrapSettings {
    pub bind: String,
    pub port: u16,
    pub ordering: StartupOrdering,
    pub connect: ConnectPolicy,
    pub admin: Option<AdminSeed>,
    pub origin: OriginPolicy,
}

impl BootstrapSettings {
    pub fn new(bind: impl Into<String>, port: u16, origin: OriginPolicy) -> Self {
        Self {
            bind: bind.into(),
            port,
            ordering: StartupOrdering::default(),
            connect: ConnectPolicy::default(),
            admin: None,
            origin,
        }
    }

    pub fn from_config(config: &DealgateConfig) -> Self {
        Self {
            bind: config.server.bind.clone(),
            port: config.server.port,
            ordering: config.server.ordering,
            connect: ConnectPolicy::from_config(&config.store),
            admin: AdminSeed::from_config(&config.admin),
            origin: OriginPolicy::from_config(&config.cors),
        }
    }

    pub fn with_ordering(mut self, ordering: StartupOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_connect_policy(mut self, connect: ConnectPolicy) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_admin(mut self, admin: AdminSeed) -> Self {
        self.admin = Some(admin);
        self
    }
}

pub struct Bootstrap {
    bind: String,
    port: u16,
    ordering: StartupOrdering,
    connect: ConnectPolicy,
    admin: Option<AdminSeed>,
    connector: Arc<dyn StoreConnector>,
    groups: Vec<RouteGroup>,
    writer: ReadinessWriter,
    state: Arc<GatewayState>,
}

impl Bootstrap {
    pub fn new(settings: BootstrapSettings, connector: Arc<dyn StoreConnector>) -> Self {
        let (writer, readiness) = readiness::channel();
        let state = GatewayState::new(settings.origin, readiness, settings.port);
        Self {
            bind: settings.bind,
            port: settings.port,
            ordering: settings.ordering,
            connect: settings.connect,
            admin: settings.admin,
            connector,
            groups: routes::default_groups(),
            writer,
            state,
        }
    }

    /// Replace the default data route groups.
    pub fn with_routes(mut self, groups: Vec<RouteGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    pub async fn start(self) -> Result<RunningGateway, BootstrapError> {
        let Self {
            bind,
            port,
            ordering,
            connect,
            admin,
            connector,
            groups,
            writer,
            state,
        } = self;

        let prefixes: Vec<String> = groups.iter().map(|g| g.prefix().to_string()).collect();
        let app = build_app(Arc::clone(&state), groups);
        info!(%ordering, "starting gateway");

        let (local_addr, server, shutdown, store_task) = match ordering {
            StartupOrdering::ListenerFirst => {
                let listener = bind_listener(&bind, port).await?;
                let local_addr = listener.local_addr()?;
                writer.mark_listener_active();
                let (server, shutdown) = spawn_server(listener, app);

                let store_state = Arc::clone(&state);
                let store_connector = Arc::clone(&connector);
                let store_task = tokio::spawn(async move {
                    guarded(establish_store(
                        &store_state,
                        store_connector.as_ref(),
                        &connect,
                        admin.as_ref(),
                        &writer,
                    ))
                    .await
                });
                (local_addr, server, shutdown, store_task)
            },
            StartupOrdering::StoreFirst => {
                let outcome = guarded(establish_store(
                    &state,
                    connector.as_ref(),
                    &connect,
                    admin.as_ref(),
                    &writer,
                ))
                .await;

                let listener = bind_listener(&bind, port).await?;
                let local_addr = listener.local_addr()?;
                writer.mark_listener_active();
                let (server, shutdown) = spawn_server(listener, app);
                (local_addr, server, shutdown, tokio::spawn(async move { outcome }))
            },
        };

        log_banner(&state, local_addr, ordering, connector.as_ref(), &prefixes);

        Ok(RunningGateway {
            local_addr,
            state,
            store_task: Some(store_task),
            store_outcome: None,
            server,
            shutdown,
        })
    }
}

/// Handle to a started gateway.
pub struct RunningGateway {
    local_addr: SocketAddr,
    state: Arc<GatewayState>,
    store_task: Option<JoinHandle<StoreOutcome>>,
    store_outcome: Option<StoreOutcome>,
    server: JoinHandle<std::io::Result<()>>,
    shutdown: CancellationToken,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Wait for the store phase to finish (connected or given up).
    pub async fn wait_for_store(&mut self) -> StoreOutcome {
        if let Some(task) = self.store_task.take() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => StoreOutcome::Failed {
                    error: e.to_string(),
                },
            };
            self.store_outcome = Some(outcome);
        }
        match &self.store_outcome {
            Some(outcome) => outcome.clone(),
            None => StoreOutcome::Failed {
                error: "store phase did not report".into(),
            },
        }
    }

    /// Ask the server to stop accepting connections and drain.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Serve until `signal` resolves or the server stops on its own.
    pub async fn serve_until(
        mut self,
        signal: impl Future<Output = ()>,
    ) -> Result<(), BootstrapError> {
        let result = tokio::select! {
            result = &mut self.server => result,
            () = signal => {
                info!("shutdown requested, draining connections");
                self.shutdown.cancel();
                (&mut self.server).await
            },
        };
        if let Some(task) = self.store_task.take() {
            task.abort();
        }
        result??;
        Ok(())
    }
}

async fn bind_listener(bind: &str, port: u16) -> Result<TcpListener, BootstrapError> {
    TcpListener::bind((bind, port))
        .await
        .map_err(|source| BootstrapError::Bind {
            addr: format!("{bind}:{port}"),
            source,
        })
}

fn spawn_server(
    listener: TcpListener,
    app: Router,
) -> (JoinHandle<std::io::Result<()>>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    });
    (server, shutdown)
}

/// Contain a panic in the store phase: it becomes a failed outcome and the
/// listener keeps serving.
async fn guarded(phase: impl Future<Output = StoreOutcome>) -> StoreOutcome {
    match AssertUnwindSafe(phase).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(panic = %message, "store phase panicked");
            StoreOutcome::Failed {
                error: format!("panicked: {message}"),
            }
        },
    }
}

async fn establish_store(
    state: &GatewayState,
    connector: &dyn StoreConnector,
    policy: &ConnectPolicy,
    admin: Option<&AdminSeed>,
    writer: &ReadinessWriter,
) -> StoreOutcome {
    let target = connector.describe();
    info!(store = %target, "connecting to store");

    let store = match connect_with_retry(connector, policy).await {
        Ok(store) => store,
        Err(e) => {
            error!(store = %target, error = %e, "store connection failed, gate stays closed");
            return StoreOutcome::Failed {
                error: e.to_string(),
            };
        },
    };

    if !state.install_store(Arc::clone(&store)) {
        warn!("store handle was already installed");
    }
    writer.mark_store_connected();
    info!(store = %target, "store connected, gate open");
    state.realtime.broadcast("store.connected", json!({})).await;

    let seed = match admin {
        None => {
            debug!("no admin account configured, skipping seed");
            None
        },
        Some(admin) => match store.seed_admin(admin).await {
            Ok(SeedOutcome::Created) => {
                info!(email = %admin.email, "admin account created");
                Some(SeedOutcome::Created)
            },
            Ok(SeedOutcome::AlreadyExists) => {
                debug!(email = %admin.email, "admin account already exists");
                Some(SeedOutcome::AlreadyExists)
            },
            Err(e) => {
                warn!(email = %admin.email, error = %e, "admin seeding failed");
                None
            },
        },
    };

    StoreOutcome::Connected { seed }
}

async fn connect_with_retry(
    connector: &dyn StoreConnector,
    policy: &ConnectPolicy,
) -> Result<Arc<dyn crate::store::Store>, StoreError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(policy.timeout)),
        };
        match result {
            Ok(store) => return Ok(store),
            Err(e) if attempt < max_attempts => {
                let pause = policy.backoff * attempt;
                warn!(attempt, max_attempts, error = %e, ?pause, "store connection attempt failed, retrying");
                tokio::time::sleep(pause).await;
            },
            Err(e) => return Err(e),
        }
    }
}

fn log_banner(
    state: &GatewayState,
    addr: SocketAddr,
    ordering: StartupOrdering,
    connector: &dyn StoreConnector,
    prefixes: &[String],
) {
    let lines = [
        format!("dealgate gateway v{}", state.version),
        format!("listening on {addr} ({ordering})"),
        format!("store: {}", connector.describe()),
        format!(
            "cors: {} allowed origin(s)",
            state.origin.allowed_origins().len()
        ),
        format!("gated: {}", prefixes.join(", ")),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use {super::*, crate::store::Store, async_trait::async_trait};

    struct OkStore;

    #[async_trait]
    impl Store for OkStore {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn seed_admin(&self, _admin: &AdminSeed) -> Result<SeedOutcome, StoreError> {
            Ok(SeedOutcome::Created)
        }
    }

    /// Fails the first `failures` attempts, then connects.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StoreConnector for Flaky {
        fn describe(&self) -> String {
            "flaky".into()
        }

        async fn connect(&self) -> Result<Arc<dyn Store>, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(StoreError::Unavailable(format!("attempt {call}")));
            }
            Ok(Arc::new(OkStore))
        }
    }

    struct Hangs;

    #[async_trait]
    impl StoreConnector for Hangs {
        fn describe(&self) -> String {
            "hangs".into()
        }

        async fn connect(&self) -> Result<Arc<dyn Store>, StoreError> {
            std::future::pending().await
        }
    }

    struct Panics;

    #[async_trait]
    impl StoreConnector for Panics {
        fn describe(&self) -> String {
            "panics".into()
        }

        async fn connect(&self) -> Result<Arc<dyn Store>, StoreError> {
            panic!("driver exploded")
        }
    }

    fn policy(max_attempts: u32) -> ConnectPolicy {
        ConnectPolicy {
            timeout: Duration::from_millis(50),
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    fn state() -> (ReadinessWriter, Arc<GatewayState>) {
        let (writer, readiness) = readiness::channel();
        let state = GatewayState::new(OriginPolicy::new(["https://deals.example"]), readiness, 0);
        (writer, state)
    }

    #[test]
    fn policy_from_config_clamps_attempts() {
        let config = StoreConfig {
            max_attempts: 0,
            ..StoreConfig::default()
        };
        assert_eq!(ConnectPolicy::from_config(&config).max_attempts, 1);
    }

    #[tokio::test]
    async fn single_attempt_does_not_retry() {
        let flaky = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        assert!(connect_with_retry(&flaky, &policy(1)).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_retry_recovers() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        assert!(connect_with_retry(&flaky, &policy(3)).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hanging_connect_times_out() {
        let result = connect_with_retry(&Hangs, &policy(1)).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn failed_store_leaves_gate_closed() {
        let (writer, state) = state();
        let flaky = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let outcome = establish_store(&state, &flaky, &policy(2), None, &writer).await;

        assert!(!outcome.is_connected());
        assert!(!state.readiness().store_connected);
        assert!(state.store().is_none());
    }

    #[tokio::test]
    async fn connected_store_opens_gate_and_seeds() {
        let (writer, state) = state();
        let flaky = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        let admin = AdminSeed::new("admin@deals.example", "pw");
        let outcome = establish_store(&state, &flaky, &policy(1), Some(&admin), &writer).await;

        assert_eq!(outcome, StoreOutcome::Connected {
            seed: Some(SeedOutcome::Created)
        });
        assert!(state.readiness().store_connected);
        assert!(state.store().is_some());
    }

    #[tokio::test]
    async fn panicking_connector_is_contained() {
        let (writer, state) = state();
        let outcome = guarded(establish_store(&state, &Panics, &policy(1), None, &writer)).await;

        match outcome {
            StoreOutcome::Failed { error } => assert!(error.contains("driver exploded")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!state.readiness().store_connected);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind_listener("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Bind { .. }));
    }
}
