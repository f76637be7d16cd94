use std::time::Duration;

use {
    anyhow::Context,
    dealgate_config::DealgateConfig,
    dealgate_gateway::{sqlite::SqliteConnector, store::StoreConnector},
    tracing::info,
};

/// Print the effective configuration, then connect to the store once and
/// ping it. Fails if the store cannot be reached.
pub async fn run_doctor(config: &DealgateConfig) -> anyhow::Result<()> {
    for line in summary(config) {
        println!("{line}");
    }

    let connector = SqliteConnector::new(&config.store.url, 1);
    let timeout = Duration::from_secs(config.store.connect_timeout_secs);
    info!(store = %connector.describe(), "probing store");

    let store = tokio::time::timeout(timeout, connector.connect())
        .await
        .map_err(|_| anyhow::anyhow!("store did not answer within {timeout:?}"))?
        .with_context(|| format!("connecting to {}", connector.describe()))?;
    store.ping().await.context("store ping failed")?;

    println!("store: ok");
    Ok(())
}

fn summary(config: &DealgateConfig) -> Vec<String> {
    let origins = if config.cors.allowed_origins.is_empty() {
        "(none)".to_string()
    } else {
        config.cors.allowed_origins.join(", ")
    };
    let admin = match (&config.admin.email, &config.admin.password) {
        (Some(email), Some(_)) => format!("{email} (password set)"),
        (Some(email), None) => format!("{email} (no password, seeding skipped)"),
        (None, _) => "not configured".to_string(),
    };
    vec![
        format!("listen:    {}:{}", config.server.bind, config.server.port),
        format!("ordering:  {}", config.server.ordering),
        format!(
            "store:     {} (timeout {}s, {} attempt(s))",
            SqliteConnector::new(&config.store.url, 1).describe(),
            config.store.connect_timeout_secs,
            config.store.max_attempts
        ),
        format!("origins:   {origins}"),
        format!("admin:     {admin}"),
    ]
}
