use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    schema::{DealgateConfig, StartupOrdering},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "dealgate.toml",
    "dealgate.yaml",
    "dealgate.yml",
    "dealgate.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<DealgateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./dealgate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/dealgate/dealgate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `DealgateConfig::default()` if no config file is found.
pub fn discover_and_load() -> anyhow::Result<DealgateConfig> {
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(DealgateConfig::default())
        },
    }
}

/// Full startup load: file (explicit or discovered), then process environment
/// overrides, then validation.
pub fn load_from(path: Option<&Path>) -> anyhow::Result<DealgateConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load()?,
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply platform environment variables on top of file configuration.
///
/// Unparseable numeric values are ignored with a warning so a typo in one
/// variable does not discard the rest of the configuration.
pub fn apply_env_overrides(config: &mut DealgateConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(bind) = lookup("HOST") {
        config.server.bind = bind;
    }
    if let Some(port) = parse_var(&lookup, "PORT") {
        config.server.port = port;
    }
    if let Some(ordering) = parse_var::<StartupOrdering>(&lookup, "STARTUP_ORDERING") {
        config.server.ordering = ordering;
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.store.url = url;
    }
    if let Some(secs) = parse_var(&lookup, "STORE_CONNECT_TIMEOUT_SECS") {
        config.store.connect_timeout_secs = secs;
    }
    if let Some(attempts) = parse_var(&lookup, "STORE_MAX_ATTEMPTS") {
        config.store.max_attempts = attempts;
    }
    if let Some(origins) = lookup("ALLOWED_ORIGINS") {
        config.cors.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(email) = lookup("ADMIN_EMAIL") {
        config.admin.email = Some(email);
    }
    if let Some(password) = lookup("ADMIN_PASSWORD") {
        config.admin.password = Some(Secret::new(password));
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        },
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/dealgate/
    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory, `~/.config/dealgate/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("dealgate"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<DealgateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
