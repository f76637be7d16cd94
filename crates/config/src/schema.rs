/// Config schema types (server, store, cors, admin).
use std::{fmt, str::FromStr};

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DealgateConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub cors: CorsConfig,
    pub admin: AdminConfig,
}

impl DealgateConfig {
    /// Reject configurations the gateway cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.bind.trim().is_empty() {
            anyhow::bail!("server.bind must not be empty");
        }
        if self.store.url.trim().is_empty() {
            anyhow::bail!("store.url must not be empty");
        }
        if self.store.max_attempts == 0 {
            anyhow::bail!("store.max_attempts must be at least 1");
        }
        if self.store.connect_timeout_secs == 0 {
            anyhow::bail!("store.connect_timeout_secs must be at least 1");
        }
        if let Some(blank) = self
            .cors
            .allowed_origins
            .iter()
            .position(|o| o.trim().is_empty())
        {
            anyhow::bail!("cors.allowed_origins[{blank}] is blank");
        }
        if self.admin.password.is_some() && self.admin.email.is_none() {
            anyhow::bail!("admin.password is set but admin.email is missing");
        }
        Ok(())
    }
}

/// Order in which the listener and the store connection are brought up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupOrdering {
    /// Bind and serve first, connect the store in the background.
    #[default]
    ListenerFirst,
    /// Attempt the store connection first, then bind regardless of the outcome.
    StoreFirst,
}

impl fmt::Display for StartupOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ListenerFirst => "listener-first",
            Self::StoreFirst => "store-first",
        })
    }
}

impl FromStr for StartupOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "listener-first" => Ok(Self::ListenerFirst),
            "store-first" => Ok(Self::StoreFirst),
            other => Err(format!("unknown startup ordering: {other}")),
        }
    }
}

/// Network listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub ordering: StartupOrdering,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            ordering: StartupOrdering::default(),
        }
    }
}

/// Backing store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string, e.g. `sqlite://dealgate.db?mode=rwc`.
    pub url: String,
    /// Upper bound for a single connection attempt.
    pub connect_timeout_secs: u64,
    /// Total connection attempts. `1` disables retry.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://dealgate.db?mode=rwc".into(),
            connect_timeout_secs: 10,
            max_attempts: 1,
            retry_backoff_ms: 2000,
            max_connections: 5,
        }
    }
}

/// Cross-origin policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:5173".into(),
            ],
            max_age_secs: 600,
        }
    }
}

/// Privileged account seeded once the store is connected.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub email: Option<String>,
    pub password: Option<Secret<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DealgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ordering, StartupOrdering::ListenerFirst);
        assert_eq!(config.store.max_attempts, 1);
    }

    #[test]
    fn ordering_parses_both_spellings() {
        assert_eq!(
            "store_first".parse::<StartupOrdering>(),
            Ok(StartupOrdering::StoreFirst)
        );
        assert_eq!(
            "Listener-First".parse::<StartupOrdering>(),
            Ok(StartupOrdering::ListenerFirst)
        );
        assert!("sideways".parse::<StartupOrdering>().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut config = DealgateConfig::default();
        config.store.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_blank_origin() {
        let mut config = DealgateConfig::default();
        config.cors.allowed_origins.push("  ".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("allowed_origins[2]"));
    }

    #[test]
    fn rejects_password_without_email() {
        let mut config = DealgateConfig::default();
        config.admin.password = Some(Secret::new("hunter2".into()));
        assert!(config.validate().is_err());
    }
}
