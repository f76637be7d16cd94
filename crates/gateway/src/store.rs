//! Backing-store seam: how the gateway connects, checks liveness and seeds
//! the privileged account. Route handlers only ever see an `Arc<dyn Store>`
//! once the sequencer has installed one.

use std::sync::Arc;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
};

use {crate::error::StoreError, dealgate_config::AdminConfig};

/// Result of the one-time privileged account seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Created,
    AlreadyExists,
}

/// Credentials of the privileged account to seed.
#[derive(Debug)]
pub struct AdminSeed {
    pub email: String,
    pub password: Secret<String>,
}

impl AdminSeed {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Secret::new(password.into()),
        }
    }

    /// `None` unless both email and password are configured.
    pub fn from_config(config: &AdminConfig) -> Option<Self> {
        let email = config.email.as_ref()?;
        let password = config.password.as_ref()?;
        Some(Self::new(email.clone(), password.expose_secret().clone()))
    }
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Human-readable target for logs. Must not contain credentials.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn Store>, StoreError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap round-trip to prove the handle is live.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the privileged account unless it already exists.
    async fn seed_admin(&self, admin: &AdminSeed) -> Result<SeedOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_seed_requires_both_fields() {
        let mut config = AdminConfig {
            email: Some("ops@deals.example".into()),
            password: None,
        };
        assert!(AdminSeed::from_config(&config).is_none());

        config.password = Some(Secret::new("pw".into()));
        let seed = AdminSeed::from_config(&config).unwrap();
        assert_eq!(seed.email, "ops@deals.example");
        assert_eq!(seed.password.expose_secret(), "pw");
    }

    #[test]
    fn debug_redacts_password() {
        let seed = AdminSeed::new("ops@deals.example", "hunter2");
        assert!(!format!("{seed:?}").contains("hunter2"));
    }
}
