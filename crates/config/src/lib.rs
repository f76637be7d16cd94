//! Configuration: schema, discovery, `${VAR}` substitution and environment
//! overrides. Loaded once at process start and treated as immutable.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, discover_and_load, load_config, load_from},
    schema::{
        AdminConfig, CorsConfig, DealgateConfig, ServerConfig, StartupOrdering, StoreConfig,
    },
};
