//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Configuration, logging bootstrap and shared types for Renew crates."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
//! Shared primitives for the Renew workspace: configuration loading,
//! filesystem layout, and tracing initialisation.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, LaunchStrategy, LoadedAppConfig, LoggingConfig, MetricsConfig, PathsConfig,
    ServiceConfig, UpdateConfig,
};
pub use logging::{init_tracing, LogFormat};
