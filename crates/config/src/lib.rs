//! Configuration loading, validation and env substitution.
//!
//! Config files: `rukun.toml`, `rukun.yaml`, `rukun.yml` or `rukun.json`,
//! searched in `./` then `~/.config/rukun/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `RUKUN_*`
//! environment overrides for the settings operators change most.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, clear_data_dir, config_dir, data_dir, discover_and_load,
        load_config, set_data_dir,
    },
    schema::{
        ChannelConfig, DatabaseConfig, MetricsConfig, NotificationsConfig, ReconnectConfig,
        RukunConfig, WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
