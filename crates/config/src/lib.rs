//! Configuration loading: file discovery, `${VAR}` substitution, and the
//! deployment environment overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, find_config_file,
        load_config, set_config_dir,
    },
    schema::{
        LimitsConfig, LrcomConfig, PresenceConfig, PushConfig, ReliableConfig, ServerConfig,
        TurnConfig,
    },
};
