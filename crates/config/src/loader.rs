use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::LrcomConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["lrcom.toml", "lrcom.yaml", "lrcom.yml", "lrcom.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
/// Each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<LrcomConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply
/// environment overrides.
///
/// Search order:
/// 1. `./lrcom.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/lrcom/lrcom.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `LrcomConfig::default()` when no file is found or the
/// file fails to parse.
pub fn discover_and_load() -> LrcomConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                LrcomConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            LrcomConfig::default()
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    // Project-local
    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    // User-global: ~/.config/lrcom/
    config_dir().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/lrcom/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("lrcom"))
}

/// Apply the deployment environment variables on top of file config.
///
/// Unparseable numeric values are logged and ignored.
pub fn apply_env_overrides(config: &mut LrcomConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(host) = get("HOST") {
        config.server.bind = host;
    }
    parse_into(get("PORT"), "PORT", &mut config.server.port);
    if let Some(name) = get("APP_NAME") {
        config.server.app_name = name;
    }

    if let Some(urls) = get("TURN_URLS") {
        config.turn.urls = urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(secret) = get("TURN_SECRET") {
        config.turn.secret = Some(Secret::new(secret));
    }
    parse_into(
        get("TURN_USERNAME_TTL_SECONDS"),
        "TURN_USERNAME_TTL_SECONDS",
        &mut config.turn.username_ttl_secs,
    );
    parse_into(
        get("TURN_RELAY_MIN_PORT"),
        "TURN_RELAY_MIN_PORT",
        &mut config.turn.relay_min_port,
    );
    parse_into(
        get("TURN_RELAY_MAX_PORT"),
        "TURN_RELAY_MAX_PORT",
        &mut config.turn.relay_max_port,
    );

    if let Some(key) = get("VAPID_PUBLIC_KEY") {
        config.push.vapid_public_key = Some(key);
    }
    if let Some(key) = get("VAPID_PRIVATE_KEY") {
        config.push.vapid_private_key = Some(Secret::new(key));
    }
    if let Some(subject) = get("VAPID_SUBJECT") {
        config.push.subject = subject;
    }

    parse_into(
        get("RELIABLE_MAX_ATTEMPTS"),
        "RELIABLE_MAX_ATTEMPTS",
        &mut config.reliable.max_attempts,
    );
    parse_into(
        get("RELIABLE_BASE_DELAY_MS"),
        "RELIABLE_BASE_DELAY_MS",
        &mut config.reliable.base_delay_ms,
    );
    parse_into(
        get("RELIABLE_MAX_DELAY_MS"),
        "RELIABLE_MAX_DELAY_MS",
        &mut config.reliable.max_delay_ms,
    );
    parse_into(
        get("RELIABLE_PUMP_MS"),
        "RELIABLE_PUMP_MS",
        &mut config.reliable.pump_interval_ms,
    );
    parse_into(
        get("PRESENCE_TICK_MS"),
        "PRESENCE_TICK_MS",
        &mut config.presence.tick_interval_ms,
    );
    parse_into(
        get("STALE_WS_MS"),
        "STALE_WS_MS",
        &mut config.presence.stale_timeout_ms,
    );
    parse_into(
        get("CLIENT_MSGIDS_MAX"),
        "CLIENT_MSGIDS_MAX",
        &mut config.limits.receipt_cache_size,
    );
}

fn parse_into<T: FromStr>(raw: Option<String>, key: &str, target: &mut T) {
    let Some(raw) = raw else {
        return;
    };
    match raw.parse::<T>() {
        Ok(v) => *target = v,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<LrcomConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
