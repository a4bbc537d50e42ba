//! Config schema types (server, reliable delivery, presence, limits, TURN, push).
use {
    secrecy::Secret,
    serde::Deserialize,
    std::time::Duration,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LrcomConfig {
    pub server: ServerConfig,
    pub reliable: ReliableConfig,
    pub presence: PresenceConfig,
    pub limits: LimitsConfig,
    pub turn: TurnConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Branding used in push notification titles and `/api/config`.
    pub app_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8443,
            app_name: "Last".into(),
        }
    }
}

/// Retry policy defaults for acknowledged delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub pump_interval_ms: u64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 800,
            max_delay_ms: 8000,
            pump_interval_ms: 500,
        }
    }
}

impl ReliableConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub tick_interval_ms: u64,
    /// Connections silent for longer than this are terminated by the sweep.
    pub stale_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            stale_timeout_ms: 45_000,
        }
    }
}

impl PresenceConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    /// A third of the staleness threshold, clamped to 1–10 s.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis((self.stale_timeout_ms / 3).clamp(1_000, 10_000))
    }
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub signal_per_window: u32,
    pub control_per_window: u32,
    pub window_ms: u64,
    pub receipt_cache_size: usize,
    pub chat_max_chars: usize,
    pub name_max_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            signal_per_window: 250,
            control_per_window: 40,
            window_ms: 2_000,
            receipt_cache_size: 2_000,
            chat_max_chars: 500,
            name_max_chars: 20,
        }
    }
}

impl LimitsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// NAT traversal relay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub urls: Vec<String>,
    /// Shared secret of the relay's REST credential scheme.
    pub secret: Option<Secret<String>>,
    pub username_ttl_secs: u64,
    /// Relay port range; 0 means unknown.
    pub relay_min_port: u32,
    pub relay_max_port: u32,
    pub stun_urls: Vec<String>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            secret: None,
            username_ttl_secs: 3_600,
            relay_min_port: 0,
            relay_max_port: 0,
            stun_urls: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}

impl TurnConfig {
    /// Number of relay ports, when a usable range is configured.
    pub fn relay_port_count(&self) -> Option<u32> {
        (self.relay_min_port > 0 && self.relay_max_port >= self.relay_min_port)
            .then(|| self.relay_max_port - self.relay_min_port + 1)
    }
}

/// Web Push (VAPID) settings. Push is enabled only when both keys are set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<Secret<String>>,
    pub subject: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_public_key: None,
            vapid_private_key: None,
            subject: "mailto:lrcom@localhost".into(),
        }
    }
}

impl PushConfig {
    pub fn is_enabled(&self) -> bool {
        self.vapid_public_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.vapid_private_key.is_some()
    }
}
