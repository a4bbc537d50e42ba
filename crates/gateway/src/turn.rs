//! ICE server configuration handed to clients, with time-limited TURN
//! credentials in the TURN REST API format (`username = expiry`,
//! `credential = base64(HMAC-SHA1(secret, username))`).

use std::{
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    hmac::{Hmac, Mac},
    lrcom_config::TurnConfig,
    lrcom_protocol::{IceConfig, IceServer},
    secrecy::ExposeSecret,
    sha1::Sha1,
    tracing::warn,
};

type HmacSha1 = Hmac<Sha1>;

const LOCALHOST_TURN_WARNING: &str = "TURN is configured for localhost; set TURN_URLS to your \
                                      public domain/IP for Internet calls.";

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("invalid TURN secret")]
    InvalidSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredential {
    pub username: String,
    pub credential: String,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub fn relay_credential(
    secret: &str,
    ttl_secs: u64,
    now_unix: u64,
) -> Result<TurnCredential, TurnError> {
    let username = now_unix.saturating_add(ttl_secs).to_string();
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| TurnError::InvalidSecret)?;
    mac.update(username.as_bytes());
    let credential = STANDARD.encode(mac.finalize().into_bytes());
    Ok(TurnCredential {
        username,
        credential,
    })
}

/// STUN servers always; TURN servers only with both URLs and a secret.
pub fn ice_config(turn: &TurnConfig, now_unix: u64) -> IceConfig {
    let mut ice_servers = Vec::with_capacity(2);
    if !turn.stun_urls.is_empty() {
        ice_servers.push(IceServer {
            urls: turn.stun_urls.clone(),
            username: None,
            credential: None,
        });
    }

    if let Some(secret) = &turn.secret
        && !turn.urls.is_empty()
    {
        match relay_credential(secret.expose_secret(), turn.username_ttl_secs, now_unix) {
            Ok(cred) => ice_servers.push(IceServer {
                urls: turn.urls.clone(),
                username: Some(cred.username),
                credential: Some(cred.credential),
            }),
            Err(e) => warn!(error = %e, "TURN credentials unavailable, advertising STUN only"),
        }
    }

    IceConfig { ice_servers }
}

pub fn is_turn_configured(turn: &TurnConfig) -> bool {
    turn.secret.is_some() && !turn.urls.is_empty()
}

/// Whether the address is a loopback address. Unparseable input counts as
/// remote.
pub fn is_loopback(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        },
        Err(_) => false,
    }
}

fn points_at_localhost(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["localhost", "127.0.0.1", "[::1]", "::1"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Warning for remote clients when the advertised TURN server is only
/// reachable from the hub host itself.
pub fn localhost_warning(turn: &TurnConfig, client_ip: Option<&str>) -> Option<String> {
    let remote = client_ip.is_some_and(|ip| !is_loopback(ip));
    let bad_turn = turn.urls.iter().any(|u| points_at_localhost(u));
    (remote && bad_turn).then(|| LOCALHOST_TURN_WARNING.to_string())
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    fn configured() -> TurnConfig {
        TurnConfig {
            urls: vec!["turn:relay.example.org:3478".into()],
            secret: Some(Secret::new("northern-lights".into())),
            username_ttl_secs: 3600,
            ..TurnConfig::default()
        }
    }

    #[test]
    fn credential_matches_rest_api_format() {
        let cred = relay_credential("northern-lights", 3600, 1_700_000_000).unwrap();
        assert_eq!(cred.username, "1700003600");
        assert_eq!(cred.credential, "hO9p7EEDGKdCgK1XaHg9LyZSyPQ=");
    }

    #[test]
    fn ice_config_with_turn() {
        let ice = ice_config(&configured(), 1_700_000_000);
        assert_eq!(ice.ice_servers.len(), 2);
        assert_eq!(ice.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(ice.ice_servers[0].username.is_none());
        assert_eq!(ice.ice_servers[1].username.as_deref(), Some("1700003600"));
        assert!(is_turn_configured(&configured()));
    }

    #[test]
    fn ice_config_without_secret_is_stun_only() {
        let turn = TurnConfig {
            secret: None,
            ..configured()
        };
        let ice = ice_config(&turn, 0);
        assert_eq!(ice.ice_servers.len(), 1);
        assert!(!is_turn_configured(&turn));
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("127.8.0.1"));
        assert!(is_loopback("::1"));
        assert!(is_loopback("::ffff:127.0.0.1"));
        assert!(!is_loopback("192.168.1.10"));
        assert!(!is_loopback("not-an-ip"));
    }

    #[test]
    fn warns_remote_clients_about_localhost_turn() {
        let turn = TurnConfig {
            urls: vec!["turn:localhost:3478".into()],
            ..TurnConfig::default()
        };
        assert!(localhost_warning(&turn, Some("203.0.113.9")).is_some());
        assert!(localhost_warning(&turn, Some("127.0.0.1")).is_none());
        assert!(localhost_warning(&turn, None).is_none());
        assert!(localhost_warning(&configured(), Some("203.0.113.9")).is_none());
    }
}
