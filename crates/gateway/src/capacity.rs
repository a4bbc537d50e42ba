//! Advisory voice capacity figures published with presence.
//!
//! Rooms are full-mesh, so a room of `n` members needs `n(n-1)/2` peer links
//! and, when everything is relayed, roughly two relay allocations per link.

use {lrcom_config::TurnConfig, lrcom_protocol::VoiceStats};

/// Host part of the first TURN URL, e.g. `turns:relay.example.org:5349?transport=tcp`
/// yields `relay.example.org`.
pub fn turn_host_label(urls: &[String]) -> Option<String> {
    let first = urls.first()?.trim();
    let rest = first.split_once(':').map_or(first, |(_, rest)| rest);
    let rest = rest.trim_start_matches("//");
    let rest = rest.split(['?', '/']).next().unwrap_or(rest);
    let host = if let Some(bracketed) = rest.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        rest.rsplit_once(':').map_or(rest, |(host, _)| host)
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Largest `n` with `n(n-1)/2 <= budget`.
fn max_mesh_size(budget: u64) -> u64 {
    (1 + (1 + 8 * budget).isqrt()) / 2
}

pub fn voice_stats(room_sizes: impl IntoIterator<Item = usize>, turn: &TurnConfig) -> VoiceStats {
    let mut active_calls = 0usize;
    let mut peer_links = 0u64;
    for size in room_sizes {
        if size >= 2 {
            active_calls += 1;
            let n = size as u64;
            peer_links += n * (n - 1) / 2;
        }
    }

    let relay_ports_total = turn.relay_port_count();
    let used = peer_links.saturating_mul(2);
    VoiceStats {
        turn_host: turn_host_label(&turn.urls),
        relay_ports_total,
        relay_ports_used_estimate: relay_ports_total
            .map_or(used, |total| used.min(u64::from(total))),
        capacity_calls_estimate: relay_ports_total.map(|total| total / 2),
        max_conference_users_estimate: relay_ports_total
            .map(|total| max_mesh_size(u64::from(total / 2))),
        active_calls,
        peer_links,
    }
}
