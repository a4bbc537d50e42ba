//! Display names and the presence roster.

use {
    lrcom_protocol::{NameRejection, PresenceEntry, ServerFrame},
    tracing::{info, warn},
    unicode_normalization::UnicodeNormalization,
};

use crate::{
    error::{OpError, OpResult},
    hub::Hub,
};

/// Trim and NFC-normalize a requested name. Rejects empty names, names
/// longer than `max_chars` code points and names containing control
/// characters.
pub fn normalize_name(raw: &str, max_chars: usize) -> Option<String> {
    let name: String = raw.trim().nfc().collect();
    let len = name.chars().count();
    if len == 0 || len > max_chars || name.chars().any(char::is_control) {
        return None;
    }
    Some(name)
}

impl Hub {
    pub(crate) fn set_name(&mut self, conn_id: &str, raw: Option<&str>) -> OpResult {
        let max_chars = self.config.limits.name_max_chars;
        let Some(name) = raw.and_then(|r| normalize_name(r, max_chars)) else {
            self.send(conn_id, &name_rejected(NameRejection::Invalid));
            return Err(OpError::InvalidName);
        };
        if self.names.get(&name).is_some_and(|owner| owner != conn_id) {
            self.send(conn_id, &name_rejected(NameRejection::Taken));
            return Err(OpError::NameTaken);
        }

        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };
        let previous = conn.name.replace(name.clone());
        if let Some(previous) = previous
            && previous != name
            && self.names.get(&previous).is_some_and(|owner| owner == conn_id)
        {
            self.names.remove(&previous);
        }
        self.names.insert(name.clone(), conn_id.to_string());

        self.send(conn_id, &ServerFrame::NameResult {
            ok: true,
            name: Some(name.clone()),
            reason: None,
        });
        info!(conn_id, name = %name, "name claimed");
        self.broadcast_system(&format!("{name} joined."));
        self.broadcast_presence();
        Ok(())
    }

    /// Named connections with their busy flag, ordered by name.
    pub fn presence_snapshot(&self) -> Vec<PresenceEntry> {
        let mut users: Vec<PresenceEntry> = self
            .connections
            .values()
            .filter_map(|c| {
                c.name.as_ref().map(|name| PresenceEntry {
                    id: c.conn_id.clone(),
                    name: name.clone(),
                    busy: c.room_id.is_some(),
                })
            })
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        users
    }

    /// Best-effort roster refresh to every named, open connection.
    /// Returns how many connections it reached.
    pub fn broadcast_presence(&self) -> usize {
        let frame = ServerFrame::Presence {
            users: self.presence_snapshot(),
            voice: self.voice_stats(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize presence");
                return 0;
            },
        };
        self.connections
            .values()
            .filter(|c| c.is_named() && c.is_open())
            .filter(|c| c.send(&text))
            .count()
    }
}

fn name_rejected(reason: NameRejection) -> ServerFrame {
    ServerFrame::NameResult {
        ok: false,
        name: None,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{TestClient, hub},
        serde_json::json,
        std::time::Instant,
    };

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_name("  Ann  ", 20).as_deref(), Some("Ann"));
        assert_eq!(normalize_name("e\u{301}lise", 20).as_deref(), Some("\u{e9}lise"));
        assert_eq!(normalize_name(&"ä".repeat(20), 20).map(|n| n.chars().count()), Some(20));
        assert!(normalize_name(&"a".repeat(21), 20).is_none());
        assert!(normalize_name("   ", 20).is_none());
        assert!(normalize_name("an\u{7}n", 20).is_none());
        assert!(normalize_name("tab\tname", 20).is_none());
    }

    #[test]
    fn names_are_unique_and_released_on_disconnect() {
        let mut hub = hub();
        let now = Instant::now();
        let ann = TestClient::named(&mut hub, "Ann", now);

        let mut other = TestClient::connect(&mut hub, now);
        other.send(&mut hub, json!({"type": "setName", "name": "Ann", "cMsgId": "n1"}), now);
        let result = other.take_type("nameResult").remove(0);
        assert_eq!(result, json!({"type": "nameResult", "ok": false, "reason": "taken"}));
        assert_eq!(other.take_type("receipt")[0]["code"], "NAME_TAKEN");

        hub.disconnect(&ann.id);
        other.send(&mut hub, json!({"type": "setName", "name": "Ann"}), now);
        assert_eq!(other.take_type("nameResult")[0]["ok"], true);
    }

    #[test]
    fn equivalent_spellings_collide() {
        let mut hub = hub();
        let now = Instant::now();
        TestClient::named(&mut hub, "\u{e9}lise", now);
        let mut other = TestClient::connect(&mut hub, now);
        other.send(&mut hub, json!({"type": "setName", "name": "e\u{301}lise"}), now);
        assert_eq!(other.take_type("nameResult")[0]["reason"], "taken");
    }

    #[test]
    fn renaming_releases_previous_name() {
        let mut hub = hub();
        let now = Instant::now();
        let ann = TestClient::named(&mut hub, "Ann", now);
        ann.send(&mut hub, json!({"type": "setName", "name": "Anna"}), now);
        // Renaming to the name already held is fine too.
        ann.send(&mut hub, json!({"type": "setName", "name": "Anna"}), now);

        let mut bob = TestClient::connect(&mut hub, now);
        bob.send(&mut hub, json!({"type": "setName", "name": "Ann"}), now);
        assert_eq!(bob.take_type("nameResult")[0]["ok"], true);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::connect(&mut hub, now);
        ann.send(&mut hub, json!({"type": "setName", "name": ""}), now);
        ann.send(&mut hub, json!({"type": "setName"}), now);
        let results = ann.take_type("nameResult");
        assert!(results.iter().all(|r| r["reason"] == "invalid"));
        assert!(hub.presence_snapshot().is_empty());
    }

    #[test]
    fn presence_goes_to_named_connections_only() {
        let mut hub = hub();
        let now = Instant::now();
        let mut anonymous = TestClient::connect(&mut hub, now);
        let mut ann = TestClient::named(&mut hub, "Ann", now);
        let mut bob = TestClient::named(&mut hub, "Bob", now);
        anonymous.drain();
        ann.drain();
        bob.drain();

        assert_eq!(hub.broadcast_presence(), 2);
        assert!(anonymous.drain().is_empty());
        let presence = ann.take_type("presence").remove(0);
        let names: Vec<&str> = presence["users"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Ann", "Bob"]);
        assert!(presence.get("msgId").is_none());
        assert_eq!(bob.take_type("presence").len(), 1);
    }

    #[test]
    fn joining_announces_to_everyone_named() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::named(&mut hub, "Ann", now);
        TestClient::named(&mut hub, "Bob", now);
        let chats = ann.take_type("chat");
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0]["text"], "Bob joined.");
        assert_eq!(chats[0]["fromName"], "System");
        assert!(chats[0]["from"].is_null());
    }

    #[test]
    fn busy_flag_tracks_room_membership() {
        let mut hub = hub();
        let now = Instant::now();
        let ann = TestClient::named(&mut hub, "Ann", now);
        let bob = TestClient::named(&mut hub, "Bob", now);
        ann.send(&mut hub, json!({"type": "callStart", "to": bob.id}), now);
        let busy: Vec<bool> = hub.presence_snapshot().iter().map(|e| e.busy).collect();
        assert_eq!(busy, vec![true, true]);
    }
}
