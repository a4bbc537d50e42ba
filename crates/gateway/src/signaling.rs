//! Opaque WebRTC signaling relay between members of the same room.

use {lrcom_protocol::ServerFrame, serde_json::Value, tracing::trace};

use crate::{
    error::{OpError, OpResult},
    hub::Hub,
};

impl Hub {
    /// Forward `payload` to `to` when both sides share a room. Anything else
    /// is dropped without telling the sender. Relays are never retried:
    /// stale offers and candidates are worse than lost ones.
    pub(crate) fn relay_signal(&mut self, from_id: &str, to: Option<&str>, payload: Value) -> OpResult {
        let Some(to_id) = to else {
            return Err(OpError::Dropped);
        };
        let Some(sender) = self.connections.get(from_id) else {
            return Err(OpError::Dropped);
        };
        let shared_room = self
            .connections
            .get(to_id)
            .is_some_and(|peer| peer.room_id.is_some() && peer.room_id == sender.room_id);
        if !shared_room {
            trace!(from = from_id, to = to_id, "dropping signal outside shared room");
            return Err(OpError::Dropped);
        }

        let frame = ServerFrame::Signal {
            from: from_id.to_string(),
            from_name: sender.name.clone().unwrap_or_default(),
            payload,
        };
        if !self.send_best_effort(to_id, &frame) {
            trace!(from = from_id, to = to_id, "signal target transport closed");
        }
        Ok(())
    }
}
