//! Rooms: 1:1 calls that grow into full-mesh conferences.
//!
//! A room exists while it has at least two members; once a departure leaves
//! one member behind it is dissolved and that member gets `callEnded`.
//! Outsiders ask to join through a per-room FIFO queue that the room owner
//! answers one request at a time.

use std::collections::{HashMap, VecDeque};

use {
    lrcom_protocol::{CallReason, Peer, ServerFrame},
    tracing::{debug, info, warn},
};

use crate::{
    error::{OpError, OpResult},
    hub::{Hub, new_id},
    push::PushPayload,
    state::Connection,
};

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    /// Members in join order.
    pub members: Vec<String>,
    /// Approver of join requests.
    pub owner: Option<String>,
    pub join_queue: VecDeque<String>,
    /// The request currently presented to the owner.
    pub join_active: Option<String>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: Vec::new(),
            owner: None,
            join_queue: VecDeque::new(),
            join_active: None,
        }
    }

    pub fn has_member(&self, conn_id: &str) -> bool {
        self.members.iter().any(|m| m == conn_id)
    }

    pub fn add_member(&mut self, conn_id: &str) {
        if !self.has_member(conn_id) {
            self.members.push(conn_id.to_string());
        }
    }

    pub fn remove_member(&mut self, conn_id: &str) {
        self.members.retain(|m| m != conn_id);
    }

    pub fn has_join_request(&self, conn_id: &str) -> bool {
        self.join_active.as_deref() == Some(conn_id) || self.join_queue.iter().any(|q| q == conn_id)
    }

    pub fn remove_join_request(&mut self, conn_id: &str) {
        self.join_queue.retain(|q| q != conn_id);
        if self.join_active.as_deref() == Some(conn_id) {
            self.join_active = None;
        }
    }
}

/// Keep the current owner while it is still a connected member, otherwise
/// promote the earliest connected member.
fn pick_owner(room: &Room, connections: &HashMap<String, Connection>) -> Option<String> {
    let connected = |id: &String| connections.get(id).is_some_and(Connection::is_open);
    if let Some(owner) = &room.owner
        && room.has_member(owner)
        && connected(owner)
    {
        return Some(owner.clone());
    }
    room.members.iter().find(|m| connected(m)).cloned()
}

impl Hub {
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    fn name_of(&self, conn_id: &str) -> String {
        self.connections
            .get(conn_id)
            .and_then(|c| c.name.clone())
            .unwrap_or_default()
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    pub(crate) fn start_call(&mut self, caller_id: &str, to: Option<&str>) -> OpResult {
        let Some(callee_id) = to else {
            return self.fail_start(caller_id, CallReason::NotFound);
        };
        if callee_id == caller_id {
            return self.fail_start(caller_id, CallReason::SelfTarget);
        }
        let Some(callee) = self.connections.get(callee_id) else {
            return self.fail_start(caller_id, CallReason::NotFound);
        };
        if !callee.is_named() {
            return self.fail_start(caller_id, CallReason::NotReady);
        }
        if callee.room_id.is_some() {
            return self.fail_start(caller_id, CallReason::Busy);
        }

        // Being pulled into a call supersedes any pending join request.
        self.withdraw_join(caller_id, Some(CallReason::Canceled));
        self.withdraw_join(callee_id, Some(CallReason::Canceled));

        let existing = self
            .connections
            .get(caller_id)
            .and_then(|c| c.room_id.clone());
        let room_id = existing.unwrap_or_else(new_id);
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));
        room.add_member(caller_id);
        room.add_member(callee_id);
        if room.owner.is_none() {
            room.owner = Some(caller_id.to_string());
        }
        for id in [caller_id, callee_id] {
            if let Some(conn) = self.connections.get_mut(id) {
                conn.room_id = Some(room_id.clone());
            }
        }

        let caller_name = self.name_of(caller_id);
        self.send(callee_id, &ServerFrame::IncomingCall {
            from: caller_id.to_string(),
            from_name: caller_name.clone(),
            room_id: room_id.clone(),
        });
        self.notify_push(callee_id, PushPayload::incoming_call(&caller_name));
        self.send(caller_id, &ServerFrame::CallStartResult {
            ok: true,
            reason: None,
        });
        info!(room_id = %room_id, caller = caller_id, callee = callee_id, "call started");
        self.broadcast_presence();
        Ok(())
    }

    fn fail_start(&mut self, caller_id: &str, reason: CallReason) -> OpResult {
        debug!(conn_id = caller_id, reason = %reason, "call start refused");
        self.send(caller_id, &ServerFrame::start_failed(reason));
        Err(reason.into())
    }

    pub(crate) fn accept_call(
        &mut self,
        conn_id: &str,
        from: Option<&str>,
        room_id: Option<&str>,
    ) -> OpResult {
        let current = self.connections.get(conn_id).and_then(|c| c.room_id.clone());
        let room_id = room_id.map(str::to_string).or_else(|| current.clone());
        let caller_room = from
            .and_then(|f| self.connections.get(f))
            .map(|c| c.room_id.clone());

        let check = match (&room_id, caller_room) {
            (_, None) => Err(CallReason::NotFound),
            (None, Some(_)) => Err(CallReason::RoomMismatch),
            (Some(rid), Some(caller_room)) => {
                if caller_room.as_ref() != Some(rid) || current.as_ref() != Some(rid) {
                    Err(CallReason::RoomMismatch)
                } else if !self.rooms.contains_key(rid) {
                    Err(CallReason::RoomMissing)
                } else {
                    Ok(rid.clone())
                }
            },
        };

        match check {
            Ok(rid) => {
                if let Some(room) = self.rooms.get_mut(&rid) {
                    room.add_member(conn_id);
                }
                info!(room_id = %rid, conn_id, "call accepted");
                self.announce_peer(&rid, conn_id);
                Ok(())
            },
            Err(reason) => {
                warn!(conn_id, reason = %reason, "call accept failed");
                // A stale accept leaves the current call untouched.
                if room_id.is_some() && current == room_id {
                    self.leave_room(conn_id);
                    self.send(conn_id, &ServerFrame::CallEnded { reason });
                    self.broadcast_presence();
                }
                Err(reason.into())
            },
        }
    }

    pub(crate) fn reject_call(
        &mut self,
        conn_id: &str,
        from: Option<&str>,
        room_id: Option<&str>,
    ) -> OpResult {
        if let Some(caller_id) = from
            && self.connections.contains_key(caller_id)
        {
            self.send(caller_id, &ServerFrame::CallRejected {
                reason: CallReason::Rejected,
            });
        }
        let current = self.connections.get(conn_id).and_then(|c| c.room_id.clone());
        let target = room_id.map(str::to_string).or_else(|| current.clone());
        if target.is_some() && target == current {
            info!(room_id = ?target, conn_id, "call rejected");
            self.leave_room(conn_id);
        }
        self.broadcast_presence();
        Ok(())
    }

    pub(crate) fn hangup(&mut self, conn_id: &str) -> OpResult {
        self.leave_room(conn_id);
        self.broadcast_presence();
        Ok(())
    }

    /// Tell existing members about a new peer and give the newcomer the
    /// current member list, so every pair negotiates exactly once.
    fn announce_peer(&mut self, room_id: &str, joiner_id: &str) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let others: Vec<String> = room
            .members
            .iter()
            .filter(|m| *m != joiner_id)
            .cloned()
            .collect();
        let peer = Peer {
            id: joiner_id.to_string(),
            name: self.name_of(joiner_id),
        };
        let peers: Vec<Peer> = others
            .iter()
            .map(|id| Peer {
                id: id.clone(),
                name: self.name_of(id),
            })
            .collect();

        for member in &others {
            self.send(member, &ServerFrame::RoomPeerJoined {
                room_id: room_id.to_string(),
                peer: peer.clone(),
            });
        }
        self.send(joiner_id, &ServerFrame::RoomPeers {
            room_id: room_id.to_string(),
            peers,
        });
    }

    /// Remove a connection from its room, notify the remaining members and
    /// either dissolve the room or advance its join queue.
    pub(crate) fn leave_room(&mut self, conn_id: &str) {
        let Some(room_id) = self
            .connections
            .get_mut(conn_id)
            .and_then(|c| c.room_id.take())
        else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        room.remove_member(conn_id);
        room.remove_join_request(conn_id);
        let previous_owner = room.owner.clone();
        room.owner = pick_owner(room, &self.connections);
        // A request the old owner was deciding goes to the new one.
        if room.owner != previous_owner
            && let Some(active) = room.join_active.take()
        {
            room.join_queue.push_front(active);
        }
        let remaining = room.members.clone();

        debug!(room_id = %room_id, conn_id, remaining = remaining.len(), "left room");
        for member in &remaining {
            self.send(member, &ServerFrame::RoomPeerLeft {
                room_id: room_id.clone(),
                peer_id: conn_id.to_string(),
            });
        }

        if remaining.len() <= 1 {
            self.dissolve_room(&room_id);
        } else {
            self.pump_join_queue(&room_id);
        }
    }

    fn dissolve_room(&mut self, room_id: &str) {
        let Some(room) = self.rooms.remove(room_id) else {
            return;
        };
        for member in &room.members {
            if let Some(conn) = self.connections.get_mut(member)
                && conn.room_id.as_deref() == Some(room_id)
            {
                conn.room_id = None;
            }
            self.send(member, &ServerFrame::CallEnded {
                reason: CallReason::Alone,
            });
        }
        for requester in room.join_queue.iter().chain(room.join_active.iter()) {
            self.clear_pending(requester, room_id);
            self.send(requester, &ServerFrame::join_failed(CallReason::Ended));
        }
        info!(room_id, "room dissolved");
    }

    // ── Join admission ───────────────────────────────────────────────────────

    pub(crate) fn request_join(&mut self, requester_id: &str, to: Option<&str>) -> OpResult {
        let Some(target_id) = to else {
            return self.fail_join(requester_id, CallReason::NotFound);
        };
        let Some(target) = self.connections.get(target_id) else {
            return self.fail_join(requester_id, CallReason::NotFound);
        };
        if target_id == requester_id {
            return self.fail_join(requester_id, CallReason::SelfTarget);
        }
        let target_named = target.is_named();
        let target_room = target.room_id.clone();
        let Some(requester) = self.connections.get(requester_id) else {
            return Ok(());
        };
        if requester.room_id.is_some() {
            return self.fail_join(requester_id, CallReason::AlreadyInCall);
        }
        if requester.join_pending_room_id.is_some() {
            return self.fail_join(requester_id, CallReason::AlreadyPending);
        }
        if !target_named {
            return self.fail_join(requester_id, CallReason::NotReady);
        }
        let Some(room_id) = target_room.filter(|rid| self.rooms.contains_key(rid)) else {
            return self.fail_join(requester_id, CallReason::NotInCall);
        };

        if let Some(room) = self.rooms.get_mut(&room_id)
            && !room.has_join_request(requester_id)
        {
            room.join_queue.push_back(requester_id.to_string());
        }
        if let Some(conn) = self.connections.get_mut(requester_id) {
            conn.join_pending_room_id = Some(room_id.clone());
        }

        let to_name = self.name_of(target_id);
        self.send(requester_id, &ServerFrame::CallJoinPending {
            room_id: room_id.clone(),
            to_name,
        });
        info!(room_id = %room_id, requester = requester_id, "join requested");
        self.pump_join_queue(&room_id);
        Ok(())
    }

    fn fail_join(&mut self, requester_id: &str, reason: CallReason) -> OpResult {
        debug!(conn_id = requester_id, reason = %reason, "join request refused");
        self.send(requester_id, &ServerFrame::join_failed(reason));
        Err(reason.into())
    }

    pub(crate) fn cancel_join(&mut self, requester_id: &str) -> OpResult {
        if self.withdraw_join(requester_id, Some(CallReason::Canceled)) {
            Ok(())
        } else {
            Err(OpError::NotPending)
        }
    }

    /// Drop a connection's pending join request, optionally telling it why.
    /// Returns whether there was one.
    pub(crate) fn withdraw_join(&mut self, requester_id: &str, notify: Option<CallReason>) -> bool {
        let Some(room_id) = self
            .connections
            .get_mut(requester_id)
            .and_then(|c| c.join_pending_room_id.take())
        else {
            return false;
        };
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.remove_join_request(requester_id);
        }
        if let Some(reason) = notify {
            self.send(requester_id, &ServerFrame::join_failed(reason));
        }
        debug!(room_id = %room_id, requester = requester_id, "join request withdrawn");
        self.pump_join_queue(&room_id);
        true
    }

    fn clear_pending(&mut self, requester_id: &str, room_id: &str) {
        if let Some(conn) = self.connections.get_mut(requester_id)
            && conn.join_pending_room_id.as_deref() == Some(room_id)
        {
            conn.join_pending_room_id = None;
        }
    }

    /// Present the next eligible queued request to the room owner, unless
    /// one is already being decided.
    pub(crate) fn pump_join_queue(&mut self, room_id: &str) {
        loop {
            let Some(room) = self.rooms.get_mut(room_id) else {
                return;
            };
            if room.join_active.is_some() {
                return;
            }
            let Some(next) = room.join_queue.front().cloned() else {
                return;
            };
            let eligible = self.connections.get(&next).is_some_and(|c| {
                c.is_named()
                    && c.room_id.is_none()
                    && c.join_pending_room_id.as_deref() == Some(room_id)
            });
            if !eligible {
                room.join_queue.pop_front();
                continue;
            }

            let Some(owner) = pick_owner(room, &self.connections) else {
                room.owner = None;
                let rejected: Vec<String> = room.join_queue.drain(..).collect();
                warn!(room_id, rejected = rejected.len(), "no approver for join requests");
                for requester in &rejected {
                    self.clear_pending(requester, room_id);
                    self.send(requester, &ServerFrame::join_failed(CallReason::NoApprover));
                }
                return;
            };
            room.owner = Some(owner.clone());
            room.join_queue.pop_front();
            room.join_active = Some(next.clone());

            let from_name = self.name_of(&next);
            debug!(room_id, requester = %next, owner = %owner, "presenting join request");
            self.send(&owner, &ServerFrame::JoinRequest {
                from: next,
                from_name,
                room_id: room_id.to_string(),
            });
            return;
        }
    }

    pub(crate) fn answer_join(
        &mut self,
        owner_id: &str,
        from: Option<&str>,
        room_id: Option<&str>,
        accept: bool,
    ) -> OpResult {
        let (Some(requester_id), Some(room_id)) = (from, room_id) else {
            return Err(OpError::NotAuthorized);
        };
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(OpError::NotAuthorized);
        };
        room.owner = pick_owner(room, &self.connections);
        if room.owner.as_deref() != Some(owner_id)
            || !room.has_member(owner_id)
            || room.join_active.as_deref() != Some(requester_id)
        {
            debug!(room_id, conn_id = owner_id, "ignoring unauthorized join answer");
            return Err(OpError::NotAuthorized);
        }
        room.join_active = None;

        let requester_ready = self
            .connections
            .get(requester_id)
            .is_some_and(|c| c.is_named() && c.room_id.is_none());
        if !requester_ready {
            self.clear_pending(requester_id, room_id);
            self.pump_join_queue(room_id);
            return Err(CallReason::NotFound.into());
        }
        self.clear_pending(requester_id, room_id);

        if !accept {
            info!(room_id, requester = requester_id, "join rejected");
            self.send(requester_id, &ServerFrame::join_failed(CallReason::Rejected));
            self.pump_join_queue(room_id);
            return Ok(());
        }

        if let Some(room) = self.rooms.get_mut(room_id) {
            room.add_member(requester_id);
        }
        if let Some(conn) = self.connections.get_mut(requester_id) {
            conn.room_id = Some(room_id.to_string());
        }
        info!(room_id, requester = requester_id, "join accepted");
        self.send(requester_id, &ServerFrame::CallJoinResult {
            ok: true,
            reason: None,
            room_id: Some(room_id.to_string()),
        });
        self.announce_peer(room_id, requester_id);
        self.broadcast_presence();
        self.pump_join_queue(room_id);
        Ok(())
    }
}
