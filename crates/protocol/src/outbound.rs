use std::fmt;

use {serde::Serialize, serde_json::Value};

/// Outcome reasons for call and join-admission operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallReason {
    NotFound,
    #[serde(rename = "self")]
    SelfTarget,
    Busy,
    NotReady,
    AlreadyInCall,
    AlreadyPending,
    NotInCall,
    RoomMismatch,
    RoomMissing,
    NoApprover,
    Rejected,
    Canceled,
    Ended,
    Alone,
}

impl CallReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::SelfTarget => "self",
            Self::Busy => "busy",
            Self::NotReady => "not_ready",
            Self::AlreadyInCall => "already_in_call",
            Self::AlreadyPending => "already_pending",
            Self::NotInCall => "not_in_call",
            Self::RoomMismatch => "room_mismatch",
            Self::RoomMissing => "room_missing",
            Self::NoApprover => "no_approver",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
            Self::Ended => "ended",
            Self::Alone => "alone",
        }
    }

    /// Upper-case form used in receipts (`not_found` → `NOT_FOUND`).
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::SelfTarget => "SELF",
            Self::Busy => "BUSY",
            Self::NotReady => "NOT_READY",
            Self::AlreadyInCall => "ALREADY_IN_CALL",
            Self::AlreadyPending => "ALREADY_PENDING",
            Self::NotInCall => "NOT_IN_CALL",
            Self::RoomMismatch => "ROOM_MISMATCH",
            Self::RoomMissing => "ROOM_MISSING",
            Self::NoApprover => "NO_APPROVER",
            Self::Rejected => "REJECTED",
            Self::Canceled => "CANCELED",
            Self::Ended => "ENDED",
            Self::Alone => "ALONE",
        }
    }
}

impl fmt::Display for CallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameRejection {
    Invalid,
    Taken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub id: String,
    pub name: String,
    pub busy: bool,
}

/// Advisory relay/mesh capacity figures. Never used to gate admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStats {
    pub turn_host: Option<String>,
    pub relay_ports_total: Option<u32>,
    pub relay_ports_used_estimate: u64,
    pub capacity_calls_estimate: Option<u32>,
    pub max_conference_users_estimate: Option<u64>,
    pub active_calls: usize,
    pub peer_links: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub at_iso: String,
    /// `None` for hub-authored notices.
    pub from: Option<String>,
    pub from_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,
    pub text: String,
    pub private: bool,
    pub msg_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub c_msg_id: String,
    pub msg_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub at_iso: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Hello {
        id: String,
        turn: IceConfig,
        https: bool,
        client_ip: Option<String>,
        turn_warning: Option<String>,
        voice: VoiceStats,
    },
    NameResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<NameRejection>,
    },
    Presence {
        users: Vec<PresenceEntry>,
        voice: VoiceStats,
    },
    Chat(ChatMessage),
    CallStartResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<CallReason>,
    },
    IncomingCall {
        from: String,
        from_name: String,
        room_id: String,
    },
    CallRejected {
        reason: CallReason,
    },
    CallJoinPending {
        room_id: String,
        to_name: String,
    },
    JoinRequest {
        from: String,
        from_name: String,
        room_id: String,
    },
    CallJoinResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<CallReason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    RoomPeers {
        room_id: String,
        peers: Vec<Peer>,
    },
    RoomPeerJoined {
        room_id: String,
        peer: Peer,
    },
    RoomPeerLeft {
        room_id: String,
        peer_id: String,
    },
    CallEnded {
        reason: CallReason,
    },
    Signal {
        from: String,
        from_name: String,
        payload: Value,
    },
    Pong {
        at: i64,
    },
    Receipt(Receipt),
    Error {
        code: String,
    },
}

impl ServerFrame {
    pub fn error(code: impl Into<String>) -> Self {
        Self::Error { code: code.into() }
    }

    pub fn join_failed(reason: CallReason) -> Self {
        Self::CallJoinResult {
            ok: false,
            reason: Some(reason),
            room_id: None,
        }
    }

    pub fn start_failed(reason: CallReason) -> Self {
        Self::CallStartResult {
            ok: false,
            reason: Some(reason),
        }
    }
}
