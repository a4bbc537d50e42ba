//! Wire protocol shared by the lrcom hub and its browser clients.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! decode into the closed [`ClientFrame`] set; anything else is rejected with
//! a [`DecodeError`] and never reaches the hub state machine.

pub mod inbound;
pub mod outbound;

pub use {
    inbound::{ClientFeatures, ClientFrame, DecodeError, PushKeys, PushSubscription, RawFrame},
    outbound::{
        CallReason, ChatMessage, IceConfig, IceServer, NameRejection, Peer, PresenceEntry,
        Receipt, ServerFrame, VoiceStats,
    },
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Display name used for hub-authored chat notices.
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Coalescing key of the reliable `hello` re-send.
pub const HELLO_COALESCE_KEY: &str = "hello";

/// Receipts use `receipt:<cMsgId>` both as logical id and coalescing key.
pub fn receipt_key(c_msg_id: &str) -> String {
    format!("receipt:{c_msg_id}")
}

/// Machine-readable codes carried by `error` frames and failing receipts.
pub mod error_codes {
    pub const BAD_JSON: &str = "BAD_JSON";
    pub const BAD_MESSAGE: &str = "BAD_MESSAGE";
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    pub const NO_NAME: &str = "NO_NAME";
    pub const INVALID_NAME: &str = "INVALID_NAME";
    pub const NAME_TAKEN: &str = "NAME_TAKEN";
    pub const BAD_CHAT: &str = "BAD_CHAT";
    pub const PM_NOT_FOUND: &str = "PM_NOT_FOUND";
    pub const PM_SELF: &str = "PM_SELF";
    pub const NOT_AUTHORIZED: &str = "NOT_AUTHORIZED";
    pub const NOT_PENDING: &str = "NOT_PENDING";
    pub const DROPPED: &str = "DROPPED";
    pub const PUSH_DISABLED: &str = "PUSH_DISABLED";
}

/// Inbound frame kinds, as they appear in the `type` field.
pub mod kinds {
    pub const SET_NAME: &str = "setName";
    pub const CHAT_SEND: &str = "chatSend";
    pub const CALL_START: &str = "callStart";
    pub const CALL_ACCEPT: &str = "callAccept";
    pub const CALL_REJECT: &str = "callReject";
    pub const CALL_HANGUP: &str = "callHangup";
    pub const CALL_JOIN_REQUEST: &str = "callJoinRequest";
    pub const CALL_JOIN_CANCEL: &str = "callJoinCancel";
    pub const CALL_JOIN_ACCEPT: &str = "callJoinAccept";
    pub const CALL_JOIN_REJECT: &str = "callJoinReject";
    pub const SIGNAL: &str = "signal";
    pub const ACK: &str = "ack";
    pub const PING: &str = "ping";
    pub const CLIENT_HELLO: &str = "clientHello";
    pub const PUSH_SUBSCRIBE: &str = "pushSubscribe";
    pub const PUSH_UNSUBSCRIBE: &str = "pushUnsubscribe";

    pub const ALL: &[&str] = &[
        SET_NAME,
        CHAT_SEND,
        CALL_START,
        CALL_ACCEPT,
        CALL_REJECT,
        CALL_HANGUP,
        CALL_JOIN_REQUEST,
        CALL_JOIN_CANCEL,
        CALL_JOIN_ACCEPT,
        CALL_JOIN_REJECT,
        SIGNAL,
        ACK,
        PING,
        CLIENT_HELLO,
        PUSH_SUBSCRIBE,
        PUSH_UNSUBSCRIBE,
    ];
}
