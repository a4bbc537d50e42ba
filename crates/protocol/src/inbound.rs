use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::{error_codes, kinds};

/// Why an inbound text frame was refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON")]
    BadJson,
    #[error("frame is not an object with a string `type`")]
    BadMessage,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

impl DecodeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadJson => error_codes::BAD_JSON,
            Self::BadMessage => error_codes::BAD_MESSAGE,
            Self::UnknownType(_) => error_codes::UNKNOWN_TYPE,
        }
    }
}

/// Capabilities announced in `clientHello`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFeatures {
    #[serde(default)]
    pub ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Browser `PushSubscription.toJSON()` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Closed set of client-originated operations.
///
/// Target and correlation fields are optional on the wire; the hub decides
/// what a missing one means (usually `not_found`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    SetName {
        name: Option<String>,
    },
    ChatSend {
        text: Option<String>,
        to_name: Option<String>,
    },
    CallStart {
        to: Option<String>,
    },
    CallAccept {
        from: Option<String>,
        room_id: Option<String>,
    },
    CallReject {
        from: Option<String>,
        room_id: Option<String>,
    },
    CallHangup,
    CallJoinRequest {
        to: Option<String>,
    },
    CallJoinCancel,
    CallJoinAccept {
        from: Option<String>,
        room_id: Option<String>,
    },
    CallJoinReject {
        from: Option<String>,
        room_id: Option<String>,
    },
    Signal {
        to: Option<String>,
        payload: Option<Value>,
    },
    Ack {
        msg_id: Option<String>,
    },
    Ping,
    ClientHello {
        features: Option<ClientFeatures>,
    },
    PushSubscribe {
        subscription: Option<PushSubscription>,
    },
    PushUnsubscribe,
}

/// A syntactically valid frame whose payload has not been typed yet.
///
/// Splitting the decode lets the hub look up idempotency receipts and apply
/// rate limits by `kind` before per-variant validation runs.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub kind: String,
    pub c_msg_id: Option<String>,
    body: Map<String, Value>,
}

impl RawFrame {
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::BadJson)?;
        let Value::Object(body) = value else {
            return Err(DecodeError::BadMessage);
        };
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::BadMessage)?
            .to_string();
        let c_msg_id = body
            .get("cMsgId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            kind,
            c_msg_id,
            body,
        })
    }

    pub fn is_known(&self) -> bool {
        kinds::ALL.contains(&self.kind.as_str())
    }

    /// Type the frame. Known kinds with ill-typed fields are `BadMessage`.
    pub fn decode(self) -> Result<ClientFrame, DecodeError> {
        if !self.is_known() {
            return Err(DecodeError::UnknownType(self.kind));
        }
        serde_json::from_value(Value::Object(self.body)).map_err(|_| DecodeError::BadMessage)
    }
}
