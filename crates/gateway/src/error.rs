use lrcom_protocol::{CallReason, DecodeError, error_codes};

/// Why an inbound operation was not carried out.
///
/// Each variant maps to the stable code reported in `receipt.code` (and, for
/// operations that answer with an `error` frame, in `error.code`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("rate limited")]
    RateLimited,
    #[error("a display name is required")]
    NoName,
    #[error("invalid display name")]
    InvalidName,
    #[error("display name already taken")]
    NameTaken,
    #[error("invalid chat text")]
    BadChat,
    #[error("private message recipient not found")]
    PmNotFound,
    #[error("private message addressed to self")]
    PmSelf,
    #[error("call operation failed: {0}")]
    Call(CallReason),
    #[error("not authorized to answer this join request")]
    NotAuthorized,
    #[error("no pending join request")]
    NotPending,
    /// Silently discarded; no receipt is sent.
    #[error("frame dropped")]
    Dropped,
    #[error("push notifications are disabled")]
    PushDisabled,
}

impl OpError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(e) => e.code(),
            Self::RateLimited => error_codes::RATE_LIMIT,
            Self::NoName => error_codes::NO_NAME,
            Self::InvalidName => error_codes::INVALID_NAME,
            Self::NameTaken => error_codes::NAME_TAKEN,
            Self::BadChat => error_codes::BAD_CHAT,
            Self::PmNotFound => error_codes::PM_NOT_FOUND,
            Self::PmSelf => error_codes::PM_SELF,
            Self::Call(reason) => reason.code(),
            Self::NotAuthorized => error_codes::NOT_AUTHORIZED,
            Self::NotPending => error_codes::NOT_PENDING,
            Self::Dropped => error_codes::DROPPED,
            Self::PushDisabled => error_codes::PUSH_DISABLED,
        }
    }
}

impl From<CallReason> for OpError {
    fn from(reason: CallReason) -> Self {
        Self::Call(reason)
    }
}

pub type OpResult = Result<(), OpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(OpError::from(DecodeError::BadMessage).code(), "BAD_MESSAGE");
        assert_eq!(
            OpError::Decode(DecodeError::UnknownType("x".into())).code(),
            "UNKNOWN_TYPE"
        );
        assert_eq!(OpError::from(CallReason::Busy).code(), "BUSY");
        assert_eq!(OpError::RateLimited.code(), "RATE_LIMIT");
        assert_eq!(
            OpError::Call(CallReason::NoApprover).to_string(),
            "call operation failed: no_approver"
        );
    }
}
