use std::fmt;

/// Failure to decode a frame or a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Empty,
    Truncated,
    InvalidUtf8,
    UnknownCommand,
    MalformedField(&'static str),
    UnexpectedStatus([u8; 2]),
    FieldTooLong { field: &'static str, len: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Empty =>
                write!(f, "empty frame"),
            ProtocolError::Truncated =>
                write!(f, "truncated frame"),
            ProtocolError::InvalidUtf8 =>
                write!(f, "frame is not valid UTF-8"),
            ProtocolError::UnknownCommand =>
                write!(f, "unknown command"),
            ProtocolError::MalformedField(name) =>
                write!(f, "malformed field '{}'", name),
            ProtocolError::UnexpectedStatus(sw) =>
                write!(f, "unexpected status word {:02X}{:02X}", sw[0], sw[1]),
            ProtocolError::FieldTooLong { field, len } =>
                write!(f, "{} of {} does not fit a short length field", field, len),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Failure of an initiator-side transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Link dropped or I/O failed during a turn
    Transport(String),
    /// Target answered a control frame with a non-success status
    Rejected(&'static str),
    /// No response within the transfer timeout
    Timeout,
    /// Every unacknowledged chunk used up its attempts
    AttemptsExhausted { acked: usize, total: usize },
    /// Retry window elapsed without a successful reconnection
    RetryExpired,
    /// Nothing queued to send
    NoSession,
    /// Command cannot be put on the wire
    Encode(ProtocolError),
}

impl TransferError {
    /// Errors the retry window may recover from
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::Transport(_)
                | TransferError::Rejected(_)
                | TransferError::AttemptsExhausted { .. }
        )
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Transport(msg) =>
                write!(f, "transport error: {}", msg),
            TransferError::Rejected(what) =>
                write!(f, "target rejected {}", what),
            TransferError::Timeout =>
                write!(f, "transfer timed out"),
            TransferError::AttemptsExhausted { acked, total } =>
                write!(f, "attempts exhausted with {}/{} chunks acknowledged", acked, total),
            TransferError::RetryExpired =>
                write!(f, "retry timeout expired"),
            TransferError::NoSession =>
                write!(f, "no transfer session"),
            TransferError::Encode(e) =>
                write!(f, "cannot encode command: {}", e),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<anyhow::Error> for TransferError {
    fn from(e: anyhow::Error) -> Self {
        TransferError::Transport(e.to_string())
    }
}
