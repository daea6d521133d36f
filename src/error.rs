use thiserror::Error;

/// Errors returned by the packet transport contract.
///
/// The variants fall into three classes that callers are expected to treat differently:
/// * transient ([PacketError::is_transient]): try the same operation again later, the request
///    did not fail
/// * fatal ([PacketError::is_fatal]): the channel is unusable and must be replaced
/// * everything else rejects this one call, leaving no state behind
///
/// Malformed or unmatched incoming data is never reported here - it is logged and dropped.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("all 256 identifiers for code {code} are in use")]
    Busy { code: u8 },

    #[error("output queue is full with {pending} bytes pending")]
    OutputBlocked { pending: usize },

    #[error("no retry policy is configured for code {code}")]
    NoRetryPolicy { code: u8 },

    #[error("packet length {len} exceeds the maximum of {max} bytes")]
    PacketTooLarge { len: usize, max: usize },

    #[error("error encoding packet: {0:#}")]
    Encode(anyhow::Error),

    #[error("channel failed: {0}")]
    ChannelFailed(FailureCause),
}

impl PacketError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PacketError::Busy { .. } | PacketError::OutputBlocked { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PacketError::ChannelFailed(_))
    }
}

/// The reason a channel became unusable. This is retained by the channel and handed out with
///  every failure it causes, so it is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("connection closed by peer")]
    Closed,
    #[error("transport error ({kind:?}): {message}")]
    Io { kind: std::io::ErrorKind, message: String },
}

impl From<std::io::Error> for FailureCause {
    fn from(e: std::io::Error) -> Self {
        FailureCause::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
