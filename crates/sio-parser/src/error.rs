use thiserror::Error;

/// Error while decoding inbound packet buffers.
///
/// All of these are protocol violations: the connection that produced them
/// cannot be trusted to stay in sync and is expected to be closed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid packet type")]
    InvalidPacketType,

    #[error("malformed packet header: {0}")]
    MalformedHeader(&'static str),

    #[error("packet declares {count} attachments, configured maximum is {max}")]
    TooManyAttachments { count: usize, max: usize },

    #[error("binary buffer received with no packet under reconstruction")]
    UnexpectedBinary,

    #[error("text packet received while collecting binary attachments")]
    UnexpectedText,

    #[error("malformed binary placeholder in payload")]
    MalformedPlaceholder,

    #[error("binary placeholder refers to attachment {0}, which was not received")]
    PlaceholderOutOfRange(usize),

    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error while encoding an outbound packet.
///
/// Nothing is transmitted when encoding fails; partial output is discarded.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload cannot be serialized: {0}")]
    Json(#[from] serde_json::Error),

    #[error("non-finite float cannot be encoded as JSON")]
    NonFiniteFloat,

    #[error("binary data is not allowed in a {0} packet")]
    BinaryNotAllowed(&'static str),
}

/// Error while converting decoded payload values into declared argument types.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("handler declares {expected} argument(s), packet carried {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("argument has unexpected type: expected {expected}")]
    WrongType { expected: &'static str },

    #[error("binary data cannot be decoded as a plain JSON value")]
    UnexpectedBinary,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
