//! Error types for registration, framing and routing.

use thiserror::Error;

use crate::{ID_LEN, MAX_MESSAGE_KINDS, MsgId};

/// Errors raised while building a registry.
///
/// These are programmer errors: startup code propagates them to `main`,
/// which aborts the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("message {type_name} is already registered")]
    AlreadyRegistered { type_name: &'static str },

    #[error("too many messages (max = {MAX_MESSAGE_KINDS})")]
    TooManyMessages,

    #[error("message id {id} is already taken by {existing}")]
    IdInUse { id: MsgId, existing: &'static str },

    #[error("message {type_name} is not registered")]
    NotRegistered { type_name: &'static str },

    #[error("message id {id} is not registered")]
    UnknownId { id: MsgId },
}

/// Payload serializer failure.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from `marshal` / `unmarshal`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {len} bytes, need at least {ID_LEN}")]
    TooShort { len: usize },

    #[error("message id {id} is not registered")]
    UnknownId { id: MsgId },

    #[error("message {type_name} is not registered")]
    Unregistered { type_name: &'static str },

    #[error("failed to decode {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: PayloadError,
    },

    #[error("failed to encode {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: PayloadError,
    },
}

/// Errors from `route`. Each one ends the offending connection's read loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("message {type_name} is not registered")]
    Unregistered { type_name: &'static str },

    #[error("raw message id {id} is not registered")]
    UnknownId { id: MsgId },

    #[error("router for {type_name} is closed")]
    RouterClosed { type_name: &'static str },
}
