//! Message values passed between the codec, handlers and routers.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{ID_LEN, MsgId};

/// Marker for types that can travel in a frame.
///
/// Opt-in so that only deliberate protocol types can be registered:
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Ping {
///     seq: u32,
/// }
///
/// impl tollgate_codec::Message for Ping {}
/// ```
pub trait Message: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {}

trait Body: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> Body for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── TypedMessage ───────────────────────────────────────────────────

/// A decoded message with its concrete type erased.
///
/// Cloning is cheap (shared body), so a handler and a router can both
/// receive the same value.
#[derive(Clone)]
pub struct TypedMessage {
    message_type: TypeId,
    type_name: &'static str,
    body: Arc<dyn Body>,
}

impl TypedMessage {
    pub fn new<T: Message>(message: T) -> Self {
        Self {
            message_type: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            body: Arc::new(message),
        }
    }

    /// Static type identity of the wrapped value.
    pub fn message_type(&self) -> TypeId {
        self.message_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Message>(&self) -> bool {
        self.message_type == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        (*self.body).as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for TypedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.body, f)
    }
}

// ─── RawMessage ─────────────────────────────────────────────────────

/// A frame left undecoded: id plus the payload bytes as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    id: MsgId,
    payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(id: MsgId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> MsgId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

// ─── Incoming ───────────────────────────────────────────────────────

/// Output of `Registry::unmarshal`, input of `Registry::route`.
#[derive(Debug, Clone)]
pub enum Incoming {
    Typed(TypedMessage),
    Raw(RawMessage),
}

impl Incoming {
    pub fn typed<T: Message>(message: T) -> Self {
        Self::Typed(TypedMessage::new(message))
    }

    pub fn as_typed(&self) -> Option<&TypedMessage> {
        match self {
            Self::Typed(message) => Some(message),
            Self::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawMessage> {
        match self {
            Self::Raw(raw) => Some(raw),
            Self::Typed(_) => None,
        }
    }
}

// ─── Frame ──────────────────────────────────────────────────────────

/// An encoded frame kept as two segments (id prefix, payload) so the
/// transport can write them without concatenating first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: [u8; ID_LEN],
    payload: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(id: [u8; ID_LEN], payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn id_bytes(&self) -> &[u8] {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn parts(&self) -> [&[u8]; 2] {
        [&self.id, &self.payload]
    }

    pub fn encoded_len(&self) -> usize {
        ID_LEN + self.payload.len()
    }

    /// Contiguous copy of the frame, for transports that need one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.payload);
        out
    }
}
