//! Message registry: id assignment, marshal/unmarshal and routing.
//!
//! The registry has two phases. [`RegistryBuilder`] is mutable and owns
//! registration plus handler/router attachment. [`RegistryBuilder::seal`]
//! turns it into a [`Registry`], which has no mutating methods and is shared
//! read-only by every connection task.
//!
//! Each [`Descriptor`] carries the encode/decode functions monomorphised for
//! its message type at registration, so decoding is a table lookup by id.

use std::any::{TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{CodecError, RegistryError, RouteError};
use crate::format::{ByteOrder, PayloadFormat};
use crate::message::{Frame, Incoming, Message, RawMessage, TypedMessage};
use crate::router::{Delivery, Router};
use crate::{ID_LEN, MAX_MESSAGE_KINDS, MsgId};

type EncodeFn = fn(&TypedMessage, PayloadFormat) -> Result<Vec<u8>, CodecError>;
type DecodeFn = fn(&[u8], PayloadFormat) -> Result<TypedMessage, CodecError>;
type Handler<C> = Box<dyn Fn(&TypedMessage, &C) + Send + Sync>;
type RawHandler<C> = Box<dyn Fn(&RawMessage, &C) + Send + Sync>;

fn encode_as<T: Message>(
    message: &TypedMessage,
    format: PayloadFormat,
) -> Result<Vec<u8>, CodecError> {
    let value = message
        .downcast_ref::<T>()
        .ok_or(CodecError::Unregistered {
            type_name: message.type_name(),
        })?;
    format.encode(value).map_err(|source| CodecError::Encode {
        type_name: type_name::<T>(),
        source,
    })
}

fn decode_as<T: Message>(payload: &[u8], format: PayloadFormat) -> Result<TypedMessage, CodecError> {
    let value: T = format.decode(payload).map_err(|source| CodecError::Decode {
        type_name: type_name::<T>(),
        source,
    })?;
    Ok(TypedMessage::new(value))
}

/// Capacity check shared by both registration paths, given the table size
/// the registration would leave behind.
fn check_capacity(len_after: usize) -> Result<(), RegistryError> {
    if len_after > MAX_MESSAGE_KINDS {
        return Err(RegistryError::TooManyMessages);
    }
    Ok(())
}

// ─── Descriptor ─────────────────────────────────────────────────────

/// How a routed message of a given id is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Payload is never decoded; the raw handler receives the bytes.
    Raw,
    /// Decoded and passed to the inline handler and/or the router.
    Typed { handler: bool, router: bool },
}

/// Per-id metadata.
pub struct Descriptor<C> {
    id: MsgId,
    message_type: TypeId,
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
    handler: Option<Handler<C>>,
    router: Option<Router<C>>,
    raw_handler: Option<RawHandler<C>>,
}

impl<C> Descriptor<C> {
    fn new<T: Message>(id: MsgId) -> Self {
        Self {
            id,
            message_type: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            encode: encode_as::<T>,
            decode: decode_as::<T>,
            handler: None,
            router: None,
            raw_handler: None,
        }
    }

    pub fn id(&self) -> MsgId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Raw takes precedence when both a raw handler and typed targets are set.
    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.raw_handler.is_some() {
            DispatchMode::Raw
        } else {
            DispatchMode::Typed {
                handler: self.handler.is_some(),
                router: self.router.is_some(),
            }
        }
    }
}

impl<C> fmt::Debug for Descriptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("dispatch", &self.dispatch_mode())
            .finish()
    }
}

// ─── Builder ────────────────────────────────────────────────────────

/// Mutable registration phase. `C` is the connection context handed to
/// handlers and routers.
pub struct RegistryBuilder<C> {
    byte_order: ByteOrder,
    payload_format: PayloadFormat,
    quiet_ids: HashSet<MsgId>,
    descriptors: HashMap<MsgId, Descriptor<C>>,
    ids: HashMap<TypeId, MsgId>,
}

impl<C> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            payload_format: PayloadFormat::default(),
            quiet_ids: HashSet::new(),
            descriptors: HashMap::new(),
            ids: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for RegistryBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("byte_order", &self.byte_order)
            .field("payload_format", &self.payload_format)
            .field("registered", &self.descriptors.len())
            .finish()
    }
}

impl<C: 'static> RegistryBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_payload_format(mut self, payload_format: PayloadFormat) -> Self {
        self.payload_format = payload_format;
        self
    }

    /// Ids whose routing is not traced (high-frequency traffic).
    pub fn with_quiet_ids(mut self, ids: impl IntoIterator<Item = MsgId>) -> Self {
        self.quiet_ids.extend(ids);
        self
    }

    /// Register `T` under the next sequential id.
    pub fn register<T: Message>(&mut self) -> Result<MsgId, RegistryError> {
        self.check_new::<T>()?;
        check_capacity(self.descriptors.len() + 1)?;
        let id = MsgId::try_from(self.descriptors.len())
            .map_err(|_| RegistryError::TooManyMessages)?;
        if let Some(existing) = self.descriptors.get(&id) {
            return Err(RegistryError::IdInUse {
                id,
                existing: existing.type_name,
            });
        }
        self.insert(Descriptor::new::<T>(id));
        Ok(id)
    }

    /// Register `T` under a caller-chosen id.
    ///
    /// An id collision replaces the earlier descriptor (and forgets its
    /// type); keeping ids unique is the caller's job.
    pub fn register_with_id<T: Message>(&mut self, id: MsgId) -> Result<MsgId, RegistryError> {
        self.check_new::<T>()?;
        check_capacity(self.len_after_insert(id))?;
        if let Some(replaced) = self.descriptors.remove(&id) {
            tracing::warn!(
                msg_id = id,
                replaced = replaced.type_name,
                by = type_name::<T>(),
                "message id reassigned"
            );
            self.ids.remove(&replaced.message_type);
        }
        self.insert(Descriptor::new::<T>(id));
        Ok(id)
    }

    /// Attach an inline handler run on the routing task.
    pub fn set_handler<T, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        T: Message,
        F: Fn(&T, &C) + Send + Sync + 'static,
    {
        let descriptor = self.descriptor_mut::<T>()?;
        descriptor.handler = Some(Box::new(move |message: &TypedMessage, ctx: &C| {
            if let Some(value) = message.downcast_ref::<T>() {
                handler(value, ctx);
            }
        }));
        Ok(())
    }

    /// Attach an asynchronous destination for `T`.
    pub fn set_router<T: Message>(&mut self, router: Router<C>) -> Result<(), RegistryError> {
        self.descriptor_mut::<T>()?.router = Some(router);
        Ok(())
    }

    /// Mark `id` as passthrough: frames with this id are never decoded.
    pub fn set_raw_handler<F>(&mut self, id: MsgId, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&RawMessage, &C) + Send + Sync + 'static,
    {
        let descriptor = self
            .descriptors
            .get_mut(&id)
            .ok_or(RegistryError::UnknownId { id })?;
        descriptor.raw_handler = Some(Box::new(handler));
        Ok(())
    }

    pub fn seal(self) -> Registry<C> {
        tracing::debug!(
            messages = self.descriptors.len(),
            byte_order = ?self.byte_order,
            payload_format = ?self.payload_format,
            "message registry sealed"
        );
        Registry {
            byte_order: self.byte_order,
            payload_format: self.payload_format,
            quiet_ids: self.quiet_ids,
            descriptors: self.descriptors,
            ids: self.ids,
        }
    }

    fn check_new<T: Message>(&self) -> Result<(), RegistryError> {
        if self.ids.contains_key(&TypeId::of::<T>()) {
            return Err(RegistryError::AlreadyRegistered {
                type_name: type_name::<T>(),
            });
        }
        Ok(())
    }

    /// Replacing an existing id does not grow the table.
    fn len_after_insert(&self, id: MsgId) -> usize {
        self.descriptors.len() + usize::from(!self.descriptors.contains_key(&id))
    }

    fn insert(&mut self, descriptor: Descriptor<C>) {
        self.ids.insert(descriptor.message_type, descriptor.id);
        self.descriptors.insert(descriptor.id, descriptor);
    }

    fn descriptor_mut<T: Message>(&mut self) -> Result<&mut Descriptor<C>, RegistryError> {
        self.ids
            .get(&TypeId::of::<T>())
            .and_then(|id| self.descriptors.get_mut(id))
            .ok_or(RegistryError::NotRegistered {
                type_name: type_name::<T>(),
            })
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Sealed registry. Read-only; share it with `Arc`.
pub struct Registry<C> {
    byte_order: ByteOrder,
    payload_format: PayloadFormat,
    quiet_ids: HashSet<MsgId>,
    descriptors: HashMap<MsgId, Descriptor<C>>,
    ids: HashMap<TypeId, MsgId>,
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("byte_order", &self.byte_order)
            .field("payload_format", &self.payload_format)
            .field("registered", &self.descriptors.len())
            .finish()
    }
}

impl<C> Registry<C> {
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.payload_format
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn id_of<T: Message>(&self) -> Option<MsgId> {
        self.ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn type_name_of(&self, id: MsgId) -> Option<&'static str> {
        self.descriptors.get(&id).map(|d| d.type_name)
    }

    pub fn descriptor(&self, id: MsgId) -> Option<&Descriptor<C>> {
        self.descriptors.get(&id)
    }

    /// Every registered `(id, type name)` pair, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (MsgId, &'static str)> + '_ {
        self.descriptors.values().map(|d| (d.id, d.type_name))
    }

    /// Decode one frame.
    pub fn unmarshal(&self, frame: &[u8]) -> Result<Incoming, CodecError> {
        let Some((head, payload)) = frame.split_first_chunk::<ID_LEN>() else {
            return Err(CodecError::TooShort { len: frame.len() });
        };
        let id = self.byte_order.decode_u16(*head);
        let descriptor = self
            .descriptors
            .get(&id)
            .ok_or(CodecError::UnknownId { id })?;

        if descriptor.raw_handler.is_some() {
            return Ok(Incoming::Raw(RawMessage::new(id, payload.to_vec())));
        }
        (descriptor.decode)(payload, self.payload_format).map(Incoming::Typed)
    }

    /// Encode `message` as `[id][payload]`.
    pub fn marshal<T: Message>(&self, message: &T) -> Result<Frame, CodecError> {
        let id = self.id_of::<T>().ok_or(CodecError::Unregistered {
            type_name: type_name::<T>(),
        })?;
        let payload = self
            .payload_format
            .encode(message)
            .map_err(|source| CodecError::Encode {
                type_name: type_name::<T>(),
                source,
            })?;
        Ok(Frame::new(self.byte_order.encode_u16(id), payload))
    }

    /// Encode an already type-erased message.
    pub fn marshal_typed(&self, message: &TypedMessage) -> Result<Frame, CodecError> {
        let descriptor = self
            .ids
            .get(&message.message_type())
            .and_then(|id| self.descriptors.get(id))
            .ok_or(CodecError::Unregistered {
                type_name: message.type_name(),
            })?;
        let payload = (descriptor.encode)(message, self.payload_format)?;
        Ok(Frame::new(self.byte_order.encode_u16(descriptor.id), payload))
    }

    /// Encode a raw message without touching its payload.
    pub fn marshal_raw(&self, message: &RawMessage) -> Frame {
        Frame::new(
            self.byte_order.encode_u16(message.id()),
            message.payload().to_vec(),
        )
    }

    fn trace_route(&self, id: MsgId, type_name: &'static str) {
        if !self.quiet_ids.contains(&id) {
            tracing::trace!(msg_id = id, msg_type = type_name, "route");
        }
    }
}

impl<C: Clone + Send + Sync + 'static> Registry<C> {
    /// Dispatch a decoded message.
    ///
    /// Raw: the raw handler is called if present, otherwise the message is
    /// dropped and `Ok` returned. Typed: the inline handler runs to
    /// completion, then the router enqueue happens; either or both may be
    /// attached.
    pub async fn route(&self, message: Incoming, ctx: &C) -> Result<(), RouteError> {
        match message {
            Incoming::Raw(raw) => {
                let descriptor = self
                    .descriptors
                    .get(&raw.id())
                    .ok_or(RouteError::UnknownId { id: raw.id() })?;
                self.trace_route(descriptor.id, descriptor.type_name);
                if let Some(handler) = &descriptor.raw_handler {
                    handler(&raw, ctx);
                }
                Ok(())
            }
            Incoming::Typed(message) => {
                let Some(descriptor) = self
                    .ids
                    .get(&message.message_type())
                    .and_then(|id| self.descriptors.get(id))
                else {
                    return Err(RouteError::Unregistered {
                        type_name: message.type_name(),
                    });
                };
                self.trace_route(descriptor.id, descriptor.type_name);
                if let Some(handler) = &descriptor.handler {
                    handler(&message, ctx);
                }
                if let Some(router) = &descriptor.router {
                    router
                        .enqueue(Delivery {
                            id: descriptor.id,
                            message,
                            origin: ctx.clone(),
                        })
                        .await?;
                }
                Ok(())
            }
        }
    }
}
