//! tollgate-codec: message registry, wire frame codec and dispatch.
//!
//! Wire frame:
//!
//! ```text
//! -------------------------------
//! | id (2 bytes) | payload ...  |
//! -------------------------------
//! ```
//!
//! The id prefix is big-endian unless the registry is built with
//! [`ByteOrder::LittleEndian`]. There is no length field: the transport
//! delimits frames.
//!
//! Registration happens on a [`RegistryBuilder`]; [`RegistryBuilder::seal`]
//! yields an immutable [`Registry`] that is shared by `Arc` across every
//! connection task.

pub mod error;
pub mod format;
pub mod message;
pub mod registry;
pub mod router;

pub use error::{CodecError, PayloadError, RegistryError, RouteError};
pub use format::{ByteOrder, PayloadFormat};
pub use message::{Frame, Incoming, Message, RawMessage, TypedMessage};
pub use registry::{Descriptor, DispatchMode, Registry, RegistryBuilder};
pub use router::{Delivery, Mailbox, OverflowPolicy, Router};

/// Numeric message identifier carried in the frame prefix.
pub type MsgId = u16;

/// Size of the id prefix in bytes.
pub const ID_LEN: usize = 2;

/// Number of distinct message kinds the id space can hold.
pub const MAX_MESSAGE_KINDS: usize = MsgId::MAX as usize + 1;
