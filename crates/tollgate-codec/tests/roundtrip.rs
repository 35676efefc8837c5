//! unmarshal(marshal(m)) == m for every registered type, under every
//! byte order and payload format.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use tollgate_codec::{ByteOrder, Message, PayloadFormat, Registry, RegistryBuilder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Login {
    account: String,
    token: Vec<u8>,
    resume: bool,
}
impl Message for Login {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    entity: u64,
    x: f32,
    y: f32,
    heading: Option<i16>,
}
impl Message for Position {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Command {
    Stop,
    Say(String),
    Batch(Vec<u32>),
}
impl Message for Command {}

fn build(order: ByteOrder, format: PayloadFormat) -> Registry<()> {
    let mut builder = RegistryBuilder::new()
        .with_byte_order(order)
        .with_payload_format(format);
    builder.register::<Login>().expect("register Login");
    builder.register_with_id::<Position>(0x1234).expect("register Position");
    builder.register::<Command>().expect("register Command");
    builder.seal()
}

fn settings() -> impl Strategy<Value = (ByteOrder, PayloadFormat)> {
    (
        prop_oneof![Just(ByteOrder::BigEndian), Just(ByteOrder::LittleEndian)],
        prop_oneof![Just(PayloadFormat::Postcard), Just(PayloadFormat::Json)],
    )
}

fn login() -> impl Strategy<Value = Login> {
    (".{0,24}", proptest::collection::vec(any::<u8>(), 0..64), any::<bool>()).prop_map(
        |(account, token, resume)| Login {
            account,
            token,
            resume,
        },
    )
}

fn position() -> impl Strategy<Value = Position> {
    (
        any::<u64>(),
        -1.0e6f32..1.0e6,
        -1.0e6f32..1.0e6,
        proptest::option::of(any::<i16>()),
    )
        .prop_map(|(entity, x, y, heading)| Position {
            entity,
            x,
            y,
            heading,
        })
}

fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Stop),
        ".{0,16}".prop_map(Command::Say),
        proptest::collection::vec(any::<u32>(), 0..16).prop_map(Command::Batch),
    ]
}

fn roundtrip<T: Message + Clone>(registry: &Registry<()>, value: &T) -> Option<T> {
    let frame = registry.marshal(value).expect("marshal");
    let incoming = registry.unmarshal(&frame.to_bytes()).expect("unmarshal");
    incoming
        .as_typed()
        .and_then(|m| m.downcast_ref::<T>())
        .cloned()
}

proptest! {
    #[test]
    fn login_roundtrips((order, format) in settings(), value in login()) {
        let registry = build(order, format);
        prop_assert_eq!(roundtrip(&registry, &value), Some(value));
    }

    #[test]
    fn position_roundtrips((order, format) in settings(), value in position()) {
        let registry = build(order, format);
        let frame = registry.marshal(&value).expect("marshal");
        prop_assert_eq!(frame.id_bytes(), &order.encode_u16(0x1234)[..]);
        prop_assert_eq!(roundtrip(&registry, &value), Some(value));
    }

    #[test]
    fn command_roundtrips((order, format) in settings(), value in command()) {
        let registry = build(order, format);
        prop_assert_eq!(roundtrip(&registry, &value), Some(value));
    }
}
