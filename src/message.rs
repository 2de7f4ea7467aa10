//! Application message model.
//!
//! A [`Message`] carries one strongly typed [`MessageBody`] plus optional
//! delivery attributes (durability, priority, time-to-live). The body type
//! set is closed: exactly the types the broker dialect round-trips. The
//! type system makes an unsupported or null body unrepresentable. The only
//! fallible path left is decoding an inbound wire body, which the transport
//! reports as a configuration error.
//!
//! Reading a body is total: [`Message::body_as`] returns the stored value
//! when the requested type matches, and `T::default()` otherwise.
//!
//! ```
//! use artemis_client::Message;
//!
//! let msg = Message::new("order-created");
//! assert_eq!(msg.body_as::<String>(), "order-created");
//! assert_eq!(msg.body_as::<i32>(), 0); // type mismatch -> default
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Milliseconds since the Unix epoch, the broker's timestamp representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    /// Milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(d.as_millis() as i64),
            Err(e) => Timestamp(-(e.duration().as_millis() as i64)),
        }
    }
}

/// The closed set of supported message body types.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    String(String),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(Timestamp),
    Binary(Vec<u8>),
    /// A list whose elements are themselves supported bodies.
    List(Vec<MessageBody>),
}

impl MessageBody {
    /// Short name of the stored type, for logs and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::String(_) => "string",
            MessageBody::Char(_) => "char",
            MessageBody::Byte(_) => "byte",
            MessageBody::Short(_) => "short",
            MessageBody::Int(_) => "int",
            MessageBody::Long(_) => "long",
            MessageBody::UByte(_) => "ubyte",
            MessageBody::UShort(_) => "ushort",
            MessageBody::UInt(_) => "uint",
            MessageBody::ULong(_) => "ulong",
            MessageBody::Float(_) => "float",
            MessageBody::Double(_) => "double",
            MessageBody::Bool(_) => "bool",
            MessageBody::Uuid(_) => "uuid",
            MessageBody::Timestamp(_) => "timestamp",
            MessageBody::Binary(_) => "binary",
            MessageBody::List(_) => "list",
        }
    }
}

macro_rules! body_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MessageBody {
                fn from(v: $ty) -> Self {
                    MessageBody::$variant(v)
                }
            }
        )*
    };
}

body_from! {
    String => String,
    char => Char,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    u8 => UByte,
    u16 => UShort,
    u32 => UInt,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    Uuid => Uuid,
    Timestamp => Timestamp,
    Vec<u8> => Binary,
    Vec<MessageBody> => List,
}

impl From<&str> for MessageBody {
    fn from(v: &str) -> Self {
        MessageBody::String(v.to_owned())
    }
}

impl From<&[u8]> for MessageBody {
    fn from(v: &[u8]) -> Self {
        MessageBody::Binary(v.to_vec())
    }
}

/// Extraction of a concrete value out of a [`MessageBody`].
///
/// Implemented for every supported body type. Used through
/// [`Message::body_as`], which falls back to `T::default()` on a type
/// mismatch.
pub trait FromBody: Default {
    /// Returns the stored value when the body holds this type.
    fn from_body(body: &MessageBody) -> Option<Self>;
}

macro_rules! from_body {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromBody for $ty {
                fn from_body(body: &MessageBody) -> Option<Self> {
                    match body {
                        MessageBody::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

from_body! {
    String => String,
    char => Char,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    u8 => UByte,
    u16 => UShort,
    u32 => UInt,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    Uuid => Uuid,
    Timestamp => Timestamp,
    Vec<u8> => Binary,
    Vec<MessageBody> => List,
}

/// An application message: one typed body plus delivery attributes.
///
/// Delivery attributes left unset inherit the owning producer's defaults at
/// send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: MessageBody,
    durable: Option<bool>,
    priority: Option<u8>,
    ttl: Option<Duration>,
}

impl Message {
    /// Creates a message from any supported body type.
    pub fn new(body: impl Into<MessageBody>) -> Self {
        Self {
            body: body.into(),
            durable: None,
            priority: None,
            ttl: None,
        }
    }

    /// Overrides broker-side persistence for this message.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Overrides the delivery priority (0–9) for this message.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Overrides the time-to-live for this message.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The stored body.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Consumes the message, returning the body.
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Returns the body as `T` when the stored type matches, otherwise
    /// `T::default()`. Never fails.
    pub fn body_as<T: FromBody>(&self) -> T {
        T::from_body(&self.body).unwrap_or_default()
    }

    pub fn durable(&self) -> Option<bool> {
        self.durable
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub(crate) fn apply_defaults(
        &mut self,
        durable: bool,
        priority: Option<u8>,
        ttl: Option<Duration>,
    ) {
        if self.durable.is_none() {
            self.durable = Some(durable);
        }
        if self.priority.is_none() {
            self.priority = priority;
        }
        if self.ttl.is_none() {
            self.ttl = ttl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_as_round_trips_each_supported_type() {
        assert_eq!(Message::new("hi").body_as::<String>(), "hi");
        assert_eq!(Message::new('x').body_as::<char>(), 'x');
        assert_eq!(Message::new(-5i8).body_as::<i8>(), -5);
        assert_eq!(Message::new(-500i16).body_as::<i16>(), -500);
        assert_eq!(Message::new(-50_000i32).body_as::<i32>(), -50_000);
        assert_eq!(Message::new(-5_000_000_000i64).body_as::<i64>(), -5_000_000_000);
        assert_eq!(Message::new(5u8).body_as::<u8>(), 5);
        assert_eq!(Message::new(500u16).body_as::<u16>(), 500);
        assert_eq!(Message::new(50_000u32).body_as::<u32>(), 50_000);
        assert_eq!(Message::new(5_000_000_000u64).body_as::<u64>(), 5_000_000_000);
        assert_eq!(Message::new(1.5f32).body_as::<f32>(), 1.5);
        assert_eq!(Message::new(2.5f64).body_as::<f64>(), 2.5);
        assert!(Message::new(true).body_as::<bool>());

        let id = Uuid::new_v4();
        assert_eq!(Message::new(id).body_as::<Uuid>(), id);

        let ts = Timestamp::from_millis(1_700_000_000_000);
        assert_eq!(Message::new(ts).body_as::<Timestamp>(), ts);

        assert_eq!(
            Message::new(vec![1u8, 2, 3]).body_as::<Vec<u8>>(),
            vec![1, 2, 3]
        );

        let list = vec![MessageBody::from(1i32), MessageBody::from("two")];
        assert_eq!(
            Message::new(list.clone()).body_as::<Vec<MessageBody>>(),
            list
        );
    }

    #[test]
    fn body_as_defaults_on_mismatch() {
        let msg = Message::new("text");
        assert_eq!(msg.body_as::<i32>(), 0);
        assert_eq!(msg.body_as::<Vec<u8>>(), Vec::<u8>::new());
        assert_eq!(msg.body_as::<Uuid>(), Uuid::nil());
        assert!(!msg.body_as::<bool>());
    }

    #[test]
    fn body_as_is_idempotent() {
        let msg = Message::new(41i32);
        assert_eq!(msg.body_as::<i32>(), 41);
        assert_eq!(msg.body_as::<i32>(), 41);
    }

    #[test]
    fn defaults_fill_only_unset_attributes() {
        let mut msg = Message::new("x").with_priority(9);
        msg.apply_defaults(true, Some(4), Some(Duration::from_secs(30)));
        assert_eq!(msg.priority(), Some(9));
        assert_eq!(msg.durable(), Some(true));
        assert_eq!(msg.ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn type_names() {
        assert_eq!(MessageBody::from(1u64).type_name(), "ulong");
        assert_eq!(MessageBody::from("s").type_name(), "string");
        assert_eq!(MessageBody::List(vec![]).type_name(), "list");
    }
}
