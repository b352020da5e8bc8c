//! The AMQP message model.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Message annotation carrying the routing type of a sent message.
pub const ROUTING_TYPE_ANNOTATION: &str = "x-opt-routing-type";

/// How the broker routes messages sent to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingType {
    /// Point-to-point: each message goes to one consumer of the queue.
    Anycast,
    /// Publish-subscribe: each subscriber gets its own copy.
    Multicast,
}

impl RoutingType {
    /// Terminus capability advertised when attaching a link.
    pub fn capability(self) -> &'static str {
        match self {
            RoutingType::Anycast => "queue",
            RoutingType::Multicast => "topic",
        }
    }

    /// Value stamped under [`ROUTING_TYPE_ANNOTATION`].
    pub fn annotation(self) -> Value {
        match self {
            RoutingType::Multicast => Value::UByte(0),
            RoutingType::Anycast => Value::UByte(1),
        }
    }

    /// Parses the value stamped under [`ROUTING_TYPE_ANNOTATION`].
    pub fn from_annotation(value: &Value) -> Option<Self> {
        match value {
            Value::UByte(0) => Some(RoutingType::Multicast),
            Value::UByte(1) => Some(RoutingType::Anycast),
            _ => None,
        }
    }
}

/// Whether the broker must persist a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurabilityMode {
    Durable,
    Nondurable,
}

/// An AMQP primitive or compound value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    Symbol(String),
    Binary(Vec<u8>),
    Timestamp(SystemTime),
    Uuid([u8; 16]),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any integer variant that fits into an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::UByte(v) => Some(i64::from(v)),
            Value::UShort(v) => Some(i64::from(v)),
            Value::UInt(v) => Some(i64::from(v)),
            Value::ULong(v) => i64::try_from(v).ok(),
            Value::Byte(v) => Some(i64::from(v)),
            Value::Short(v) => Some(i64::from(v)),
            Value::Int(v) => Some(i64::from(v)),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    u8 => UByte,
    u16 => UShort,
    u32 => UInt,
    u64 => ULong,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => String,
    Vec<u8> => Binary,
    SystemTime => Timestamp,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// The AMQP properties section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub message_id: Option<String>,
    pub user_id: Option<Vec<u8>>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub absolute_expiry_time: Option<SystemTime>,
    pub creation_time: Option<SystemTime>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

/// Broker-assigned identifier of a received delivery, used for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

/// A message as sent by a producer or received by a consumer.
///
/// Header fields left unset are filled in by the producer at send time.
#[derive(Debug, Clone)]
pub struct Message {
    body: Value,
    pub priority: Option<u8>,
    pub durability_mode: Option<DurabilityMode>,
    pub time_to_live: Option<Duration>,
    pub properties: Properties,
    pub application_properties: BTreeMap<String, Value>,
    pub message_annotations: BTreeMap<String, Value>,
    delivery_tag: Option<DeliveryTag>,
}

impl Message {
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            priority: None,
            durability_mode: None,
            time_to_live: None,
            properties: Properties::default(),
            application_properties: BTreeMap::new(),
            message_annotations: BTreeMap::new(),
            delivery_tag: None,
        }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Sets an application property, replacing any previous value.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.application_properties.get(key)
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = Some(mode);
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Routing type stamped on the message by the producer that sent it.
    pub fn routing_type(&self) -> Option<RoutingType> {
        self.message_annotations
            .get(ROUTING_TYPE_ANNOTATION)
            .and_then(RoutingType::from_annotation)
    }

    /// Delivery tag assigned by the receiving link.
    pub fn delivery_tag(&self) -> Option<DeliveryTag> {
        self.delivery_tag
    }

    /// Attaches the delivery tag of a received message. Called by transports.
    pub fn with_delivery_tag(mut self, tag: DeliveryTag) -> Self {
        self.delivery_tag = Some(tag);
        self
    }
}

// Delivery tags are link-local bookkeeping, not message content.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
            && self.priority == other.priority
            && self.durability_mode == other.durability_mode
            && self.time_to_live == other.time_to_live
            && self.properties == other.properties
            && self.application_properties == other.application_properties
            && self.message_annotations == other.message_annotations
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Message::new(body)
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Message::new(body)
    }
}
