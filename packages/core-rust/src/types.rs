use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// String-keyed document: named parameters on the way in, result rows on the
/// way out. Keys keep insertion order; sort specifications and command
/// documents depend on it.
pub type Document = IndexMap<String, Value>;

/// Generic runtime value exchanged between the bus and the backend.
///
/// Covers all JSON-compatible types plus the extended scalars a document
/// database round-trips (object identifiers, dates, binary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// 12-byte document identifier.
    ObjectId(ObjectId),
    /// UTC instant with millisecond precision.
    DateTime(DateTime),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "binData",
            Self::ObjectId(_) => "objectId",
            Self::DateTime(_) => "date",
            Self::Array(_) => "array",
            Self::Document(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or_else(
            |_| {
                #[allow(clippy::cast_precision_loss)]
                Self::Float(v as f64)
            },
            Self::Int,
        )
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// 12-byte identifier: 4-byte big-endian seconds, 5 process-random bytes,
/// 3-byte big-endian counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

/// Error parsing an `ObjectId` from its hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id {0:?}: expected 24 hex characters")]
pub struct InvalidObjectId(pub String);

struct ObjectIdSeed {
    process: [u8; 5],
    counter: AtomicU32,
}

fn seed() -> &'static ObjectIdSeed {
    static SEED: OnceLock<ObjectIdSeed> = OnceLock::new();
    SEED.get_or_init(|| ObjectIdSeed {
        process: rand::random(),
        counter: AtomicU32::new(rand::random::<u32>() & 0x00FF_FFFF),
    })
}

impl ObjectId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        let seed = seed();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = (Utc::now().timestamp() as u32).to_be_bytes();
        let count = seed.counter.fetch_add(1, Ordering::Relaxed).to_be_bytes();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs);
        bytes[4..9].copy_from_slice(&seed.process);
        bytes[9..].copy_from_slice(&count[1..]);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// DateTime
// ---------------------------------------------------------------------------

/// UTC instant stored as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateTime(i64);

impl DateTime {
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    #[must_use]
    pub const fn timestamp_millis(&self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 timestamp (e.g. `2024-01-01T00:00:00.000Z`).
    #[must_use]
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.timestamp_millis()))
    }

    /// Renders as RFC 3339 with millisecond precision when the instant lies
    /// between years 1970 and 9999, which is the range relaxed extended JSON
    /// writes as a string.
    #[must_use]
    pub fn to_rfc3339(&self) -> Option<String> {
        const YEAR_10000_MILLIS: i64 = 253_402_300_800_000;
        if !(0..YEAR_10000_MILLIS).contains(&self.0) {
            return None;
        }
        chrono::DateTime::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}
