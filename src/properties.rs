//!
//! Broker message properties: raw broker-native values, their normalized form, and merging.
//!
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum nesting of arrays/tables inside a header value.
/// Anything deeper is replaced with [`NESTING_PLACEHOLDER`].
pub const MAX_HEADER_DEPTH: usize = 32;

pub const NESTING_PLACEHOLDER: &str = "<nesting limit exceeded>";

pub type HeaderMap = BTreeMap<String, NormalizedValue>;

/// Header value as the broker client hands it over.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Void,
    Bool(bool),
    ShortShortInt(i8),
    ShortShortUInt(u8),
    ShortInt(i16),
    ShortUInt(u16),
    LongInt(i32),
    LongUInt(u32),
    LongLongInt(i64),
    Float(f32),
    Double(f64),
    Decimal { scale: u8, value: u32 },
    ShortString(String),
    LongString(Bytes),
    ByteArray(Bytes),
    /// Seconds since the unix epoch.
    Timestamp(u64),
    FieldArray(Vec<RawValue>),
    FieldTable(BTreeMap<String, RawValue>),
}

/// Displayable header value. Raw bytes are not preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Array(Vec<NormalizedValue>),
    Table(HeaderMap),
}

impl From<&str> for NormalizedValue {
    fn from(value: &str) -> Self {
        NormalizedValue::String(value.to_owned())
    }
}

impl From<i64> for NormalizedValue {
    fn from(value: i64) -> Self {
        NormalizedValue::Integer(value)
    }
}

impl From<bool> for NormalizedValue {
    fn from(value: bool) -> Self {
        NormalizedValue::Boolean(value)
    }
}

impl NormalizedValue {
    /// Maps a structured JSON value. `null` maps to `None`, as with a void header entry.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(NormalizedValue::Boolean(*b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => NormalizedValue::Integer(i),
                None => NormalizedValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            serde_json::Value::String(s) => Some(NormalizedValue::String(s.clone())),
            serde_json::Value::Array(items) => Some(NormalizedValue::Array(
                items.iter().filter_map(NormalizedValue::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(NormalizedValue::Table(
                map.iter()
                    .filter_map(|(k, v)| NormalizedValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::String(s) => f.write_str(s),
            NormalizedValue::Integer(i) => write!(f, "{}", i),
            NormalizedValue::Float(v) => write!(f, "{}", v),
            NormalizedValue::Boolean(b) => write!(f, "{}", b),
            NormalizedValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            NormalizedValue::Table(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Broker properties as reported by the client library. `None` means the broker did not set it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProperties {
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub delivery_mode: Option<u8>,
    pub expiration: Option<String>,
    pub priority: Option<u8>,
    pub reply_to: Option<String>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub cluster_id: Option<String>,
    pub headers: Option<BTreeMap<String, RawValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Seconds since the unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Durable delivery (AMQP delivery mode 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
}

impl PropertySet {
    pub fn is_empty(&self) -> bool {
        *self == PropertySet::default()
    }

    pub fn header(&self, key: &str) -> Option<&NormalizedValue> {
        self.headers.as_ref().and_then(|h| h.get(key))
    }

    pub fn insert_header(&mut self, key: &str, value: NormalizedValue) {
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(key.to_owned(), value);
    }
}

pub fn normalize(raw: &RawProperties) -> PropertySet {
    PropertySet {
        app_id: raw.app_id.clone(),
        content_type: raw.content_type.clone(),
        content_encoding: raw.content_encoding.clone(),
        correlation_id: raw.correlation_id.clone(),
        message_id: raw.message_id.clone(),
        timestamp: raw.timestamp.map(saturating_i64),
        persistent: raw.delivery_mode.map(|mode| mode == 2),
        expiration: raw.expiration.clone(),
        priority: raw.priority,
        reply_to: raw.reply_to.clone(),
        kind: raw.kind.clone(),
        user_id: raw.user_id.clone(),
        cluster_id: raw.cluster_id.clone(),
        headers: raw.headers.as_ref().map(|table| normalize_table(table, 0)),
    }
}

/// Normalizes a single header value. Returns `None` for a void value.
pub fn normalize_header_value(raw: &RawValue) -> Option<NormalizedValue> {
    normalize_at(raw, 0)
}

fn normalize_at(raw: &RawValue, depth: usize) -> Option<NormalizedValue> {
    let value = match raw {
        RawValue::Void => return None,
        RawValue::Bool(b) => NormalizedValue::Boolean(*b),
        RawValue::ShortShortInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::ShortShortUInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::ShortInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::ShortUInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::LongInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::LongUInt(v) => NormalizedValue::Integer(i64::from(*v)),
        RawValue::LongLongInt(v) => NormalizedValue::Integer(*v),
        RawValue::Float(v) => NormalizedValue::Float(f64::from(*v)),
        RawValue::Double(v) => NormalizedValue::Float(*v),
        RawValue::Decimal { scale, value } => {
            NormalizedValue::Float(f64::from(*value) / 10f64.powi(i32::from(*scale)))
        }
        RawValue::ShortString(s) => NormalizedValue::String(s.clone()),
        RawValue::LongString(bytes) | RawValue::ByteArray(bytes) => decode_bytes(bytes),
        RawValue::Timestamp(secs) => NormalizedValue::Integer(saturating_i64(*secs)),
        RawValue::FieldArray(_) | RawValue::FieldTable(_) if depth >= MAX_HEADER_DEPTH => {
            NormalizedValue::String(NESTING_PLACEHOLDER.to_owned())
        }
        RawValue::FieldArray(items) => NormalizedValue::Array(
            items
                .iter()
                .filter_map(|item| normalize_at(item, depth + 1))
                .collect(),
        ),
        RawValue::FieldTable(table) => NormalizedValue::Table(normalize_table(table, depth + 1)),
    };
    Some(value)
}

fn normalize_table(table: &BTreeMap<String, RawValue>, depth: usize) -> HeaderMap {
    table
        .iter()
        .filter_map(|(k, v)| normalize_at(v, depth).map(|v| (k.clone(), v)))
        .collect()
}

fn decode_bytes(bytes: &Bytes) -> NormalizedValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => NormalizedValue::String(text.to_owned()),
        Err(_) => NormalizedValue::String(format!("<binary blob of {} bytes>", bytes.len())),
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Fields set in `overrides` replace those of `base`. Headers merge key by key.
pub fn merge(base: &PropertySet, overrides: &PropertySet) -> PropertySet {
    fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
        over.as_ref().or(base.as_ref()).cloned()
    }

    let headers = match (&base.headers, &overrides.headers) {
        (Some(b), Some(o)) => {
            let mut merged = b.clone();
            merged.extend(o.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(merged)
        }
        (b, o) => pick(b, o),
    };

    PropertySet {
        app_id: pick(&base.app_id, &overrides.app_id),
        content_type: pick(&base.content_type, &overrides.content_type),
        content_encoding: pick(&base.content_encoding, &overrides.content_encoding),
        correlation_id: pick(&base.correlation_id, &overrides.correlation_id),
        message_id: pick(&base.message_id, &overrides.message_id),
        timestamp: pick(&base.timestamp, &overrides.timestamp),
        persistent: pick(&base.persistent, &overrides.persistent),
        expiration: pick(&base.expiration, &overrides.expiration),
        priority: pick(&base.priority, &overrides.priority),
        reply_to: pick(&base.reply_to, &overrides.reply_to),
        kind: pick(&base.kind, &overrides.kind),
        user_id: pick(&base.user_id, &overrides.user_id),
        cluster_id: pick(&base.cluster_id, &overrides.cluster_id),
        headers,
    }
}
