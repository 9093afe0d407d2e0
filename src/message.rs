use serde::Serialize;
use std::fmt;

use crate::error::ClientError;
use crate::properties::{self, NormalizedValue, PropertySet};

/// Where a message is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Empty for the default exchange, which routes straight to the queue named by `routing_key`.
    pub exchange: String,

    pub routing_key: String,
}

impl Destination {
    pub fn exchange(exchange: &str, routing_key: &str) -> Self {
        Destination {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }

    pub fn queue(queue: &str) -> Self {
        Destination {
            exchange: String::new(),
            routing_key: queue.to_owned(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exchange.is_empty() {
            write!(f, "queue '{}'", self.routing_key)
        } else {
            write!(
                f,
                "exchange '{}' (routing key '{}')",
                self.exchange, self.routing_key
            )
        }
    }
}

/// One logical message to publish, before burst expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: bytes::Bytes,

    /// User supplied properties. Always wins over generated values.
    pub properties: Option<PropertySet>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<bytes::Bytes>) -> Self {
        OutboundMessage {
            body: body.into(),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Layers CLI style overrides on top of the message's own properties.
    pub fn with_overrides(mut self, overrides: &PropertySet) -> Self {
        if overrides.is_empty() {
            return self;
        }
        let base = self.properties.take().unwrap_or_default();
        self.properties = Some(properties::merge(&base, overrides));
        self
    }

    /// Builds a message from a structured record:
    /// `{"body": ..., "properties": {...}, "headers": {...}}`.
    ///
    /// A string body is sent verbatim, any other JSON body is sent serialized.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, ClientError> {
        let record = value
            .as_object()
            .ok_or_else(|| ClientError::Format("message record must be a JSON object".to_owned()))?;

        let body = match record.get("body") {
            None | Some(serde_json::Value::Null) => bytes::Bytes::new(),
            Some(serde_json::Value::String(s)) => bytes::Bytes::from(s.clone()),
            Some(other) => bytes::Bytes::from(serde_json::to_vec(other)?),
        };

        let mut properties: PropertySet = match record.get("properties") {
            Some(p) if !p.is_null() => serde_json::from_value(p.clone())?,
            _ => PropertySet::default(),
        };

        if let Some(serde_json::Value::Object(headers)) = record.get("headers") {
            for (k, v) in headers {
                if let Some(v) = NormalizedValue::from_json(v) {
                    properties.insert_header(k, v);
                }
            }
        }

        let mut message = OutboundMessage::new(body);
        if !properties.is_empty() {
            message.properties = Some(properties);
        }
        Ok(message)
    }
}

/// Broker confirmation of one published attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttemptResult {
    pub assigned_id: String,

    pub byte_length: i64,

    /// Seconds since the unix epoch.
    pub broker_timestamp: i64,
}

/// A message delivered by the broker to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub exchange: String,

    pub routing_key: String,

    pub queue: String,

    pub body: bytes::Bytes,

    /// Broker assigned tag used to acknowledge this delivery.
    pub delivery_tag: u64,

    pub properties: Option<PropertySet>,

    pub redelivered: bool,
}

/// Acknowledgment sent back to the broker for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckDecision {
    pub delivery_tag: u64,

    pub accept: bool,
}

impl AckDecision {
    pub fn ack(delivery_tag: u64) -> Self {
        AckDecision {
            delivery_tag,
            accept: true,
        }
    }

    pub fn nack(delivery_tag: u64) -> Self {
        AckDecision {
            delivery_tag,
            accept: false,
        }
    }
}
