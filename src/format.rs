//!
//! Rendering of inbound messages for display or file output.
//!
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::message::InboundMessage;
use crate::properties::PropertySet;

/// Turns one inbound message into the bytes written to a sink.
pub trait MessageFormatter: Send {
    fn format(&self, message: &InboundMessage) -> Result<Vec<u8>, ClientError>;

    /// Whether consecutive outputs can be told apart without a delimiter.
    fn is_self_delimiting(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            other => Err(ClientError::Config(format!("unknown output format `{}`", other))),
        }
    }
}

impl MessageFormatter for OutputFormat {
    fn format(&self, message: &InboundMessage) -> Result<Vec<u8>, ClientError> {
        match self {
            OutputFormat::Plain => Ok(format_plain(message).into_bytes()),
            OutputFormat::Json => format_json(message),
            OutputFormat::Table => Ok(format_table(message).into_bytes()),
        }
    }

    fn is_self_delimiting(&self) -> bool {
        !matches!(self, OutputFormat::Plain)
    }
}

/// `2023-11-14T22:13:20 UTC` style rendering of epoch seconds.
pub fn format_timestamp(secs: i64) -> String {
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(ts) => format!("{} UTC", ts.format("%Y-%m-%dT%H:%M:%S")),
        None => secs.to_string(),
    }
}

fn property_rows(props: &PropertySet) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    let mut push = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            rows.push((label.to_owned(), value));
        }
    };
    push("App ID", props.app_id.clone());
    push("Content Type", props.content_type.clone());
    push("Content Encoding", props.content_encoding.clone());
    push("Correlation ID", props.correlation_id.clone());
    push("Message ID", props.message_id.clone());
    push("Timestamp", props.timestamp.map(format_timestamp));
    push(
        "Delivery Mode",
        props
            .persistent
            .map(|p| if p { "persistent" } else { "transient" }.to_owned()),
    );
    push("Expiration", props.expiration.clone());
    push("Priority", props.priority.map(|p| p.to_string()));
    push("Reply To", props.reply_to.clone());
    push("Type", props.kind.clone());
    push("User ID", props.user_id.clone());
    push("Cluster ID", props.cluster_id.clone());
    rows
}

fn body_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_owned(),
        Err(_) => format!("<binary body of {} bytes>", body.len()),
    }
}

fn format_plain(message: &InboundMessage) -> String {
    let mut out = String::new();
    out.push_str(&format!("Exchange: {}\n", message.exchange));
    out.push_str(&format!("Routing Key: {}\n", message.routing_key));
    out.push_str(&format!("Queue: {}\n", message.queue));
    out.push_str(&format!("Delivery Tag: {}\n", message.delivery_tag));
    out.push_str(&format!("Redelivered: {}\n", message.redelivered));

    if let Some(props) = &message.properties {
        let rows = property_rows(props);
        if !rows.is_empty() {
            out.push_str("Properties:\n");
            for (label, value) in rows {
                out.push_str(&format!("  {}: {}\n", label, value));
            }
        }
        if let Some(headers) = props.headers.as_ref().filter(|h| !h.is_empty()) {
            out.push_str("Headers:\n");
            for (key, value) in headers {
                out.push_str(&format!("  {}: {}\n", key, value));
            }
        }
    }

    out.push_str(&format!("Size: {} bytes\n", message.body.len()));
    out.push_str("Body:\n");
    out.push_str(&body_text(&message.body));
    out.push('\n');
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonRecord<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    queue: &'a str,
    delivery_tag: u64,
    redelivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a PropertySet>,
    body_encoding: &'static str,
    body: serde_json::Value,
}

fn format_json(message: &InboundMessage) -> Result<Vec<u8>, ClientError> {
    let (body_encoding, body) = match serde_json::from_slice::<serde_json::Value>(&message.body) {
        Ok(value) if !message.body.is_empty() => ("json", value),
        _ => match std::str::from_utf8(&message.body) {
            Ok(text) => ("text", serde_json::Value::String(text.to_owned())),
            Err(_) => (
                "base64",
                serde_json::Value::String(
                    base64::engine::general_purpose::STANDARD.encode(&message.body),
                ),
            ),
        },
    };
    let record = JsonRecord {
        exchange: &message.exchange,
        routing_key: &message.routing_key,
        queue: &message.queue,
        delivery_tag: message.delivery_tag,
        redelivered: message.redelivered,
        properties: message.properties.as_ref(),
        body_encoding,
        body,
    };
    let mut out = serde_json::to_vec(&record)?;
    out.push(b'\n');
    Ok(out)
}

fn format_table(message: &InboundMessage) -> String {
    let mut rows: Vec<(String, String)> = vec![
        ("Exchange".to_owned(), message.exchange.clone()),
        ("Routing Key".to_owned(), message.routing_key.clone()),
        ("Queue".to_owned(), message.queue.clone()),
        ("Delivery Tag".to_owned(), message.delivery_tag.to_string()),
        ("Redelivered".to_owned(), message.redelivered.to_string()),
    ];
    if let Some(props) = &message.properties {
        rows.extend(property_rows(props));
        if let Some(headers) = &props.headers {
            rows.extend(
                headers
                    .iter()
                    .map(|(k, v)| (format!("Header {}", k), v.to_string())),
            );
        }
    }
    rows.push(("Size".to_owned(), format!("{} bytes", message.body.len())));
    rows.push((
        "Body".to_owned(),
        body_text(&message.body).replace('\n', "\\n"),
    ));

    let key_width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    let value_width = rows.iter().map(|(_, v)| v.chars().count()).max().unwrap_or(0);
    let border = format!(
        "+{}+{}+\n",
        "-".repeat(key_width + 2),
        "-".repeat(value_width + 2)
    );

    let mut out = border.clone();
    for (key, value) in &rows {
        out.push_str(&format!(
            "| {:<kw$} | {:<vw$} |\n",
            key,
            value,
            kw = key_width,
            vw = value_width
        ));
    }
    out.push_str(&border);
    out
}
