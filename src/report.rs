//!
//! Human-readable and structured renderings of operation results and errors.
//!
use serde::Serialize;
use std::time::Duration;

use crate::consumer::{ConsumeFailure, ConsumeSummary};
use crate::error::ClientError;
use crate::format::format_timestamp;
use crate::publisher::{PublishFailure, PublishOutcome, PublishStatus};

/// `512 B`, `1.5 KB`, `3.2 MB`, ...
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// `250ms`, `1.50s`, `2m 5s`.
pub fn format_duration(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub status: PublishStatus,
    pub destination: String,
    pub messages_published: usize,
    pub messages_failed: usize,
    pub duration_ms: u64,
    pub duration: String,
    pub first_message_id: Option<String>,
    pub last_message_id: Option<String>,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub average_size_bytes: u64,
    pub average_size: String,
    pub total_size_bytes: u64,
    pub total_size: String,
    pub messages_per_second: f64,
}

impl PublishReport {
    pub fn new(outcome: &PublishOutcome, elapsed: Duration) -> Self {
        let published = outcome.attempts.len();
        let total_size_bytes: u64 = outcome
            .attempts
            .iter()
            .map(|a| a.byte_length.max(0) as u64)
            .sum();
        let average_size_bytes = if published > 0 {
            total_size_bytes / published as u64
        } else {
            0
        };
        let first = outcome.attempts.first();
        let last = outcome.attempts.last();

        PublishReport {
            status: outcome.status,
            destination: outcome.destination.to_string(),
            messages_published: published,
            messages_failed: outcome.failed_count,
            duration_ms: elapsed.as_millis() as u64,
            duration: format_duration(elapsed),
            first_message_id: first.map(|a| a.assigned_id.clone()),
            last_message_id: last.map(|a| a.assigned_id.clone()),
            first_timestamp: first.map(|a| format_timestamp(a.broker_timestamp)),
            last_timestamp: last.map(|a| format_timestamp(a.broker_timestamp)),
            average_size_bytes,
            average_size: format_bytes(average_size_bytes),
            total_size_bytes,
            total_size: format_bytes(total_size_bytes),
            messages_per_second: rate(published as u64, elapsed),
        }
    }

    pub fn render_text(&self) -> String {
        let mut lines = Vec::new();
        let headline = match self.status {
            PublishStatus::Success => format!(
                "Published {} to {}",
                plural(self.messages_published, "message"),
                self.destination
            ),
            PublishStatus::Partial => format!(
                "Published {} of {} messages to {} ({} not sent)",
                self.messages_published,
                self.messages_published + self.messages_failed,
                self.destination,
                self.messages_failed
            ),
            PublishStatus::Failure => format!(
                "Failed to publish {} to {}",
                plural(self.messages_published + self.messages_failed, "message"),
                self.destination
            ),
        };
        lines.push(headline);

        if let (Some(first), Some(last)) = (&self.first_message_id, &self.last_message_id) {
            if self.messages_published == 1 {
                lines.push(format!("Message ID: {}", first));
                lines.push(format!("Size: {} bytes", self.total_size_bytes));
                if let Some(ts) = &self.first_timestamp {
                    lines.push(format!("Timestamp: {}", ts));
                }
            } else {
                lines.push(format!("Message IDs: {} → {}", first, last));
                lines.push(format!(
                    "Size: {} bytes total ({} bytes average)",
                    self.total_size_bytes, self.average_size_bytes
                ));
                if let (Some(first_ts), Some(last_ts)) = (&self.first_timestamp, &self.last_timestamp)
                {
                    lines.push(format!("Timestamps: {} → {}", first_ts, last_ts));
                }
            }
        }
        lines.push(format!(
            "Duration: {} ({:.1} msg/s)",
            self.duration, self.messages_per_second
        ));
        lines.join("\n")
    }

    pub fn to_json(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeReport {
    pub messages_processed: u64,
    pub messages_rejected: u64,
    pub total_size_bytes: u64,
    pub total_size: String,
    pub duration_ms: u64,
    pub duration: String,
    pub messages_per_second: f64,
}

impl ConsumeReport {
    pub fn new(summary: &ConsumeSummary, elapsed: Duration) -> Self {
        ConsumeReport {
            messages_processed: summary.processed_count,
            messages_rejected: summary.rejected_count,
            total_size_bytes: summary.total_bytes,
            total_size: format_bytes(summary.total_bytes),
            duration_ms: elapsed.as_millis() as u64,
            duration: format_duration(elapsed),
            messages_per_second: rate(summary.processed_count, elapsed),
        }
    }

    pub fn render_text(&self) -> String {
        let mut text = format!(
            "Consumed {} ({}) in {}",
            plural(self.messages_processed as usize, "message"),
            self.total_size,
            self.duration
        );
        if self.messages_rejected > 0 {
            text.push_str(&format!(", {} rejected", self.messages_rejected));
        }
        text
    }
}

pub fn render_error_text(error: &ClientError) -> String {
    format!(
        "Error [{}]: {}\nSuggestion: {}",
        error.code(),
        error,
        error.suggestion()
    )
}

pub fn render_error_json(error: &ClientError) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "code": error.code(),
        "message": error.to_string(),
        "suggestion": error.suggestion(),
    })
}

/// Error record with the delivered part of the publish attached.
pub fn render_publish_failure_json(failure: &PublishFailure, elapsed: Duration) -> serde_json::Value {
    let mut record = render_error_json(&failure.error);
    if let Ok(report) = serde_json::to_value(PublishReport::new(&failure.outcome, elapsed)) {
        record["result"] = report;
    }
    record
}

pub fn render_consume_failure_json(failure: &ConsumeFailure, elapsed: Duration) -> serde_json::Value {
    let mut record = render_error_json(&failure.error);
    if let Ok(report) = serde_json::to_value(ConsumeReport::new(&failure.summary, elapsed)) {
        record["result"] = report;
    }
    record
}
