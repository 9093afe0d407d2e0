use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Destination `{0}` not found")]
    DestinationNotFound(String),

    #[error("Message exceeds broker size limit: {0}")]
    MessageTooLarge(String),

    #[error("Message to `{0}` could not be routed and was returned by the broker")]
    Unroutable(String),

    #[error("Broker failure: {0}")]
    Broker(String),

    #[error("Failed to format message: {0}")]
    Format(String),

    #[error("I/O failure")]
    Io(#[from] io::Error),

    #[error("Invalid header `{0}`")]
    InvalidHeader(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Short machine-readable code shown next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::DestinationNotFound(_) => "NOT_FOUND",
            ClientError::MessageTooLarge(_) => "MAX_SIZE",
            ClientError::Unroutable(_) => "UNROUTABLE",
            ClientError::Broker(_) => "BROKER_ERROR",
            ClientError::Format(_) => "FORMAT_ERROR",
            ClientError::Io(_) => "IO_ERROR",
            ClientError::InvalidHeader(_) => "INVALID_HEADER",
            ClientError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ClientError::DestinationNotFound(_) => {
                "Check that the exchange or queue exists and the name is spelled correctly"
            }
            ClientError::MessageTooLarge(_) => {
                "Reduce the message size or raise the broker's max message size"
            }
            ClientError::Unroutable(_) => {
                "Bind a queue to the exchange with a matching routing key"
            }
            ClientError::Broker(_) => "Check broker connectivity and logs, then retry",
            ClientError::Format(_) => "Choose another output format for this message",
            ClientError::Io(_) => "Check that the output path is writable",
            ClientError::InvalidHeader(_) => "Use the form key:value",
            ClientError::Config(_) => "Fix the configuration value and retry",
        }
    }

    /// Whether retrying the same call could succeed. None of these are retried internally.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClientError::DestinationNotFound(_)
                | ClientError::MessageTooLarge(_)
                | ClientError::Unroutable(_)
                | ClientError::InvalidHeader(_)
                | ClientError::Config(_)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Format(e.to_string())
    }
}

/// Maps a broker "channel closed" reason onto the error taxonomy.
///
/// Brokers report these as free text, so this is the only place that looks at the wording.
pub fn classify_channel_closed(destination: &str, reason: &str) -> ClientError {
    // RabbitMQ spells reply codes with underscores (`NOT_FOUND`, ...).
    let lowered = reason.to_ascii_lowercase().replace('_', " ");
    if lowered.contains("not found") {
        ClientError::DestinationNotFound(destination.to_owned())
    } else if lowered.contains("max size") {
        ClientError::MessageTooLarge(reason.to_owned())
    } else {
        ClientError::Broker(reason.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = classify_channel_closed(
            "orders",
            "NOT_FOUND - no exchange 'orders' in vhost '/'",
        );
        assert!(matches!(err, ClientError::DestinationNotFound(ref d) if d == "orders"));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_classify_max_size() {
        let err = classify_channel_closed(
            "orders",
            "PRECONDITION_FAILED - message size 20000000 is larger than configured max size 16777216",
        );
        assert!(matches!(err, ClientError::MessageTooLarge(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_classify_reply_code_spellings() {
        for reason in [
            "NOT_FOUND - no queue 'orders' in vhost '/'",
            "queue not found",
        ] {
            assert_eq!(classify_channel_closed("orders", reason).code(), "NOT_FOUND");
        }
        for reason in ["MAX_SIZE exceeded", "message exceeds max size"] {
            assert_eq!(classify_channel_closed("orders", reason).code(), "MAX_SIZE");
        }
    }

    #[test]
    fn test_classify_generic() {
        let err = classify_channel_closed("orders", "CONNECTION_FORCED - broker shutdown");
        assert!(matches!(err, ClientError::Broker(_)));
        assert_eq!(err.code(), "BROKER_ERROR");
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_io_conversion() {
        let err: ClientError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(!err.suggestion().is_empty());
    }
}
