//!
//! Seams to the broker client. Connections, channels and the wire protocol live behind these traits.
//!
use bytes::Bytes;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{self, ClientError};
use crate::message::{AckDecision, Destination, InboundMessage};
use crate::properties::PropertySet;

/// Raw failure signals from a single publish call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// `is_return` is set when the broker bounced a mandatory message it could not route.
    #[error("publish rejected (returned: {is_return})")]
    Rejected { is_return: bool },

    #[error("{0}")]
    Other(String),
}

impl PublishError {
    pub fn classify(&self, destination: &Destination) -> ClientError {
        match self {
            PublishError::ChannelClosed(reason) => {
                error::classify_channel_closed(&destination.to_string(), reason)
            }
            PublishError::Rejected { is_return: true } => {
                ClientError::Unroutable(destination.to_string())
            }
            PublishError::Rejected { is_return: false } => {
                ClientError::Broker("publish was negatively acknowledged by the broker".to_owned())
            }
            PublishError::Other(reason) => ClientError::Broker(reason.clone()),
        }
    }
}

/// Broker side confirmation of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Seconds since the unix epoch.
    pub broker_timestamp: i64,
}

/// A channel exclusively owned by one publish call.
pub trait PublishChannel: Send {
    /// Publishes one message and waits for the broker confirmation.
    fn publish_once(
        &mut self,
        destination: &Destination,
        properties: &PropertySet,
        body: &Bytes,
    ) -> impl Future<Output = Result<Confirmation, PublishError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

pub trait ChannelProvider: Send + Sync {
    type Channel: PublishChannel + 'static;

    fn acquire(&self) -> impl Future<Output = Result<Self::Channel, ClientError>> + Send;
}

/// Producer side of a consume operation.
///
/// Implementations push deliveries into `inbound` (suspending while it is full) and apply
/// every decision arriving on `acks` until `acks` is closed.
pub trait ConsumeSource: Send + 'static {
    fn run(
        self,
        inbound: mpsc::Sender<InboundMessage>,
        acks: mpsc::Receiver<AckDecision>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_publish_errors() {
        let dest = Destination::exchange("events", "a.b");
        assert!(matches!(
            PublishError::Rejected { is_return: true }.classify(&dest),
            ClientError::Unroutable(_)
        ));
        assert!(matches!(
            PublishError::Rejected { is_return: false }.classify(&dest),
            ClientError::Broker(_)
        ));
        assert!(matches!(
            PublishError::ChannelClosed("NOT_FOUND - no exchange 'events'".to_string())
                .classify(&dest),
            ClientError::DestinationNotFound(_)
        ));
        assert!(matches!(
            PublishError::Other("connection reset".to_string()).classify(&dest),
            ClientError::Broker(_)
        ));
    }
}
