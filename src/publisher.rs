//!
//! Publish orchestration: burst expansion, identifier assignment and outcome aggregation.
//!
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::{ChannelProvider, Confirmation, PublishChannel, PublishError};
use crate::error::ClientError;
use crate::message::{DeliveryAttemptResult, Destination, OutboundMessage};
use crate::properties::{self, PropertySet};

/// Source of the per-call base identifier.
pub trait TokenSource: Send {
    fn base_token(&mut self) -> String;
}

/// Draws base tokens from random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidTokenSource;

impl TokenSource for UuidTokenSource {
    fn base_token(&mut self) -> String {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(8);
        token
    }
}

/// Always hands out the same token.
#[derive(Debug, Clone)]
pub struct FixedToken(pub String);

impl TokenSource for FixedToken {
    fn base_token(&mut self) -> String {
        self.0.clone()
    }
}

/// Receives `(attempted, total)` after every publish attempt, including one that failed.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub status: PublishStatus,
    pub destination: Destination,
    pub attempts: Vec<DeliveryAttemptResult>,
    pub failed_count: usize,
}

impl PublishOutcome {
    fn success(destination: &Destination, attempts: Vec<DeliveryAttemptResult>) -> Self {
        PublishOutcome {
            status: PublishStatus::Success,
            destination: destination.clone(),
            attempts,
            failed_count: 0,
        }
    }

    fn cancelled(
        destination: &Destination,
        attempts: Vec<DeliveryAttemptResult>,
        planned: usize,
    ) -> Self {
        let status = if attempts.is_empty() {
            PublishStatus::Failure
        } else {
            PublishStatus::Partial
        };
        PublishOutcome {
            status,
            destination: destination.clone(),
            failed_count: planned - attempts.len(),
            attempts,
        }
    }

    fn failed(
        destination: &Destination,
        attempts: Vec<DeliveryAttemptResult>,
        planned: usize,
    ) -> Self {
        PublishOutcome {
            status: PublishStatus::Failure,
            destination: destination.clone(),
            failed_count: planned.saturating_sub(attempts.len()),
            attempts,
        }
    }

    pub fn published_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn planned_count(&self) -> usize {
        self.attempts.len() + self.failed_count
    }
}

/// A broker failure that aborted a publish call, with whatever was delivered before it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PublishFailure {
    #[source]
    pub error: ClientError,
    pub outcome: PublishOutcome,
}

enum Completion {
    Finished,
    Cancelled,
}

/// Holds the channel of one publish call. A lease dropped before [`ChannelLease::release`]
/// (the publish future was dropped, or a callback panicked) closes its channel on a spawned task.
struct ChannelLease<C: PublishChannel + 'static> {
    channel: Option<C>,
}

impl<C: PublishChannel + 'static> ChannelLease<C> {
    fn new(channel: C) -> Self {
        ChannelLease {
            channel: Some(channel),
        }
    }

    async fn publish_once(
        &mut self,
        destination: &Destination,
        properties: &PropertySet,
        body: &Bytes,
    ) -> Result<Confirmation, PublishError> {
        match self.channel.as_mut() {
            Some(channel) => channel.publish_once(destination, properties, body).await,
            None => Err(PublishError::ChannelClosed("channel already released".to_owned())),
        }
    }

    async fn release(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

impl<C: PublishChannel + 'static> Drop for ChannelLease<C> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    tracing::warn!("publish abandoned, closing channel in the background");
                    handle.spawn(channel.close());
                }
                Err(_) => tracing::warn!("publish abandoned outside a runtime, dropping channel"),
            }
        }
    }
}

/// Decimal digits needed to print `count`.
pub fn pad_width(count: usize) -> usize {
    count.max(1).to_string().len()
}

/// Identifier of one attempt. Indexes are zero based; printed one based and zero padded.
pub fn assigned_id(
    base: &str,
    message_index: usize,
    message_count: usize,
    burst_index: usize,
    burst_count: usize,
) -> String {
    let mut id = format!(
        "{}-{:0width$}",
        base,
        message_index + 1,
        width = pad_width(message_count)
    );
    if burst_count > 1 {
        id.push_str(&format!(
            "-{:0width$}",
            burst_index + 1,
            width = pad_width(burst_count)
        ));
    }
    id
}

pub struct Publisher<P: ChannelProvider> {
    provider: P,
    tokens: Box<dyn TokenSource>,
    progress: Box<dyn ProgressObserver>,
    confirm_timeout: Option<Duration>,
}

impl<P: ChannelProvider> Publisher<P> {
    pub fn new(provider: P) -> Self {
        Publisher {
            provider,
            tokens: Box::new(UuidTokenSource),
            progress: Box::new(NoProgress),
            confirm_timeout: None,
        }
    }

    pub fn with_token_source(mut self, tokens: impl TokenSource + 'static) -> Self {
        self.tokens = Box::new(tokens);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressObserver + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Fails an attempt with a broker error when its confirmation takes longer than `limit`.
    pub fn with_confirm_timeout(mut self, limit: Option<Duration>) -> Self {
        self.confirm_timeout = limit;
        self
    }

    /// Publishes every message `burst_count` times, one attempt at a time.
    ///
    /// Cancellation is checked before each attempt and yields a partial (or failed, if nothing
    /// was delivered) outcome. Broker failures abort the call with a [`PublishFailure`] that
    /// still carries the attempts delivered so far. The channel is closed on every path, also
    /// when the returned future is dropped before it completes.
    pub async fn publish(
        &mut self,
        destination: &Destination,
        messages: &[OutboundMessage],
        burst_count: usize,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishFailure> {
        let planned = messages.len() * burst_count;
        if burst_count == 0 {
            return Err(PublishFailure {
                error: ClientError::Config("burst count must be at least 1".to_owned()),
                outcome: PublishOutcome::failed(destination, Vec::new(), messages.len()),
            });
        }

        let mut lease = match self.provider.acquire().await {
            Ok(channel) => ChannelLease::new(channel),
            Err(e) => {
                tracing::error!(destination = %destination, error = %e, "failed to acquire channel");
                return Err(PublishFailure {
                    error: e,
                    outcome: PublishOutcome::failed(destination, Vec::new(), planned),
                });
            }
        };

        let base = self.tokens.base_token();
        tracing::debug!(destination = %destination, base = %base, planned, "publishing");

        let mut attempts = Vec::with_capacity(planned);
        let result = self
            .run_attempts(
                &mut lease,
                destination,
                messages,
                burst_count,
                &base,
                cancel,
                &mut attempts,
            )
            .await;
        lease.release().await;

        match result {
            Ok(Completion::Finished) => {
                tracing::info!(destination = %destination, published = attempts.len(), "publish complete");
                Ok(PublishOutcome::success(destination, attempts))
            }
            Ok(Completion::Cancelled) => {
                tracing::warn!(
                    destination = %destination,
                    published = attempts.len(),
                    planned,
                    "publish cancelled"
                );
                Ok(PublishOutcome::cancelled(destination, attempts, planned))
            }
            Err(error) => {
                tracing::error!(
                    destination = %destination,
                    published = attempts.len(),
                    code = error.code(),
                    error = ?error,
                    "publish failed"
                );
                Err(PublishFailure {
                    error,
                    outcome: PublishOutcome::failed(destination, attempts, planned),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempts(
        &self,
        lease: &mut ChannelLease<P::Channel>,
        destination: &Destination,
        messages: &[OutboundMessage],
        burst_count: usize,
        base: &str,
        cancel: &CancellationToken,
        attempts: &mut Vec<DeliveryAttemptResult>,
    ) -> Result<Completion, ClientError> {
        let planned = messages.len() * burst_count;

        for (message_index, message) in messages.iter().enumerate() {
            for burst_index in 0..burst_count {
                if cancel.is_cancelled() {
                    return Ok(Completion::Cancelled);
                }

                let id = assigned_id(base, message_index, messages.len(), burst_index, burst_count);
                let generated = PropertySet {
                    message_id: Some(id.clone()),
                    timestamp: Some(chrono::Utc::now().timestamp()),
                    ..Default::default()
                };
                let outgoing = match &message.properties {
                    Some(user) => properties::merge(&generated, user),
                    None => generated,
                };

                let sent = lease.publish_once(destination, &outgoing, &message.body);
                let confirmed = match self.confirm_timeout {
                    Some(limit) => tokio::time::timeout(limit, sent).await.unwrap_or_else(|_| {
                        Err(PublishError::Other(format!(
                            "no confirmation within {}ms",
                            limit.as_millis()
                        )))
                    }),
                    None => sent.await,
                };
                self.progress.on_progress(attempts.len() + 1, planned);

                let confirmation = confirmed.map_err(|e| {
                    let error = e.classify(destination);
                    if let ClientError::Unroutable(_) = error {
                        tracing::warn!(id = %id, destination = %destination, "message returned as unroutable");
                    }
                    error
                })?;

                attempts.push(DeliveryAttemptResult {
                    assigned_id: id,
                    byte_length: message.body.len() as i64,
                    broker_timestamp: confirmation.broker_timestamp,
                });
            }
        }

        Ok(Completion::Finished)
    }
}
