//!
//! Consume pipeline: a producer task fills a bounded queue, a single writer drains it,
//! formats and writes each delivery, and hands an acknowledgment back for every one.
//!
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::ConsumeSource;
use crate::error::ClientError;
use crate::format::MessageFormatter;
use crate::message::{AckDecision, InboundMessage};
use crate::sink::MessageSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeSummary {
    pub processed_count: u64,

    /// Sum of the body sizes of processed messages.
    pub total_bytes: u64,

    pub rejected_count: u64,
}

/// The producer failed; `summary` covers what was written before that.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ConsumeFailure {
    #[source]
    pub error: ClientError,
    pub summary: ConsumeSummary,
}

pub struct StreamingWriter<F, S> {
    formatter: F,
    sink: S,
}

impl<F, S> StreamingWriter<F, S>
where
    F: MessageFormatter,
    S: MessageSink,
{
    pub fn new(formatter: F, sink: S) -> Self {
        StreamingWriter { formatter, sink }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drains `inbound` until it is closed or `cancel` fires, sending one decision per
    /// message to `outbound`.
    ///
    /// Cancellation is only observed between messages; a message already taken is
    /// formatted, written and acknowledged first.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Sender<AckDecision>,
        cancel: &CancellationToken,
    ) -> ConsumeSummary {
        let mut summary = ConsumeSummary::default();
        let mut acks_open = true;

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(processed = summary.processed_count, "consume cancelled");
                    break;
                }
                next = inbound.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let decision = match self.process(&message) {
                Ok(()) => {
                    summary.processed_count += 1;
                    summary.total_bytes += message.body.len() as u64;
                    AckDecision::ack(message.delivery_tag)
                }
                Err(e) => {
                    tracing::warn!(
                        delivery_tag = message.delivery_tag,
                        code = e.code(),
                        error = %e,
                        "rejecting message"
                    );
                    summary.rejected_count += 1;
                    AckDecision::nack(message.delivery_tag)
                }
            };

            if acks_open && outbound.send(decision).await.is_err() {
                tracing::warn!(
                    delivery_tag = decision.delivery_tag,
                    "acknowledgment queue closed, decisions are no longer delivered"
                );
                acks_open = false;
            }
        }

        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "failed to flush output");
        }
        tracing::debug!(
            processed = summary.processed_count,
            rejected = summary.rejected_count,
            bytes = summary.total_bytes,
            "writer stopped"
        );
        summary
    }

    fn process(&mut self, message: &InboundMessage) -> Result<(), ClientError> {
        let formatted = self.formatter.format(message)?;
        self.sink.write_message(&formatted)?;
        Ok(())
    }
}

/// Runs `source` as the producer task and `writer` as the consumer until the source finishes
/// or `cancel` fires.
pub async fn consume<C, F, S>(
    source: C,
    writer: &mut StreamingWriter<F, S>,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> Result<ConsumeSummary, ConsumeFailure>
where
    C: ConsumeSource,
    F: MessageFormatter,
    S: MessageSink,
{
    let capacity = queue_capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (ack_tx, ack_rx) = mpsc::channel(capacity);

    let producer = tokio::spawn(source.run(inbound_tx, ack_rx, cancel.clone()));
    let summary = writer.run(inbound_rx, ack_tx, &cancel).await;

    match producer.await {
        Ok(Ok(())) => Ok(summary),
        Ok(Err(error)) => {
            tracing::error!(code = error.code(), error = ?error, "consume source failed");
            Err(ConsumeFailure { error, summary })
        }
        Err(e) => Err(ConsumeFailure {
            error: ClientError::Broker(format!("consume task failed: {}", e)),
            summary,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use crate::sink::ConsoleSink;
    use bytes::Bytes;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn delivery(tag: u64) -> InboundMessage {
        InboundMessage {
            exchange: "events".to_string(),
            routing_key: "k".to_string(),
            queue: "q".to_string(),
            body: Bytes::from(format!("body-{}", tag)),
            delivery_tag: tag,
            properties: None,
            redelivered: false,
        }
    }

    /// Fails on the listed delivery tags, and cancels `cancel_on` after formatting it.
    struct ScriptedFormatter {
        fail_on: Vec<u64>,
        cancel_on: Option<(u64, CancellationToken)>,
    }

    impl MessageFormatter for ScriptedFormatter {
        fn format(&self, message: &InboundMessage) -> Result<Vec<u8>, ClientError> {
            if let Some((tag, token)) = &self.cancel_on {
                if *tag == message.delivery_tag {
                    token.cancel();
                }
            }
            if self.fail_on.contains(&message.delivery_tag) {
                return Err(ClientError::Format("unsupported body".to_string()));
            }
            OutputFormat::Json.format(message)
        }

        fn is_self_delimiting(&self) -> bool {
            true
        }
    }

    fn scripted(fail_on: Vec<u64>) -> ScriptedFormatter {
        ScriptedFormatter {
            fail_on,
            cancel_on: None,
        }
    }

    struct BrokenSink;

    impl MessageSink for BrokenSink {
        fn write_message(&mut self, _formatted: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct VecSource {
        messages: Vec<InboundMessage>,
        decisions: Arc<Mutex<Vec<AckDecision>>>,
    }

    impl ConsumeSource for VecSource {
        async fn run(
            self,
            inbound: mpsc::Sender<InboundMessage>,
            mut acks: mpsc::Receiver<AckDecision>,
            cancel: CancellationToken,
        ) -> Result<(), ClientError> {
            let messages = self.messages;
            let push = async move {
                for message in messages {
                    tokio::select! {
                        sent = inbound.send(message) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            };
            let decisions = self.decisions;
            let drain = async move {
                while let Some(decision) = acks.recv().await {
                    decisions.lock().unwrap().push(decision);
                }
            };
            tokio::join!(push, drain);
            Ok(())
        }
    }

    struct FailingSource;

    impl ConsumeSource for FailingSource {
        async fn run(
            self,
            inbound: mpsc::Sender<InboundMessage>,
            _acks: mpsc::Receiver<AckDecision>,
            _cancel: CancellationToken,
        ) -> Result<(), ClientError> {
            inbound
                .send(delivery(1))
                .await
                .map_err(|e| ClientError::Broker(e.to_string()))?;
            Err(ClientError::Broker("connection lost".to_string()))
        }
    }

    async fn run_direct(
        writer: &mut StreamingWriter<impl MessageFormatter, impl MessageSink>,
        messages: Vec<InboundMessage>,
        cancel: &CancellationToken,
    ) -> (ConsumeSummary, Vec<AckDecision>) {
        let (tx, rx) = mpsc::channel(messages.len().max(1));
        let (ack_tx, mut ack_rx) = mpsc::channel(messages.len().max(1));
        for message in messages {
            tx.send(message).await.unwrap();
        }
        drop(tx);
        let summary = writer.run(rx, ack_tx, cancel).await;
        let mut decisions = Vec::new();
        while let Some(d) = ack_rx.recv().await {
            decisions.push(d);
        }
        (summary, decisions)
    }

    #[tokio::test]
    async fn test_format_failure_is_rejected_and_stream_continues() {
        let mut writer = StreamingWriter::new(scripted(vec![3]), ConsoleSink::new(Vec::new(), None));
        let messages: Vec<_> = (1..=5).map(delivery).collect();
        let (summary, decisions) = run_direct(&mut writer, messages, &CancellationToken::new()).await;

        assert_eq!(summary.processed_count, 4);
        assert_eq!(summary.rejected_count, 1);
        assert_eq!(summary.total_bytes, 4 * 6);
        assert_eq!(decisions.len(), 5);
        for (i, decision) in decisions.iter().enumerate() {
            assert_eq!(decision.delivery_tag, i as u64 + 1);
            assert_eq!(decision.accept, decision.delivery_tag != 3);
        }

        let output = String::from_utf8(writer.into_sink().into_inner()).unwrap();
        assert_eq!(output.lines().count(), 4);
        assert!(!output.contains("body-3"));
    }

    #[tokio::test]
    async fn test_write_failure_is_rejected() {
        let mut writer = StreamingWriter::new(OutputFormat::Plain, BrokenSink);
        let (summary, decisions) =
            run_direct(&mut writer, vec![delivery(1), delivery(2)], &CancellationToken::new()).await;
        assert_eq!(summary.processed_count, 0);
        assert_eq!(summary.total_bytes, 0);
        assert_eq!(
            decisions,
            vec![AckDecision::nack(1), AckDecision::nack(2)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_takes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut writer = StreamingWriter::new(scripted(vec![]), ConsoleSink::new(Vec::new(), None));
        let (summary, decisions) = run_direct(&mut writer, vec![delivery(1), delivery(2)], &cancel).await;
        assert_eq!(summary, ConsumeSummary::default());
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn test_message_in_progress_finishes_after_cancel() {
        let cancel = CancellationToken::new();
        let formatter = ScriptedFormatter {
            fail_on: vec![],
            cancel_on: Some((2, cancel.clone())),
        };
        let mut writer = StreamingWriter::new(formatter, ConsoleSink::new(Vec::new(), None));
        let messages: Vec<_> = (1..=4).map(delivery).collect();
        let (summary, decisions) = run_direct(&mut writer, messages, &cancel).await;

        assert_eq!(summary.processed_count, 2);
        assert_eq!(decisions, vec![AckDecision::ack(1), AckDecision::ack(2)]);
    }

    #[tokio::test]
    async fn test_consume_with_producer_task() -> Result<(), Box<dyn std::error::Error>> {
        let decisions = Arc::new(Mutex::new(Vec::new()));
        let source = VecSource {
            messages: (1..=20).map(delivery).collect(),
            decisions: decisions.clone(),
        };
        let mut writer = StreamingWriter::new(scripted(vec![5, 17]), ConsoleSink::new(Vec::new(), None));

        let summary = consume(source, &mut writer, 2, CancellationToken::new()).await?;

        assert_eq!(summary.processed_count, 18);
        assert_eq!(summary.rejected_count, 2);
        let decisions = decisions.lock().unwrap();
        assert_eq!(decisions.len(), 20);
        let tags: Vec<u64> = decisions.iter().map(|d| d.delivery_tag).collect();
        assert_eq!(tags, (1..=20).collect::<Vec<u64>>());
        assert!(decisions.iter().filter(|d| !d.accept).map(|d| d.delivery_tag).eq([5u64, 17]));
        Ok(())
    }

    #[tokio::test]
    async fn test_consume_surfaces_producer_error() {
        let mut writer = StreamingWriter::new(scripted(vec![]), ConsoleSink::new(Vec::new(), None));
        let failure = consume(FailingSource, &mut writer, 4, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ClientError::Broker(_)));
        assert_eq!(failure.summary.processed_count, 1);
    }
}
