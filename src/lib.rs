//! This crate moves messages between a local process and an AMQP broker.
//!
//! Publishing expands a batch of messages into burst attempts with related identifiers and
//! reports a single outcome. Consuming streams deliveries through a bounded queue into a
//! console or rotating file sink, acknowledging each one back to the broker.
//! The broker client itself sits behind the traits in [`broker`].
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod format;
pub mod header;
pub mod logging;
pub mod message;
pub mod properties;
pub mod publisher;
pub mod report;
pub mod rotate;
pub mod sink;
