// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Wrapper
//!
//! This module provides a comprehensive set of error types for broker operations.
//! The `AmqpError` enum represents all possible error scenarios that can occur during
//! configuration, connection, topology setup, publishing, and message consumption.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Configuration errors are surfaced synchronously before any network activity.
/// Topology errors (exchange/queue declarations and bindings) abort the remaining
/// setup steps. Decode errors never escape the consumer engine: they are resolved
/// into a reject-without-requeue decision and logged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Invalid or missing construction parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a confirm channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error configuring the prefetch count on the channel
    #[error("failure to configure qos: {0}")]
    QosError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare the exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare the queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind the queue `{0}` to the exchange `{1}`: {2}")]
    BindQueueError(String, String, String),

    /// Operation requires an established channel
    #[error("not connected to the broker")]
    NotConnected,

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishError(String),

    /// The broker negatively acknowledged a publisher confirm
    #[error("publish was not confirmed by the broker")]
    PublishNotConfirmed,

    /// Error parsing a delivery payload
    #[error("failure to parse the delivery payload: {0}")]
    DecodeError(String),

    /// Error registering a consumer on a queue
    #[error("failure to register a consumer on the queue `{0}`: {1}")]
    CreateConsumerError(String, String),

    /// Error cancelling a consumer by tag
    #[error("failure to cancel the consumer `{0}`: {1}")]
    CancelConsumerError(String, String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error requeuing the unacknowledged deliveries on the channel
    #[error("failure to requeue unacked messages: {0}")]
    RequeueError(String),
}
