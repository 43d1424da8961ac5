// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and confirm channels,
//! and defines the `BrokerChannel` trait: the narrow interface the topology
//! setup, the publisher, and the consumer engine use to talk to the broker.
//! The trait is implemented for `lapin::Channel`; everything above it depends
//! only on the interface shape, not on the transport.

use crate::{errors::AmqpError, queue::QueueOptions};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

/// Queue argument routing rejected or expired messages to a dead-letter exchange.
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Opens a connection to the broker and creates a confirm channel on it.
///
/// The channel has publisher confirms enabled, so publishes through it resolve
/// only once the broker acknowledges them.
///
/// # Parameters
/// * `url` - The broker URL
/// * `connection_name` - Optional name reported to the broker for this connection
///
/// # Returns
/// The connection and the confirm channel on success, or an error on failure.
pub(crate) async fn open(
    url: &str,
    connection_name: Option<&str>,
) -> Result<(Connection, Channel), AmqpError> {
    debug!("creating amqp connection...");
    let mut options = ConnectionProperties::default();
    if let Some(name) = connection_name {
        options = options.with_connection_name(LongString::from(name.to_owned()));
    }

    let connection = match Connection::connect(url, options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp confirm channel...");
    let channel = match connection.create_channel().await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }?;

    match channel
        .confirm_select(ConfirmSelectOptions { nowait: false })
        .await
    {
        Ok(()) => {
            debug!("confirm channel created");
            Ok((connection, channel))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to enable publisher confirms");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

/// The broker operations the client issues over one logical channel.
///
/// All operations are serialized through a single channel per connection; the
/// declare and bind operations are idempotent on the broker side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a topic exchange.
    async fn declare_topic_exchange(&self, name: &str, durable: bool) -> Result<(), AmqpError>;

    /// Declares a queue with the given options.
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError>;

    /// Binds a queue to an exchange under a routing key.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Publishes a message and waits for the broker to confirm it.
    async fn publish_confirmed(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Acknowledges a single delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Rejects a single delivery, optionally requeuing it.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    /// Cancels a consumer registration by tag.
    async fn cancel_consumer(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Requeues every unacknowledged delivery on the channel.
    async fn requeue_unacked(&self) -> Result<(), AmqpError>;
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn declare_topic_exchange(&self, name: &str, durable: bool) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);

        match self
            .exchange_declare(
                name,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: false,
                    durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(
                    name.to_owned(),
                    err.to_string(),
                ))
            }
            _ => {
                debug!("exchange: {} was created", name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);

        let mut queue_args = BTreeMap::new();
        if let Some(dlx) = options.dead_letter_exchange() {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(dlx.to_owned())),
            );
        }

        match self
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: false,
                },
                FieldTable::from(queue_args),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned(), err.to_string()))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindQueueError(
                    queue.to_owned(),
                    exchange.to_owned(),
                    err.to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish_confirmed(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let confirmation = self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory,
                },
                payload,
                properties,
            )
            .await
            .map_err(|err| AmqpError::PublishError(err.to_string()))?
            .await
            .map_err(|err| AmqpError::PublishError(err.to_string()))?;

        if confirmation.is_nack() {
            error!("broker nacked the publisher confirm");
            return Err(AmqpError::PublishNotConfirmed);
        }

        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|_| AmqpError::AckMessageError)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        .map_err(|_| AmqpError::NackMessageError)
    }

    async fn cancel_consumer(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| {
                AmqpError::CancelConsumerError(consumer_tag.to_owned(), err.to_string())
            })
    }

    async fn requeue_unacked(&self) -> Result<(), AmqpError> {
        // delivery tag 0 with multiple set addresses every outstanding delivery
        self.basic_nack(
            0,
            BasicNackOptions {
                multiple: true,
                requeue: true,
            },
        )
        .await
        .map_err(|err| AmqpError::RequeueError(err.to_string()))
    }
}
