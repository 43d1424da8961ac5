// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handler Contract
//!
//! The application supplies a `MessageHandler`; the consumer engine invokes it
//! once per delivery and turns its outcome into the broker-level acknowledge or
//! reject call. The outcome is an explicit tagged value so the choice between
//! dropping and requeuing a failed message is always deliberate.

use async_trait::async_trait;
use lapin::{message::Delivery, BasicProperties};

/// The completion signal a handler produces for one delivery.
///
/// `Ack` removes the message from the queue permanently. `Reject` with
/// `requeue` set asks the broker to redeliver (a transient failure); without it
/// the message is dropped or dead-lettered (a permanently bad message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ack,
    Reject { requeue: bool },
}

/// A delivery as received from the broker, before decoding.
///
/// Each delivery carries its own delivery tag and is terminated by exactly one
/// acknowledge or reject call issued by the consumer engine.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

impl From<Delivery> for InboundDelivery {
    fn from(delivery: Delivery) -> Self {
        InboundDelivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
        }
    }
}

/// The decoded message handed to the application handler.
///
/// `raw` is populated only when the consumer was registered with
/// `return_raw_message`, for handlers that need the delivery metadata.
#[derive(Debug)]
pub struct IncomingMessage {
    pub payload: serde_json::Value,
    pub raw: Option<InboundDelivery>,
}

/// Processes decoded deliveries from the consumed queue.
///
/// The handler is invoked once per delivery and may run for as long as it
/// needs; in-flight invocations are bounded by the configured prefetch count.
/// A panic unwinding out of `handle` is caught at the engine boundary and
/// treated as a reject without requeue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: IncomingMessage) -> HandlerOutcome;
}
