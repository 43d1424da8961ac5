// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides functionality for publishing messages to the configured
//! exchange with publisher-confirm semantics: a publish succeeds only once the
//! broker has acknowledged it, which is a stronger guarantee than "enqueued for
//! send". Outbound payloads may be raw bytes, text, or any serializable value;
//! serialization never fails the publish path.

use crate::{channel::BrokerChannel, errors::AmqpError, otel::AmqpTracePropagator};
use lapin::{
    types::{AMQPValue, FieldTable, LongLongInt, LongString, LongUInt, ShortInt, ShortString},
    BasicProperties,
};
use opentelemetry::{global, Context};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use uuid::Uuid;

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for plain text messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type for raw binary messages
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// AMQP delivery mode marking a message as persistent
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// An encoded outbound message body with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    pub(crate) body: Vec<u8>,
    pub(crate) content_type: &'static str,
}

impl OutboundPayload {
    /// Wraps raw bytes, published verbatim.
    pub fn raw(body: impl Into<Vec<u8>>) -> OutboundPayload {
        OutboundPayload {
            body: body.into(),
            content_type: BINARY_CONTENT_TYPE,
        }
    }

    /// Wraps a plain text body.
    pub fn text(body: impl Into<String>) -> OutboundPayload {
        OutboundPayload {
            body: body.into().into_bytes(),
            content_type: TEXT_CONTENT_TYPE,
        }
    }

    /// Encodes a structured value as JSON.
    ///
    /// Encoding never fails: a value the serializer rejects (for example a map
    /// with non-string keys) is replaced with a bounded error document and a
    /// warning, instead of failing the publish.
    pub fn json<T: Serialize>(value: &T) -> OutboundPayload {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    "payload is not serializable, publishing an error document"
                );
                let fallback = serde_json::json!({ "unserializable_payload": err.to_string() });
                serde_json::to_vec(&fallback).unwrap_or_default()
            }
        };

        OutboundPayload {
            body,
            content_type: JSON_CONTENT_TYPE,
        }
    }
}

impl From<&str> for OutboundPayload {
    fn from(body: &str) -> Self {
        OutboundPayload::text(body)
    }
}

impl From<String> for OutboundPayload {
    fn from(body: String) -> Self {
        OutboundPayload::text(body)
    }
}

impl From<Vec<u8>> for OutboundPayload {
    fn from(body: Vec<u8>) -> Self {
        OutboundPayload::raw(body)
    }
}

impl From<&[u8]> for OutboundPayload {
    fn from(body: &[u8]) -> Self {
        OutboundPayload::raw(body.to_vec())
    }
}

impl From<serde_json::Value> for OutboundPayload {
    fn from(value: serde_json::Value) -> Self {
        OutboundPayload::json(&value)
    }
}

/// A typed message header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    ShortString(String),
    LongString(String),
    Int(i16),
    LongLongInt(i64),
    Uint(u32),
    Bool(bool),
}

/// Options passed through to the underlying confirm publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Return the message when no queue is bound for the routing key
    pub mandatory: bool,
    /// Mark the message as persistent so durable queues keep it across restarts
    pub persistent: bool,
    /// Application headers attached to the message
    pub headers: HashMap<String, HeaderValue>,
}

/// Publishes a message to the given exchange and waits for the broker confirm.
///
/// The message is stamped with a content type, a v4 message id, and the current
/// trace context alongside any application headers.
///
/// # Parameters
/// * `channel` - The confirm channel to publish on
/// * `exchange` - The exchange to publish to
/// * `routing_key` - The routing key for the message
/// * `payload` - The encoded message body
/// * `options` - Publish options passed through to the broker
///
/// # Returns
/// Ok(()) once the broker confirmed the publish, or an error on failure.
pub(crate) async fn publish(
    channel: &dyn BrokerChannel,
    exchange: &str,
    routing_key: &str,
    payload: OutboundPayload,
    options: &PublishOptions,
) -> Result<(), AmqpError> {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(
            &Context::current(),
            &mut AmqpTracePropagator::new(&mut headers),
        )
    });

    header_table(&options.headers, &mut headers);

    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(payload.content_type))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(FieldTable::from(headers));

    if options.persistent {
        properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }

    channel
        .publish_confirmed(
            exchange,
            routing_key,
            options.mandatory,
            &payload.body,
            properties,
        )
        .await
}

/// Converts application header values into AMQP field-table values.
fn header_table(
    headers: &HashMap<String, HeaderValue>,
    btree: &mut BTreeMap<ShortString, AMQPValue>,
) {
    for (key, value) in headers {
        let amqp_value = match value {
            HeaderValue::ShortString(v) => AMQPValue::ShortString(ShortString::from(v.clone())),
            HeaderValue::LongString(v) => AMQPValue::LongString(LongString::from(v.clone())),
            HeaderValue::Int(v) => AMQPValue::ShortInt(ShortInt::from(*v)),
            HeaderValue::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            HeaderValue::Uint(v) => AMQPValue::LongUInt(LongUInt::from(*v)),
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBrokerChannel;
    use serde::Serialize;
    use std::collections::BTreeMap as StdBTreeMap;

    #[derive(Serialize, PartialEq, Debug, serde::Deserialize)]
    struct Order {
        id: u32,
        item: String,
    }

    #[test]
    fn json_payload_round_trips() {
        let order = Order {
            id: 7,
            item: "widget".to_owned(),
        };

        let payload = OutboundPayload::json(&order);
        assert_eq!(payload.content_type, JSON_CONTENT_TYPE);

        let decoded: Order = serde_json::from_slice(&payload.body).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn unserializable_payload_falls_back_to_an_error_document() {
        // non-string map keys are rejected by the serializer
        let mut value = StdBTreeMap::new();
        value.insert(vec![1u8, 2u8], "x");

        let payload = OutboundPayload::json(&value);
        assert_eq!(payload.content_type, JSON_CONTENT_TYPE);

        let document: serde_json::Value = serde_json::from_slice(&payload.body).unwrap();
        assert!(document.get("unserializable_payload").is_some());
    }

    #[test]
    fn payload_conversions_pick_the_content_type() {
        assert_eq!(OutboundPayload::from("hi").content_type, TEXT_CONTENT_TYPE);
        assert_eq!(
            OutboundPayload::from(vec![1u8, 2u8]).content_type,
            BINARY_CONTENT_TYPE
        );
        assert_eq!(
            OutboundPayload::from(serde_json::json!({"a": 1})).content_type,
            JSON_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn publishes_to_the_exchange_with_the_routing_key() {
        let mut channel = MockBrokerChannel::new();

        channel
            .expect_publish_confirmed()
            .withf(|exchange, routing_key, mandatory, payload, properties| {
                exchange == "events"
                    && routing_key == "orders.created"
                    && !*mandatory
                    && payload == &b"{\"a\":1}"[..]
                    && properties.content_type().as_ref().map(|c| c.as_str())
                        == Some(JSON_CONTENT_TYPE)
                    && properties.message_id().is_some()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        publish(
            &channel,
            "events",
            "orders.created",
            OutboundPayload::from(serde_json::json!({"a": 1})),
            &PublishOptions::default(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn persistent_publishes_carry_the_delivery_mode() {
        let mut channel = MockBrokerChannel::new();

        channel
            .expect_publish_confirmed()
            .withf(|_, _, _, _, properties| {
                properties.delivery_mode() == &Some(PERSISTENT_DELIVERY_MODE)
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let options = PublishOptions {
            persistent: true,
            ..PublishOptions::default()
        };

        publish(&channel, "events", "rk", OutboundPayload::text("x"), &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn application_headers_are_attached_to_the_message() {
        let mut channel = MockBrokerChannel::new();

        channel
            .expect_publish_confirmed()
            .withf(|_, _, _, _, properties| {
                let headers = properties.headers().clone().unwrap_or_default();
                headers.inner().get(&ShortString::from("attempt"))
                    == Some(&AMQPValue::LongLongInt(LongLongInt::from(3i64)))
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let mut headers = HashMap::new();
        headers.insert("attempt".to_owned(), HeaderValue::LongLongInt(3));
        let options = PublishOptions {
            headers,
            ..PublishOptions::default()
        };

        publish(&channel, "events", "rk", OutboundPayload::text("x"), &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_broker_nack_surfaces_as_an_error() {
        let mut channel = MockBrokerChannel::new();

        channel
            .expect_publish_confirmed()
            .times(1)
            .returning(|_, _, _, _, _| Err(AmqpError::PublishNotConfirmed));

        let err = publish(
            &channel,
            "events",
            "rk",
            OutboundPayload::text("x"),
            &PublishOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, AmqpError::PublishNotConfirmed);
    }
}
