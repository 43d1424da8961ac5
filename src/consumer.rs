// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! This module implements the per-delivery acknowledgment engine: payload
//! decode, handler invocation, and the mapping of the handler outcome to the
//! broker acknowledge or reject primitive. Per-message failures never propagate
//! out of the engine - an unparsable payload or a panicking handler always
//! resolves to a reject without requeue, and the consumer keeps running.

use crate::{
    channel::BrokerChannel,
    errors::AmqpError,
    handler::{HandlerOutcome, InboundDelivery, IncomingMessage, MessageHandler},
    otel,
};
use futures_util::{FutureExt, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, fmt, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Opaque handle identifying a consumer registration.
///
/// Returned by a successful `consume` call and required to cancel the consumer
/// during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTag(pub(crate) String);

impl ConsumerTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for a consumer registration, passed through to the broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Make this the only consumer allowed on the queue
    pub exclusive: bool,
    /// Skip deliveries published on this same connection
    pub no_local: bool,
    /// Hand the handler the raw delivery alongside the parsed payload
    pub return_raw_message: bool,
}

/// Registers a consumer on the queue and spawns the delivery loop.
///
/// Each delivery is processed in its own task, so handler invocations overlap
/// up to the prefetch limit the channel was configured with.
///
/// # Parameters
/// * `channel` - The channel to consume on
/// * `queue_name` - The queue to consume from
/// * `handler` - The application message handler
/// * `options` - Consumer registration options
///
/// # Returns
/// The consumer tag the registration was made under, or an error when
/// registration fails.
pub(crate) async fn start(
    channel: Arc<Channel>,
    queue_name: &str,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
) -> Result<ConsumerTag, AmqpError> {
    let tag = format!("ctag-{}", Uuid::new_v4());

    let mut consumer = match channel
        .basic_consume(
            queue_name,
            &tag,
            BasicConsumeOptions {
                no_local: options.no_local,
                no_ack: false,
                exclusive: options.exclusive,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(AmqpError::CreateConsumerError(
                queue_name.to_owned(),
                err.to_string(),
            ))
        }
        Ok(c) => Ok(c),
    }?;

    debug!("consumer registered with tag: {}", tag);

    let return_raw_message = options.return_raw_message;

    let consumer_tag = ConsumerTag(tag);

    tokio::spawn(async move {
        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    let channel = channel.clone();
                    let handler = handler.clone();

                    tokio::spawn(async move {
                        if let Err(err) = process_delivery(
                            &global::tracer("amqp consumer"),
                            channel.as_ref(),
                            InboundDelivery::from(delivery),
                            handler.as_ref(),
                            return_raw_message,
                        )
                        .await
                        {
                            error!(error = err.to_string(), "error consuming message");
                        }
                    });
                }
                Err(err) => error!(error = err.to_string(), "error receiving delivery"),
            }
        }
    });

    Ok(consumer_tag)
}

/// Consumes and processes a single delivery.
///
/// The state machine per delivery:
/// 1. Decode the payload as UTF-8 text and parse it as JSON. A failure is a
///    permanent defect: reject without requeue, handler never invoked.
/// 2. Invoke the handler. A panic unwinding out of it is caught here and
///    treated as a reject without requeue.
/// 3. Map the outcome: `Ack` acknowledges, `Reject` rejects with the requeue
///    flag the handler chose.
///
/// Every delivery is terminated by exactly one acknowledge or reject call.
///
/// # Returns
/// Ok(()) when the delivery was resolved, or an error when the resolving
/// broker call itself failed.
pub(crate) async fn process_delivery(
    tracer: &BoxedTracer,
    channel: &dyn BrokerChannel,
    delivery: InboundDelivery,
    handler: &dyn MessageHandler,
    return_raw_message: bool,
) -> Result<(), AmqpError> {
    let (_ctx, mut span) = otel::consumer_span(&delivery.properties, tracer, &delivery.routing_key);

    debug!(
        "received delivery: {} - exchange: {}",
        delivery.routing_key, delivery.exchange,
    );

    let delivery_tag = delivery.delivery_tag;

    let payload = match decode_payload(&delivery.data) {
        Ok(payload) => payload,
        Err(err) => {
            error!(
                error = err.to_string(),
                "removing message from queue - reason: unparsable payload"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("unparsable payload"),
            });

            return match channel.nack(delivery_tag, false).await {
                Err(nack_err) => {
                    error!("error whiling nack msg");
                    span.record_error(&nack_err);
                    Err(AmqpError::NackMessageError)
                }
                _ => Ok(()),
            };
        }
    };

    let message = IncomingMessage {
        payload,
        raw: return_raw_message.then_some(delivery),
    };

    let outcome = match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            // A panic is an unexpected defect, not a transient condition:
            // never requeue it.
            error!("handler panicked - removing message from queue");
            span.set_status(Status::Error {
                description: Cow::from("handler panicked"),
            });
            HandlerOutcome::Reject { requeue: false }
        }
    };

    match outcome {
        HandlerOutcome::Ack => match channel.ack(delivery_tag).await {
            Err(err) => {
                error!("error whiling ack msg");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                Err(AmqpError::AckMessageError)
            }
            _ => {
                debug!("message successfully processed");
                span.set_status(Status::Ok);
                Ok(())
            }
        },
        HandlerOutcome::Reject { requeue } => match channel.nack(delivery_tag, requeue).await {
            Err(err) => {
                error!("error whiling nack msg");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to nack msg"),
                });
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        },
    }
}

/// Decodes a delivery payload as UTF-8 text and parses it as JSON.
fn decode_payload(data: &[u8]) -> Result<serde_json::Value, AmqpError> {
    let text =
        std::str::from_utf8(data).map_err(|err| AmqpError::DecodeError(err.to_string()))?;
    serde_json::from_str(text).map_err(|err| AmqpError::DecodeError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBrokerChannel;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StaticHandler {
        outcome: HandlerOutcome,
        invoked: AtomicBool,
        saw_raw: AtomicBool,
    }

    impl StaticHandler {
        fn new(outcome: HandlerOutcome) -> StaticHandler {
            StaticHandler {
                outcome,
                invoked: AtomicBool::new(false),
                saw_raw: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for StaticHandler {
        async fn handle(&self, message: IncomingMessage) -> HandlerOutcome {
            self.invoked.store(true, Ordering::SeqCst);
            self.saw_raw.store(message.raw.is_some(), Ordering::SeqCst);
            self.outcome
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, _message: IncomingMessage) -> HandlerOutcome {
            panic!("boom");
        }
    }

    fn delivery(tag: u64, data: &[u8]) -> InboundDelivery {
        InboundDelivery {
            delivery_tag: tag,
            exchange: "events".to_owned(),
            routing_key: "orders.created".to_owned(),
            redelivered: false,
            properties: lapin::BasicProperties::default(),
            data: data.to_vec(),
        }
    }

    fn tracer() -> BoxedTracer {
        global::tracer("test")
    }

    #[tokio::test]
    async fn a_successful_handler_acks_exactly_once() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_ack()
            .with(eq(42u64))
            .times(1)
            .returning(|_| Ok(()));

        let handler = StaticHandler::new(HandlerOutcome::Ack);

        process_delivery(&tracer(), &channel, delivery(42, b"{\"ok\":true}"), &handler, false)
            .await
            .unwrap();

        assert!(handler.invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_rejecting_handler_nacks_without_requeue_by_default() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_nack()
            .withf(|tag, requeue| *tag == 7 && !*requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = StaticHandler::new(HandlerOutcome::Reject { requeue: false });

        process_delivery(&tracer(), &channel, delivery(7, b"{}"), &handler, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_transient_failure_requeues_when_the_handler_asks() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_nack()
            .withf(|tag, requeue| *tag == 7 && *requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = StaticHandler::new(HandlerOutcome::Reject { requeue: true });

        process_delivery(&tracer(), &channel, delivery(7, b"{}"), &handler, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn an_unparsable_payload_is_rejected_without_invoking_the_handler() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_nack()
            .withf(|tag, requeue| *tag == 9 && !*requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = StaticHandler::new(HandlerOutcome::Ack);

        process_delivery(&tracer(), &channel, delivery(9, b"nonvalidjson"), &handler, false)
            .await
            .unwrap();

        assert!(!handler.invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_non_utf8_payload_is_rejected_without_invoking_the_handler() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_nack()
            .withf(|_, requeue| !*requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = StaticHandler::new(HandlerOutcome::Ack);

        process_delivery(&tracer(), &channel, delivery(9, &[0xff, 0xfe]), &handler, false)
            .await
            .unwrap();

        assert!(!handler.invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_panicking_handler_is_rejected_without_requeue() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_nack()
            .withf(|tag, requeue| *tag == 3 && !*requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        process_delivery(&tracer(), &channel, delivery(3, b"{}"), &PanickingHandler, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn the_raw_delivery_is_passed_only_when_requested() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().times(2).returning(|_| Ok(()));

        let with_raw = StaticHandler::new(HandlerOutcome::Ack);
        process_delivery(&tracer(), &channel, delivery(1, b"{}"), &with_raw, true)
            .await
            .unwrap();
        assert!(with_raw.saw_raw.load(Ordering::SeqCst));

        let without_raw = StaticHandler::new(HandlerOutcome::Ack);
        process_delivery(&tracer(), &channel, delivery(2, b"{}"), &without_raw, false)
            .await
            .unwrap();
        assert!(!without_raw.saw_raw.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_failed_ack_surfaces_to_the_delivery_loop() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_ack()
            .times(1)
            .returning(|_| Err(AmqpError::AckMessageError));

        let handler = StaticHandler::new(HandlerOutcome::Ack);

        let err = process_delivery(&tracer(), &channel, delivery(1, b"{}"), &handler, false)
            .await
            .unwrap_err();
        assert_eq!(err, AmqpError::AckMessageError);
    }
}
