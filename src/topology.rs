// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Setup
//!
//! This module brings the broker topology for a consuming client to a known,
//! consistent state: the dead-letter infrastructure (when configured), the
//! primary queue, and its routing-key bindings. Steps run in strict order
//! because later declarations reference earlier ones; bindings of one queue to
//! sibling routing keys carry no such dependency and are issued together.
//!
//! Every operation is idempotent on the broker side, so running setup twice
//! with the same specification has no cumulative effect, and a failure aborts
//! the remaining steps without rolling back the ones already applied.

use crate::{
    channel::BrokerChannel,
    errors::AmqpError,
    queue::{QueueOptions, QueueSpec, RoutingKey},
};
use futures_util::future::try_join_all;
use tracing::debug;

/// Declares and binds everything the given queue specification requires.
///
/// Order of operations:
/// 1. Dead-letter exchange, queue, and bindings, when a dead-letter exchange
///    is configured.
/// 2. The primary queue, carrying the dead-letter argument when configured.
/// 3. One binding to the main exchange per routing key; no routing key means
///    declare-only.
///
/// # Parameters
/// * `channel` - The channel to issue operations on
/// * `exchange` - The name of the main exchange
/// * `queue` - The queue specification
///
/// # Returns
/// Ok(()) once every operation completed, or the first failure.
pub(crate) async fn setup_for_consume(
    channel: &dyn BrokerChannel,
    exchange: &str,
    queue: &QueueSpec,
) -> Result<(), AmqpError> {
    debug!("setting up topology for queue: {}", queue.name);

    maybe_declare_dead_letters(channel, queue).await?;

    channel.declare_queue(&queue.name, &queue.options).await?;

    bind_routing_keys(channel, exchange, &queue.name, queue.routing_key.as_ref()).await?;

    debug!("topology for queue: {} is in place", queue.name);

    Ok(())
}

/// Declares the dead-letter exchange and queue and binds them together.
///
/// Skipped silently when no dead-letter exchange is configured. The dead-letter
/// queue is bound with the configured dead-letter routing key, falling back to
/// the primary routing key; with neither set the queue is declared unbound.
async fn maybe_declare_dead_letters(
    channel: &dyn BrokerChannel,
    queue: &QueueSpec,
) -> Result<(), AmqpError> {
    let Some(dead_letter_exchange) = queue.options.dead_letter_exchange() else {
        return Ok(());
    };

    channel
        .declare_topic_exchange(dead_letter_exchange, true)
        .await?;

    let dead_letter_queue = queue.dead_letter_queue_name();
    channel
        .declare_queue(&dead_letter_queue, &QueueOptions::default())
        .await?;

    bind_routing_keys(
        channel,
        dead_letter_exchange,
        &dead_letter_queue,
        queue.dead_letter_binding_keys(),
    )
    .await
}

/// Binds a queue to an exchange once per routing key.
///
/// A missing routing key is not an error: the queue stays declared and unbound.
/// Sibling bindings are issued concurrently; all of them must complete before
/// this step reports success.
async fn bind_routing_keys(
    channel: &dyn BrokerChannel,
    exchange: &str,
    queue_name: &str,
    keys: Option<&RoutingKey>,
) -> Result<(), AmqpError> {
    let Some(keys) = keys else {
        debug!("no routing key for queue: {} - skipping binding", queue_name);
        return Ok(());
    };

    try_join_all(
        keys.as_slice()
            .iter()
            .map(|key| channel.bind_queue(queue_name, exchange, key)),
    )
    .await?;

    Ok(())
}
