// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Specification
//!
//! This module provides types for declaring the queue a client consumes from,
//! including its routing-key bindings and its dead-letter configuration. The
//! specification is declarative: it is turned into broker state by the topology
//! setup, and every resulting declare/bind operation is idempotent.

/// Suffix appended to the primary queue name when naming its dead-letter queue,
/// unless an explicit suffix is configured.
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = "-dead-letter";

/// One or many routing keys.
///
/// Bindings are issued once per key, so a `Multiple` value of length N produces
/// N bindings for the queue it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingKey {
    Single(String),
    Multiple(Vec<String>),
}

impl RoutingKey {
    /// Normalizes the routing key to a slice of keys.
    pub fn as_slice(&self) -> &[String] {
        match self {
            RoutingKey::Single(key) => std::slice::from_ref(key),
            RoutingKey::Multiple(keys) => keys,
        }
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        RoutingKey::Single(key.to_owned())
    }
}

impl From<String> for RoutingKey {
    fn from(key: String) -> Self {
        RoutingKey::Single(key)
    }
}

impl From<Vec<String>> for RoutingKey {
    fn from(keys: Vec<String>) -> Self {
        RoutingKey::Multiple(keys)
    }
}

impl From<&[&str]> for RoutingKey {
    fn from(keys: &[&str]) -> Self {
        RoutingKey::Multiple(keys.iter().map(|key| (*key).to_owned()).collect())
    }
}

/// Declaration options for the primary queue.
///
/// `dead_letter_exchange` switches the dead-letter infrastructure on: the
/// exchange and the suffix-named queue are declared during topology setup, and
/// the primary queue is declared with its rejects routed to that exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_queue_suffix: Option<String>,
    pub(crate) dead_letter_routing_key: Option<RoutingKey>,
}

impl QueueOptions {
    pub(crate) fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }
}

/// Specification of the queue a client consumes from.
///
/// This struct implements the builder pattern to create and configure the queue
/// specification. A missing routing key means "declare only, do not bind" - the
/// queue still exists and can be bound later or addressed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub(crate) name: String,
    pub(crate) routing_key: Option<RoutingKey>,
    pub(crate) options: QueueOptions,
}

impl QueueSpec {
    /// Creates a new queue specification with the given name.
    ///
    /// By default the queue has no routing key, no dead-letter configuration,
    /// and standard settings (non-durable, non-exclusive).
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue specification with default settings
    pub fn new(name: &str) -> QueueSpec {
        QueueSpec {
            name: name.to_owned(),
            routing_key: None,
            options: QueueOptions::default(),
        }
    }

    /// Binds the queue to the main exchange under a single routing key.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(RoutingKey::Single(key.to_owned()));
        self
    }

    /// Binds the queue to the main exchange once per given routing key.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_keys(mut self, keys: &[&str]) -> Self {
        self.routing_key = Some(RoutingKey::from(keys));
        self
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.options.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.options.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn auto_delete(mut self) -> Self {
        self.options.auto_delete = true;
        self
    }

    /// Enables dead-lettering through the named exchange.
    ///
    /// Topology setup will declare the exchange, declare a companion queue named
    /// after this queue plus the dead-letter suffix, bind the companion queue to
    /// the exchange, and declare this queue with its rejects routed there.
    ///
    /// # Parameters
    /// * `exchange` - The name of the dead-letter exchange
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.options.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Overrides the suffix used to name the dead-letter queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_queue_suffix(mut self, suffix: &str) -> Self {
        self.options.dead_letter_queue_suffix = Some(suffix.to_owned());
        self
    }

    /// Sets the routing key used to bind the dead-letter queue.
    ///
    /// When unset, the binding falls back to the primary routing key.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_routing_key(mut self, key: &str) -> Self {
        self.options.dead_letter_routing_key = Some(RoutingKey::Single(key.to_owned()));
        self
    }

    /// Sets multiple routing keys used to bind the dead-letter queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_routing_keys(mut self, keys: &[&str]) -> Self {
        self.options.dead_letter_routing_key = Some(RoutingKey::from(keys));
        self
    }

    /// The name of the companion dead-letter queue.
    pub(crate) fn dead_letter_queue_name(&self) -> String {
        let suffix = self
            .options
            .dead_letter_queue_suffix
            .as_deref()
            .unwrap_or(DEFAULT_DEAD_LETTER_SUFFIX);
        format!("{}{}", self.name, suffix)
    }

    /// The keys used to bind the dead-letter queue, falling back to the primary
    /// routing key when no explicit dead-letter key is configured.
    pub(crate) fn dead_letter_binding_keys(&self) -> Option<&RoutingKey> {
        self.options
            .dead_letter_routing_key
            .as_ref()
            .or(self.routing_key.as_ref())
    }
}
