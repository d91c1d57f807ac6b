//! The runtime model of a Web Thing: a device whose state can be observed
//! and acted upon concurrently through a REST-plus-publish/subscribe
//! protocol.
//!
//! This crate provides APIs to:
//!
//! - Define observable values. A value notifies its listeners every time it
//!   is written, either through the API or by the device itself, and can
//!   forward requested values to the device before accepting them.
//! - Define properties, actions and events of a Thing, each described by a
//!   typed data schema. Property writes and action inputs are validated
//!   against their schema before they reach the device.
//! - Run actions in the background. Every action moves through the
//!   `created → pending → running → completed | error` statuses and can be
//!   cancelled cooperatively.
//! - Fan out every property, action and event change to the subscribers of a
//!   Thing. A subscriber which cannot keep up, or whose connection is gone,
//!   is dropped without affecting the others.
//!
//! Action bodies run on the `tokio` runtime which requested them. Serving
//! Things over the network is left to the `webthing-os` crate.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Action definitions, statuses and handlers.
pub mod action;
/// Thing description documents.
pub mod description;
/// Error management.
pub mod error;
/// Events emitted by a Thing.
pub mod event;
/// Groups of Things served together.
pub mod group;
/// Thing properties.
pub mod property;
/// Data schemas and their validation.
pub mod schema;
/// Subscribers and the messages delivered to them.
pub mod subscriber;
/// The Thing aggregate.
pub mod thing;
/// General utilities.
pub mod utils;
/// Observable values.
pub mod value;

pub use action::{Action, ActionContext, ActionHandler, ActionStatus};
pub use error::{Error, ErrorKind, Result};
pub use event::Event;
pub use group::ThingGroup;
pub use property::Property;
pub use schema::{ActionMetadata, DataSchema, JsonType, Link};
pub use subscriber::{ChannelSubscriber, Message, Subscriber, SubscriberId};
pub use thing::{Thing, ThingBuilder};
pub use value::Value;
