//! A library for serving Web Things on operating systems.
//!
//! This crate exposes a [`webthing::ThingGroup`] over the network:
//!
//! - Every Thing is served through a `REST` interface to read and write its
//!   properties, request and cancel its actions, and read its event log.
//! - Every Thing accepts WebSocket connections on its root path. A connection
//!   subscribes to all property, action and event changes of the Thing, and
//!   can set properties, request actions and subscribe to specific events.
//! - The server advertises itself through the `mDNS-SD` discovery protocol,
//!   so clients on the local network can find it.
//!
//! Requests are accepted only when their `Host` header names the server, and
//! every response carries permissive `CORS` headers.
//!
//! The server runs on the `tokio` asynchronous executor, which also runs the
//! body of every action requested through it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Error management.
pub mod error;
/// All responses returned by the server.
pub mod responses;
/// The server and its configuration.
pub mod server;
/// The `mDNS-SD` advertisement of a server.
pub mod service;

mod net;
mod routes;
mod websocket;

pub use server::Server;
pub use service::ServiceConfig;

#[cfg(test)]
mod tests;
