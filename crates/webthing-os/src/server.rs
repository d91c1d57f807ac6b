use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::{Router, ServiceExt, extract::Request};

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;

use tracing::{error, info};

use webthing::ThingGroup;

use crate::error::Result;
use crate::net::allowed_hosts;
use crate::routes::{AppState, router};
use crate::service::ServiceConfig;

// Default port.
const DEFAULT_PORT: u16 = 80;
// Messages buffered for each WebSocket subscriber before it is dropped.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// A server exposing a [`ThingGroup`] over `HTTP` and WebSocket.
///
/// By default, the server listens on port `80`, serves its Things at the
/// root path and advertises itself through `mDNS-SD`.
#[derive(Debug)]
pub struct Server {
    group: ThingGroup,
    port: u16,
    hostname: Option<String>,
    base_path: String,
    subscriber_capacity: usize,
    service: Option<ServiceConfig>,
    routes: Option<Router>,
}

impl Server {
    /// Creates a [`Server`] for the given [`ThingGroup`].
    #[must_use]
    pub fn new(group: ThingGroup) -> Self {
        Self {
            group,
            port: DEFAULT_PORT,
            hostname: None,
            base_path: String::new(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            service: Some(ServiceConfig::new()),
            routes: None,
        }
    }

    /// Sets the server port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets a hostname the server is reachable at, such as `mything.com`.
    ///
    /// Requests are accepted only when their `Host` header names the server
    /// through a local address, the `.local` system hostname, or this
    /// hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Serves the Things under a base path, such as `/things`.
    #[must_use]
    pub fn base_path(mut self, base_path: &str) -> Self {
        let base_path = base_path.trim_matches('/');
        self.base_path = if base_path.is_empty() {
            String::new()
        } else {
            format!("/{base_path}")
        };
        self
    }

    /// Sets how many messages each WebSocket subscriber can have pending
    /// before it is considered too slow and dropped.
    #[must_use]
    pub const fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    /// Sets the `mDNS-SD` advertisement.
    #[must_use]
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.service = Some(service);
        self
    }

    /// Adds routes served ahead of the Thing routes.
    ///
    /// A request matching one of these routes never reaches the Things, so
    /// they can also replace a Thing route. They are not subject to the
    /// `Host` validation of the Thing routes, and their fallback, if any,
    /// is replaced by the Thing routes.
    #[must_use]
    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Disables the `mDNS-SD` advertisement.
    #[must_use]
    pub fn without_discovery(mut self) -> Self {
        self.service = None;
        self
    }

    /// Runs the server on all interfaces until `Ctrl-C` is pressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound or serving fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let _ = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down");
                    signal.cancel();
                }
                Err(e) => error!("Unable to listen for the shutdown signal: {e}"),
            }
        });

        self.serve(listener, shutdown).await
    }

    /// Serves requests accepted by `listener` until `shutdown` is
    /// cancelled.
    ///
    /// A trailing slash is ignored in every path, so `/properties/` and
    /// `/properties` address the same resource.
    ///
    /// Open WebSocket connections are closed on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let port = listener.local_addr()?.port();

        self.group.set_base_path(&self.base_path);

        // Discovery is an extra: the Things stay reachable by address.
        let _advertisement = self.service.as_ref().and_then(|service| {
            let path = if self.base_path.is_empty() {
                "/"
            } else {
                &self.base_path
            };
            service
                .advertise(self.group.name(), port, path)
                .inspect_err(|e| error!("Unable to advertise the server: {e}"))
                .ok()
        });

        info!(
            "Serving `{}` on port {port}{}",
            self.group.name(),
            self.base_path
        );

        let state = AppState {
            group: Arc::new(self.group),
            hosts: Arc::new(allowed_hosts(port, self.hostname.as_deref())),
            subscriber_capacity: self.subscriber_capacity,
            shutdown: shutdown.clone(),
        };

        let things = router(state, &self.base_path);
        let routes = match self.routes {
            Some(routes) => routes.fallback_service(things),
            None => things,
        };

        // Paths are normalized before routing takes place.
        let app = NormalizePathLayer::trim_trailing_slash().layer(routes);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use webthing::{Thing, ThingGroup};

    use super::Server;

    #[test]
    fn builder() {
        let server = Server::new(ThingGroup::single(Thing::new("urn:a", "A")))
            .port(8888)
            .hostname("mything.com")
            .base_path("/things/")
            .subscriber_capacity(8)
            .without_discovery();

        assert_eq!(server.port, 8888);
        assert_eq!(server.hostname.as_deref(), Some("mything.com"));
        assert_eq!(server.base_path, "/things");
        assert_eq!(server.subscriber_capacity, 8);
        assert!(server.service.is_none());
        assert!(server.routes.is_none());

        assert_eq!(
            Server::new(ThingGroup::single(Thing::new("urn:a", "A")))
                .base_path("/")
                .base_path,
            ""
        );
    }
}
