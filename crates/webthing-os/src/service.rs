use std::collections::HashMap;
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use tracing::info;

use crate::error::Result;
use crate::net::{local_address, system_hostname};

// Service type of Web Things.
const SERVICE_TYPE: &str = "_webthing._tcp.local.";

/// The `mDNS-SD` advertisement of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub(crate) hostname: Option<String>,
    pub(crate) service_type: String,
    pub(crate) properties: Vec<(String, String)>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConfig {
    /// Creates a [`ServiceConfig`] advertising the `_webthing._tcp` service
    /// on the system hostname.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hostname: None,
            service_type: SERVICE_TYPE.into(),
            properties: Vec::new(),
        }
    }

    /// Sets the advertised hostname, without the `.local` suffix.
    ///
    /// An example might be `lamp`.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the service type.
    ///
    /// The service type searched by clients, i.e. `_webthing._tcp.local.`
    #[must_use]
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Adds a `TXT` property.
    ///
    /// The `path` property is always advertised.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub(crate) fn advertise(&self, name: &str, port: u16, path: &str) -> Result<Advertisement> {
        let hostname = self.hostname.clone().unwrap_or_else(system_hostname);
        let host = format!("{hostname}.local.");

        let mut properties: HashMap<String, String> = self.properties.iter().cloned().collect();
        let _ = properties.insert("path".into(), path.into());

        let addresses: Vec<IpAddr> = local_address().into_iter().collect();

        info!(
            "About to advertise the `{name}` service of type `{}` on `{host}` at port `{port}`",
            self.service_type
        );

        let daemon = ServiceDaemon::new()?;
        let service = ServiceInfo::new(
            &self.service_type,
            name,
            &host,
            &addresses[..],
            port,
            properties,
        )?
        .enable_addr_auto();
        daemon.register(service)?;

        Ok(Advertisement { daemon })
    }
}

/// A running advertisement, withdrawn on drop.
pub(crate) struct Advertisement {
    daemon: ServiceDaemon,
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceConfig;

    #[test]
    fn builder() {
        let config = ServiceConfig::new()
            .hostname("lamp")
            .property("scheme", "http");

        assert_eq!(config.hostname.as_deref(), Some("lamp"));
        assert_eq!(config.service_type, "_webthing._tcp.local.");
        assert_eq!(
            config.properties,
            [("scheme".to_owned(), "http".to_owned())]
        );
    }
}
