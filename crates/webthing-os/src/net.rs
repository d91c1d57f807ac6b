use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use hashbrown::HashSet;

use tracing::warn;

// Used when the system hostname cannot be retrieved.
const FALLBACK_HOSTNAME: &str = "webthing";

#[cfg(target_os = "linux")]
fn read_system_hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname").ok()
}

#[cfg(not(target_os = "linux"))]
fn read_system_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
}

/// Returns the lowercase hostname of the system.
pub(crate) fn system_hostname() -> String {
    read_system_hostname()
        .map(|hostname| hostname.trim().to_lowercase())
        .filter(|hostname| !hostname.is_empty())
        .unwrap_or_else(|| {
            warn!("Unable to retrieve the system hostname, using `{FALLBACK_HOSTNAME}`");
            FALLBACK_HOSTNAME.into()
        })
}

/// Returns the address of the interface used to reach other hosts.
///
/// Connecting a datagram socket sends nothing, it only selects a route.
pub(crate) fn local_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1)).ok()?;
    socket
        .local_addr()
        .ok()
        .map(|address| address.ip())
        .filter(|address| !address.is_unspecified())
}

fn with_port(hosts: &mut HashSet<String>, host: String, port: u16) {
    let _ = hosts.insert(format!("{host}:{port}"));
    let _ = hosts.insert(host);
}

/// Returns the values of the `Host` header accepted by a server listening on
/// `port`.
pub(crate) fn allowed_hosts(port: u16, hostname: Option<&str>) -> HashSet<String> {
    let mut hosts = HashSet::new();

    with_port(&mut hosts, "localhost".into(), port);
    with_port(&mut hosts, "127.0.0.1".into(), port);
    with_port(&mut hosts, "[::1]".into(), port);
    with_port(&mut hosts, format!("{}.local", system_hostname()), port);

    match local_address() {
        Some(IpAddr::V4(address)) => with_port(&mut hosts, address.to_string(), port),
        Some(IpAddr::V6(address)) => with_port(&mut hosts, format!("[{address}]"), port),
        None => warn!("Unable to retrieve the local address"),
    }

    if let Some(hostname) = hostname {
        with_port(&mut hosts, hostname.to_lowercase(), port);
    }

    hosts
}
