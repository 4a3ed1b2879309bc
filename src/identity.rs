//! Resolves this replica's `host:port` identity from a named network
//! interface, so the LEASE and CURRENT records can name a reachable
//! endpoint rather than an internal hostname.

use pnet::datalink;
use std::net::IpAddr;

/// Indicates the configured interface could not be used to form an
/// identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No interface with the given name was found.
    #[error("network interface {0:?} not found")]
    InterfaceNotFound(String),

    /// The interface exists but advertises no usable address, and the
    /// OS-reported hostname could not be resolved either.
    #[error("network interface {0:?} has no usable address")]
    NoUsableAddress(String),
}

/// Resolves `host:port` for `interface_name`, preferring a site-local
/// address, then any non-loopback address, then the OS-reported hostname.
pub fn host_and_port(interface_name: &str, port: u16) -> Result<String, IdentityError> {
    let interfaces = datalink::interfaces();
    let iface = interfaces
        .into_iter()
        .find(|i| i.name == interface_name)
        .ok_or_else(|| IdentityError::InterfaceNotFound(interface_name.to_string()))?;

    let addrs: Vec<IpAddr> = iface.ips.iter().map(|ip| ip.ip()).collect();
    let host = match pick_address(&addrs) {
        Some(addr) => addr.to_string(),
        None => resolve_hostname()
            .ok_or_else(|| IdentityError::NoUsableAddress(interface_name.to_string()))?,
    };

    Ok(format!("{host}:{port}"))
}

/// Falls back to the OS-reported hostname when the named interface has no
/// site-local or non-loopback address of its own.
fn resolve_hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

/// Prefers the first site-local address, else the first non-loopback
/// address, matching the discovery order in the data model.
fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|a| is_site_local(a))
        .or_else(|| addrs.iter().find(|a| !a.is_loopback()))
        .copied()
}

fn is_site_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => {
            // fec0::/10 is the deprecated IPv6 site-local block; link-local
            // (fe80::/10) addresses are excluded since they are not
            // routable off-host.
            let seg = v6.segments()[0];
            (0xfec0..=0xfeff).contains(&seg)
        }
    }
}
