use std::net::{IpAddr, Ipv4Addr};

/// First non-loopback IPv4 address of this host, or `127.0.0.1` when none
/// can be found.
pub fn host_ipv4() -> Ipv4Addr {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(addr)) if !addr.is_loopback() => addr,
        Ok(_) => first_interface_ipv4().unwrap_or(Ipv4Addr::LOCALHOST),
        Err(e) => {
            tracing::debug!(error = %e, "Cannot determine local IP, using loopback");
            first_interface_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)
        }
    }
}

fn first_interface_ipv4() -> Option<Ipv4Addr> {
    local_ip_address::list_afinet_netifas()
        .ok()?
        .into_iter()
        .find_map(|(_, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
}
