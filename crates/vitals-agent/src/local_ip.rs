use std::net::{IpAddr, UdpSocket};

/// Discovers the outbound IPv4 address used to reach `server_host` by
/// connecting a UDP socket toward it. No packet is sent; the kernel just
/// picks the route and the local endpoint.
pub fn local_ip_for(server_host: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect((server_host, 80u16))?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_target_yields_loopback_source() {
        let ip = local_ip_for("localhost").unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn source_address_is_ipv4() {
        let ip = local_ip_for("localhost").unwrap();
        assert!(matches!(ip, IpAddr::V4(_)));
    }
}
