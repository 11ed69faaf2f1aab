use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::bail;

use crate::frame::HEADER_LEN;

/// Largest UDP payload over IPv4: `65535 - 20 - 8`
pub const MAX_UDP_PAYLOAD: usize = 65507;

pub struct LinkConfig {
    /// Local address the transport binds to.
    pub bind_addr: SocketAddr,

    /// Enables sending to broadcast addresses. This is needed as long as the link talks to a
    ///  broadcast destination, i.e. before it has learned its peer's address.
    pub broadcast: bool,

    /// The address DATA frames are sent to until `learn_peer_addr` replaces it.
    pub destination: SocketAddr,

    /// If set, every newly accepted DATA frame makes its source address the destination for
    ///  subsequent sends.
    pub learn_peer_addr: bool,

    /// Period of the retransmission timer. The outstanding frame is re-sent unchanged whenever
    ///  this interval passes without an acknowledgement.
    pub resend_interval: Duration,

    /// `None` retransmits until the frame is acknowledged or the link is reset. With
    ///  `Some(n)`, a send gives up after the frame was re-sent `n` times without acknowledgement.
    pub max_retransmissions: Option<u32>,

    /// Maximum payload per frame, for both sending and receiving
    pub max_payload_len: usize,
}

impl LinkConfig {
    pub const DEFAULT_PORT: u16 = 4440;

    /// Binds to all IPv4 interfaces on [`Self::DEFAULT_PORT`] and talks to the IPv4 broadcast
    ///  address until a peer is heard from.
    pub fn default_ipv4() -> LinkConfig {
        LinkConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, Self::DEFAULT_PORT)),
            broadcast: true,
            destination: SocketAddr::from((Ipv4Addr::BROADCAST, Self::DEFAULT_PORT)),
            learn_peer_addr: true,
            resend_interval: Duration::from_secs(1),
            max_retransmissions: None,
            max_payload_len: 4096,
        }
    }

    /// Fixed peers on both ends, e.g. two processes on localhost
    pub fn point_to_point(bind_addr: SocketAddr, destination: SocketAddr) -> LinkConfig {
        LinkConfig {
            bind_addr,
            broadcast: false,
            destination,
            learn_peer_addr: false,
            ..Self::default_ipv4()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resend_interval.is_zero() {
            bail!("resend interval must be positive");
        }
        if self.max_payload_len == 0 {
            bail!("maximum payload length must be positive");
        }
        if self.max_payload_len + HEADER_LEN > MAX_UDP_PAYLOAD {
            bail!("maximum payload length {} does not fit into a UDP datagram with a {} byte header", self.max_payload_len, HEADER_LEN);
        }
        if self.destination.ip().is_unspecified() {
            bail!("destination address {} is unspecified", self.destination);
        }
        if self.destination.port() == 0 {
            bail!("destination port must not be 0");
        }
        if self.destination.is_ipv4() != self.bind_addr.is_ipv4() {
            bail!("bind address {} and destination {} use different IP versions", self.bind_addr, self.destination);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LinkConfig::default_ipv4().validate().is_ok());
        assert!(LinkConfig::point_to_point(SocketAddr::from(([127, 0, 0, 1], 0)), SocketAddr::from(([127, 0, 0, 1], 5000))).validate().is_ok());
    }

    #[rstest]
    #[case::zero_interval(|c: &mut LinkConfig| c.resend_interval = Duration::ZERO)]
    #[case::zero_payload(|c: &mut LinkConfig| c.max_payload_len = 0)]
    #[case::oversized_payload(|c: &mut LinkConfig| c.max_payload_len = MAX_UDP_PAYLOAD)]
    #[case::unspecified_destination(|c: &mut LinkConfig| c.destination = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4440)))]
    #[case::destination_port_zero(|c: &mut LinkConfig| c.destination.set_port(0))]
    #[case::mixed_ip_versions(|c: &mut LinkConfig| c.destination = "[::1]:4440".parse().unwrap())]
    fn test_validate_rejects(#[case] modify: fn(&mut LinkConfig)) {
        let mut config = LinkConfig::default_ipv4();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
