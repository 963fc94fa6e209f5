//! Minimal packet model consumed by the handshake engine.
//!
//! The engine only needs the network-layer addresses, the TCP ports and
//! SYN/ACK flags, and the parsed option list; capture, injection, and
//! checksumming live elsewhere in the tool.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::tcp_options::{TCPOPT_MPTCP, TcpOption};

/// IPv4 or IPv6 header; a packet carries exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    /// IPv4 addressing.
    V4 {
        /// Source address.
        src_ip: Ipv4Addr,
        /// Destination address.
        dst_ip: Ipv4Addr,
    },
    /// IPv6 addressing.
    V6 {
        /// Source address.
        src_ip: Ipv6Addr,
        /// Destination address.
        dst_ip: Ipv6Addr,
    },
}

impl NetworkHeader {
    /// The source address, family-erased.
    pub fn src(&self) -> IpAddr {
        match self {
            Self::V4 { src_ip, .. } => IpAddr::V4(*src_ip),
            Self::V6 { src_ip, .. } => IpAddr::V6(*src_ip),
        }
    }

    /// The destination address, family-erased.
    pub fn dst(&self) -> IpAddr {
        match self {
            Self::V4 { dst_ip, .. } => IpAddr::V4(*dst_ip),
            Self::V6 { dst_ip, .. } => IpAddr::V6(*dst_ip),
        }
    }
}

/// The TCP header fields the engine consults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// SYN flag.
    pub syn: bool,
    /// ACK flag.
    pub ack: bool,
    /// FIN flag.
    pub fin: bool,
    /// RST flag.
    pub rst: bool,
}

impl TcpHeader {
    /// Create a header with the given ports and all flags clear.
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            ..Self::default()
        }
    }

    /// Set the SYN flag.
    pub fn syn(mut self) -> Self {
        self.syn = true;
        self
    }

    /// Set the ACK flag.
    pub fn ack(mut self) -> Self {
        self.ack = true;
        self
    }
}

/// A packet as seen by the handshake engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Network-layer header, if one was parsed.
    pub network: Option<NetworkHeader>,
    /// TCP header fields.
    pub tcp: TcpHeader,
    /// Parsed TCP options in wire order.
    pub options: Vec<TcpOption>,
}

impl Packet {
    /// Create a packet with no options.
    pub fn new(network: NetworkHeader, tcp: TcpHeader) -> Self {
        Self {
            network: Some(network),
            tcp,
            options: Vec::new(),
        }
    }

    /// Create an IPv4 packet with no options.
    pub fn ipv4(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, tcp: TcpHeader) -> Self {
        Self::new(NetworkHeader::V4 { src_ip, dst_ip }, tcp)
    }

    /// The source address, or [`Error::MissingAddressFamily`].
    pub fn src_addr(&self) -> Result<IpAddr> {
        self.network
            .as_ref()
            .map(NetworkHeader::src)
            .ok_or(Error::MissingAddressFamily)
    }

    /// The destination address, or [`Error::MissingAddressFamily`].
    pub fn dst_addr(&self) -> Result<IpAddr> {
        self.network
            .as_ref()
            .map(NetworkHeader::dst)
            .ok_or(Error::MissingAddressFamily)
    }

    /// Append an option.
    pub fn push_option(&mut self, option: TcpOption) {
        self.options.push(option);
    }

    /// First option of the given kind, if any.
    pub fn find_option(&self, kind: u8) -> Option<&TcpOption> {
        self.options.iter().find(|option| option.kind == kind)
    }

    /// First MPTCP option, if any.
    pub fn mptcp_option(&self) -> Option<&TcpOption> {
        self.find_option(TCPOPT_MPTCP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp_options::MptcpOption;

    #[test]
    fn test_missing_address_family() {
        let packet = Packet {
            network: None,
            tcp: TcpHeader::new(1, 2),
            options: Vec::new(),
        };
        assert!(matches!(
            packet.src_addr(),
            Err(Error::MissingAddressFamily)
        ));
    }

    #[test]
    fn test_addresses() {
        let packet = Packet::ipv4(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(192, 0, 2, 2),
            TcpHeader::new(4000, 80).syn(),
        );
        assert_eq!(packet.src_addr().unwrap(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(packet.dst_addr().unwrap(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)));
        assert!(packet.tcp.syn);
        assert!(!packet.tcp.ack);
    }

    #[test]
    fn test_find_mptcp_option() {
        let mut packet = Packet::ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TcpHeader::new(1, 2),
        );
        assert!(packet.mptcp_option().is_none());
        packet.push_option(TcpOption::nop());
        packet.push_option(TcpOption::mptcp(MptcpOption::CapableSyn {
            version: 0,
            flags: 0,
            key: 9,
        }));
        let option = packet.mptcp_option().unwrap();
        assert!(option.is_mptcp());
    }
}
