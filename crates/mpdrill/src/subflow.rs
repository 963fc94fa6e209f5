//! Subflow tracking for one multipath connection.
//!
//! Every MP_JOIN handshake opens another TCP subflow on the same
//! connection. The registry records each subflow's 4-tuple, the nonces
//! both ends contribute to the join authentication, and the address
//! identifiers they advertise, and matches observed packets back to the
//! subflow they belong to.

use std::net::IpAddr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::random;
use crate::tcp_options::{MptcpOption, OptionPayload};

/// First address id handed to test-tool-initiated subflows.
///
/// Id 0 conventionally names the connection's initial subflow, so
/// additional subflows count up from 1.
pub const FIRST_LOCAL_ADDRESS_ID: u8 = 1;

/// One TCP subflow of the multipath connection, from the test tool's
/// perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subflow {
    /// Source address of the 4-tuple.
    pub src_addr: IpAddr,
    /// Destination address of the 4-tuple.
    pub dst_addr: IpAddr,
    /// Source port of the 4-tuple.
    pub src_port: u16,
    /// Destination port of the 4-tuple.
    pub dst_port: u16,
    /// Nonce this side contributes to the MP_JOIN HMAC.
    pub local_random: Option<u32>,
    /// Nonce the live peer contributed.
    pub remote_random: Option<u32>,
    /// Address id advertised by this side.
    pub local_address_id: Option<u8>,
    /// Address id advertised by the live peer.
    pub remote_address_id: Option<u8>,
}

impl Subflow {
    pub(crate) fn require_local_random(&self) -> Result<u32> {
        self.local_random.ok_or(Error::IncompleteSubflow {
            field: "local random",
        })
    }

    pub(crate) fn require_remote_random(&self) -> Result<u32> {
        self.remote_random.ok_or(Error::IncompleteSubflow {
            field: "remote random",
        })
    }

    pub(crate) fn require_local_address_id(&self) -> Result<u8> {
        self.local_address_id.ok_or(Error::IncompleteSubflow {
            field: "local address id",
        })
    }

    pub(crate) fn require_remote_address_id(&self) -> Result<u8> {
        self.remote_address_id.ok_or(Error::IncompleteSubflow {
            field: "remote address id",
        })
    }
}

/// Registry of every subflow opened during the run.
///
/// Subflows are never removed individually; the registry is dropped as
/// a whole at run teardown. Matching compares port pairs only: within
/// one run the scripted ports distinguish subflows, and a script that
/// reuses a port pair across source addresses is not told apart.
#[derive(Debug)]
pub struct SubflowRegistry {
    subflows: Vec<Subflow>,
    next_local_address_id: u8,
}

impl Default for SubflowRegistry {
    fn default() -> Self {
        Self {
            subflows: Vec::new(),
            next_local_address_id: FIRST_LOCAL_ADDRESS_ID,
        }
    }
}

impl SubflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subflow the test tool initiates.
    ///
    /// `packet` is the MP_JOIN SYN about to be sent toward the live
    /// peer, so its 4-tuple is recorded as-is. A fresh nonce is drawn
    /// and the next local address id is consumed. The peer's nonce and
    /// address id stay unknown until its SYN-ACK arrives.
    pub fn open_inbound(&mut self, packet: &Packet) -> Result<Subflow> {
        let src_addr = packet.src_addr()?;
        let dst_addr = packet.dst_addr()?;
        let address_id = self.allocate_address_id();
        let subflow = Subflow {
            src_addr,
            dst_addr,
            src_port: packet.tcp.src_port,
            dst_port: packet.tcp.dst_port,
            local_random: Some(random::subflow_nonce()),
            remote_random: None,
            local_address_id: Some(address_id),
            remote_address_id: None,
        };
        debug!(
            src_port = subflow.src_port,
            dst_port = subflow.dst_port,
            address_id,
            "opened subflow toward live peer"
        );
        self.subflows.push(subflow.clone());
        Ok(subflow)
    }

    /// Open a subflow the live peer initiates.
    ///
    /// `live_packet` is the peer's captured MP_JOIN SYN. The 4-tuple is
    /// recorded with source and destination swapped so the record keeps
    /// the test tool's perspective, and the peer's nonce and address id
    /// are read from the captured option.
    pub fn open_outbound(&mut self, live_packet: &Packet) -> Result<Subflow> {
        let option = live_packet
            .mptcp_option()
            .ok_or(Error::MissingMptcpOption)?;
        let (sender_random, address_id) = match &option.payload {
            OptionPayload::Mptcp(MptcpOption::JoinSyn {
                sender_random,
                address_id,
                ..
            }) => (*sender_random, *address_id),
            _ => return Err(Error::MissingMptcpOption),
        };
        let subflow = Subflow {
            src_addr: live_packet.dst_addr()?,
            dst_addr: live_packet.src_addr()?,
            src_port: live_packet.tcp.dst_port,
            dst_port: live_packet.tcp.src_port,
            local_random: None,
            remote_random: Some(sender_random),
            local_address_id: None,
            remote_address_id: Some(address_id),
        };
        debug!(
            src_port = subflow.src_port,
            dst_port = subflow.dst_port,
            address_id,
            "live peer opened subflow"
        );
        self.subflows.push(subflow.clone());
        Ok(subflow)
    }

    /// Add an already-populated subflow record.
    pub fn register(&mut self, subflow: Subflow) {
        self.subflows.push(subflow);
    }

    /// Consume the next test-tool address identifier.
    ///
    /// Ids increase monotonically across the run and are never reused.
    pub fn allocate_address_id(&mut self) -> u8 {
        let id = self.next_local_address_id;
        self.next_local_address_id += 1;
        id
    }

    /// First subflow matching a packet captured from the live peer.
    ///
    /// The peer's source is this side's destination, so ports are
    /// compared under the swap rule.
    pub fn find_outbound_match(&self, packet: &Packet) -> Option<&Subflow> {
        self.position_outbound_match(packet).map(|i| &self.subflows[i])
    }

    /// Mutable variant of [`find_outbound_match`](Self::find_outbound_match).
    pub fn find_outbound_match_mut(&mut self, packet: &Packet) -> Option<&mut Subflow> {
        self.position_outbound_match(packet)
            .map(|i| &mut self.subflows[i])
    }

    /// First subflow matching a packet the test tool is sending (ports
    /// compared without swapping).
    pub fn find_inbound_match(&self, packet: &Packet) -> Option<&Subflow> {
        self.position_inbound_match(packet).map(|i| &self.subflows[i])
    }

    /// Mutable variant of [`find_inbound_match`](Self::find_inbound_match).
    pub fn find_inbound_match_mut(&mut self, packet: &Packet) -> Option<&mut Subflow> {
        self.position_inbound_match(packet)
            .map(|i| &mut self.subflows[i])
    }

    /// Match against an established socket's live port pair (same rule
    /// as an inbound match).
    pub fn find_by_socket(&self, local_port: u16, remote_port: u16) -> Option<&Subflow> {
        self.subflows
            .iter()
            .find(|s| s.src_port == local_port && s.dst_port == remote_port)
    }

    pub(crate) fn position_outbound_match(&self, packet: &Packet) -> Option<usize> {
        self.subflows.iter().position(|s| {
            s.dst_port == packet.tcp.src_port && s.src_port == packet.tcp.dst_port
        })
    }

    pub(crate) fn position_inbound_match(&self, packet: &Packet) -> Option<usize> {
        self.subflows.iter().position(|s| {
            s.src_port == packet.tcp.src_port && s.dst_port == packet.tcp.dst_port
        })
    }

    pub(crate) fn subflow_mut(&mut self, index: usize) -> &mut Subflow {
        &mut self.subflows[index]
    }

    /// Iterate over all registered subflows in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Subflow> {
        self.subflows.iter()
    }

    /// Number of subflows opened so far.
    pub fn len(&self) -> usize {
        self.subflows.len()
    }

    /// Check if no subflow has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.subflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::packet::TcpHeader;
    use crate::tcp_options::TcpOption;

    fn join_syn_packet(src_port: u16, dst_port: u16) -> Packet {
        let mut packet = Packet::ipv4(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(192, 0, 2, 2),
            TcpHeader::new(src_port, dst_port).syn(),
        );
        packet.push_option(TcpOption::mptcp(MptcpOption::JoinSyn {
            flags: 0,
            address_id: 6,
            receiver_token: 0,
            sender_random: 0x5A5A_0001,
        }));
        packet
    }

    #[test]
    fn test_open_inbound_assigns_random_and_id() {
        let mut registry = SubflowRegistry::new();
        let packet = join_syn_packet(4001, 4002);
        let subflow = registry.open_inbound(&packet).unwrap();
        assert_eq!(subflow.src_port, 4001);
        assert_eq!(subflow.dst_port, 4002);
        assert!(subflow.local_random.is_some());
        assert_eq!(subflow.local_address_id, Some(FIRST_LOCAL_ADDRESS_ID));
        assert!(subflow.remote_random.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_open_inbound_requires_network_header() {
        let mut registry = SubflowRegistry::new();
        let packet = Packet {
            network: None,
            tcp: TcpHeader::new(1, 2).syn(),
            options: Vec::new(),
        };
        assert!(matches!(
            registry.open_inbound(&packet),
            Err(Error::MissingAddressFamily)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_outbound_swaps_tuple_and_reads_option() {
        let mut registry = SubflowRegistry::new();
        // Captured from the peer: its source is our destination.
        let live = join_syn_packet(4002, 4001);
        let subflow = registry.open_outbound(&live).unwrap();
        assert_eq!(subflow.src_port, 4001);
        assert_eq!(subflow.dst_port, 4002);
        assert_eq!(subflow.src_addr, live.dst_addr().unwrap());
        assert_eq!(subflow.dst_addr, live.src_addr().unwrap());
        assert_eq!(subflow.remote_random, Some(0x5A5A_0001));
        assert_eq!(subflow.remote_address_id, Some(6));
        assert!(subflow.local_random.is_none());
    }

    #[test]
    fn test_open_outbound_requires_mptcp_option() {
        let mut registry = SubflowRegistry::new();
        let live = Packet::ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TcpHeader::new(4002, 4001).syn(),
        );
        assert!(matches!(
            registry.open_outbound(&live),
            Err(Error::MissingMptcpOption)
        ));
    }

    #[test]
    fn test_address_ids_increase_and_are_never_reused() {
        let mut registry = SubflowRegistry::new();
        let first = registry.open_inbound(&join_syn_packet(1, 2)).unwrap();
        let second = registry.open_inbound(&join_syn_packet(3, 4)).unwrap();
        assert_eq!(first.local_address_id, Some(FIRST_LOCAL_ADDRESS_ID));
        assert_eq!(second.local_address_id, Some(FIRST_LOCAL_ADDRESS_ID + 1));
        assert_eq!(registry.allocate_address_id(), FIRST_LOCAL_ADDRESS_ID + 2);
    }

    #[test]
    fn test_outbound_match_swaps_ports() {
        let mut registry = SubflowRegistry::new();
        registry.open_inbound(&join_syn_packet(4001, 4002)).unwrap();

        // A packet from the peer: src/dst reversed.
        let from_peer = Packet::ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TcpHeader::new(4002, 4001),
        );
        assert!(registry.find_outbound_match(&from_peer).is_some());
        assert!(registry.find_inbound_match(&from_peer).is_none());

        // Any other port pair matches nothing.
        let other = Packet::ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TcpHeader::new(4002, 4003),
        );
        assert!(registry.find_outbound_match(&other).is_none());
    }

    #[test]
    fn test_inbound_match_keeps_ports() {
        let mut registry = SubflowRegistry::new();
        registry.open_inbound(&join_syn_packet(4001, 4002)).unwrap();
        let same_direction = join_syn_packet(4001, 4002);
        assert!(registry.find_inbound_match(&same_direction).is_some());
    }

    #[test]
    fn test_find_by_socket() {
        let mut registry = SubflowRegistry::new();
        registry.open_inbound(&join_syn_packet(4001, 4002)).unwrap();
        assert!(registry.find_by_socket(4001, 4002).is_some());
        assert!(registry.find_by_socket(4002, 4001).is_none());
    }
}
