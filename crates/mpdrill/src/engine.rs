//! The MPTCP handshake engine.
//!
//! For every packet the script is about to send and every packet
//! captured from the live peer, the engine runs once per MPTCP option:
//! it consults and updates the connection state and subflow registry,
//! consumes pending script variables, and writes the computed keys,
//! tokens, nonces, and HMAC digests into the option fields. Dispatch is
//! over the option shape together with the packet's direction and
//! SYN/ACK flags, mirroring the three-way handshake in both initiator
//! roles.

use tracing::{debug, trace};

use crate::crypto;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::random;
use crate::state::{ConnectionState, ScriptValue};
use crate::subflow::SubflowRegistry;
use crate::tcp_options::{MptcpOption, OptionPayload};

/// Which way a packet flows relative to the test tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A packet the script is constructing to send toward the live peer.
    Inbound,
    /// A packet captured from, or asserted about, the live peer.
    Outbound,
}

/// Session context threading the MPTCP state machine through one test
/// run.
///
/// Created when script execution starts and dropped at teardown; all
/// processing is synchronous and strictly script-ordered.
#[derive(Debug, Default)]
pub struct MptcpSession {
    state: ConnectionState,
    subflows: SubflowRegistry,
}

impl MptcpSession {
    /// Create a fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection-wide key and variable state.
    pub fn connection(&self) -> &ConnectionState {
        &self.state
    }

    /// Mutable access to the connection state (used by the script
    /// parser and by tests).
    pub fn connection_mut(&mut self) -> &mut ConnectionState {
        &mut self.state
    }

    /// The subflow registry.
    pub fn subflows(&self) -> &SubflowRegistry {
        &self.subflows
    }

    /// Mutable access to the subflow registry.
    pub fn subflows_mut(&mut self) -> &mut SubflowRegistry {
        &mut self.subflows
    }

    /// Enqueue a script variable name awaiting a generated value.
    pub fn enqueue_variable(&mut self, name: impl Into<String>) {
        self.state.enqueue_variable(name);
    }

    /// Process every MPTCP option of a script packet, writing the
    /// computed field values in place.
    ///
    /// `live` is the corresponding captured packet; `None` means the
    /// script packet itself is the captured one. Non-MPTCP options are
    /// skipped. The first failing option aborts the whole packet: it
    /// must be treated as not ready to send.
    pub fn process_packet(
        &mut self,
        packet: &mut Packet,
        live: Option<&Packet>,
        direction: Direction,
    ) -> Result<()> {
        for index in 0..packet.options.len() {
            let mut option = match &packet.options[index].payload {
                OptionPayload::Mptcp(option) => option.clone(),
                _ => continue,
            };
            let length = packet.options[index].length;
            trace!(subtype = option.subtype(), ?direction, "processing MPTCP option");

            match &option {
                MptcpOption::CapableSyn { .. } | MptcpOption::Capable { .. } => {
                    self.process_mp_capable(packet, live, &mut option, length, direction)?;
                }
                MptcpOption::JoinSyn { .. }
                | MptcpOption::JoinSynAck { .. }
                | MptcpOption::JoinAck { .. } => {
                    self.process_mp_join(packet, live, &mut option, length, direction)?;
                }
                other => {
                    return Err(Error::UnrecognizedOptionShape {
                        subtype: other.subtype(),
                        length,
                        syn: packet.tcp.syn,
                        ack: packet.tcp.ack,
                    });
                }
            }

            packet.options[index].payload = OptionPayload::Mptcp(option);
        }
        Ok(())
    }

    /// MP_CAPABLE: generate, capture, and insert connection keys.
    fn process_mp_capable(
        &mut self,
        packet: &Packet,
        live: Option<&Packet>,
        option: &mut MptcpOption,
        length: u8,
        direction: Direction,
    ) -> Result<()> {
        let syn = packet.tcp.syn;
        let ack = packet.tcp.ack;
        let subtype = option.subtype();

        match (direction, syn, ack, option) {
            // Opening SYN of a new connection (or a re-SYN retry): draw a
            // fresh key and bind it to the front pending variable.
            (Direction::Inbound, true, false, MptcpOption::CapableSyn { key, .. }) => {
                self.generate_local_key()?;
                *key = self.state.next_key_value()?;
            }
            // SYN from the live peer: capture its key on first sighting,
            // then resolve the script-side field as usual.
            (Direction::Outbound, true, _, MptcpOption::CapableSyn { key, .. }) => {
                self.capture_remote_key(packet, live)?;
                *key = self.state.next_key_value()?;
            }
            // Third ACK: both keys echoed in script order.
            (
                _,
                false,
                true,
                MptcpOption::Capable {
                    sender_key,
                    receiver_key,
                    ..
                },
            ) => {
                *sender_key = self.state.next_key_value()?;
                *receiver_key = self.state.next_key_value()?;
            }
            // SYN-ACK sent by the script when joining: same
            // generate-and-bind flow as the opening SYN.
            (Direction::Inbound, true, true, MptcpOption::CapableSyn { key, .. }) => {
                self.generate_local_key()?;
                *key = self.state.next_key_value()?;
            }
            _ => {
                return Err(Error::UnrecognizedOptionShape {
                    subtype,
                    length,
                    syn,
                    ack,
                });
            }
        }
        Ok(())
    }

    /// MP_JOIN: track subflows and insert tokens, nonces, and HMACs.
    fn process_mp_join(
        &mut self,
        packet: &Packet,
        live: Option<&Packet>,
        option: &mut MptcpOption,
        length: u8,
        direction: Direction,
    ) -> Result<()> {
        let syn = packet.tcp.syn;
        let ack = packet.tcp.ack;
        let subtype = option.subtype();

        match (direction, syn, ack, option) {
            // The test tool opens a new subflow toward the peer.
            (
                Direction::Inbound,
                true,
                false,
                MptcpOption::JoinSyn {
                    address_id,
                    receiver_token,
                    sender_random,
                    ..
                },
            ) => {
                let subflow = self.subflows.open_inbound(packet)?;
                *receiver_token = crypto::token(self.state.require_remote_key()?);
                *sender_random = subflow.require_local_random()?;
                *address_id = subflow.require_local_address_id()?;
            }

            // The peer answers the subflow the test tool opened: adopt
            // its address id and nonce, and expect its truncated proof.
            (
                Direction::Outbound,
                true,
                true,
                MptcpOption::JoinSynAck {
                    address_id,
                    sender_random,
                    sender_hmac,
                    ..
                },
            ) => {
                let live_packet = live.unwrap_or(packet);
                let (live_address_id, live_random) = match live_mptcp_option(live_packet)? {
                    MptcpOption::JoinSynAck {
                        address_id,
                        sender_random,
                        ..
                    } => (address_id, sender_random),
                    _ => return Err(Error::MissingMptcpOption),
                };
                let subflow = self
                    .subflows
                    .find_outbound_match_mut(live_packet)
                    .ok_or(Error::NoMatchingSubflow {
                        src_port: live_packet.tcp.src_port,
                        dst_port: live_packet.tcp.dst_port,
                    })?;
                subflow.remote_address_id = Some(live_address_id);
                subflow.remote_random = Some(live_random);
                let local_random = subflow.require_local_random()?;

                let key = crypto::hmac_key(
                    self.state.require_remote_key()?,
                    self.state.require_local_key()?,
                );
                let message = crypto::hmac_message(live_random, local_random);
                *address_id = live_address_id;
                *sender_random = live_random;
                *sender_hmac = crypto::hmac_sha1_truncated(&key, &message);
            }

            // The test tool finalizes its subflow with the full digest.
            (Direction::Inbound, false, true, MptcpOption::JoinAck { sender_hmac }) => {
                let subflow = self.subflows.find_inbound_match(packet).ok_or(
                    Error::NoMatchingSubflow {
                        src_port: packet.tcp.src_port,
                        dst_port: packet.tcp.dst_port,
                    },
                )?;
                let key = crypto::hmac_key(
                    self.state.require_local_key()?,
                    self.state.require_remote_key()?,
                );
                let message = crypto::hmac_message(
                    subflow.require_local_random()?,
                    subflow.require_remote_random()?,
                );
                *sender_hmac = crypto::hmac_sha1(&key, &message);
            }

            // The peer opens a subflow toward the test tool.
            (
                Direction::Outbound,
                true,
                false,
                MptcpOption::JoinSyn {
                    address_id,
                    receiver_token,
                    sender_random,
                    ..
                },
            ) => {
                let live_packet = live.unwrap_or(packet);
                let subflow = self.subflows.open_outbound(live_packet)?;
                *address_id = subflow.require_remote_address_id()?;
                *sender_random = subflow.require_remote_random()?;
                *receiver_token = crypto::token(self.state.require_remote_key()?);
            }

            // The test tool answers the peer's join: fresh nonce, next
            // address id, truncated proof.
            (
                Direction::Inbound,
                true,
                true,
                MptcpOption::JoinSynAck {
                    address_id,
                    sender_random,
                    sender_hmac,
                    ..
                },
            ) => {
                let index = self.subflows.position_inbound_match(packet).ok_or(
                    Error::NoMatchingSubflow {
                        src_port: packet.tcp.src_port,
                        dst_port: packet.tcp.dst_port,
                    },
                )?;
                let nonce = random::subflow_nonce();
                let id = self.subflows.allocate_address_id();
                let subflow = self.subflows.subflow_mut(index);
                subflow.local_random = Some(nonce);
                subflow.local_address_id = Some(id);
                let remote_random = subflow.require_remote_random()?;

                let key = crypto::hmac_key(
                    self.state.require_local_key()?,
                    self.state.require_remote_key()?,
                );
                let message = crypto::hmac_message(nonce, remote_random);
                *address_id = id;
                *sender_random = nonce;
                *sender_hmac = crypto::hmac_sha1_truncated(&key, &message);
            }

            // The peer finalizes the subflow it opened.
            (Direction::Outbound, false, true, MptcpOption::JoinAck { sender_hmac }) => {
                let subflow = self.subflows.find_outbound_match(packet).ok_or(
                    Error::NoMatchingSubflow {
                        src_port: packet.tcp.src_port,
                        dst_port: packet.tcp.dst_port,
                    },
                )?;
                let key = crypto::hmac_key(
                    self.state.require_remote_key()?,
                    self.state.require_local_key()?,
                );
                let message = crypto::hmac_message(
                    subflow.require_remote_random()?,
                    subflow.require_local_random()?,
                );
                *sender_hmac = crypto::hmac_sha1(&key, &message);
            }

            _ => {
                return Err(Error::UnrecognizedOptionShape {
                    subtype,
                    length,
                    syn,
                    ack,
                });
            }
        }
        Ok(())
    }

    /// Generate a fresh connection key for the test tool's side and bind
    /// it to the front pending variable.
    ///
    /// Runs on every MP_CAPABLE SYN the script sends, so a retransmitted
    /// SYN draws a new key and a new binding.
    fn generate_local_key(&mut self) -> Result<()> {
        let name = self.state.peek_pending_variable_name()?.to_owned();
        let key = random::connection_key();
        self.state.set_local_key(key);
        self.state.bind_variable(name, ScriptValue::Key(key));
        debug!(key = format_args!("{key:#018x}"), "generated local connection key");
        Ok(())
    }

    /// Capture the live peer's connection key from its MP_CAPABLE
    /// option.
    ///
    /// Only the first sighting records the key and binds the front
    /// pending variable to it; on later sightings both are left alone.
    /// The live option must be present either way.
    fn capture_remote_key(&mut self, packet: &Packet, live: Option<&Packet>) -> Result<()> {
        let live_packet = live.unwrap_or(packet);
        let key = match live_mptcp_option(live_packet)? {
            MptcpOption::CapableSyn { key, .. } => key,
            MptcpOption::Capable { sender_key, .. } => sender_key,
            _ => return Err(Error::MissingMptcpOption),
        };
        if self.state.remote_key().is_none() {
            self.state.set_remote_key(key);
            let name = self.state.peek_pending_variable_name()?.to_owned();
            self.state.bind_variable(name, ScriptValue::Key(key));
            debug!(key = format_args!("{key:#018x}"), "captured remote connection key");
        }
        Ok(())
    }
}

/// The first MPTCP option of a live packet, copied out.
fn live_mptcp_option(live_packet: &Packet) -> Result<MptcpOption> {
    live_packet
        .mptcp_option()
        .and_then(|option| option.as_mptcp())
        .cloned()
        .ok_or(Error::MissingMptcpOption)
}
