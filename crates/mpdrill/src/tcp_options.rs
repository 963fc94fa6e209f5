//! Reading and writing TCP options in their wire format.
//!
//! Options are modeled as a tagged [`OptionPayload`] per kind, with the
//! MPTCP subtypes ([`MptcpOption`]) nested underneath. The MPTCP shapes
//! sharing a subtype are told apart purely by the option length byte:
//! MP_CAPABLE is the single-key SYN form at 12 bytes and the two-key
//! exchange at 20; MP_JOIN is SYN at 12, SYN-ACK at 16, and ACK at 24.

use bytes::BufMut;
use zerocopy::byteorder::network_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// End of option list.
pub const TCPOPT_EOL: u8 = 0;
/// No operation (padding).
pub const TCPOPT_NOP: u8 = 1;
/// Maximum segment size.
pub const TCPOPT_MAXSEG: u8 = 2;
/// Window scale.
pub const TCPOPT_WINDOW: u8 = 3;
/// SACK permitted.
pub const TCPOPT_SACK_PERMITTED: u8 = 4;
/// SACK blocks.
pub const TCPOPT_SACK: u8 = 5;
/// Timestamps.
pub const TCPOPT_TIMESTAMP: u8 = 8;
/// Multipath TCP.
pub const TCPOPT_MPTCP: u8 = 30;
/// Shared experimental kind (used by TCP Fast Open).
pub const TCPOPT_EXP: u8 = 254;

/// Magic number identifying TCP Fast Open within the experimental kind.
pub const TCPOPT_FASTOPEN_MAGIC: u16 = 0xF989;

/// MPTCP option subtypes (RFC 6824 section 3).
pub mod mptcp_subtype {
    /// Multipath capability negotiation and key exchange.
    pub const MP_CAPABLE: u8 = 0;
    /// Join an additional subflow onto an existing connection.
    pub const MP_JOIN: u8 = 1;
    /// Data sequence signal.
    pub const DSS: u8 = 2;
}

/// MPTCP protocol version carried in MP_CAPABLE.
pub const MPTCP_VERSION: u8 = 0;

/// MP_CAPABLE length on SYN and SYN-ACK (one key).
pub const TCPOLEN_MP_CAPABLE_SYN: u8 = 12;
/// MP_CAPABLE length on the third ACK (both keys).
pub const TCPOLEN_MP_CAPABLE: u8 = 20;
/// MP_JOIN length on SYN (token + nonce).
pub const TCPOLEN_MP_JOIN_SYN: u8 = 12;
/// MP_JOIN length on SYN-ACK (truncated HMAC + nonce).
pub const TCPOLEN_MP_JOIN_SYN_ACK: u8 = 16;
/// MP_JOIN length on the third ACK (full HMAC).
pub const TCPOLEN_MP_JOIN_ACK: u8 = 24;

/// DSS flag bits, in the option's second flags byte.
pub mod dss_flag {
    /// Data ACK present.
    pub const DATA_ACK: u8 = 0x01;
    /// Data ACK is 8 octets (4 otherwise).
    pub const DATA_ACK_8: u8 = 0x02;
    /// Sequence mapping (DSN, SSN, data-level length, checksum) present.
    pub const MAPPING: u8 = 0x04;
    /// Data sequence number is 8 octets (4 otherwise).
    pub const DSN_8: u8 = 0x08;
    /// DATA_FIN present.
    pub const DATA_FIN: u8 = 0x10;
}

/// Pack an MPTCP subtype and a low nibble into the option's third byte.
#[inline]
const fn subtype_byte(subtype: u8, low: u8) -> u8 {
    (subtype << 4) | (low & 0x0f)
}

/// MP_CAPABLE payload, SYN form (after kind/length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MpCapableSynWire {
    subtype_version: u8,
    flags: u8,
    key: U64,
}

/// MP_CAPABLE payload, key-exchange form (after kind/length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MpCapableWire {
    subtype_version: u8,
    flags: u8,
    sender_key: U64,
    receiver_key: U64,
}

/// MP_JOIN payload, SYN form (after kind/length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MpJoinSynWire {
    subtype_flags: u8,
    address_id: u8,
    receiver_token: U32,
    sender_random: U32,
}

/// MP_JOIN payload, SYN-ACK form (after kind/length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MpJoinSynAckWire {
    subtype_flags: u8,
    address_id: u8,
    sender_hmac: U64,
    sender_random: U32,
}

/// MP_JOIN payload, ACK form (after kind/length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MpJoinAckWire {
    subtype_reserved: U16,
    sender_hmac: [u8; 20],
}

/// A SACK block (RFC 2018).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    /// Left edge: first sequence number in the block.
    pub left: u32,
    /// Right edge: first sequence number just past the block.
    pub right: u32,
}

/// Data ACK field of a DSS option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAck {
    /// 4-octet data ACK.
    Ack32(u32),
    /// 8-octet data ACK.
    Ack64(u64),
}

/// Data sequence number field of a DSS mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSeq {
    /// 4-octet data sequence number.
    Dsn32(u32),
    /// 8-octet data sequence number.
    Dsn64(u64),
}

/// Sequence mapping carried by a DSS option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMapping {
    /// Data-level sequence number.
    pub dsn: DataSeq,
    /// Subflow sequence number.
    pub subflow_seq: u32,
    /// Data-level length.
    pub data_len: u16,
    /// Data checksum, present depending on negotiated option length.
    pub checksum: Option<u16>,
}

/// Data sequence signal option body.
///
/// The engine models the layout only; field values are produced by the
/// data plane, which is not handled here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dss {
    /// DATA_FIN flag.
    pub data_fin: bool,
    /// Data-level acknowledgment, if present.
    pub ack: Option<DataAck>,
    /// Sequence mapping, if present.
    pub mapping: Option<DataMapping>,
}

impl Dss {
    fn wire_len(&self) -> u8 {
        let mut len = 4u8;
        match self.ack {
            Some(DataAck::Ack32(_)) => len += 4,
            Some(DataAck::Ack64(_)) => len += 8,
            None => {}
        }
        if let Some(mapping) = &self.mapping {
            len += match mapping.dsn {
                DataSeq::Dsn32(_) => 4,
                DataSeq::Dsn64(_) => 8,
            };
            len += 6; // SSN + data-level length
            if mapping.checksum.is_some() {
                len += 2;
            }
        }
        len
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        match self.ack {
            Some(DataAck::Ack32(_)) => flags |= dss_flag::DATA_ACK,
            Some(DataAck::Ack64(_)) => flags |= dss_flag::DATA_ACK | dss_flag::DATA_ACK_8,
            None => {}
        }
        if let Some(mapping) = &self.mapping {
            flags |= dss_flag::MAPPING;
            if matches!(mapping.dsn, DataSeq::Dsn64(_)) {
                flags |= dss_flag::DSN_8;
            }
        }
        if self.data_fin {
            flags |= dss_flag::DATA_FIN;
        }
        flags
    }
}

/// A single MPTCP option in parsed form.
///
/// The variant records the wire shape, so the handshake engine can
/// dispatch on it together with the packet's SYN/ACK flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MptcpOption {
    /// MP_CAPABLE, single-key SYN / SYN-ACK form.
    CapableSyn {
        /// MPTCP protocol version.
        version: u8,
        /// Capability flags.
        flags: u8,
        /// The sender's connection key.
        key: u64,
    },
    /// MP_CAPABLE, two-key exchange form on the third ACK.
    Capable {
        /// MPTCP protocol version.
        version: u8,
        /// Capability flags.
        flags: u8,
        /// The sender's connection key.
        sender_key: u64,
        /// The receiver's connection key.
        receiver_key: u64,
    },
    /// MP_JOIN on SYN: token of the target connection plus a fresh nonce.
    JoinSyn {
        /// Join flags (backup bit).
        flags: u8,
        /// Address id the sender advertises for this subflow.
        address_id: u8,
        /// Token derived from the receiver's connection key.
        receiver_token: u32,
        /// The sender's random nonce.
        sender_random: u32,
    },
    /// MP_JOIN on SYN-ACK: truncated HMAC plus the responder's nonce.
    JoinSynAck {
        /// Join flags (backup bit).
        flags: u8,
        /// Address id the sender advertises for this subflow.
        address_id: u8,
        /// Leftmost 64 bits of the sender's HMAC.
        sender_hmac: u64,
        /// The sender's random nonce.
        sender_random: u32,
    },
    /// MP_JOIN on the third ACK: the full 160-bit HMAC.
    JoinAck {
        /// The sender's full HMAC-SHA1 digest.
        sender_hmac: [u8; 20],
    },
    /// Data sequence signal.
    Dss(Dss),
    /// An MPTCP subtype this engine does not drive.
    Unknown {
        /// The option subtype.
        subtype: u8,
        /// Raw payload after kind/length, subtype byte included.
        payload: Vec<u8>,
    },
}

impl MptcpOption {
    /// The MPTCP subtype of this option.
    pub fn subtype(&self) -> u8 {
        match self {
            Self::CapableSyn { .. } | Self::Capable { .. } => mptcp_subtype::MP_CAPABLE,
            Self::JoinSyn { .. } | Self::JoinSynAck { .. } | Self::JoinAck { .. } => {
                mptcp_subtype::MP_JOIN
            }
            Self::Dss(_) => mptcp_subtype::DSS,
            Self::Unknown { subtype, .. } => *subtype,
        }
    }

    /// Total option length on the wire, kind and length bytes included.
    pub fn wire_len(&self) -> u8 {
        match self {
            Self::CapableSyn { .. } => TCPOLEN_MP_CAPABLE_SYN,
            Self::Capable { .. } => TCPOLEN_MP_CAPABLE,
            Self::JoinSyn { .. } => TCPOLEN_MP_JOIN_SYN,
            Self::JoinSynAck { .. } => TCPOLEN_MP_JOIN_SYN_ACK,
            Self::JoinAck { .. } => TCPOLEN_MP_JOIN_ACK,
            Self::Dss(dss) => dss.wire_len(),
            Self::Unknown { payload, .. } => 2 + payload.len() as u8,
        }
    }

    /// Parse an MPTCP option payload (the bytes after kind/length).
    ///
    /// `length` is the option's wire length byte; it selects the shape
    /// for the subtypes that overload one subtype value.
    pub fn parse(length: u8, payload: &[u8]) -> Result<Self> {
        let first = *payload.first().ok_or(Error::Truncated {
            expected: 1,
            actual: 0,
        })?;
        match first >> 4 {
            mptcp_subtype::MP_CAPABLE => Self::parse_mp_capable(length, payload),
            mptcp_subtype::MP_JOIN => Self::parse_mp_join(length, payload),
            mptcp_subtype::DSS => Self::parse_dss(payload),
            subtype => Ok(Self::Unknown {
                subtype,
                payload: payload.to_vec(),
            }),
        }
    }

    fn parse_mp_capable(length: u8, payload: &[u8]) -> Result<Self> {
        match length {
            TCPOLEN_MP_CAPABLE_SYN => {
                let (wire, _) =
                    MpCapableSynWire::ref_from_prefix(payload).map_err(|_| Error::Truncated {
                        expected: std::mem::size_of::<MpCapableSynWire>(),
                        actual: payload.len(),
                    })?;
                Ok(Self::CapableSyn {
                    version: wire.subtype_version & 0x0f,
                    flags: wire.flags,
                    key: wire.key.get(),
                })
            }
            TCPOLEN_MP_CAPABLE => {
                let (wire, _) =
                    MpCapableWire::ref_from_prefix(payload).map_err(|_| Error::Truncated {
                        expected: std::mem::size_of::<MpCapableWire>(),
                        actual: payload.len(),
                    })?;
                Ok(Self::Capable {
                    version: wire.subtype_version & 0x0f,
                    flags: wire.flags,
                    sender_key: wire.sender_key.get(),
                    receiver_key: wire.receiver_key.get(),
                })
            }
            other => Err(Error::InvalidOption(format!(
                "MP_CAPABLE with length {other}"
            ))),
        }
    }

    fn parse_mp_join(length: u8, payload: &[u8]) -> Result<Self> {
        match length {
            TCPOLEN_MP_JOIN_SYN => {
                let (wire, _) =
                    MpJoinSynWire::ref_from_prefix(payload).map_err(|_| Error::Truncated {
                        expected: std::mem::size_of::<MpJoinSynWire>(),
                        actual: payload.len(),
                    })?;
                Ok(Self::JoinSyn {
                    flags: wire.subtype_flags & 0x0f,
                    address_id: wire.address_id,
                    receiver_token: wire.receiver_token.get(),
                    sender_random: wire.sender_random.get(),
                })
            }
            TCPOLEN_MP_JOIN_SYN_ACK => {
                let (wire, _) =
                    MpJoinSynAckWire::ref_from_prefix(payload).map_err(|_| Error::Truncated {
                        expected: std::mem::size_of::<MpJoinSynAckWire>(),
                        actual: payload.len(),
                    })?;
                Ok(Self::JoinSynAck {
                    flags: wire.subtype_flags & 0x0f,
                    address_id: wire.address_id,
                    sender_hmac: wire.sender_hmac.get(),
                    sender_random: wire.sender_random.get(),
                })
            }
            TCPOLEN_MP_JOIN_ACK => {
                let (wire, _) =
                    MpJoinAckWire::ref_from_prefix(payload).map_err(|_| Error::Truncated {
                        expected: std::mem::size_of::<MpJoinAckWire>(),
                        actual: payload.len(),
                    })?;
                Ok(Self::JoinAck {
                    sender_hmac: wire.sender_hmac,
                })
            }
            other => Err(Error::InvalidOption(format!("MP_JOIN with length {other}"))),
        }
    }

    fn parse_dss(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(Error::Truncated {
                expected: 2,
                actual: payload.len(),
            });
        }
        let flags = payload[1];
        let mut off = 2;

        let ack = if flags & dss_flag::DATA_ACK != 0 {
            Some(if flags & dss_flag::DATA_ACK_8 != 0 {
                DataAck::Ack64(read_u64(payload, &mut off)?)
            } else {
                DataAck::Ack32(read_u32(payload, &mut off)?)
            })
        } else {
            None
        };

        let mapping = if flags & dss_flag::MAPPING != 0 {
            let dsn = if flags & dss_flag::DSN_8 != 0 {
                DataSeq::Dsn64(read_u64(payload, &mut off)?)
            } else {
                DataSeq::Dsn32(read_u32(payload, &mut off)?)
            };
            let subflow_seq = read_u32(payload, &mut off)?;
            let data_len = read_u16(payload, &mut off)?;
            // Checksum presence is signaled by the option length alone.
            let checksum = if payload.len() - off >= 2 {
                Some(read_u16(payload, &mut off)?)
            } else {
                None
            };
            Some(DataMapping {
                dsn,
                subflow_seq,
                data_len,
                checksum,
            })
        } else {
            None
        };

        Ok(Self::Dss(Dss {
            data_fin: flags & dss_flag::DATA_FIN != 0,
            ack,
            mapping,
        }))
    }

    fn write_payload(&self, buf: &mut impl BufMut) {
        match self {
            Self::CapableSyn {
                version,
                flags,
                key,
            } => {
                let wire = MpCapableSynWire {
                    subtype_version: subtype_byte(mptcp_subtype::MP_CAPABLE, *version),
                    flags: *flags,
                    key: U64::new(*key),
                };
                buf.put_slice(wire.as_bytes());
            }
            Self::Capable {
                version,
                flags,
                sender_key,
                receiver_key,
            } => {
                let wire = MpCapableWire {
                    subtype_version: subtype_byte(mptcp_subtype::MP_CAPABLE, *version),
                    flags: *flags,
                    sender_key: U64::new(*sender_key),
                    receiver_key: U64::new(*receiver_key),
                };
                buf.put_slice(wire.as_bytes());
            }
            Self::JoinSyn {
                flags,
                address_id,
                receiver_token,
                sender_random,
            } => {
                let wire = MpJoinSynWire {
                    subtype_flags: subtype_byte(mptcp_subtype::MP_JOIN, *flags),
                    address_id: *address_id,
                    receiver_token: U32::new(*receiver_token),
                    sender_random: U32::new(*sender_random),
                };
                buf.put_slice(wire.as_bytes());
            }
            Self::JoinSynAck {
                flags,
                address_id,
                sender_hmac,
                sender_random,
            } => {
                let wire = MpJoinSynAckWire {
                    subtype_flags: subtype_byte(mptcp_subtype::MP_JOIN, *flags),
                    address_id: *address_id,
                    sender_hmac: U64::new(*sender_hmac),
                    sender_random: U32::new(*sender_random),
                };
                buf.put_slice(wire.as_bytes());
            }
            Self::JoinAck { sender_hmac } => {
                let wire = MpJoinAckWire {
                    subtype_reserved: U16::new((mptcp_subtype::MP_JOIN as u16) << 12),
                    sender_hmac: *sender_hmac,
                };
                buf.put_slice(wire.as_bytes());
            }
            Self::Dss(dss) => {
                buf.put_u8(subtype_byte(mptcp_subtype::DSS, 0));
                buf.put_u8(dss.flags());
                match dss.ack {
                    Some(DataAck::Ack32(ack)) => buf.put_u32(ack),
                    Some(DataAck::Ack64(ack)) => buf.put_u64(ack),
                    None => {}
                }
                if let Some(mapping) = &dss.mapping {
                    match mapping.dsn {
                        DataSeq::Dsn32(dsn) => buf.put_u32(dsn),
                        DataSeq::Dsn64(dsn) => buf.put_u64(dsn),
                    }
                    buf.put_u32(mapping.subflow_seq);
                    buf.put_u16(mapping.data_len);
                    if let Some(checksum) = mapping.checksum {
                        buf.put_u16(checksum);
                    }
                }
            }
            Self::Unknown { payload, .. } => buf.put_slice(payload),
        }
    }
}

/// Payload of a single TCP option, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionPayload {
    /// End of option list.
    Eol,
    /// Padding.
    Nop,
    /// Maximum segment size.
    Mss {
        /// Segment size in bytes.
        mss: u16,
    },
    /// Window scale.
    WindowScale {
        /// Shift count.
        shift: u8,
    },
    /// SACK permitted.
    SackPermitted,
    /// SACK blocks (1 to 4).
    Sack {
        /// The acknowledged blocks.
        blocks: Vec<SackBlock>,
    },
    /// Timestamps.
    Timestamp {
        /// Timestamp value.
        val: u32,
        /// Timestamp echo reply.
        ecr: u32,
    },
    /// TCP Fast Open cookie (experimental kind + magic).
    FastOpen {
        /// The cookie bytes; empty on a cookie request.
        cookie: Vec<u8>,
    },
    /// Any MPTCP option.
    Mptcp(MptcpOption),
    /// An option kind this model does not interpret.
    Raw(Vec<u8>),
}

/// A single TCP option: kind, wire length, and parsed payload.
///
/// For EOL and NOP the length byte is not on the wire; the stored length
/// is 1 (the kind byte alone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOption {
    /// Option kind.
    pub kind: u8,
    /// Length in wire bytes, kind and length bytes included.
    pub length: u8,
    /// Parsed payload.
    pub payload: OptionPayload,
}

impl TcpOption {
    /// Build an MPTCP option; the length is derived from the shape.
    pub fn mptcp(option: MptcpOption) -> Self {
        Self {
            kind: TCPOPT_MPTCP,
            length: option.wire_len(),
            payload: OptionPayload::Mptcp(option),
        }
    }

    /// Build a NOP padding option.
    pub fn nop() -> Self {
        Self {
            kind: TCPOPT_NOP,
            length: 1,
            payload: OptionPayload::Nop,
        }
    }

    /// Build an MSS option.
    pub fn mss(mss: u16) -> Self {
        Self {
            kind: TCPOPT_MAXSEG,
            length: 4,
            payload: OptionPayload::Mss { mss },
        }
    }

    /// Build a window scale option.
    pub fn window_scale(shift: u8) -> Self {
        Self {
            kind: TCPOPT_WINDOW,
            length: 3,
            payload: OptionPayload::WindowScale { shift },
        }
    }

    /// Build a timestamp option.
    pub fn timestamp(val: u32, ecr: u32) -> Self {
        Self {
            kind: TCPOPT_TIMESTAMP,
            length: 10,
            payload: OptionPayload::Timestamp { val, ecr },
        }
    }

    /// Check whether this is an MPTCP option.
    pub fn is_mptcp(&self) -> bool {
        self.kind == TCPOPT_MPTCP
    }

    /// Borrow the MPTCP payload, if this is an MPTCP option.
    pub fn as_mptcp(&self) -> Option<&MptcpOption> {
        match &self.payload {
            OptionPayload::Mptcp(option) => Some(option),
            _ => None,
        }
    }

    /// Append this option's wire encoding to a buffer.
    pub fn write(&self, buf: &mut impl BufMut) {
        match &self.payload {
            OptionPayload::Eol => buf.put_u8(TCPOPT_EOL),
            OptionPayload::Nop => buf.put_u8(TCPOPT_NOP),
            payload => {
                buf.put_u8(self.kind);
                buf.put_u8(self.length);
                match payload {
                    OptionPayload::Mss { mss } => buf.put_u16(*mss),
                    OptionPayload::WindowScale { shift } => buf.put_u8(*shift),
                    OptionPayload::SackPermitted => {}
                    OptionPayload::Sack { blocks } => {
                        for block in blocks {
                            buf.put_u32(block.left);
                            buf.put_u32(block.right);
                        }
                    }
                    OptionPayload::Timestamp { val, ecr } => {
                        buf.put_u32(*val);
                        buf.put_u32(*ecr);
                    }
                    OptionPayload::FastOpen { cookie } => {
                        buf.put_u16(TCPOPT_FASTOPEN_MAGIC);
                        buf.put_slice(cookie);
                    }
                    OptionPayload::Mptcp(option) => option.write_payload(buf),
                    OptionPayload::Raw(data) => buf.put_slice(data),
                    OptionPayload::Eol | OptionPayload::Nop => unreachable!(),
                }
            }
        }
    }

    /// Parse one option from the front of `data`.
    ///
    /// Returns the parsed option and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let kind = *data.first().ok_or(Error::Truncated {
            expected: 1,
            actual: 0,
        })?;
        match kind {
            TCPOPT_EOL => {
                return Ok((
                    Self {
                        kind,
                        length: 1,
                        payload: OptionPayload::Eol,
                    },
                    1,
                ));
            }
            TCPOPT_NOP => return Ok((Self::nop(), 1)),
            _ => {}
        }

        let length = *data.get(1).ok_or(Error::Truncated {
            expected: 2,
            actual: data.len(),
        })? as usize;
        if length < 2 {
            return Err(Error::InvalidOption(format!(
                "option kind {kind} with length {length}"
            )));
        }
        if length > data.len() {
            return Err(Error::Truncated {
                expected: length,
                actual: data.len(),
            });
        }
        let payload_bytes = &data[2..length];

        let payload = match kind {
            TCPOPT_MAXSEG => OptionPayload::Mss {
                mss: read_u16(payload_bytes, &mut 0)?,
            },
            TCPOPT_WINDOW => OptionPayload::WindowScale {
                shift: *payload_bytes.first().ok_or(Error::Truncated {
                    expected: 3,
                    actual: length,
                })?,
            },
            TCPOPT_SACK_PERMITTED => OptionPayload::SackPermitted,
            TCPOPT_SACK => {
                if payload_bytes.is_empty() || payload_bytes.len() % 8 != 0 {
                    return Err(Error::InvalidOption(format!(
                        "SACK option with length {length}"
                    )));
                }
                let blocks = payload_bytes
                    .chunks_exact(8)
                    .map(|chunk| {
                        let mut off = 0;
                        Ok(SackBlock {
                            left: read_u32(chunk, &mut off)?,
                            right: read_u32(chunk, &mut off)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                OptionPayload::Sack { blocks }
            }
            TCPOPT_TIMESTAMP => {
                let mut off = 0;
                OptionPayload::Timestamp {
                    val: read_u32(payload_bytes, &mut off)?,
                    ecr: read_u32(payload_bytes, &mut off)?,
                }
            }
            TCPOPT_EXP => {
                let mut off = 0;
                if payload_bytes.len() >= 2
                    && read_u16(payload_bytes, &mut off)? == TCPOPT_FASTOPEN_MAGIC
                {
                    OptionPayload::FastOpen {
                        cookie: payload_bytes[2..].to_vec(),
                    }
                } else {
                    OptionPayload::Raw(payload_bytes.to_vec())
                }
            }
            TCPOPT_MPTCP => OptionPayload::Mptcp(MptcpOption::parse(length as u8, payload_bytes)?),
            _ => OptionPayload::Raw(payload_bytes.to_vec()),
        };

        Ok((
            Self {
                kind,
                length: length as u8,
                payload,
            },
            length,
        ))
    }
}

/// Parse a full TCP option list from wire bytes.
///
/// Stops at EOL; the EOL option itself is kept in the result.
pub fn parse_options(data: &[u8]) -> Result<Vec<TcpOption>> {
    let mut options = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let (option, consumed) = TcpOption::parse(rest)?;
        let eol = matches!(option.payload, OptionPayload::Eol);
        options.push(option);
        if eol {
            break;
        }
        rest = &rest[consumed..];
    }
    Ok(options)
}

/// Encode a TCP option list to wire bytes.
pub fn encode_options(options: &[TcpOption], buf: &mut impl BufMut) {
    for option in options {
        option.write(buf);
    }
}

fn read_u16(data: &[u8], off: &mut usize) -> Result<u16> {
    let end = *off + 2;
    if end > data.len() {
        return Err(Error::Truncated {
            expected: end,
            actual: data.len(),
        });
    }
    let value = u16::from_be_bytes([data[*off], data[*off + 1]]);
    *off = end;
    Ok(value)
}

fn read_u32(data: &[u8], off: &mut usize) -> Result<u32> {
    let end = *off + 4;
    if end > data.len() {
        return Err(Error::Truncated {
            expected: end,
            actual: data.len(),
        });
    }
    let value = u32::from_be_bytes([data[*off], data[*off + 1], data[*off + 2], data[*off + 3]]);
    *off = end;
    Ok(value)
}

fn read_u64(data: &[u8], off: &mut usize) -> Result<u64> {
    let end = *off + 8;
    if end > data.len() {
        return Err(Error::Truncated {
            expected: end,
            actual: data.len(),
        });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*off..end]);
    *off = end;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(option: &TcpOption) -> TcpOption {
        let mut buf = BytesMut::new();
        option.write(&mut buf);
        let (parsed, consumed) = TcpOption::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        parsed
    }

    #[test]
    fn test_mp_capable_syn_wire_layout() {
        let option = TcpOption::mptcp(MptcpOption::CapableSyn {
            version: MPTCP_VERSION,
            flags: 0x81,
            key: 0x0102_0304_0506_0708,
        });
        let mut buf = BytesMut::new();
        option.write(&mut buf);
        assert_eq!(
            &buf[..],
            &[30, 12, 0x00, 0x81, 1, 2, 3, 4, 5, 6, 7, 8][..]
        );
        assert_eq!(roundtrip(&option), option);
    }

    #[test]
    fn test_mp_capable_length_selects_shape() {
        let syn_form = TcpOption::mptcp(MptcpOption::CapableSyn {
            version: 0,
            flags: 0,
            key: 7,
        });
        assert_eq!(syn_form.length, TCPOLEN_MP_CAPABLE_SYN);

        let full_form = TcpOption::mptcp(MptcpOption::Capable {
            version: 0,
            flags: 0,
            sender_key: 7,
            receiver_key: 8,
        });
        assert_eq!(full_form.length, TCPOLEN_MP_CAPABLE);
        assert_eq!(roundtrip(&full_form), full_form);
    }

    #[test]
    fn test_mp_join_syn_ack_wire_layout() {
        let option = TcpOption::mptcp(MptcpOption::JoinSynAck {
            flags: 0x1,
            address_id: 5,
            sender_hmac: 0xAABB_CCDD_EEFF_0011,
            sender_random: 0x0102_0304,
        });
        let mut buf = BytesMut::new();
        option.write(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                30, 16, 0x11, 5, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11, 1, 2, 3, 4
            ][..]
        );
        assert_eq!(roundtrip(&option), option);
    }

    #[test]
    fn test_mp_join_ack_carries_full_hmac() {
        let hmac: [u8; 20] = std::array::from_fn(|i| i as u8);
        let option = TcpOption::mptcp(MptcpOption::JoinAck { sender_hmac: hmac });
        assert_eq!(option.length, TCPOLEN_MP_JOIN_ACK);
        let mut buf = BytesMut::new();
        option.write(&mut buf);
        // Subtype sits in the top nibble of the 16-bit reserved field.
        assert_eq!(buf[2], 0x10);
        assert_eq!(&buf[4..], &hmac[..]);
        assert_eq!(roundtrip(&option), option);
    }

    #[test]
    fn test_dss_layouts() {
        let ack_only = TcpOption::mptcp(MptcpOption::Dss(Dss {
            data_fin: false,
            ack: Some(DataAck::Ack32(0x0A0B_0C0D)),
            mapping: None,
        }));
        assert_eq!(ack_only.length, 8);
        assert_eq!(roundtrip(&ack_only), ack_only);

        let full = TcpOption::mptcp(MptcpOption::Dss(Dss {
            data_fin: true,
            ack: Some(DataAck::Ack64(0x1122_3344_5566_7788)),
            mapping: Some(DataMapping {
                dsn: DataSeq::Dsn32(0x0102_0304),
                subflow_seq: 9,
                data_len: 1400,
                checksum: Some(0xBEEF),
            }),
        }));
        assert_eq!(full.length, 4 + 8 + 4 + 4 + 2 + 2);
        let mut buf = BytesMut::new();
        full.write(&mut buf);
        assert_eq!(
            buf[3],
            dss_flag::DATA_ACK | dss_flag::DATA_ACK_8 | dss_flag::MAPPING | dss_flag::DATA_FIN
        );
        assert_eq!(roundtrip(&full), full);
    }

    #[test]
    fn test_dss_checksum_detected_by_length() {
        let without = TcpOption::mptcp(MptcpOption::Dss(Dss {
            data_fin: false,
            ack: None,
            mapping: Some(DataMapping {
                dsn: DataSeq::Dsn32(1),
                subflow_seq: 2,
                data_len: 3,
                checksum: None,
            }),
        }));
        assert_eq!(without.length, 14);
        assert_eq!(roundtrip(&without), without);
    }

    #[test]
    fn test_unknown_mptcp_subtype_preserved() {
        // ADD_ADDR (subtype 3) is modeled but not driven.
        let data = [30u8, 8, 0x30, 1, 10, 0, 0, 1];
        let (option, consumed) = TcpOption::parse(&data).unwrap();
        assert_eq!(consumed, 8);
        match &option.payload {
            OptionPayload::Mptcp(MptcpOption::Unknown { subtype, payload }) => {
                assert_eq!(*subtype, 3);
                assert_eq!(payload.len(), 6);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(roundtrip(&option), option);
    }

    #[test]
    fn test_classic_options_roundtrip() {
        for option in [
            TcpOption::mss(1460),
            TcpOption::window_scale(7),
            TcpOption::timestamp(0x11223344, 0x55667788),
            TcpOption {
                kind: TCPOPT_SACK,
                length: 10,
                payload: OptionPayload::Sack {
                    blocks: vec![SackBlock {
                        left: 100,
                        right: 200,
                    }],
                },
            },
            TcpOption {
                kind: TCPOPT_EXP,
                length: 8,
                payload: OptionPayload::FastOpen {
                    cookie: vec![0xDE, 0xAD, 0xBE, 0xEF],
                },
            },
        ] {
            assert_eq!(roundtrip(&option), option);
        }
    }

    #[test]
    fn test_option_list_roundtrip() {
        let options = vec![
            TcpOption::nop(),
            TcpOption::nop(),
            TcpOption::mptcp(MptcpOption::CapableSyn {
                version: 0,
                flags: 0,
                key: 42,
            }),
        ];
        let mut buf = BytesMut::new();
        encode_options(&options, &mut buf);
        let parsed = parse_options(&buf).unwrap();
        assert_eq!(parsed, options);
        assert!(parsed[2].is_mptcp());
    }

    #[test]
    fn test_truncated_mp_join_rejected() {
        let data = [30u8, 16, 0x10, 5, 1, 2, 3];
        let err = TcpOption::parse(&data).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_bad_mp_join_length_rejected() {
        // Length 14 matches no MP_JOIN shape.
        let data = [30u8, 14, 0x10, 5, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let err = TcpOption::parse(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }
}
