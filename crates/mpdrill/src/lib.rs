//! MPTCP handshake engine for scripted TCP conformance testing.
//!
//! A test script describes packets to send to, and expect from, a live
//! network stack. When those packets carry Multipath TCP options
//! (RFC 6824), several field values cannot be written down in advance:
//! connection keys are generated at run time or captured from the live
//! peer, tokens and HMAC-SHA1 digests are derived from them, and
//! per-subflow nonces and address ids must stay consistent across every
//! subflow of the connection. This crate tracks that state across the
//! whole run and fills the option fields in as packets are processed,
//! with the handshake initiated by either side.
//!
//! # Example
//!
//! ```ignore
//! use mpdrill::packet::{Packet, TcpHeader};
//! use mpdrill::tcp_options::{MptcpOption, TcpOption};
//! use mpdrill::{Direction, MptcpSession};
//!
//! let mut session = MptcpSession::new();
//!
//! // The script references `client_key` on its opening SYN.
//! session.enqueue_variable("client_key");
//!
//! let mut syn = Packet::ipv4("192.0.2.1".parse()?, "192.0.2.2".parse()?,
//!     TcpHeader::new(40000, 8080).syn());
//! syn.push_option(TcpOption::mptcp(MptcpOption::CapableSyn {
//!     version: 0,
//!     flags: 0,
//!     key: 0, // filled in by the engine
//! }));
//!
//! session.process_packet(&mut syn, None, Direction::Inbound)?;
//! ```

pub mod crypto;
pub mod engine;
pub mod error;
pub mod packet;
pub mod random;
pub mod state;
pub mod subflow;
pub mod tcp_options;

// Re-export common types at crate root for convenience
pub use engine::{Direction, MptcpSession};
pub use error::{Error, Result};
