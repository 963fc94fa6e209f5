//! Error types for MPTCP option processing.

/// Result type for MPTCP option processing.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while populating or capturing MPTCP options.
///
/// All of these are synchronous, non-retryable failures: the first one
/// aborts processing of the current packet and is surfaced by the script
/// driver as a test failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pending-variable queue has no more names to hand out.
    #[error("no pending script variable left in the queue")]
    QueueEmpty,

    /// A script variable was consumed before a key was bound to it.
    #[error("script variable not bound to a key: {name}")]
    VariableUnbound {
        /// The variable name that failed to resolve.
        name: String,
    },

    /// No registered subflow matches the packet's port pair.
    #[error("no subflow matches port pair {src_port} -> {dst_port}")]
    NoMatchingSubflow {
        /// Source port of the packet that failed to match.
        src_port: u16,
        /// Destination port of the packet that failed to match.
        dst_port: u16,
    },

    /// A live packet that must carry an MPTCP option does not.
    #[error("live packet carries no usable MPTCP option")]
    MissingMptcpOption,

    /// The subtype/flags/length combination matches no handshake case.
    #[error(
        "unrecognized MPTCP option shape: subtype {subtype}, length {length}, syn {syn}, ack {ack}"
    )]
    UnrecognizedOptionShape {
        /// MPTCP option subtype.
        subtype: u8,
        /// Option length in wire bytes.
        length: u8,
        /// SYN flag of the packet being processed.
        syn: bool,
        /// ACK flag of the packet being processed.
        ack: bool,
    },

    /// The packet has neither an IPv4 nor an IPv6 header.
    #[error("packet has neither an IPv4 nor an IPv6 header")]
    MissingAddressFamily,

    /// A token or HMAC computation needs a connection key that has not
    /// been established yet.
    #[error("{side} connection key not established")]
    MissingConnectionKey {
        /// Which side's key is missing ("local" or "remote").
        side: &'static str,
    },

    /// An HMAC computation needs a subflow nonce or address id that is
    /// not known at this point of the handshake.
    #[error("subflow is missing its {field}")]
    IncompleteSubflow {
        /// The field that has not been populated yet.
        field: &'static str,
    },

    /// An option was shorter than its length byte claims.
    #[error("truncated option: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected option length.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// An option's wire encoding is malformed.
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl Error {
    /// Check if this is a subflow lookup failure.
    pub fn is_no_matching_subflow(&self) -> bool {
        matches!(self, Self::NoMatchingSubflow { .. })
    }

    /// Check if this error comes from the wire codec rather than the
    /// handshake state machine.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::InvalidOption(_))
    }
}
