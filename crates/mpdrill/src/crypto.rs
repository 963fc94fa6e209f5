//! Token derivation and subflow authentication (RFC 6824).
//!
//! MPTCP identifies an established connection by a 32-bit token derived
//! from its 64-bit key, and authenticates every additional subflow with
//! HMAC-SHA1 digests over the nonces both ends exchanged during the
//! MP_JOIN handshake. Key material is always the two connection keys
//! concatenated in big-endian wire order; which key comes first depends
//! on which side is proving possession.

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Derive the 32-bit connection token from a 64-bit connection key.
///
/// The token is the low 32 bits of the SHA-1 digest of the key's wire
/// bytes. It is a pure function of the key: the same key always yields
/// the same token.
pub fn token(key: u64) -> u32 {
    let digest = Sha1::digest(key.to_be_bytes());
    u32::from_be_bytes([digest[16], digest[17], digest[18], digest[19]])
}

/// Build the 16-byte HMAC key material `first ‖ second`.
pub fn hmac_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

/// Build the 8-byte HMAC message `first ‖ second` from the two subflow
/// nonces.
pub fn hmac_message(first: u32, second: u32) -> [u8; 8] {
    let mut msg = [0u8; 8];
    msg[..4].copy_from_slice(&first.to_be_bytes());
    msg[4..].copy_from_slice(&second.to_be_bytes());
    msg
}

/// Full 160-bit HMAC-SHA1 digest, as carried by the MP_JOIN ACK.
pub fn hmac_sha1(key: &[u8; 16], message: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA1 truncated to its leftmost 64 bits, as carried by the
/// MP_JOIN SYN-ACK.
pub fn hmac_sha1_truncated(key: &[u8; 16], message: &[u8]) -> u64 {
    let digest = hmac_sha1(key, message);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
