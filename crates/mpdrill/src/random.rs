//! Secure random values for connection keys and subflow nonces.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate a fresh 64-bit connection key.
///
/// A new generator is seeded from the OS for every key, so keys drawn in
/// separate test runs never share generator state.
pub fn connection_key() -> u64 {
    let mut rng = StdRng::from_os_rng();
    rng.random()
}

/// Generate a 32-bit nonce for a new subflow.
pub fn subflow_nonce() -> u32 {
    rand::rng().random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_keys_differ() {
        // Two freshly seeded draws colliding would mean the generator is
        // not actually reseeding.
        assert_ne!(connection_key(), connection_key());
    }

    #[test]
    fn test_nonces_differ() {
        let draws: Vec<u32> = (0..8).map(|_| subflow_nonce()).collect();
        assert!(draws.iter().any(|&nonce| nonce != draws[0]));
    }
}
