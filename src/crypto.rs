//! Pluggable source of randomness and SHA-1 for the handshake and masking.
//!
//! The default provider is what production connections use. Supplying a
//! deterministic provider makes handshakes and masked output reproducible,
//! which is how the known-answer tests for `Sec-WebSocket-Accept` work.

use rand::RngCore;
use sha1::{Digest, Sha1};

/// Source of random bytes and SHA-1 digests used for nonce generation, mask
/// keys, and accept-key computation.
pub trait CryptoProvider: Send + Sync {
    /// Fills `buf` with random bytes.
    fn fill_random(&self, buf: &mut [u8]);

    /// Computes the SHA-1 digest of `input`.
    fn sha1(&self, input: &[u8]) -> [u8; 20];
}

/// Default provider backed by the `rand` and `sha1` crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCrypto;

impl CryptoProvider for DefaultCrypto {
    fn fill_random(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }

    fn sha1(&self, input: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(input);
        hasher.finalize().into()
    }
}

/// A fresh 4-byte mask key for one outgoing frame.
pub(crate) fn mask_key(crypto: &dyn CryptoProvider) -> [u8; 4] {
    let mut key = [0u8; 4];
    crypto.fill_random(&mut key);
    key
}

/// The 16-byte handshake nonce, before base64 encoding.
pub(crate) fn nonce(crypto: &dyn CryptoProvider) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    crypto.fill_random(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_answer() {
        // SHA-1("abc") from FIPS 180-1.
        let digest = DefaultCrypto.sha1(b"abc");
        assert_eq!(
            digest,
            [
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78,
                0x50, 0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
            ]
        );
    }

    #[test]
    fn test_fill_random_covers_buffer() {
        // 32 zero bytes staying zero after two fills would be astronomically
        // unlikely with a working RNG.
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        DefaultCrypto.fill_random(&mut a);
        DefaultCrypto.fill_random(&mut b);
        assert_ne!(a, [0u8; 32]);
        assert_ne!(a, b);
    }
}
