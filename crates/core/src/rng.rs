//! Deterministic PRNG construction.
//!
//! Every randomized decision in the core is seeded from its inputs so that
//! reruns reproduce the same draw. No shared RNG state exists anywhere.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Seeded ChaCha8 instance.
pub fn get_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Derive a 64-bit seed from an arbitrary string key.
///
/// First 8 bytes of SHA-256, big-endian. Stable across processes and
/// platforms, unlike the stdlib hasher.
pub fn seed_from_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
