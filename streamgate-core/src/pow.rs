//! Proof-of-work solver for the primary provider's key endpoint.
//!
//! The upstream gates decryption-key fetches behind a hash puzzle: find a
//! nonce such that `sha256(hmac(secret, resource) || resource || counter ||
//! timestamp || nonce)` starts with enough zero bits. The timestamp is part
//! of the hashed material, so a solved nonce is only valid within its
//! timestamp window and is never worth caching.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::PowConfig;

type HmacSha256 = Hmac<Sha256>;

/// A solved puzzle, ready to be attached to a key request.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    pub resource: String,
    pub counter: u64,
    pub timestamp: i64,
    pub nonce: u64,
}

#[derive(Clone)]
pub struct PowEngine {
    config: PowConfig,
}

impl PowEngine {
    pub fn new(config: PowConfig) -> Self {
        Self { config }
    }

    /// Search ascending nonce candidates until one satisfies the difficulty
    /// threshold. Returns `None` when the iteration cap is exhausted; the
    /// caller treats that as a failed attempt and must not retry with the
    /// same timestamp.
    pub fn compute_nonce(&self, resource: &str, counter: u64, timestamp: i64) -> Option<u64> {
        let keyed = self.keyed_resource(resource);
        for candidate in 0..self.config.max_iterations {
            if self.digest_head(&keyed, resource, counter, timestamp, candidate)
                < self.config.threshold
            {
                return Some(candidate);
            }
        }
        None
    }

    /// Solve the puzzle for the current wall clock.
    pub fn solve(&self, resource: &str, counter: u64) -> Option<ProofOfWork> {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = self.compute_nonce(resource, counter, timestamp)?;
        Some(ProofOfWork {
            resource: resource.to_string(),
            counter,
            timestamp,
            nonce,
        })
    }

    fn keyed_resource(&self, resource: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .expect("hmac-sha256 accepts any key length");
        mac.update(resource.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Leading 32 bits of the candidate digest, big-endian.
    fn digest_head(
        &self,
        keyed: &[u8],
        resource: &str,
        counter: u64,
        timestamp: i64,
        candidate: u64,
    ) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(keyed);
        hasher.update(resource.as_bytes());
        hasher.update(counter.to_string().as_bytes());
        hasher.update(timestamp.to_string().as_bytes());
        hasher.update(candidate.to_string().as_bytes());
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(threshold: u32, max_iterations: u64) -> PowEngine {
        PowEngine::new(PowConfig {
            secret: "test-secret".to_string(),
            threshold,
            max_iterations,
        })
    }

    #[test]
    fn easy_threshold_finds_nonce_quickly() {
        // Threshold accepting half of all digests: expected ~2 iterations.
        let engine = engine(0x8000_0000, 1_000);
        let nonce = engine.compute_nonce("premium42", 1, 1_700_000_000);
        assert!(nonce.is_some());
    }

    #[test]
    fn impossible_threshold_exhausts_cap() {
        let engine = engine(0, 500);
        assert_eq!(engine.compute_nonce("premium42", 1, 1_700_000_000), None);
    }

    #[test]
    fn nonce_is_deterministic_for_fixed_inputs() {
        let engine = engine(0x0800_0000, 10_000);
        let a = engine.compute_nonce("premium42", 7, 1_700_000_000);
        let b = engine.compute_nonce("premium42", 7, 1_700_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn timestamp_changes_the_solution_space() {
        let engine = engine(0x0400_0000, 100_000);
        let a = engine.compute_nonce("premium42", 7, 1_700_000_000);
        let b = engine.compute_nonce("premium42", 7, 1_700_000_001);
        // Both solvable, but independently: equal nonces would only happen
        // by coincidence at this difficulty.
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[test]
    fn accepted_nonce_actually_satisfies_threshold() {
        let engine = engine(0x1000_0000, 100_000);
        let nonce = engine
            .compute_nonce("premium7", 3, 1_700_000_000)
            .expect("solvable at this difficulty");
        let keyed = engine.keyed_resource("premium7");
        assert!(engine.digest_head(&keyed, "premium7", 3, 1_700_000_000, nonce) < 0x1000_0000);
    }
}
