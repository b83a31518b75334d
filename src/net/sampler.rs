//! The independently-sampled `record-addr-data` decision: a uniformly
//! random fraction of reachable nodes (`node-share`) has its advertised
//! addresses persisted. Sampled at `take` time using a reproducible seeded
//! RNG, so a crawl run with the same seed and the same take order samples
//! the same nodes.
//!
//! Grounded on this crate's addrman module, which already uses
//! `rand_chacha::ChaCha20Rng` for reproducible bucket selection; `node-share`
//! sampling reuses the same family of RNG for the same reason.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::Mutex;

pub struct Sampler {
    node_share: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl Sampler {
    pub fn new(node_share: f64, seed: u64) -> Sampler {
        Sampler {
            node_share: node_share.clamp(0.0, 1.0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Draws the next value from the shared RNG stream and decides whether
    /// the calling node should be sampled. Callers are expected to call
    /// this exactly once per reachable node, in `take` order.
    pub async fn sample(&self) -> bool {
        if self.node_share >= 1.0 {
            return true;
        }
        if self.node_share <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().await;
        rng.gen::<f64>() < self.node_share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn node_share_one_always_samples() {
        let sampler = Sampler::new(1.0, 42);
        for _ in 0..10 {
            assert!(sampler.sample().await);
        }
    }

    #[tokio::test]
    async fn node_share_zero_never_samples() {
        let sampler = Sampler::new(0.0, 42);
        for _ in 0..10 {
            assert!(!sampler.sample().await);
        }
    }

    #[tokio::test]
    async fn same_seed_produces_same_sample_sequence() {
        let a = Sampler::new(0.4, 7);
        let b = Sampler::new(0.4, 7);
        let mut seq_a = Vec::new();
        let mut seq_b = Vec::new();
        for _ in 0..20 {
            seq_a.push(a.sample().await);
            seq_b.push(b.sample().await);
        }
        assert_eq!(seq_a, seq_b);
    }
}
