use std::sync::{Mutex, PoisonError};

use quiz_core::model::QuestionId;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

/// Uniform sampling without replacement over a question pool.
///
/// The generator is injected so a fixed seed reproduces the same sessions.
pub struct QuestionSampler {
    rng: Mutex<StdRng>,
}

impl QuestionSampler {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[must_use]
    pub fn from_os() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    #[must_use]
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_os, Self::seeded)
    }

    /// Pick `count` distinct questions in random order.
    ///
    /// A pool smaller than `count` is returned whole, shuffled.
    #[must_use]
    pub fn sample(&self, pool: &[QuestionId], count: usize) -> Vec<QuestionId> {
        let amount = count.min(pool.len());
        // a poisoned generator is still a valid generator
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        index::sample(&mut *rng, pool.len(), amount)
            .into_iter()
            .filter_map(|i| pool.get(i).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(n: u64) -> Vec<QuestionId> {
        (1..=n).map(QuestionId::new).collect()
    }

    #[test]
    fn samples_distinct_questions_from_the_pool() {
        let sampler = QuestionSampler::seeded(7);
        let pool = pool(30);
        let picked = sampler.sample(&pool, 10);
        assert_eq!(picked.len(), 10);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(picked.iter().all(|q| pool.contains(q)));
    }

    #[test]
    fn same_seed_reproduces_the_same_order() {
        let pool = pool(20);
        let a = QuestionSampler::seeded(42).sample(&pool, 5);
        let b = QuestionSampler::seeded(42).sample(&pool, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn small_pool_is_used_whole() {
        let pool = pool(3);
        let mut picked = QuestionSampler::seeded(1).sample(&pool, 10);
        picked.sort();
        assert_eq!(picked, pool);
        assert!(QuestionSampler::seeded(1).sample(&[], 5).is_empty());
    }
}
