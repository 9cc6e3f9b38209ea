use std::time::Duration;

use quiz_core::model::RetryPolicy;

/// Tunables shared by the quiz services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Completion jobs claimed per drain.
    pub worker_batch_size: u32,
    /// How often the worker drains when nothing wakes it.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Fixed seed for question sampling; `None` seeds from the OS.
    pub sampling_seed: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_batch_size: 50,
            poll_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            sampling_seed: None,
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn with_sampling_seed(mut self, seed: u64) -> Self {
        self.sampling_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
