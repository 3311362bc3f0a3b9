use core::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegenConfig {
    /// Maximum number of states kept in the cache.
    pub max_states: usize,
    /// Maximum number of distinct regenerations in progress at once.
    pub queue_size: usize,
    pub lock_timeout: Duration,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            max_states: 96,
            queue_size: 256,
            lock_timeout: Duration::from_secs(1),
        }
    }
}
