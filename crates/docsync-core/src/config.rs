use std::time::Duration;

/// Default delay between two poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of change events buffered per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default name of the cache subdirectory.
pub const DEFAULT_CACHE_DIR_NAME: &str = "JSONs";

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between two poll ticks
    pub poll_interval: Duration,
    /// Change events buffered per subscriber before it starts lagging
    pub channel_capacity: usize,
    /// Subdirectory of the private storage root holding mirrored files
    pub cache_dir_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            cache_dir_name: DEFAULT_CACHE_DIR_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }
}
