//! Runtime settings for the hub, loaded from environment variables.

use std::time::Duration;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the hub's command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Default Redis channel used by the cross-process relay.
pub const DEFAULT_RELAY_CHANNEL: &str = "chat-hub:notify";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames a connection may have pending before it is evicted as stuck.
    pub queue_capacity: usize,
    /// Register/unregister/enqueue commands buffered ahead of the control loop.
    pub command_capacity: usize,
    /// When set, each write pump pings its client on this interval.
    pub ping_interval: Option<Duration>,
    /// When set, a connection that receives nothing for this long is closed.
    pub idle_timeout: Option<Duration>,
    /// Redis server for the cross-process relay. `None` keeps delivery local.
    pub redis_url: Option<String>,
    /// Redis channel the relay publishes and listens on.
    pub relay_channel: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            ping_interval: None,
            idle_timeout: None,
            redis_url: None,
            relay_channel: DEFAULT_RELAY_CHANNEL.to_string(),
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; missing or unparsable values fall back to
    /// the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: parsed_var("CHAT_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            command_capacity: parsed_var("CHAT_COMMAND_CAPACITY")
                .unwrap_or(defaults.command_capacity),
            ping_interval: parsed_var("CHAT_PING_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            idle_timeout: parsed_var("CHAT_IDLE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            relay_channel: std::env::var("CHAT_RELAY_CHANNEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.relay_channel),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| parse_value(&v))
}

fn parse_value<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_baseline_behavior() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 256);
        assert!(config.ping_interval.is_none());
        assert!(config.idle_timeout.is_none());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn unparsable_values_are_ignored() {
        assert_eq!(parse_value::<usize>("lots"), None);
        assert_eq!(parse_value::<usize>(""), None);
        assert_eq!(parse_value::<u64>("-5"), None);
    }

    #[test]
    fn values_are_trimmed_before_parsing() {
        assert_eq!(parse_value::<usize>(" 12 "), Some(12));
        assert_eq!(parse_value::<u64>("30\n"), Some(30));
    }

    #[test]
    fn missing_variable_is_none() {
        assert_eq!(parsed_var::<usize>("CHAT_TEST_NEVER_SET"), None);
    }
}
