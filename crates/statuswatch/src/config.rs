//! Relay configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default status page.
pub const DEFAULT_FEED_URL: &str = "https://discordstatus.com";

/// Default latency metric display.
pub const DEFAULT_METRIC_PATH: &str = "/metrics-display/5k2rt9f7pmny/day.json";

// =============================================================================
// Configuration
// =============================================================================

/// Relay configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // Status source
    pub feed_url: String,
    pub metric_path: String,

    // Destination platform
    pub discord_token: Option<String>,
    pub discord_api_url: String,

    // Storage
    pub state_dir: PathBuf,

    // Intervals and limits
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub send_concurrency: usize,

    // Admin HTTP server
    pub admin_addr: Option<String>,
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            feed_url: non_empty("STATUSWATCH_FEED_URL")
                .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            metric_path: non_empty("STATUSWATCH_METRIC_PATH")
                .unwrap_or_else(|| DEFAULT_METRIC_PATH.to_string()),

            discord_token: non_empty("DISCORD_TOKEN").or_else(|| non_empty("TOKEN")),
            discord_api_url: non_empty("DISCORD_API_URL")
                .unwrap_or_else(|| notify::channels::discord::DEFAULT_API_URL.to_string()),

            state_dir: non_empty("STATUSWATCH_STATE_DIR")
                .map_or_else(|| PathBuf::from("./state"), PathBuf::from),

            poll_interval_secs: non_empty("STATUSWATCH_POLL_INTERVAL_SECS")
                .or_else(|| non_empty("FETCH_API_UPDATES_TIMEOUT"))
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| *secs >= 1.0)
                .map_or(60, |secs| secs as u64),
            http_timeout_secs: non_empty("STATUSWATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(10),
            send_concurrency: non_empty("STATUSWATCH_SEND_CONCURRENCY")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(8),

            admin_addr: non_empty("STATUSWATCH_ADMIN_ADDR"),
            admin_token: non_empty("STATUSWATCH_ADMIN_TOKEN"),
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Check if the destination platform is configured.
    #[must_use]
    pub fn has_discord(&self) -> bool {
        self.discord_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.metric_path, DEFAULT_METRIC_PATH);
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert_eq!(config.send_concurrency, 8);
        assert_eq!(config.state_dir, PathBuf::from("./state"));
        assert_eq!(config.discord_api_url, "https://discord.com/api/v10");
        assert!(!config.has_discord());
        assert_eq!(config.admin_addr, None);
        assert_eq!(config.admin_token, None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("STATUSWATCH_FEED_URL", "http://localhost:8080"),
            ("STATUSWATCH_POLL_INTERVAL_SECS", "15"),
            ("STATUSWATCH_SEND_CONCURRENCY", "2"),
            ("STATUSWATCH_STATE_DIR", "/var/lib/statuswatch"),
            ("STATUSWATCH_ADMIN_ADDR", "127.0.0.1:9000"),
            ("STATUSWATCH_ADMIN_TOKEN", "s3cret"),
            ("DISCORD_TOKEN", "abc"),
        ]);
        assert_eq!(config.feed_url, "http://localhost:8080");
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.send_concurrency, 2);
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/statuswatch"));
        assert_eq!(config.admin_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.discord_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_legacy_names() {
        let config = config(&[("FETCH_API_UPDATES_TIMEOUT", "30.0"), ("TOKEN", "legacy")]);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.discord_token.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("STATUSWATCH_POLL_INTERVAL_SECS", "soon"),
            ("STATUSWATCH_SEND_CONCURRENCY", "0"),
            ("DISCORD_TOKEN", "  "),
        ]);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.send_concurrency, 8);
        assert!(!config.has_discord());
    }
}
