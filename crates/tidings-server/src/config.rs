use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use tidings_core::{FanOutSettings, TimelineSettings};
use tidings_engine::DeliveryPolicy;

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    pub follow_graph_url: String,
    pub feed_store_url: String,
    pub fan_out: FanOutSettings,
    pub timeline: TimelineSettings,
    pub delivery: DeliveryPolicy,
    pub trim_interval: Duration,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let follow_graph_url = vars.required("TIDINGS_FOLLOW_GRAPH_URL")?;
        let feed_store_url = vars.required("TIDINGS_FEED_STORE_URL")?;

        let listen_addr = vars.parse_or(
            "TIDINGS_LISTEN_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
            "must be a valid socket address",
        )?;
        let db_path = vars
            .get("TIDINGS_DB_PATH")
            .unwrap_or_else(|| "./tidings.redb".to_string())
            .into();

        let call_timeout = Duration::from_millis(vars.parse_or(
            "TIDINGS_CALL_TIMEOUT_MS",
            2_000u64,
            "must be a number of milliseconds",
        )?);

        let fan_out_defaults = FanOutSettings::default();
        let fan_out = FanOutSettings {
            celebrity_threshold: vars.parse_or(
                "TIDINGS_CELEBRITY_THRESHOLD",
                fan_out_defaults.celebrity_threshold,
                "must be a follower count",
            )?,
            batch_size: vars.positive(
                "TIDINGS_FANOUT_BATCH_SIZE",
                fan_out_defaults.batch_size,
            )?,
            batch_delay: Duration::from_millis(vars.parse_or(
                "TIDINGS_FANOUT_BATCH_DELAY_MS",
                10u64,
                "must be a number of milliseconds",
            )?),
            call_timeout,
            ..fan_out_defaults
        };

        let timeline_defaults = TimelineSettings::default();
        let timeline = TimelineSettings {
            max_items: vars.parse_or(
                "TIDINGS_MAX_ITEMS",
                timeline_defaults.max_items,
                "must be an entry count",
            )?,
            max_day_range: vars.positive(
                "TIDINGS_MAX_DAY_RANGE",
                timeline_defaults.max_day_range,
            )?,
            call_timeout,
            ..timeline_defaults
        };

        let delivery = DeliveryPolicy {
            max_deliveries: vars.positive(
                "TIDINGS_MAX_DELIVERIES",
                DeliveryPolicy::default().max_deliveries,
            )?,
            queue_capacity: vars.positive(
                "TIDINGS_QUEUE_CAPACITY",
                DeliveryPolicy::default().queue_capacity,
            )?,
            ..DeliveryPolicy::default()
        };

        let trim_interval = Duration::from_secs(vars.positive(
            "TIDINGS_TRIM_INTERVAL_SECS",
            86_400u64,
        )?);

        Ok(Config {
            listen_addr,
            db_path,
            follow_graph_url,
            feed_store_url,
            fan_out,
            timeline,
            delivery,
            trim_interval,
        })
    }

    /// Create a test configuration.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            db_path: PathBuf::from("/tmp/tidings-test.redb"),
            follow_graph_url: "http://127.0.0.1:8081".to_string(),
            feed_store_url: "http://127.0.0.1:8082".to_string(),
            fan_out: FanOutSettings::default(),
            timeline: TimelineSettings::default(),
            delivery: DeliveryPolicy::default(),
            trim_interval: Duration::from_secs(86_400),
        }
    }
}

struct Vars<L>(L);

impl<L: Fn(&str) -> Option<String>> Vars<L> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T: FromStr>(
        &self,
        key: &'static str,
        default: T,
        hint: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, hint)),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parse_or(key, default, "must be a positive number")?;
        if value <= T::default() {
            return Err(ConfigError::Invalid(key, "must be greater than zero"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TIDINGS_FOLLOW_GRAPH_URL", "http://users:8080"),
        ("TIDINGS_FEED_STORE_URL", "http://feeds:8080"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("./tidings.redb"));
        assert_eq!(config.fan_out.celebrity_threshold, 10_000);
        assert_eq!(config.fan_out.batch_size, 100);
        assert_eq!(config.fan_out.batch_delay, Duration::from_millis(10));
        assert_eq!(config.timeline.max_items, 50);
        assert_eq!(config.timeline.max_day_range, 3);
        assert_eq!(config.delivery.max_deliveries, 5);
        assert_eq!(config.delivery.queue_capacity, 1024);
        assert_eq!(config.trim_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("TIDINGS_CELEBRITY_THRESHOLD", "500"),
            ("TIDINGS_FANOUT_BATCH_SIZE", "25"),
            ("TIDINGS_CALL_TIMEOUT_MS", "750"),
            ("TIDINGS_MAX_DAY_RANGE", "7"),
            ("TIDINGS_QUEUE_CAPACITY", "32"),
        ]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.fan_out.celebrity_threshold, 500);
        assert_eq!(config.fan_out.batch_size, 25);
        assert_eq!(config.fan_out.call_timeout, Duration::from_millis(750));
        assert_eq!(config.timeline.call_timeout, Duration::from_millis(750));
        assert_eq!(config.timeline.max_day_range, 7);
        assert_eq!(config.delivery.queue_capacity, 32);
    }

    #[test]
    fn test_missing_service_url() {
        let result = load(&REQUIRED[..1]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::Missing("TIDINGS_FEED_STORE_URL")
        );
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TIDINGS_FANOUT_BATCH_SIZE", "0"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid("TIDINGS_FANOUT_BATCH_SIZE", _))
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TIDINGS_CELEBRITY_THRESHOLD", "lots"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid("TIDINGS_CELEBRITY_THRESHOLD", _))
        ));
    }

    #[test]
    fn test_for_testing_is_consistent() {
        let config = Config::for_testing();
        assert_eq!(config.timeline.default_page_size, 30);
    }
}
