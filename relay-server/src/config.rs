use crate::errors::config_error::ConfigError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::{env, net::IpAddr, str::FromStr, time::Duration};

pub struct RelayConfig {
    pub database_url: String,
    pub notify_channel: String,
    pub signing_key: Vec<u8>,
    pub bind_address: IpAddr,
    pub port: u16,
    pub queue_capacity: usize,
    pub overflow_threshold: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Zero means unlimited.
    pub max_connections: usize,
    pub ping_interval: Duration,
    /// A connection with no inbound frame for this long is closed.
    pub idle_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let signing_key =
            parse_signing_key(&lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?)?;

        let notify_channel = lookup("RELAY_NOTIFY_CHANNEL")
            .unwrap_or_else(|| "realtime_events".to_string());
        if notify_channel.is_empty() {
            return Err(ConfigError::Invalid {
                key: "RELAY_NOTIFY_CHANNEL",
                value: notify_channel,
            });
        }

        let queue_capacity: usize = parse_or(&lookup, "RELAY_QUEUE_CAPACITY", 64)?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_QUEUE_CAPACITY",
                value: queue_capacity.to_string(),
            });
        }

        let overflow_threshold: u32 = parse_or(&lookup, "RELAY_OVERFLOW_THRESHOLD", 8)?;
        if overflow_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_OVERFLOW_THRESHOLD",
                value: overflow_threshold.to_string(),
            });
        }

        let backoff_initial =
            Duration::from_millis(parse_or(&lookup, "RELAY_BACKOFF_INITIAL_MS", 500)?);
        let backoff_max =
            Duration::from_millis(parse_or(&lookup, "RELAY_BACKOFF_MAX_MS", 30_000)?);
        if backoff_initial.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RELAY_BACKOFF_INITIAL_MS",
                value: "0".to_string(),
            });
        }
        if backoff_max < backoff_initial {
            return Err(ConfigError::Invalid {
                key: "RELAY_BACKOFF_MAX_MS",
                value: backoff_max.as_millis().to_string(),
            });
        }

        let ping_interval =
            Duration::from_millis(parse_or(&lookup, "RELAY_PING_INTERVAL_MS", 15_000)?);
        let idle_timeout =
            Duration::from_millis(parse_or(&lookup, "RELAY_IDLE_TIMEOUT_MS", 45_000)?);
        if ping_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RELAY_PING_INTERVAL_MS",
                value: "0".to_string(),
            });
        }
        if idle_timeout <= ping_interval {
            return Err(ConfigError::Invalid {
                key: "RELAY_IDLE_TIMEOUT_MS",
                value: idle_timeout.as_millis().to_string(),
            });
        }

        Ok(RelayConfig {
            database_url,
            notify_channel,
            signing_key,
            bind_address: parse_or(&lookup, "RELAY_BIND_ADDRESS", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(&lookup, "RELAY_PORT", 8080)?,
            queue_capacity,
            overflow_threshold,
            backoff_initial,
            backoff_max,
            max_connections: parse_or(&lookup, "RELAY_MAX_CONNECTIONS", 10_000)?,
            ping_interval,
            idle_timeout,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .or(Err(ConfigError::Invalid { key, value })),
        None => Ok(default),
    }
}

fn parse_signing_key(secret: &str) -> Result<Vec<u8>, ConfigError> {
    let key = match secret.strip_prefix("base64:") {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|error| ConfigError::InvalidSigningKey(error.to_string()))?,
        None => secret.as_bytes().to_vec(),
    };

    if key.is_empty() {
        return Err(ConfigError::InvalidSigningKey("key is empty".to_string()));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn invalid_key(pairs: &[(&str, &str)]) -> Option<&'static str> {
        match load(pairs) {
            Err(ConfigError::Invalid { key, .. }) => Some(key),
            _ => None,
        }
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://relay@localhost/app"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn applies_defaults() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.notify_channel, "realtime_events");
        assert_eq!(config.signing_key, b"secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.overflow_threshold, 8);
        assert_eq!(config.backoff_initial, Duration::from_millis(500));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
    }

    #[test]
    fn reads_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("RELAY_PORT", "9001"),
            ("RELAY_QUEUE_CAPACITY", "4"),
            ("RELAY_OVERFLOW_THRESHOLD", "2"),
            ("RELAY_NOTIFY_CHANNEL", "changes"),
            ("RELAY_BIND_ADDRESS", "127.0.0.1"),
        ]);

        let config = load(&pairs).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.overflow_threshold, 2);
        assert_eq!(config.notify_channel, "changes");
        assert_eq!(config.bind_address, IpAddr::from([127, 0, 0, 1]));
    }

    #[test]
    fn requires_database_url_and_secret() {
        assert_eq!(
            load(&[("JWT_SECRET", "secret")]).err(),
            Some(ConfigError::Missing("DATABASE_URL"))
        );
        assert_eq!(
            load(&[("DATABASE_URL", "postgres://localhost")]).err(),
            Some(ConfigError::Missing("JWT_SECRET"))
        );
    }

    #[test]
    fn decodes_base64_secret() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost"),
            ("JWT_SECRET", "base64:c2VjcmV0"),
        ])
        .unwrap();
        assert_eq!(config.signing_key, b"secret");
    }

    #[test]
    fn rejects_unparseable_secret() {
        let result = load(&[
            ("DATABASE_URL", "postgres://localhost"),
            ("JWT_SECRET", "base64:***"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidSigningKey(_))));

        let result = load(&[("DATABASE_URL", "postgres://localhost"), ("JWT_SECRET", "")]);
        assert!(matches!(result, Err(ConfigError::InvalidSigningKey(_))));
    }

    #[test]
    fn rejects_invalid_numbers() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_QUEUE_CAPACITY", "0"));
        assert_eq!(invalid_key(&pairs), Some("RELAY_QUEUE_CAPACITY"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_PORT", "eighty"));
        assert_eq!(invalid_key(&pairs), Some("RELAY_PORT"));

        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("RELAY_BACKOFF_INITIAL_MS", "1000"), ("RELAY_BACKOFF_MAX_MS", "10")]);
        assert_eq!(invalid_key(&pairs), Some("RELAY_BACKOFF_MAX_MS"));
    }

    #[test]
    fn idle_timeout_must_outlast_ping_interval() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("RELAY_PING_INTERVAL_MS", "5000"), ("RELAY_IDLE_TIMEOUT_MS", "5000")]);
        assert_eq!(invalid_key(&pairs), Some("RELAY_IDLE_TIMEOUT_MS"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_PING_INTERVAL_MS", "0"));
        assert_eq!(invalid_key(&pairs), Some("RELAY_PING_INTERVAL_MS"));

        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("RELAY_PING_INTERVAL_MS", "1000"), ("RELAY_IDLE_TIMEOUT_MS", "2500")]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_millis(2500));
    }
}
