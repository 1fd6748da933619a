//! Gateway configuration.

use serde::Deserialize;
use std::time::Duration;

/// Timeouts applied by the HTTP connector to every backend call.
///
/// Durations deserialize from humantime strings ("30s", "1500ms").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Budget for connecting and receiving the response head.
    #[serde(deserialize_with = "humantime_duration")]
    pub connect_timeout: Duration,
    /// Budget for each individual response body read.
    #[serde(deserialize_with = "humantime_duration")]
    pub read_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
        }
    }
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_thirty_seconds() {
        let config = ConnectorConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn deserializes_humantime_strings() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"connect_timeout":"5s","read_timeout":"1500ms"}"#).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ConnectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }
}
