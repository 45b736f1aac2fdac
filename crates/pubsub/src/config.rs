//! Subscription manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How channels built from bare names are classified
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDetection {
    /// Names containing `*` become pattern channels
    #[default]
    Auto,

    /// Every bare name is a literal channel
    Disabled,
}

/// Subscription manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Classification of channels built with [`Subscriber::channel`](crate::Subscriber::channel)
    pub pattern_detection: PatternDetection,

    /// How long `close` waits for the listener task before aborting it
    pub shutdown_timeout: Duration,

    /// Worker threads of the runtime owned by the blocking API
    pub worker_threads: usize,

    /// Thread name of the runtime owned by the blocking API
    pub thread_name: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            pattern_detection: PatternDetection::Auto,
            shutdown_timeout: Duration::from_secs(1),
            worker_threads: 10,
            thread_name: "kvmux-pubsub".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PubSubConfig =
            serde_json::from_str(r#"{"pattern_detection":"disabled"}"#).unwrap();

        assert_eq!(config.pattern_detection, PatternDetection::Disabled);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.worker_threads, 10);
    }

    #[test]
    fn test_empty_config() {
        let config: PubSubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PubSubConfig::default());
    }
}
