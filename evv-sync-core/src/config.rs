use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::model::state_rules::StateRulesOverrides;

/// Runtime configuration. Loaded from the environment by the caller (the
/// demo binary does this via `clap(env = ...)`); the core itself only
/// validates and clamps.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub sync_interval: Duration,
    pub queue_max_retries: u32,
    pub queue_base_delay: Duration,
    pub queue_max_delay: Duration,
    pub clock_skew_tolerance: Duration,
    pub state_rules_overrides: Option<StateRulesOverrides>,
}

impl Config {
    pub fn new(api_base_url: impl Into<String>) -> CoreResult<Self> {
        let api_base_url = api_base_url.into();
        if api_base_url.trim().is_empty() {
            return Err(CoreError::Validation("API_BASE_URL is required".into()));
        }
        Ok(Self {
            api_base_url,
            sync_interval: Duration::from_millis(60_000),
            queue_max_retries: 5,
            queue_base_delay: Duration::from_millis(1_000),
            queue_max_delay: Duration::from_millis(300_000),
            clock_skew_tolerance: Duration::from_secs(300),
            state_rules_overrides: None,
        })
    }

    pub fn with_sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_queue_retries(mut self, max_retries: u32, base_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms.max(1);
        let base_ms = base_ms.max(1).min(max_ms);
        if base_ms != max_ms && base_ms > max_ms {
            tracing::warn!(base_ms, max_ms, "queue base delay > max delay; clamping");
        }
        self.queue_max_retries = max_retries;
        self.queue_base_delay = Duration::from_millis(base_ms);
        self.queue_max_delay = Duration::from_millis(max_ms);
        self
    }

    pub fn with_clock_skew_tolerance_s(mut self, secs: u64) -> Self {
        self.clock_skew_tolerance = Duration::from_secs(secs);
        self
    }

    pub fn with_state_rules_overrides_json(mut self, json: &str) -> CoreResult<Self> {
        let overrides: StateRulesOverrides = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("invalid STATE_RULES_OVERRIDES: {e}")))?;
        self.state_rules_overrides = Some(overrides);
        Ok(self)
    }

    /// Reads the documented environment variables, applying the same
    /// defaults-and-clamp discipline as the builder methods above.
    pub fn from_env() -> CoreResult<Self> {
        let base = std::env::var("API_BASE_URL")
            .map_err(|_| CoreError::Validation("API_BASE_URL is required".into()))?;
        let mut cfg = Config::new(base)?;

        if let Ok(v) = std::env::var("SYNC_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg = cfg.with_sync_interval_ms(ms);
            }
        }
        let max_retries = std::env::var("QUEUE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let base_delay = std::env::var("QUEUE_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);
        let max_delay = std::env::var("QUEUE_MAX_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300_000);
        cfg = cfg.with_queue_retries(max_retries, base_delay, max_delay);

        if let Ok(v) = std::env::var("CLOCK_SKEW_TOLERANCE_S") {
            if let Ok(s) = v.parse::<u64>() {
                cfg = cfg.with_clock_skew_tolerance_s(s);
            }
        }
        if let Ok(json) = std::env::var("STATE_RULES_OVERRIDES") {
            cfg = cfg.with_state_rules_overrides_json(&json)?;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_base_url() {
        assert!(Config::new("").is_err());
    }

    #[test]
    fn clamps_base_delay_to_max() {
        let cfg = Config::new("https://api.example.com")
            .unwrap()
            .with_queue_retries(5, 999_000, 300_000);
        assert_eq!(cfg.queue_base_delay, Duration::from_millis(300_000));
    }
}
