use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f32,
}

impl BackoffConfig {
    pub const fn websocket_default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.25,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::websocket_default()
    }
}

/// Reconnect schedule for one signaling connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = compute_backoff_delay(self.config, self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub fn compute_backoff_delay(config: BackoffConfig, attempts: u32) -> Duration {
    let exponent = 2u32.saturating_pow(attempts.min(31));
    let raw_ms = config
        .base_delay
        .as_millis()
        .saturating_mul(exponent as u128)
        .min(config.max_delay.as_millis()) as u64;

    Duration::from_millis(raw_ms.saturating_add(jitter_millis(raw_ms, config.jitter_ratio)))
}

fn jitter_millis(base_ms: u64, jitter_ratio: f32) -> u64 {
    if base_ms == 0 || jitter_ratio <= 0.0 {
        return 0;
    }

    let max_jitter = (base_ms as f32 * jitter_ratio).round() as u64;
    if max_jitter == 0 {
        return 0;
    }

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    seed % (max_jitter + 1)
}
