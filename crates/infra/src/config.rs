//! Pipeline configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use loglens_ai::MAX_EXPLAIN_BATCH;

/// Tunables for chunking, sub-batching, and progress broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Max bytes per chunk (line-aligned).
    pub chunk_bytes: usize,
    /// Lines per sub-batch.
    pub sub_batch_lines: usize,
    /// Per-chunk ceiling on anomalies forwarded to explanation.
    pub anomaly_cap: usize,
    /// Explanation micro-batch size, within `1..=MAX_EXPLAIN_BATCH`.
    pub explain_batch: usize,
    /// Delay after each sub-batch.
    pub throttle: Duration,
    /// Lifetime of the cached job state.
    pub state_ttl: Duration,
    /// Subscription liveness tick.
    pub poll_interval: Duration,
    pub max_upload_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 1024 * 1024,
            sub_batch_lines: 50,
            anomaly_cap: 100,
            explain_batch: MAX_EXPLAIN_BATCH,
            throttle: Duration::from_millis(50),
            state_ttl: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(100),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Read `LOGLENS_*` variables, keeping the default for unset or unparseable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            chunk_bytes: read(&lookup, "LOGLENS_CHUNK_BYTES", d.chunk_bytes).max(1),
            sub_batch_lines: read(&lookup, "LOGLENS_SUB_BATCH_LINES", d.sub_batch_lines).max(1),
            anomaly_cap: read(&lookup, "LOGLENS_ANOMALY_CAP", d.anomaly_cap),
            explain_batch: read(&lookup, "LOGLENS_EXPLAIN_BATCH", d.explain_batch)
                .clamp(1, MAX_EXPLAIN_BATCH),
            throttle: Duration::from_millis(read(&lookup, "LOGLENS_THROTTLE_MS", 50)),
            state_ttl: Duration::from_secs(read(&lookup, "LOGLENS_STATE_TTL_SECS", 3600)),
            poll_interval: Duration::from_millis(read(&lookup, "LOGLENS_POLL_MS", 100u64).max(1)),
            max_upload_bytes: read(&lookup, "LOGLENS_MAX_UPLOAD_BYTES", d.max_upload_bytes),
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_sub_batch_lines(mut self, lines: usize) -> Self {
        self.sub_batch_lines = lines.max(1);
        self
    }

    pub fn with_anomaly_cap(mut self, cap: usize) -> Self {
        self.anomaly_cap = cap;
        self
    }

    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }
}

fn read<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "unparseable config value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(PipelineConfig::from_lookup(|_| None), PipelineConfig::default());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("LOGLENS_SUB_BATCH_LINES", "10"),
            ("LOGLENS_ANOMALY_CAP", "not-a-number"),
            ("LOGLENS_THROTTLE_MS", "0"),
        ]));
        assert_eq!(cfg.sub_batch_lines, 10);
        assert_eq!(cfg.anomaly_cap, 100);
        assert_eq!(cfg.throttle, Duration::ZERO);
    }

    #[test]
    fn explain_batch_is_clamped() {
        let cfg = PipelineConfig::from_lookup(lookup(&[("LOGLENS_EXPLAIN_BATCH", "50")]));
        assert_eq!(cfg.explain_batch, MAX_EXPLAIN_BATCH);
        let cfg = PipelineConfig::from_lookup(lookup(&[("LOGLENS_EXPLAIN_BATCH", "0")]));
        assert_eq!(cfg.explain_batch, 1);
    }
}
