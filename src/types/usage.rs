//! Token usage and run timing metrics.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Token usage for a model invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(v) = other.cache_read_tokens {
            *self.cache_read_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += v;
        }
    }
}

/// Per-run metrics: accumulated token usage plus wall-clock duration.
///
/// The timer is started by the dispatcher and stopped exactly once during
/// cleanup; a second stop is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metrics {
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl Metrics {
    /// Create metrics with the duration timer running.
    pub fn started() -> Self {
        Self {
            usage: Usage::default(),
            duration_ms: None,
            started: Some(Instant::now()),
        }
    }

    /// Stop the duration timer.
    pub fn stop_timer(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration_ms = Some(started.elapsed().as_millis() as u64);
        }
    }

    /// Accumulate usage from a model invocation.
    pub fn merge_usage(&mut self, usage: &Usage) {
        self.usage.merge(usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_accumulates() {
        let mut a = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Default::default()
        };
        a.merge(&Usage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
            cache_read_tokens: Some(7),
            ..Default::default()
        });
        assert_eq!(a.input_tokens, 11);
        assert_eq!(a.total_tokens, 18);
        assert_eq!(a.cache_read_tokens, Some(7));
    }

    #[test]
    fn stop_timer_is_idempotent() {
        let mut metrics = Metrics::started();
        metrics.stop_timer();
        let first = metrics.duration_ms;
        assert!(first.is_some());
        metrics.stop_timer();
        assert_eq!(metrics.duration_ms, first);
    }
}
