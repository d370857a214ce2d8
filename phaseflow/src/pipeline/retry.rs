//! Retry and escalation policy for unit attempts.
//!
//! Per attempt the policy moves a unit from RUNNING to one of SUCCEEDED,
//! RETRY, ESCALATE, SKIPPED or FATAL. Escalation tries, in order:
//! regeneration from the upstream source of truth (once per unit), a
//! conservative default, and finally skipping the unit.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::{Outcome, OutcomeKind, Remedy, Unit};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum executor invocations per unit, excluding an upstream regeneration.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds. Zero retries immediately.
    #[serde(default)]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Which escalation tiers are enabled, plus configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Allow one regeneration from the upstream source of truth.
    #[serde(default = "default_true")]
    pub defer_to_upstream: bool,
    /// Allow substituting a documented default.
    #[serde(default = "default_true")]
    pub conservative_default: bool,
    /// Defaults keyed by unit kind.
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            defer_to_upstream: true,
            conservative_default: true,
            defaults: HashMap::new(),
        }
    }
}

impl EscalationConfig {
    /// Registers a default for a unit kind.
    #[must_use]
    pub fn with_default(mut self, kind: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(kind.into(), value);
        self
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// The unit is done.
    Succeeded,
    /// Invoke the executor again after the delay.
    Retry(Duration),
    /// Invoke once more, regenerating from the named source of truth.
    RegenerateFromUpstream(String),
    /// Record the default and complete the unit.
    SucceededWithDefault {
        /// The substituted value.
        value: serde_json::Value,
        /// Where the default came from.
        description: String,
    },
    /// Mark the unit skipped.
    Skip(String),
    /// Mark the unit failed. `absorbed` means the phase may still complete.
    Fatal {
        /// Whether the unit was independently skippable.
        absorbed: bool,
    },
}

/// Decides the next step for a unit given its latest outcome.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    escalation: EscalationConfig,
    previous_delays: Mutex<HashMap<String, u64>>,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(config: RetryConfig, escalation: EscalationConfig) -> Self {
        Self {
            config,
            escalation,
            previous_delays: Mutex::new(HashMap::new()),
        }
    }

    /// Decides what happens after `outcome`.
    ///
    /// `unit.attempt_count` must already include the attempt that produced
    /// the outcome.
    #[must_use]
    pub fn decide(&self, unit: &Unit, outcome: &Outcome) -> RetryDecision {
        match outcome.kind {
            OutcomeKind::Success => RetryDecision::Succeeded,
            OutcomeKind::Fatal => RetryDecision::Fatal {
                absorbed: unit.skippable,
            },
            OutcomeKind::Recoverable => {
                let regular_attempts = unit.attempt_count.saturating_sub(u32::from(unit.upstream_used));
                if regular_attempts < self.config.max_attempts && !unit.upstream_used {
                    RetryDecision::Retry(self.calculate_delay(&unit.id, regular_attempts))
                } else {
                    self.escalate(unit, outcome)
                }
            }
        }
    }

    fn escalate(&self, unit: &Unit, outcome: &Outcome) -> RetryDecision {
        if self.escalation.defer_to_upstream && !unit.upstream_used {
            if let Some(Remedy::DeferToUpstream { source }) = &outcome.remedy {
                return RetryDecision::RegenerateFromUpstream(source.clone());
            }
        }

        if self.escalation.conservative_default {
            if let Some(Remedy::UseDefault { value, description }) = &outcome.remedy {
                return RetryDecision::SucceededWithDefault {
                    value: value.clone(),
                    description: description.clone(),
                };
            }
            if let Some(value) = self.escalation.defaults.get(&unit.kind) {
                return RetryDecision::SucceededWithDefault {
                    value: value.clone(),
                    description: format!("configured default for kind '{}'", unit.kind),
                };
            }
        }

        RetryDecision::Skip(format!(
            "escalation exhausted after {} attempts: {}",
            unit.attempt_count,
            outcome.diagnostic_or_default()
        ))
    }

    /// Calculates the delay before the retry following `attempt` (1-based).
    #[must_use]
    pub fn calculate_delay(&self, key: &str, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let max = self.config.max_delay_ms;
        let exponent = attempt.saturating_sub(1);

        let delay = match self.config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)).min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let mut previous = self.previous_delays.lock();
                let prev = previous.get(key).copied().unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let new_delay = if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                previous.insert(key.to_string(), new_delay);
                new_delay
            }
        };

        Duration::from_millis(jittered)
    }
}
