use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{FetchError, Result};

const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_MAX_DELAY_SECS: f64 = 30.0;

/// Largest number of retries a schedule may describe.
pub const MAX_RETRIES: usize = 100;

/// How a retry schedule is described. Delays are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrySpec {
    /// One delay per retry.
    Delays(Vec<f64>),
    /// Compact `<strategy>:<base>:<count>` form, e.g. `exp:0.2:3`.
    Shorthand(String),
    /// Retry count plus a backoff shape.
    Backoff(Backoff),
}

/// Growth curve of a [`Backoff`] schedule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * factor^(attempt - 1)`
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base` for every attempt.
    Fixed,
}

impl FromStr for BackoffStrategy {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exp" | "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            "fixed" | "constant" => Ok(Self::Fixed),
            other => Err(FetchError::Config(format!(
                "unknown backoff strategy '{other}'"
            ))),
        }
    }
}

/// Computed schedule description. Every delay is capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub retries: usize,
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Base delay in seconds.
    pub base: f64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Upper bound for any single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_factor() -> f64 {
    DEFAULT_FACTOR
}

fn default_max_delay() -> f64 {
    DEFAULT_MAX_DELAY_SECS
}

impl Backoff {
    /// `base * factor^n` delays, factor 2 by default.
    pub fn exponential(retries: usize, base: f64) -> Self {
        Self {
            retries,
            strategy: BackoffStrategy::Exponential,
            base,
            factor: DEFAULT_FACTOR,
            max_delay: DEFAULT_MAX_DELAY_SECS,
        }
    }

    /// `base * n` delays.
    pub fn linear(retries: usize, base: f64) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            ..Self::exponential(retries, base)
        }
    }

    /// Growth factor for exponential backoff. Must be at least 1.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Cap in seconds for any single delay.
    pub fn max_delay(mut self, max_delay: f64) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn delays(&self) -> Result<Vec<f64>> {
        check_delay("backoff base", self.base)?;
        check_delay("backoff max_delay", self.max_delay)?;
        check_retry_count(self.retries)?;
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(FetchError::Config(format!(
                "backoff factor must be >= 1, got {}",
                self.factor
            )));
        }
        let delays = (1..=self.retries)
            .map(|attempt| {
                let raw = match self.strategy {
                    BackoffStrategy::Exponential => {
                        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
                        self.base * self.factor.powi(exponent)
                    }
                    BackoffStrategy::Linear => self.base * attempt as f64,
                    BackoffStrategy::Fixed => self.base,
                };
                raw.min(self.max_delay)
            })
            .collect();
        Ok(delays)
    }
}

impl RetrySpec {
    /// Resolves the description into a concrete schedule.
    ///
    /// Malformed input is a configuration error.
    pub fn resolve(&self) -> Result<RetrySchedule> {
        let delays = match self {
            Self::Delays(delays) => {
                check_retry_count(delays.len())?;
                for delay in delays {
                    check_delay("retry delay", *delay)?;
                }
                delays.clone()
            }
            Self::Shorthand(text) => parse_shorthand(text)?.delays()?,
            Self::Backoff(backoff) => backoff.delays()?,
        };
        Ok(RetrySchedule {
            delays: Arc::from(delays),
        })
    }
}

fn check_delay(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FetchError::Config(format!(
            "{what} must be a non-negative number of seconds, got {value}"
        )))
    }
}

fn check_retry_count(retries: usize) -> Result<()> {
    if retries <= MAX_RETRIES {
        Ok(())
    } else {
        Err(FetchError::Config(format!(
            "retry count must be at most {MAX_RETRIES}, got {retries}"
        )))
    }
}

fn parse_shorthand(text: &str) -> Result<Backoff> {
    let invalid = || {
        FetchError::Config(format!(
            "invalid retry shorthand '{text}', expected <strategy>:<base-seconds>:<count>"
        ))
    };
    let mut parts = text.trim().split(':');
    let (Some(strategy), Some(base), Some(count), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let strategy = strategy.parse::<BackoffStrategy>()?;
    let base = base.trim().parse::<f64>().map_err(|_| invalid())?;
    let retries = count.trim().parse::<usize>().map_err(|_| invalid())?;
    Ok(Backoff {
        strategy,
        ..Backoff::exponential(retries, base)
    })
}

impl From<Vec<f64>> for RetrySpec {
    fn from(delays: Vec<f64>) -> Self {
        Self::Delays(delays)
    }
}

impl<const N: usize> From<[f64; N]> for RetrySpec {
    fn from(delays: [f64; N]) -> Self {
        Self::Delays(delays.into())
    }
}

impl From<&str> for RetrySpec {
    fn from(text: &str) -> Self {
        Self::Shorthand(text.to_owned())
    }
}

impl From<Backoff> for RetrySpec {
    fn from(backoff: Backoff) -> Self {
        Self::Backoff(backoff)
    }
}

/// Resolved, immutable delay sequence in seconds, one entry per retry.
#[derive(Clone, Default, PartialEq)]
pub struct RetrySchedule {
    delays: Arc<[f64]>,
}

impl RetrySchedule {
    /// Number of retries, not counting the first attempt.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: usize) -> Option<f64> {
        self.delays.get(attempt).copied()
    }

    /// Delays in seconds.
    pub fn as_slice(&self) -> &[f64] {
        &self.delays
    }
}

impl fmt::Debug for RetrySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.delays.iter()).finish()
    }
}
