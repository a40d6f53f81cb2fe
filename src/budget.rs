use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{FetchError, Result};

/// Absorbs rounding drift from fractional refills.
const TOLERANCE: f64 = 1e-9;

/// Token-bucket limits for retries issued by one client.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_tokens: f64,
    /// Tokens returned by each successful call.
    pub refill_on_success: f64,
    /// Tokens taken by each retry.
    pub cost_per_retry: f64,
}

impl BudgetConfig {
    /// Bucket holding `max_tokens`, spending `cost_per_retry` per retry and
    /// regaining `refill_on_success` per successful call.
    pub fn new(max_tokens: f64, refill_on_success: f64, cost_per_retry: f64) -> Self {
        Self {
            max_tokens,
            refill_on_success,
            cost_per_retry,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let fields = [
            ("max_tokens", self.max_tokens),
            ("refill_on_success", self.refill_on_success),
            ("cost_per_retry", self.cost_per_retry),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(FetchError::Config(format!(
                    "retry budget {name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_on_success: 0.1,
            cost_per_retry: 1.0,
        }
    }
}

/// Shared retry budget. Every update happens under one lock acquisition
/// with no suspension point in between.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    config: BudgetConfig,
    tokens: Mutex<f64>,
}

impl RetryBudget {
    pub(crate) fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            tokens: Mutex::new(config.max_tokens),
        }
    }

    /// Takes `cost_per_retry` tokens if available.
    pub(crate) fn try_consume(&self) -> bool {
        let mut tokens = lock_unpoisoned(&self.tokens);
        if *tokens + TOLERANCE < self.config.cost_per_retry {
            return false;
        }
        *tokens = (*tokens - self.config.cost_per_retry).max(0.0);
        true
    }

    pub(crate) fn refill(&self) {
        let mut tokens = lock_unpoisoned(&self.tokens);
        *tokens = (*tokens + self.config.refill_on_success).min(self.config.max_tokens);
    }

    #[cfg(any(test, feature = "tracing"))]
    pub(crate) fn tokens(&self) -> f64 {
        *lock_unpoisoned(&self.tokens)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
