use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use rand::Rng;

use crate::{
    budget::RetryBudget, error::BoxError, AbortSignal, BindScope, BudgetConfig, Context,
    FetchError, Handler, Headers, Layer, Policy, RequestFailure, RequestOptions, Response, Result,
    RetrySchedule, RetrySpec, Route,
};

/// Decides whether a failed attempt is retried. Receives the zero-based
/// attempt number.
pub type RetryPredicate = Arc<dyn Fn(&RequestFailure, usize) -> bool + Send + Sync>;

/// Maps a delay in seconds to a jittered delay. Errors fall back to the
/// un-jittered delay.
pub type JitterFn = Arc<dyn Fn(f64, usize) -> std::result::Result<f64, BoxError> + Send + Sync>;

/// Upper bound for a single inter-attempt delay, whatever the schedule or
/// `Retry-After` asks for.
pub const MAX_RETRY_DELAY_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Randomization applied to each retry delay.
#[derive(Clone)]
pub enum Jitter {
    None,
    /// Uniform in `delay * (1 ± ratio)`.
    Ratio(f64),
    Custom(JitterFn),
}

impl fmt::Debug for Jitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Ratio(ratio) => f.debug_tuple("Ratio").field(ratio).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Re-invokes the inner pipeline after retryable failures.
///
/// Only idempotent methods are retried unless
/// [`RetryPolicy::allow_non_idempotent`] is set. Cancellations and errors
/// that are not [`RequestFailure`]s are never retried. When retries run
/// out, the last failure is returned as is.
#[derive(Clone)]
pub struct RetryPolicy {
    schedule: RetrySpec,
    allow_non_idempotent: bool,
    predicate: Option<RetryPredicate>,
    jitter: Jitter,
    budget: Option<BudgetConfig>,
    attempt_timeout_ms: Option<u64>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("schedule", &self.schedule)
            .field("allow_non_idempotent", &self.allow_non_idempotent)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("jitter", &self.jitter)
            .field("budget", &self.budget)
            .field("attempt_timeout_ms", &self.attempt_timeout_ms)
            .finish()
    }
}

impl RetryPolicy {
    /// Retries with `schedule`: a delay list, a shorthand such as `"exp:0.2:3"`,
    /// or a [`Backoff`](crate::Backoff).
    pub fn new(schedule: impl Into<RetrySpec>) -> Self {
        Self {
            schedule: schedule.into(),
            allow_non_idempotent: false,
            predicate: None,
            jitter: Jitter::None,
            budget: None,
            attempt_timeout_ms: None,
        }
    }

    /// Policy that only retries when a call supplies its own schedule.
    pub fn disabled() -> Self {
        Self::new(RetrySpec::Delays(Vec::new()))
    }

    /// Also retry methods that are not idempotent, such as `POST`.
    pub fn allow_non_idempotent(mut self, allow: bool) -> Self {
        self.allow_non_idempotent = allow;
        self
    }

    /// Replaces the default retryability rule.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestFailure, usize) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Spreads each delay uniformly within `delay * (1 ± ratio)`.
    ///
    /// `ratio` must be within `[0, 1]`.
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter = Jitter::Ratio(ratio);
        self
    }

    /// Custom jitter. Errors and invalid results fall back to the base delay.
    pub fn jitter_fn<F>(mut self, jitter: F) -> Self
    where
        F: Fn(f64, usize) -> std::result::Result<f64, BoxError> + Send + Sync + 'static,
    {
        self.jitter = Jitter::Custom(Arc::new(jitter));
        self
    }

    /// Shares a token bucket across every call made through the client.
    pub fn budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Timeout injected into each attempt when the call has none.
    pub fn attempt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout_ms);
        self
    }
}

impl<C: Context> Policy<C> for RetryPolicy {
    fn kind(&self) -> &'static str {
        "retry"
    }

    fn install(&self) -> Result<Arc<dyn Layer<C>>> {
        let schedule = self.schedule.resolve()?;
        if let Jitter::Ratio(ratio) = self.jitter {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(FetchError::Config(format!(
                    "jitter ratio must be within [0, 1], got {ratio}"
                )));
            }
        }
        if let Some(budget) = &self.budget {
            budget.validate()?;
        }
        Ok(Arc::new(RetryLayer {
            settings: Arc::new(RetrySettings {
                schedule,
                allow_non_idempotent: self.allow_non_idempotent,
                predicate: self.predicate.clone(),
                jitter: self.jitter.clone(),
                budget: self.budget,
                attempt_timeout_ms: self.attempt_timeout_ms,
            }),
            budget: OnceLock::new(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RetrySettings {
    schedule: RetrySchedule,
    allow_non_idempotent: bool,
    predicate: Option<RetryPredicate>,
    jitter: Jitter,
    budget: Option<BudgetConfig>,
    attempt_timeout_ms: Option<u64>,
}

struct RetryLayer {
    settings: Arc<RetrySettings>,
    /// Created on first bind, then shared by every bound client.
    budget: OnceLock<Arc<RetryBudget>>,
}

impl<C: Context> Layer<C> for RetryLayer {
    fn wrap(&self, next: Arc<dyn Handler>, _scope: &BindScope<C>) -> Arc<dyn Handler> {
        let budget = self.settings.budget.map(|config| {
            Arc::clone(
                self.budget
                    .get_or_init(|| Arc::new(RetryBudget::new(config))),
            )
        });
        Arc::new(RetryHandler {
            next,
            settings: Arc::clone(&self.settings),
            budget,
        })
    }
}

struct RetryHandler {
    next: Arc<dyn Handler>,
    settings: Arc<RetrySettings>,
    budget: Option<Arc<RetryBudget>>,
}

impl RetryHandler {
    async fn run(&self, route: &Route, options: RequestOptions) -> Result<Response> {
        let options = match (options.timeout_ms, self.settings.attempt_timeout_ms) {
            (None, Some(timeout_ms)) => RequestOptions {
                timeout_ms: Some(timeout_ms),
                ..options
            },
            _ => options,
        };

        if !route.is_idempotent() && !self.settings.allow_non_idempotent {
            return self.next.handle(route, options).await;
        }

        let schedule = match &options.retries {
            Some(spec) => spec.resolve()?,
            None => self.settings.schedule.clone(),
        };
        if schedule.is_empty() {
            return self.next.handle(route, options).await;
        }

        let mut attempt = 0;
        loop {
            let err = match self.next.handle(route, options.clone()).await {
                Ok(response) => {
                    if let Some(budget) = &self.budget {
                        budget.refill();
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            let FetchError::Request(failure) = &err else {
                return Err(err);
            };
            if !self.is_retryable(failure, attempt) || attempt >= schedule.len() {
                return Err(err);
            }
            if let Some(budget) = &self.budget {
                if !budget.try_consume() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(route = %route, attempt, "retry budget exhausted");
                    return Err(err);
                }
            }

            let base_delay = retry_after_secs(failure)
                .or_else(|| schedule.delay(attempt))
                .unwrap_or_default()
                .min(MAX_RETRY_DELAY_SECS);
            let delay = self.jittered(base_delay, attempt);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                route = %route,
                attempt,
                status = failure.status(),
                delay_ms = (delay * 1_000.0) as u64,
                budget_tokens = self.budget.as_ref().map(|budget| budget.tokens()),
                "retrying request"
            );

            let pause = Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX);
            sleep_or_abort(pause, options.signal.as_ref()).await?;
            attempt += 1;
        }
    }

    fn is_retryable(&self, failure: &RequestFailure, attempt: usize) -> bool {
        match &self.settings.predicate {
            Some(predicate) => predicate(failure, attempt),
            None => default_retryable(failure.status()),
        }
    }

    fn jittered(&self, delay: f64, attempt: usize) -> f64 {
        apply_jitter(&self.settings.jitter, delay, attempt)
    }
}

impl Handler for RetryHandler {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(self.run(route, options))
    }
}

/// Network failures, 429 and 5xx are retried by default.
pub fn default_retryable(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(status) => status == 429 || status >= 500,
    }
}

fn apply_jitter(jitter: &Jitter, delay: f64, attempt: usize) -> f64 {
    let jittered = match jitter {
        Jitter::None => return delay,
        Jitter::Ratio(ratio) if *ratio <= f64::EPSILON || delay <= 0.0 => return delay,
        Jitter::Ratio(ratio) => {
            let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            delay * (1.0 + ratio * offset)
        }
        Jitter::Custom(jitter) => match jitter(delay, attempt) {
            Ok(value) => value,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "jitter function failed, using base delay");
                return delay;
            }
        },
    };
    if jittered.is_finite() && jittered >= 0.0 {
        jittered
    } else {
        delay
    }
}

/// Server-requested delay for 429 and 503 responses.
fn retry_after_secs(failure: &RequestFailure) -> Option<f64> {
    let response = failure.response()?;
    if !matches!(response.status, 429 | 503) {
        return None;
    }
    parse_retry_after(&response.headers, SystemTime::now())
}

/// Parses `Retry-After` as whole delta-seconds or an HTTP-date.
pub(crate) fn parse_retry_after(headers: &Headers, now: SystemTime) -> Option<f64> {
    let raw = headers.first("retry-after")?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds as f64);
    }
    let date = httpdate::parse_http_date(raw).ok()?;
    Some(
        date.duration_since(now)
            .map(|remaining| remaining.as_secs_f64())
            .unwrap_or(0.0),
    )
}

async fn sleep_or_abort(delay: Duration, signal: Option<&AbortSignal>) -> Result<()> {
    match signal {
        Some(signal) => {
            if signal.is_aborted() {
                return Err(FetchError::aborted());
            }
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(FetchError::aborted()),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}
