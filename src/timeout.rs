use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;

use crate::{
    error::BoxError, BindScope, Context, FetchError, Handler, Layer, Policy, RequestOptions,
    Response, Result, Route,
};

/// Default header carrying the propagated deadline.
pub const DEADLINE_HEADER: &str = "x-request-deadline";

/// Epoch-millisecond clock.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Extracts a deadline (epoch ms) from the bind context. Errors are treated
/// as "no deadline".
pub type DeadlineResolver<C> =
    Arc<dyn Fn(&C) -> std::result::Result<Option<u64>, BoxError> + Send + Sync>;

/// How the propagated deadline is written on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeadlineMode {
    /// Absolute deadline in epoch milliseconds.
    Absolute,
    /// Milliseconds remaining at send time.
    Relative,
}

/// Where and how the deadline is propagated downstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeadlineHeader {
    pub name: String,
    pub mode: DeadlineMode,
    /// Keep a value the caller already set.
    pub respect_existing: bool,
}

impl DeadlineHeader {
    /// Uses the [`DEADLINE_HEADER`] name and keeps caller-set values.
    pub fn new(mode: DeadlineMode) -> Self {
        Self {
            name: DEADLINE_HEADER.to_owned(),
            mode,
            respect_existing: true,
        }
    }

    /// Overrides the header name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into().to_ascii_lowercase();
        self
    }

    /// When `false`, the computed value replaces a caller-set header.
    pub fn respect_existing(mut self, respect: bool) -> Self {
        self.respect_existing = respect;
        self
    }
}

/// Per-call deadline arithmetic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeadlineComputation {
    /// Absolute deadline in epoch ms.
    pub deadline_ms: Option<u64>,
    /// Milliseconds left before the deadline, floored at the minimum
    /// timeout.
    pub remaining_ms: Option<u64>,
    /// Timeout handed to the next layer. `None` means no timeout.
    pub effective_timeout_ms: Option<u64>,
}

impl DeadlineComputation {
    /// Clamps `base_timeout_ms` to the time left before `deadline_ms`.
    ///
    /// Fails with a cancellation when the deadline has already passed.
    pub fn compute(
        base_timeout_ms: Option<u64>,
        deadline_ms: Option<u64>,
        now_ms: u64,
        min_timeout_ms: u64,
    ) -> Result<Self> {
        let Some(deadline) = deadline_ms else {
            return Ok(Self {
                deadline_ms: None,
                remaining_ms: None,
                effective_timeout_ms: base_timeout_ms,
            });
        };
        if deadline <= now_ms {
            return Err(FetchError::deadline_exceeded());
        }
        let remaining = (deadline - now_ms).max(min_timeout_ms);
        let effective = match base_timeout_ms {
            Some(base) => base.min(remaining),
            None => remaining,
        };
        Ok(Self {
            deadline_ms: Some(deadline),
            remaining_ms: Some(remaining),
            effective_timeout_ms: Some(effective),
        })
    }
}

/// Computes the effective per-call timeout from a default, the bind
/// context's deadline and the call's own timeout.
///
/// This policy never cancels anything itself; it only sets `timeout_ms`
/// (and optionally a propagation header) for the layers below.
pub struct TimeoutPolicy<C> {
    default_timeout_ms: Option<u64>,
    propagate_deadline: bool,
    deadline_resolver: Option<DeadlineResolver<C>>,
    min_timeout_ms: u64,
    header: Option<DeadlineHeader>,
    clock: Clock,
}

impl<C> Clone for TimeoutPolicy<C> {
    fn clone(&self) -> Self {
        Self {
            default_timeout_ms: self.default_timeout_ms,
            propagate_deadline: self.propagate_deadline,
            deadline_resolver: self.deadline_resolver.clone(),
            min_timeout_ms: self.min_timeout_ms,
            header: self.header.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C> fmt::Debug for TimeoutPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("propagate_deadline", &self.propagate_deadline)
            .field("min_timeout_ms", &self.min_timeout_ms)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<C: Context> Default for TimeoutPolicy<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Context> TimeoutPolicy<C> {
    /// No default timeout. Deadlines come from [`Context::deadline_ms`].
    pub fn new() -> Self {
        Self {
            default_timeout_ms: None,
            propagate_deadline: true,
            deadline_resolver: None,
            min_timeout_ms: 1,
            header: None,
            clock: Arc::new(system_now_ms),
        }
    }

    /// Timeout applied when neither the call nor the bind config sets one.
    pub fn default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    /// Disables deadline handling entirely when `false`.
    pub fn propagate_deadline(mut self, propagate: bool) -> Self {
        self.propagate_deadline = propagate;
        self
    }

    /// Reads the deadline from the context with `resolver` instead of
    /// [`Context::deadline_ms`]. Resolver errors mean "no deadline".
    pub fn deadline_from<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&C) -> std::result::Result<Option<u64>, BoxError> + Send + Sync + 'static,
    {
        self.deadline_resolver = Some(Arc::new(resolver));
        self
    }

    /// Floor for clamped timeouts so they never reach zero.
    pub fn min_timeout_ms(mut self, min_timeout_ms: u64) -> Self {
        self.min_timeout_ms = min_timeout_ms.max(1);
        self
    }

    /// Sends the deadline downstream in a header.
    pub fn deadline_header(mut self, header: DeadlineHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Replaces the epoch-millisecond clock. Mostly useful in tests.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl<C: Context> Policy<C> for TimeoutPolicy<C> {
    fn kind(&self) -> &'static str {
        "timeout"
    }

    fn install(&self) -> Result<Arc<dyn Layer<C>>> {
        if let Some(header) = &self.header {
            if header.name.trim().is_empty() {
                return Err(FetchError::Config(
                    "deadline header name must not be empty".to_owned(),
                ));
            }
        }
        Ok(Arc::new(TimeoutLayer {
            policy: self.clone(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TimeoutLayer<C> {
    policy: TimeoutPolicy<C>,
}

impl<C: Context> Layer<C> for TimeoutLayer<C> {
    fn wrap(&self, next: Arc<dyn Handler>, scope: &BindScope<C>) -> Arc<dyn Handler> {
        Arc::new(TimeoutHandler {
            next,
            policy: self.policy.clone(),
            context: Arc::clone(&scope.context),
        })
    }
}

struct TimeoutHandler<C> {
    next: Arc<dyn Handler>,
    policy: TimeoutPolicy<C>,
    context: Arc<C>,
}

impl<C: Context> TimeoutHandler<C> {
    fn resolve_deadline(&self) -> Option<u64> {
        if !self.policy.propagate_deadline {
            return None;
        }
        match &self.policy.deadline_resolver {
            Some(resolver) => match resolver(self.context.as_ref()) {
                Ok(deadline) => deadline,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %_err, "deadline resolver failed, ignoring deadline");
                    None
                }
            },
            None => self.context.deadline_ms(),
        }
    }

    fn prepare(&self, options: RequestOptions) -> Result<RequestOptions> {
        let base_timeout_ms = options.timeout_ms.or(self.policy.default_timeout_ms);
        let now_ms = (self.policy.clock)();
        let computed = DeadlineComputation::compute(
            base_timeout_ms,
            self.resolve_deadline(),
            now_ms,
            self.policy.min_timeout_ms,
        )?;

        let mut options = RequestOptions {
            timeout_ms: computed.effective_timeout_ms,
            ..options
        };
        if let (Some(header), Some(deadline)) = (&self.policy.header, computed.deadline_ms) {
            let value = match header.mode {
                DeadlineMode::Absolute => deadline.to_string(),
                DeadlineMode::Relative => deadline.saturating_sub(now_ms).to_string(),
            };
            options = if header.respect_existing {
                options.with_default_header(&header.name, value)
            } else {
                options.header(&header.name, value)
            };
        }
        Ok(options)
    }
}

impl<C: Context> Handler for TimeoutHandler<C> {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let options = match self.prepare(options) {
                Ok(options) => options,
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(route = %route, "deadline already passed, failing fast");
                    return Err(err);
                }
            };
            self.next.handle(route, options).await
        })
    }
}
