use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fetch_policy::{
    compose, AbortController, AuthPolicy, BindScope, BudgetConfig, ClientOptions, Context,
    DeadlineHeader, DeadlineMode, FailureKind, FetchClient, FetchError, Handler, Headers,
    HttpConfig, Layer, Policy, RequestOptions, Response, RetryPolicy, Route, TimeoutPolicy,
    Transport, TransportError, TransportRequest,
};
use futures_util::future::BoxFuture;
use serde_json::{json, Value as JsonValue};
use tokio::time::Instant;

#[derive(Clone)]
enum Step {
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: &'static str,
    },
    Fail,
    Hang,
}

impl Step {
    fn status(status: u16) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            body: "",
        }
    }

    fn body(status: u16, body: &'static str) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            body,
        }
    }

    fn with_header(status: u16, name: &'static str, value: impl Into<String>) -> Self {
        Self::Respond {
            status,
            headers: vec![(name, value.into())],
            body: "",
        }
    }
}

/// Scripted transport: pops one step per call, 500 once the script is empty.
#[derive(Clone, Default)]
struct Script {
    steps: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl Script {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    fn transport(&self) -> impl Transport {
        let script = self.clone();
        move |request: TransportRequest| {
            let script = script.clone();
            async move { script.play(request).await }
        }
    }

    async fn play(&self, request: TransportRequest) -> Result<Response, TransportError> {
        self.requests
            .lock()
            .expect("requests mutex must not be poisoned")
            .push(request);
        let step = self
            .steps
            .lock()
            .expect("steps mutex must not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Step::status(500));
        match step {
            Step::Respond {
                status,
                headers,
                body,
            } => Ok(Response::new(status, headers.into_iter().collect(), body)),
            Step::Fail => Err(TransportError::new("connection reset")),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(Response::new(200, Headers::new(), ""))
            }
        }
    }

    fn hits(&self) -> usize {
        self.requests
            .lock()
            .expect("requests mutex must not be poisoned")
            .len()
    }

    fn last_request(&self) -> TransportRequest {
        self.requests
            .lock()
            .expect("requests mutex must not be poisoned")
            .last()
            .cloned()
            .expect("at least one request must have been sent")
    }
}

fn options(script: &Script) -> ClientOptions {
    ClientOptions::new("http://svc.test").transport(script.transport())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as u64
}

type Seen = Arc<Mutex<Vec<(&'static str, RequestOptions)>>>;

/// Records the options it observes, then delegates unchanged.
#[derive(Clone)]
struct Probe {
    label: &'static str,
    seen: Seen,
}

impl Probe {
    fn new(label: &'static str, seen: &Seen) -> Self {
        Self {
            label,
            seen: Arc::clone(seen),
        }
    }
}

impl<C: Context> Policy<C> for Probe {
    fn kind(&self) -> &'static str {
        self.label
    }

    fn install(&self) -> fetch_policy::Result<Arc<dyn Layer<C>>> {
        Ok(Arc::new(self.clone()))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl<C: Context> Layer<C> for Probe {
    fn wrap(&self, next: Arc<dyn Handler>, _scope: &BindScope<C>) -> Arc<dyn Handler> {
        Arc::new(ProbeHandler {
            probe: self.clone(),
            next,
        })
    }
}

struct ProbeHandler {
    probe: Probe,
    next: Arc<dyn Handler>,
}

impl Handler for ProbeHandler {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, fetch_policy::Result<Response>> {
        self.probe
            .seen
            .lock()
            .expect("seen mutex must not be poisoned")
            .push((self.probe.label, options.clone()));
        self.next.handle(route, options)
    }
}

#[tokio::test(start_paused = true)]
async fn retry_waits_for_schedule_then_succeeds() {
    let script = Script::new([Step::status(503), Step::body(200, "ok")]);
    let client = compose::<()>()
        .with(RetryPolicy::new([1.0]))
        .build(options(&script))
        .expect("client must build");

    let started = Instant::now();
    let response = client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("second attempt must succeed");
    let elapsed = started.elapsed();

    assert_eq!(response.text(), "ok");
    assert_eq!(script.hits(), 2);
    assert!(elapsed >= Duration::from_millis(1_000), "retried too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_050), "waited too long: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn post_is_not_retried_unless_allowed() {
    let script = Script::new([Step::status(503), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(())
        .request("POST /items", RequestOptions::new())
        .await
        .expect_err("single attempt must fail");
    assert_eq!(err.status(), Some(503));
    assert_eq!(script.hits(), 1);

    let script = Script::new([Step::status(503), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]).allow_non_idempotent(true))
        .build(options(&script))
        .expect("client must build");
    client
        .bind(())
        .request("POST /items", RequestOptions::new())
        .await
        .expect("retry must succeed");
    assert_eq!(script.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn budget_caps_retries_below_schedule() {
    let script = Script::new([Step::body(503, "first"), Step::body(503, "second")]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1, 0.1]).budget(BudgetConfig::new(1.0, 0.0, 1.0)))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect_err("budget must stop the second retry");
    assert_eq!(script.hits(), 2);
    let failure = err.as_request_failure().expect("request failure");
    assert_eq!(failure.response().map(Response::text), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn budget_is_shared_by_bound_clients_but_not_by_clients() {
    let factory = compose::<JsonValue>()
        .with(RetryPolicy::new([0.1]).budget(BudgetConfig::new(1.0, 0.0, 1.0)));

    let script = Script::new(Vec::new());
    let client = factory.build(options(&script)).expect("client must build");
    let first = client.bind(json!({ "tenant": "a" }));
    let second = client.bind(json!({ "tenant": "b" }));

    first
        .request("GET /a", RequestOptions::new())
        .await
        .expect_err("must fail");
    assert_eq!(script.hits(), 2, "first call spends the only token");
    second
        .request("GET /b", RequestOptions::new())
        .await
        .expect_err("must fail");
    assert_eq!(script.hits(), 3, "bucket is empty for every bound client");

    let other_script = Script::new(Vec::new());
    let other = factory.build(options(&other_script)).expect("client must build");
    other
        .bind(json!({}))
        .request("GET /c", RequestOptions::new())
        .await
        .expect_err("must fail");
    assert_eq!(other_script.hits(), 2, "a separately built client has its own bucket");
}

#[tokio::test(start_paused = true)]
async fn success_refills_budget() {
    let script = Script::new([
        Step::status(503),
        Step::status(200),
        Step::status(503),
        Step::status(200),
    ]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]).budget(BudgetConfig::new(1.0, 1.0, 1.0)))
        .build(options(&script))
        .expect("client must build");
    let api = client.bind(());

    api.request("GET /x", RequestOptions::new())
        .await
        .expect("first call retries once");
    api.request("GET /x", RequestOptions::new())
        .await
        .expect("refilled bucket allows another retry");
    assert_eq!(script.hits(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_surfaces_last_failure() {
    let script = Script::new([
        Step::body(500, "one"),
        Step::Fail,
        Step::body(502, "three"),
    ]);
    let client = compose::<()>()
        .with(RetryPolicy::new("fixed:0.2:2"))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect_err("all attempts fail");
    assert_eq!(script.hits(), 3);
    assert_eq!(err.status(), Some(502));
    assert_eq!(
        err.as_request_failure()
            .and_then(|failure| failure.response())
            .map(Response::text),
        Some("three")
    );
}

#[tokio::test(start_paused = true)]
async fn retry_after_overrides_schedule() {
    let script = Script::new([
        Step::with_header(503, "Retry-After", "2"),
        Step::status(200),
    ]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.01]))
        .build(options(&script))
        .expect("client must build");

    let started = Instant::now();
    client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("retry must succeed");
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(script.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_retry_after_is_ignored_under_jitter() {
    let script = Script::new([
        Step::with_header(503, "Retry-After", "1.7e308"),
        Step::status(200),
    ]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]).jitter_ratio(0.5))
        .build(options(&script))
        .expect("client must build");

    let started = Instant::now();
    client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("retry must succeed");
    assert_eq!(script.hits(), 2);
    assert!(started.elapsed() <= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn huge_retry_after_is_capped() {
    let script = Script::new([
        Step::with_header(429, "Retry-After", u64::MAX.to_string()),
        Step::status(200),
    ]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]).jitter_ratio(1.0))
        .build(options(&script))
        .expect("client must build");

    let started = Instant::now();
    client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("retry must succeed");
    assert_eq!(script.hits(), 2);
    let cap = Duration::from_secs_f64(fetch_policy::MAX_RETRY_DELAY_SECS * 2.0);
    assert!(started.elapsed() <= cap);
}

#[tokio::test(start_paused = true)]
async fn client_errors_are_not_retried_by_default() {
    let script = Script::new([Step::status(404), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1, 0.1]))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(())
        .request("GET /missing", RequestOptions::new())
        .await
        .expect_err("404 is final");
    assert_eq!(err.status(), Some(404));
    assert_eq!(script.hits(), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_predicate_controls_retries() {
    let script = Script::new([Step::status(409), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1]).retry_if(|failure, _| failure.status() == Some(409)))
        .build(options(&script))
        .expect("client must build");

    client
        .bind(())
        .request("GET /conflict", RequestOptions::new())
        .await
        .expect("409 retried by predicate");
    assert_eq!(script.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn per_call_schedule_overrides_policy() {
    let script = Script::new(Vec::new());
    let client = compose::<()>()
        .with(RetryPolicy::disabled())
        .build(options(&script))
        .expect("client must build");
    let api = client.bind(());

    api.request("GET /x", RequestOptions::new())
        .await
        .expect_err("must fail");
    assert_eq!(script.hits(), 1, "empty schedule means a single attempt");

    api.request("GET /x", RequestOptions::new().retries("fixed:0.5:2"))
        .await
        .expect_err("must fail");
    assert_eq!(script.hits(), 4);

    let err = api
        .request("GET /x", RequestOptions::new().retries(vec![-1.0]))
        .await
        .expect_err("malformed schedule");
    assert!(matches!(err, FetchError::Config(_)));
    assert_eq!(script.hits(), 4, "malformed schedule is rejected before any attempt");

    let err = api
        .request("GET /x", RequestOptions::new().retries("exp:1:100000000000"))
        .await
        .expect_err("oversized schedule");
    assert!(matches!(err, FetchError::Config(_)));
    assert_eq!(script.hits(), 4);
}

#[tokio::test(start_paused = true)]
async fn bind_config_supplies_schedule() {
    let script = Script::new([Step::status(503), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::disabled())
        .build(options(&script))
        .expect("client must build");
    let api = client.bind_with(
        (),
        HttpConfig {
            retries: Some(vec![0.1].into()),
            ..HttpConfig::default()
        },
    );

    api.request("GET /x", RequestOptions::new())
        .await
        .expect("bind config schedule retries");
    assert_eq!(script.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn abort_during_backoff_cancels() {
    let script = Script::new([Step::status(503), Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([5.0]))
        .build(options(&script))
        .expect("client must build");

    let controller = AbortController::new();
    let signal = controller.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.abort();
    });

    let started = Instant::now();
    let err = client
        .bind(())
        .request("GET /items", RequestOptions::new().signal(signal))
        .await
        .expect_err("abort must win");
    assert!(err.is_cancellation());
    assert_eq!(script.hits(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_is_injected_and_retried() {
    let script = Script::new([Step::Hang, Step::body(200, "fast")]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.0]).attempt_timeout_ms(100))
        .build(options(&script))
        .expect("client must build");

    let response = client
        .bind(())
        .request("GET /slow", RequestOptions::new())
        .await
        .expect("second attempt must succeed");
    assert_eq!(response.text(), "fast");
    assert_eq!(script.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_failure_is_reported() {
    let script = Script::new([Step::Hang]);
    let client = compose::<()>()
        .with(TimeoutPolicy::new().default_timeout_ms(250))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(())
        .request("GET /slow", RequestOptions::new())
        .await
        .expect_err("must time out");
    assert_eq!(
        err.as_request_failure().map(|failure| failure.kind()),
        Some(FailureKind::Timeout)
    );
}

#[tokio::test]
async fn deadline_clamps_timeout() {
    let seen: Seen = Arc::default();
    let script = Script::new([Step::status(200)]);
    let client = compose::<JsonValue>()
        .with(Probe::new("probe", &seen))
        .with(TimeoutPolicy::new())
        .build(options(&script))
        .expect("client must build");

    client
        .bind(json!({ "deadline": now_ms() + 500 }))
        .request("GET /items", RequestOptions::new())
        .await
        .expect("must succeed");

    let seen = seen.lock().expect("seen mutex must not be poisoned");
    let timeout_ms = seen[0].1.timeout_ms.expect("timeout must be set");
    assert!((400..=500).contains(&timeout_ms), "unexpected timeout {timeout_ms}");
}

#[tokio::test]
async fn expired_deadline_fails_fast_even_under_retry() {
    let script = Script::new([Step::status(200)]);
    let client = compose::<JsonValue>()
        .with(TimeoutPolicy::new())
        .with(RetryPolicy::new([0.1, 0.1]))
        .build(options(&script))
        .expect("client must build");

    let err = client
        .bind(json!({ "deadline": now_ms() - 1 }))
        .request("GET /items", RequestOptions::new())
        .await
        .expect_err("must fail fast");
    assert!(matches!(
        err,
        FetchError::Cancelled {
            reason: fetch_policy::CancelReason::DeadlineExceeded
        }
    ));
    assert_eq!(script.hits(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_inside_retry_reclamps_each_attempt() {
    let seen: Seen = Arc::default();
    let ticks = Arc::new(AtomicU64::new(1_000));
    let clock_ticks = Arc::clone(&ticks);
    let script = Script::new([Step::status(503), Step::status(200)]);
    let client = compose::<JsonValue>()
        .with(Probe::new("attempt", &seen))
        .with(TimeoutPolicy::new().clock(move || clock_ticks.fetch_add(4_000, Ordering::SeqCst)))
        .with(RetryPolicy::new([0.1]))
        .build(options(&script))
        .expect("client must build");

    client
        .bind(json!({ "deadline": 10_000 }))
        .request("GET /items", RequestOptions::new())
        .await
        .expect("second attempt must succeed");

    let timeouts: Vec<_> = seen
        .lock()
        .expect("seen mutex must not be poisoned")
        .iter()
        .map(|(_, options)| options.timeout_ms)
        .collect();
    assert_eq!(timeouts, vec![Some(9_000), Some(5_000)]);
}

#[tokio::test]
async fn deadline_header_reaches_the_wire() {
    let script = Script::new([Step::status(200), Step::status(200)]);
    let client = compose::<JsonValue>()
        .with(
            TimeoutPolicy::new()
                .clock(|| 1_000)
                .deadline_header(DeadlineHeader::new(DeadlineMode::Relative)),
        )
        .build(options(&script))
        .expect("client must build");
    client
        .bind(json!({ "deadline": 1_800 }))
        .request("GET /items", RequestOptions::new())
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("x-request-deadline"),
        Some("800")
    );

    let client = compose::<JsonValue>()
        .with(
            TimeoutPolicy::new()
                .clock(|| 1_000)
                .deadline_header(DeadlineHeader::new(DeadlineMode::Absolute)),
        )
        .build(options(&script))
        .expect("client must build");
    client
        .bind(json!({ "deadline": 1_800 }))
        .request("GET /items", RequestOptions::new())
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("x-request-deadline"),
        Some("1800")
    );
}

#[tokio::test]
async fn layers_see_options_outside_in() {
    let seen: Seen = Arc::default();
    let script = Script::new([Step::status(200)]);
    let client = compose::<()>()
        .with(Probe::new("inner", &seen))
        .with(TimeoutPolicy::new().default_timeout_ms(900))
        .with(Probe::new("outer", &seen))
        .build(options(&script))
        .expect("client must build");
    assert_eq!(client.policy_kinds(), vec!["inner", "timeout", "outer"]);

    client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("must succeed");

    let seen = seen.lock().expect("seen mutex must not be poisoned");
    let labels: Vec<_> = seen.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, vec!["outer", "inner"]);
    assert_eq!(seen[0].1.timeout_ms, None);
    assert_eq!(seen[1].1.timeout_ms, Some(900));
}

#[tokio::test(start_paused = true)]
async fn retry_outside_probe_sees_every_attempt() {
    let seen: Seen = Arc::default();
    let script = Script::new([Step::status(503), Step::status(503), Step::status(200)]);
    let client = compose::<()>()
        .with(Probe::new("attempt", &seen))
        .with(RetryPolicy::new([0.1, 0.1]))
        .build(options(&script))
        .expect("client must build");

    client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("third attempt succeeds");
    assert_eq!(seen.lock().expect("seen mutex must not be poisoned").len(), 3);
}

#[test]
fn duplicate_policy_kind_is_rejected() {
    let script = Script::new(Vec::new());
    let result = compose::<()>()
        .with(RetryPolicy::new([0.1]))
        .with(RetryPolicy::new([0.2]))
        .build(options(&script));
    assert!(matches!(result, Err(FetchError::Config(_))));
}

#[test]
fn malformed_policy_schedule_is_rejected_eagerly() {
    let script = Script::new(Vec::new());
    let result = compose::<()>()
        .with(RetryPolicy::new("exp:abc:3"))
        .build(options(&script));
    assert!(matches!(result, Err(FetchError::Config(_))));

    let result = compose::<()>()
        .with(RetryPolicy::new([0.1]).jitter_ratio(1.5))
        .build(options(&script));
    assert!(matches!(result, Err(FetchError::Config(_))));
}

#[tokio::test]
async fn auth_policy_is_last_wins() {
    let script = Script::new([Step::status(200), Step::status(200), Step::status(200)]);
    let client: FetchClient = compose()
        .with(AuthPolicy::bearer("old-token"))
        .build(options(&script))
        .expect("client must build");
    let bound_before = client.bind(());

    bound_before
        .request("GET /me", RequestOptions::new())
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("authorization"),
        Some("Bearer old-token")
    );

    let client = client
        .with_policy(AuthPolicy::bearer("new-token"))
        .expect("auth is replaced in place");
    assert_eq!(client.policy_kinds(), vec!["auth"]);

    bound_before
        .request("GET /me", RequestOptions::new())
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("authorization"),
        Some("Bearer new-token")
    );

    client
        .bind(())
        .request(
            "GET /me",
            RequestOptions::new().header("Authorization", "Basic abc"),
        )
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("authorization"),
        Some("Basic abc")
    );
}

#[tokio::test]
async fn auth_from_context() {
    let script = Script::new([Step::status(200)]);
    let client = compose::<JsonValue>()
        .with(AuthPolicy::from_context(|ctx: &JsonValue| {
            ctx.get("token").and_then(JsonValue::as_str).map(str::to_owned)
        }))
        .build(options(&script))
        .expect("client must build");
    client
        .bind(json!({ "token": "ctx-token" }))
        .request("GET /me", RequestOptions::new())
        .await
        .expect("must succeed");
    assert_eq!(
        script.last_request().headers.first("authorization"),
        Some("Bearer ctx-token")
    );
}

#[tokio::test]
async fn config_precedence_chain() {
    let script = Script::new([Step::status(200)]);
    let config = HttpConfig {
        headers: [("x-client", "sdk"), ("x-tier", "client"), ("set-cookie", "a=1")]
            .into_iter()
            .collect(),
        ..HttpConfig::default()
    };
    let client: FetchClient = compose()
        .build(options(&script).config(config))
        .expect("client must build");
    let api = client.bind_with(
        (),
        HttpConfig {
            headers: [("x-tier", "bind"), ("set-cookie", "b=2")].into_iter().collect(),
            ..HttpConfig::default()
        },
    );

    api.request(
        "GET /items",
        RequestOptions::new()
            .header("x-tier", "call")
            .header("set-cookie", "c=3"),
    )
    .await
    .expect("must succeed");

    let headers = script.last_request().headers;
    assert_eq!(headers.first("x-client"), Some("sdk"));
    assert_eq!(headers.first("x-tier"), Some("call"));
    assert_eq!(
        headers.get("set-cookie").map(|value| value.iter().collect::<Vec<_>>()),
        Some(vec!["a=1", "b=2", "c=3"])
    );
}

#[tokio::test(start_paused = true)]
async fn non_request_failures_are_not_retried() {
    let script = Script::new([Step::status(200)]);
    let client = compose::<()>()
        .with(RetryPolicy::new([0.1, 0.1]))
        .build(options(&script))
        .expect("client must build");
    let api = client.bind(());

    let err = api
        .request("GET /items/:id", RequestOptions::new())
        .await
        .expect_err("path param is missing");
    assert!(matches!(err, FetchError::InvalidRequest(_)));
    assert_eq!(script.hits(), 0);

    let err = api
        .request_json::<Vec<u32>>("GET /items", RequestOptions::new())
        .await
        .expect_err("empty body is not JSON");
    assert!(matches!(err, FetchError::Decode(_)));
    assert_eq!(script.hits(), 1);
}

#[tokio::test(start_paused = true)]
async fn observability_policies_pass_outcomes_through() {
    let script = Script::new([Step::status(503), Step::body(200, "done")]);
    let client = compose::<()>()
        .with(fetch_policy::LoggingPolicy::new().log_start(true))
        .with(RetryPolicy::new([0.1]))
        .with(fetch_policy::TracingPolicy::new())
        .build(options(&script))
        .expect("client must build");

    let response = client
        .bind(())
        .request("GET /items", RequestOptions::new())
        .await
        .expect("retry must succeed");
    assert_eq!(response.text(), "done");
    assert_eq!(script.hits(), 2);
}
