use std::time::{SystemTime, UNIX_EPOCH};

use fetch_policy::{
    compose, AuthPolicy, BudgetConfig, ClientOptions, LoggingPolicy, RequestOptions, RetryPolicy,
    TimeoutPolicy, TracingPolicy,
};
use serde_json::{json, Value as JsonValue};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fetch_policy=debug")),
        )
        .init();

    let options = ClientOptions::from_env()?;
    let token = std::env::var("FETCH_POLICY_TOKEN").unwrap_or_default();

    let client = compose::<JsonValue>()
        .with(LoggingPolicy::new())
        .with(TimeoutPolicy::new().default_timeout_ms(2_000))
        .with(
            RetryPolicy::new("exp:0.2:3")
                .jitter_ratio(0.2)
                .budget(BudgetConfig::default()),
        )
        .with(AuthPolicy::bearer(token))
        .with(TracingPolicy::new())
        .build(options)?;

    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
    let api = client.bind(json!({ "deadline": now_ms + 5_000 }));

    let item: JsonValue = api
        .request_json(
            "GET /items/:id",
            RequestOptions::new().param("id", 1).query("expand", "owner"),
        )
        .await?;
    println!("{item:#}");

    Ok(())
}
