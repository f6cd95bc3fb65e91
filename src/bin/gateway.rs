//! Standalone gateway server.
//!
//! Configuration comes from the environment:
//!
//! - `GATEWAY_DESCRIPTOR_SET`: path to a serialized `FileDescriptorSet` (required)
//! - `GATEWAY_LISTEN`: listen address (default `0.0.0.0:8888`)
//! - `GATEWAY_ENDPOINT`: upstream for services without a `graphql.service` host
//! - `GATEWAY_CAMEL_CASE`: `false` keeps snake_case field names (default `true`)
//! - `GATEWAY_REQUEST_TIMEOUT_SECS`: per-request deadline
//! - `GATEWAY_METRICS`: `true` serves Prometheus metrics on `/metrics`
//! - `RUST_LOG`: log filter

use anyhow::Context as _;
use proto_graphql_gateway::{Gateway, LoggingMiddleware, ShutdownConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN: &str = "0.0.0.0:8888";

fn env_flag(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be `true` or `false`, got {value:?}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let descriptor_path = std::env::var("GATEWAY_DESCRIPTOR_SET")
        .context("GATEWAY_DESCRIPTOR_SET must point to a descriptor set file")?;
    let listen = std::env::var("GATEWAY_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string());

    let mut builder = Gateway::builder()
        .with_descriptor_set_file(&descriptor_path)
        .with_context(|| format!("reading {descriptor_path}"))?
        .with_camel_case(env_flag("GATEWAY_CAMEL_CASE", true)?)
        .add_middleware(LoggingMiddleware)
        .with_graceful_shutdown(ShutdownConfig::default());

    if let Ok(endpoint) = std::env::var("GATEWAY_ENDPOINT") {
        builder = builder.with_default_endpoint(endpoint);
    }
    if let Ok(secs) = std::env::var("GATEWAY_REQUEST_TIMEOUT_SECS") {
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("GATEWAY_REQUEST_TIMEOUT_SECS must be a number, got {secs:?}"))?;
        builder = builder.with_request_timeout(Duration::from_secs(secs));
    }
    if env_flag("GATEWAY_METRICS", false)? {
        builder = builder.enable_metrics();
    }

    let gateway = builder.build().context("building gateway")?;
    tracing::info!(
        handlers = gateway.mux().handlers().len(),
        "GraphQL endpoint: http://{}/graphql",
        listen
    );
    gateway.serve(listen).await?;
    Ok(())
}
