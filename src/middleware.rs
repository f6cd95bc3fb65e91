//! Request context and middleware
//!
//! Every GraphQL request gets a [`Context`] carrying its headers, a request
//! id, a cancellation token and an optional deadline. Middleware runs on the
//! context before the query is parsed; an error from any middleware ends the
//! request with that error in the response.

use crate::error::Result;
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Context passed to middleware and handlers
///
/// Contains request metadata and an extensible data store for middleware
/// to communicate with each other and with resolvers.
#[derive(Debug, Clone)]
pub struct Context {
    /// Request headers
    pub headers: HeaderMap,

    /// Additional context data set by middleware
    pub extensions: HashMap<String, serde_json::Value>,

    /// Request start time for timing
    pub request_start: Instant,

    /// Unique request identifier
    pub request_id: String,

    /// Client IP address (if available)
    pub client_ip: Option<String>,

    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::from_headers(&HeaderMap::new())
    }
}

impl Context {
    /// Create a context from request headers.
    ///
    /// `x-request-id` is reused when present. The client IP is taken from
    /// `x-forwarded-for` (first hop) or `x-real-ip` and discarded unless it
    /// parses as an address.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let client_ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|ip| is_valid_ip(ip))
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|ip| is_valid_ip(ip))
            })
            .map(String::from);

        Self {
            headers: headers.clone(),
            extensions: HashMap::new(),
            request_start: Instant::now(),
            request_id,
            client_ip,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Tie this request to `token`; cancelling the token cancels the request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Give the request a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Insert extension data
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    /// Get extension data
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    /// Get typed extension data
    pub fn get_typed<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.extensions
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get elapsed time since request start
    pub fn elapsed(&self) -> Duration {
        self.request_start.elapsed()
    }
}

fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<std::net::IpAddr>().is_ok()
}

/// Middleware trait for request processing
///
/// # Example
///
/// ```rust
/// use proto_graphql_gateway::middleware::{Context, Middleware};
/// use proto_graphql_gateway::Result;
///
/// struct MyMiddleware;
///
/// #[async_trait::async_trait]
/// impl Middleware for MyMiddleware {
///     async fn call(&self, ctx: &mut Context) -> Result<()> {
///         ctx.insert("seen", serde_json::json!(true));
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request context
    async fn call(&self, ctx: &mut Context) -> Result<()>;

    /// Middleware name for logging/debugging
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Middleware built from a synchronous closure.
pub struct FnMiddleware<F> {
    name: &'static str,
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(&mut Context) -> Result<()> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

#[async_trait::async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Context) -> Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        (self.f)(ctx)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Logs incoming GraphQL requests using the `tracing` crate.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        tracing::debug!(
            request_id = %ctx.request_id,
            client_ip = ?ctx.client_ip,
            "Processing GraphQL request"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// Ordered list of middleware executed for every request.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Execute all middleware in order, stopping at the first error.
    pub async fn execute(&self, ctx: &mut Context) -> Result<()> {
        for middleware in &self.middlewares {
            if let Err(e) = middleware.call(ctx).await {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    middleware = middleware.name(),
                    error = %e,
                    "Middleware rejected request"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}
