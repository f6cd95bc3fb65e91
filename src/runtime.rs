//! HTTP entry point: the GraphQL serve mux.

use crate::error::{default_error_handler, Error, ErrorHandler, GraphQLError, Result};
use crate::executor::{execute, normalize, parse, FieldRegistry};
use crate::handler::GraphqlHandler;
use crate::metrics::{GatewayMetrics, RequestTimer};
use crate::middleware::{Context, Middleware, MiddlewareChain};
use crate::ptypes::WellKnownTypes;
use crate::request::{convert_variables, VariablePolicy};
use crate::schema::{build_schema, SchemaDocument};
use crate::types::{GraphQLRequest, GraphQLResponse};
use async_graphql::parser::types::OperationType;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-request execution settings.
#[derive(Debug, Clone, Default)]
pub struct MuxConfig {
    /// Deadline applied to every request. `None` means no deadline.
    pub request_timeout: Option<Duration>,

    /// Handling of variables that cannot be serialized.
    pub variable_policy: VariablePolicy,
}

/// ServeMux - main gateway handler
///
/// Holds the merged schema and the handlers that own its root fields. Every
/// request runs the middleware chain, is parsed and normalized against the
/// schema, then executed. Failed requests pass their errors through the
/// error handler before they are written out.
pub struct ServeMux {
    schema: Arc<SchemaDocument>,
    registry: FieldRegistry,
    handlers: Vec<Arc<dyn GraphqlHandler>>,
    middlewares: MiddlewareChain,
    error_handler: Option<ErrorHandler>,
    config: MuxConfig,
    metrics_enabled: bool,
    shutdown: CancellationToken,
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new(MuxConfig::default())
    }
}

impl ServeMux {
    pub fn new(config: MuxConfig) -> Self {
        Self {
            schema: Arc::new(SchemaDocument::new()),
            registry: FieldRegistry::new(),
            handlers: Vec::new(),
            middlewares: MiddlewareChain::new(),
            error_handler: None,
            config,
            metrics_enabled: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a handler and merge its fields and types into the schema.
    ///
    /// A handler with no fields is accepted and ignored. On error the mux is
    /// left unchanged.
    pub fn add_handler(&mut self, handler: Arc<dyn GraphqlHandler>) -> Result<()> {
        let queries = handler.queries();
        let mutations = handler.mutations();
        if queries.is_empty() && mutations.is_empty() {
            debug!(handler = %handler.name(), "Handler exposes no fields, skipping");
            return Ok(());
        }

        let mut document = build_schema(&queries, &mutations);
        for def in handler.types() {
            document.add_type(def)?;
        }
        for def in WellKnownTypes::global().definitions() {
            document.add_type(def.clone())?;
        }
        document
            .merge_with_base_schema()
            .map_err(|e| Error::Schema(format!("handler {}: {e}", handler.name())))?;

        let mut combined = self.schema.as_ref().clone();
        combined.merge(document)?;
        combined.merge_with_base_schema()?;
        self.schema = Arc::new(combined);

        for name in queries.keys() {
            self.registry
                .insert(OperationType::Query, name.clone(), handler.clone());
        }
        for name in mutations.keys() {
            self.registry
                .insert(OperationType::Mutation, name.clone(), handler.clone());
        }

        info!(
            handler = %handler.name(),
            queries = queries.len(),
            mutations = mutations.len(),
            "Registered GraphQL handler"
        );
        self.handlers.push(handler);
        Ok(())
    }

    /// Add middleware to the execution pipeline
    ///
    /// Middlewares are executed in the order they are added.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Use middleware (builder pattern)
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add_middleware(middleware);
        self
    }

    /// Replace the default error handler.
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(Vec<GraphQLError>) -> Vec<GraphQLError> + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
    }

    pub fn set_error_handler_arc(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Expose `/metrics` on the router.
    pub fn enable_metrics(&mut self) {
        self.metrics_enabled = true;
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// The merged, validated schema.
    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }

    pub fn handlers(&self) -> &[Arc<dyn GraphqlHandler>] {
        &self.handlers
    }

    /// Parent of every request's cancellation token. Cancelling it cancels
    /// all requests in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handle one decoded GraphQL request.
    pub async fn handle(&self, headers: &HeaderMap, request: GraphQLRequest) -> GraphQLResponse {
        let mut ctx = Context::from_headers(headers).with_cancellation(self.shutdown.child_token());
        if let Some(timeout) = self.config.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let response = self.execute(&mut ctx, request).await;
        if response.is_ok() {
            debug!(request_id = %ctx.request_id, elapsed = ?ctx.elapsed(), "Request succeeded");
            response
        } else {
            debug!(
                request_id = %ctx.request_id,
                errors = response.errors.len(),
                "Request failed"
            );
            self.fail(response.errors)
        }
    }

    async fn execute(&self, ctx: &mut Context, request: GraphQLRequest) -> GraphQLResponse {
        if let Err(e) = self.middlewares.execute(ctx).await {
            return GraphQLResponse::error(e.to_graphql_error());
        }

        let document = match parse(&request.query) {
            Ok(document) => document,
            Err(errors) => return GraphQLResponse::errors(errors),
        };
        let operation = match normalize(&self.schema, &document, request.operation_name.as_deref())
        {
            Ok(operation) => operation,
            Err(errors) => return GraphQLResponse::errors(errors),
        };

        let _timer = RequestTimer::new(match operation.root().operation_type() {
            OperationType::Mutation => "mutation",
            _ => "query",
        });

        let variables = match convert_variables(request.variables, self.config.variable_policy) {
            Ok(variables) => variables,
            Err(e) => return GraphQLResponse::error(e.to_graphql_error()),
        };

        execute(&operation, &self.registry, ctx, &variables).await
    }

    fn fail(&self, errors: Vec<GraphQLError>) -> GraphQLResponse {
        let errors = match &self.error_handler {
            Some(handler) => handler(errors),
            None => default_error_handler(errors),
        };
        let metrics = GatewayMetrics::global();
        for err in &errors {
            let code = err
                .extensions
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("UNKNOWN_ERROR");
            metrics.record_graphql_error(code);
        }
        GraphQLResponse::errors(errors)
    }

    /// Convert to Axum router
    pub fn into_router(self) -> Router {
        let metrics_enabled = self.metrics_enabled;
        let mut router = Router::new()
            .route("/graphql", post(handle_graphql_post))
            .with_state(Arc::new(self));

        if metrics_enabled {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
    }
}

impl std::fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeMux")
            .field("types", &self.schema.len())
            .field("registry", &self.registry)
            .field("middlewares", &self.middlewares.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Handler for POST requests to /graphql
///
/// A body that is not a JSON request object is a transport error and gets a
/// plain text 400. Everything after decoding answers 200.
async fn handle_graphql_post(
    State(mux): State<Arc<ServeMux>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: GraphQLRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request body");
            let err = Error::InvalidRequest(e.to_string());
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };
    Json(mux.handle(&headers, request).await).into_response()
}

/// Handler for Prometheus metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = GatewayMetrics::global().render();
    ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}
