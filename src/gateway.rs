//! Gateway builder and main orchestration

use crate::descriptor::{load_descriptor_pool, FileSpecSet, ServiceSpec};
use crate::error::{Error, ErrorHandler, GraphQLError, Result};
use crate::grpc_client::{GrpcClient, GrpcClientPool};
use crate::handler::GraphqlHandler;
use crate::middleware::Middleware;
use crate::proto_handler::ServiceHandler;
use crate::request::VariablePolicy;
use crate::runtime::{MuxConfig, ServeMux};
use crate::shutdown::{run_with_graceful_shutdown, ShutdownConfig};
use axum::Router;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Main Gateway struct - entry point for the library
///
/// Owns the [`ServeMux`] and the upstream clients. It is created via the
/// [`GatewayBuilder`].
///
/// # Example
///
/// ```rust,no_run
/// use proto_graphql_gateway::Gateway;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = Gateway::builder()
///     .with_descriptor_set_file("path/to/descriptor.bin")?
///     .with_default_endpoint("http://localhost:50051")
///     .build()?;
///
/// gateway.serve("0.0.0.0:8888").await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    mux: ServeMux,
    client_pool: GrpcClientPool,
    shutdown_config: Option<ShutdownConfig>,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Get the ServeMux
    pub fn mux(&self) -> &ServeMux {
        &self.mux
    }

    /// Get the client pool
    pub fn client_pool(&self) -> &GrpcClientPool {
        &self.client_pool
    }

    /// Convert gateway into Axum router
    pub fn into_router(self) -> Router {
        self.mux.into_router()
    }

    /// Serve on `addr` until the process is stopped.
    ///
    /// With graceful shutdown configured, SIGTERM/SIGINT stop the listener
    /// and drain in-flight requests.
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        match self.shutdown_config.clone() {
            Some(config) => {
                self.run(addr.into(), config, std::future::pending::<()>())
                    .await
            }
            None => {
                let addr = addr.into();
                let listener = tokio::net::TcpListener::bind(&addr).await?;
                info!("Gateway server listening on {}", addr);
                axum::serve(listener, self.into_router()).await?;
                Ok(())
            }
        }
    }

    /// Serve on `addr` until `shutdown_signal` completes, then drain.
    pub async fn serve_with_shutdown<F>(self, addr: impl Into<String>, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.shutdown_config.clone().unwrap_or(ShutdownConfig {
            handle_signals: false,
            ..Default::default()
        });
        self.run(addr.into(), config, shutdown_signal).await
    }

    async fn run<F>(self, addr: String, config: ShutdownConfig, trigger: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Gateway server listening on {}", addr);

        let in_flight = self.mux.cancellation_token();
        run_with_graceful_shutdown(listener, self.into_router(), config, in_flight, trigger).await?;
        Ok(())
    }
}

/// Builder for creating a Gateway
///
/// Every service in the loaded descriptor sets becomes a handler. Its
/// upstream is, in order of preference: a client registered under the
/// service's full name, the host from the service's `graphql.service`
/// option, or the default endpoint.
///
/// # Example
///
/// ```rust,no_run
/// use proto_graphql_gateway::{Gateway, GrpcClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = Gateway::builder()
///     .with_descriptor_set_file("path/to/descriptor.bin")?
///     .add_grpc_client("shop.v1.Catalog", GrpcClient::new("http://localhost:50051").await?)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayBuilder {
    client_pool: GrpcClientPool,
    descriptor_sets: Vec<Vec<u8>>,
    default_endpoint: Option<String>,
    camel_case: bool,
    service_allowlist: Option<HashSet<String>>,
    handlers: Vec<Arc<dyn GraphqlHandler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    error_handler: Option<ErrorHandler>,
    config: MuxConfig,
    /// Enable metrics endpoint
    metrics_enabled: bool,
    /// Graceful shutdown configuration
    shutdown_config: Option<ShutdownConfig>,
}

impl GatewayBuilder {
    /// Create a new gateway builder
    pub fn new() -> Self {
        Self {
            client_pool: GrpcClientPool::new(),
            descriptor_sets: Vec::new(),
            default_endpoint: None,
            camel_case: true,
            service_allowlist: None,
            handlers: Vec::new(),
            middlewares: Vec::new(),
            error_handler: None,
            config: MuxConfig::default(),
            metrics_enabled: false,
            shutdown_config: None,
        }
    }

    /// Add a gRPC client to the pool
    ///
    /// # Arguments
    ///
    /// * `name` - The service name (e.g., "my.package.Service")
    /// * `client` - The `GrpcClient` instance
    pub fn add_grpc_client(self, name: impl Into<String>, client: GrpcClient) -> Self {
        self.client_pool.add(name, client);
        self
    }

    /// Upstream for services with neither a registered client nor a host
    /// option. An address without a scheme is dialed in plaintext.
    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = Some(endpoint.into());
        self
    }

    /// Provide the primary protobuf descriptor set (bytes).
    ///
    /// This clears any existing descriptors. Use
    /// [`Self::add_descriptor_set_bytes`] to add more.
    pub fn with_descriptor_set_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.descriptor_sets = vec![bytes.as_ref().to_vec()];
        self
    }

    /// Add another protobuf descriptor set (bytes).
    pub fn add_descriptor_set_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.descriptor_sets.push(bytes.as_ref().to_vec());
        self
    }

    /// Provide the primary protobuf descriptor set file.
    pub fn with_descriptor_set_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(self.with_descriptor_set_bytes(bytes))
    }

    /// Add another protobuf descriptor set file.
    pub fn add_descriptor_set_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(self.add_descriptor_set_bytes(bytes))
    }

    /// Use lowerCamelCase (protobuf JSON) field names instead of the
    /// declared snake_case names. On by default.
    pub fn with_camel_case(mut self, enabled: bool) -> Self {
        self.camel_case = enabled;
        self
    }

    /// Restrict the schema to the provided gRPC service full names.
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_allowlist = Some(services.into_iter().map(Into::into).collect());
        self
    }

    /// Register a handler that is not derived from a descriptor.
    pub fn add_handler(mut self, handler: Arc<dyn GraphqlHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Add middleware
    pub fn add_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Replace the default error handler.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<GraphQLError>) -> Vec<GraphQLError> + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Deadline for every request, upstream calls included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn with_variable_policy(mut self, policy: VariablePolicy) -> Self {
        self.config.variable_policy = policy;
        self
    }

    /// Enable Prometheus metrics at `/metrics`.
    pub fn enable_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Enable graceful shutdown with the specified configuration.
    pub fn with_graceful_shutdown(mut self, config: ShutdownConfig) -> Self {
        self.shutdown_config = Some(config);
        self
    }

    /// Assemble the gateway.
    ///
    /// Upstream channels are created lazily, so this needs a Tokio runtime
    /// but no reachable upstream.
    pub fn build(self) -> Result<Gateway> {
        if self.descriptor_sets.is_empty() && self.handlers.is_empty() {
            return Err(Error::Schema(
                "no descriptor sets or handlers configured".to_string(),
            ));
        }

        let mut mux = ServeMux::new(self.config.clone());

        for bytes in &self.descriptor_sets {
            let pool = load_descriptor_pool(bytes)?;
            let specs = FileSpecSet::new(&pool, self.camel_case)?;
            for service in specs.services() {
                if !self.allows(service) {
                    debug!(service = %service.full_name(), "Service not in allowlist, skipping");
                    continue;
                }
                let client = self.client_for(service)?;
                let handler = ServiceHandler::new(&specs, service.full_name(), client)?;
                mux.add_handler(Arc::new(handler))?;
            }
        }

        for handler in self.handlers {
            mux.add_handler(handler)?;
        }
        for middleware in self.middlewares {
            mux.add_middleware(middleware);
        }
        if let Some(handler) = self.error_handler {
            mux.set_error_handler_arc(handler);
        }
        if self.metrics_enabled {
            mux.enable_metrics();
        }

        info!(
            types = mux.schema().len(),
            handlers = mux.handlers().len(),
            "Gateway built"
        );

        Ok(Gateway {
            mux,
            client_pool: self.client_pool,
            shutdown_config: self.shutdown_config,
        })
    }

    fn allows(&self, service: &ServiceSpec) -> bool {
        self.service_allowlist
            .as_ref()
            .map_or(true, |allow| allow.contains(service.full_name()))
    }

    fn client_for(&self, service: &ServiceSpec) -> Result<GrpcClient> {
        if let Some(client) = self.client_pool.get(service.full_name()) {
            return Ok(client);
        }
        let client = match (service.host(), &self.default_endpoint) {
            (Some(host), _) => GrpcClient::connect_lazy(host, service.insecure())?,
            (None, Some(endpoint)) => GrpcClient::connect_lazy(endpoint.as_str(), true)?,
            (None, None) => {
                return Err(Error::Connection(format!(
                    "no client, host option or default endpoint for service {}",
                    service.full_name()
                )))
            }
        };
        debug!(
            service = %service.full_name(),
            endpoint = %client.endpoint(),
            "Created lazy gRPC client"
        );
        self.client_pool.add(service.full_name(), client.clone());
        Ok(client)
    }

    /// Build and start the gateway server
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        self.build()?.serve(addr).await
    }

    /// Build and start the gateway server with explicit shutdown signal.
    pub async fn serve_with_shutdown<F>(self, addr: impl Into<String>, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.build()?.serve_with_shutdown(addr, shutdown_signal).await
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
