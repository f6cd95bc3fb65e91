//! # proto-graphql-gateway
//!
//! A gateway that exposes protobuf-described gRPC services as a GraphQL API.
//!
//! ## Features
//!
//! - **Schema from descriptors**: service methods annotated with the
//!   `graphql.schema` option become Query or Mutation fields, and their
//!   request/response messages become input and object types
//! - **Field options**: `graphql.field` marks fields as required, renames
//!   them or omits them from the schema
//! - **Dynamic invocation**: upstream calls are encoded and decoded through
//!   `prost-reflect`, so no generated client code is needed
//! - **Cancellation**: request deadlines and client disconnects abort
//!   in-flight upstream calls
//! - **Middleware**: extensible middleware chain for auth and logging
//!
//! ## Main Components
//!
//! - [`Gateway`]: The main entry point for creating and running the gateway.
//! - [`GatewayBuilder`]: Configuration builder for the gateway.
//! - [`ServeMux`]: Merges handler schemas and serves GraphQL over HTTP.
//! - [`GraphqlHandler`]: The contract a field provider implements.
//! - [`ServiceHandler`]: The handler built from a protobuf service.
//! - [`GrpcClient`]: Manages connections to gRPC services.
//!
//! ## Example
//!
//! ```rust,no_run
//! use proto_graphql_gateway::{Gateway, GrpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let grpc_client = GrpcClient::new("http://localhost:50051").await?;
//!
//!     let gateway = Gateway::builder()
//!         .with_descriptor_set_file("greeter.bin")?
//!         .add_grpc_client("greeter.Greeter", grpc_client)
//!         .build()?;
//!
//!     let app = gateway.into_router();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8888").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

/// Generated types for graphql.proto options.
#[allow(clippy::all)]
pub mod graphql {
    include!("generated/graphql.rs");
}

pub mod descriptor;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod grpc_client;
pub mod handler;
pub mod metrics;
pub mod middleware;
pub mod proto_handler;
pub mod ptypes;
pub mod request;
pub mod runtime;
pub mod schema;
pub mod shutdown;
pub mod types;

pub use descriptor::{FileSpec, FileSpecSet, MessageSpec, MethodSpec, ServiceSpec};
pub use error::{default_error_handler, Error, ErrorHandler, GraphQLError, PathSegment, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use grpc_client::{GrpcClient, GrpcClientPool};
pub use handler::{Connection, FieldCall, GraphqlHandler};
pub use metrics::{GatewayMetrics, GrpcTimer, RequestTimer};
pub use middleware::{Context, FnMiddleware, LoggingMiddleware, Middleware};
pub use proto_handler::ServiceHandler;
pub use request::VariablePolicy;
pub use runtime::{MuxConfig, ServeMux};
pub use schema::{FieldSignature, SchemaDocument};
pub use shutdown::{run_with_graceful_shutdown, signal_shutdown, ShutdownConfig};
pub use types::{GraphQLRequest, GraphQLResponse};
