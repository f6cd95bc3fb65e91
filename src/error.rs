//! Error types and GraphQL error translation.
//!
//! Internal failures are carried as [`Error`]. Before anything reaches a
//! client it is converted into a [`GraphQLError`], and the list of errors for a
//! request is passed through an [`ErrorHandler`]. The default handler,
//! [`default_error_handler`], lifts the status code out of gRPC style messages
//! (`rpc error: code = NotFound desc = ...`) into `extensions.code`.

use async_graphql::Pos;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Status returned by an upstream RPC. Rendered in the conventional
    /// `rpc error: code = <Code> desc = <message>` form.
    #[error("rpc error: code = {:?} desc = {}", .0.code(), .0.message())]
    Grpc(#[from] tonic::Status),

    /// gRPC transport errors
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Schema assembly or registration failure. Fatal at startup.
    #[error("GraphQL schema error: {0}")]
    Schema(String),

    /// Malformed request envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation does not fit the schema
    #[error("{0}")]
    Validation(String),

    /// An argument or variable could not be converted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Protobuf descriptor could not be loaded
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// Middleware errors
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Convert error to GraphQL error format
    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError {
            message: self.to_string(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: self.extensions(),
        }
    }

    /// Convert to a GraphQL error positioned in the document and the response.
    pub fn into_graphql_error_at(self, pos: Option<Pos>, path: &[PathSegment]) -> GraphQLError {
        let mut err = self.to_graphql_error();
        err.locations.extend(pos.map(Location::from));
        err.path = path.to_vec();
        err
    }

    /// True if this error reports cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::Grpc(status)
                if matches!(status.code(), tonic::Code::Cancelled | tonic::Code::DeadlineExceeded)
        )
    }

    /// Get error code for extensions
    fn extensions(&self) -> HashMap<String, serde_json::Value> {
        let code = match self {
            Error::Grpc(_) => "GRPC_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Validation(_) => "GRAPHQL_VALIDATION_FAILED",
            Error::InvalidInput(_) => "BAD_USER_INPUT",
            Error::Descriptor(_) => "DESCRIPTOR_ERROR",
            Error::Middleware(_) => "MIDDLEWARE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        };
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(code));
        map
    }
}

/// One element of an error path: a field name or a list index.
///
/// Serializes untagged so a path comes out as a flat array such as
/// `["user", 0, "name"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        PathSegment::Field(name.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(name: String) -> Self {
        PathSegment::Field(name)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Source location of an error in the query document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl From<Pos> for Location {
    fn from(pos: Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl GraphQLError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    /// Attach a source location.
    pub fn at(mut self, pos: Pos) -> Self {
        self.locations.push(pos.into());
        self
    }

    /// Replace the response path.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Set an extension entry.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Convert a GraphQL syntax error into its wire form.
    pub fn from_parser_error(err: &async_graphql::parser::Error) -> Self {
        let mut gql = GraphQLError::new(err.to_string())
            .with_extension("code", serde_json::json!("GRAPHQL_PARSE_FAILED"));
        gql.locations = err.positions().map(Location::from).collect();
        gql
    }
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}

/// Post-processing hook applied to the errors of every failed request.
pub type ErrorHandler = Arc<dyn Fn(Vec<GraphQLError>) -> Vec<GraphQLError> + Send + Sync>;

static RPC_STATUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"rpc error: code = ([^\s]+).*desc = (.+)").expect("status pattern is valid")
});

/// Default error hook.
///
/// Messages matching `rpc error: code = <CODE> ... desc = <description>` are
/// replaced by the trimmed description, and `extensions.code` is set to the
/// uppercased code. Other errors pass through untouched.
pub fn default_error_handler(errors: Vec<GraphQLError>) -> Vec<GraphQLError> {
    errors.into_iter().map(translate_rpc_status).collect()
}

fn translate_rpc_status(mut err: GraphQLError) -> GraphQLError {
    let Some(caps) = RPC_STATUS_PATTERN.captures(&err.message) else {
        return err;
    };
    let code = caps[1].to_uppercase();
    let desc = caps[2].trim().to_string();
    err.message = desc;
    err.extensions
        .insert("code".to_string(), serde_json::Value::String(code));
    err
}
