//! Handler contract between the serve mux and field resolvers.
//!
//! A [`GraphqlHandler`] contributes root fields to the schema and resolves
//! them. Each root field resolution acquires a [`Connection`] first and
//! releases it when the resolution ends, however it ends.

use crate::error::Result;
use crate::middleware::Context;
use crate::schema::FieldMap;
use async_graphql::parser::types::{OperationType, TypeDefinition};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use tonic::transport::Channel;

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A scoped upstream connection.
///
/// The release hook runs exactly once: on [`Connection::close`] or on drop,
/// whichever happens first.
pub struct Connection {
    channel: Option<Channel>,
    release: Option<Release>,
}

impl Connection {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            release: None,
        }
    }

    /// A connection with no channel, for handlers that resolve locally.
    pub fn detached() -> Self {
        Self {
            channel: None,
            release: None,
        }
    }

    /// Run `release` when the connection is closed or dropped.
    pub fn with_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// Release the connection now.
    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("has_channel", &self.channel.is_some())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// One root field invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCall {
    /// Root operation the field belongs to.
    pub operation: OperationType,
    /// Schema name of the root field.
    pub field: String,
    /// Resolved arguments, already shaped by the argument marshaler.
    pub arguments: Map<String, JsonValue>,
}

/// A source of root fields.
///
/// The mux depends only on this trait. Implementations describe their
/// fields with [`FieldMap`]s, may contribute supporting type definitions,
/// and resolve calls to the fields they own.
#[async_trait::async_trait]
pub trait GraphqlHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Acquire the connection a resolution runs on.
    async fn create_connection(&self, ctx: &Context) -> Result<Connection>;

    /// Query root fields, keyed by exposed name.
    fn queries(&self) -> FieldMap;

    /// Mutation root fields, keyed by exposed name.
    fn mutations(&self) -> FieldMap;

    /// Object, input and enum types the fields refer to.
    fn types(&self) -> Vec<TypeDefinition> {
        Vec::new()
    }

    /// Whether argument keys are converted to snake_case before
    /// [`GraphqlHandler::resolve`] sees them.
    fn case_conversion(&self) -> bool {
        true
    }

    /// Resolve a root field to its JSON value.
    async fn resolve(&self, conn: &Connection, ctx: &Context, call: FieldCall)
        -> Result<JsonValue>;
}
