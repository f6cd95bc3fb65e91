use super::{child_path, options, Comments};
use crate::error::Result;
use crate::graphql::{GraphqlSchema, GraphqlService, GraphqlType};
use prost_reflect::{MessageDescriptor, MethodDescriptor, ServiceDescriptor};

const SERVICE_METHOD: i32 = 2;

/// A service with its upstream settings and methods.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    descriptor: ServiceDescriptor,
    path: Vec<i32>,
    comment: String,
    options: Option<GraphqlService>,
    methods: Vec<MethodSpec>,
}

impl ServiceSpec {
    pub(super) fn new(
        descriptor: ServiceDescriptor,
        path: Vec<i32>,
        comments: &Comments,
    ) -> Result<Self> {
        let options = options::service_options(&descriptor.options())?;
        let methods = descriptor
            .methods()
            .enumerate()
            .map(|(i, method)| {
                let method_path = child_path(&path, SERVICE_METHOD, i);
                MethodSpec::new(method, method_path, comments)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            comment: comments.get(&path).to_string(),
            descriptor,
            path,
            options,
            methods,
        })
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn options(&self) -> Option<&GraphqlService> {
        self.options.as_ref()
    }

    /// Upstream address from `(graphql.service).host`.
    pub fn host(&self) -> Option<&str> {
        self.options
            .as_ref()
            .map(|o| o.host.as_str())
            .filter(|h| !h.is_empty())
    }

    /// Whether the upstream is reached without TLS.
    pub fn insecure(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.insecure)
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }
}

/// An RPC method and how it is exposed.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    descriptor: MethodDescriptor,
    path: Vec<i32>,
    comment: String,
    schema: Option<GraphqlSchema>,
}

impl MethodSpec {
    fn new(descriptor: MethodDescriptor, path: Vec<i32>, comments: &Comments) -> Result<Self> {
        let schema = options::method_options(&descriptor.options())?;
        Ok(Self {
            comment: comments.get(&path).to_string(),
            descriptor,
            path,
            schema,
        })
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn input(&self) -> MessageDescriptor {
        self.descriptor.input()
    }

    pub fn output(&self) -> MessageDescriptor {
        self.descriptor.output()
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_streaming(&self) -> bool {
        self.descriptor.is_client_streaming() || self.descriptor.is_server_streaming()
    }

    pub fn schema(&self) -> Option<&GraphqlSchema> {
        self.schema.as_ref()
    }

    /// Root operation the method is exposed under, if any.
    pub fn graphql_type(&self) -> Option<GraphqlType> {
        let schema = self.schema.as_ref()?;
        GraphqlType::try_from(schema.r#type).ok()
    }

    /// Root field name: the declared name, else the method name with a
    /// lowercase first letter.
    pub fn field_name(&self) -> String {
        match self.schema.as_ref().map(|s| s.name.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => lower_first(self.name()),
        }
    }

    /// gRPC request path, `/package.Service/Method`.
    pub fn grpc_path(&self) -> String {
        format!(
            "/{}/{}",
            self.descriptor.parent_service().full_name(),
            self.name()
        )
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
