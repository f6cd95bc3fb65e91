//! A [`GraphqlHandler`] generated from a protobuf service.
//!
//! Methods carrying a `(graphql.schema)` option of type `QUERY` or
//! `MUTATION` become root fields. The method's request message fields become
//! the field's arguments and its response message becomes the return type.
//! Every message and enum reachable from an exposed method is rendered as a
//! GraphQL type:
//!
//! | protobuf                        | GraphQL                          |
//! |---------------------------------|----------------------------------|
//! | message `pkg.Msg` (output)      | `type pkg_Msg`                   |
//! | message `pkg.Msg` (input)       | `input pkg_Msg_Input`            |
//! | enum `pkg.E`                    | `enum pkg_E`                     |
//! | well-known type                 | `Google_type_*`/`Google_input_*` |
//! | `repeated T`, `map<K, V>`       | `[T!]`, `[pkg_Msg_XEntry!]`      |
//! | integers / float, double        | `Int` / `Float`                  |
//! | `bool` / `string`, `bytes`      | `Boolean` / `String`             |

use crate::descriptor::{FieldSpec, FileSpecSet, MethodSpec, ServiceSpec};
use crate::error::{Error, Result};
use crate::graphql::GraphqlType;
use crate::grpc_client::{
    ascii_metadata, json_to_message, message_to_json, unary_call, FieldNaming, GrpcClient,
};
use crate::handler::{Connection, FieldCall, GraphqlHandler};
use crate::metrics::GrpcTimer;
use crate::middleware::Context;
use crate::ptypes::WellKnownTypes;
use crate::request::to_snake_case;
use crate::schema::{FieldMap, FieldSignature, SchemaDocument};
use async_graphql::indexmap::IndexSet;
use async_graphql::parser::types::TypeDefinition;
use axum::http::header::AUTHORIZATION;
use prost_reflect::{Cardinality, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt::Write as _;
use tonic::metadata::MetadataMap;
use tracing::{debug, warn};

const INPUT_SUFFIX: &str = "_Input";
const PLACEHOLDER: &str = "_: Boolean";

/// GraphQL name of a protobuf type.
pub fn graphql_type_name(full_name: &str) -> String {
    full_name.replace('.', "_")
}

/// Field naming for a group of descriptor files: declared overrides,
/// omissions and the case convention.
#[derive(Debug, Clone)]
pub struct ProtoNaming {
    camel: bool,
    /// Field full name to its override name, `None` when omitted.
    overrides: HashMap<String, Option<String>>,
}

impl ProtoNaming {
    pub fn new(specs: &FileSpecSet, camel: bool) -> Self {
        let overrides = specs
            .files()
            .iter()
            .flat_map(|file| file.messages())
            .flat_map(|m| m.fields())
            .filter(|f| f.omitted() || f.name_override().is_some())
            .map(|f| {
                let name = (!f.omitted()).then(|| f.graphql_name(camel).to_string());
                (f.descriptor().full_name().to_string(), name)
            })
            .collect();
        Self { camel, overrides }
    }

    fn default_name(&self, field: &FieldDescriptor) -> String {
        if self.camel {
            field.json_name().to_string()
        } else {
            field.name().to_string()
        }
    }
}

impl FieldNaming for ProtoNaming {
    fn output_name(&self, field: &FieldDescriptor) -> Option<String> {
        match self.overrides.get(field.full_name()) {
            Some(name) => name.clone(),
            None => Some(self.default_name(field)),
        }
    }

    fn input_field(&self, message: &MessageDescriptor, key: &str) -> Option<FieldDescriptor> {
        message.fields().find(|field| match self.output_name(field) {
            Some(name) => {
                name == key
                    || to_snake_case(&name) == key
                    || field.name() == key
                    || field.json_name() == key
            }
            None => false,
        })
    }
}

/// Serves the exposed methods of one protobuf service.
pub struct ServiceHandler {
    name: String,
    service: ServiceSpec,
    client: GrpcClient,
    naming: ProtoNaming,
    queries: FieldMap,
    mutations: FieldMap,
    methods: HashMap<String, MethodSpec>,
    types: Vec<TypeDefinition>,
    case_conversion: bool,
}

impl ServiceHandler {
    /// Build the handler for `service_name` (fully qualified).
    ///
    /// `specs` must cover every file the service's messages are declared in,
    /// or their field options and comments are not applied.
    pub fn new(specs: &FileSpecSet, service_name: &str, client: GrpcClient) -> Result<Self> {
        let (file, service) = specs
            .service(service_name)
            .ok_or_else(|| Error::Schema(format!("service {service_name} not found")))?;
        let camel = file.is_camel();
        let service = service.clone();
        let naming = ProtoNaming::new(specs, camel);
        let renderer = TypeRenderer::new(specs, &naming);

        let mut queries = FieldMap::new();
        let mut mutations = FieldMap::new();
        let mut methods = HashMap::new();
        let mut reachable = Reachable::default();

        for method in service.methods() {
            let target = match method.graphql_type() {
                Some(GraphqlType::Query) => &mut queries,
                Some(GraphqlType::Mutation) => &mut mutations,
                Some(GraphqlType::Resolver) => {
                    debug!(method = %method.full_name(), "Skipping resolver method");
                    continue;
                }
                None => continue,
            };
            if method.is_streaming() {
                warn!(method = %method.full_name(), "Streaming methods cannot be exposed, skipping");
                continue;
            }

            let field_name = method.field_name();
            if methods.contains_key(&field_name) {
                return Err(Error::Schema(format!(
                    "field \"{field_name}\" is exposed by more than one method of {service_name}"
                )));
            }

            // Request fields are flattened into arguments, so only their
            // types need input definitions.
            reachable.visit_fields(&method.input(), &naming, Reachable::visit_input);
            reachable.visit_output(&method.output(), &naming);

            let signature = FieldSignature::from_sdl(&renderer.root_field(method, &field_name))?;
            target.insert(field_name.clone(), signature);
            methods.insert(field_name, method.clone());
        }

        let sdl = renderer.types(&reachable);
        let types = if sdl.is_empty() {
            Vec::new()
        } else {
            SchemaDocument::from_sdl(&sdl)?.types().cloned().collect()
        };

        debug!(
            service = %service.full_name(),
            queries = queries.len(),
            mutations = mutations.len(),
            "Built service handler"
        );

        Ok(Self {
            name: service.full_name().to_string(),
            case_conversion: camel,
            service,
            client,
            naming,
            queries,
            mutations,
            methods,
            types,
        })
    }

    pub fn service(&self) -> &ServiceSpec {
        &self.service
    }

    pub fn client(&self) -> &GrpcClient {
        &self.client
    }

    pub fn naming(&self) -> &ProtoNaming {
        &self.naming
    }

    /// Method backing a root field.
    pub fn method(&self, field: &str) -> Option<&MethodSpec> {
        self.methods.get(field)
    }
}

#[async_trait::async_trait]
impl GraphqlHandler for ServiceHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_connection(&self, ctx: &Context) -> Result<Connection> {
        let service = self.name.clone();
        let request_id = ctx.request_id.clone();
        Ok(Connection::new(self.client.channel()).with_release(move || {
            debug!(service = %service, request_id = %request_id, "Released upstream connection");
        }))
    }

    fn queries(&self) -> FieldMap {
        self.queries.clone()
    }

    fn mutations(&self) -> FieldMap {
        self.mutations.clone()
    }

    fn types(&self) -> Vec<TypeDefinition> {
        self.types.clone()
    }

    fn case_conversion(&self) -> bool {
        self.case_conversion
    }

    async fn resolve(
        &self,
        conn: &Connection,
        ctx: &Context,
        call: FieldCall,
    ) -> Result<JsonValue> {
        let method = self.methods.get(&call.field).ok_or_else(|| {
            Error::Internal(format!("{} does not serve field {}", self.name, call.field))
        })?;
        let channel = conn
            .channel()
            .cloned()
            .ok_or_else(|| Error::Connection(format!("no channel to {}", self.name)))?;

        let request = json_to_message(&call.arguments, &method.input(), &self.naming)?;

        let mut metadata = MetadataMap::new();
        if let Some(id) = ascii_metadata(&ctx.request_id) {
            metadata.insert("x-request-id", id);
        }
        if let Some(auth) = ctx
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(ascii_metadata)
        {
            metadata.insert("authorization", auth);
        }

        debug!(
            request_id = %ctx.request_id,
            method = %method.grpc_path(),
            "Invoking upstream method"
        );
        let timer = GrpcTimer::new(self.service.full_name(), method.name());
        let response = unary_call(
            channel,
            &method.grpc_path(),
            request,
            method.output(),
            metadata,
            ctx.remaining(),
        )
        .await;

        match response {
            Ok(msg) => Ok(message_to_json(&msg, &self.naming)),
            Err(e) => {
                if let Error::Grpc(status) = &e {
                    timer.record_error(status.code());
                }
                Err(e)
            }
        }
    }
}

/// Messages and enums reachable from the exposed methods, in discovery
/// order.
#[derive(Debug, Default)]
struct Reachable {
    objects: IndexSet<MessageDescriptor>,
    inputs: IndexSet<MessageDescriptor>,
    enums: IndexSet<EnumDescriptor>,
}

impl Reachable {
    fn visit_output(&mut self, msg: &MessageDescriptor, naming: &ProtoNaming) {
        if is_well_known(msg) || !self.objects.insert(msg.clone()) {
            return;
        }
        self.visit_fields(msg, naming, Self::visit_output);
    }

    fn visit_input(&mut self, msg: &MessageDescriptor, naming: &ProtoNaming) {
        if is_well_known(msg) || !self.inputs.insert(msg.clone()) {
            return;
        }
        self.visit_fields(msg, naming, Self::visit_input);
    }

    fn visit_fields(
        &mut self,
        msg: &MessageDescriptor,
        naming: &ProtoNaming,
        visit: fn(&mut Self, &MessageDescriptor, &ProtoNaming),
    ) {
        for field in msg.fields() {
            if naming.output_name(&field).is_none() {
                continue;
            }
            match field.kind() {
                Kind::Message(child) => visit(self, &child, naming),
                Kind::Enum(e) => {
                    self.enums.insert(e);
                }
                _ => {}
            }
        }
    }
}

fn is_well_known(msg: &MessageDescriptor) -> bool {
    WellKnownTypes::global().get(msg.full_name()).is_some()
}

/// Renders SDL for the types reachable from one service.
struct TypeRenderer<'a> {
    specs: &'a FileSpecSet,
    naming: &'a ProtoNaming,
}

impl<'a> TypeRenderer<'a> {
    fn new(specs: &'a FileSpecSet, naming: &'a ProtoNaming) -> Self {
        Self { specs, naming }
    }

    fn field_spec(&self, field: &FieldDescriptor) -> Option<&'a FieldSpec> {
        self.specs
            .message(field.parent_message().full_name())
            .and_then(|m| m.field(field.number()))
    }

    fn required(&self, field: &FieldDescriptor) -> bool {
        match self.field_spec(field) {
            Some(spec) => spec.required(),
            None => {
                field.parent_message().is_map_entry()
                    || field.cardinality() == Cardinality::Required
            }
        }
    }

    fn message_name(&self, msg: &MessageDescriptor, input: bool) -> String {
        match WellKnownTypes::global().get(msg.full_name()) {
            Some(wkt) if input => wkt.input_name().to_string(),
            Some(wkt) => wkt.object_name().to_string(),
            None if input => format!("{}{INPUT_SUFFIX}", graphql_type_name(msg.full_name())),
            None => graphql_type_name(msg.full_name()),
        }
    }

    fn type_ref(&self, field: &FieldDescriptor, input: bool) -> String {
        let base = match field.kind() {
            Kind::Message(msg) => self.message_name(&msg, input),
            Kind::Enum(e) => graphql_type_name(e.full_name()),
            Kind::Double | Kind::Float => "Float".to_string(),
            Kind::Bool => "Boolean".to_string(),
            Kind::String | Kind::Bytes => "String".to_string(),
            _ => "Int".to_string(),
        };
        let mut ty = if field.is_list() || field.is_map() {
            format!("[{base}!]")
        } else {
            base
        };
        if self.required(field) {
            ty.push('!');
        }
        ty
    }

    fn field_comment(&self, field: &FieldDescriptor) -> &'a str {
        self.field_spec(field).map(FieldSpec::comment).unwrap_or("")
    }

    fn message_comment(&self, msg: &MessageDescriptor) -> &'a str {
        self.specs
            .message(msg.full_name())
            .map(|m| m.comment())
            .unwrap_or("")
    }

    /// Exposed fields of `msg` with their GraphQL names.
    fn fields(&self, msg: &MessageDescriptor) -> Vec<(String, FieldDescriptor)> {
        msg.fields()
            .filter_map(|f| self.naming.output_name(&f).map(|name| (name, f)))
            .collect()
    }

    fn input_value(&self, out: &mut String, indent: &str, name: &str, field: &FieldDescriptor) {
        let spec = self.field_spec(field);
        description(out, indent, self.field_comment(field));
        let _ = write!(out, "{indent}{name}: {}", self.type_ref(field, true));
        if let Some(default) = spec.and_then(FieldSpec::default_value) {
            let _ = write!(out, " = {default}");
        }
        out.push('\n');
    }

    fn root_field(&self, method: &MethodSpec, field_name: &str) -> String {
        let mut out = String::new();
        description(&mut out, "", method.comment());

        let input = method.input();
        let args = self.fields(&input);
        out.push_str(field_name);
        if !args.is_empty() {
            out.push_str("(\n");
            for (name, field) in &args {
                self.input_value(&mut out, "  ", name, field);
            }
            out.push(')');
        }
        let _ = write!(out, ": {}", self.message_name(&method.output(), false));
        out
    }

    fn types(&self, reachable: &Reachable) -> String {
        let mut out = String::new();
        for msg in &reachable.objects {
            description(&mut out, "", self.message_comment(msg));
            let _ = writeln!(out, "type {} {{", self.message_name(msg, false));
            let fields = self.fields(msg);
            if fields.is_empty() {
                let _ = writeln!(out, "  {PLACEHOLDER}");
            }
            for (name, field) in &fields {
                description(&mut out, "  ", self.field_comment(field));
                let _ = writeln!(out, "  {name}: {}", self.type_ref(field, false));
            }
            out.push_str("}\n\n");
        }

        for msg in &reachable.inputs {
            description(&mut out, "", self.message_comment(msg));
            let _ = writeln!(out, "input {} {{", self.message_name(msg, true));
            let fields = self.fields(msg);
            if fields.is_empty() {
                let _ = writeln!(out, "  {PLACEHOLDER}");
            }
            for (name, field) in &fields {
                self.input_value(&mut out, "  ", name, field);
            }
            out.push_str("}\n\n");
        }

        for e in &reachable.enums {
            let spec = self.specs.enum_spec(e.full_name());
            description(&mut out, "", spec.map(|s| s.comment()).unwrap_or(""));
            let _ = writeln!(out, "enum {} {{", graphql_type_name(e.full_name()));
            for value in e.values() {
                let comment = spec
                    .and_then(|s| s.values().iter().find(|v| v.number() == value.number()))
                    .map(|v| v.comment())
                    .unwrap_or("");
                description(&mut out, "  ", comment);
                let _ = writeln!(out, "  {}", value.name());
            }
            out.push_str("}\n\n");
        }
        out
    }
}

fn description(out: &mut String, indent: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    let text = text.replace("\"\"\"", "\\\"\"\"");
    let _ = writeln!(out, "{indent}\"\"\"\n{indent}{text}\n{indent}\"\"\"");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_replace_dots() {
        assert_eq!(graphql_type_name("shop.v1.Item"), "shop_v1_Item");
        assert_eq!(graphql_type_name("Item"), "Item");
    }

    #[test]
    fn descriptions_escape_block_quotes() {
        let mut out = String::new();
        description(&mut out, "  ", "says \"\"\"hi\"\"\"");
        assert_eq!(out, "  \"\"\"\n  says \\\"\"\"hi\\\"\"\"\n  \"\"\"\n");

        let mut empty = String::new();
        description(&mut empty, "", "");
        assert!(empty.is_empty());
    }
}
