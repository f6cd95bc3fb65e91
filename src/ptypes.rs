//! GraphQL representations of protobuf well-known types.
//!
//! `google.protobuf.Empty`, `google.protobuf.Timestamp` and the scalar
//! wrappers each map to a fixed object type (`Google_type_*`) and input type
//! (`Google_input_*`). The definitions are parsed once per process and shared
//! through [`WellKnownTypes::global`].

use async_graphql::parser::parse_schema;
use async_graphql::parser::types::{TypeDefinition, TypeSystemDefinition};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};

const EMPTY_SDL: &str = r#"
"Represents an empty type"
type Google_type_Empty {
  _: Boolean
}

"Represents an empty input type"
input Google_input_Empty {
  _: Boolean
}
"#;

const TIMESTAMP_SDL: &str = r#"
"Represents a timestamp with seconds and nanos"
type Google_type_Timestamp {
  seconds: Int!
  nanos: Int!
}

"Represents a timestamp input with seconds and nanos"
input Google_input_Timestamp {
  seconds: Int!
  nanos: Int!
}
"#;

/// Wrapper message, its GraphQL name suffix and the scalar it wraps.
const WRAPPERS: &[(&str, &str, &str)] = &[
    ("DoubleValue", "DoubleValue", "Float"),
    ("FloatValue", "FloatValue", "Float"),
    ("Int64Value", "Int64Value", "Int"),
    ("UInt64Value", "Uint64Value", "Int"),
    ("Int32Value", "Int32Value", "Int"),
    ("UInt32Value", "Uint32Value", "Int"),
    ("BoolValue", "BoolValue", "Boolean"),
    ("StringValue", "StringValue", "String"),
];

static REGISTRY: Lazy<WellKnownTypes> = Lazy::new(WellKnownTypes::build);
static BUILDS: AtomicUsize = AtomicUsize::new(0);

/// Object and input definitions for one well-known message.
#[derive(Debug)]
pub struct WellKnownType {
    proto_name: String,
    object: TypeDefinition,
    input: TypeDefinition,
}

impl WellKnownType {
    /// Fully qualified protobuf name, e.g. `google.protobuf.Timestamp`.
    pub fn proto_name(&self) -> &str {
        &self.proto_name
    }

    pub fn object(&self) -> &TypeDefinition {
        &self.object
    }

    pub fn input(&self) -> &TypeDefinition {
        &self.input
    }

    pub fn object_name(&self) -> &str {
        self.object.name.node.as_str()
    }

    pub fn input_name(&self) -> &str {
        self.input.name.node.as_str()
    }
}

/// Process-wide registry of well-known type fragments.
#[derive(Debug)]
pub struct WellKnownTypes {
    types: Vec<WellKnownType>,
}

impl WellKnownTypes {
    /// The shared registry. Built on first use; later callers, concurrent
    /// ones included, observe the same instance.
    pub fn global() -> &'static Self {
        &REGISTRY
    }

    fn build() -> Self {
        BUILDS.fetch_add(1, Ordering::SeqCst);

        let mut types = vec![
            parse_pair("google.protobuf.Empty", EMPTY_SDL),
            parse_pair("google.protobuf.Timestamp", TIMESTAMP_SDL),
        ];
        for (proto, name, scalar) in WRAPPERS {
            let sdl = format!(
                "\"Represents a {name} wrapper\"\n\
                 type Google_type_Wrappers_{name} {{\n  value: {scalar}!\n}}\n\n\
                 \"Represents a {name} input wrapper\"\n\
                 input Google_input_Wrappers_{name} {{\n  value: {scalar}!\n}}\n"
            );
            types.push(parse_pair(&format!("google.protobuf.{proto}"), &sdl));
        }

        Self { types }
    }

    /// Look up by fully qualified protobuf name.
    pub fn get(&self, proto_name: &str) -> Option<&WellKnownType> {
        self.types.iter().find(|t| t.proto_name == proto_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WellKnownType> {
        self.types.iter()
    }

    /// Every object and input definition, in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.iter().flat_map(|t| [&t.object, &t.input])
    }

    /// Number of times the registry has been constructed in this process.
    pub fn build_count() -> usize {
        BUILDS.load(Ordering::SeqCst)
    }
}

/// The embedded SDL is part of this crate; failing to parse it is a bug.
fn parse_pair(proto_name: &str, sdl: &str) -> WellKnownType {
    let doc = parse_schema(sdl)
        .unwrap_or_else(|e| panic!("embedded SDL for {proto_name} is invalid: {e}"));

    let mut defs = doc.definitions.into_iter().filter_map(|def| match def {
        TypeSystemDefinition::Type(ty) => Some(ty.node),
        _ => None,
    });
    let (Some(object), Some(input)) = (defs.next(), defs.next()) else {
        panic!("embedded SDL for {proto_name} must define an object and an input type");
    };

    WellKnownType {
        proto_name: proto_name.to_string(),
        object,
        input,
    }
}
