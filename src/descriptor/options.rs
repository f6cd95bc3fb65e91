//! `graphql.proto` option handling.
//!
//! Options are read back from the encoded option messages, so they resolve
//! whether or not the pool registered the extensions.

use crate::error::{Error, Result};
use crate::graphql::{GraphqlField, GraphqlSchema, GraphqlService, GraphqlType};
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage};
use prost_types::{
    descriptor_proto::ExtensionRange,
    field_descriptor_proto::{Label, Type},
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};

/// File name under which the option definitions are imported.
pub const GRAPHQL_PROTO: &str = "graphql.proto";

const DESCRIPTOR_PROTO: &str = "google/protobuf/descriptor.proto";

/// Field number of the `service`, `schema` and `field` extensions.
pub const EXTENSION_NUMBER: u32 = 1079;

/// `google.protobuf.ServiceOptions` as seen through the `graphql.service` extension.
#[derive(Clone, PartialEq, Message)]
pub struct ServiceOptionsExt {
    #[prost(message, optional, tag = "1079")]
    pub service: Option<GraphqlService>,
}

/// `google.protobuf.MethodOptions` as seen through the `graphql.schema` extension.
#[derive(Clone, PartialEq, Message)]
pub struct MethodOptionsExt {
    #[prost(message, optional, tag = "1079")]
    pub schema: Option<GraphqlSchema>,
}

/// `google.protobuf.FieldOptions` as seen through the `graphql.field` extension.
#[derive(Clone, PartialEq, Message)]
pub struct FieldOptionsExt {
    #[prost(message, optional, tag = "1079")]
    pub field: Option<GraphqlField>,
}

/// A `FileDescriptorSet` whose files are kept as raw bytes, so option
/// payloads survive untouched.
#[derive(Clone, PartialEq, Message)]
struct RawFileSet {
    #[prost(bytes = "vec", repeated, tag = "1")]
    file: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct FileHeader {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
    #[prost(string, repeated, tag = "3")]
    dependency: Vec<String>,
}

pub(crate) fn service_options(opts: &DynamicMessage) -> Result<Option<GraphqlService>> {
    Ok(decode_options::<ServiceOptionsExt>(opts)?.service)
}

pub(crate) fn method_options(opts: &DynamicMessage) -> Result<Option<GraphqlSchema>> {
    Ok(decode_options::<MethodOptionsExt>(opts)?.schema)
}

pub(crate) fn field_options(opts: &DynamicMessage) -> Result<Option<GraphqlField>> {
    Ok(decode_options::<FieldOptionsExt>(opts)?.field)
}

fn decode_options<T: Message + Default>(opts: &DynamicMessage) -> Result<T> {
    T::decode(opts.encode_to_vec().as_slice())
        .map_err(|e| Error::Schema(format!("malformed graphql option: {e}")))
}

/// Decode a serialized `FileDescriptorSet` into a pool.
///
/// When a file imports `graphql.proto` but the set does not carry it (protoc
/// run without `--include_imports`), the option definitions are supplied.
pub fn load_descriptor_pool(bytes: &[u8]) -> Result<DescriptorPool> {
    let raw = RawFileSet::decode(bytes)
        .map_err(|e| Error::Schema(format!("invalid descriptor set: {e}")))?;

    let mut names = Vec::with_capacity(raw.file.len());
    let mut needs_options = false;
    for file in &raw.file {
        let header = FileHeader::decode(file.as_slice())
            .map_err(|e| Error::Schema(format!("invalid file descriptor: {e}")))?;
        needs_options |= header.dependency.iter().any(|d| d == GRAPHQL_PROTO);
        names.push(header.name.unwrap_or_default());
    }

    let has = |name: &str| names.iter().any(|n| n == name);
    let mut files = Vec::with_capacity(raw.file.len() + 2);
    if needs_options && !has(GRAPHQL_PROTO) {
        if !has(DESCRIPTOR_PROTO) {
            files.push(descriptor_options_file().encode_to_vec());
        }
        files.push(graphql_options_file().encode_to_vec());
    }
    files.extend(raw.file);

    let merged = RawFileSet { file: files }.encode_to_vec();
    Ok(DescriptorPool::decode(merged.as_slice())?)
}

/// Descriptor of `graphql.proto`.
pub fn graphql_options_file() -> FileDescriptorProto {
    let field = |name: &str, number: i32, ty: Type, type_name: Option<&str>| FieldDescriptorProto {
        name: Some(name.to_string()),
        json_name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    };
    let extension = |name: &str, extendee: &str, type_name: &str| FieldDescriptorProto {
        extendee: Some(format!(".google.protobuf.{extendee}")),
        ..field(name, EXTENSION_NUMBER as i32, Type::Message, Some(type_name))
    };

    let graphql_type = [
        GraphqlType::Query,
        GraphqlType::Mutation,
        GraphqlType::Resolver,
    ];

    FileDescriptorProto {
        name: Some(GRAPHQL_PROTO.to_string()),
        package: Some("graphql".to_string()),
        dependency: vec![DESCRIPTOR_PROTO.to_string()],
        syntax: Some("proto3".to_string()),
        message_type: vec![
            DescriptorProto {
                name: Some("GraphqlService".to_string()),
                field: vec![
                    field("host", 1, Type::String, None),
                    field("insecure", 2, Type::Bool, None),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("GraphqlSchema".to_string()),
                field: vec![
                    field("type", 1, Type::Enum, Some(".graphql.GraphqlType")),
                    field("name", 2, Type::String, None),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("GraphqlField".to_string()),
                field: vec![
                    field("required", 1, Type::Bool, None),
                    field("name", 2, Type::String, None),
                    field("default", 3, Type::String, None),
                    field("omit", 4, Type::Bool, None),
                ],
                ..Default::default()
            },
        ],
        enum_type: vec![EnumDescriptorProto {
            name: Some("GraphqlType".to_string()),
            value: graphql_type
                .iter()
                .map(|ty| EnumValueDescriptorProto {
                    name: Some(ty.as_str_name().to_string()),
                    number: Some(*ty as i32),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }],
        extension: vec![
            extension("service", "ServiceOptions", ".graphql.GraphqlService"),
            extension("schema", "MethodOptions", ".graphql.GraphqlSchema"),
            extension("field", "FieldOptions", ".graphql.GraphqlField"),
        ],
        ..Default::default()
    }
}

/// The subset of `descriptor.proto` the option extensions attach to.
fn descriptor_options_file() -> FileDescriptorProto {
    let extendable = |name: &str| DescriptorProto {
        name: Some(name.to_string()),
        extension_range: vec![ExtensionRange {
            start: Some(1000),
            end: Some(536_870_912),
            options: None,
        }],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some(DESCRIPTOR_PROTO.to_string()),
        package: Some("google.protobuf".to_string()),
        message_type: vec![
            extendable("ServiceOptions"),
            extendable("MethodOptions"),
            extendable("FieldOptions"),
        ],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_file_registers_all_extensions() {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(descriptor_options_file())
            .expect("descriptor subset loads");
        pool.add_file_descriptor_proto(graphql_options_file())
            .expect("graphql.proto loads");

        for name in ["graphql.service", "graphql.schema", "graphql.field"] {
            let ext = pool
                .get_extension_by_name(name)
                .unwrap_or_else(|| panic!("{name} registered"));
            assert_eq!(ext.number(), EXTENSION_NUMBER);
        }
        assert!(pool.get_enum_by_name("graphql.GraphqlType").is_some());
    }

    #[test]
    fn carrier_reads_extension_payload() {
        let encoded = MethodOptionsExt {
            schema: Some(GraphqlSchema {
                r#type: GraphqlType::Mutation as i32,
                name: "createUser".to_string(),
            }),
        }
        .encode_to_vec();

        let decoded = MethodOptionsExt::decode(encoded.as_slice()).unwrap();
        let schema = decoded.schema.unwrap();
        assert_eq!(schema.name, "createUser");
        assert_eq!(GraphqlType::try_from(schema.r#type), Ok(GraphqlType::Mutation));
    }

    #[test]
    fn rejects_garbage_descriptor_set() {
        let err = load_descriptor_pool(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
