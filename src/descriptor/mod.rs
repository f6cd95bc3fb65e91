//! Navigable view over a compiled protobuf file.
//!
//! [`FileSpec`] wraps a [`prost_reflect::FileDescriptor`] and flattens its
//! services, messages and enums, nested ones included, into ordered
//! collections. Every element records the structural path of its declaration
//! inside the `FileDescriptorProto`, which is how source comments are looked
//! up.
//!
//! Paths follow `descriptor.proto` field numbers:
//!
//! | declaration             | path                     |
//! |-------------------------|--------------------------|
//! | top-level message `i`   | `[4, i]`                 |
//! | top-level enum `i`      | `[5, i]`                 |
//! | service `i`             | `[6, i]`                 |
//! | field `i` of message P  | `P + [2, i]`             |
//! | nested message `i` of P | `P + [3, i]`             |
//! | nested enum `i` of P    | `P + [4, i]`             |
//! | method `i` of service S | `S + [2, i]`             |
//! | value `i` of enum E     | `E + [2, i]`             |

mod enums;
mod message;
pub mod options;
mod service;
mod set;

pub use enums::{EnumSpec, EnumValueSpec};
pub use message::{FieldSpec, MessageSpec};
pub use options::{graphql_options_file, load_descriptor_pool};
pub use service::{MethodSpec, ServiceSpec};
pub use set::FileSpecSet;

use crate::error::{Error, Result};
use prost_reflect::{DescriptorPool, FileDescriptor, MessageDescriptor};
use prost_types::compiler::Version;
use prost_types::FileDescriptorProto;
use std::collections::HashMap;
use tracing::debug;

/// Source comments of a file, keyed by structural path.
#[derive(Debug, Clone, Default)]
pub struct Comments {
    by_path: HashMap<Vec<i32>, String>,
}

impl Comments {
    fn from_file(proto: &FileDescriptorProto) -> Self {
        let by_path = proto
            .source_code_info
            .iter()
            .flat_map(|info| info.location.iter())
            .filter_map(|loc| {
                let text = loc
                    .leading_comments
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .or(loc.trailing_comments.as_deref())?;
                let text = text.trim();
                (!text.is_empty()).then(|| (loc.path.clone(), text.to_string()))
            })
            .collect();
        Self { by_path }
    }

    /// Comment attached at exactly `path`, or `""`.
    pub fn get(&self, path: &[i32]) -> &str {
        self.by_path.get(path).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Extend a structural path without touching the parent's copy.
pub(crate) fn child_path(parent: &[i32], field: i32, index: usize) -> Vec<i32> {
    let mut path = Vec::with_capacity(parent.len() + 2);
    path.extend_from_slice(parent);
    path.push(field);
    path.push(index as i32);
    path
}

const FILE_MESSAGE: i32 = 4;
const FILE_ENUM: i32 = 5;
const FILE_SERVICE: i32 = 6;
const MESSAGE_NESTED: i32 = 3;
const MESSAGE_ENUM: i32 = 4;

/// A compiled protobuf file with everything the schema needs flattened out.
#[derive(Debug, Clone)]
pub struct FileSpec {
    descriptor: FileDescriptor,
    comments: Comments,
    services: Vec<ServiceSpec>,
    messages: Vec<MessageSpec>,
    enums: Vec<EnumSpec>,
    compiler_version: Option<Version>,
    is_camel: bool,
}

impl FileSpec {
    /// Build the flattened view of `descriptor`.
    ///
    /// `is_camel` selects whether GraphQL names use the protobuf JSON
    /// (lowerCamel) names instead of the declared snake_case names.
    pub fn new(
        descriptor: FileDescriptor,
        compiler_version: Option<Version>,
        is_camel: bool,
    ) -> Result<Self> {
        let comments = Comments::from_file(descriptor.file_descriptor_proto());

        let mut spec = Self {
            descriptor: descriptor.clone(),
            comments,
            services: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            compiler_version,
            is_camel,
        };

        for (i, message) in descriptor.messages().enumerate() {
            spec.collect_message(message, String::new(), vec![FILE_MESSAGE, i as i32])?;
        }
        for (i, enum_desc) in descriptor.enums().enumerate() {
            let path = vec![FILE_ENUM, i as i32];
            spec.enums
                .push(EnumSpec::new(enum_desc, String::new(), path, &spec.comments));
        }
        for (i, service) in descriptor.services().enumerate() {
            let path = vec![FILE_SERVICE, i as i32];
            spec.services
                .push(ServiceSpec::new(service, path, &spec.comments)?);
        }

        debug!(
            file = %spec.name(),
            services = spec.services.len(),
            messages = spec.messages.len(),
            enums = spec.enums.len(),
            "Loaded file descriptor"
        );

        Ok(spec)
    }

    /// Build from a standalone `FileDescriptorProto` with no imports.
    pub fn from_proto(
        proto: FileDescriptorProto,
        compiler_version: Option<Version>,
        is_camel: bool,
    ) -> Result<Self> {
        let name = proto.name().to_string();
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(proto)?;
        let file = pool
            .get_file_by_name(&name)
            .ok_or_else(|| Error::Internal(format!("file {name} missing after load")))?;
        Self::new(file, compiler_version, is_camel)
    }

    /// Depth-first walk. Nested enums and messages are hoisted into the flat
    /// collections with their accumulated path and dotted prefix.
    fn collect_message(
        &mut self,
        descriptor: MessageDescriptor,
        prefix: String,
        path: Vec<i32>,
    ) -> Result<()> {
        let nested_prefix = if prefix.is_empty() {
            descriptor.name().to_string()
        } else {
            format!("{prefix}.{}", descriptor.name())
        };

        for (i, enum_desc) in descriptor.child_enums().enumerate() {
            let enum_path = child_path(&path, MESSAGE_ENUM, i);
            self.enums.push(EnumSpec::new(
                enum_desc,
                nested_prefix.clone(),
                enum_path,
                &self.comments,
            ));
        }

        let children: Vec<_> = descriptor.child_messages().collect();
        self.messages
            .push(MessageSpec::new(descriptor, prefix, path.clone(), &self.comments)?);

        for (i, child) in children.into_iter().enumerate() {
            let child_path = child_path(&path, MESSAGE_NESTED, i);
            self.collect_message(child, nested_prefix.clone(), child_path)?;
        }
        Ok(())
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn package(&self) -> &str {
        self.descriptor.package_name()
    }

    /// Comment attached at `path`, or `""` when there is none.
    pub fn comment(&self, path: &[i32]) -> &str {
        self.comments.get(path)
    }

    pub fn comments(&self) -> &Comments {
        &self.comments
    }

    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// All messages, nested ones included, in depth-first declaration order.
    pub fn messages(&self) -> &[MessageSpec] {
        &self.messages
    }

    /// All enums, nested ones included.
    pub fn enums(&self) -> &[EnumSpec] {
        &self.enums
    }

    pub fn service(&self, full_name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.full_name() == full_name)
    }

    pub fn message(&self, full_name: &str) -> Option<&MessageSpec> {
        self.messages.iter().find(|m| m.full_name() == full_name)
    }

    pub fn enum_spec(&self, full_name: &str) -> Option<&EnumSpec> {
        self.enums.iter().find(|e| e.full_name() == full_name)
    }

    pub fn compiler_version(&self) -> Option<&Version> {
        self.compiler_version.as_ref()
    }

    /// Whether GraphQL names are the lowerCamel JSON names.
    pub fn is_camel(&self) -> bool {
        self.is_camel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{
        field_descriptor_proto::{Label, Type},
        source_code_info::Location,
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        MessageOptions, MethodDescriptorProto, ServiceDescriptorProto, SourceCodeInfo,
    };

    fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn comment(path: &[i32], text: &str) -> Location {
        Location {
            path: path.to_vec(),
            leading_comments: Some(format!(" {text}\n")),
            ..Default::default()
        }
    }

    fn sample_file() -> FileDescriptorProto {
        let innermost = DescriptorProto {
            name: Some("Innermost".to_string()),
            field: vec![field("flag", 1, Type::Bool)],
            ..Default::default()
        };
        let inner = DescriptorProto {
            name: Some("Inner".to_string()),
            field: vec![field("value", 1, Type::String)],
            nested_type: vec![innermost],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Mode".to_string()),
                value: vec![EnumValueDescriptorProto {
                    name: Some("MODE_UNSPECIFIED".to_string()),
                    number: Some(0),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let labels_entry = DescriptorProto {
            name: Some("LabelsEntry".to_string()),
            field: vec![field("key", 1, Type::String), field("value", 2, Type::String)],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![
                field("id", 1, Type::String),
                FieldDescriptorProto {
                    label: Some(Label::Repeated as i32),
                    type_name: Some(".demo.Outer.LabelsEntry".to_string()),
                    ..field("labels", 2, Type::Message)
                },
            ],
            nested_type: vec![inner, labels_entry],
            ..Default::default()
        };

        FileDescriptorProto {
            name: Some("demo.proto".to_string()),
            package: Some("demo".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![
                outer,
                DescriptorProto {
                    name: Some("Empty".to_string()),
                    ..Default::default()
                },
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Color".to_string()),
                value: vec![
                    EnumValueDescriptorProto {
                        name: Some("RED".to_string()),
                        number: Some(0),
                        ..Default::default()
                    },
                    EnumValueDescriptorProto {
                        name: Some("BLUE".to_string()),
                        number: Some(1),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("Things".to_string()),
                method: vec![
                    MethodDescriptorProto {
                        name: Some("GetOuter".to_string()),
                        input_type: Some(".demo.Empty".to_string()),
                        output_type: Some(".demo.Outer".to_string()),
                        ..Default::default()
                    },
                    MethodDescriptorProto {
                        name: Some("Touch".to_string()),
                        input_type: Some(".demo.Outer".to_string()),
                        output_type: Some(".demo.Empty".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            source_code_info: Some(SourceCodeInfo {
                location: vec![
                    comment(&[4, 0], "Outer message"),
                    comment(&[4, 0, 2, 0], "Identifier"),
                    comment(&[4, 0, 3, 0], "Inner message"),
                    comment(&[4, 0, 3, 0, 3, 0], "Innermost message"),
                    comment(&[4, 0, 3, 0, 4, 0], "Nested mode"),
                    comment(&[4, 1], "Nothing at all"),
                    comment(&[5, 0], "Colors"),
                    comment(&[5, 0, 2, 1], "The blue one"),
                    comment(&[6, 0], "Things service"),
                    comment(&[6, 0, 2, 1], "Touch a thing"),
                ],
            }),
            ..Default::default()
        }
    }

    fn load() -> FileSpec {
        FileSpec::from_proto(sample_file(), None, true).expect("file loads")
    }

    #[test]
    fn flattens_every_message_once() {
        let spec = load();
        let names: Vec<_> = spec.messages().iter().map(|m| m.full_name()).collect();
        assert_eq!(
            names,
            vec![
                "demo.Outer",
                "demo.Outer.Inner",
                "demo.Outer.Inner.Innermost",
                "demo.Outer.LabelsEntry",
                "demo.Empty",
            ]
        );
    }

    #[test]
    fn nested_paths_accumulate() {
        let spec = load();
        let innermost = spec.message("demo.Outer.Inner.Innermost").unwrap();
        assert_eq!(innermost.path(), &[4, 0, 3, 0, 3, 0]);
        assert_eq!(innermost.prefix(), "Outer.Inner");
        assert_eq!(innermost.comment(), "Innermost message");

        let entry = spec.message("demo.Outer.LabelsEntry").unwrap();
        assert_eq!(entry.path(), &[4, 0, 3, 1]);
        assert_eq!(entry.comment(), "");
    }

    #[test]
    fn nested_enums_are_hoisted_with_their_path() {
        let spec = load();
        let mode = spec.enum_spec("demo.Outer.Inner.Mode").unwrap();
        assert_eq!(mode.path(), &[4, 0, 3, 0, 4, 0]);
        assert_eq!(mode.prefix(), "Outer.Inner");
        assert_eq!(mode.comment(), "Nested mode");

        let color = spec.enum_spec("demo.Color").unwrap();
        assert_eq!(color.comment(), "Colors");
        assert_eq!(color.values()[1].name(), "BLUE");
        assert_eq!(color.values()[1].number(), 1);
        assert_eq!(color.values()[1].comment(), "The blue one");
        assert_eq!(spec.enums().len(), 2);
    }

    #[test]
    fn map_entry_fields_are_required() {
        let spec = load();
        let entry = spec.message("demo.Outer.LabelsEntry").unwrap();
        assert!(entry.is_map_entry());
        assert!(entry.fields().iter().all(FieldSpec::required));

        let outer = spec.message("demo.Outer").unwrap();
        assert!(!outer.is_map_entry());
        assert!(outer.fields().iter().all(|f| !f.required()));
        assert_eq!(outer.fields()[0].comment(), "Identifier");
    }

    #[test]
    fn methods_resolve_their_own_comments() {
        let spec = load();
        let service = &spec.services()[0];
        assert_eq!(service.full_name(), "demo.Things");
        assert_eq!(service.comment(), "Things service");
        assert_eq!(service.methods()[0].comment(), "");
        assert_eq!(service.methods()[1].path(), &[6, 0, 2, 1]);
        assert_eq!(service.methods()[1].comment(), "Touch a thing");
        assert!(service.host().is_none());
        assert!(!service.insecure());
    }

    #[test]
    fn missing_comment_is_empty() {
        let spec = load();
        assert_eq!(spec.comment(&[9, 9, 9]), "");
        assert_eq!(spec.comment(&[]), "");
    }

    #[test]
    fn keeps_file_metadata() {
        let version = Version {
            major: Some(25),
            minor: Some(1),
            patch: Some(0),
            suffix: None,
        };
        let spec = FileSpec::from_proto(sample_file(), Some(version.clone()), false).unwrap();
        assert_eq!(spec.package(), "demo");
        assert_eq!(spec.name(), "demo.proto");
        assert_eq!(spec.compiler_version(), Some(&version));
        assert!(!spec.is_camel());
    }
}
