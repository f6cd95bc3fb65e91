use super::{child_path, options, Comments};
use crate::error::Result;
use crate::graphql::GraphqlField;
use prost_reflect::{Cardinality, FieldDescriptor, MessageDescriptor};

const MESSAGE_FIELD: i32 = 2;

/// A message and its fields, nested or top-level.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    descriptor: MessageDescriptor,
    prefix: String,
    path: Vec<i32>,
    comment: String,
    fields: Vec<FieldSpec>,
}

impl MessageSpec {
    pub(super) fn new(
        descriptor: MessageDescriptor,
        prefix: String,
        path: Vec<i32>,
        comments: &Comments,
    ) -> Result<Self> {
        let is_map_entry = descriptor.is_map_entry();
        let fields = descriptor
            .fields()
            .enumerate()
            .map(|(i, field)| {
                let field_path = child_path(&path, MESSAGE_FIELD, i);
                FieldSpec::new(field, field_path, comments, is_map_entry)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            comment: comments.get(&path).to_string(),
            descriptor,
            prefix,
            path,
            fields,
        })
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    /// Dotted names of the enclosing messages; empty at top level.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, number: u32) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.number() == number)
    }

    /// Synthetic `XxxEntry` message backing a map field.
    pub fn is_map_entry(&self) -> bool {
        self.descriptor.is_map_entry()
    }
}

/// A message field with its GraphQL overrides.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    descriptor: FieldDescriptor,
    path: Vec<i32>,
    comment: String,
    required: bool,
    options: Option<GraphqlField>,
}

impl FieldSpec {
    fn new(
        descriptor: FieldDescriptor,
        path: Vec<i32>,
        comments: &Comments,
        in_map_entry: bool,
    ) -> Result<Self> {
        let options = options::field_options(&descriptor.options())?;
        // Map keys and values are never null.
        let required = in_map_entry
            || descriptor.cardinality() == Cardinality::Required
            || options.as_ref().is_some_and(|o| o.required);

        Ok(Self {
            comment: comments.get(&path).to_string(),
            descriptor,
            path,
            required,
            options,
        })
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn json_name(&self) -> &str {
        self.descriptor.json_name()
    }

    pub fn number(&self) -> u32 {
        self.descriptor.number()
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn options(&self) -> Option<&GraphqlField> {
        self.options.as_ref()
    }

    /// Excluded from the GraphQL types.
    pub fn omitted(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.omit)
    }

    /// GraphQL name override, if one was declared.
    pub fn name_override(&self) -> Option<&str> {
        self.options
            .as_ref()
            .map(|o| o.name.as_str())
            .filter(|n| !n.is_empty())
    }

    /// Name exposed in GraphQL.
    pub fn graphql_name(&self, is_camel: bool) -> &str {
        match self.name_override() {
            Some(name) => name,
            None if is_camel => self.json_name(),
            None => self.name(),
        }
    }

    /// Default literal for input positions, if one was declared.
    pub fn default_value(&self) -> Option<&str> {
        self.options
            .as_ref()
            .map(|o| o.default.as_str())
            .filter(|d| !d.is_empty())
    }
}
