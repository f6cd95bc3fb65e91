//! In-memory GraphQL schema assembly.
//!
//! A [`SchemaDocument`] is an ordered set of uniquely named type definitions
//! built from the `async-graphql` parser's type-system AST. Handlers
//! describe their root fields as [`FieldSignature`]s; [`build_schema`] turns
//! those into `Query` and `Mutation` root types. Every document must pass
//! [`SchemaDocument::merge_with_base_schema`] before it is served.

use crate::error::{Error, Result};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::parse_schema;
use async_graphql::parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, ObjectType, OperationType, Type,
    TypeDefinition, TypeKind, TypeSystemDefinition,
};
use async_graphql::{Name, Pos, Positioned};
use std::collections::HashSet;
use std::fmt::Write as _;

pub const QUERY_TYPE: &str = "Query";
pub const MUTATION_TYPE: &str = "Mutation";

const QUERY_DESCRIPTION: &str = "The query root of the schema.";
const MUTATION_DESCRIPTION: &str = "The mutation root of the schema.";

/// Scalars every schema gets for free.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Signature of one root field: its arguments, return type and description.
#[derive(Debug, Clone)]
pub struct FieldSignature {
    definition: FieldDefinition,
}

impl FieldSignature {
    /// Parse a field in SDL form, e.g. `getUser(id: String!): User`.
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        let doc = parse_schema(format!("type Signature {{ {sdl} }}"))
            .map_err(|e| Error::Schema(format!("invalid field signature `{sdl}`: {e}")))?;

        let field = doc
            .definitions
            .into_iter()
            .find_map(|def| match def {
                TypeSystemDefinition::Type(ty) => match ty.node.kind {
                    TypeKind::Object(obj) => obj.fields.into_iter().next(),
                    _ => None,
                },
                _ => None,
            })
            .ok_or_else(|| Error::Schema(format!("no field in signature `{sdl}`")))?;

        Ok(Self {
            definition: field.node,
        })
    }

    /// Wrap an already built definition.
    pub fn from_definition(definition: FieldDefinition) -> Self {
        Self { definition }
    }

    /// Field without arguments returning `ty` (SDL type syntax).
    pub fn new(name: &str, ty: &str) -> Result<Self> {
        let ty = Type::new(ty).ok_or_else(|| Error::Schema(format!("invalid type `{ty}`")))?;
        Ok(Self {
            definition: FieldDefinition {
                description: None,
                name: positioned(Name::new(name)),
                arguments: Vec::new(),
                ty: positioned(ty),
                directives: Vec::new(),
            },
        })
    }

    /// Add an argument.
    pub fn argument(mut self, name: &str, ty: &str) -> Result<Self> {
        let ty = Type::new(ty).ok_or_else(|| Error::Schema(format!("invalid type `{ty}`")))?;
        self.definition.arguments.push(positioned(InputValueDefinition {
            description: None,
            name: positioned(Name::new(name)),
            ty: positioned(ty),
            default_value: None,
            directives: Vec::new(),
        }));
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.definition.description =
            (!description.is_empty()).then(|| positioned(description));
        self
    }

    pub fn name(&self) -> &str {
        self.definition.name.node.as_str()
    }

    pub fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    /// The definition, renamed to the key it is exposed under.
    fn into_field(self, name: &str) -> Positioned<FieldDefinition> {
        let mut definition = self.definition;
        definition.name = positioned(Name::new(name));
        positioned(definition)
    }
}

/// Root fields keyed by exposed name. Iteration order is emission order.
pub type FieldMap = IndexMap<String, FieldSignature>;

/// Assemble the `Query` and `Mutation` root types.
///
/// A root type is emitted only when it has at least one field. Fields keep
/// the insertion order of their map, so equal inputs always yield the same
/// schema.
pub fn build_schema(queries: &FieldMap, mutations: &FieldMap) -> SchemaDocument {
    let mut doc = SchemaDocument::new();
    for (type_name, description, fields) in [
        (QUERY_TYPE, QUERY_DESCRIPTION, queries),
        (MUTATION_TYPE, MUTATION_DESCRIPTION, mutations),
    ] {
        if fields.is_empty() {
            continue;
        }
        let fields = fields
            .iter()
            .map(|(name, sig)| sig.clone().into_field(name))
            .collect();
        doc.types.insert(
            type_name.to_string(),
            TypeDefinition {
                extend: false,
                description: Some(positioned(description.to_string())),
                name: positioned(Name::new(type_name)),
                directives: Vec::new(),
                kind: TypeKind::Object(ObjectType {
                    implements: Vec::new(),
                    fields,
                }),
            },
        );
    }
    doc
}

/// Ordered collection of uniquely named type definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaDocument {
    types: IndexMap<String, TypeDefinition>,
}

impl SchemaDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse type definitions from SDL. Schema and directive definitions
    /// are ignored.
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        let doc = parse_schema(sdl).map_err(|e| Error::Schema(e.to_string()))?;
        let mut schema = Self::new();
        for def in doc.definitions {
            if let TypeSystemDefinition::Type(ty) = def {
                schema.add_type(ty.node)?;
            }
        }
        Ok(schema)
    }

    /// Add a definition. Re-adding an identical definition is a no-op; a
    /// different definition under a taken name is an error.
    pub fn add_type(&mut self, def: TypeDefinition) -> Result<()> {
        let name = def.name.node.to_string();
        match self.types.get(&name) {
            Some(existing) if render_type(existing) == render_type(&def) => Ok(()),
            Some(_) => Err(Error::Schema(format!(
                "conflicting definitions for type \"{name}\""
            ))),
            None => {
                self.types.insert(name, def);
                Ok(())
            }
        }
    }

    /// Fold `other` into this document. Root type fields are combined;
    /// a root field defined by both sides is an error.
    pub fn merge(&mut self, other: SchemaDocument) -> Result<()> {
        for (name, def) in other.types {
            let is_root = name == QUERY_TYPE || name == MUTATION_TYPE;
            match (self.types.get_mut(&name), is_root) {
                (Some(existing), true) => merge_root_fields(existing, def)?,
                _ => self.add_type(def)?,
            }
        }
        Ok(())
    }

    /// Add the builtin scalars and check that the document is a complete,
    /// well-formed schema.
    pub fn merge_with_base_schema(&mut self) -> Result<()> {
        for scalar in BUILTIN_SCALARS {
            if !self.types.contains_key(scalar) {
                self.types.insert(scalar.to_string(), scalar_definition(scalar));
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        for def in self.types.values() {
            let type_name = def.name.node.as_str();
            match &def.kind {
                TypeKind::Object(ObjectType { fields, .. }) => {
                    self.validate_fields(type_name, fields)?
                }
                TypeKind::Interface(iface) => self.validate_fields(type_name, &iface.fields)?,
                TypeKind::Union(union) => {
                    for member in &union.members {
                        if !matches!(self.kind_of(&member.node), Some(TypeKind::Object(_))) {
                            return Err(Error::Schema(format!(
                                "union \"{type_name}\" member \"{}\" is not an object type",
                                member.node
                            )));
                        }
                    }
                }
                TypeKind::Enum(e) if e.values.is_empty() => {
                    return Err(Error::Schema(format!(
                        "enum \"{type_name}\" must define one or more values"
                    )));
                }
                TypeKind::InputObject(input) => {
                    if input.fields.is_empty() {
                        return Err(Error::Schema(format!(
                            "input \"{type_name}\" must define one or more fields"
                        )));
                    }
                    let mut seen = HashSet::new();
                    for field in &input.fields {
                        let field_name = field.node.name.node.as_str();
                        if !seen.insert(field_name) {
                            return Err(Error::Schema(format!(
                                "field \"{type_name}.{field_name}\" defined more than once"
                            )));
                        }
                        self.expect_input_type(&field.node.ty.node, type_name, field_name)?;
                    }
                }
                TypeKind::Scalar | TypeKind::Enum(_) => {}
            }
        }
        Ok(())
    }

    fn validate_fields(
        &self,
        type_name: &str,
        fields: &[Positioned<FieldDefinition>],
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::Schema(format!(
                "type \"{type_name}\" must define one or more fields"
            )));
        }
        let mut seen = HashSet::new();
        for field in fields {
            let field = &field.node;
            let field_name = field.name.node.as_str();
            if !seen.insert(field_name) {
                return Err(Error::Schema(format!(
                    "field \"{type_name}.{field_name}\" defined more than once"
                )));
            }

            let named = named_type(&field.ty.node);
            match self.kind_of(named) {
                None => {
                    return Err(Error::Schema(format!(
                        "unknown type \"{named}\" on field \"{type_name}.{field_name}\""
                    )))
                }
                Some(TypeKind::InputObject(_)) => {
                    return Err(Error::Schema(format!(
                        "field \"{type_name}.{field_name}\" must be an output type, \"{named}\" is an input type"
                    )))
                }
                Some(_) => {}
            }

            for arg in &field.arguments {
                let arg_name = format!("{field_name}({})", arg.node.name.node);
                self.expect_input_type(&arg.node.ty.node, type_name, &arg_name)?;
            }
        }
        Ok(())
    }

    fn expect_input_type(&self, ty: &Type, owner: &str, member: &str) -> Result<()> {
        let named = named_type(ty);
        match self.kind_of(named) {
            Some(TypeKind::Scalar | TypeKind::Enum(_) | TypeKind::InputObject(_)) => Ok(()),
            Some(_) => Err(Error::Schema(format!(
                "\"{owner}.{member}\" must be an input type, \"{named}\" is an output type"
            ))),
            None => Err(Error::Schema(format!(
                "unknown type \"{named}\" on \"{owner}.{member}\""
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<&TypeKind> {
        self.types.get(name).map(|def| &def.kind)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Root object type for an operation, if the schema has one.
    pub fn root_type(&self, operation: OperationType) -> Option<&TypeDefinition> {
        match operation {
            OperationType::Query => self.get(QUERY_TYPE),
            OperationType::Mutation => self.get(MUTATION_TYPE),
            OperationType::Subscription => None,
        }
    }

    /// Field of an object or interface type.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        let fields = match self.kind_of(type_name)? {
            TypeKind::Object(obj) => &obj.fields,
            TypeKind::Interface(iface) => &iface.fields,
            _ => return None,
        };
        fields
            .iter()
            .map(|f| &f.node)
            .find(|f| f.name.node.as_str() == field_name)
    }

    /// Render the document as SDL.
    pub fn sdl(&self) -> String {
        self.types
            .values()
            .filter(|def| !BUILTIN_SCALARS.contains(&def.name.node.as_str()))
            .map(render_type)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn merge_root_fields(existing: &mut TypeDefinition, incoming: TypeDefinition) -> Result<()> {
    let root = existing.name.node.to_string();
    let (TypeKind::Object(target), TypeKind::Object(source)) = (&mut existing.kind, incoming.kind)
    else {
        return Err(Error::Schema(format!("root type \"{root}\" must be an object")));
    };
    for field in source.fields {
        let name = field.node.name.node.as_str();
        if target.fields.iter().any(|f| f.node.name.node.as_str() == name) {
            return Err(Error::Schema(format!(
                "field \"{root}.{name}\" is registered more than once"
            )));
        }
        target.fields.push(field);
    }
    Ok(())
}

fn scalar_definition(name: &str) -> TypeDefinition {
    TypeDefinition {
        extend: false,
        description: None,
        name: positioned(Name::new(name)),
        directives: Vec::new(),
        kind: TypeKind::Scalar,
    }
}

pub(crate) fn positioned<T>(node: T) -> Positioned<T> {
    Positioned::new(node, Pos::default())
}

/// Innermost named type, stripping lists and non-null wrappers.
pub fn named_type(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}

fn render_description(out: &mut String, description: &Option<Positioned<String>>, indent: &str) {
    if let Some(desc) = description {
        let text = desc.node.replace("\"\"\"", "\\\"\"\"");
        let _ = writeln!(out, "{indent}\"\"\"\n{indent}{text}\n{indent}\"\"\"");
    }
}

fn render_input_value(def: &InputValueDefinition) -> String {
    let mut out = format!("{}: {}", def.name.node, def.ty.node);
    if let Some(default) = &def.default_value {
        let _ = write!(out, " = {}", default.node);
    }
    out
}

fn render_field(out: &mut String, field: &FieldDefinition) {
    render_description(out, &field.description, "  ");
    let args = if field.arguments.is_empty() {
        String::new()
    } else {
        let args: Vec<_> = field
            .arguments
            .iter()
            .map(|a| render_input_value(&a.node))
            .collect();
        format!("({})", args.join(", "))
    };
    let _ = writeln!(out, "  {}{args}: {}", field.name.node, field.ty.node);
}

/// SDL text of a single definition.
pub fn render_type(def: &TypeDefinition) -> String {
    let mut out = String::new();
    render_description(&mut out, &def.description, "");
    let name = &def.name.node;
    match &def.kind {
        TypeKind::Scalar => {
            let _ = writeln!(out, "scalar {name}");
        }
        TypeKind::Object(obj) => {
            let implements = if obj.implements.is_empty() {
                String::new()
            } else {
                let names: Vec<_> = obj.implements.iter().map(|i| i.node.as_str()).collect();
                format!(" implements {}", names.join(" & "))
            };
            let _ = writeln!(out, "type {name}{implements} {{");
            obj.fields.iter().for_each(|f| render_field(&mut out, &f.node));
            out.push_str("}\n");
        }
        TypeKind::Interface(iface) => {
            let _ = writeln!(out, "interface {name} {{");
            iface.fields.iter().for_each(|f| render_field(&mut out, &f.node));
            out.push_str("}\n");
        }
        TypeKind::Union(union) => {
            let members: Vec<_> = union.members.iter().map(|m| m.node.as_str()).collect();
            let _ = writeln!(out, "union {name} = {}", members.join(" | "));
        }
        TypeKind::Enum(e) => {
            let _ = writeln!(out, "enum {name} {{");
            for value in &e.values {
                render_description(&mut out, &value.node.description, "  ");
                let _ = writeln!(out, "  {}", value.node.value.node);
            }
            out.push_str("}\n");
        }
        TypeKind::InputObject(input) => {
            let _ = writeln!(out, "input {name} {{");
            for field in &input.fields {
                render_description(&mut out, &field.node.description, "  ");
                let _ = writeln!(out, "  {}", render_input_value(&field.node));
            }
            out.push_str("}\n");
        }
    }
    out
}
