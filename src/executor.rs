//! Operation execution against the resident schema.
//!
//! A request moves through `parse` → [`normalize`] → [`execute`]. Parsing
//! uses the `async-graphql` parser. Normalization selects the operation,
//! expands fragments, and checks every selection against the
//! [`SchemaDocument`], producing a [`RootNode`] of [`SelectedField`]s.
//! Execution dispatches each root field to the handler that registered it:
//! query fields concurrently, mutation fields one after another.

use crate::error::{Error, GraphQLError, PathSegment, Result};
use crate::handler::{FieldCall, GraphqlHandler};
use crate::middleware::Context;
use crate::request::{marshal_request, Variables};
use crate::schema::{named_type, SchemaDocument, BUILTIN_SCALARS};
use crate::types::GraphQLResponse;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    BaseType, DocumentOperations, ExecutableDocument, Field, FieldDefinition, FragmentDefinition,
    OperationDefinition, OperationType, Selection, SelectionSet, Type, TypeKind,
    VariableDefinition,
};
use async_graphql::{Name, Pos, Positioned};
use async_graphql_value::{ConstValue, Value};
use futures::future::join_all;
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::Status;
use tracing::debug;

const TYPENAME: &str = "__typename";

/// Parse a query document. Syntax errors carry their location.
pub fn parse(query: &str) -> std::result::Result<ExecutableDocument, Vec<GraphQLError>> {
    async_graphql::parser::parse_query(query)
        .map_err(|e| vec![GraphQLError::from_parser_error(&e)])
}

/// Kind of node the executor starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NodeKind {
    Object,
}

/// A field selection checked against the schema.
#[derive(Debug, Clone)]
pub struct SelectedField {
    response_key: String,
    name: String,
    parent_type: String,
    pos: Pos,
    arguments: Vec<(Name, Value)>,
    ty: Type,
    selection: Vec<SelectedField>,
    resolved: bool,
}

impl SelectedField {
    /// Alias if present, else the field name.
    pub fn response_key(&self) -> &str {
        &self.response_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_type(&self) -> &str {
        &self.parent_type
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    /// Arguments as written, variables unresolved.
    pub fn arguments(&self) -> &[(Name, Value)] {
        &self.arguments
    }

    /// Declared type of the field.
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn selection(&self) -> &[SelectedField] {
        &self.selection
    }

    /// Whether this field, or one below it, is dispatched to a handler.
    pub fn has_resolvers_recursively(&self) -> bool {
        self.resolved || self.selection.iter().any(Self::has_resolvers_recursively)
    }
}

/// Entry point of an execution: the root type's selected fields.
#[derive(Debug, Clone)]
pub struct RootNode {
    schema: Arc<SchemaDocument>,
    operation_type: OperationType,
    fields: Vec<SelectedField>,
}

impl RootNode {
    pub fn new(
        schema: Arc<SchemaDocument>,
        operation_type: OperationType,
        fields: Vec<SelectedField>,
    ) -> Self {
        Self {
            schema,
            operation_type,
            fields,
        }
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::Object
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }

    pub fn fields(&self) -> &[SelectedField] {
        &self.fields
    }

    pub fn has_resolvers_recursively(&self) -> bool {
        self.fields.iter().any(SelectedField::has_resolvers_recursively)
    }

    fn type_name(&self) -> String {
        self.schema
            .root_type(self.operation_type)
            .map(|def| def.name.node.to_string())
            .unwrap_or_default()
    }
}

/// A validated operation ready to execute.
#[derive(Debug, Clone)]
pub struct NormalizedOperation {
    root: RootNode,
    variables: Vec<VariableDefinition>,
}

impl NormalizedOperation {
    pub fn root(&self) -> &RootNode {
        &self.root
    }

    pub fn variable_definitions(&self) -> &[VariableDefinition] {
        &self.variables
    }
}

/// Root field owners, per operation type.
#[derive(Clone, Default)]
pub struct FieldRegistry {
    queries: HashMap<String, Arc<dyn GraphqlHandler>>,
    mutations: HashMap<String, Arc<dyn GraphqlHandler>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        operation: OperationType,
        field: impl Into<String>,
        handler: Arc<dyn GraphqlHandler>,
    ) {
        let map = match operation {
            OperationType::Mutation => &mut self.mutations,
            _ => &mut self.queries,
        };
        map.insert(field.into(), handler);
    }

    pub fn get(&self, operation: OperationType, field: &str) -> Option<&Arc<dyn GraphqlHandler>> {
        match operation {
            OperationType::Query => self.queries.get(field),
            OperationType::Mutation => self.mutations.get(field),
            OperationType::Subscription => None,
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len() + self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut queries: Vec<_> = self.queries.keys().collect();
        let mut mutations: Vec<_> = self.mutations.keys().collect();
        queries.sort();
        mutations.sort();
        f.debug_struct("FieldRegistry")
            .field("queries", &queries)
            .field("mutations", &mutations)
            .finish()
    }
}

/// Select and validate the operation to run.
pub fn normalize(
    schema: &Arc<SchemaDocument>,
    doc: &ExecutableDocument,
    operation_name: Option<&str>,
) -> std::result::Result<NormalizedOperation, Vec<GraphQLError>> {
    let operation = select_operation(doc, operation_name).map_err(|e| vec![e])?;
    let op = &operation.node;

    if op.ty == OperationType::Subscription {
        return Err(vec![validation_error(
            "Subscriptions are not supported",
            operation.pos,
        )]);
    }

    let mut normalizer = Normalizer {
        schema: schema.as_ref(),
        fragments: &doc.fragments,
        declared: HashSet::new(),
        errors: Vec::new(),
    };
    normalizer.reject_directives(&op.directives);
    normalizer.check_variable_definitions(op);

    let root_type = match schema.root_type(op.ty) {
        Some(def) => def.name.node.to_string(),
        None => {
            return Err(vec![validation_error(
                format!("Schema does not define a {} root type", operation_label(op.ty)),
                operation.pos,
            )])
        }
    };

    let mut fields = normalizer.selection(&root_type, &[&op.selection_set.node]);
    for field in &mut fields {
        field.resolved = field.name != TYPENAME;
    }

    if !normalizer.errors.is_empty() {
        return Err(normalizer.errors);
    }

    Ok(NormalizedOperation {
        root: RootNode::new(schema.clone(), op.ty, fields),
        variables: op
            .variable_definitions
            .iter()
            .map(|def| def.node.clone())
            .collect(),
    })
}

fn select_operation<'a>(
    doc: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> std::result::Result<&'a Positioned<OperationDefinition>, GraphQLError> {
    let operation_name = operation_name.filter(|name| !name.is_empty());
    match (&doc.operations, operation_name) {
        (DocumentOperations::Single(op), _) => Ok(op),
        (DocumentOperations::Multiple(ops), Some(name)) => ops
            .get(name)
            .ok_or_else(|| GraphQLError::new(format!("Unknown operation named \"{name}\"."))),
        (DocumentOperations::Multiple(ops), None) => match ops.len() {
            0 => Err(GraphQLError::new("No operation found in the query")),
            1 => ops
                .values()
                .next()
                .ok_or_else(|| GraphQLError::new("No operation found in the query")),
            _ => Err(GraphQLError::new(
                "Must provide operation name if query contains multiple operations.",
            )),
        },
    }
}

fn operation_label(ty: OperationType) -> &'static str {
    match ty {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}

fn validation_error(message: impl Into<String>, pos: Pos) -> GraphQLError {
    Error::Validation(message.into()).into_graphql_error_at(Some(pos), &[])
}

struct Normalizer<'a> {
    schema: &'a SchemaDocument,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    declared: HashSet<String>,
    errors: Vec<GraphQLError>,
}

impl<'a> Normalizer<'a> {
    fn error(&mut self, message: impl Into<String>, pos: Pos) {
        self.errors.push(validation_error(message, pos));
    }

    fn reject_directives<T>(&mut self, directives: &[Positioned<T>]) {
        if let Some(directive) = directives.first() {
            self.error("Directives are not supported", directive.pos);
        }
    }

    fn check_variable_definitions(&mut self, op: &OperationDefinition) {
        for def in &op.variable_definitions {
            let name = def.node.name.node.to_string();
            self.reject_directives(&def.node.directives);
            if !self.declared.insert(name.clone()) {
                self.error(
                    format!("There can be only one variable named \"${name}\"."),
                    def.pos,
                );
            }
            let ty = &def.node.var_type.node;
            let is_input = matches!(
                self.schema.kind_of(named_type(ty)),
                Some(TypeKind::Scalar | TypeKind::Enum(_) | TypeKind::InputObject(_))
            );
            if !is_input {
                self.error(
                    format!("Variable \"${name}\" cannot be non-input type \"{ty}\"."),
                    def.pos,
                );
            }
        }
    }

    fn check_variables_used(&mut self, value: &Value, pos: Pos) {
        match value {
            Value::Variable(name) if !self.declared.contains(name.as_str()) => {
                self.error(format!("Variable \"${name}\" is not defined."), pos);
            }
            Value::List(items) => {
                for item in items {
                    self.check_variables_used(item, pos);
                }
            }
            Value::Object(fields) => {
                for item in fields.values() {
                    self.check_variables_used(item, pos);
                }
            }
            _ => {}
        }
    }

    /// Flatten fragments into the list of fields selected on `parent`.
    fn collect(
        &mut self,
        parent: &str,
        set: &'a SelectionSet,
        out: &mut Vec<&'a Positioned<Field>>,
        spreading: &mut Vec<&'a str>,
    ) {
        for item in &set.items {
            match &item.node {
                Selection::Field(field) => {
                    self.reject_directives(&field.node.directives);
                    out.push(field);
                }
                Selection::FragmentSpread(spread) => {
                    self.reject_directives(&spread.node.directives);
                    let name = spread.node.fragment_name.node.as_str();
                    if spreading.contains(&name) {
                        self.error(
                            format!("Cannot spread fragment \"{name}\" within itself."),
                            spread.pos,
                        );
                        continue;
                    }
                    let fragments = self.fragments;
                    let Some(fragment) = fragments.get(name) else {
                        self.error(format!("Unknown fragment \"{name}\"."), spread.pos);
                        continue;
                    };
                    self.reject_directives(&fragment.node.directives);
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if !self.applies(parent, condition, spread.pos) {
                        continue;
                    }
                    spreading.push(name);
                    self.collect(parent, &fragment.node.selection_set.node, out, spreading);
                    spreading.pop();
                }
                Selection::InlineFragment(inline) => {
                    self.reject_directives(&inline.node.directives);
                    if let Some(condition) = &inline.node.type_condition {
                        if !self.applies(parent, condition.node.on.node.as_str(), inline.pos) {
                            continue;
                        }
                    }
                    self.collect(parent, &inline.node.selection_set.node, out, spreading);
                }
            }
        }
    }

    fn applies(&mut self, parent: &str, condition: &str, pos: Pos) -> bool {
        if condition == parent {
            return true;
        }
        if self.schema.contains(condition) {
            self.error(
                format!(
                    "Fragment cannot be spread here as objects of type \"{parent}\" can never be of type \"{condition}\"."
                ),
                pos,
            );
        } else {
            self.error(format!("Unknown type \"{condition}\"."), pos);
        }
        false
    }

    /// Validate and merge the fields of `sets`, all selected on `parent`.
    fn selection(&mut self, parent: &str, sets: &[&'a SelectionSet]) -> Vec<SelectedField> {
        let mut raw = Vec::new();
        for set in sets {
            self.collect(parent, set, &mut raw, &mut Vec::new());
        }

        let mut groups: IndexMap<&str, Vec<&'a Positioned<Field>>> = IndexMap::new();
        for field in raw {
            groups
                .entry(field.node.response_key().node.as_str())
                .or_default()
                .push(field);
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, fields) in groups {
            let first = fields[0];
            let conflicting = fields.iter().skip(1).any(|f| {
                f.node.name.node != first.node.name.node
                    || sorted_arguments(&f.node) != sorted_arguments(&first.node)
            });
            if conflicting {
                self.error(
                    format!(
                        "Fields \"{key}\" conflict because they select different fields or arguments."
                    ),
                    first.pos,
                );
                continue;
            }
            if let Some(field) = self.field(parent, key, &fields) {
                out.push(field);
            }
        }
        out
    }

    fn field(
        &mut self,
        parent: &str,
        key: &str,
        fields: &[&'a Positioned<Field>],
    ) -> Option<SelectedField> {
        let first = fields[0];
        let name = first.node.name.node.as_str();
        let sets: Vec<&'a SelectionSet> =
            fields.iter().map(|f| &f.node.selection_set.node).collect();
        let has_selection = sets.iter().any(|s| !s.items.is_empty());

        let mut selected = SelectedField {
            response_key: key.to_string(),
            name: name.to_string(),
            parent_type: parent.to_string(),
            pos: first.pos,
            arguments: first
                .node
                .arguments
                .iter()
                .map(|(n, v)| (n.node.clone(), v.node.clone()))
                .collect(),
            ty: Type {
                base: BaseType::Named(Name::new("String")),
                nullable: false,
            },
            selection: Vec::new(),
            resolved: false,
        };

        if name == TYPENAME {
            if !first.node.arguments.is_empty() || has_selection {
                self.error(format!("Field \"{TYPENAME}\" takes no arguments or selections."), first.pos);
                return None;
            }
            return Some(selected);
        }

        let schema = self.schema;
        let Some(def) = schema.field(parent, name) else {
            self.error(
                format!("Cannot query field \"{name}\" on type \"{parent}\"."),
                first.pos,
            );
            return None;
        };
        self.check_arguments(parent, first, def);
        selected.ty = def.ty.node.clone();

        let type_name = named_type(&def.ty.node);
        match schema.kind_of(type_name) {
            Some(TypeKind::Object(_)) if has_selection => {
                selected.selection = self.selection(type_name, &sets);
            }
            Some(TypeKind::Object(_)) => self.error(
                format!(
                    "Field \"{name}\" of type \"{}\" must have a selection of subfields.",
                    def.ty.node
                ),
                first.pos,
            ),
            Some(TypeKind::Scalar | TypeKind::Enum(_)) if has_selection => self.error(
                format!(
                    "Field \"{name}\" must not have a selection since type \"{}\" has no subfields.",
                    def.ty.node
                ),
                first.pos,
            ),
            Some(TypeKind::Scalar | TypeKind::Enum(_)) => {}
            Some(_) => self.error(
                format!("Field \"{name}\" returns \"{type_name}\", which cannot be selected."),
                first.pos,
            ),
            None => self.error(format!("Unknown type \"{type_name}\"."), first.pos),
        }
        Some(selected)
    }

    fn check_arguments(&mut self, parent: &str, field: &Positioned<Field>, def: &FieldDefinition) {
        let name = field.node.name.node.as_str();
        for (arg, value) in &field.node.arguments {
            if !def.arguments.iter().any(|a| a.node.name.node == arg.node) {
                self.error(
                    format!("Unknown argument \"{}\" on field \"{parent}.{name}\".", arg.node),
                    arg.pos,
                );
            }
            self.check_variables_used(&value.node, value.pos);
        }
        for arg in &def.arguments {
            let arg = &arg.node;
            let provided = field
                .node
                .arguments
                .iter()
                .any(|(n, _)| n.node == arg.name.node);
            if !provided && !arg.ty.node.nullable && arg.default_value.is_none() {
                self.error(
                    format!(
                        "Field \"{name}\" argument \"{}\" of type \"{}\" is required but not provided.",
                        arg.name.node, arg.ty.node
                    ),
                    field.pos,
                );
            }
        }
    }
}

fn sorted_arguments(field: &Field) -> Vec<(&str, &Value)> {
    let mut args: Vec<_> = field
        .arguments
        .iter()
        .map(|(n, v)| (n.node.as_str(), &v.node))
        .collect();
    args.sort_by(|a, b| a.0.cmp(b.0));
    args
}

/// Run a normalized operation.
///
/// Errors from independent root fields are all collected. When any field
/// fails the response carries only `errors`.
pub async fn execute(
    operation: &NormalizedOperation,
    registry: &FieldRegistry,
    ctx: &Context,
    variables: &Variables,
) -> GraphQLResponse {
    Execution {
        root: &operation.root,
        definitions: &operation.variables,
        root_type: operation.root.type_name(),
        registry,
        ctx,
        variables,
    }
    .run()
    .await
}

struct Execution<'a> {
    root: &'a RootNode,
    definitions: &'a [VariableDefinition],
    root_type: String,
    registry: &'a FieldRegistry,
    ctx: &'a Context,
    variables: &'a Variables,
}

type FieldResult = std::result::Result<JsonValue, Vec<GraphQLError>>;

impl<'a> Execution<'a> {
    async fn run(self) -> GraphQLResponse {
        if let Err(errors) = self.check_provided_variables() {
            return GraphQLResponse::errors(errors);
        }

        let fields = self.root.fields();
        let results: Vec<FieldResult> = match self.root.operation_type() {
            OperationType::Mutation => {
                let mut results = Vec::with_capacity(fields.len());
                for field in fields {
                    if self.ctx.is_cancelled() || self.ctx.remaining() == Some(Duration::ZERO)
                    {
                        debug!(
                            request_id = %self.ctx.request_id,
                            field = %field.name(),
                            "Abandoning remaining mutation fields"
                        );
                        results.push(Err(vec![self.interrupted().into_graphql_error_at(
                            Some(field.pos()),
                            &[PathSegment::from(field.response_key())],
                        )]));
                        break;
                    }
                    results.push(self.resolve_root(field).await);
                }
                results
            }
            _ => join_all(fields.iter().map(|field| self.resolve_root(field))).await,
        };

        let mut data = Map::new();
        let mut errors = Vec::new();
        for (field, result) in fields.iter().zip(results) {
            match result {
                Ok(value) => {
                    data.insert(field.response_key().to_string(), value);
                }
                Err(errs) => errors.extend(errs),
            }
        }

        if errors.is_empty() {
            GraphQLResponse::success(JsonValue::Object(data))
        } else {
            GraphQLResponse::errors(errors)
        }
    }

    fn interrupted(&self) -> Error {
        if self.ctx.is_cancelled() {
            Error::Grpc(Status::cancelled("request cancelled"))
        } else {
            Error::Grpc(Status::deadline_exceeded("request deadline exceeded"))
        }
    }

    fn definition(&self, name: &str) -> Option<&VariableDefinition> {
        self.definitions.iter().find(|d| d.name.node.as_str() == name)
    }

    fn check_provided_variables(&self) -> std::result::Result<(), Vec<GraphQLError>> {
        let errors: Vec<_> = self
            .definitions
            .iter()
            .filter(|def| !def.var_type.node.nullable && def.default_value.is_none())
            .filter(|def| {
                !matches!(self.variables.get(&def.name.node), Some(Ok(ref v)) if !v.is_null())
            })
            .map(|def| {
                Error::InvalidInput(format!(
                    "Variable \"${}\" of required type \"{}\" was not provided.",
                    def.name.node, def.var_type.node
                ))
                .into_graphql_error_at(Some(def.name.pos), &[])
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn variable(&self, name: &str) -> Result<Option<ConstValue>> {
        match self.variables.get(name) {
            Some(value) => Ok(Some(ConstValue::from_json(value?)?)),
            None => Ok(self
                .definition(name)
                .and_then(|d| d.default_value.as_ref())
                .map(|v| v.node.clone())),
        }
    }

    async fn resolve_root(&self, field: &SelectedField) -> FieldResult {
        let mut path = vec![PathSegment::from(field.response_key())];
        if field.name() == TYPENAME {
            return Ok(JsonValue::String(self.root_type.clone()));
        }
        let value = self
            .invoke(field)
            .await
            .map_err(|e| vec![e.into_graphql_error_at(Some(field.pos()), &path)])?;
        self.complete(field, field.ty(), value, &mut path)
            .map_err(|e| vec![e])
    }

    async fn invoke(&self, field: &SelectedField) -> Result<JsonValue> {
        let operation = self.root.operation_type();
        let handler = self.registry.get(operation, field.name()).ok_or_else(|| {
            Error::Internal(format!("no handler registered for field {}", field.name()))
        })?;
        let def = self
            .root
            .schema()
            .field(&self.root_type, field.name())
            .ok_or_else(|| Error::Internal(format!("field {} left the schema", field.name())))?;

        let args = self.resolve_arguments(field, def)?;
        let arguments = marshal_request(Some(&JsonValue::Object(args)), handler.case_conversion())?;

        if self.ctx.is_cancelled() {
            return Err(self.interrupted());
        }

        let conn = handler.create_connection(self.ctx).await?;
        let call = FieldCall {
            operation,
            field: field.name().to_string(),
            arguments,
        };
        debug!(
            request_id = %self.ctx.request_id,
            handler = %handler.name(),
            field = %call.field,
            "Resolving root field"
        );

        let result = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(Error::Grpc(Status::cancelled("request cancelled"))),
            _ = deadline_elapsed(self.ctx.deadline()) => {
                Err(Error::Grpc(Status::deadline_exceeded("request deadline exceeded")))
            }
            result = handler.resolve(&conn, self.ctx, call) => result,
        };
        conn.close();
        result
    }

    fn resolve_arguments(
        &self,
        field: &SelectedField,
        def: &FieldDefinition,
    ) -> Result<Map<String, JsonValue>> {
        let mut args = Map::new();
        for arg in &def.arguments {
            let arg = &arg.node;
            let name = arg.name.node.as_str();
            let provided = field
                .arguments()
                .iter()
                .find(|(n, _)| n.as_str() == name)
                .map(|(_, v)| v);

            let value = match provided {
                Some(Value::Variable(var)) => self.variable(var)?,
                Some(value) => Some(value.clone().into_const_with(|var| {
                    self.variable(&var).map(|v| v.unwrap_or(ConstValue::Null))
                })?),
                None => None,
            };
            let value = match value.or_else(|| arg.default_value.as_ref().map(|d| d.node.clone())) {
                Some(value) => value,
                None if arg.ty.node.nullable => continue,
                None => {
                    return Err(Error::InvalidInput(format!(
                        "argument \"{name}\" of type \"{}\" is required",
                        arg.ty.node
                    )))
                }
            };
            args.insert(
                name.to_string(),
                coerce_input(self.root.schema(), value, &arg.ty.node, name)?,
            );
        }
        Ok(args)
    }

    fn complete(
        &self,
        field: &SelectedField,
        ty: &Type,
        value: JsonValue,
        path: &mut Vec<PathSegment>,
    ) -> std::result::Result<JsonValue, GraphQLError> {
        if value.is_null() {
            return if ty.nullable {
                Ok(JsonValue::Null)
            } else {
                Err(completion_error(
                    field,
                    path,
                    format!(
                        "Cannot return null for non-nullable field {}.{}.",
                        field.parent_type(),
                        field.name()
                    ),
                ))
            };
        }

        match &ty.base {
            BaseType::List(inner) => {
                let JsonValue::Array(items) = value else {
                    return Err(completion_error(
                        field,
                        path,
                        format!("Expected a list for field {}.", field.name()),
                    ));
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    let completed = self.complete(field, inner, item, path);
                    path.pop();
                    out.push(completed?);
                }
                Ok(JsonValue::Array(out))
            }
            BaseType::Named(name) => self.complete_named(field, name, value, path),
        }
    }

    fn complete_named(
        &self,
        field: &SelectedField,
        type_name: &str,
        value: JsonValue,
        path: &mut Vec<PathSegment>,
    ) -> std::result::Result<JsonValue, GraphQLError> {
        match self.root.schema().kind_of(type_name) {
            Some(TypeKind::Object(_)) => {
                let JsonValue::Object(object) = value else {
                    return Err(completion_error(
                        field,
                        path,
                        format!("Expected an object of type {type_name}."),
                    ));
                };
                let mut out = Map::new();
                for child in field.selection() {
                    let value = if child.name() == TYPENAME {
                        JsonValue::String(type_name.to_string())
                    } else {
                        path.push(PathSegment::from(child.response_key()));
                        let raw = object.get(child.name()).cloned().unwrap_or(JsonValue::Null);
                        let completed = self.complete(child, child.ty(), raw, path);
                        path.pop();
                        completed?
                    };
                    out.insert(child.response_key().to_string(), value);
                }
                Ok(JsonValue::Object(out))
            }
            Some(TypeKind::Enum(def)) => match value {
                JsonValue::String(s) if def.values.iter().any(|v| v.node.value.node.as_str() == s) => {
                    Ok(JsonValue::String(s))
                }
                other => Err(completion_error(
                    field,
                    path,
                    format!("Enum \"{type_name}\" cannot represent value: {other}"),
                )),
            },
            Some(TypeKind::Scalar) => {
                let shown = value.to_string();
                serialize_scalar(type_name, value).ok_or_else(|| {
                    completion_error(
                        field,
                        path,
                        format!("{type_name} cannot represent value: {shown}"),
                    )
                })
            }
            _ => Err(completion_error(
                field,
                path,
                format!("Type \"{type_name}\" cannot be completed."),
            )),
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn completion_error(field: &SelectedField, path: &[PathSegment], message: String) -> GraphQLError {
    GraphQLError::new(message)
        .at(field.pos())
        .with_path(path.to_vec())
        .with_extension("code", serde_json::json!("INTERNAL_ERROR"))
}

/// Serialize a resolved leaf as `scalar`.
fn serialize_scalar(scalar: &str, value: JsonValue) -> Option<JsonValue> {
    match (scalar, value) {
        ("Int", JsonValue::Number(n)) if n.is_i64() || n.is_u64() => Some(JsonValue::Number(n)),
        ("Int", JsonValue::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0)
            .map(|f| JsonValue::from(f as i64)),
        ("Int", JsonValue::String(s)) => s.parse::<i64>().ok().map(JsonValue::from),
        ("Float", JsonValue::Number(n)) => Some(JsonValue::Number(n)),
        ("Float", JsonValue::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number),
        ("String", JsonValue::String(s)) => Some(JsonValue::String(s)),
        ("String", v @ (JsonValue::Number(_) | JsonValue::Bool(_))) => {
            Some(JsonValue::String(v.to_string()))
        }
        ("Boolean", JsonValue::Bool(b)) => Some(JsonValue::Bool(b)),
        ("ID", JsonValue::String(s)) => Some(JsonValue::String(s)),
        ("ID", JsonValue::Number(n)) => Some(JsonValue::String(n.to_string())),
        (scalar, value) if !BUILTIN_SCALARS.contains(&scalar) => Some(value),
        _ => None,
    }
}

/// Coerce an argument value to its declared input type.
pub fn coerce_input(
    schema: &SchemaDocument,
    value: ConstValue,
    ty: &Type,
    at: &str,
) -> Result<JsonValue> {
    if matches!(value, ConstValue::Null) {
        return if ty.nullable {
            Ok(JsonValue::Null)
        } else {
            Err(Error::InvalidInput(format!(
                "\"{at}\" of non-null type \"{ty}\" must not be null"
            )))
        };
    }
    match &ty.base {
        BaseType::List(inner) => match value {
            ConstValue::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| coerce_input(schema, item, inner, &format!("{at}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            single => Ok(JsonValue::Array(vec![coerce_input(
                schema, single, inner, at,
            )?])),
        },
        BaseType::Named(name) => coerce_named(schema, value, name, at),
    }
}

fn coerce_named(
    schema: &SchemaDocument,
    value: ConstValue,
    type_name: &str,
    at: &str,
) -> Result<JsonValue> {
    let invalid =
        |value: &ConstValue| Error::InvalidInput(format!("\"{at}\": {type_name} cannot represent {value}"));

    match (type_name, value) {
        ("Int", ConstValue::Number(n)) if n.is_i64() || n.is_u64() => Ok(JsonValue::Number(n)),
        ("Float", ConstValue::Number(n)) => Ok(JsonValue::Number(n)),
        ("String", ConstValue::String(s)) => Ok(JsonValue::String(s)),
        ("Boolean", ConstValue::Boolean(b)) => Ok(JsonValue::Bool(b)),
        ("ID", ConstValue::String(s)) => Ok(JsonValue::String(s)),
        ("ID", ConstValue::Number(n)) if n.is_i64() || n.is_u64() => {
            Ok(JsonValue::String(n.to_string()))
        }
        (_, value) => match schema.kind_of(type_name) {
            Some(TypeKind::Enum(def)) => {
                let name = match &value {
                    ConstValue::Enum(name) => name.to_string(),
                    ConstValue::String(s) => s.clone(),
                    other => return Err(invalid(other)),
                };
                if def.values.iter().any(|v| v.node.value.node.as_str() == name) {
                    Ok(JsonValue::String(name))
                } else {
                    Err(invalid(&value))
                }
            }
            Some(TypeKind::InputObject(def)) => {
                let ConstValue::Object(mut fields) = value else {
                    return Err(invalid(&value));
                };
                if let Some(unknown) = fields
                    .keys()
                    .find(|key| !def.fields.iter().any(|f| &f.node.name.node == *key))
                {
                    return Err(Error::InvalidInput(format!(
                        "\"{at}\": field \"{unknown}\" is not defined by type \"{type_name}\""
                    )));
                }
                let mut out = Map::new();
                for input in &def.fields {
                    let input = &input.node;
                    let name = input.name.node.as_str();
                    let given = fields
                        .shift_remove(name)
                        .or_else(|| input.default_value.as_ref().map(|d| d.node.clone()));
                    match given {
                        Some(v) => {
                            let v = coerce_input(schema, v, &input.ty.node, &format!("{at}.{name}"))?;
                            out.insert(name.to_string(), v);
                        }
                        None if input.ty.node.nullable => {}
                        None => {
                            return Err(Error::InvalidInput(format!(
                                "\"{at}.{name}\" of required type \"{}\" was not provided",
                                input.ty.node
                            )))
                        }
                    }
                }
                Ok(JsonValue::Object(out))
            }
            Some(TypeKind::Scalar) if !BUILTIN_SCALARS.contains(&type_name) => {
                Ok(value.into_json()?)
            }
            _ => Err(invalid(&value)),
        },
    }
}
