//! Schema generated from a descriptor set with `graphql.proto` options.

mod common;

use async_graphql::parser::types::{FieldDefinition, InputValueDefinition, TypeKind};
use async_graphql::Value;
use proto_graphql_gateway::descriptor::{load_descriptor_pool, FileSpecSet};
use proto_graphql_gateway::schema::render_type;
use proto_graphql_gateway::{Gateway, GraphqlHandler, GrpcClient, SchemaDocument, ServiceHandler};
use std::sync::Arc;

fn gateway(camel_case: bool) -> Gateway {
    Gateway::builder()
        .with_descriptor_set_bytes(common::shop_descriptor_set())
        .with_default_endpoint("127.0.0.1:1")
        .with_camel_case(camel_case)
        .build()
        .expect("gateway builds")
}

fn field<'a>(schema: &'a SchemaDocument, ty: &str, name: &str) -> &'a FieldDefinition {
    schema
        .field(ty, name)
        .unwrap_or_else(|| panic!("{ty}.{name} is missing"))
}

fn argument<'a>(field: &'a FieldDefinition, name: &str) -> &'a InputValueDefinition {
    &field
        .arguments
        .iter()
        .find(|arg| arg.node.name.node.as_str() == name)
        .unwrap_or_else(|| panic!("argument {name} is missing"))
        .node
}

fn input_fields(schema: &SchemaDocument, ty: &str) -> Vec<String> {
    match schema.kind_of(ty) {
        Some(TypeKind::InputObject(input)) => input
            .fields
            .iter()
            .map(|f| f.node.name.node.to_string())
            .collect(),
        other => panic!("{ty} is not an input type: {other:?}"),
    }
}

#[tokio::test]
async fn test_exposed_methods_become_root_fields() {
    let gateway = gateway(true);
    let schema = gateway.mux().schema();

    let product = field(schema, "Query", "product");
    assert_eq!(product.ty.node.to_string(), "shop_v1_Product");
    assert_eq!(
        argument(product, "productId").ty.node.to_string(),
        "String!"
    );
    assert!(product
        .description
        .as_ref()
        .is_some_and(|d| d.node.contains("Look up a product by id.")));

    let list = field(schema, "Query", "listProducts");
    assert_eq!(list.ty.node.to_string(), "shop_v1_ListProductsResponse");
    assert_eq!(
        argument(list, "category").ty.node.to_string(),
        "shop_v1_Category"
    );
    let limit = argument(list, "limit");
    assert_eq!(limit.ty.node.to_string(), "Int");
    assert_eq!(
        limit.default_value.as_ref().map(|v| v.node.clone()),
        Some(Value::Number(10.into()))
    );

    let create = field(schema, "Mutation", "createProduct");
    assert_eq!(
        argument(create, "product").ty.node.to_string(),
        "shop_v1_Product_Input!"
    );
}

#[tokio::test]
async fn test_unexposed_methods_are_skipped() {
    let gateway = gateway(true);
    let schema = gateway.mux().schema();

    // Resolver, streaming and option-less methods.
    for name in ["reindex", "watchProducts", "ping"] {
        assert!(schema.field("Query", name).is_none(), "{name} is exposed");
        assert!(schema.field("Mutation", name).is_none(), "{name} is exposed");
    }
}

#[tokio::test]
async fn test_message_types_follow_field_options() {
    let gateway = gateway(true);
    let schema = gateway.mux().schema();

    assert_eq!(
        field(schema, "shop_v1_Product", "priceCents").ty.node.to_string(),
        "Int"
    );
    assert_eq!(
        field(schema, "shop_v1_Product", "category").ty.node.to_string(),
        "shop_v1_Category"
    );
    assert_eq!(
        field(schema, "shop_v1_Product", "tags").ty.node.to_string(),
        "[String!]"
    );
    assert_eq!(
        field(schema, "shop_v1_ListProductsResponse", "products")
            .ty
            .node
            .to_string(),
        "[shop_v1_Product!]"
    );

    // Renamed and omitted fields.
    assert!(schema.field("shop_v1_Product", "title").is_some());
    assert!(schema.field("shop_v1_Product", "displayName").is_none());
    assert!(schema.field("shop_v1_Product", "internalNote").is_none());

    let input = input_fields(schema, "shop_v1_Product_Input");
    assert!(input.contains(&"title".to_string()));
    assert!(!input.iter().any(|f| f == "internalNote"));

    match schema.kind_of("shop_v1_Category") {
        Some(TypeKind::Enum(e)) => {
            let values: Vec<_> = e.values.iter().map(|v| v.node.value.node.to_string()).collect();
            assert_eq!(values, ["CATEGORY_UNSPECIFIED", "BOOKS", "GAMES"]);
        }
        other => panic!("shop_v1_Category is not an enum: {other:?}"),
    }

    // Request messages are flattened into arguments.
    assert!(!schema.contains("shop_v1_GetProductRequest_Input"));
}

#[tokio::test]
async fn test_snake_case_names_when_camel_case_is_off() {
    let gateway = gateway(false);
    let schema = gateway.mux().schema();

    let product = field(schema, "Query", "product");
    assert_eq!(
        argument(product, "product_id").ty.node.to_string(),
        "String!"
    );
    assert!(schema.field("shop_v1_Product", "price_cents").is_some());
    assert!(schema.field("shop_v1_Product", "priceCents").is_none());
    assert!(schema.field("shop_v1_Product", "title").is_some());
}

#[tokio::test]
async fn test_service_handler_exposes_methods() {
    let pool = load_descriptor_pool(&common::shop_descriptor_set()).expect("pool loads");
    let specs = FileSpecSet::new(&pool, true).expect("file specs");
    let client = GrpcClient::connect_lazy("127.0.0.1:1", true).expect("lazy client");

    let handler = ServiceHandler::new(&specs, "shop.v1.Catalog", client).expect("handler builds");

    assert_eq!(handler.name(), "shop.v1.Catalog");
    assert!(handler.case_conversion());
    let queries: Vec<_> = handler.queries().keys().cloned().collect();
    assert_eq!(queries, ["product", "listProducts"]);
    let mutations: Vec<_> = handler.mutations().keys().cloned().collect();
    assert_eq!(mutations, ["createProduct"]);
    assert_eq!(
        handler.method("product").map(|m| m.grpc_path()),
        Some("/shop.v1.Catalog/GetProduct".to_string())
    );
    assert!(handler
        .types()
        .iter()
        .any(|t| t.name.node.as_str() == "shop_v1_Product"));
}

#[tokio::test]
async fn test_unknown_service_is_rejected() {
    let pool = load_descriptor_pool(&common::shop_descriptor_set()).expect("pool loads");
    let specs = FileSpecSet::new(&pool, true).expect("file specs");
    let client = GrpcClient::connect_lazy("127.0.0.1:1", true).expect("lazy client");

    assert!(ServiceHandler::new(&specs, "shop.v1.Missing", client).is_err());
}

#[tokio::test]
async fn test_imported_messages_keep_field_options() {
    let gateway = Gateway::builder()
        .with_descriptor_set_bytes(common::split_shop_descriptor_set())
        .with_default_endpoint("127.0.0.1:1")
        .build()
        .expect("gateway builds");
    let schema = gateway.mux().schema();

    let product = field(schema, "Query", "product");
    assert_eq!(
        argument(product, "productId").ty.node.to_string(),
        "String!"
    );
    assert!(product
        .description
        .as_ref()
        .is_some_and(|d| d.node.contains("Look up a product by id.")));
    assert_eq!(
        argument(field(schema, "Query", "listProducts"), "limit")
            .default_value
            .as_ref()
            .map(|v| v.node.clone()),
        Some(Value::Number(10.into()))
    );

    assert!(schema.field("shop_v1_Product", "title").is_some());
    assert!(schema.field("shop_v1_Product", "displayName").is_none());
    assert!(schema.field("shop_v1_Product", "internalNote").is_none());
    assert!(schema
        .get("shop_v1_Product")
        .and_then(|t| t.description.as_ref())
        .is_some_and(|d| d.node.contains("A product in the catalog.")));
    let input = input_fields(schema, "shop_v1_Product_Input");
    assert!(!input.iter().any(|f| f == "internalNote"));
}

#[tokio::test]
async fn test_services_in_separate_files_share_types() {
    let gateway = Gateway::builder()
        .with_descriptor_set_bytes(common::split_shop_descriptor_set())
        .with_default_endpoint("127.0.0.1:1")
        .build()
        .expect("gateway builds");
    let schema = gateway.mux().schema();

    assert_eq!(gateway.mux().handlers().len(), 2);
    assert_eq!(
        field(schema, "Query", "featured").ty.node.to_string(),
        "shop_v1_Product"
    );
    assert_eq!(
        argument(field(schema, "Query", "featured"), "productId")
            .ty
            .node
            .to_string(),
        "String!"
    );
    assert!(schema.field("Query", "product").is_some());

    // The single-file layout renders the same shared type.
    let single = gateway_sdl_type(common::shop_descriptor_set(), "shop_v1_Product");
    assert_eq!(
        schema.get("shop_v1_Product").map(render_type),
        Some(single)
    );
}

#[tokio::test]
async fn test_handler_resolves_types_through_dependencies() {
    let pool = load_descriptor_pool(&common::split_shop_descriptor_set()).expect("pool loads");
    let api = pool
        .get_file_by_name("shop/v1/api.proto")
        .expect("file is in pool");
    let specs = FileSpecSet::with_dependencies(api, true).expect("file specs");
    assert!(specs.file("shop/v1/admin.proto").is_none());

    let client = GrpcClient::connect_lazy("127.0.0.1:1", true).expect("lazy client");
    let handler = ServiceHandler::new(&specs, "shop.v1.Catalog", client).expect("handler builds");

    let product = handler
        .types()
        .into_iter()
        .find(|t| t.name.node.as_str() == "shop_v1_Product")
        .expect("product type");
    match &product.kind {
        TypeKind::Object(object) => {
            let names: Vec<_> = object
                .fields
                .iter()
                .map(|f| f.node.name.node.to_string())
                .collect();
            assert!(names.contains(&"title".to_string()));
            assert!(!names.contains(&"internalNote".to_string()));
        }
        other => panic!("shop_v1_Product is not an object: {other:?}"),
    }
}

fn gateway_sdl_type(descriptor_set: Vec<u8>, ty: &str) -> String {
    let gateway = Gateway::builder()
        .with_descriptor_set_bytes(descriptor_set)
        .with_default_endpoint("127.0.0.1:1")
        .build()
        .expect("gateway builds");
    let def = gateway.mux().schema().get(ty).expect("type exists");
    render_type(def)
}

#[tokio::test]
async fn test_service_allowlist_filters_handlers() {
    let gateway = Gateway::builder()
        .with_descriptor_set_bytes(common::shop_descriptor_set())
        .with_default_endpoint("127.0.0.1:1")
        .with_services(["shop.v1.Other"])
        .add_handler(Arc::new(NoopHandler))
        .build()
        .expect("gateway builds");

    assert!(gateway.mux().schema().field("Query", "product").is_none());
    assert!(gateway.mux().schema().field("Query", "noop").is_some());
}

struct NoopHandler;

#[async_trait::async_trait]
impl GraphqlHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn create_connection(
        &self,
        _ctx: &proto_graphql_gateway::Context,
    ) -> proto_graphql_gateway::Result<proto_graphql_gateway::Connection> {
        Ok(proto_graphql_gateway::Connection::detached())
    }

    fn queries(&self) -> proto_graphql_gateway::schema::FieldMap {
        let mut fields = proto_graphql_gateway::schema::FieldMap::new();
        fields.insert(
            "noop".to_string(),
            proto_graphql_gateway::FieldSignature::new("noop", "Boolean").expect("signature"),
        );
        fields
    }

    fn mutations(&self) -> proto_graphql_gateway::schema::FieldMap {
        proto_graphql_gateway::schema::FieldMap::new()
    }

    async fn resolve(
        &self,
        _conn: &proto_graphql_gateway::Connection,
        _ctx: &proto_graphql_gateway::Context,
        _call: proto_graphql_gateway::FieldCall,
    ) -> proto_graphql_gateway::Result<serde_json::Value> {
        Ok(serde_json::Value::Bool(true))
    }
}
