//! Shared fixtures: a `shop.v1` descriptor set carrying `graphql.proto`
//! options and an in-process `shop.v1.Catalog` upstream.

#![allow(dead_code)]

use parking_lot::Mutex;
use prost::Message;
use proto_graphql_gateway::descriptor::options::{
    FieldOptionsExt, MethodOptionsExt, ServiceOptionsExt,
};
use proto_graphql_gateway::graphql::{GraphqlField, GraphqlSchema, GraphqlType};
use prost_types::{
    field_descriptor_proto::{Label, Type},
    source_code_info::Location,
    EnumDescriptorProto, EnumValueDescriptorProto, SourceCodeInfo,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::Status;

// Descriptor messages with their options typed as the graphql extensions.
// `prost_types` drops extension payloads, so the fixtures are encoded
// through these instead.

#[derive(Clone, PartialEq, Message)]
pub struct FileSetProto {
    #[prost(message, repeated, tag = "1")]
    pub file: Vec<FileProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FileProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub package: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub dependency: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub message_type: Vec<MessageProto>,
    #[prost(message, repeated, tag = "5")]
    pub enum_type: Vec<EnumDescriptorProto>,
    #[prost(message, repeated, tag = "6")]
    pub service: Vec<ServiceProto>,
    #[prost(message, optional, tag = "9")]
    pub source_code_info: Option<SourceCodeInfo>,
    #[prost(string, optional, tag = "12")]
    pub syntax: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MessageProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub field: Vec<FieldProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FieldProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub number: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub label: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub type_name: Option<String>,
    #[prost(message, optional, tag = "8")]
    pub options: Option<FieldOptionsExt>,
    #[prost(string, optional, tag = "10")]
    pub json_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServiceProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub method: Vec<MethodProto>,
    #[prost(message, optional, tag = "3")]
    pub options: Option<ServiceOptionsExt>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MethodProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub input_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub output_type: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub options: Option<MethodOptionsExt>,
    #[prost(bool, optional, tag = "5")]
    pub client_streaming: Option<bool>,
    #[prost(bool, optional, tag = "6")]
    pub server_streaming: Option<bool>,
}

fn field(name: &str, json_name: &str, number: i32, ty: Type) -> FieldProto {
    FieldProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        type_name: None,
        options: None,
        json_name: Some(json_name.to_string()),
    }
}

fn typed(mut f: FieldProto, type_name: &str) -> FieldProto {
    f.type_name = Some(type_name.to_string());
    f
}

fn repeated(mut f: FieldProto) -> FieldProto {
    f.label = Some(Label::Repeated as i32);
    f
}

fn with_option(mut f: FieldProto, option: GraphqlField) -> FieldProto {
    f.options = Some(FieldOptionsExt {
        field: Some(option),
    });
    f
}

fn message(name: &str, field: Vec<FieldProto>) -> MessageProto {
    MessageProto {
        name: Some(name.to_string()),
        field,
    }
}

fn method(name: &str, input: &str, output: &str, schema: Option<(GraphqlType, &str)>) -> MethodProto {
    MethodProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".shop.v1.{input}")),
        output_type: Some(format!(".shop.v1.{output}")),
        options: schema.map(|(ty, name)| MethodOptionsExt {
            schema: Some(GraphqlSchema {
                r#type: ty as i32,
                name: name.to_string(),
            }),
        }),
        client_streaming: None,
        server_streaming: None,
    }
}

fn comment(path: &[i32], text: &str) -> Location {
    Location {
        path: path.to_vec(),
        leading_comments: Some(format!(" {text}\n")),
        ..Default::default()
    }
}

/// The `shop.v1` file:
///
/// ```proto
/// enum Category { CATEGORY_UNSPECIFIED = 0; BOOKS = 1; GAMES = 2; }
///
/// message GetProductRequest {
///   string product_id = 1 [(graphql.field) = {required: true}];
/// }
/// // A product in the catalog.
/// message Product {
///   string id = 1;
///   string name = 2;
///   int64 price_cents = 3;
///   Category category = 4;
///   repeated string tags = 5;
///   string internal_note = 6 [(graphql.field) = {omit: true}];
///   string display_name = 7 [(graphql.field) = {name: "title"}];
/// }
/// message ListProductsRequest {
///   Category category = 1;
///   int32 limit = 2 [(graphql.field) = {default: "10"}];
/// }
/// message ListProductsResponse { repeated Product products = 1; }
/// message CreateProductRequest {
///   Product product = 1 [(graphql.field) = {required: true}];
/// }
///
/// service Catalog {
///   // Look up a product by id.
///   rpc GetProduct(GetProductRequest) returns (Product) { QUERY "product" }
///   rpc ListProducts(ListProductsRequest) returns (ListProductsResponse) { QUERY }
///   rpc CreateProduct(CreateProductRequest) returns (Product) { MUTATION }
///   rpc Reindex(GetProductRequest) returns (Product) { RESOLVER }
///   rpc WatchProducts(GetProductRequest) returns (stream Product) { QUERY }
///   rpc Ping(GetProductRequest) returns (Product);
/// }
/// ```
pub fn shop_file() -> FileProto {
    let category = EnumDescriptorProto {
        name: Some("Category".to_string()),
        value: ["CATEGORY_UNSPECIFIED", "BOOKS", "GAMES"]
            .iter()
            .enumerate()
            .map(|(i, name)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(i as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let get_request = message(
        "GetProductRequest",
        vec![with_option(
            field("product_id", "productId", 1, Type::String),
            GraphqlField {
                required: true,
                ..Default::default()
            },
        )],
    );
    let product = message(
        "Product",
        vec![
            field("id", "id", 1, Type::String),
            field("name", "name", 2, Type::String),
            field("price_cents", "priceCents", 3, Type::Int64),
            typed(field("category", "category", 4, Type::Enum), ".shop.v1.Category"),
            repeated(field("tags", "tags", 5, Type::String)),
            with_option(
                field("internal_note", "internalNote", 6, Type::String),
                GraphqlField {
                    omit: true,
                    ..Default::default()
                },
            ),
            with_option(
                field("display_name", "displayName", 7, Type::String),
                GraphqlField {
                    name: "title".to_string(),
                    ..Default::default()
                },
            ),
        ],
    );
    let list_request = message(
        "ListProductsRequest",
        vec![
            typed(field("category", "category", 1, Type::Enum), ".shop.v1.Category"),
            with_option(
                field("limit", "limit", 2, Type::Int32),
                GraphqlField {
                    default: "10".to_string(),
                    ..Default::default()
                },
            ),
        ],
    );
    let list_response = message(
        "ListProductsResponse",
        vec![repeated(typed(
            field("products", "products", 1, Type::Message),
            ".shop.v1.Product",
        ))],
    );
    let create_request = message(
        "CreateProductRequest",
        vec![with_option(
            typed(field("product", "product", 1, Type::Message), ".shop.v1.Product"),
            GraphqlField {
                required: true,
                ..Default::default()
            },
        )],
    );

    let mut watch = method(
        "WatchProducts",
        "GetProductRequest",
        "Product",
        Some((GraphqlType::Query, "watchProducts")),
    );
    watch.server_streaming = Some(true);

    let catalog = ServiceProto {
        name: Some("Catalog".to_string()),
        method: vec![
            method(
                "GetProduct",
                "GetProductRequest",
                "Product",
                Some((GraphqlType::Query, "product")),
            ),
            method(
                "ListProducts",
                "ListProductsRequest",
                "ListProductsResponse",
                Some((GraphqlType::Query, "")),
            ),
            method(
                "CreateProduct",
                "CreateProductRequest",
                "Product",
                Some((GraphqlType::Mutation, "")),
            ),
            method(
                "Reindex",
                "GetProductRequest",
                "Product",
                Some((GraphqlType::Resolver, "")),
            ),
            watch,
            method("Ping", "GetProductRequest", "Product", None),
        ],
        options: None,
    };

    FileProto {
        name: Some("shop/v1/catalog.proto".to_string()),
        package: Some("shop.v1".to_string()),
        dependency: vec!["graphql.proto".to_string()],
        message_type: vec![get_request, product, list_request, list_response, create_request],
        enum_type: vec![category],
        service: vec![catalog],
        source_code_info: Some(SourceCodeInfo {
            location: vec![
                comment(&[6, 0, 2, 0], "Look up a product by id."),
                comment(&[4, 1], "A product in the catalog."),
            ],
        }),
        syntax: Some("proto3".to_string()),
    }
}

/// Serialized `FileDescriptorSet` holding [`shop_file`] only; the loader
/// supplies `graphql.proto`.
pub fn shop_descriptor_set() -> Vec<u8> {
    FileSetProto {
        file: vec![shop_file()],
    }
    .encode_to_vec()
}

/// [`shop_file`] split in two: `shop/v1/types.proto` declares the messages
/// and enum, `shop/v1/api.proto` imports it and declares `Catalog`.
pub fn split_shop_files() -> (FileProto, FileProto) {
    let mut types = shop_file();
    let catalog = types.service.remove(0);
    types.name = Some("shop/v1/types.proto".to_string());
    types.source_code_info = Some(SourceCodeInfo {
        location: vec![comment(&[4, 1], "A product in the catalog.")],
    });

    let api = FileProto {
        name: Some("shop/v1/api.proto".to_string()),
        package: Some("shop.v1".to_string()),
        dependency: vec!["graphql.proto".to_string(), "shop/v1/types.proto".to_string()],
        message_type: Vec::new(),
        enum_type: Vec::new(),
        service: vec![catalog],
        source_code_info: Some(SourceCodeInfo {
            location: vec![comment(&[6, 0, 2, 0], "Look up a product by id.")],
        }),
        syntax: Some("proto3".to_string()),
    };
    (types, api)
}

/// `shop/v1/admin.proto`: a second service over the shared types.
///
/// ```proto
/// service Admin {
///   rpc GetFeatured(GetProductRequest) returns (Product) { QUERY "featured" }
/// }
/// ```
pub fn admin_file() -> FileProto {
    FileProto {
        name: Some("shop/v1/admin.proto".to_string()),
        package: Some("shop.v1".to_string()),
        dependency: vec!["graphql.proto".to_string(), "shop/v1/types.proto".to_string()],
        message_type: Vec::new(),
        enum_type: Vec::new(),
        service: vec![ServiceProto {
            name: Some("Admin".to_string()),
            method: vec![method(
                "GetFeatured",
                "GetProductRequest",
                "Product",
                Some((GraphqlType::Query, "featured")),
            )],
            options: None,
        }],
        source_code_info: None,
        syntax: Some("proto3".to_string()),
    }
}

/// Serialized `FileDescriptorSet` with the types, the catalog service and
/// the admin service in three files.
pub fn split_shop_descriptor_set() -> Vec<u8> {
    let (types, api) = split_shop_files();
    FileSetProto {
        file: vec![types, api, admin_file()],
    }
    .encode_to_vec()
}

// Upstream wire messages.

#[derive(Clone, PartialEq, Message)]
pub struct GetProductRequest {
    #[prost(string, tag = "1")]
    pub product_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Product {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int64, tag = "3")]
    pub price_cents: i64,
    #[prost(int32, tag = "4")]
    pub category: i32,
    #[prost(string, repeated, tag = "5")]
    pub tags: Vec<String>,
    #[prost(string, tag = "6")]
    pub internal_note: String,
    #[prost(string, tag = "7")]
    pub display_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListProductsRequest {
    #[prost(int32, tag = "1")]
    pub category: i32,
    #[prost(int32, tag = "2")]
    pub limit: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListProductsResponse {
    #[prost(message, repeated, tag = "1")]
    pub products: Vec<Product>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CreateProductRequest {
    #[prost(message, optional, tag = "1")]
    pub product: Option<Product>,
}

pub const BOOKS: i32 = 1;
pub const MAX_PAGE: i32 = 5;

/// What the upstream observed.
#[derive(Debug, Default)]
pub struct CatalogState {
    /// Names passed to `CreateProduct`, in arrival order.
    pub created: Mutex<Vec<String>>,
    /// `authorization` metadata of every call.
    pub authorization: Mutex<Vec<String>>,
    /// `x-request-id` metadata of every call.
    pub request_ids: Mutex<Vec<String>>,
}

impl CatalogState {
    fn observe<T>(&self, request: &tonic::Request<T>) {
        let metadata = request.metadata();
        if let Some(auth) = metadata.get("authorization").and_then(|v| v.to_str().ok()) {
            self.authorization.lock().push(auth.to_string());
        }
        if let Some(id) = metadata.get("x-request-id").and_then(|v| v.to_str().ok()) {
            self.request_ids.lock().push(id.to_string());
        }
    }

    /// `missing` is NOT_FOUND; `slow` never answers within a test's deadline.
    async fn get_product(&self, request: tonic::Request<GetProductRequest>) -> Result<Product, Status> {
        self.observe(&request);
        let id = request.into_inner().product_id;
        match id.as_str() {
            "missing" => Err(Status::not_found(format!("product {id} not found"))),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(Status::unavailable("too slow"))
            }
            _ => Ok(Product {
                name: format!("Book {id}"),
                id,
                price_cents: 1299,
                category: BOOKS,
                tags: vec!["paper".to_string()],
                internal_note: "do not show".to_string(),
                display_name: "The Book".to_string(),
            }),
        }
    }

    async fn list_products(
        &self,
        request: tonic::Request<ListProductsRequest>,
    ) -> Result<ListProductsResponse, Status> {
        self.observe(&request);
        let req = request.into_inner();
        let products = (0..req.limit.min(MAX_PAGE))
            .map(|i| Product {
                id: format!("p{i}"),
                category: req.category,
                ..Default::default()
            })
            .collect();
        Ok(ListProductsResponse { products })
    }

    async fn create_product(
        &self,
        request: tonic::Request<CreateProductRequest>,
    ) -> Result<Product, Status> {
        self.observe(&request);
        let product = request
            .into_inner()
            .product
            .ok_or_else(|| Status::invalid_argument("product is required"))?;
        let id = {
            let mut created = self.created.lock();
            created.push(product.name.clone());
            format!("p{}", created.len())
        };
        Ok(Product { id, ..product })
    }
}

macro_rules! unary {
    ($svc:ident, $req:ty, $resp:ty, $method:ident) => {
        struct $svc(Arc<CatalogState>);

        impl UnaryService<$req> for $svc {
            type Response = $resp;
            type Future = BoxFuture<tonic::Response<$resp>, Status>;

            fn call(&mut self, request: tonic::Request<$req>) -> Self::Future {
                let state = self.0.clone();
                Box::pin(async move { state.$method(request).await.map(tonic::Response::new) })
            }
        }
    };
}

unary!(GetProductSvc, GetProductRequest, Product, get_product);
unary!(ListProductsSvc, ListProductsRequest, ListProductsResponse, list_products);
unary!(CreateProductSvc, CreateProductRequest, Product, create_product);

/// `shop.v1.Catalog` server.
#[derive(Clone, Default)]
pub struct CatalogServer {
    state: Arc<CatalogState>,
}

impl NamedService for CatalogServer {
    const NAME: &'static str = "shop.v1.Catalog";
}

impl<B> Service<http::Request<B>> for CatalogServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let state = self.state.clone();
        match req.uri().path() {
            "/shop.v1.Catalog/GetProduct" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<Product, GetProductRequest>::default());
                Ok(grpc.unary(GetProductSvc(state), req).await)
            }),
            "/shop.v1.Catalog/ListProducts" => Box::pin(async move {
                let mut grpc =
                    Grpc::new(ProstCodec::<ListProductsResponse, ListProductsRequest>::default());
                Ok(grpc.unary(ListProductsSvc(state), req).await)
            }),
            "/shop.v1.Catalog/CreateProduct" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<Product, CreateProductRequest>::default());
                Ok(grpc.unary(CreateProductSvc(state), req).await)
            }),
            _ => Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    "grpc-status",
                    http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            }),
        }
    }
}

/// Start a catalog upstream on an ephemeral port.
pub async fn spawn_catalog() -> (SocketAddr, Arc<CatalogState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let server = CatalogServer::default();
    let state = server.state.clone();

    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(server)
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    (addr, state)
}
