//! gRPC client plumbing.
//!
//! [`GrpcClient`] owns a tonic [`Channel`] to one upstream. Calls are made
//! with [`DynamicMessage`]s through [`ReflectCodec`], so no generated client
//! code is needed. The JSON conversions here translate between GraphQL
//! values and protobuf messages, with GraphQL field names supplied by a
//! [`FieldNaming`].

use crate::error::{Error, Result};
use base64::Engine as _;
use parking_lot::RwLock;
use prost::Message;
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value as ProstValue,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

/// Connection to one gRPC upstream.
#[derive(Clone, Debug)]
pub struct GrpcClient {
    endpoint: String,
    channel: Channel,
}

impl GrpcClient {
    /// Connect to `endpoint` now. `https://` endpoints use TLS with the
    /// platform roots.
    pub async fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = with_scheme(&endpoint.into(), true);
        let channel = build_endpoint(&endpoint)?.connect().await?;
        debug!(endpoint = %endpoint, "Connected to gRPC upstream");
        Ok(Self { endpoint, channel })
    }

    /// Create a client that connects on first use.
    ///
    /// An address without a scheme gets `http://` when `insecure` is set and
    /// `https://` otherwise.
    pub fn connect_lazy(endpoint: impl Into<String>, insecure: bool) -> Result<Self> {
        let endpoint = with_scheme(&endpoint.into(), insecure);
        let channel = build_endpoint(&endpoint)?.connect_lazy();
        Ok(Self { endpoint, channel })
    }

    /// Wrap an existing channel.
    pub fn from_channel(endpoint: impl Into<String>, channel: Channel) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

fn with_scheme(endpoint: &str, insecure: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if insecure {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    }
}

fn build_endpoint(uri: &str) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(uri.to_string())?;
    if uri.starts_with("https://") {
        Ok(endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?)
    } else {
        Ok(endpoint)
    }
}

/// Make a unary call on `channel`.
///
/// `path` is the `/package.Service/Method` route; the response is decoded
/// as `output`.
pub async fn unary_call(
    channel: Channel,
    path: &str,
    request: DynamicMessage,
    output: MessageDescriptor,
    metadata: MetadataMap,
    timeout: Option<Duration>,
) -> Result<DynamicMessage> {
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| Error::Connection(format!("gRPC not ready: {e}")))?;

    let path: PathAndQuery = path
        .parse()
        .map_err(|e| Error::Internal(format!("invalid gRPC path {path}: {e}")))?;

    let mut req = tonic::Request::new(request);
    *req.metadata_mut() = metadata;
    if let Some(timeout) = timeout {
        req.set_timeout(timeout);
    }

    let response = grpc.unary(req, path, ReflectCodec::new(output)).await?;
    Ok(response.into_inner())
}

/// Metadata value for `value`, if it is valid ASCII metadata.
pub fn ascii_metadata(value: &str) -> Option<AsciiMetadataValue> {
    value.parse().ok()
}

/// Named clients shared between handlers.
#[derive(Clone, Default)]
pub struct GrpcClientPool {
    clients: Arc<RwLock<HashMap<String, GrpcClient>>>,
}

impl GrpcClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, client: GrpcClient) {
        self.clients.write().insert(name.into(), client);
    }

    pub fn get(&self, name: &str) -> Option<GrpcClient> {
        self.clients.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl std::fmt::Debug for GrpcClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClientPool")
            .field("clients", &self.names())
            .finish()
    }
}

/// Codec for encoding/decoding dynamic protobuf messages
#[derive(Clone)]
pub struct ReflectCodec {
    output: MessageDescriptor,
}

impl ReflectCodec {
    pub fn new(output: MessageDescriptor) -> Self {
        Self { output }
    }
}

impl Codec for ReflectCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = ReflectEncoder;
    type Decoder = ReflectDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        ReflectEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        ReflectDecoder {
            desc: self.output.clone(),
        }
    }
}

pub struct ReflectEncoder;

impl Encoder for ReflectEncoder {
    type Item = DynamicMessage;
    type Error = tonic::Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| tonic::Status::internal(format!("encode error: {e}")))
    }
}

pub struct ReflectDecoder {
    desc: MessageDescriptor,
}

impl Decoder for ReflectDecoder {
    type Item = DynamicMessage;
    type Error = tonic::Status;

    /// Called once per complete frame. An empty frame is a message with
    /// every field at its default.
    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(self.desc.clone(), src)
            .map(Some)
            .map_err(|e| tonic::Status::internal(format!("decode error: {e}")))
    }
}

/// Maps protobuf fields to GraphQL field names.
pub trait FieldNaming: Send + Sync {
    /// Output name of `field`, or `None` when the field is not exposed.
    fn output_name(&self, field: &FieldDescriptor) -> Option<String>;

    /// Field of `message` addressed by the argument key `key`.
    fn input_field(&self, message: &MessageDescriptor, key: &str) -> Option<FieldDescriptor>;
}

/// Protobuf names, or their lowerCamel JSON names when `camel` is set.
#[derive(Debug, Clone, Copy)]
pub struct DefaultNaming {
    pub camel: bool,
}

impl FieldNaming for DefaultNaming {
    fn output_name(&self, field: &FieldDescriptor) -> Option<String> {
        Some(if self.camel {
            field.json_name().to_string()
        } else {
            field.name().to_string()
        })
    }

    fn input_field(&self, message: &MessageDescriptor, key: &str) -> Option<FieldDescriptor> {
        message
            .get_field_by_name(key)
            .or_else(|| message.get_field_by_json_name(key))
    }
}

/// Key GraphQL uses as the placeholder field of empty types.
pub const PLACEHOLDER_FIELD: &str = "_";

/// Build a request message from a JSON object.
///
/// Unknown keys are rejected; `null` leaves a field unset.
pub fn json_to_message(
    json: &Map<String, JsonValue>,
    desc: &MessageDescriptor,
    naming: &dyn FieldNaming,
) -> Result<DynamicMessage> {
    let mut msg = DynamicMessage::new(desc.clone());
    for (key, value) in json {
        if key == PLACEHOLDER_FIELD {
            continue;
        }
        let field = naming.input_field(desc, key).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unknown field \"{key}\" for message {}",
                desc.full_name()
            ))
        })?;
        if value.is_null() {
            continue;
        }
        let converted = json_to_field_value(value, &field, naming)?;
        msg.try_set_field(&field, converted).map_err(|e| {
            Error::InvalidInput(format!("invalid value for {}: {e}", field.full_name()))
        })?;
    }
    Ok(msg)
}

fn json_to_field_value(
    json: &JsonValue,
    field: &FieldDescriptor,
    naming: &dyn FieldNaming,
) -> Result<ProstValue> {
    if field.is_map() {
        return json_to_map(json, field, naming);
    }
    if field.is_list() {
        let kind = field.kind();
        return match json {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| json_to_single(item, &kind, field, naming))
                .collect::<Result<Vec<_>>>()
                .map(ProstValue::List),
            single => Ok(ProstValue::List(vec![json_to_single(
                single, &kind, field, naming,
            )?])),
        };
    }
    json_to_single(json, &field.kind(), field, naming)
}

/// Maps arrive as a list of `{key, value}` entries, or as a plain object.
fn json_to_map(
    json: &JsonValue,
    field: &FieldDescriptor,
    naming: &dyn FieldNaming,
) -> Result<ProstValue> {
    let Kind::Message(entry) = field.kind() else {
        return Err(Error::Internal(format!(
            "map field {} has no entry message",
            field.full_name()
        )));
    };
    let key_field = entry.map_entry_key_field();
    let value_field = entry.map_entry_value_field();

    let mut pairs: Vec<(JsonValue, JsonValue)> = Vec::new();
    match json {
        JsonValue::Array(entries) => {
            for item in entries {
                let JsonValue::Object(obj) = item else {
                    return Err(mismatch(field, "a {key, value} object", item));
                };
                let key = obj.get("key").cloned().unwrap_or(JsonValue::Null);
                let value = obj.get("value").cloned().unwrap_or(JsonValue::Null);
                pairs.push((key, value));
            }
        }
        JsonValue::Object(obj) => {
            pairs.extend(
                obj.iter()
                    .map(|(k, v)| (JsonValue::String(k.clone()), v.clone())),
            );
        }
        other => return Err(mismatch(field, "a list of map entries", other)),
    }

    let mut map = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        let key = json_to_map_key(&key, &key_field)?;
        let value = if value.is_null() {
            ProstValue::default_value_for_field(&value_field)
        } else {
            json_to_single(&value, &value_field.kind(), &value_field, naming)?
        };
        map.insert(key, value);
    }
    Ok(ProstValue::Map(map))
}

fn json_to_map_key(json: &JsonValue, field: &FieldDescriptor) -> Result<MapKey> {
    let key = match field.kind() {
        Kind::String => json.as_str().map(|s| MapKey::String(s.to_string())),
        Kind::Bool => match json {
            JsonValue::Bool(b) => Some(MapKey::Bool(*b)),
            JsonValue::String(s) => s.parse().ok().map(MapKey::Bool),
            _ => None,
        },
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => json_i64(json)
            .and_then(|n| i32::try_from(n).ok())
            .map(MapKey::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => json_i64(json).map(MapKey::I64),
        Kind::Uint32 | Kind::Fixed32 => json_u64(json)
            .and_then(|n| u32::try_from(n).ok())
            .map(MapKey::U32),
        Kind::Uint64 | Kind::Fixed64 => json_u64(json).map(MapKey::U64),
        _ => None,
    };
    key.ok_or_else(|| mismatch(field, "a valid map key", json))
}

fn json_to_single(
    json: &JsonValue,
    kind: &Kind,
    field: &FieldDescriptor,
    naming: &dyn FieldNaming,
) -> Result<ProstValue> {
    let value = match kind {
        Kind::Double => json_f64(json).map(ProstValue::F64),
        Kind::Float => json_f64(json).map(|f| ProstValue::F32(f as f32)),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => json_i64(json)
            .and_then(|n| i32::try_from(n).ok())
            .map(ProstValue::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => json_i64(json).map(ProstValue::I64),
        Kind::Uint32 | Kind::Fixed32 => json_u64(json)
            .and_then(|n| u32::try_from(n).ok())
            .map(ProstValue::U32),
        Kind::Uint64 | Kind::Fixed64 => json_u64(json).map(ProstValue::U64),
        Kind::Bool => json.as_bool().map(ProstValue::Bool),
        Kind::String => json.as_str().map(|s| ProstValue::String(s.to_string())),
        Kind::Bytes => json
            .as_str()
            .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
            .map(|b| ProstValue::Bytes(b.into())),
        Kind::Enum(enum_desc) => match json {
            JsonValue::String(name) => enum_desc
                .get_value_by_name(name)
                .map(|v| ProstValue::EnumNumber(v.number())),
            JsonValue::Number(_) => json_i64(json)
                .and_then(|n| i32::try_from(n).ok())
                .map(ProstValue::EnumNumber),
            _ => None,
        },
        Kind::Message(msg_desc) => match json {
            JsonValue::Object(obj) => {
                return json_to_message(obj, msg_desc, naming).map(ProstValue::Message)
            }
            _ => None,
        },
    };
    value.ok_or_else(|| mismatch(field, kind_name(kind), json))
}

// `i64::MAX as f64` and `u64::MAX as f64` round up to the next power of two,
// so the upper bounds are exclusive.
const I64_FLOAT_RANGE: (f64, f64) = (i64::MIN as f64, i64::MAX as f64);
const U64_FLOAT_RANGE: (f64, f64) = (0.0, u64::MAX as f64);

/// A float with no fractional part inside `[min, max)`, such as `3.0`.
fn whole_float(n: &serde_json::Number, (min, max): (f64, f64)) -> Option<f64> {
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= min && *f < max)
}

fn json_i64(json: &JsonValue) -> Option<i64> {
    match json {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| whole_float(n, I64_FLOAT_RANGE).map(|f| f as i64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_u64(json: &JsonValue) -> Option<u64> {
    match json {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| whole_float(n, U64_FLOAT_RANGE).map(|f| f as u64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_f64(json: &JsonValue) -> Option<f64> {
    match json {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn kind_name(kind: &Kind) -> &'static str {
    match kind {
        Kind::Double | Kind::Float => "a float",
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => "a 32-bit integer",
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => "a 64-bit integer",
        Kind::Uint32 | Kind::Fixed32 => "an unsigned 32-bit integer",
        Kind::Uint64 | Kind::Fixed64 => "an unsigned 64-bit integer",
        Kind::Bool => "a boolean",
        Kind::String => "a string",
        Kind::Bytes => "a base64 string",
        Kind::Enum(_) => "an enum value",
        Kind::Message(_) => "an object",
    }
}

fn mismatch(field: &FieldDescriptor, expected: &str, got: &JsonValue) -> Error {
    Error::InvalidInput(format!(
        "field {} expects {expected}, got {got}",
        field.full_name()
    ))
}

/// Render a response message as JSON.
///
/// Enums come out as value names, bytes as base64, maps as lists of
/// `{key, value}` entries sorted by key. An unset singular message field
/// is `null`.
pub fn message_to_json(msg: &DynamicMessage, naming: &dyn FieldNaming) -> JsonValue {
    let mut obj = Map::new();
    for field in msg.descriptor().fields() {
        let Some(name) = naming.output_name(&field) else {
            continue;
        };
        let value = if field.supports_presence() && !msg.has_field(&field) {
            JsonValue::Null
        } else {
            value_to_json(&msg.get_field(&field), &field.kind(), naming)
        };
        obj.insert(name, value);
    }
    JsonValue::Object(obj)
}

fn value_to_json(value: &ProstValue, kind: &Kind, naming: &dyn FieldNaming) -> JsonValue {
    match value {
        ProstValue::Bool(b) => JsonValue::Bool(*b),
        ProstValue::I32(n) => JsonValue::from(*n),
        ProstValue::I64(n) => JsonValue::from(*n),
        ProstValue::U32(n) => JsonValue::from(*n),
        ProstValue::U64(n) => JsonValue::from(*n),
        ProstValue::F32(n) => float_to_json(f64::from(*n)),
        ProstValue::F64(n) => float_to_json(*n),
        ProstValue::String(s) => JsonValue::String(s.clone()),
        ProstValue::Bytes(b) => {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        ProstValue::EnumNumber(n) => match kind {
            Kind::Enum(desc) => desc
                .get_value(*n)
                .map(|v| JsonValue::String(v.name().to_string()))
                .unwrap_or_else(|| JsonValue::from(*n)),
            _ => JsonValue::from(*n),
        },
        ProstValue::Message(msg) => message_to_json(msg, naming),
        ProstValue::List(items) => {
            JsonValue::Array(items.iter().map(|v| value_to_json(v, kind, naming)).collect())
        }
        ProstValue::Map(map) => {
            let value_kind = match kind {
                Kind::Message(entry) => entry.map_entry_value_field().kind(),
                other => other.clone(),
            };
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            JsonValue::Array(
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        serde_json::json!({
                            "key": map_key_to_json(key),
                            "value": value_to_json(value, &value_kind, naming),
                        })
                    })
                    .collect(),
            )
        }
    }
}

fn map_key_to_json(key: &MapKey) -> JsonValue {
    match key {
        MapKey::Bool(b) => JsonValue::Bool(*b),
        MapKey::I32(n) => JsonValue::from(*n),
        MapKey::I64(n) => JsonValue::from(*n),
        MapKey::U32(n) => JsonValue::from(*n),
        MapKey::U64(n) => JsonValue::from(*n),
        MapKey::String(s) => JsonValue::String(s.clone()),
    }
}

fn float_to_json(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
