//! Variable and argument marshaling.
//!
//! Inbound, request variables are re-keyed by the FNV-1a hash of their name
//! and kept as raw JSON bytes until a field actually references them.
//! Outbound, resolved arguments are rewritten into the snake_case shape
//! protobuf request messages use.

use crate::error::{Error, Result};
use fnv::FnvHasher;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::hash::Hasher;
use tracing::warn;

/// 64-bit FNV-1a hash.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// What to do with a variable whose value cannot be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariablePolicy {
    /// Fail the request with [`Error::InvalidInput`].
    #[default]
    Strict,
    /// Drop the variable and log a warning.
    Lenient,
}

/// Request variables keyed by name hash, values as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(HashMap<u64, Vec<u8>>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON bytes of a variable.
    pub fn raw(&self, name: &str) -> Option<&[u8]> {
        self.0.get(&fnv1a_64(name.as_bytes())).map(Vec::as_slice)
    }

    /// Decoded value of a variable.
    pub fn get(&self, name: &str) -> Option<Result<JsonValue>> {
        self.raw(name)
            .map(|bytes| serde_json::from_slice(bytes).map_err(Error::from))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&fnv1a_64(name.as_bytes()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Convert request variables into their hashed form.
pub fn convert_variables<I, K, V>(vars: I, policy: VariablePolicy) -> Result<Variables>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Serialize,
{
    let mut out = HashMap::new();
    for (name, value) in vars {
        let name = name.as_ref();
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                out.insert(fnv1a_64(name.as_bytes()), bytes);
            }
            Err(e) => match policy {
                VariablePolicy::Strict => {
                    return Err(Error::InvalidInput(format!(
                        "variable \"${name}\" could not be serialized: {e}"
                    )))
                }
                VariablePolicy::Lenient => {
                    warn!(variable = %name, error = %e, "Dropping unserializable variable");
                }
            },
        }
    }
    Ok(Variables(out))
}

/// Shape resolved field arguments into an RPC request payload.
///
/// The top-level value must be present and an object. With `convert_case`
/// set, every object key at any depth, arrays included, is rewritten to
/// snake_case. Values are never altered.
pub fn marshal_request(
    params: Option<&JsonValue>,
    convert_case: bool,
) -> Result<Map<String, JsonValue>> {
    let params =
        params.ok_or_else(|| Error::InvalidInput("resolved params should be non-nil".into()))?;
    let JsonValue::Object(map) = params else {
        return Err(Error::InvalidInput(format!(
            "resolved params should be an object, got {}",
            json_kind(params)
        )));
    };

    if !convert_case {
        return Ok(map.clone());
    }
    Ok(snake_keys(map))
}

fn snake_keys(map: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    map.iter()
        .map(|(key, value)| (to_snake_case(key), snake_value(value)))
        .collect()
}

fn snake_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(snake_keys(map)),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(snake_value).collect()),
        other => other.clone(),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// snake_case a camelCase or PascalCase identifier.
///
/// Runs of capitals are kept together as one word, so `userID` becomes
/// `user_id` and `HTTPServer` becomes `http_server`. Digits start a new word
/// after letters. Spaces, dashes and dots become underscores.
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        let is_upper = c.is_ascii_uppercase();
        let is_lower = c.is_ascii_lowercase();
        let is_digit = c.is_ascii_digit();

        if let Some(next) = next {
            let next_upper = next.is_ascii_uppercase();
            let next_lower = next.is_ascii_lowercase();
            let next_digit = next.is_ascii_digit();

            if (is_upper && (next_lower || next_digit))
                || (is_lower && (next_upper || next_digit))
                || (is_digit && (next_upper || next_lower))
            {
                // Last capital of an acronym starts the next word.
                if is_upper && next_lower && i > 0 && chars[i - 1].is_ascii_uppercase() {
                    out.push('_');
                }
                out.push(c);
                if is_lower || is_digit || next_digit {
                    out.push('_');
                }
                continue;
            }
        }

        match c {
            ' ' | '-' | '.' | '_' => out.push('_'),
            _ => out.push(c),
        }
    }

    out.to_ascii_lowercase()
}
