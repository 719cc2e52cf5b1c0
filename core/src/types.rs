//! Call descriptors going into a batch and results coming out of it.
//!
//! # Design
//! `CallDescriptor` keeps its query parameters as an ordered list rather than
//! a map so the encoded query string follows insertion order. Its serde form
//! still reads and writes a JSON object for `queryParams`, keeping source
//! order on the way in.
//!
//! `PartResult` keeps the raw text of a part that could not be parsed instead
//! of eagerly building the error placeholder; the placeholder shape is
//! produced on demand by `to_value` and by `Serialize`.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::BatchError;

/// Method used when a descriptor does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// A query parameter value. `Many` encodes as repeated `key=value` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::One(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::One(value)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        QueryValue::Many(values)
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(values: Vec<&str>) -> Self {
        QueryValue::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// One logical API call to embed in a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDescriptor {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        default,
        alias = "qs",
        with = "query_params",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub query_params: Vec<(String, QueryValue)>,
    #[serde(default, alias = "body", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
}

impl CallDescriptor {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: None,
            query_params: Vec::new(),
            request_body: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Append a query parameter. Repeated keys are kept, in call order.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Attach a request body, converting it to JSON up front.
    pub fn json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, BatchError> {
        self.request_body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn resolved_method(&self) -> &str {
        self.method.as_deref().unwrap_or(DEFAULT_METHOD)
    }
}

mod query_params {
    use super::*;

    pub fn serialize<S: Serializer>(
        params: &[(String, QueryValue)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(params.len()))?;
        for (key, value) in params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, QueryValue)>, D::Error> {
        deserializer.deserialize_map(OrderedPairs)
    }

    struct OrderedPairs;

    impl<'de> Visitor<'de> for OrderedPairs {
        type Value = Vec<(String, QueryValue)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of query parameter names to a string or list of strings")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, QueryValue>()? {
                pairs.push(entry);
            }
            Ok(pairs)
        }
    }
}

/// One entry of an `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
}

/// The `{ "errors": [ { "message": ... } ] }` shape shared by upstream error
/// responses and the placeholder for parts that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorEntry>,
}

impl ErrorBody {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorEntry {
                message: message.into(),
            }],
        }
    }
}

/// Decoded result for one part of a batch response, in request order.
#[derive(Debug, Clone, PartialEq)]
pub enum PartResult {
    /// The JSON found in the part, whatever its shape.
    Json(Value),
    /// The verbatim part text when no JSON could be extracted from it.
    Unparsed(String),
}

impl PartResult {
    /// True for unparsed parts and for JSON objects carrying an `errors` field.
    pub fn is_error(&self) -> bool {
        match self {
            PartResult::Json(value) => value.get("errors").is_some(),
            PartResult::Unparsed(_) => true,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PartResult::Json(value) => Some(value),
            PartResult::Unparsed(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }

    /// The result as JSON. Unparsed parts become the error placeholder with
    /// the raw part text as its message.
    pub fn into_value(self) -> Value {
        match self {
            PartResult::Json(value) => value,
            PartResult::Unparsed(raw) => placeholder(raw),
        }
    }

    /// Deserialize the part into `T`. Unparsed parts and JSON of the wrong
    /// shape both yield `Err` carrying the error body.
    pub fn decode<T: de::DeserializeOwned>(&self) -> Result<T, ErrorBody> {
        match self {
            PartResult::Json(value) => T::deserialize(value).map_err(|err| {
                serde_json::from_value::<ErrorBody>(value.clone())
                    .unwrap_or_else(|_| ErrorBody::from_message(err.to_string()))
            }),
            PartResult::Unparsed(raw) => Err(ErrorBody::from_message(raw.clone())),
        }
    }
}

fn placeholder(raw: String) -> Value {
    serde_json::json!({ "errors": [ { "message": raw } ] })
}

impl Serialize for PartResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PartResult::Json(value) => value.serialize(serializer),
            PartResult::Unparsed(raw) => ErrorBody::from_message(raw.as_str()).serialize(serializer),
        }
    }
}
