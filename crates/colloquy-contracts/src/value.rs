use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Kind discriminator carried on the wire as `normType`. Names this engine
/// does not know are kept verbatim in `Other` so they survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ValueKind {
    #[default]
    Null,
    Int,
    Bool,
    Float,
    String,
    Array,
    StrArray,
    Map,
    MapArray,
    Other(String),
}

impl ValueKind {
    pub fn is_supported(&self) -> bool {
        !matches!(self, ValueKind::Null | ValueKind::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ValueKind::Null => "Null",
            ValueKind::Int => "Int",
            ValueKind::Bool => "Bool",
            ValueKind::Float => "Float",
            ValueKind::String => "String",
            ValueKind::Array => "Array",
            ValueKind::StrArray => "StrArray",
            ValueKind::Map => "Map",
            ValueKind::MapArray => "MapArray",
            ValueKind::Other(name) => name,
        }
    }
}

impl From<String> for ValueKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Null" => ValueKind::Null,
            "Int" => ValueKind::Int,
            "Bool" => ValueKind::Bool,
            "Float" => ValueKind::Float,
            "String" => ValueKind::String,
            "Array" => ValueKind::Array,
            "StrArray" => ValueKind::StrArray,
            "Map" => ValueKind::Map,
            "MapArray" => ValueKind::MapArray,
            _ => ValueKind::Other(name),
        }
    }
}

impl Serialize for ValueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ValueKind::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("type mismatch: requested {requested:?}, value is {actual:?}")]
    TypeMismatch {
        requested: ValueKind,
        actual: ValueKind,
    },
    #[error("malformed {0:?} value")]
    Malformed(ValueKind),
}

/// A typed slot value. `norm` is the normalized payload used for comparison;
/// `origin` is the literal form (usually the utterance fragment) used in
/// user-facing text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Value {
    #[serde(rename = "orgin", alias = "origin", default)]
    pub origin: Option<JsonValue>,
    #[serde(rename = "normType", default)]
    pub kind: ValueKind,
    #[serde(rename = "norm", default)]
    pub norm: JsonValue,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<JsonValue>,
}

impl Value {
    pub fn new(kind: ValueKind, norm: JsonValue) -> Self {
        Self {
            kind,
            norm,
            ..Self::default()
        }
    }

    pub fn int(v: i64) -> Self {
        Self::new(ValueKind::Int, JsonValue::from(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ValueKind::Bool, JsonValue::Bool(v))
    }

    pub fn float(v: f64) -> Self {
        Self::new(ValueKind::Float, JsonValue::from(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::new(ValueKind::String, JsonValue::String(v.into()))
    }

    pub fn array(v: Vec<JsonValue>) -> Self {
        Self::new(ValueKind::Array, JsonValue::Array(v))
    }

    pub fn str_array<I, S>(v: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ValueKind::StrArray,
            JsonValue::Array(v.into_iter().map(|s| JsonValue::String(s.into())).collect()),
        )
    }

    pub fn map(v: Map<String, JsonValue>) -> Self {
        Self::new(ValueKind::Map, JsonValue::Object(v))
    }

    pub fn map_encoded(v: impl Into<String>) -> Self {
        Self::new(ValueKind::Map, JsonValue::String(v.into()))
    }

    pub fn map_array(v: Vec<Map<String, JsonValue>>) -> Self {
        Self::new(
            ValueKind::MapArray,
            JsonValue::Array(v.into_iter().map(JsonValue::Object).collect()),
        )
    }

    pub fn map_array_encoded(v: impl Into<String>) -> Self {
        Self::new(ValueKind::MapArray, JsonValue::String(v.into()))
    }

    pub fn with_origin(mut self, origin: impl Into<JsonValue>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_logic(mut self, logic: impl Into<String>) -> Self {
        self.logic = logic.into();
        self
    }

    pub fn has_value(&self) -> bool {
        self.kind.is_supported() && !self.norm.is_null()
    }

    pub fn int_value(&self) -> Result<i64, ValueError> {
        self.expect_kind(ValueKind::Int)?;
        match &self.norm {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or(ValueError::Malformed(ValueKind::Int)),
            _ => Err(ValueError::Malformed(ValueKind::Int)),
        }
    }

    pub fn bool_value(&self) -> Result<bool, ValueError> {
        self.expect_kind(ValueKind::Bool)?;
        self.norm
            .as_bool()
            .ok_or(ValueError::Malformed(ValueKind::Bool))
    }

    pub fn float_value(&self) -> Result<f64, ValueError> {
        self.expect_kind(ValueKind::Float)?;
        self.norm
            .as_f64()
            .ok_or(ValueError::Malformed(ValueKind::Float))
    }

    pub fn string_value(&self) -> Result<&str, ValueError> {
        self.expect_kind(ValueKind::String)?;
        self.norm
            .as_str()
            .ok_or(ValueError::Malformed(ValueKind::String))
    }

    pub fn string_origin(&self) -> Result<&str, ValueError> {
        self.expect_kind(ValueKind::String)?;
        self.origin
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or(ValueError::Malformed(ValueKind::String))
    }

    pub fn array_value(&self) -> Result<&[JsonValue], ValueError> {
        self.expect_kind(ValueKind::Array)?;
        self.norm
            .as_array()
            .map(|v| v.as_slice())
            .ok_or(ValueError::Malformed(ValueKind::Array))
    }

    pub fn str_array_value(&self) -> Result<Vec<String>, ValueError> {
        self.expect_kind(ValueKind::StrArray)?;
        let items = self
            .norm
            .as_array()
            .ok_or(ValueError::Malformed(ValueKind::StrArray))?;
        items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s.clone()),
                JsonValue::Number(n) => Ok(n.to_string()),
                JsonValue::Bool(b) => Ok(b.to_string()),
                _ => Err(ValueError::Malformed(ValueKind::StrArray)),
            })
            .collect()
    }

    /// Accepts a native object or an embedded JSON string holding one.
    pub fn map_value(&self) -> Result<Map<String, JsonValue>, ValueError> {
        self.expect_kind(ValueKind::Map)?;
        match &self.norm {
            JsonValue::Object(m) => Ok(m.clone()),
            JsonValue::String(s) => serde_json::from_str(s)
                .map_err(|_| ValueError::Malformed(ValueKind::Map)),
            _ => Err(ValueError::Malformed(ValueKind::Map)),
        }
    }

    pub fn map_array_value(&self) -> Result<Vec<Map<String, JsonValue>>, ValueError> {
        self.expect_kind(ValueKind::MapArray)?;
        match &self.norm {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .cloned()
                        .ok_or(ValueError::Malformed(ValueKind::MapArray))
                })
                .collect(),
            JsonValue::String(s) => serde_json::from_str(s)
                .map_err(|_| ValueError::Malformed(ValueKind::MapArray)),
            _ => Err(ValueError::Malformed(ValueKind::MapArray)),
        }
    }

    /// Text substituted for `{$name}` placeholders: the literal origin when
    /// present, otherwise the normalized payload.
    pub fn display_text(&self) -> String {
        if let Ok(origin) = self.string_origin() {
            return origin.to_string();
        }
        match &self.norm {
            JsonValue::Null => String::new(),
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn expect_kind(&self, requested: ValueKind) -> Result<(), ValueError> {
        if self.kind == requested {
            Ok(())
        } else {
            Err(ValueError::TypeMismatch {
                requested,
                actual: self.kind.clone(),
            })
        }
    }
}
