//! Intermediate metadata tree shared by all source formats.
//!
//! Parsers do not build JSON directly. They describe what they found as a
//! [`MetaValue`] tree (maps, lists, typed numeric arrays, byte strings and
//! named objects) and the [`Normalizer`] decides how much of it fits into the
//! output.

mod numeric;
mod walk;

pub use numeric::{NumericArray, NumericData};
pub use walk::{float_json, Normalizer, SUMMARY_KEY, TYPE_KEY};

/// A node of a metadata object graph before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// Raw bytes, rendered as text when they are printable
    Bytes(Vec<u8>),
    /// Homogeneous numeric data, summarized when long
    Array(NumericArray),
    List(Vec<MetaValue>),
    /// Key/value pairs in source order. Keys may repeat.
    Map(Vec<(String, MetaValue)>),
    /// A structured value that keeps the name of its source type
    Object {
        type_name: String,
        fields: Vec<(String, MetaValue)>,
    },
}

impl MetaValue {
    /// Builds a `Map` from key/value pairs
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, MetaValue)>) -> Self {
        MetaValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an `Object` named `type_name` from key/value pairs
    pub fn object<K: Into<String>>(
        type_name: impl Into<String>,
        fields: impl IntoIterator<Item = (K, MetaValue)>,
    ) -> Self {
        MetaValue::Object {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Short name of the variant, used in summaries
    pub fn kind(&self) -> &'static str {
        match self {
            MetaValue::Null => "null",
            MetaValue::Bool(_) => "bool",
            MetaValue::Int(_) | MetaValue::UInt(_) => "int",
            MetaValue::Float(_) => "float",
            MetaValue::Text(_) => "str",
            MetaValue::Bytes(_) => "bytes",
            MetaValue::Array(_) => "array",
            MetaValue::List(_) => "list",
            MetaValue::Map(_) => "dict",
            MetaValue::Object { .. } => "object",
        }
    }

    /// Number of direct children, or 1 for scalars
    pub fn len(&self) -> usize {
        match self {
            MetaValue::Bytes(b) => b.len(),
            MetaValue::Array(a) => a.len(),
            MetaValue::List(l) => l.len(),
            MetaValue::Map(m) => m.len(),
            MetaValue::Object { fields, .. } => fields.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the first entry named `key` in a map or object
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        match self {
            MetaValue::Map(entries) | MetaValue::Object { fields: entries, .. } => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

/// Conversion of a source object graph into a [`MetaValue`] tree
pub trait ToMeta {
    fn to_meta(&self) -> MetaValue;
}

impl ToMeta for MetaValue {
    fn to_meta(&self) -> MetaValue {
        self.clone()
    }
}

impl ToMeta for serde_json::Value {
    fn to_meta(&self) -> MetaValue {
        MetaValue::from(self.clone())
    }
}

impl<T: ToMeta> ToMeta for Option<T> {
    fn to_meta(&self) -> MetaValue {
        match self {
            Some(v) => v.to_meta(),
            None => MetaValue::Null,
        }
    }
}

impl<T: ToMeta> ToMeta for [T] {
    fn to_meta(&self) -> MetaValue {
        MetaValue::List(self.iter().map(ToMeta::to_meta).collect())
    }
}

impl<T: ToMeta> ToMeta for Vec<T> {
    fn to_meta(&self) -> MetaValue {
        self.as_slice().to_meta()
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    MetaValue::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    MetaValue::Int(i)
                } else {
                    MetaValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => MetaValue::Text(s),
            Value::Array(items) => MetaValue::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                MetaValue::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

macro_rules! meta_from {
    ($variant:ident, $target:ty, $($source:ty),+) => {
        $(
            impl From<$source> for MetaValue {
                fn from(v: $source) -> Self {
                    MetaValue::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

meta_from!(Bool, bool, bool);
meta_from!(UInt, u64, u8, u16, u32, u64);
meta_from!(Int, i64, i8, i16, i32, i64);
meta_from!(Float, f64, f32, f64);
meta_from!(Text, String, String, &str);

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::UInt(v as u64)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(v: Vec<MetaValue>) -> Self {
        MetaValue::List(v)
    }
}

impl From<NumericArray> for MetaValue {
    fn from(v: NumericArray) -> Self {
        MetaValue::Array(v)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(MetaValue::Null, Into::into)
    }
}
