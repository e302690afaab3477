use serde_json::{Map, Number, Value};

use super::{MetaValue, NumericArray};
use crate::config::NormalizeOptions;

/// Key marking an object that stands in for data too large to emit
pub const SUMMARY_KEY: &str = "__summary__";
/// Key carrying the source type name of a [`MetaValue::Object`]
pub const TYPE_KEY: &str = "__type__";

/// JSON has no NaN or infinities, so those become strings
pub fn float_json(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v.is_sign_positive() => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

/// Depth-first conversion of [`MetaValue`] trees into bounded JSON
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizeOptions,
}

impl Normalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Normalizer { options }
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    pub fn normalize(&self, value: &MetaValue) -> Value {
        self.walk(value, 0)
    }

    /// Applies the same bounds to a value that already is JSON
    pub fn normalize_json(&self, value: &Value) -> Value {
        self.walk(&MetaValue::from(value.clone()), 0)
    }

    fn walk(&self, value: &MetaValue, depth: usize) -> Value {
        let is_container = matches!(
            value,
            MetaValue::List(_) | MetaValue::Map(_) | MetaValue::Object { .. }
        );
        if is_container && depth >= self.options.max_depth {
            return summary("max_depth", [
                ("type", Value::from(value.kind())),
                ("len", Value::from(value.len())),
            ]);
        }
        match value {
            MetaValue::Null => Value::Null,
            MetaValue::Bool(b) => Value::Bool(*b),
            MetaValue::Int(i) => Value::from(*i),
            MetaValue::UInt(u) => Value::from(*u),
            MetaValue::Float(f) => float_json(*f),
            MetaValue::Text(s) => self.text(s),
            MetaValue::Bytes(b) => self.bytes(b),
            MetaValue::Array(a) => self.array(a),
            MetaValue::List(items) => self.list(items, depth),
            MetaValue::Map(entries) => self.map(entries, None, depth),
            MetaValue::Object { type_name, fields } => self.map(fields, Some(type_name), depth),
        }
    }

    fn entries(&self, entries: &[(String, MetaValue)], depth: usize) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in entries {
            insert_unique(&mut map, k, self.walk(v, depth + 1));
        }
        map
    }

    fn map(&self, entries: &[(String, MetaValue)], type_name: Option<&String>, depth: usize) -> Value {
        if entries.len() > self.options.max_map_len {
            let head = self.entries(&entries[..self.options.preview_len.min(entries.len())], depth);
            let mut fields = vec![("len", Value::from(entries.len()))];
            if let Some(type_name) = type_name {
                fields.push((TYPE_KEY, Value::String(type_name.clone())));
            }
            fields.push(("head", Value::Object(head)));
            return summary("dict", fields);
        }
        let Some(type_name) = type_name else {
            return Value::Object(self.entries(entries, depth));
        };
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(type_name.clone()));
        for (k, v) in self.entries(entries, depth) {
            insert_unique(&mut map, &k, v);
        }
        Value::Object(map)
    }

    fn list(&self, items: &[MetaValue], depth: usize) -> Value {
        if items.len() <= self.options.max_sequence_len {
            return Value::Array(items.iter().map(|v| self.walk(v, depth + 1)).collect());
        }
        let head = items
            .iter()
            .take(self.options.preview_len)
            .map(|v| self.walk(v, depth + 1))
            .collect();
        summary("list", [
            ("len", Value::from(items.len())),
            ("head", Value::Array(head)),
        ])
    }

    fn array(&self, array: &NumericArray) -> Value {
        if array.len() <= self.options.max_sequence_len {
            return array.to_json();
        }
        let mut fields = vec![
            ("dtype", Value::from(array.dtype())),
            ("len", Value::from(array.len())),
        ];
        if let Some(shape) = &array.shape {
            fields.push(("shape", Value::from(shape.clone())));
        }
        if let Some((min, max)) = array.min_max_json() {
            fields.push(("min", min));
            fields.push(("max", max));
        }
        fields.push(("head", Value::Array(array.head_json(self.options.preview_len))));
        summary("array", fields)
    }

    fn text(&self, s: &str) -> Value {
        let limit = self.options.max_string_len;
        if s.len() <= limit {
            return Value::String(s.to_string());
        }
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Value::String(format!(
            "{}...[truncated {} bytes]",
            &s[..end],
            s.len() - end
        ))
    }

    fn bytes(&self, b: &[u8]) -> Value {
        let trimmed = trim_trailing_nul(b);
        if let Ok(text) = std::str::from_utf8(trimmed) {
            if is_printable(text) {
                return self.text(text);
            }
        }
        let shown = &b[..b.len().min(self.options.max_inline_bytes)];
        summary("bytes", [
            ("len", Value::from(b.len())),
            ("head_hex", Value::String(hex(shown))),
        ])
    }
}

fn summary<'a>(kind: &str, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    let mut map = Map::new();
    map.insert(SUMMARY_KEY.to_string(), Value::String(kind.to_string()));
    for (k, v) in fields {
        map.insert(k.to_string(), v);
    }
    Value::Object(map)
}

/// Repeated keys get a `_<n>` suffix instead of overwriting
fn insert_unique(map: &mut Map<String, Value>, key: &str, value: Value) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), value);
        return;
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{key}_{n}");
        if !map.contains_key(&candidate) {
            map.insert(candidate, value);
            return;
        }
        n += 1;
    }
}

fn trim_trailing_nul(b: &[u8]) -> &[u8] {
    let end = b.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
    &b[..end]
}

fn is_printable(s: &str) -> bool {
    s.chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

fn hex(b: &[u8]) -> String {
    b.iter().map(|byte| format!("{byte:02x}")).collect()
}
