use crate::normalize::{MetaValue, NumericArray, ToMeta};

/// Tag value
///
/// Stores tag data from an IFD
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Byte(u8),
    SignedByte(i8),
    Undefined(u8),

    Short(u16),
    SShort(i16),

    Long(u32),
    SLong(i32),

    Long8(u64),
    SLong8(i64),

    Float(f32),
    Double(f64),

    Rational(u32, u32),
    SRational(i32, i32),

    Ascii(String),
    /// `UNDEFINED` data with more than one byte
    Bytes(Vec<u8>),

    List(Vec<Value>),

    Ifd(u32),
    Ifd8(u64),
}

impl Value {
    /// Unsigned integer view of a single value
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Value::Byte(v) | Value::Undefined(v) => Some((*v).into()),
            Value::Short(v) => Some((*v).into()),
            Value::Long(v) | Value::Ifd(v) => Some((*v).into()),
            Value::Long8(v) | Value::Ifd8(v) => Some(*v),
            Value::List(v) if v.len() == 1 => v[0].to_u64(),
            _ => None,
        }
    }

    /// Unsigned integer view of a single value or a list
    pub fn to_u64_vec(&self) -> Option<Vec<u64>> {
        match self {
            Value::List(v) => v.iter().map(Value::to_u64).collect(),
            Value::Bytes(v) => Some(v.iter().map(|b| u64::from(*b)).collect()),
            other => other.to_u64().map(|v| vec![v]),
        }
    }

    /// Floating point view; rationals are divided out
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some((*v).into()),
            Value::Double(v) => Some(*v),
            Value::Rational(n, d) => Some(f64::from(*n) / f64::from(*d)),
            Value::SRational(n, d) => Some(f64::from(*n) / f64::from(*d)),
            Value::SignedByte(v) => Some((*v).into()),
            Value::SShort(v) => Some((*v).into()),
            Value::SLong(v) => Some((*v).into()),
            Value::List(v) if v.len() == 1 => v[0].to_f64(),
            other => other.to_u64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! collect_list {
    ($items:expr, $variant:ident) => {{
        let mut out = Vec::with_capacity($items.len());
        for item in $items {
            match item {
                Value::$variant(v) => out.push(*v),
                _ => return None,
            }
        }
        out
    }};
}

/// Homogeneous numeric lists become typed arrays so long ones can be summarized
fn list_to_array(items: &[Value]) -> Option<NumericArray> {
    let first = items.first()?;
    Some(match first {
        Value::Byte(_) => collect_list!(items, Byte).into(),
        Value::Undefined(_) => collect_list!(items, Undefined).into(),
        Value::SignedByte(_) => collect_list!(items, SignedByte).into(),
        Value::Short(_) => collect_list!(items, Short).into(),
        Value::SShort(_) => collect_list!(items, SShort).into(),
        Value::Long(_) => collect_list!(items, Long).into(),
        Value::Ifd(_) => collect_list!(items, Ifd).into(),
        Value::SLong(_) => collect_list!(items, SLong).into(),
        Value::Long8(_) => collect_list!(items, Long8).into(),
        Value::Ifd8(_) => collect_list!(items, Ifd8).into(),
        Value::SLong8(_) => collect_list!(items, SLong8).into(),
        Value::Float(_) => collect_list!(items, Float).into(),
        Value::Double(_) => collect_list!(items, Double).into(),
        Value::Rational(..) => {
            let mut out = Vec::with_capacity(items.len() * 2);
            for item in items {
                let Value::Rational(n, d) = item else {
                    return None;
                };
                out.extend([*n, *d]);
            }
            NumericArray::from(out).with_shape(vec![items.len() as u64, 2])
        }
        Value::SRational(..) => {
            let mut out = Vec::with_capacity(items.len() * 2);
            for item in items {
                let Value::SRational(n, d) = item else {
                    return None;
                };
                out.extend([*n, *d]);
            }
            NumericArray::from(out).with_shape(vec![items.len() as u64, 2])
        }
        _ => return None,
    })
}

impl ToMeta for Value {
    fn to_meta(&self) -> MetaValue {
        match self {
            Value::Byte(v) | Value::Undefined(v) => MetaValue::from(*v),
            Value::SignedByte(v) => MetaValue::from(*v),
            Value::Short(v) => MetaValue::from(*v),
            Value::SShort(v) => MetaValue::from(*v),
            Value::Long(v) | Value::Ifd(v) => MetaValue::from(*v),
            Value::SLong(v) => MetaValue::from(*v),
            Value::Long8(v) | Value::Ifd8(v) => MetaValue::from(*v),
            Value::SLong8(v) => MetaValue::from(*v),
            Value::Float(v) => MetaValue::from(*v),
            Value::Double(v) => MetaValue::from(*v),
            Value::Rational(n, d) => MetaValue::List(vec![(*n).into(), (*d).into()]),
            Value::SRational(n, d) => MetaValue::List(vec![(*n).into(), (*d).into()]),
            Value::Ascii(s) => MetaValue::Text(s.clone()),
            Value::Bytes(b) => MetaValue::Bytes(b.clone()),
            Value::List(items) => match list_to_array(items) {
                Some(array) => MetaValue::Array(array),
                None => MetaValue::List(items.iter().map(ToMeta::to_meta).collect()),
            },
        }
    }
}

#[cfg(test)]
mod test_value {
    use super::*;
    use crate::normalize::NumericData;

    #[test]
    fn test_list_becomes_array() {
        let v = Value::List(vec![Value::Short(1), Value::Short(2)]);
        let MetaValue::Array(a) = v.to_meta() else {
            panic!("expected array");
        };
        assert_eq!(a.data, NumericData::U16(vec![1, 2]));
    }

    #[test]
    fn test_rational_list_has_pair_shape() {
        let v = Value::List(vec![Value::Rational(1, 2), Value::Rational(3, 4)]);
        let MetaValue::Array(a) = v.to_meta() else {
            panic!("expected array");
        };
        assert_eq!(a.data, NumericData::U32(vec![1, 2, 3, 4]));
        assert_eq!(a.shape, Some(vec![2, 2]));
    }

    #[test]
    fn test_mixed_list_stays_list() {
        let v = Value::List(vec![Value::Short(1), Value::Ascii("a".into())]);
        assert_eq!(
            v.to_meta(),
            MetaValue::List(vec![MetaValue::UInt(1), MetaValue::Text("a".into())])
        );
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Rational(72, 1).to_f64(), Some(72.0));
        assert_eq!(Value::Short(7).to_u64(), Some(7));
        assert_eq!(Value::List(vec![Value::Long(4)]).to_u64(), Some(4));
        assert_eq!(
            Value::List(vec![Value::Long(4), Value::Long(5)]).to_u64_vec(),
            Some(vec![4, 5])
        );
        assert_eq!(Value::Ascii("x".into()).to_u64(), None);
        assert_eq!(
            Value::List(vec![Value::Short(1), Value::Short(2)]).to_string(),
            "[1, 2]"
        );
    }
}
