use serde_json::Value;

use super::walk::float_json;

/// Typed element storage of a [`NumericArray`]
#[derive(Debug, Clone, PartialEq)]
pub enum NumericData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! dispatch {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            NumericData::U8($v) => $body,
            NumericData::U16($v) => $body,
            NumericData::U32($v) => $body,
            NumericData::U64($v) => $body,
            NumericData::I8($v) => $body,
            NumericData::I16($v) => $body,
            NumericData::I32($v) => $body,
            NumericData::I64($v) => $body,
            NumericData::F32($v) => $body,
            NumericData::F64($v) => $body,
        }
    };
}

macro_rules! numeric_from_vec {
    ($($type:ty => $variant:ident),+) => {
        $(
            impl From<Vec<$type>> for NumericArray {
                fn from(v: Vec<$type>) -> Self {
                    NumericArray { data: NumericData::$variant(v), shape: None }
                }
            }
        )+
    };
}

numeric_from_vec!(u8 => U8, u16 => U16, u32 => U32, u64 => U64, i8 => I8, i16 => I16, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Numeric array with an optional N-dimensional shape (C order)
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    pub data: NumericData,
    pub shape: Option<Vec<u64>>,
}

impl NumericArray {
    pub fn with_shape(mut self, shape: Vec<u64>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn len(&self) -> usize {
        dispatch!(&self.data, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// numpy name of the element type
    pub fn dtype(&self) -> &'static str {
        match self.data {
            NumericData::U8(_) => "uint8",
            NumericData::U16(_) => "uint16",
            NumericData::U32(_) => "uint32",
            NumericData::U64(_) => "uint64",
            NumericData::I8(_) => "int8",
            NumericData::I16(_) => "int16",
            NumericData::I32(_) => "int32",
            NumericData::I64(_) => "int64",
            NumericData::F32(_) => "float32",
            NumericData::F64(_) => "float64",
        }
    }

    /// Element `i` as JSON
    pub fn element_json(&self, i: usize) -> Option<Value> {
        match &self.data {
            NumericData::F32(v) => v.get(i).map(|x| float_json(f64::from(*x))),
            NumericData::F64(v) => v.get(i).map(|x| float_json(*x)),
            NumericData::U8(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::U16(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::U32(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::U64(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::I8(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::I16(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::I32(v) => v.get(i).map(|x| Value::from(*x)),
            NumericData::I64(v) => v.get(i).map(|x| Value::from(*x)),
        }
    }

    /// The first `n` elements as JSON
    pub fn head_json(&self, n: usize) -> Vec<Value> {
        (0..n.min(self.len()))
            .filter_map(|i| self.element_json(i))
            .collect()
    }

    /// Smallest and largest element as JSON, ignoring NaN
    pub fn min_max_json(&self) -> Option<(Value, Value)> {
        fn ord_min_max<T: Copy + Ord + Into<Value>>(v: &[T]) -> Option<(Value, Value)> {
            let min = v.iter().min()?;
            let max = v.iter().max()?;
            Some(((*min).into(), (*max).into()))
        }
        fn float_min_max(v: impl Iterator<Item = f64>) -> Option<(Value, Value)> {
            let (min, max) = v.filter(|x| !x.is_nan()).fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((f64::min(lo, x), f64::max(hi, x))),
            })?;
            Some((float_json(min), float_json(max)))
        }
        match &self.data {
            NumericData::U8(v) => ord_min_max(v),
            NumericData::U16(v) => ord_min_max(v),
            NumericData::U32(v) => ord_min_max(v),
            NumericData::U64(v) => ord_min_max(v),
            NumericData::I8(v) => ord_min_max(v),
            NumericData::I16(v) => ord_min_max(v),
            NumericData::I32(v) => ord_min_max(v),
            NumericData::I64(v) => ord_min_max(v),
            NumericData::F32(v) => float_min_max(v.iter().map(|x| f64::from(*x))),
            NumericData::F64(v) => float_min_max(v.iter().copied()),
        }
    }

    /// All elements as JSON, nested by `shape` when it matches the length
    pub fn to_json(&self) -> Value {
        let flat: Vec<Value> = (0..self.len()).filter_map(|i| self.element_json(i)).collect();
        match &self.shape {
            Some(shape)
                if shape.len() > 1
                    && !shape.contains(&0)
                    && checked_product(shape) == u64::try_from(flat.len()).ok() =>
            {
                nest(&flat, shape)
            }
            _ => Value::Array(flat),
        }
    }
}

fn checked_product(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, d| acc.checked_mul(*d))
}

fn nest(flat: &[Value], shape: &[u64]) -> Value {
    match shape {
        [] | [_] => Value::Array(flat.to_vec()),
        [_, inner @ ..] => {
            let step = checked_product(inner)
                .and_then(|s| usize::try_from(s).ok())
                .filter(|s| *s > 0);
            match step {
                Some(step) => Value::Array(flat.chunks(step).map(|chunk| nest(chunk, inner)).collect()),
                None => Value::Array(flat.to_vec()),
            }
        }
    }
}

#[cfg(test)]
mod test_numeric {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dtype_and_len() {
        let a = NumericArray::from(vec![1u16, 2, 3]);
        assert_eq!(a.dtype(), "uint16");
        assert_eq!(a.len(), 3);
        assert_eq!(NumericArray::from(Vec::<f64>::new()).len(), 0);
    }

    #[test]
    fn test_min_max() {
        let a = NumericArray::from(vec![3i32, -7, 12]);
        assert_eq!(a.min_max_json(), Some((json!(-7), json!(12))));
        let f = NumericArray::from(vec![f32::NAN, 0.5, -1.5]);
        assert_eq!(f.min_max_json(), Some((json!(-1.5), json!(0.5))));
        assert_eq!(NumericArray::from(Vec::<u8>::new()).min_max_json(), None);
    }

    #[test]
    fn test_to_json_nests_by_shape() {
        let a = NumericArray::from(vec![1u8, 2, 3, 4, 5, 6]).with_shape(vec![2, 3]);
        assert_eq!(a.to_json(), json!([[1, 2, 3], [4, 5, 6]]));
        let mismatched = NumericArray::from(vec![1u8, 2, 3]).with_shape(vec![2, 2]);
        assert_eq!(mismatched.to_json(), json!([1, 2, 3]));
        let overflowing = NumericArray::from(vec![1u8, 2]).with_shape(vec![2, 1 << 32, 1 << 32]);
        assert_eq!(overflowing.to_json(), json!([1, 2]));
        let empty = NumericArray::from(Vec::<u8>::new()).with_shape(vec![1 << 40, 0]);
        assert_eq!(empty.to_json(), json!([]));
    }

    #[test]
    fn test_head() {
        let a = NumericArray::from(vec![0.25f64, 0.5, 1.0]);
        assert_eq!(a.head_json(2), vec![json!(0.25), json!(0.5)]);
        assert_eq!(a.head_json(10).len(), 3);
    }
}
