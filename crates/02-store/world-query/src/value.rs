//! Conversions between Rust values and SQLite values.

use reference::Uid;
use rusqlite::types::Value;

/// A value that can be bound to a statement parameter.
pub trait IntoParam {
    fn into_param(self) -> Value;
}

/// A value that can be read back out of a result column.
pub trait FromColumn: Sized {
    fn from_column(value: &Value) -> Option<Self>;
}

/// Addresses a result column by 0-based index or by name.
pub trait ColumnKey {
    fn resolve(&self, columns: &dyn Fn(&str) -> Option<usize>) -> Option<usize>;
}

impl ColumnKey for usize {
    fn resolve(&self, _columns: &dyn Fn(&str) -> Option<usize>) -> Option<usize> {
        Some(*self)
    }
}

impl ColumnKey for &str {
    fn resolve(&self, columns: &dyn Fn(&str) -> Option<usize>) -> Option<usize> {
        columns(self)
    }
}

impl IntoParam for Value {
    fn into_param(self) -> Value {
        self
    }
}

impl IntoParam for bool {
    fn into_param(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

macro_rules! integer_params {
    ($($ty:ty),*) => {
        $(
            impl IntoParam for $ty {
                fn into_param(self) -> Value {
                    Value::Integer(i64::from(self))
                }
            }

            impl FromColumn for $ty {
                fn from_column(value: &Value) -> Option<Self> {
                    match value {
                        Value::Integer(v) => <$ty>::try_from(*v).ok(),
                        Value::Real(v) => <$ty>::try_from(*v as i64).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_params!(i16, u16, i32, u32, i64);

impl IntoParam for f32 {
    fn into_param(self) -> Value {
        Value::Real(f64::from(self))
    }
}

impl IntoParam for f64 {
    fn into_param(self) -> Value {
        Value::Real(self)
    }
}

impl IntoParam for String {
    fn into_param(self) -> Value {
        Value::Text(self)
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Value {
        Value::Text(self.to_owned())
    }
}

impl IntoParam for Vec<u8> {
    fn into_param(self) -> Value {
        Value::Blob(self)
    }
}

impl IntoParam for &[u8] {
    fn into_param(self) -> Value {
        Value::Blob(self.to_vec())
    }
}

/// Type identifiers are stored as their 16 raw bytes.
impl IntoParam for Uid {
    fn into_param(self) -> Value {
        Value::Blob(self.as_bytes().to_vec())
    }
}

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Value {
        self.map_or(Value::Null, IntoParam::into_param)
    }
}

impl FromColumn for bool {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(v) => Some(*v != 0),
            Value::Real(v) => Some(*v != 0.0),
            _ => None,
        }
    }
}

impl FromColumn for f64 {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromColumn for f32 {
    fn from_column(value: &Value) -> Option<Self> {
        f64::from_column(value).map(|v| v as f32)
    }
}

impl FromColumn for String {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(bytes) => Some(bytes.clone()),
            Value::Text(text) => Some(text.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl FromColumn for Uid {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(bytes) => Uid::from_slice(bytes).ok(),
            Value::Text(text) => Uid::parse_str(text).ok(),
            _ => None,
        }
    }
}

impl FromColumn for Value {
    fn from_column(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
