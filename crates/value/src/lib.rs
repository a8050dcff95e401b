use bytes::Bytes;
use indexmap::IndexMap;
use std::sync::Arc;

mod convert;
pub mod json;
pub mod path;
pub mod wire;
pub use json::{from_json, to_json};
pub use path::Path;

/// Value is a dynamically typed document tree. Leaves are scalars, byte
/// strings, or opaque pointers; interior nodes are arrays and ordered
/// objects. Every Value carries its concrete numeric width: an Int8 is not
/// an Int64, though one may be read as the other where the conversion rules
/// of [`Value::as_i64`] and friends allow it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// An opaque in-process pointer. Never serializable, and compared by
    /// identity rather than by content.
    Ptr(Opaque),
}

/// Type is the tag of a [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Null,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Bytes,
    Array,
    Object,
    Ptr,
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Type::Null => "null",
            Type::Bool => "bool",
            Type::Int8 => "int8",
            Type::Int16 => "int16",
            Type::Int32 => "int32",
            Type::Int64 => "int64",
            Type::Uint8 => "uint8",
            Type::Uint16 => "uint16",
            Type::Uint32 => "uint32",
            Type::Uint64 => "uint64",
            Type::Float32 => "float32",
            Type::Float64 => "float64",
            Type::String => "string",
            Type::Bytes => "buf",
            Type::Array => "array",
            Type::Object => "object",
            Type::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// Opaque wraps an arbitrary shared in-process object.
/// Two Opaques are equal iff they are the same allocation.
#[derive(Clone)]
pub struct Opaque(Arc<dyn std::any::Any + Send + Sync>);

impl Opaque {
    pub fn new<T: std::any::Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    pub fn downcast_ref<T: std::any::Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Opaque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Opaque({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected {expected}, found {actual}")]
    TypeMismatch { expected: Type, actual: Type },
    #[error("{value} does not fit in {target}")]
    OutOfRange { value: String, target: Type },
    #[error("no value at path '{0}'")]
    PathNotFound(String),
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0} has no JSON representation")]
    NonFiniteNumber(f64),
    #[error("opaque pointer values cannot be serialized")]
    UnserializableProperty,
    #[error("invalid wire encoding: {0}")]
    InvalidWire(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Value {
    /// The type tag of this Value.
    pub fn value_type(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Int8(_) => Type::Int8,
            Value::Int16(_) => Type::Int16,
            Value::Int32(_) => Type::Int32,
            Value::Int64(_) => Type::Int64,
            Value::Uint8(_) => Type::Uint8,
            Value::Uint16(_) => Type::Uint16,
            Value::Uint32(_) => Type::Uint32,
            Value::Uint64(_) => Type::Uint64,
            Value::Float32(_) => Type::Float32,
            Value::Float64(_) => Type::Float64,
            Value::String(_) => Type::String,
            Value::Bytes(_) => Type::Bytes,
            Value::Array(_) => Type::Array,
            Value::Object(_) => Type::Object,
            Value::Ptr(_) => Type::Ptr,
        }
    }

    pub fn object() -> Value {
        Value::Object(IndexMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::TypeMismatch {
                expected: Type::Bool,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: Type::String,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_bytes(&self) -> Result<&Bytes> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(Error::TypeMismatch {
                expected: Type::Bytes,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(Error::TypeMismatch {
                expected: Type::Array,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_object(&self) -> Result<&IndexMap<String, Value>> {
        match self {
            Value::Object(o) => Ok(o),
            other => Err(Error::TypeMismatch {
                expected: Type::Object,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_object_mut(&mut self) -> Result<&mut IndexMap<String, Value>> {
        let actual = self.value_type();
        match self {
            Value::Object(o) => Ok(o),
            _ => Err(Error::TypeMismatch {
                expected: Type::Object,
                actual,
            }),
        }
    }

    /// Fetch the Value at `path`, or PathNotFound.
    pub fn get(&self, path: &Path) -> Result<&Value> {
        path.query(self)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    /// Set `value` at `path`, creating intermediate objects and arrays as
    /// required. An array index may be at most one past the current extent.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        path.upsert(self, value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}
