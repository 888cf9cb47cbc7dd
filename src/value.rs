//! Values that cross the channel, and the handles standing in for remote objects.

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ProtocolError, ValueError};

/// Type tags sent across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    Null = 0,
    Boolean = 1,
    Byte = 2,
    Char = 3,
    Short = 4,
    Int = 5,
    Long = 6,
    Float = 7,
    Double = 8,
    String = 9,
    /// Object owned by the host, referenced by the script engine.
    HostObject = 10,
    /// Object owned by the script engine, referenced by the host.
    ScriptObject = 11,
    /// Script `undefined`, also used for void returns.
    Undefined = 12,
}

impl ValueType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(ValueType::Null),
            1 => Ok(ValueType::Boolean),
            2 => Ok(ValueType::Byte),
            3 => Ok(ValueType::Char),
            4 => Ok(ValueType::Short),
            5 => Ok(ValueType::Int),
            6 => Ok(ValueType::Long),
            7 => Ok(ValueType::Float),
            8 => Ok(ValueType::Double),
            9 => Ok(ValueType::String),
            10 => Ok(ValueType::HostObject),
            11 => Ok(ValueType::ScriptObject),
            12 => Ok(ValueType::Undefined),
            _ => Err(ProtocolError::InvalidValueType(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Reference to an object living in the host process.
///
/// The exception flag is local to the call site; only the id is written to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostObjectRef {
    ref_id: i32,
    exception: bool,
}

impl HostObjectRef {
    pub fn new(ref_id: i32) -> Self {
        Self {
            ref_id,
            exception: false,
        }
    }

    pub fn exception(ref_id: i32) -> Self {
        Self {
            ref_id,
            exception: true,
        }
    }

    pub fn ref_id(&self) -> i32 {
        self.ref_id
    }

    pub fn is_exception(&self) -> bool {
        self.exception
    }
}

impl fmt::Display for HostObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObjectRef(ref={})", self.ref_id)
    }
}

pub(crate) struct ProxyCell {
    ref_id: i32,
    release: Option<Sender<i32>>,
}

impl ProxyCell {
    pub(crate) fn tracked(ref_id: i32, release: Sender<i32>) -> Self {
        Self {
            ref_id,
            release: Some(release),
        }
    }
}

impl Drop for ProxyCell {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // Unbounded queue; fails only once the owning table is gone.
            let _ = release.send(self.ref_id);
        }
    }
}

/// Proxy for an object living in the script engine.
///
/// Clones share one proxy. Once every clone of a tracked proxy has been dropped,
/// its id is queued for release on the owning [`HandleTable`](crate::handles::HandleTable).
#[derive(Clone)]
pub struct ScriptObjectRef {
    cell: Arc<ProxyCell>,
    exception: bool,
}

impl ScriptObjectRef {
    pub(crate) fn from_cell(cell: Arc<ProxyCell>) -> Self {
        Self {
            cell,
            exception: false,
        }
    }

    /// A proxy that no table tracks. Dropping it notifies nobody.
    pub fn untracked(ref_id: i32) -> Self {
        Self::from_cell(Arc::new(ProxyCell {
            ref_id,
            release: None,
        }))
    }

    /// The same proxy, flagged as a thrown exception.
    pub fn as_exception(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            exception: true,
        }
    }

    pub fn ref_id(&self) -> i32 {
        self.cell.ref_id
    }

    pub fn is_exception(&self) -> bool {
        self.exception
    }

    /// True when both handles are the very same proxy instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    #[cfg(test)]
    pub(crate) fn cell(&self) -> &Arc<ProxyCell> {
        &self.cell
    }
}

impl PartialEq for ScriptObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ref_id() == other.ref_id() && self.exception == other.exception
    }
}

impl Eq for ScriptObjectRef {}

impl Hash for ScriptObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ref_id().hash(state);
    }
}

impl fmt::Debug for ScriptObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObjectRef")
            .field("ref_id", &self.ref_id())
            .field("exception", &self.exception)
            .finish()
    }
}

/// Everything that can cross the channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Null,
    #[default]
    Undefined,
    Boolean(bool),
    Byte(i8),
    /// A UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    HostObject(HostObjectRef),
    ScriptObject(ScriptObjectRef),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Undefined => ValueType::Undefined,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Byte(_) => ValueType::Byte,
            Value::Char(_) => ValueType::Char,
            Value::Short(_) => ValueType::Short,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::HostObject(_) => ValueType::HostObject,
            Value::ScriptObject(_) => ValueType::ScriptObject,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Byte(_)
                | Value::Char(_)
                | Value::Short(_)
                | Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
        )
    }

    pub fn is_primitive(&self) -> bool {
        self.is_number() || matches!(self, Value::Boolean(_))
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            actual: self.value_type(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Boolean(v) => Ok(*v),
            _ => Err(self.mismatch("boolean")),
        }
    }

    pub fn as_i32(&self) -> Result<i32, ValueError> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch("int")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, ValueError> {
        match self {
            Value::Long(v) => Ok(*v),
            _ => Err(self.mismatch("long")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ValueError> {
        match self {
            Value::Double(v) => Ok(*v),
            _ => Err(self.mismatch("double")),
        }
    }

    pub fn as_char(&self) -> Result<u16, ValueError> {
        match self {
            Value::Char(v) => Ok(*v),
            _ => Err(self.mismatch("char")),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(v) => Ok(v),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_host_object(&self) -> Result<HostObjectRef, ValueError> {
        match self {
            Value::HostObject(v) => Ok(*v),
            _ => Err(self.mismatch("host object")),
        }
    }

    pub fn as_script_object(&self) -> Result<&ScriptObjectRef, ValueError> {
        match self {
            Value::ScriptObject(v) => Ok(v),
            _ => Err(self.mismatch("script object")),
        }
    }

    /// Any numeric value, narrowed to `i32`.
    pub fn to_i32(&self) -> Result<i32, ValueError> {
        Ok(match self {
            Value::Byte(v) => *v as i32,
            Value::Char(v) => *v as i32,
            Value::Short(v) => *v as i32,
            Value::Int(v) => *v,
            Value::Long(v) => *v as i32,
            Value::Float(v) => *v as i32,
            Value::Double(v) => *v as i32,
            _ => return Err(self.mismatch("number")),
        })
    }

    /// Any numeric value, widened or narrowed to `i64`.
    pub fn to_i64(&self) -> Result<i64, ValueError> {
        Ok(match self {
            Value::Long(v) => *v,
            Value::Float(v) => *v as i64,
            Value::Double(v) => *v as i64,
            _ => self.to_i32()? as i64,
        })
    }

    /// Any numeric value as `f64`.
    pub fn to_f64(&self) -> Result<f64, ValueError> {
        Ok(match self {
            Value::Long(v) => *v as f64,
            Value::Float(v) => *v as f64,
            Value::Double(v) => *v,
            _ => self.to_i32()? as f64,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Char(v) => match char::from_u32(*v as u32) {
                Some(c) => write!(f, "'{}'", c),
                None => write!(f, "'\\u{{{:04x}}}'", v),
            },
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::HostObject(v) => write!(f, "{}", v),
            Value::ScriptObject(v) => write!(f, "ScriptObjectRef({})", v.ref_id()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    HostObjectRef => HostObject,
    ScriptObjectRef => ScriptObject,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
