//! Host value model
//!
//! `HostValue` is the host side of every crossing. Aggregates with value
//! semantics (`Struct`, `Array`, `Tuple`) are owned copies; everything else
//! (`Object`, collections, `Memory`, `Function`, `Task`) is a shared handle
//! whose identity survives a round trip through the guest.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::collections::{HostList, HostMap, HostSet};
use crate::error::HostError;
use crate::guest::JsValue;
use crate::memory::HostMemory;
use crate::task::HostTask;

#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Host null. Also the value of a void return.
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// A single UTF-16 code unit.
    Char(u16),
    String(HostString),
    Struct(HostStruct),
    Object(HostObject),
    Array(Vec<HostValue>),
    List(HostList),
    Set(HostSet),
    Map(HostMap),
    Memory(HostMemory),
    Function(HostFunction),
    Task(HostTask),
    Tuple(Vec<HostValue>),
    /// Enum value as its underlying integer.
    Enum(i64),
    /// Guest value passed through without adaptation.
    Raw(JsValue),
}

impl HostValue {
    /// Short name of the value's shape, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Struct(_) => "struct",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Memory(_) => "memory",
            Self::Function(_) => "function",
            Self::Task(_) => "task",
            Self::Tuple(_) => "tuple",
            Self::Enum(_) => "enum",
            Self::Raw(_) => "raw",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric value widened to f64, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::I8(v) => Some(v as f64),
            Self::U8(v) => Some(v as f64),
            Self::I16(v) => Some(v as f64),
            Self::U16(v) => Some(v as f64),
            Self::I32(v) => Some(v as f64),
            Self::U32(v) => Some(v as f64),
            Self::I64(v) => Some(v as f64),
            Self::U64(v) => Some(v as f64),
            Self::F32(v) => Some(v as f64),
            Self::F64(v) => Some(v),
            Self::Enum(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.to_string_lossy()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Build a mismatch error for a value that did not have the expected shape.
    pub fn mismatch(&self, expected: impl Into<String>) -> HostError {
        HostError::TypeMismatch {
            expected: expected.into(),
            found: self.type_name().to_string(),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool, i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
    HostObject => Object, HostStruct => Struct, HostMemory => Memory,
    HostFunction => Function, HostTask => Task, HostList => List,
    HostSet => Set, HostMap => Map,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(HostString::from(value))
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(HostString::from(value.as_str()))
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Host text: a sequence of UTF-16 code units.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct HostString(Vec<u16>);

impl HostString {
    pub fn from_units(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode to UTF-8, replacing unpaired surrogates.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for HostString {
    fn from(value: &str) -> Self {
        Self(value.encode_utf16().collect())
    }
}

impl fmt::Display for HostString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for HostString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Value-semantics aggregate: a named bag of fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStruct {
    pub type_path: String,
    pub fields: Vec<(String, HostValue)>,
}

impl HostStruct {
    pub fn new(type_path: impl Into<String>) -> Self {
        Self {
            type_path: type_path.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field assignment
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }
}

/// Stable identity of a host object for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ObjectInner {
    id: ObjectId,
    class: String,
    state: RwLock<Box<dyn Any + Send + Sync>>,
}

/// Reference-semantics host object: an identity, a class path and opaque
/// state owned by the host implementation.
#[derive(Clone)]
pub struct HostObject(Arc<ObjectInner>);

impl HostObject {
    pub fn new<T: Any + Send + Sync>(class: impl Into<String>, state: T) -> Self {
        Self(Arc::new(ObjectInner {
            id: ObjectId::next(),
            class: class.into(),
            state: RwLock::new(Box::new(state)),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Declared class path, e.g. `app.Counter`.
    pub fn class(&self) -> &str {
        &self.0.class
    }

    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, HostError> {
        let state = self.0.state.read();
        state
            .downcast_ref::<T>()
            .map(f)
            .ok_or_else(|| self.state_mismatch::<T>())
    }

    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, HostError> {
        let mut state = self.0.state.write();
        match state.downcast_mut::<T>() {
            Some(value) => Ok(f(value)),
            None => Err(self.state_mismatch::<T>()),
        }
    }

    fn state_mismatch<T>(&self) -> HostError {
        HostError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: self.0.class.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            id: self.0.id,
            inner: Arc::downgrade(&self.0),
        }
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({} {})", self.0.class, self.0.id)
    }
}

/// Non-owning handle, used to observe when the host lets an object go.
#[derive(Clone)]
pub struct WeakHostObject {
    id: ObjectId,
    inner: Weak<ObjectInner>,
}

impl WeakHostObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(HostObject)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

type HostFn = dyn Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync;

/// Host callable value (a delegate).
#[derive(Clone)]
pub struct HostFunction(Arc<HostFn>);

impl HostFunction {
    pub fn new(
        f: impl Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, HostError> {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        count: u32,
    }

    #[test]
    fn test_host_string_utf16() {
        let s = HostString::from("héllo 😀");
        assert_eq!(s.len(), 8);
        assert_eq!(s.to_string_lossy(), "héllo 😀");
    }

    #[test]
    fn test_object_identity_and_state() {
        let obj = HostObject::new("app.Counter", Counter { count: 1 });
        let same = obj.clone();
        let other = HostObject::new("app.Counter", Counter { count: 1 });

        assert_eq!(obj, same);
        assert_ne!(obj, other);
        assert_ne!(obj.id(), other.id());

        same.with_mut(|c: &mut Counter| c.count += 1).unwrap();
        assert_eq!(obj.with(|c: &Counter| c.count).unwrap(), 2);
        assert!(obj.with(|_: &String| ()).is_err());
    }

    #[test]
    fn test_weak_object_observes_release() {
        let obj = HostObject::new("app.Counter", Counter { count: 0 });
        let weak = obj.downgrade();
        assert!(weak.is_alive());
        drop(obj);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_struct_fields() {
        let mut point = HostStruct::new("app.Point").with_field("X", 1).with_field("Y", 2);
        point.set("X", 5);
        assert_eq!(point.get("X"), Some(&HostValue::I32(5)));
        assert_eq!(point.fields.len(), 2);
        assert_eq!(point.get("Z"), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(HostValue::from(None::<i32>), HostValue::Null);
        assert_eq!(HostValue::from(Some(3u8)), HostValue::U8(3));
    }
}
