//! Guest value-handle API
//!
//! `JsEnv` is the native value-handle surface of the guest engine: create
//! and inspect values, define properties, call functions, attach host
//! identities to wrapper objects and hold references that keep (or merely
//! observe) guest objects. Every method must be called on the guest thread.
//!
//! `MemoryEnv` is a complete in-process implementation of the surface. It has
//! no script evaluator and no tracing collector: unreachability is declared
//! explicitly through `MemoryEnv::finalize`, which runs the object's
//! finalizer exactly as an engine would after a collection.

mod heap;


use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub use heap::MemoryEnv;

use crate::error::{JsError, JsResult};
use crate::memory::{HostMemory, NumericKind};

/// Opaque handle to a guest heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

/// A guest value. Strings and objects are handles into the engine's heap and
/// are only meaningful on the guest thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Handle),
    Object(Handle),
}

impl JsValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

/// Kind of host collection presented by a view object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    List,
    Set,
    Map,
}

/// Observable type of a guest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    Array,
    TypedArray(NumericKind),
    Promise,
    Error,
    View(ViewKind),
}

impl JsType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Function => "function",
            Self::Array | Self::View(ViewKind::List) => "array",
            Self::TypedArray(kind) => kind.typed_array_name(),
            Self::Promise => "promise",
            Self::Error => "error",
            Self::Object | Self::View(_) => "object",
        }
    }
}

impl fmt::Display for JsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Native function body: `(env, this, args)`.
pub type NativeFn = Rc<dyn Fn(&dyn JsEnv, JsValue, &[JsValue]) -> JsResult<JsValue>>;

/// Runs once when a wrapped object is finalized.
pub type Finalizer = Box<dyn FnOnce(&dyn JsEnv)>;

/// Runs once when a promise settles: `Ok` on fulfilment, `Err` on rejection.
pub type PromiseReaction = Box<dyn FnOnce(&dyn JsEnv, Result<JsValue, JsValue>)>;

/// Settlement capability of a promise created by `create_promise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferred(pub(crate) Handle);

/// Reference to a guest object, strong (keeps it alive) or weak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(JsValue),
    Rejected(JsValue),
}

/// Behaviour of an exotic guest object whose properties are answered by the
/// host, such as a live view over a host collection.
pub trait ViewHandler: Any {
    fn kind(&self) -> ViewKind;

    /// `Ok(None)` falls through to ordinary property lookup.
    fn get(&self, env: &dyn JsEnv, key: &str) -> JsResult<Option<JsValue>>;

    /// `Ok(false)` falls through to an ordinary property write.
    fn set(&self, env: &dyn JsEnv, key: &str, value: JsValue) -> JsResult<bool>;

    fn keys(&self, env: &dyn JsEnv) -> JsResult<Vec<String>>;

    fn as_any(&self) -> &dyn Any;
}

pub trait JsEnv {
    fn type_of(&self, value: JsValue) -> JsType;

    fn create_string(&self, text: &str) -> JsValue;
    fn read_string(&self, value: JsValue) -> JsResult<String>;

    fn create_object(&self) -> JsValue;
    fn create_object_with_prototype(&self, prototype: JsValue) -> JsResult<JsValue>;
    fn get_property(&self, object: JsValue, key: &str) -> JsResult<JsValue>;
    fn set_property(&self, object: JsValue, key: &str, value: JsValue) -> JsResult<()>;
    fn has_property(&self, object: JsValue, key: &str) -> JsResult<bool>;
    fn delete_property(&self, object: JsValue, key: &str) -> JsResult<bool>;
    fn define_accessor(
        &self,
        object: JsValue,
        key: &str,
        getter: Option<JsValue>,
        setter: Option<JsValue>,
    ) -> JsResult<()>;
    fn own_keys(&self, object: JsValue) -> JsResult<Vec<String>>;

    fn create_array(&self, items: &[JsValue]) -> JsValue;
    fn array_length(&self, array: JsValue) -> JsResult<usize>;
    fn array_get(&self, array: JsValue, index: usize) -> JsResult<JsValue>;
    fn array_set(&self, array: JsValue, index: usize, value: JsValue) -> JsResult<()>;

    fn create_function(&self, name: &str, body: NativeFn) -> JsValue;
    fn call_function(&self, function: JsValue, this: JsValue, args: &[JsValue]) -> JsResult<JsValue>;
    fn construct(&self, constructor: JsValue, args: &[JsValue]) -> JsResult<JsValue>;

    /// Typed array aliasing the memory's buffer; no bytes are copied.
    fn create_typed_array(&self, memory: HostMemory) -> JsValue;
    fn typed_array_memory(&self, value: JsValue) -> JsResult<HostMemory>;

    fn create_promise(&self) -> (JsValue, Deferred);
    fn settle_deferred(&self, deferred: Deferred, outcome: Result<JsValue, JsValue>) -> JsResult<()>;
    fn promise_then(&self, promise: JsValue, reaction: PromiseReaction) -> JsResult<()>;
    fn promise_state(&self, promise: JsValue) -> JsResult<PromiseState>;

    fn create_error(&self, name: &str, message: &str) -> JsValue;

    /// Attach a host identity tag to a guest object. `finalizer` runs when
    /// the guest finalizes the object.
    fn wrap(&self, object: JsValue, tag: u64, finalizer: Finalizer) -> JsResult<()>;
    fn unwrap_tag(&self, object: JsValue) -> Option<u64>;
    /// Detach the tag without running the finalizer.
    fn remove_wrap(&self, object: JsValue) -> JsResult<Option<u64>>;

    fn create_view(&self, handler: Rc<dyn ViewHandler>) -> JsValue;
    fn view_handler(&self, value: JsValue) -> Option<Rc<dyn ViewHandler>>;

    fn create_reference(&self, value: JsValue, strong: bool) -> JsResult<RefId>;
    /// `None` once the target has been finalized or the reference deleted.
    fn reference_value(&self, reference: RefId) -> Option<JsValue>;
    fn delete_reference(&self, reference: RefId);

    fn strict_equals(&self, a: JsValue, b: JsValue) -> bool;

    fn call_method(&self, object: JsValue, name: &str, args: &[JsValue]) -> JsResult<JsValue> {
        let function = self.get_property(object, name)?;
        self.call_function(function, object, args)
    }

    fn read_number(&self, value: JsValue) -> JsResult<f64> {
        value
            .as_number()
            .ok_or_else(|| JsError::type_error(format!("expected number, found {}", self.type_of(value))))
    }
}
