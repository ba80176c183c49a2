//! Conversion interpreter
//!
//! `Marshaller` executes the conversion IR against a live guest environment.
//! It is cheap to clone and `Send + Sync`: delegates, collection views and
//! task continuations carry a clone so they keep converting after the call
//! that created them has returned.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use jsbridge_runtime::error::JsResult;
use jsbridge_runtime::{
    ClassHierarchy, GuestReference, HostError, HostFunction, HostList, HostMap, HostSet, HostString, HostStruct, HostTask,
    HostValue, JsEnv, JsError, JsType, JsValue, NumericKind,
};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::classify::CollectionKind;
use crate::conversion::{Bidi, CodecTable, Conversion};
use crate::link::views::{GuestBacking, GuestList, GuestMap, GuestSet, HostListView, HostMapView, HostSetView};
use crate::link::RuntimeState;
use crate::model::{EnumValue, Primitive, TypePath};

struct Shared {
    codecs: CodecTable,
    /// Guest prototype per host class path.
    prototypes: RwLock<HashMap<String, JsValue>>,
    enums: HashMap<TypePath, Vec<EnumValue>>,
    hierarchy: ClassHierarchy,
    state: RuntimeState,
}

#[derive(Clone)]
pub struct Marshaller(Arc<Shared>);

impl std::fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaller")
            .field("codecs", &self.0.codecs.len())
            .field("classes", &self.0.prototypes.read().len())
            .finish()
    }
}

impl Marshaller {
    pub fn new(
        codecs: CodecTable,
        enums: HashMap<TypePath, Vec<EnumValue>>,
        hierarchy: ClassHierarchy,
        state: RuntimeState,
    ) -> Self {
        Self(Arc::new(Shared {
            codecs,
            prototypes: RwLock::new(HashMap::new()),
            enums,
            hierarchy,
            state,
        }))
    }

    pub fn state(&self) -> &RuntimeState {
        &self.0.state
    }

    pub fn codecs(&self) -> &CodecTable {
        &self.0.codecs
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.0.hierarchy
    }

    /// Wrappers created for instances of `class` get `prototype`.
    pub fn register_prototype(&self, class: &TypePath, prototype: JsValue) {
        self.0.prototypes.write().insert(class.to_string(), prototype);
    }

    pub fn prototype(&self, class: &str) -> Option<JsValue> {
        self.0.prototypes.read().get(class).copied()
    }

    /// Host class behind a live wrapper, for overload resolution.
    pub fn class_of(&self, env: &dyn JsEnv, value: JsValue) -> Option<String> {
        match self.0.state.proxies.from_guest(env, value) {
            Ok(Some(object)) => Some(object.class().to_string()),
            _ => None,
        }
    }

    /// Guest value into a host value.
    pub fn to_host(&self, env: &dyn JsEnv, conversion: &Conversion, value: JsValue) -> JsResult<HostValue> {
        match conversion {
            Conversion::Raw => Ok(HostValue::Raw(value)),
            Conversion::Primitive(p) => primitive_to_host(env, *p, value),
            Conversion::String => match value {
                JsValue::String(_) => {
                    let text = env.read_string(value)?;
                    Ok(HostValue::String(HostString::from(text.as_str())))
                }
                _ => Err(mismatch("string", env, value)),
            },
            Conversion::Nullable(inner) => {
                if value.is_nullish() {
                    Ok(HostValue::Null)
                } else {
                    self.to_host(env, inner, value)
                }
            }
            Conversion::Struct { codec } => self.struct_to_host(env, codec, value),
            Conversion::Class(path) => {
                if value.is_nullish() {
                    return Err(mismatch(&path.to_string(), env, value));
                }
                match self.0.state.proxies.from_guest(env, value)? {
                    Some(object) if self.0.hierarchy.is_assignable(&path.to_string(), object.class()) => {
                        Ok(HostValue::Object(object))
                    }
                    Some(object) => Err(JsError::type_error(format!(
                        "expected instance of {path}, found instance of {}",
                        object.class()
                    ))),
                    None => Err(mismatch(&format!("instance of {path}"), env, value)),
                }
            }
            Conversion::Array { codec } => self.array_to_host(env, codec, value),
            Conversion::Collection { kind, element, key } => {
                self.collection_to_host(env, *kind, element, key.as_deref(), value)
            }
            Conversion::Memory { element, read_only } => match env.type_of(value) {
                JsType::TypedArray(kind) if kind == *element => {
                    let memory = env.typed_array_memory(value)?;
                    Ok(HostValue::Memory(if *read_only { memory.as_read_only() } else { memory }))
                }
                _ => Err(mismatch(element.typed_array_name(), env, value)),
            },
            Conversion::Delegate { params, ret } => self.delegate_to_host(env, params, ret.as_deref(), value),
            Conversion::Task(inner) => self.task_to_host(env, inner.as_deref(), value),
            Conversion::Tuple(items) => {
                if env.type_of(value) != JsType::Array {
                    return Err(mismatch("array", env, value));
                }
                let len = env.array_length(value)?;
                if len != items.len() {
                    return Err(JsError::type_error(format!(
                        "expected a tuple of {} elements, found {len}",
                        items.len()
                    )));
                }
                let mut out = Vec::with_capacity(len);
                for (index, item) in items.iter().enumerate() {
                    out.push(self.to_host(env, item, env.array_get(value, index)?)?);
                }
                Ok(HostValue::Tuple(out))
            }
            Conversion::Enum(path) => self.enum_to_host(env, path, value),
        }
    }

    /// Host value into a guest value. Host null becomes `undefined` for
    /// every reference-like conversion.
    pub fn to_guest(&self, env: &dyn JsEnv, conversion: &Conversion, value: &HostValue) -> JsResult<JsValue> {
        if value.is_null() && accepts_host_null(conversion) {
            return Ok(JsValue::Undefined);
        }
        match conversion {
            Conversion::Raw => match value {
                HostValue::Raw(raw) => Ok(*raw),
                other => Err(host_mismatch("guest value", other)),
            },
            Conversion::Primitive(p) => primitive_to_guest(env, *p, value),
            Conversion::String => match value {
                HostValue::String(text) => Ok(env.create_string(&text.to_string_lossy())),
                other => Err(host_mismatch("string", other)),
            },
            Conversion::Nullable(inner) => self.to_guest(env, inner, value),
            Conversion::Struct { codec } => self.struct_to_guest(env, codec, value),
            Conversion::Class(path) => match value {
                HostValue::Object(object) => {
                    let prototype = self
                        .prototype(object.class())
                        .or_else(|| self.prototype(&path.to_string()));
                    self.0.state.proxies.to_guest(env, object, |env| match prototype {
                        Some(prototype) => env.create_object_with_prototype(prototype),
                        None => Ok(env.create_object()),
                    })
                }
                other => Err(host_mismatch(&path.to_string(), other)),
            },
            Conversion::Array { codec } => self.array_to_guest(env, codec, value),
            Conversion::Collection { kind, element, key } => {
                self.collection_to_guest(env, *kind, element, key.as_deref(), value)
            }
            Conversion::Memory { element, read_only } => match value {
                HostValue::Memory(memory) if memory.kind() == *element => {
                    let memory = if *read_only { memory.as_read_only() } else { memory.clone() };
                    Ok(env.create_typed_array(memory))
                }
                other => Err(host_mismatch(element.typed_array_name(), other)),
            },
            Conversion::Delegate { params, ret } => match value {
                HostValue::Function(function) => Ok(self.delegate_to_guest(env, function, params, ret.as_deref())),
                other => Err(host_mismatch("function", other)),
            },
            Conversion::Task(inner) => match value {
                HostValue::Task(task) => Ok(self.task_to_guest(env, task, inner.as_deref())),
                other => Err(host_mismatch("task", other)),
            },
            Conversion::Tuple(items) => match value {
                HostValue::Tuple(values) if values.len() == items.len() => {
                    let mut out = Vec::with_capacity(values.len());
                    for (item, value) in items.iter().zip(values) {
                        out.push(self.to_guest(env, item, value)?);
                    }
                    Ok(env.create_array(&out))
                }
                other => Err(host_mismatch(&format!("tuple of {}", items.len()), other)),
            },
            Conversion::Enum(path) => match value {
                HostValue::Enum(v) => Ok(JsValue::Number(*v as f64)),
                other => other
                    .as_f64()
                    .map(JsValue::Number)
                    .ok_or_else(|| host_mismatch(&path.to_string(), other)),
            },
        }
    }

    fn struct_to_host(&self, env: &dyn JsEnv, codec_id: &str, value: JsValue) -> JsResult<HostValue> {
        let codec = self
            .0
            .codecs
            .get_struct(codec_id)
            .ok_or_else(|| JsError::type_error(format!("unknown struct codec '{codec_id}'")))?;
        if !value.is_object() {
            return Err(mismatch(&codec.path.to_string(), env, value));
        }
        let mut out = HostStruct::new(codec.path.to_string());
        for field in &codec.fields {
            let raw = env.get_property(value, &field.js_name)?;
            let converted = self
                .to_host(env, &field.conversion.to_host, raw)
                .map_err(|e| within(e, &format!("{}.{}", codec.path, field.host_name)))?;
            out.fields.push((field.host_name.clone(), converted));
        }
        Ok(HostValue::Struct(out))
    }

    fn struct_to_guest(&self, env: &dyn JsEnv, codec_id: &str, value: &HostValue) -> JsResult<JsValue> {
        let codec = self
            .0
            .codecs
            .get_struct(codec_id)
            .ok_or_else(|| JsError::type_error(format!("unknown struct codec '{codec_id}'")))?;
        let HostValue::Struct(host) = value else {
            return Err(host_mismatch(&codec.path.to_string(), value));
        };
        let out = env.create_object();
        for field in &codec.fields {
            let field_value = host.get(&field.host_name).ok_or_else(|| {
                JsError::type_error(format!("{} has no field '{}'", codec.path, field.host_name))
            })?;
            let converted = self
                .to_guest(env, &field.conversion.to_guest, field_value)
                .map_err(|e| within(e, &format!("{}.{}", codec.path, field.host_name)))?;
            env.set_property(out, &field.js_name, converted)?;
        }
        Ok(out)
    }

    fn array_to_host(&self, env: &dyn JsEnv, codec_id: &str, value: JsValue) -> JsResult<HostValue> {
        let codec = self
            .0
            .codecs
            .get_array(codec_id)
            .ok_or_else(|| JsError::type_error(format!("unknown array codec '{codec_id}'")))?;
        if env.type_of(value) != JsType::Array {
            return Err(mismatch("array", env, value));
        }
        let len = env.array_length(value)?;
        let mut out = Vec::with_capacity(len);
        for index in 0..len {
            let item = env.array_get(value, index)?;
            out.push(
                self.to_host(env, &codec.element.to_host, item)
                    .map_err(|e| within(e, &format!("element {index}")))?,
            );
        }
        Ok(HostValue::Array(out))
    }

    fn array_to_guest(&self, env: &dyn JsEnv, codec_id: &str, value: &HostValue) -> JsResult<JsValue> {
        let codec = self
            .0
            .codecs
            .get_array(codec_id)
            .ok_or_else(|| JsError::type_error(format!("unknown array codec '{codec_id}'")))?;
        let HostValue::Array(items) = value else {
            return Err(host_mismatch("array", value));
        };
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            out.push(
                self.to_guest(env, &codec.element.to_guest, item)
                    .map_err(|e| within(e, &format!("element {index}")))?,
            );
        }
        Ok(env.create_array(&out))
    }

    fn collection_to_host(
        &self,
        env: &dyn JsEnv,
        kind: CollectionKind,
        element: &Bidi,
        key: Option<&Bidi>,
        value: JsValue,
    ) -> JsResult<HostValue> {
        // A view handed out earlier comes back as the host collection itself.
        if let Some(handler) = env.view_handler(value) {
            let any = handler.as_any();
            if let Some(view) = any.downcast_ref::<HostListView>() {
                return Ok(HostValue::List(view.list().clone()));
            }
            if let Some(view) = any.downcast_ref::<HostSetView>() {
                return Ok(HostValue::Set(view.set().clone()));
            }
            if let Some(view) = any.downcast_ref::<HostMapView>() {
                return Ok(HostValue::Map(view.map().clone()));
            }
        }

        let read_only = kind.is_read_only();
        if kind.is_map() {
            let key = key.ok_or_else(|| JsError::type_error("map conversion has no key conversion"))?;
            if env.type_of(value) != JsType::Object {
                return Err(mismatch("object", env, value));
            }
            let backing = GuestBacking::new(env, value, self.clone(), element.clone(), Some(key.clone()))?;
            return Ok(HostValue::Map(HostMap::new(GuestMap::new(backing, read_only))));
        }

        if env.type_of(value) != JsType::Array {
            return Err(mismatch("array", env, value));
        }
        let backing = GuestBacking::new(env, value, self.clone(), element.clone(), None)?;
        if kind.is_set() {
            Ok(HostValue::Set(HostSet::new(GuestSet::new(backing, read_only))))
        } else {
            Ok(HostValue::List(HostList::new(GuestList::new(backing, read_only))))
        }
    }

    fn collection_to_guest(
        &self,
        env: &dyn JsEnv,
        kind: CollectionKind,
        element: &Bidi,
        key: Option<&Bidi>,
        value: &HostValue,
    ) -> JsResult<JsValue> {
        let read_only = kind.is_read_only();
        let view = match value {
            HostValue::List(list) if !kind.is_map() && !kind.is_set() => {
                // A guest array that crossed earlier goes back as itself.
                if let Some(guest) = list.downcast_ref::<GuestList>() {
                    return guest.backing().value(env);
                }
                HostListView::create(env, list.clone(), element.clone(), self.clone(), read_only)
            }
            HostValue::Array(items) if !kind.is_map() && !kind.is_set() => {
                let list = HostList::new(jsbridge_runtime::collections::VecList::new(items.clone(), read_only));
                HostListView::create(env, list, element.clone(), self.clone(), read_only)
            }
            HostValue::Set(set) if kind.is_set() => {
                if let Some(guest) = set.downcast_ref::<GuestSet>() {
                    return guest.backing().value(env);
                }
                HostSetView::create(env, set.clone(), element.clone(), self.clone(), read_only)
            }
            HostValue::Map(map) if kind.is_map() => {
                if let Some(guest) = map.downcast_ref::<GuestMap>() {
                    return guest.backing().value(env);
                }
                let key = key.ok_or_else(|| JsError::type_error("map conversion has no key conversion"))?;
                HostMapView::create(env, map.clone(), key.clone(), element.clone(), self.clone(), read_only)
            }
            other => return Err(host_mismatch(kind.name(), other)),
        };
        Ok(view)
    }

    fn delegate_to_host(
        &self,
        env: &dyn JsEnv,
        params: &[Conversion],
        ret: Option<&Conversion>,
        value: JsValue,
    ) -> JsResult<HostValue> {
        if env.type_of(value) != JsType::Function {
            return Err(mismatch("function", env, value));
        }
        let reference = Arc::new(GuestReference::new(env, value, self.0.state.context.clone())?);
        let marshaller = self.clone();
        let params = params.to_vec();
        let ret = ret.cloned();

        Ok(HostValue::Function(HostFunction::new(move |args: &[HostValue]| {
            let reference = reference.clone();
            let marshaller = marshaller.clone();
            let params = params.clone();
            let ret = ret.clone();
            let args = args.to_vec();
            let context = marshaller.state().context.clone();
            context
                .run(move |env| -> JsResult<HostValue> {
                    let function = reference.value(env)?;
                    let mut guest_args = Vec::with_capacity(args.len());
                    for (index, arg) in args.iter().enumerate() {
                        let conversion = params.get(index).unwrap_or(&Conversion::Raw);
                        guest_args.push(marshaller.to_guest(env, conversion, arg)?);
                    }
                    let result = env.call_function(function, JsValue::Undefined, &guest_args)?;
                    match &ret {
                        Some(ret) => marshaller.to_host(env, ret, result),
                        None => Ok(HostValue::Null),
                    }
                })?
                .map_err(HostError::from)
        })))
    }

    fn delegate_to_guest(
        &self,
        env: &dyn JsEnv,
        function: &HostFunction,
        params: &[Conversion],
        ret: Option<&Conversion>,
    ) -> JsValue {
        let function = function.clone();
        let marshaller = self.clone();
        let params = params.to_vec();
        let ret = ret.cloned();
        env.create_function(
            "delegate",
            Rc::new(move |env: &dyn JsEnv, _this: JsValue, args: &[JsValue]| {
                let mut host_args = Vec::with_capacity(params.len());
                for (index, conversion) in params.iter().enumerate() {
                    let arg = args.get(index).copied().unwrap_or(JsValue::Undefined);
                    host_args.push(marshaller.to_host(env, conversion, arg)?);
                }
                let result = function.call(&host_args).map_err(JsError::from)?;
                match &ret {
                    Some(ret) => marshaller.to_guest(env, ret, &result),
                    None => Ok(JsValue::Undefined),
                }
            }),
        )
    }

    fn task_to_host(&self, env: &dyn JsEnv, inner: Option<&Conversion>, value: JsValue) -> JsResult<HostValue> {
        if env.type_of(value) != JsType::Promise {
            return Err(mismatch("promise", env, value));
        }
        let (task, completer) = HostTask::pending();
        let marshaller = self.clone();
        let inner = inner.cloned();
        env.promise_then(
            value,
            Box::new(move |env: &dyn JsEnv, outcome: Result<JsValue, JsValue>| {
                let completion = match outcome {
                    Ok(result) => match &inner {
                        Some(inner) => marshaller.to_host(env, inner, result).map_err(HostError::from),
                        None => Ok(HostValue::Null),
                    },
                    Err(reason) => Err(HostError::Guest(describe_guest_error(env, reason))),
                };
                completer.complete(completion);
            }),
        )?;
        Ok(HostValue::Task(task))
    }

    /// Promise settled from the guest context once `task` completes,
    /// whichever thread completes it.
    fn task_to_guest(&self, env: &dyn JsEnv, task: &HostTask, inner: Option<&Conversion>) -> JsValue {
        let (promise, deferred) = env.create_promise();
        let marshaller = self.clone();
        let inner = inner.cloned();
        let context = self.0.state.context.clone();
        task.on_complete(move |completion| {
            let posted = context.post(move |env| {
                let outcome = match completion {
                    Ok(value) => match &inner {
                        Some(inner) => marshaller.to_guest(env, inner, &value).map_err(|e| e.to_guest(env)),
                        None => Ok(JsValue::Undefined),
                    },
                    Err(err) => Err(JsError::from(err).to_guest(env)),
                };
                if let Err(err) = env.settle_deferred(deferred, outcome) {
                    debug!(target: "marshal", error = %err, "promise settlement failed");
                }
            });
            if posted.is_err() {
                trace!(target: "marshal", "guest context closed before task settled");
            }
        });
        promise
    }

    fn enum_to_host(&self, env: &dyn JsEnv, path: &TypePath, value: JsValue) -> JsResult<HostValue> {
        match value {
            JsValue::Number(n) if NumericKind::I64.accepts(n) => Ok(HostValue::Enum(n as i64)),
            JsValue::String(_) => {
                let name = env.read_string(value)?;
                self.0
                    .enums
                    .get(path)
                    .and_then(|values| values.iter().find(|v| v.name == name))
                    .map(|v| HostValue::Enum(v.value))
                    .ok_or_else(|| JsError::type_error(format!("'{name}' is not a member of {path}")))
            }
            _ => Err(mismatch(&path.to_string(), env, value)),
        }
    }
}

/// Conversions for which host null crosses as `undefined` instead of being
/// rejected.
fn accepts_host_null(conversion: &Conversion) -> bool {
    matches!(
        conversion,
        Conversion::Nullable(_)
            | Conversion::Raw
            | Conversion::String
            | Conversion::Class(_)
            | Conversion::Array { .. }
            | Conversion::Collection { .. }
            | Conversion::Memory { .. }
            | Conversion::Delegate { .. }
            | Conversion::Task(_)
    )
}

fn primitive_to_host(env: &dyn JsEnv, primitive: Primitive, value: JsValue) -> JsResult<HostValue> {
    match primitive {
        Primitive::Bool => value
            .as_bool()
            .map(HostValue::Bool)
            .ok_or_else(|| mismatch("boolean", env, value)),
        Primitive::Char => {
            let JsValue::String(_) = value else {
                return Err(mismatch("char", env, value));
            };
            let units: Vec<u16> = env.read_string(value)?.encode_utf16().collect();
            match units.as_slice() {
                [unit] => Ok(HostValue::Char(*unit)),
                _ => Err(JsError::type_error(format!(
                    "expected a single character, found a string of length {}",
                    units.len()
                ))),
            }
        }
        numeric => match numeric.numeric_kind() {
            Some(kind) => match value {
                JsValue::Number(n) => number_to_host(kind, n),
                _ => Err(mismatch(kind.name(), env, value)),
            },
            None => Err(mismatch(numeric.name(), env, value)),
        },
    }
}

fn primitive_to_guest(env: &dyn JsEnv, primitive: Primitive, value: &HostValue) -> JsResult<JsValue> {
    match (primitive, value) {
        (Primitive::Bool, HostValue::Bool(b)) => Ok(JsValue::Boolean(*b)),
        (Primitive::Char, HostValue::Char(unit)) => Ok(env.create_string(&String::from_utf16_lossy(&[*unit]))),
        (Primitive::Bool | Primitive::Char, other) => Err(host_mismatch(primitive.name(), other)),
        (_, other) => other
            .as_f64()
            .map(JsValue::Number)
            .ok_or_else(|| host_mismatch(primitive.name(), other)),
    }
}

/// Guest number into the host numeric kind, rejecting fractions and
/// out-of-range values.
pub(crate) fn number_to_host(kind: NumericKind, n: f64) -> JsResult<HostValue> {
    if !kind.accepts(n) {
        return Err(if n.is_finite() && n.fract() == 0.0 {
            JsError::Range(format!("{n} is out of range for {kind}"))
        } else {
            JsError::type_error(format!("{n} is not a valid {kind}"))
        });
    }
    Ok(match kind {
        NumericKind::I8 => HostValue::I8(n as i8),
        NumericKind::U8 => HostValue::U8(n as u8),
        NumericKind::I16 => HostValue::I16(n as i16),
        NumericKind::U16 => HostValue::U16(n as u16),
        NumericKind::I32 => HostValue::I32(n as i32),
        NumericKind::U32 => HostValue::U32(n as u32),
        NumericKind::I64 => HostValue::I64(n as i64),
        NumericKind::U64 => HostValue::U64(n as u64),
        NumericKind::F32 => HostValue::F32(n as f32),
        NumericKind::F64 => HostValue::F64(n),
    })
}

fn mismatch(expected: &str, env: &dyn JsEnv, value: JsValue) -> JsError {
    JsError::type_error(format!("expected {expected}, found {}", env.type_of(value)))
}

fn host_mismatch(expected: &str, value: &HostValue) -> JsError {
    JsError::type_error(format!("expected {expected}, found host {}", value.type_name()))
}

/// Prefix a conversion error with the position it occurred at.
pub(crate) fn within(err: JsError, at: &str) -> JsError {
    match err {
        JsError::Type(message) => JsError::Type(format!("{at}: {message}")),
        JsError::Range(message) => JsError::Range(format!("{at}: {message}")),
        other => other,
    }
}

/// Readable description of a rejection reason or thrown value.
pub(crate) fn describe_guest_error(env: &dyn JsEnv, value: JsValue) -> String {
    match value {
        JsValue::String(_) => env.read_string(value).unwrap_or_default(),
        JsValue::Number(n) => n.to_string(),
        JsValue::Object(_) => {
            let text = |key: &str| {
                env.get_property(value, key)
                    .ok()
                    .filter(|v| matches!(v, JsValue::String(_)))
                    .and_then(|v| env.read_string(v).ok())
            };
            match (text("name"), text("message")) {
                (Some(name), Some(message)) => format!("{name}: {message}"),
                (None, Some(message)) => message,
                _ => env.type_of(value).to_string(),
            }
        }
        other => env.type_of(other).to_string(),
    }
}
