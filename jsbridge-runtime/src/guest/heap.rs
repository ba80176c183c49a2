//! In-memory guest engine

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use super::{
    Deferred, Finalizer, Handle, JsEnv, JsType, JsValue, NativeFn, PromiseReaction, PromiseState,
    RefId, ViewHandler,
};
use crate::error::{JsError, JsResult};
use crate::memory::HostMemory;

enum Property {
    Data(JsValue),
    Accessor {
        get: Option<JsValue>,
        set: Option<JsValue>,
    },
}

enum ObjectKind {
    Ordinary,
    Array(Vec<JsValue>),
    Function { name: String, body: NativeFn },
    TypedArray(HostMemory),
    Promise {
        state: PromiseState,
        reactions: Vec<PromiseReaction>,
    },
    Error,
    View(Rc<dyn ViewHandler>),
}

struct Wrap {
    tag: u64,
    finalizer: Option<Finalizer>,
}

struct HeapObject {
    kind: ObjectKind,
    properties: Vec<(String, Property)>,
    prototype: Option<u64>,
    wrap: Option<Wrap>,
}

impl HeapObject {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            prototype: None,
            wrap: None,
        }
    }

    fn own(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    fn put(&mut self, key: &str, property: Property) {
        match self.properties.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = property,
            None => self.properties.push((key.to_string(), property)),
        }
    }
}

struct RefSlot {
    target: u64,
    strong: bool,
}

#[derive(Default)]
struct Heap {
    next_handle: u64,
    strings: HashMap<u64, Rc<str>>,
    objects: HashMap<u64, HeapObject>,
    next_ref: u64,
    references: HashMap<u64, RefSlot>,
    finalized: usize,
}

impl Heap {
    fn alloc_handle(&mut self, object: HeapObject) -> Handle {
        self.next_handle += 1;
        self.objects.insert(self.next_handle, object);
        Handle::new(self.next_handle)
    }

    fn alloc(&mut self, object: HeapObject) -> JsValue {
        JsValue::Object(self.alloc_handle(object))
    }

    fn alloc_string(&mut self, text: &str) -> JsValue {
        self.next_handle += 1;
        self.strings.insert(self.next_handle, Rc::from(text));
        JsValue::String(Handle::new(self.next_handle))
    }

    fn object(&self, id: u64) -> JsResult<&HeapObject> {
        self.objects.get(&id).ok_or(JsError::InvalidHandle)
    }

    fn object_mut(&mut self, id: u64) -> JsResult<&mut HeapObject> {
        self.objects.get_mut(&id).ok_or(JsError::InvalidHandle)
    }
}

enum Lookup {
    Value(JsValue),
    Accessor(Option<JsValue>),
    Missing,
}

/// Single-threaded guest heap implementing `JsEnv`.
#[derive(Default)]
pub struct MemoryEnv {
    heap: RefCell<Heap>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `value` unreachable from guest code and collect it: run its
    /// finalizer, free the cell and invalidate weak references to it.
    ///
    /// Returns false (and collects nothing) while a strong reference still
    /// targets the object.
    pub fn finalize(&self, value: JsValue) -> bool {
        let JsValue::Object(handle) = value else {
            return false;
        };
        let id = handle.raw();
        let finalizer = {
            let mut heap = self.heap.borrow_mut();
            let rooted = heap
                .references
                .values()
                .any(|slot| slot.strong && slot.target == id);
            if rooted {
                return false;
            }
            let Some(object) = heap.objects.remove(&id) else {
                return false;
            };
            heap.finalized += 1;
            object.wrap.and_then(|wrap| wrap.finalizer)
        };
        trace!(handle = id, wrapped = finalizer.is_some(), "guest object finalized");
        if let Some(finalizer) = finalizer {
            finalizer(self);
        }
        true
    }

    pub fn is_live(&self, value: JsValue) -> bool {
        match value {
            JsValue::Object(handle) => self.heap.borrow().objects.contains_key(&handle.raw()),
            _ => true,
        }
    }

    pub fn live_objects(&self) -> usize {
        self.heap.borrow().objects.len()
    }

    pub fn finalized_count(&self) -> usize {
        self.heap.borrow().finalized
    }

    pub fn reference_count(&self) -> usize {
        self.heap.borrow().references.len()
    }

    fn object_id(&self, value: JsValue) -> JsResult<u64> {
        match value {
            JsValue::Object(handle) => {
                if self.heap.borrow().objects.contains_key(&handle.raw()) {
                    Ok(handle.raw())
                } else {
                    Err(JsError::InvalidHandle)
                }
            }
            other => Err(JsError::type_error(format!(
                "{} is not an object",
                self.type_of(other)
            ))),
        }
    }

    fn view_of(&self, id: u64) -> Option<Rc<dyn ViewHandler>> {
        match &self.heap.borrow().objects.get(&id)?.kind {
            ObjectKind::View(handler) => Some(handler.clone()),
            _ => None,
        }
    }

    fn lookup(&self, id: u64, key: &str) -> JsResult<Lookup> {
        let heap = self.heap.borrow();
        let mut current = Some(id);
        while let Some(cursor) = current {
            let object = heap.object(cursor)?;
            match &object.kind {
                ObjectKind::Array(items) => {
                    if key == "length" {
                        return Ok(Lookup::Value(JsValue::Number(items.len() as f64)));
                    }
                    if let Ok(index) = key.parse::<usize>() {
                        return Ok(Lookup::Value(
                            items.get(index).copied().unwrap_or(JsValue::Undefined),
                        ));
                    }
                }
                ObjectKind::TypedArray(memory) => {
                    if key == "length" {
                        return Ok(Lookup::Value(JsValue::Number(memory.len() as f64)));
                    }
                    if let Ok(index) = key.parse::<usize>() {
                        return Ok(Lookup::Value(
                            memory
                                .get(index)
                                .map(JsValue::Number)
                                .unwrap_or(JsValue::Undefined),
                        ));
                    }
                }
                _ => {}
            }
            match object.own(key) {
                Some(Property::Data(value)) => return Ok(Lookup::Value(*value)),
                Some(Property::Accessor { get, .. }) => return Ok(Lookup::Accessor(*get)),
                None => current = object.prototype,
            }
        }
        Ok(Lookup::Missing)
    }

    /// Find the setter governing `key`, if the key resolves to an accessor.
    fn setter_for(&self, id: u64, key: &str) -> JsResult<Option<Option<JsValue>>> {
        let heap = self.heap.borrow();
        let mut current = Some(id);
        while let Some(cursor) = current {
            let object = heap.object(cursor)?;
            match object.own(key) {
                Some(Property::Accessor { set, .. }) => return Ok(Some(*set)),
                Some(Property::Data(_)) => return Ok(None),
                None => current = object.prototype,
            }
        }
        Ok(None)
    }
}

impl JsEnv for MemoryEnv {
    fn type_of(&self, value: JsValue) -> JsType {
        match value {
            JsValue::Undefined => JsType::Undefined,
            JsValue::Null => JsType::Null,
            JsValue::Boolean(_) => JsType::Boolean,
            JsValue::Number(_) => JsType::Number,
            JsValue::String(_) => JsType::String,
            JsValue::Object(handle) => match self.heap.borrow().objects.get(&handle.raw()) {
                Some(object) => match &object.kind {
                    ObjectKind::Ordinary => JsType::Object,
                    ObjectKind::Array(_) => JsType::Array,
                    ObjectKind::Function { .. } => JsType::Function,
                    ObjectKind::TypedArray(memory) => JsType::TypedArray(memory.kind()),
                    ObjectKind::Promise { .. } => JsType::Promise,
                    ObjectKind::Error => JsType::Error,
                    ObjectKind::View(handler) => JsType::View(handler.kind()),
                },
                None => JsType::Undefined,
            },
        }
    }

    fn create_string(&self, text: &str) -> JsValue {
        self.heap.borrow_mut().alloc_string(text)
    }

    fn read_string(&self, value: JsValue) -> JsResult<String> {
        match value {
            JsValue::String(handle) => self
                .heap
                .borrow()
                .strings
                .get(&handle.raw())
                .map(|s| s.to_string())
                .ok_or(JsError::InvalidHandle),
            other => Err(JsError::type_error(format!(
                "expected string, found {}",
                self.type_of(other)
            ))),
        }
    }

    fn create_object(&self) -> JsValue {
        self.heap.borrow_mut().alloc(HeapObject::new(ObjectKind::Ordinary))
    }

    fn create_object_with_prototype(&self, prototype: JsValue) -> JsResult<JsValue> {
        let proto = self.object_id(prototype)?;
        let mut object = HeapObject::new(ObjectKind::Ordinary);
        object.prototype = Some(proto);
        Ok(self.heap.borrow_mut().alloc(object))
    }

    fn get_property(&self, object: JsValue, key: &str) -> JsResult<JsValue> {
        let id = match object {
            JsValue::Undefined | JsValue::Null => {
                return Err(JsError::type_error(format!(
                    "cannot read property '{key}' of {}",
                    self.type_of(object)
                )))
            }
            JsValue::Object(_) => self.object_id(object)?,
            _ => return Ok(JsValue::Undefined),
        };
        if let Some(handler) = self.view_of(id) {
            if let Some(value) = handler.get(self, key)? {
                return Ok(value);
            }
        }
        match self.lookup(id, key)? {
            Lookup::Value(value) => Ok(value),
            Lookup::Accessor(Some(getter)) => self.call_function(getter, object, &[]),
            Lookup::Accessor(None) | Lookup::Missing => Ok(JsValue::Undefined),
        }
    }

    fn set_property(&self, object: JsValue, key: &str, value: JsValue) -> JsResult<()> {
        let id = self.object_id(object)?;
        if let Some(handler) = self.view_of(id) {
            if handler.set(self, key, value)? {
                return Ok(());
            }
        }
        match self.setter_for(id, key)? {
            Some(Some(setter)) => {
                self.call_function(setter, object, &[value])?;
                return Ok(());
            }
            Some(None) => {
                return Err(JsError::type_error(format!(
                    "cannot set property '{key}' which has only a getter"
                )))
            }
            None => {}
        }

        let mut heap = self.heap.borrow_mut();
        let target = heap.object_mut(id)?;
        match &mut target.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    let len = value.as_number().unwrap_or(0.0).max(0.0) as usize;
                    items.resize(len, JsValue::Undefined);
                    return Ok(());
                }
                if let Ok(index) = key.parse::<usize>() {
                    if index >= items.len() {
                        items.resize(index + 1, JsValue::Undefined);
                    }
                    items[index] = value;
                    return Ok(());
                }
            }
            ObjectKind::TypedArray(memory) => {
                if let Ok(index) = key.parse::<usize>() {
                    let number = value.as_number().unwrap_or(f64::NAN);
                    return memory.set(index, number).map_err(JsError::from);
                }
            }
            _ => {}
        }
        target.put(key, Property::Data(value));
        Ok(())
    }

    fn has_property(&self, object: JsValue, key: &str) -> JsResult<bool> {
        let id = self.object_id(object)?;
        if let Some(handler) = self.view_of(id) {
            if handler.get(self, key)?.is_some() {
                return Ok(true);
            }
        }
        Ok(!matches!(self.lookup(id, key)?, Lookup::Missing))
    }

    fn delete_property(&self, object: JsValue, key: &str) -> JsResult<bool> {
        let id = self.object_id(object)?;
        let mut heap = self.heap.borrow_mut();
        let target = heap.object_mut(id)?;
        let before = target.properties.len();
        target.properties.retain(|(k, _)| k != key);
        Ok(target.properties.len() != before)
    }

    fn define_accessor(
        &self,
        object: JsValue,
        key: &str,
        getter: Option<JsValue>,
        setter: Option<JsValue>,
    ) -> JsResult<()> {
        let id = self.object_id(object)?;
        let mut heap = self.heap.borrow_mut();
        heap.object_mut(id)?.put(
            key,
            Property::Accessor {
                get: getter,
                set: setter,
            },
        );
        Ok(())
    }

    fn own_keys(&self, object: JsValue) -> JsResult<Vec<String>> {
        let id = self.object_id(object)?;
        if let Some(handler) = self.view_of(id) {
            return handler.keys(self);
        }
        let heap = self.heap.borrow();
        let target = heap.object(id)?;
        let mut keys = match &target.kind {
            ObjectKind::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            ObjectKind::TypedArray(memory) => (0..memory.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        };
        keys.extend(target.properties.iter().map(|(k, _)| k.clone()));
        Ok(keys)
    }

    fn create_array(&self, items: &[JsValue]) -> JsValue {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::Array(items.to_vec())))
    }

    fn array_length(&self, array: JsValue) -> JsResult<usize> {
        let id = self.object_id(array)?;
        if self.view_of(id).is_some() {
            let length = self.get_property(array, "length")?;
            return Ok(self.read_number(length)? as usize);
        }
        match &self.heap.borrow().object(id)?.kind {
            ObjectKind::Array(items) => Ok(items.len()),
            ObjectKind::TypedArray(memory) => Ok(memory.len()),
            _ => Err(JsError::type_error("value is not an array")),
        }
    }

    fn array_get(&self, array: JsValue, index: usize) -> JsResult<JsValue> {
        self.get_property(array, &index.to_string())
    }

    fn array_set(&self, array: JsValue, index: usize, value: JsValue) -> JsResult<()> {
        self.set_property(array, &index.to_string(), value)
    }

    fn create_function(&self, name: &str, body: NativeFn) -> JsValue {
        self.heap.borrow_mut().alloc(HeapObject::new(ObjectKind::Function {
            name: name.to_string(),
            body,
        }))
    }

    fn call_function(&self, function: JsValue, this: JsValue, args: &[JsValue]) -> JsResult<JsValue> {
        let id = self.object_id(function)?;
        let (name, body) = match &self.heap.borrow().object(id)?.kind {
            ObjectKind::Function { name, body } => (name.clone(), body.clone()),
            _ => {
                return Err(JsError::type_error(format!(
                    "{} is not a function",
                    self.type_of(function)
                )))
            }
        };
        trace!(function = %name, args = args.len(), "guest call");
        body(self, this, args)
    }

    fn construct(&self, constructor: JsValue, args: &[JsValue]) -> JsResult<JsValue> {
        let prototype = self.get_property(constructor, "prototype")?;
        let instance = if prototype.is_object() {
            self.create_object_with_prototype(prototype)?
        } else {
            self.create_object()
        };
        let result = self.call_function(constructor, instance, args)?;
        Ok(if result.is_object() { result } else { instance })
    }

    fn create_typed_array(&self, memory: HostMemory) -> JsValue {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::TypedArray(memory)))
    }

    fn typed_array_memory(&self, value: JsValue) -> JsResult<HostMemory> {
        let id = self.object_id(value)?;
        match &self.heap.borrow().object(id)?.kind {
            ObjectKind::TypedArray(memory) => Ok(memory.clone()),
            _ => Err(JsError::type_error("value is not a typed array")),
        }
    }

    fn create_promise(&self) -> (JsValue, Deferred) {
        let handle = self.heap.borrow_mut().alloc_handle(HeapObject::new(ObjectKind::Promise {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }));
        (JsValue::Object(handle), Deferred(handle))
    }

    fn settle_deferred(&self, deferred: Deferred, outcome: Result<JsValue, JsValue>) -> JsResult<()> {
        let reactions = {
            let mut heap = self.heap.borrow_mut();
            match &mut heap.object_mut(deferred.0.raw())?.kind {
                ObjectKind::Promise { state, reactions } => {
                    if *state != PromiseState::Pending {
                        return Ok(());
                    }
                    *state = match outcome {
                        Ok(value) => PromiseState::Fulfilled(value),
                        Err(reason) => PromiseState::Rejected(reason),
                    };
                    std::mem::take(reactions)
                }
                _ => return Err(JsError::type_error("deferred does not refer to a promise")),
            }
        };
        for reaction in reactions {
            reaction(self, outcome);
        }
        Ok(())
    }

    fn promise_then(&self, promise: JsValue, reaction: PromiseReaction) -> JsResult<()> {
        let id = self.object_id(promise)?;
        let settled = {
            let mut heap = self.heap.borrow_mut();
            match &mut heap.object_mut(id)?.kind {
                ObjectKind::Promise { state, reactions } => match *state {
                    PromiseState::Pending => {
                        reactions.push(reaction);
                        return Ok(());
                    }
                    PromiseState::Fulfilled(value) => Ok(value),
                    PromiseState::Rejected(reason) => Err(reason),
                },
                _ => return Err(JsError::type_error("value is not a promise")),
            }
        };
        reaction(self, settled);
        Ok(())
    }

    fn promise_state(&self, promise: JsValue) -> JsResult<PromiseState> {
        let id = self.object_id(promise)?;
        match &self.heap.borrow().object(id)?.kind {
            ObjectKind::Promise { state, .. } => Ok(*state),
            _ => Err(JsError::type_error("value is not a promise")),
        }
    }

    fn create_error(&self, name: &str, message: &str) -> JsValue {
        let mut heap = self.heap.borrow_mut();
        let name = heap.alloc_string(name);
        let message = heap.alloc_string(message);
        let mut error = HeapObject::new(ObjectKind::Error);
        error.put("name", Property::Data(name));
        error.put("message", Property::Data(message));
        heap.alloc(error)
    }

    fn wrap(&self, object: JsValue, tag: u64, finalizer: Finalizer) -> JsResult<()> {
        let id = self.object_id(object)?;
        let mut heap = self.heap.borrow_mut();
        let target = heap.object_mut(id)?;
        if target.wrap.is_some() {
            return Err(JsError::type_error("object is already wrapped"));
        }
        target.wrap = Some(Wrap {
            tag,
            finalizer: Some(finalizer),
        });
        Ok(())
    }

    fn unwrap_tag(&self, object: JsValue) -> Option<u64> {
        let JsValue::Object(handle) = object else {
            return None;
        };
        self.heap
            .borrow()
            .objects
            .get(&handle.raw())
            .and_then(|o| o.wrap.as_ref())
            .map(|w| w.tag)
    }

    fn remove_wrap(&self, object: JsValue) -> JsResult<Option<u64>> {
        let id = self.object_id(object)?;
        let wrap = self.heap.borrow_mut().object_mut(id)?.wrap.take();
        Ok(wrap.map(|w| w.tag))
    }

    fn create_view(&self, handler: Rc<dyn ViewHandler>) -> JsValue {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::View(handler)))
    }

    fn view_handler(&self, value: JsValue) -> Option<Rc<dyn ViewHandler>> {
        match value {
            JsValue::Object(handle) => self.view_of(handle.raw()),
            _ => None,
        }
    }

    fn create_reference(&self, value: JsValue, strong: bool) -> JsResult<RefId> {
        let target = self.object_id(value)?;
        let mut heap = self.heap.borrow_mut();
        heap.next_ref += 1;
        let id = heap.next_ref;
        heap.references.insert(id, RefSlot { target, strong });
        Ok(RefId(id))
    }

    fn reference_value(&self, reference: RefId) -> Option<JsValue> {
        let heap = self.heap.borrow();
        let slot = heap.references.get(&reference.0)?;
        heap.objects
            .contains_key(&slot.target)
            .then(|| JsValue::Object(Handle::new(slot.target)))
    }

    fn delete_reference(&self, reference: RefId) {
        self.heap.borrow_mut().references.remove(&reference.0);
    }

    fn strict_equals(&self, a: JsValue, b: JsValue) -> bool {
        match (a, b) {
            (JsValue::String(x), JsValue::String(y)) => {
                let heap = self.heap.borrow();
                heap.strings.get(&x.raw()) == heap.strings.get(&y.raw())
            }
            (JsValue::Number(x), JsValue::Number(y)) => x == y,
            _ => a == b,
        }
    }
}
