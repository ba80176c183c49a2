//! Live collection views
//!
//! Collections never copy when they cross. A host collection reaches the
//! guest as a view object whose reads and writes go to the host collection;
//! a guest array or object reaches the host as an `Access` implementation
//! whose operations run against the guest value on the guest thread.

use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

use jsbridge_runtime::error::JsResult;
use jsbridge_runtime::{
    GuestReference, HostError, HostList, HostMap, HostSet, HostValue, JsEnv, JsError, JsValue, ListAccess, MapAccess,
    SetAccess, ViewHandler, ViewKind,
};

use crate::conversion::{Bidi, Conversion};
use crate::link::marshal::Marshaller;

fn native(
    env: &dyn JsEnv,
    name: &str,
    body: impl Fn(&dyn JsEnv, &[JsValue]) -> JsResult<JsValue> + 'static,
) -> JsValue {
    env.create_function(
        name,
        Rc::new(move |env: &dyn JsEnv, _this: JsValue, args: &[JsValue]| body(env, args)),
    )
}

fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).copied().unwrap_or(JsValue::Undefined)
}

fn read_only_error(kind: &str) -> JsError {
    JsError::type_error(format!("cannot modify a read-only {kind}"))
}

/// Guest property name for a host map key.
fn key_name(env: &dyn JsEnv, marshaller: &Marshaller, key: &Bidi, value: &HostValue) -> JsResult<String> {
    let guest = marshaller.to_guest(env, &key.to_guest, value)?;
    match guest {
        JsValue::String(_) => env.read_string(guest),
        JsValue::Number(n) => Ok(n.to_string()),
        JsValue::Boolean(b) => Ok(b.to_string()),
        other => Err(JsError::type_error(format!(
            "map key of type {} cannot be a property name",
            env.type_of(other)
        ))),
    }
}

/// Host map key for a guest property name.
fn key_from_name(env: &dyn JsEnv, marshaller: &Marshaller, key: &Bidi, name: &str) -> JsResult<HostValue> {
    let numeric = match &key.to_host {
        Conversion::Primitive(p) => p.numeric_kind().is_some(),
        Conversion::Enum(_) => name.parse::<f64>().is_ok(),
        _ => false,
    };
    let guest = if numeric {
        let n = name
            .parse::<f64>()
            .map_err(|_| JsError::type_error(format!("'{name}' is not a numeric key")))?;
        JsValue::Number(n)
    } else {
        env.create_string(name)
    };
    marshaller.to_host(env, &key.to_host, guest)
}

/// Guest view of a host list: `length`, indexed access, `push` and `clear`.
pub struct HostListView {
    list: HostList,
    element: Bidi,
    marshaller: Marshaller,
    read_only: bool,
}

impl HostListView {
    pub(crate) fn create(
        env: &dyn JsEnv,
        list: HostList,
        element: Bidi,
        marshaller: Marshaller,
        read_only: bool,
    ) -> JsValue {
        let read_only = read_only || list.is_read_only();
        env.create_view(Rc::new(Self {
            list,
            element,
            marshaller,
            read_only,
        }))
    }

    pub fn list(&self) -> &HostList {
        &self.list
    }
}

impl ViewHandler for HostListView {
    fn kind(&self) -> ViewKind {
        ViewKind::List
    }

    fn get(&self, env: &dyn JsEnv, key: &str) -> JsResult<Option<JsValue>> {
        if key == "length" {
            return Ok(Some(JsValue::Number(self.list.len()? as f64)));
        }
        if let Ok(index) = key.parse::<usize>() {
            if index >= self.list.len()? {
                return Ok(Some(JsValue::Undefined));
            }
            let item = self.list.get(index)?;
            return self.marshaller.to_guest(env, &self.element.to_guest, &item).map(Some);
        }

        let list = self.list.clone();
        let read_only = self.read_only;
        let function = match key {
            "push" => {
                let element = self.element.clone();
                let marshaller = self.marshaller.clone();
                native(env, "push", move |env, args| {
                    if read_only {
                        return Err(read_only_error("list"));
                    }
                    for value in args {
                        list.push(marshaller.to_host(env, &element.to_host, *value)?)?;
                    }
                    Ok(JsValue::Number(list.len()? as f64))
                })
            }
            "clear" => native(env, "clear", move |_, _| {
                if read_only {
                    return Err(read_only_error("list"));
                }
                list.clear()?;
                Ok(JsValue::Undefined)
            }),
            _ => return Ok(None),
        };
        Ok(Some(function))
    }

    fn set(&self, env: &dyn JsEnv, key: &str, value: JsValue) -> JsResult<bool> {
        if key == "length" {
            if self.read_only {
                return Err(read_only_error("list"));
            }
            let target = env.read_number(value)?;
            if !target.is_finite() || target < 0.0 || target.fract() != 0.0 {
                return Err(JsError::Range(format!("invalid list length {target}")));
            }
            let target = target as usize;
            let len = self.list.len()?;
            if target > len {
                return Err(JsError::Range(format!("cannot grow a host list from {len} to {target}")));
            }
            for index in (target..len).rev() {
                self.list.remove_at(index)?;
            }
            return Ok(true);
        }
        let Ok(index) = key.parse::<usize>() else {
            return Ok(false);
        };
        if self.read_only {
            return Err(read_only_error("list"));
        }
        let converted = self.marshaller.to_host(env, &self.element.to_host, value)?;
        let len = self.list.len()?;
        if index < len {
            self.list.set(index, converted)?;
        } else if index == len {
            self.list.push(converted)?;
        } else {
            return Err(HostError::IndexOutOfRange { index, len }.into());
        }
        Ok(true)
    }

    fn keys(&self, _env: &dyn JsEnv) -> JsResult<Vec<String>> {
        Ok((0..self.list.len()?).map(|i| i.to_string()).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Guest view of a host set with the guest's `Set` method names.
pub struct HostSetView {
    set: HostSet,
    element: Bidi,
    marshaller: Marshaller,
    read_only: bool,
}

impl HostSetView {
    pub(crate) fn create(
        env: &dyn JsEnv,
        set: HostSet,
        element: Bidi,
        marshaller: Marshaller,
        read_only: bool,
    ) -> JsValue {
        let read_only = read_only || set.is_read_only();
        env.create_view(Rc::new(Self {
            set,
            element,
            marshaller,
            read_only,
        }))
    }

    pub fn set(&self) -> &HostSet {
        &self.set
    }
}

impl ViewHandler for HostSetView {
    fn kind(&self) -> ViewKind {
        ViewKind::Set
    }

    fn get(&self, env: &dyn JsEnv, key: &str) -> JsResult<Option<JsValue>> {
        if key == "size" {
            return Ok(Some(JsValue::Number(self.set.len()? as f64)));
        }
        let set = self.set.clone();
        let element = self.element.clone();
        let marshaller = self.marshaller.clone();
        let read_only = self.read_only;
        let function = match key {
            "has" => native(env, "has", move |env, args| {
                let value = marshaller.to_host(env, &element.to_host, arg(args, 0))?;
                Ok(JsValue::Boolean(set.contains(&value)?))
            }),
            "add" => native(env, "add", move |env, args| {
                if read_only {
                    return Err(read_only_error("set"));
                }
                set.add(marshaller.to_host(env, &element.to_host, arg(args, 0))?)?;
                Ok(JsValue::Undefined)
            }),
            "delete" => native(env, "delete", move |env, args| {
                if read_only {
                    return Err(read_only_error("set"));
                }
                let value = marshaller.to_host(env, &element.to_host, arg(args, 0))?;
                Ok(JsValue::Boolean(set.remove(&value)?))
            }),
            "clear" => native(env, "clear", move |_, _| {
                if read_only {
                    return Err(read_only_error("set"));
                }
                set.clear()?;
                Ok(JsValue::Undefined)
            }),
            "values" => native(env, "values", move |env, _| {
                let mut items = Vec::new();
                for value in set.values()? {
                    items.push(marshaller.to_guest(env, &element.to_guest, &value)?);
                }
                Ok(env.create_array(&items))
            }),
            _ => return Ok(None),
        };
        Ok(Some(function))
    }

    fn set(&self, _env: &dyn JsEnv, _key: &str, _value: JsValue) -> JsResult<bool> {
        Ok(false)
    }

    fn keys(&self, _env: &dyn JsEnv) -> JsResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Guest view of a host map. Entries are reachable both through the guest's
/// `Map` methods and as properties; method names shadow entries of the same
/// name.
pub struct HostMapView {
    map: HostMap,
    key: Bidi,
    value: Bidi,
    marshaller: Marshaller,
    read_only: bool,
}

const MAP_METHODS: [&str; 7] = ["size", "get", "set", "has", "delete", "clear", "keys"];

impl HostMapView {
    pub(crate) fn create(
        env: &dyn JsEnv,
        map: HostMap,
        key: Bidi,
        value: Bidi,
        marshaller: Marshaller,
        read_only: bool,
    ) -> JsValue {
        let read_only = read_only || map.is_read_only();
        env.create_view(Rc::new(Self {
            map,
            key,
            value,
            marshaller,
            read_only,
        }))
    }

    pub fn map(&self) -> &HostMap {
        &self.map
    }
}

impl ViewHandler for HostMapView {
    fn kind(&self) -> ViewKind {
        ViewKind::Map
    }

    fn get(&self, env: &dyn JsEnv, name: &str) -> JsResult<Option<JsValue>> {
        if name == "size" {
            return Ok(Some(JsValue::Number(self.map.len()? as f64)));
        }
        let map = self.map.clone();
        let key = self.key.clone();
        let value = self.value.clone();
        let marshaller = self.marshaller.clone();
        let read_only = self.read_only;
        let function = match name {
            "get" => native(env, "get", move |env, args| {
                let k = marshaller.to_host(env, &key.to_host, arg(args, 0))?;
                match map.get(&k)? {
                    Some(v) => marshaller.to_guest(env, &value.to_guest, &v),
                    None => Ok(JsValue::Undefined),
                }
            }),
            "set" => native(env, "set", move |env, args| {
                if read_only {
                    return Err(read_only_error("map"));
                }
                let k = marshaller.to_host(env, &key.to_host, arg(args, 0))?;
                let v = marshaller.to_host(env, &value.to_host, arg(args, 1))?;
                map.insert(k, v)?;
                Ok(JsValue::Undefined)
            }),
            "has" => native(env, "has", move |env, args| {
                let k = marshaller.to_host(env, &key.to_host, arg(args, 0))?;
                Ok(JsValue::Boolean(map.contains_key(&k)?))
            }),
            "delete" => native(env, "delete", move |env, args| {
                if read_only {
                    return Err(read_only_error("map"));
                }
                let k = marshaller.to_host(env, &key.to_host, arg(args, 0))?;
                Ok(JsValue::Boolean(map.remove(&k)?))
            }),
            "clear" => native(env, "clear", move |_, _| {
                if read_only {
                    return Err(read_only_error("map"));
                }
                map.clear()?;
                Ok(JsValue::Undefined)
            }),
            "keys" => native(env, "keys", move |env, _| {
                let mut keys = Vec::new();
                for (k, _) in map.entries()? {
                    keys.push(marshaller.to_guest(env, &key.to_guest, &k)?);
                }
                Ok(env.create_array(&keys))
            }),
            _ => {
                let Ok(k) = key_from_name(env, &self.marshaller, &self.key, name) else {
                    return Ok(None);
                };
                return match self.map.get(&k)? {
                    Some(v) => self.marshaller.to_guest(env, &self.value.to_guest, &v).map(Some),
                    None => Ok(None),
                };
            }
        };
        Ok(Some(function))
    }

    fn set(&self, env: &dyn JsEnv, name: &str, value: JsValue) -> JsResult<bool> {
        if MAP_METHODS.contains(&name) {
            return Ok(false);
        }
        if self.read_only {
            return Err(read_only_error("map"));
        }
        let k = key_from_name(env, &self.marshaller, &self.key, name)?;
        let v = self.marshaller.to_host(env, &self.value.to_host, value)?;
        self.map.insert(k, v)?;
        Ok(true)
    }

    fn keys(&self, env: &dyn JsEnv) -> JsResult<Vec<String>> {
        self.map
            .entries()?
            .iter()
            .map(|(k, _)| key_name(env, &self.marshaller, &self.key, k))
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Guest value held by a host-side collection, with the conversions its
/// elements (and keys) cross with.
#[derive(Clone, Debug)]
pub struct GuestBacking {
    reference: Arc<GuestReference>,
    marshaller: Marshaller,
    element: Bidi,
    key: Option<Bidi>,
}

impl GuestBacking {
    pub(crate) fn new(
        env: &dyn JsEnv,
        value: JsValue,
        marshaller: Marshaller,
        element: Bidi,
        key: Option<Bidi>,
    ) -> JsResult<Self> {
        let reference = GuestReference::new(env, value, marshaller.state().context.clone())?;
        Ok(Self {
            reference: Arc::new(reference),
            marshaller,
            element,
            key,
        })
    }

    /// The backing guest value.
    pub fn value(&self, env: &dyn JsEnv) -> JsResult<JsValue> {
        self.reference.value(env)
    }

    /// Run `job` against the backing value on the guest thread.
    fn with<R: Send + 'static>(
        &self,
        job: impl FnOnce(&dyn JsEnv, JsValue, &GuestBacking) -> JsResult<R> + Send + 'static,
    ) -> Result<R, HostError> {
        let backing = self.clone();
        self.reference
            .context()
            .run(move |env| {
                let value = backing.value(env)?;
                job(env, value, &backing)
            })?
            .map_err(HostError::from)
    }

    fn element_to_host(&self, env: &dyn JsEnv, value: JsValue) -> JsResult<HostValue> {
        self.marshaller.to_host(env, &self.element.to_host, value)
    }

    fn element_to_guest(&self, env: &dyn JsEnv, value: &HostValue) -> JsResult<JsValue> {
        self.marshaller.to_guest(env, &self.element.to_guest, value)
    }

    fn key_conversion(&self) -> JsResult<&Bidi> {
        self.key
            .as_ref()
            .ok_or_else(|| JsError::type_error("collection has no key conversion"))
    }

    fn elements(&self, env: &dyn JsEnv, array: JsValue) -> JsResult<Vec<HostValue>> {
        let len = env.array_length(array)?;
        (0..len)
            .map(|i| self.element_to_host(env, env.array_get(array, i)?))
            .collect()
    }
}

/// Shift the elements after `index` down by one and shorten the array.
fn remove_index(env: &dyn JsEnv, array: JsValue, index: usize) -> JsResult<()> {
    let len = env.array_length(array)?;
    for i in index + 1..len {
        env.array_set(array, i - 1, env.array_get(array, i)?)?;
    }
    env.set_property(array, "length", JsValue::Number(len.saturating_sub(1) as f64))
}

fn check_writable(read_only: bool) -> Result<(), HostError> {
    if read_only {
        Err(HostError::ReadOnly)
    } else {
        Ok(())
    }
}

/// Host list over a guest array.
#[derive(Debug)]
pub struct GuestList {
    backing: GuestBacking,
    read_only: bool,
}

impl GuestList {
    pub fn new(backing: GuestBacking, read_only: bool) -> Self {
        Self { backing, read_only }
    }

    pub fn backing(&self) -> &GuestBacking {
        &self.backing
    }
}

impl ListAccess for GuestList {
    fn len(&self) -> Result<usize, HostError> {
        self.backing.with(|env, array, _| env.array_length(array))
    }

    fn get(&self, index: usize) -> Result<HostValue, HostError> {
        self.backing.with(move |env, array, backing| {
            let len = env.array_length(array)?;
            if index >= len {
                return Err(HostError::IndexOutOfRange { index, len }.into());
            }
            backing.element_to_host(env, env.array_get(array, index)?)
        })
    }

    fn set(&self, index: usize, value: HostValue) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing.with(move |env, array, backing| {
            let len = env.array_length(array)?;
            if index > len {
                return Err(HostError::IndexOutOfRange { index, len }.into());
            }
            env.array_set(array, index, backing.element_to_guest(env, &value)?)
        })
    }

    fn push(&self, value: HostValue) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing.with(move |env, array, backing| {
            let len = env.array_length(array)?;
            env.array_set(array, len, backing.element_to_guest(env, &value)?)
        })
    }

    fn remove_at(&self, index: usize) -> Result<HostValue, HostError> {
        check_writable(self.read_only)?;
        self.backing.with(move |env, array, backing| {
            let len = env.array_length(array)?;
            if index >= len {
                return Err(HostError::IndexOutOfRange { index, len }.into());
            }
            let removed = backing.element_to_host(env, env.array_get(array, index)?)?;
            remove_index(env, array, index)?;
            Ok(removed)
        })
    }

    fn clear(&self) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing
            .with(|env, array, _| env.set_property(array, "length", JsValue::Number(0.0)))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_vec(&self) -> Result<Vec<HostValue>, HostError> {
        self.backing.with(|env, array, backing| backing.elements(env, array))
    }
}

/// Host set over a guest array of distinct values.
#[derive(Debug)]
pub struct GuestSet {
    backing: GuestBacking,
    read_only: bool,
}

impl GuestSet {
    pub fn new(backing: GuestBacking, read_only: bool) -> Self {
        Self { backing, read_only }
    }

    pub fn backing(&self) -> &GuestBacking {
        &self.backing
    }
}

impl SetAccess for GuestSet {
    fn len(&self) -> Result<usize, HostError> {
        self.backing.with(|env, array, _| env.array_length(array))
    }

    fn contains(&self, value: &HostValue) -> Result<bool, HostError> {
        let value = value.clone();
        self.backing
            .with(move |env, array, backing| Ok(backing.elements(env, array)?.contains(&value)))
    }

    fn add(&self, value: HostValue) -> Result<bool, HostError> {
        check_writable(self.read_only)?;
        self.backing.with(move |env, array, backing| {
            if backing.elements(env, array)?.contains(&value) {
                return Ok(false);
            }
            let len = env.array_length(array)?;
            env.array_set(array, len, backing.element_to_guest(env, &value)?)?;
            Ok(true)
        })
    }

    fn remove(&self, value: &HostValue) -> Result<bool, HostError> {
        check_writable(self.read_only)?;
        let value = value.clone();
        self.backing.with(move |env, array, backing| {
            match backing.elements(env, array)?.iter().position(|v| *v == value) {
                Some(index) => {
                    remove_index(env, array, index)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn values(&self) -> Result<Vec<HostValue>, HostError> {
        self.backing.with(|env, array, backing| backing.elements(env, array))
    }

    fn clear(&self) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing
            .with(|env, array, _| env.set_property(array, "length", JsValue::Number(0.0)))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host map over the own properties of a guest object.
#[derive(Debug)]
pub struct GuestMap {
    backing: GuestBacking,
    read_only: bool,
}

impl GuestMap {
    pub fn new(backing: GuestBacking, read_only: bool) -> Self {
        Self { backing, read_only }
    }

    pub fn backing(&self) -> &GuestBacking {
        &self.backing
    }
}

impl MapAccess for GuestMap {
    fn len(&self) -> Result<usize, HostError> {
        self.backing.with(|env, object, _| Ok(env.own_keys(object)?.len()))
    }

    fn get(&self, key: &HostValue) -> Result<Option<HostValue>, HostError> {
        let key = key.clone();
        self.backing.with(move |env, object, backing| {
            let name = key_name(env, &backing.marshaller, backing.key_conversion()?, &key)?;
            if !env.own_keys(object)?.contains(&name) {
                return Ok(None);
            }
            backing.element_to_host(env, env.get_property(object, &name)?).map(Some)
        })
    }

    fn insert(&self, key: HostValue, value: HostValue) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing.with(move |env, object, backing| {
            let name = key_name(env, &backing.marshaller, backing.key_conversion()?, &key)?;
            env.set_property(object, &name, backing.element_to_guest(env, &value)?)
        })
    }

    fn remove(&self, key: &HostValue) -> Result<bool, HostError> {
        check_writable(self.read_only)?;
        let key = key.clone();
        self.backing.with(move |env, object, backing| {
            let name = key_name(env, &backing.marshaller, backing.key_conversion()?, &key)?;
            env.delete_property(object, &name)
        })
    }

    fn entries(&self) -> Result<Vec<(HostValue, HostValue)>, HostError> {
        self.backing.with(|env, object, backing| {
            let key = backing.key_conversion()?;
            let mut entries = Vec::new();
            for name in env.own_keys(object)? {
                let k = key_from_name(env, &backing.marshaller, key, &name)?;
                let v = backing.element_to_host(env, env.get_property(object, &name)?)?;
                entries.push((k, v));
            }
            Ok(entries)
        })
    }

    fn clear(&self) -> Result<(), HostError> {
        check_writable(self.read_only)?;
        self.backing.with(|env, object, _| {
            for name in env.own_keys(object)? {
                env.delete_property(object, &name)?;
            }
            Ok(())
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
