//! Host collection interfaces
//!
//! Collections cross the boundary by reference: the other side receives a
//! live view that forwards every read and write. The access traits are what a
//! view forwards to. `VecList`, `VecSet` and `VecMap` are the owned host
//! implementations; guest-backed implementations live with the linker.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::HostError;
use crate::value::HostValue;

pub trait ListAccess: Send + Sync {
    fn len(&self) -> Result<usize, HostError>;
    fn get(&self, index: usize) -> Result<HostValue, HostError>;
    fn set(&self, index: usize, value: HostValue) -> Result<(), HostError>;
    fn push(&self, value: HostValue) -> Result<(), HostError>;
    fn remove_at(&self, index: usize) -> Result<HostValue, HostError>;
    fn clear(&self) -> Result<(), HostError>;
    fn is_read_only(&self) -> bool;
    fn as_any(&self) -> &dyn Any;

    fn to_vec(&self) -> Result<Vec<HostValue>, HostError> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }
}

pub trait SetAccess: Send + Sync {
    fn len(&self) -> Result<usize, HostError>;
    fn contains(&self, value: &HostValue) -> Result<bool, HostError>;
    /// Returns false when the value was already present.
    fn add(&self, value: HostValue) -> Result<bool, HostError>;
    fn remove(&self, value: &HostValue) -> Result<bool, HostError>;
    fn values(&self) -> Result<Vec<HostValue>, HostError>;
    fn clear(&self) -> Result<(), HostError>;
    fn is_read_only(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

pub trait MapAccess: Send + Sync {
    fn len(&self) -> Result<usize, HostError>;
    fn get(&self, key: &HostValue) -> Result<Option<HostValue>, HostError>;
    fn insert(&self, key: HostValue, value: HostValue) -> Result<(), HostError>;
    fn remove(&self, key: &HostValue) -> Result<bool, HostError>;
    fn entries(&self) -> Result<Vec<(HostValue, HostValue)>, HostError>;
    fn clear(&self) -> Result<(), HostError>;
    fn is_read_only(&self) -> bool;
    fn as_any(&self) -> &dyn Any;

    fn contains_key(&self, key: &HostValue) -> Result<bool, HostError> {
        Ok(self.get(key)?.is_some())
    }
}

macro_rules! shared_handle {
    ($name:ident, $access:ident, $owned:ident) => {
        /// Shared handle to a collection; equality is identity.
        #[derive(Clone)]
        pub struct $name(Arc<dyn $access>);

        impl $name {
            pub fn new(access: impl $access + 'static) -> Self {
                Self(Arc::new(access))
            }

            pub fn access(&self) -> &dyn $access {
                &*self.0
            }

            pub fn ptr_eq(&self, other: &$name) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }

            /// Downcast to the concrete implementation behind the handle.
            pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
                self.0.as_any().downcast_ref::<T>()
            }

            pub fn is_owned(&self) -> bool {
                self.downcast_ref::<$owned>().is_some()
            }
        }

        impl std::ops::Deref for $name {
            type Target = dyn $access;

            fn deref(&self) -> &Self::Target {
                &*self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.ptr_eq(other)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(read_only={})", stringify!($name), self.0.is_read_only())
            }
        }
    };
}

shared_handle!(HostList, ListAccess, VecList);
shared_handle!(HostSet, SetAccess, VecSet);
shared_handle!(HostMap, MapAccess, VecMap);

impl HostList {
    pub fn from_vec(items: Vec<HostValue>) -> Self {
        Self::new(VecList::new(items, false))
    }

    pub fn read_only(items: Vec<HostValue>) -> Self {
        Self::new(VecList::new(items, true))
    }
}

impl HostSet {
    pub fn from_values(values: Vec<HostValue>) -> Self {
        Self::new(VecSet::new(values, false))
    }

    pub fn read_only(values: Vec<HostValue>) -> Self {
        Self::new(VecSet::new(values, true))
    }
}

impl HostMap {
    pub fn from_entries(entries: Vec<(HostValue, HostValue)>) -> Self {
        Self::new(VecMap::new(entries, false))
    }

    pub fn read_only(entries: Vec<(HostValue, HostValue)>) -> Self {
        Self::new(VecMap::new(entries, true))
    }
}

fn ensure_writable(read_only: bool) -> Result<(), HostError> {
    if read_only {
        Err(HostError::ReadOnly)
    } else {
        Ok(())
    }
}

pub struct VecList {
    items: RwLock<Vec<HostValue>>,
    read_only: bool,
}

impl VecList {
    pub fn new(items: Vec<HostValue>, read_only: bool) -> Self {
        Self {
            items: RwLock::new(items),
            read_only,
        }
    }
}

impl ListAccess for VecList {
    fn len(&self) -> Result<usize, HostError> {
        Ok(self.items.read().len())
    }

    fn get(&self, index: usize) -> Result<HostValue, HostError> {
        let items = self.items.read();
        items.get(index).cloned().ok_or(HostError::IndexOutOfRange {
            index,
            len: items.len(),
        })
    }

    fn set(&self, index: usize, value: HostValue) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        let mut items = self.items.write();
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            // Writing one past the end appends, like a guest array.
            None if index == len => {
                items.push(value);
                Ok(())
            }
            None => Err(HostError::IndexOutOfRange { index, len }),
        }
    }

    fn push(&self, value: HostValue) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        self.items.write().push(value);
        Ok(())
    }

    fn remove_at(&self, index: usize) -> Result<HostValue, HostError> {
        ensure_writable(self.read_only)?;
        let mut items = self.items.write();
        if index < items.len() {
            Ok(items.remove(index))
        } else {
            Err(HostError::IndexOutOfRange {
                index,
                len: items.len(),
            })
        }
    }

    fn clear(&self) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        self.items.write().clear();
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_vec(&self) -> Result<Vec<HostValue>, HostError> {
        Ok(self.items.read().clone())
    }
}

/// Insertion-ordered set with equality membership.
pub struct VecSet {
    values: RwLock<Vec<HostValue>>,
    read_only: bool,
}

impl VecSet {
    pub fn new(values: Vec<HostValue>, read_only: bool) -> Self {
        let mut unique: Vec<HostValue> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self {
            values: RwLock::new(unique),
            read_only,
        }
    }
}

impl SetAccess for VecSet {
    fn len(&self) -> Result<usize, HostError> {
        Ok(self.values.read().len())
    }

    fn contains(&self, value: &HostValue) -> Result<bool, HostError> {
        Ok(self.values.read().contains(value))
    }

    fn add(&self, value: HostValue) -> Result<bool, HostError> {
        ensure_writable(self.read_only)?;
        let mut values = self.values.write();
        if values.contains(&value) {
            return Ok(false);
        }
        values.push(value);
        Ok(true)
    }

    fn remove(&self, value: &HostValue) -> Result<bool, HostError> {
        ensure_writable(self.read_only)?;
        let mut values = self.values.write();
        match values.iter().position(|v| v == value) {
            Some(index) => {
                values.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn values(&self) -> Result<Vec<HostValue>, HostError> {
        Ok(self.values.read().clone())
    }

    fn clear(&self) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        self.values.write().clear();
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Insertion-ordered map with equality keys.
pub struct VecMap {
    entries: RwLock<Vec<(HostValue, HostValue)>>,
    read_only: bool,
}

impl VecMap {
    pub fn new(entries: Vec<(HostValue, HostValue)>, read_only: bool) -> Self {
        let map = Self {
            entries: RwLock::new(Vec::with_capacity(entries.len())),
            read_only: false,
        };
        for (key, value) in entries {
            map.put(key, value);
        }
        Self { read_only, ..map }
    }

    fn put(&self, key: HostValue, value: HostValue) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }
}

impl MapAccess for VecMap {
    fn len(&self) -> Result<usize, HostError> {
        Ok(self.entries.read().len())
    }

    fn get(&self, key: &HostValue) -> Result<Option<HostValue>, HostError> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn insert(&self, key: HostValue, value: HostValue) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        self.put(key, value);
        Ok(())
    }

    fn remove(&self, key: &HostValue) -> Result<bool, HostError> {
        ensure_writable(self.read_only)?;
        let mut entries = self.entries.write();
        match entries.iter().position(|(k, _)| k == key) {
            Some(index) => {
                entries.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn entries(&self) -> Result<Vec<(HostValue, HostValue)>, HostError> {
        Ok(self.entries.read().clone())
    }

    fn clear(&self) -> Result<(), HostError> {
        ensure_writable(self.read_only)?;
        self.entries.write().clear();
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_shared_mutation() {
        let list = HostList::from_vec(vec![HostValue::I32(1)]);
        let alias = list.clone();
        alias.push(HostValue::I32(2)).unwrap();
        assert_eq!(list.len().unwrap(), 2);
        assert_eq!(list.get(1).unwrap(), HostValue::I32(2));
        assert!(list.is_owned());
        assert_eq!(list, alias);
    }

    #[test]
    fn test_list_set_appends_at_end() {
        let list = HostList::from_vec(vec![]);
        list.set(0, HostValue::Bool(true)).unwrap();
        assert_eq!(list.len().unwrap(), 1);
        assert!(matches!(
            list.set(5, HostValue::Null),
            Err(HostError::IndexOutOfRange { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_read_only_collections() {
        let list = HostList::read_only(vec![HostValue::I32(1)]);
        assert_eq!(list.push(HostValue::I32(2)), Err(HostError::ReadOnly));
        let set = HostSet::read_only(vec![HostValue::I32(1)]);
        assert_eq!(set.add(HostValue::I32(2)), Err(HostError::ReadOnly));
        let map = HostMap::read_only(vec![]);
        assert_eq!(map.clear(), Err(HostError::ReadOnly));
    }

    #[test]
    fn test_set_membership() {
        let set = HostSet::from_values(vec!["a".into(), "a".into(), "b".into()]);
        assert_eq!(set.len().unwrap(), 2);
        assert!(!set.add("b".into()).unwrap());
        assert!(set.add("c".into()).unwrap());
        assert!(set.remove(&"a".into()).unwrap());
        assert!(!set.contains(&"a".into()).unwrap());
    }

    #[test]
    fn test_map_overwrites_keys() {
        let map = HostMap::from_entries(vec![("k".into(), 1.into()), ("k".into(), 2.into())]);
        assert_eq!(map.len().unwrap(), 1);
        assert_eq!(map.get(&"k".into()).unwrap(), Some(HostValue::I32(2)));
        map.insert("j".into(), 3.into()).unwrap();
        assert!(map.contains_key(&"j".into()).unwrap());
        assert!(map.remove(&"k".into()).unwrap());
        assert_eq!(map.entries().unwrap(), vec![("j".into(), HostValue::I32(3))]);
    }
}
