//! Reference & lifetime proxy layer
//!
//! Pairs each host object that crosses into the guest with at most one live
//! guest wrapper. An entry is reference counted: the live wrapper counts as
//! one interest and every `ProxyGuard` counts as one more. While the entry
//! exists it keeps the host object alive; when the count reaches zero the
//! entry is torn down and the object becomes unreferenced again.
//!
//! ```text
//! Unreferenced --to_guest--> Proxied --finalize/dispose/guard drop--> Released --> Unreferenced
//! ```
//!
//! Wrapper finalization is always delivered through the guest context queue.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::context::ContextHandle;
use crate::error::{JsError, JsResult};
use crate::guest::{JsEnv, JsValue, RefId};
use crate::logging::{log_proxy_attached, log_proxy_released};
use crate::value::{HostObject, ObjectId};

/// Observable lifecycle state of a host object's proxy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unreferenced,
    Proxied { guest_live: bool, interests: u32 },
}

struct ProxyEntry {
    host: HostObject,
    /// Weak reference to the current guest wrapper.
    guest: Option<RefId>,
    interests: u32,
}

pub struct ProxyTable {
    entries: DashMap<ObjectId, ProxyEntry>,
    context: ContextHandle,
}

impl ProxyTable {
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            context,
        })
    }

    /// Guest wrapper for `object`: the existing live wrapper if there is one,
    /// otherwise a new one produced by `create` and registered.
    pub fn to_guest(
        self: &Arc<Self>,
        env: &dyn JsEnv,
        object: &HostObject,
        create: impl FnOnce(&dyn JsEnv) -> JsResult<JsValue>,
    ) -> JsResult<JsValue> {
        if let Some(wrapper) = self.live_wrapper(env, object.id()) {
            return Ok(wrapper);
        }
        let wrapper = create(env)?;
        self.attach(env, wrapper, object)?;
        Ok(wrapper)
    }

    /// Register `wrapper` as the guest wrapper of `object`. Used directly
    /// when the guest allocates the wrapper itself (`new` on a class).
    pub fn attach(self: &Arc<Self>, env: &dyn JsEnv, wrapper: JsValue, object: &HostObject) -> JsResult<()> {
        let id = object.id();
        let reference = env.create_reference(wrapper, false)?;
        let table = Arc::downgrade(self);
        env.wrap(wrapper, id.as_u64(), finalizer(table, self.context.clone(), id, reference))?;

        match self.entries.entry(id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                match entry.guest {
                    Some(previous) if env.reference_value(previous).is_some() => {
                        env.remove_wrap(wrapper)?;
                        env.delete_reference(reference);
                        return Err(JsError::type_error(format!(
                            "host object {id} already has a live guest wrapper"
                        )));
                    }
                    // A finalized wrapper whose release is still queued hands
                    // its interest to the new wrapper.
                    Some(previous) => env.delete_reference(previous),
                    None => entry.interests += 1,
                }
                entry.guest = Some(reference);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ProxyEntry {
                    host: object.clone(),
                    guest: Some(reference),
                    interests: 1,
                });
            }
        }
        log_proxy_attached(id, object.class());
        Ok(())
    }

    /// Host object behind a guest value. `Ok(None)` when the value is not a
    /// wrapper at all; `Err(Disposed)` when it is a wrapper that no longer
    /// stands for its host object.
    pub fn from_guest(&self, env: &dyn JsEnv, value: JsValue) -> JsResult<Option<HostObject>> {
        let Some(tag) = env.unwrap_tag(value) else {
            return Ok(None);
        };
        let entry = self
            .entries
            .get(&ObjectId::from_u64(tag))
            .ok_or(JsError::Disposed)?;
        let current = entry.guest.and_then(|r| env.reference_value(r));
        if current == Some(value) {
            Ok(Some(entry.host.clone()))
        } else {
            Err(JsError::Disposed)
        }
    }

    /// Host-side interest in `object`, keeping its entry (and the object)
    /// alive until the guard drops.
    pub fn retain(self: &Arc<Self>, object: &HostObject) -> ProxyGuard {
        self.entries
            .entry(object.id())
            .or_insert_with(|| ProxyEntry {
                host: object.clone(),
                guest: None,
                interests: 0,
            })
            .interests += 1;
        ProxyGuard {
            table: self.clone(),
            id: object.id(),
        }
    }

    /// Detach the guest wrapper explicitly. Later use of the wrapper from
    /// the guest fails with a disposed error.
    pub fn dispose(&self, env: &dyn JsEnv, wrapper: JsValue) -> JsResult<bool> {
        let Some(tag) = env.unwrap_tag(wrapper) else {
            return Ok(false);
        };
        let id = ObjectId::from_u64(tag);
        let reference = match self.entries.get(&id) {
            Some(entry) => entry.guest,
            None => return Ok(false),
        };
        match reference {
            Some(reference) if env.reference_value(reference) == Some(wrapper) => {
                self.release_guest(env, id, reference, "disposed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn state(&self, env: &dyn JsEnv, id: ObjectId) -> ProxyState {
        match self.entries.get(&id) {
            Some(entry) => ProxyState::Proxied {
                guest_live: entry.guest.and_then(|r| env.reference_value(r)).is_some(),
                interests: entry.interests,
            },
            None => ProxyState::Unreferenced,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_wrapper(&self, env: &dyn JsEnv, id: ObjectId) -> Option<JsValue> {
        let reference = self.entries.get(&id)?.guest?;
        env.reference_value(reference)
    }

    /// Drop the guest wrapper's interest if `reference` is still the current
    /// wrapper of `id`.
    fn release_guest(&self, env: &dyn JsEnv, id: ObjectId, reference: RefId, reason: &str) {
        env.delete_reference(reference);
        if let Entry::Occupied(mut occupied) = self.entries.entry(id) {
            let entry = occupied.get_mut();
            if entry.guest != Some(reference) {
                return;
            }
            entry.guest = None;
            entry.interests = entry.interests.saturating_sub(1);
            if entry.interests == 0 {
                occupied.remove();
                log_proxy_released(id, reason);
            }
        }
    }

    fn release_host(&self, id: ObjectId) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(id) {
            let entry = occupied.get_mut();
            entry.interests = entry.interests.saturating_sub(1);
            if entry.interests == 0 {
                occupied.remove();
                log_proxy_released(id, "host guard dropped");
            }
        }
    }
}

fn finalizer(
    table: Weak<ProxyTable>,
    context: ContextHandle,
    id: ObjectId,
    reference: RefId,
) -> crate::guest::Finalizer {
    Box::new(move |_env: &dyn JsEnv| {
        let posted = context.post(move |env| {
            if let Some(table) = table.upgrade() {
                table.release_guest(env, id, reference, "guest finalized");
            }
        });
        if posted.is_err() {
            tracing::warn!(object = %id, "guest context closed before wrapper release");
        }
    })
}

/// Host-held interest in a proxied object.
pub struct ProxyGuard {
    table: Arc<ProxyTable>,
    id: ObjectId,
}

impl ProxyGuard {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl Drop for ProxyGuard {
    fn drop(&mut self) {
        self.table.release_host(self.id);
    }
}
