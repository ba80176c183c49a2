//! Host implementation registry
//!
//! Generated adapters name the host member they invoke by binding name
//! (`app.Calc::Add(core.i32,core.i32)`, `app.Calc::get_Total`,
//! `app.Calc::new`). The embedding registers one callable per binding before
//! linking; resolution happens once, at link time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsbridge_runtime::error::JsResult;
use jsbridge_runtime::{HostError, HostValue, JsEnv, JsValue};

use crate::errors::find_similar_names;
use crate::link::LinkError;

/// Host member taking marshalled values: `(receiver, args)`. The receiver is
/// `None` for static members and constructors.
pub type MethodFn = dyn Fn(Option<&HostValue>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync;

/// Host member speaking the guest's native calling convention:
/// `(env, this, args)`.
pub type RawFn = dyn Fn(&dyn JsEnv, JsValue, &[JsValue]) -> JsResult<JsValue> + Send + Sync;

#[derive(Clone)]
pub enum HostCallable {
    Method(Arc<MethodFn>),
    Raw(Arc<RawFn>),
}

impl fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(_) => f.write_str("HostCallable::Method(..)"),
            Self::Raw(_) => f.write_str("HostCallable::Raw(..)"),
        }
    }
}

#[derive(Clone, Default)]
pub struct HostBindings {
    entries: HashMap<String, HostCallable>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(
        &mut self,
        binding: impl Into<String>,
        f: impl Fn(Option<&HostValue>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) {
        self.entries.insert(binding.into(), HostCallable::Method(Arc::new(f)));
    }

    pub fn register_raw(
        &mut self,
        binding: impl Into<String>,
        f: impl Fn(&dyn JsEnv, JsValue, &[JsValue]) -> JsResult<JsValue> + Send + Sync + 'static,
    ) {
        self.entries.insert(binding.into(), HostCallable::Raw(Arc::new(f)));
    }

    /// Builder-style `register_method`
    pub fn with_method(
        mut self,
        binding: impl Into<String>,
        f: impl Fn(Option<&HostValue>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        self.register_method(binding, f);
        self
    }

    /// Builder-style `register_raw`
    pub fn with_raw(
        mut self,
        binding: impl Into<String>,
        f: impl Fn(&dyn JsEnv, JsValue, &[JsValue]) -> JsResult<JsValue> + Send + Sync + 'static,
    ) -> Self {
        self.register_raw(binding, f);
        self
    }

    pub fn get(&self, binding: &str) -> Option<&HostCallable> {
        self.entries.get(binding)
    }

    pub fn contains(&self, binding: &str) -> bool {
        self.entries.contains_key(binding)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted binding names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up the callable for `binding`, suggesting close registered names
    /// when it is missing.
    pub fn resolve(&self, binding: &str, symbol: &str) -> Result<HostCallable, LinkError> {
        match self.entries.get(binding) {
            Some(callable) => Ok(callable.clone()),
            None => Err(LinkError::MissingBinding {
                binding: binding.to_string(),
                symbol: symbol.to_string(),
                suggestions: find_similar_names(binding, &self.names(), 3),
            }),
        }
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBindings").field("bindings", &self.names()).finish()
    }
}
