//! Linker
//!
//! Instantiates a generated module inside a guest environment. Every class
//! registration becomes a constructor function with a prototype, every
//! export entry becomes a function or accessor on the right object, and
//! every adapter runs its conversion IR through the [`Marshaller`].
//!
//! Linking happens in two passes so that nested classes and members that
//! mention other classes can refer to constructors and prototypes created
//! later in declaration order.

mod bindings;
mod invoke;
mod marshal;
mod views;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use jsbridge_runtime::error::JsResult;
use jsbridge_runtime::{
    ContextHandle, HostObject, HostValue, JsEnv, JsError, JsValue, NativeFn, ProxyTable,
};
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::conversion::Conversion;
use crate::export::{ExportRole, ExportTable, ExportTarget, ModuleInitializer};
use crate::model::{DeclKind, TypePath};
use crate::session::{ClassExport, GeneratedModule};

pub use bindings::{HostBindings, HostCallable, MethodFn, RawFn};
use invoke::{call_direct, BoundAdapter, OverloadSet};
pub use marshal::Marshaller;
pub use views::{GuestBacking, GuestList, GuestMap, GuestSet, HostListView, HostMapView, HostSetView};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("no host binding '{binding}' for '{symbol}'{hint}", hint = did_you_mean(.suggestions))]
    MissingBinding {
        binding: String,
        symbol: String,
        suggestions: Vec<String>,
    },

    #[error("generated module has no adapter '{0}'")]
    MissingAdapter(String),

    #[error("'{0}' is referenced but has no class registration")]
    UnknownClass(TypePath),

    #[error("module '{module}' was generated with {count} error(s)")]
    Invalid { module: String, count: usize },

    #[error(transparent)]
    Guest(#[from] JsError),
}

fn did_you_mean(suggestions: &[String]) -> String {
    match suggestions {
        [] => String::new(),
        [one] => format!(" (did you mean '{one}'?)"),
        many => format!(" (did you mean one of: {}?)", many.join(", ")),
    }
}

/// Runtime services shared by every module linked into one guest context.
#[derive(Clone)]
pub struct RuntimeState {
    pub context: ContextHandle,
    pub proxies: Arc<ProxyTable>,
}

impl RuntimeState {
    pub fn new(context: ContextHandle) -> Self {
        let proxies = ProxyTable::new(context.clone());
        Self { context, proxies }
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}

/// A module instantiated in a guest environment.
#[derive(Debug)]
pub struct LinkedModule {
    name: String,
    exports: JsValue,
    constructors: HashMap<TypePath, JsValue>,
    marshaller: Marshaller,
}

impl LinkedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module object.
    pub fn exports(&self) -> JsValue {
        self.exports
    }

    /// Constructor function of a registered class.
    pub fn constructor(&self, path: &TypePath) -> Option<JsValue> {
        self.constructors.get(path).copied()
    }

    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    /// The guest wrapper for a host object, created on first use.
    pub fn wrap(&self, env: &dyn JsEnv, object: &HostObject) -> JsResult<JsValue> {
        let class = Conversion::Class(TypePath::parse(object.class()));
        self.marshaller.to_guest(env, &class, &HostValue::Object(object.clone()))
    }

    /// Detach `wrapper` from its host object. Later use of the wrapper from
    /// the guest fails with a disposed-object error.
    pub fn dispose(&self, env: &dyn JsEnv, wrapper: JsValue) -> JsResult<bool> {
        self.marshaller.state().proxies.dispose(env, wrapper)
    }
}

pub struct Linker<'a> {
    generated: &'a GeneratedModule,
    bindings: &'a HostBindings,
    marshaller: Marshaller,
    constructors: HashMap<TypePath, JsValue>,
}

impl<'a> Linker<'a> {
    /// Instantiate `generated` in `env`, resolving every binding against
    /// `bindings`. A module generated with diagnostics is rejected.
    pub fn link(
        generated: &'a GeneratedModule,
        bindings: &'a HostBindings,
        env: &dyn JsEnv,
        state: &RuntimeState,
    ) -> Result<LinkedModule, LinkError> {
        if generated.has_errors() {
            return Err(LinkError::Invalid {
                module: generated.name.clone(),
                count: generated.error_count(),
            });
        }
        let span = info_span!("link", module = %generated.name);
        let _enter = span.enter();

        let enums = generated
            .classes
            .iter()
            .filter(|c| c.kind == DeclKind::Enum)
            .map(|c| (c.path.clone(), c.enum_values.clone()))
            .collect();
        let mut linker = Self {
            generated,
            bindings,
            marshaller: Marshaller::new(
                generated.codecs.clone(),
                enums,
                generated.hierarchy.clone(),
                state.clone(),
            ),
            constructors: HashMap::new(),
        };

        for class in &generated.classes {
            linker.declare_class(env, class)?;
        }
        for class in &generated.classes {
            let ctor = linker.class_constructor(&class.path)?;
            let prototype = env.get_property(ctor, "prototype")?;
            linker.install(env, &class.table, ctor, prototype)?;
        }

        let exports = env.create_object();
        linker.install(env, &generated.module, exports, exports)?;
        if let Some(initializer) = &generated.module.initializer {
            linker.run_initializer(env, initializer, exports)?;
        }

        info!(
            target: "link",
            classes = linker.constructors.len(),
            exports = generated.module.len(),
            "module linked"
        );
        Ok(LinkedModule {
            name: generated.name.clone(),
            exports,
            constructors: linker.constructors,
            marshaller: linker.marshaller,
        })
    }

    /// Pass one: constructor function and prototype for a class.
    fn declare_class(&mut self, env: &dyn JsEnv, class: &ClassExport) -> Result<(), LinkError> {
        let body = self.constructor_body(class)?;
        let ctor = env.create_function(&class.external_name, body);
        let prototype = env.create_object();
        env.set_property(ctor, "prototype", prototype)?;
        env.set_property(prototype, "constructor", ctor)?;

        if class.kind == DeclKind::Enum {
            for value in &class.enum_values {
                env.set_property(ctor, &value.name, JsValue::Number(value.value as f64))?;
                let name = env.create_string(&value.name);
                env.set_property(ctor, &value.value.to_string(), name)?;
            }
        }

        self.marshaller.register_prototype(&class.path, prototype);
        self.constructors.insert(class.path.clone(), ctor);
        debug!(target: "link", class = %class.path, kind = ?class.kind, "class declared");
        Ok(())
    }

    fn constructor_body(&self, class: &ClassExport) -> Result<NativeFn, LinkError> {
        let marshaller = self.marshaller.clone();
        let body: NativeFn = match &class.table.constructor {
            None => {
                let name = class.external_name.clone();
                Rc::new(move |_: &dyn JsEnv, _: JsValue, _: &[JsValue]| -> JsResult<JsValue> {
                    Err(JsError::type_error(format!("{name} has no public constructor")))
                })
            }
            Some(ExportTarget::Adapter(name)) => {
                let adapter = self.bound(name)?;
                Rc::new(move |env: &dyn JsEnv, this: JsValue, args: &[JsValue]| {
                    // Value types come back as a fresh guest value; classes
                    // attach the host instance to the object under construction.
                    if adapter.code().result.is_some() {
                        return adapter.call(env, &marshaller, this, args);
                    }
                    let created = adapter.call_host(env, &marshaller, this, args)?;
                    attach_instance(env, &marshaller, this, created, &adapter.code().binding)
                })
            }
            Some(ExportTarget::Direct(binding)) => {
                let callable = self.bindings.resolve(binding, &format!("{}.new", class.path))?;
                let binding = binding.clone();
                Rc::new(move |env: &dyn JsEnv, this: JsValue, args: &[JsValue]| match &callable {
                    HostCallable::Raw(f) => f(env, this, args),
                    HostCallable::Method(f) => {
                        let raw: Vec<HostValue> = args.iter().map(|v| HostValue::Raw(*v)).collect();
                        match f(None, &raw).map_err(JsError::from)? {
                            HostValue::Raw(value) => Ok(value),
                            HostValue::Null => Ok(this),
                            created => attach_instance(env, &marshaller, this, created, &binding),
                        }
                    }
                })
            }
            Some(other) => {
                return Err(LinkError::Guest(JsError::type_error(format!(
                    "{} has an unusable constructor target {other:?}",
                    class.path
                ))))
            }
        };
        Ok(body)
    }

    /// Pass two: put the entries of `table` on `statics` (static members and
    /// nested classes) and `instance` (instance members).
    fn install(
        &self,
        env: &dyn JsEnv,
        table: &ExportTable,
        statics: JsValue,
        instance: JsValue,
    ) -> Result<(), LinkError> {
        let mut accessors: Vec<(String, bool, Option<JsValue>, Option<JsValue>)> = Vec::new();

        for entry in &table.entries {
            let target = if entry.is_static { statics } else { instance };
            match entry.role {
                ExportRole::Method => {
                    let function = self.member_function(env, &entry.name, &entry.symbol, &entry.target, !entry.is_static)?;
                    env.set_property(target, &entry.name, function)?;
                }
                ExportRole::Getter | ExportRole::Setter => {
                    let function = self.member_function(env, &entry.name, &entry.symbol, &entry.target, !entry.is_static)?;
                    let index = match accessors
                        .iter()
                        .position(|(name, is_static, _, _)| *name == entry.name && *is_static == entry.is_static)
                    {
                        Some(index) => index,
                        None => {
                            accessors.push((entry.name.clone(), entry.is_static, None, None));
                            accessors.len() - 1
                        }
                    };
                    let slot = &mut accessors[index];
                    if entry.role == ExportRole::Getter {
                        slot.2 = Some(function);
                    } else {
                        slot.3 = Some(function);
                    }
                }
                ExportRole::NestedClass => {
                    let ExportTarget::Class(path) = &entry.target else {
                        return Err(LinkError::UnknownClass(TypePath::parse(&entry.symbol)));
                    };
                    env.set_property(statics, &entry.name, self.class_constructor(path)?)?;
                }
                // Carried by the table's constructor slot.
                ExportRole::Constructor => {}
            }
        }

        for (name, is_static, getter, setter) in accessors {
            let target = if is_static { statics } else { instance };
            env.define_accessor(target, &name, getter, setter)?;
        }
        Ok(())
    }

    fn member_function(
        &self,
        env: &dyn JsEnv,
        name: &str,
        symbol: &str,
        target: &ExportTarget,
        instance: bool,
    ) -> Result<JsValue, LinkError> {
        let marshaller = self.marshaller.clone();
        let body: NativeFn = match target {
            ExportTarget::Adapter(adapter) => {
                let bound = self.bound(adapter)?;
                Rc::new(move |env: &dyn JsEnv, this: JsValue, args: &[JsValue]| {
                    bound.call(env, &marshaller, this, args)
                })
            }
            ExportTarget::Overloads(adapters) => {
                let bound = adapters
                    .iter()
                    .map(|a| self.bound(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let set = OverloadSet::new(symbol, bound);
                Rc::new(move |env: &dyn JsEnv, this: JsValue, args: &[JsValue]| {
                    set.call(env, &marshaller, this, args)
                })
            }
            ExportTarget::Direct(binding) => {
                let callable = self.bindings.resolve(binding, symbol)?;
                let binding = binding.clone();
                Rc::new(move |env: &dyn JsEnv, this: JsValue, args: &[JsValue]| {
                    call_direct(env, &marshaller, &callable, &binding, instance, this, args)
                })
            }
            ExportTarget::Class(path) => return self.class_constructor(path),
        };
        Ok(env.create_function(name, body))
    }

    fn bound(&self, adapter: &str) -> Result<BoundAdapter, LinkError> {
        let code = self
            .generated
            .adapters
            .get(adapter)
            .ok_or_else(|| LinkError::MissingAdapter(adapter.to_string()))?;
        let callable = self.bindings.resolve(&code.binding, &code.symbol)?;
        Ok(BoundAdapter::new(code.clone(), callable))
    }

    fn class_constructor(&self, path: &TypePath) -> Result<JsValue, LinkError> {
        self.constructors
            .get(path)
            .copied()
            .ok_or_else(|| LinkError::UnknownClass(path.clone()))
    }

    /// Call the module initializer with the finished module object.
    fn run_initializer(&self, env: &dyn JsEnv, initializer: &ModuleInitializer, exports: JsValue) -> Result<(), LinkError> {
        let callable = self.bindings.resolve(&initializer.binding, &initializer.symbol)?;
        debug!(target: "link", initializer = %initializer.symbol, "running module initializer");
        match callable {
            HostCallable::Raw(f) => {
                f(env, JsValue::Undefined, &[exports])?;
            }
            HostCallable::Method(f) => {
                f(None, &[HostValue::Raw(exports)]).map_err(JsError::from)?;
            }
        }
        Ok(())
    }
}

/// Bind a freshly created host instance to the guest object under
/// construction.
fn attach_instance(
    env: &dyn JsEnv,
    marshaller: &Marshaller,
    this: JsValue,
    created: HostValue,
    binding: &str,
) -> JsResult<JsValue> {
    let HostValue::Object(object) = created else {
        return Err(JsError::type_error(format!(
            "constructor '{binding}' returned a host {} instead of an object",
            created.type_name()
        )));
    };
    if !this.is_object() {
        return Err(JsError::type_error(format!(
            "class constructor '{}' cannot be invoked without 'new'",
            object.class()
        )));
    }
    marshaller.state().proxies.attach(env, this, &object)?;
    Ok(this)
}

#[cfg(test)]
mod tests;
