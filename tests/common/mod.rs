#![allow(dead_code)]

use std::rc::Rc;

use jsbridge::runtime::{GuestContext, JsEnv, MemoryEnv};
use jsbridge::{generate, GeneratedModule, GeneratorConfig, HostBindings, LinkedModule, Linker, ModuleDescriptor, RuntimeState};

pub struct Guest {
    pub context: GuestContext,
    pub state: RuntimeState,
}

impl Guest {
    pub fn new() -> Self {
        jsbridge::runtime::logging::init_runtime_logging();
        let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
        let context = GuestContext::new(env);
        let state = RuntimeState::new(context.handle());
        Self { context, state }
    }

    pub fn env(&self) -> &dyn JsEnv {
        self.context.env()
    }

    pub fn link(&self, generated: &GeneratedModule, bindings: &HostBindings) -> LinkedModule {
        Linker::link(generated, bindings, self.context.env(), &self.state).unwrap()
    }
}

pub fn generate_default(module: &ModuleDescriptor) -> GeneratedModule {
    generate(module, &GeneratorConfig::default()).unwrap()
}

/// Host binding the named adapter calls.
pub fn binding(generated: &GeneratedModule, adapter: &str) -> String {
    generated
        .adapter(adapter)
        .unwrap_or_else(|| panic!("no adapter {adapter}"))
        .binding
        .clone()
}
