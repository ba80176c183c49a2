use super::*;

use std::sync::Mutex;

use jsbridge_runtime::{GuestContext, HostError, MemoryEnv};

use crate::frontend::GeneratorConfig;
use crate::model::{DefaultValue, MemberDescriptor, ModuleDescriptor, ParameterDescriptor, Primitive, TypeDecl, TypeDescriptor};
use crate::session::generate;

fn i32_ty() -> TypeDescriptor {
    TypeDescriptor::primitive(Primitive::I32)
}

struct CounterState {
    value: i32,
}

fn counter_module() -> ModuleDescriptor {
    ModuleDescriptor::new("app")
        .with_type(
            TypeDecl::class("app.Counter")
                .with_member(MemberDescriptor::constructor(vec![ParameterDescriptor::new("start", i32_ty())]))
                .with_member(MemberDescriptor::method(
                    "Increment",
                    vec![ParameterDescriptor::new("by", i32_ty()).with_default(DefaultValue::Number(1.0))],
                    i32_ty(),
                ))
                .with_member(MemberDescriptor::property("Value", i32_ty()))
                .with_member(MemberDescriptor::method("Shared", vec![], TypeDescriptor::class("app.Counter")).static_member()),
        )
        .with_type(TypeDecl::enumeration("app.Color", &[("Red", 1), ("Green", 2)]))
        .with_function(
            "app.Util",
            MemberDescriptor::method(
                "Add",
                vec![ParameterDescriptor::new("a", i32_ty()), ParameterDescriptor::new("b", i32_ty())],
                i32_ty(),
            )
            .static_member(),
        )
}

fn receiver(value: Option<&HostValue>) -> Result<HostObject, HostError> {
    value
        .and_then(HostValue::as_object)
        .cloned()
        .ok_or_else(|| HostError::Argument("missing receiver".into()))
}

fn binding_of(generated: &GeneratedModule, adapter: &str) -> String {
    generated.adapter(adapter).unwrap().binding.clone()
}

fn counter_bindings(generated: &GeneratedModule, shared: HostObject) -> HostBindings {
    HostBindings::new()
        .with_method(binding_of(generated, "__ctor_app_Counter_new"), |_, args| match args {
            [HostValue::I32(start)] => Ok(HostValue::Object(HostObject::new(
                "app.Counter",
                CounterState { value: *start },
            ))),
            _ => Err(HostError::Argument("start".into())),
        })
        .with_method(binding_of(generated, "__method_app_Counter_Increment"), |this, args| {
            let counter = receiver(this)?;
            match args {
                [HostValue::I32(by)] if *by > 0 => counter
                    .with_mut(|s: &mut CounterState| {
                        s.value += by;
                        HostValue::I32(s.value)
                    }),
                _ => Err(HostError::exception("ArgumentException", "by must be positive")),
            }
        })
        .with_method(binding_of(generated, "__get_app_Counter_Value"), |this, _| {
            receiver(this)?.with(|s: &CounterState| HostValue::I32(s.value))
        })
        .with_method(binding_of(generated, "__set_app_Counter_Value"), |this, args| {
            let value = match args {
                [HostValue::I32(v)] => *v,
                _ => return Err(HostError::Argument("value".into())),
            };
            receiver(this)?.with_mut(|s: &mut CounterState| s.value = value)?;
            Ok(HostValue::Null)
        })
        .with_method(binding_of(generated, "__method_app_Counter_Shared"), move |_, _| {
            Ok(HostValue::Object(shared.clone()))
        })
        .with_method(binding_of(generated, "__method_app_Util_Add"), |_, args| match args {
            [HostValue::I32(a), HostValue::I32(b)] => Ok(HostValue::I32(a + b)),
            _ => Err(HostError::Argument("a, b".into())),
        })
}

struct Fixture {
    context: GuestContext,
    linked: LinkedModule,
    shared: HostObject,
}

fn link_counter() -> Fixture {
    let generated = generate(&counter_module(), &GeneratorConfig::default()).unwrap();
    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let shared = HostObject::new("app.Counter", CounterState { value: 100 });
    let bindings = counter_bindings(&generated, shared.clone());
    let linked = Linker::link(&generated, &bindings, context.env(), &state).unwrap();
    Fixture { context, linked, shared }
}

#[test]
fn test_constructs_and_calls_instance_members() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = env.get_property(f.linked.exports(), "Counter").unwrap();

    let counter = env.construct(ctor, &[JsValue::Number(5.0)]).unwrap();
    assert_eq!(env.call_method(counter, "increment", &[]).unwrap(), JsValue::Number(6.0));
    assert_eq!(
        env.call_method(counter, "increment", &[JsValue::Number(3.0)]).unwrap(),
        JsValue::Number(9.0)
    );
    assert_eq!(env.get_property(counter, "value").unwrap(), JsValue::Number(9.0));

    env.set_property(counter, "value", JsValue::Number(2.0)).unwrap();
    assert_eq!(env.get_property(counter, "value").unwrap(), JsValue::Number(2.0));
}

#[test]
fn test_module_functions_and_enums() {
    let f = link_counter();
    let env = f.context.env();
    let exports = f.linked.exports();

    assert_eq!(
        env.call_method(exports, "add", &[JsValue::Number(3.0), JsValue::Number(4.0)]).unwrap(),
        JsValue::Number(7.0)
    );

    let color = env.get_property(exports, "Color").unwrap();
    assert_eq!(env.get_property(color, "Red").unwrap(), JsValue::Number(1.0));
    let name = env.get_property(color, "2").unwrap();
    assert_eq!(env.read_string(name).unwrap(), "Green");
    assert!(env.construct(color, &[]).is_err());
}

#[test]
fn test_returned_objects_keep_identity_and_prototype() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = f.linked.constructor(&TypePath::parse("app.Counter")).unwrap();

    let first = env.call_method(ctor, "shared", &[]).unwrap();
    let second = env.call_method(ctor, "shared", &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(env.call_method(first, "increment", &[]).unwrap(), JsValue::Number(101.0));
    assert_eq!(f.linked.wrap(env, &f.shared).unwrap(), first);
}

#[test]
fn test_host_exception_reaches_guest() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = env.get_property(f.linked.exports(), "Counter").unwrap();
    let counter = env.construct(ctor, &[JsValue::Number(0.0)]).unwrap();

    let err = env.call_method(counter, "increment", &[JsValue::Number(-1.0)]).unwrap_err();
    assert_eq!(err, JsError::Host("ArgumentException: by must be positive".into()));
}

#[test]
fn test_conversion_error_names_parameter() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = env.get_property(f.linked.exports(), "Counter").unwrap();
    let counter = env.construct(ctor, &[JsValue::Number(0.0)]).unwrap();

    let text = env.create_string("three");
    let err = env.call_method(counter, "increment", &[text]).unwrap_err();
    assert!(matches!(&err, JsError::Type(msg) if msg.contains("parameter 'by'")), "{err}");
}

#[test]
fn test_constructor_requires_new() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = env.get_property(f.linked.exports(), "Counter").unwrap();
    assert!(env.call_function(ctor, JsValue::Undefined, &[JsValue::Number(1.0)]).is_err());
}

#[test]
fn test_disposed_wrapper_rejects_calls() {
    let f = link_counter();
    let env = f.context.env();
    let ctor = env.get_property(f.linked.exports(), "Counter").unwrap();
    let counter = env.construct(ctor, &[JsValue::Number(1.0)]).unwrap();

    assert!(f.linked.dispose(env, counter).unwrap());
    assert_eq!(env.call_method(counter, "increment", &[]).unwrap_err(), JsError::Disposed);
}

#[test]
fn test_missing_binding_fails_link() {
    let generated = generate(&counter_module(), &GeneratorConfig::default()).unwrap();
    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let bindings = HostBindings::new();

    let err = Linker::link(&generated, &bindings, context.env(), &state).unwrap_err();
    assert!(matches!(err, LinkError::MissingBinding { .. }), "{err}");
}

#[test]
fn test_initializer_receives_module_object() {
    let module = ModuleDescriptor::new("boot").with_initializer(
        crate::model::InitializerTarget::Function {
            declaring_type: TypePath::parse("boot.Setup"),
            name: "Init".into(),
        },
        Default::default(),
    );
    let generated = generate(&module, &GeneratorConfig::default()).unwrap();
    let init_binding = generated.module.initializer.as_ref().unwrap().binding.clone();
    assert_eq!(init_binding, "boot.Setup::Init");

    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let bindings = HostBindings::new().with_raw(init_binding, move |env, _, args| {
        env.set_property(args[0], "ready", JsValue::Boolean(true))?;
        *sink.lock().unwrap() = Some(args[0]);
        Ok(JsValue::Undefined)
    });

    let linked = Linker::link(&generated, &bindings, context.env(), &state).unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(linked.exports()));
    assert_eq!(
        context.env().get_property(linked.exports(), "ready").unwrap(),
        JsValue::Boolean(true)
    );
}

#[test]
fn test_invalid_module_is_rejected() {
    let module = ModuleDescriptor::new("bad").with_type(
        TypeDecl::class("bad.Thing").with_member(MemberDescriptor::method(
            "Take",
            vec![ParameterDescriptor::new("x", TypeDescriptor::class("bad.Hidden"))],
            TypeDescriptor::void(),
        )),
    );
    let generated = crate::session::Session::new(&module, &GeneratorConfig::default())
        .run()
        .unwrap();
    assert!(generated.has_errors());

    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let err = Linker::link(&generated, &HostBindings::new(), context.env(), &state).unwrap_err();
    assert!(matches!(err, LinkError::Invalid { count, .. } if count >= 1));
}

fn shapes_module() -> ModuleDescriptor {
    let shape = || TypeDescriptor::interface("app.IShape");
    ModuleDescriptor::new("app")
        .with_type(TypeDecl::interface("app.IShape"))
        .with_type(TypeDecl::class("app.Circle").with_base("app.IShape"))
        .with_type(TypeDecl::class("app.Node"))
        .with_function(
            "app.Draw",
            MemberDescriptor::method("Render", vec![ParameterDescriptor::new("s", shape())], TypeDescriptor::string()),
        )
        .with_function(
            "app.Draw",
            MemberDescriptor::method(
                "Render",
                vec![ParameterDescriptor::new("s", TypeDescriptor::string())],
                TypeDescriptor::string(),
            ),
        )
        .with_function(
            "app.Draw",
            MemberDescriptor::method("Take", vec![ParameterDescriptor::new("s", shape())], TypeDescriptor::string()),
        )
}

/// Every adapter answers with the class of the object it received, or
/// echoes a string argument.
fn echo_class_bindings(generated: &GeneratedModule) -> HostBindings {
    generated.adapters.values().fold(HostBindings::new(), |bindings, code| {
        bindings.with_method(code.binding.clone(), |_, args| match args {
            [HostValue::Object(object)] => Ok(HostValue::from(object.class())),
            [other] => Ok(other.clone()),
            _ => Err(HostError::Argument("expected one argument".into())),
        })
    })
}

#[test]
fn test_class_parameters_accept_only_assignable_instances() {
    let generated = generate(&shapes_module(), &GeneratorConfig::default()).unwrap();
    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let bindings = echo_class_bindings(&generated);
    let linked = Linker::link(&generated, &bindings, context.env(), &state).unwrap();
    let env = context.env();

    let circle = linked.wrap(env, &HostObject::new("app.Circle", ())).unwrap();
    let node = linked.wrap(env, &HostObject::new("app.Node", ())).unwrap();
    let read = |value: JsValue| env.read_string(value).unwrap();

    let taken = env.call_method(linked.exports(), "take", &[circle]).unwrap();
    assert_eq!(read(taken), "app.Circle");
    let err = env.call_method(linked.exports(), "take", &[node]).unwrap_err();
    assert!(matches!(&err, JsError::Type(msg) if msg.contains("app.Node")), "{err}");

    let rendered = env.call_method(linked.exports(), "render", &[circle]).unwrap();
    assert_eq!(read(rendered), "app.Circle");
    let text = env.create_string("plain");
    let rendered = env.call_method(linked.exports(), "render", &[text]).unwrap();
    assert_eq!(read(rendered), "plain");
    assert!(matches!(
        env.call_method(linked.exports(), "render", &[node]),
        Err(JsError::Type(_))
    ));
}
