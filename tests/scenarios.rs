mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{binding, generate_default, Guest};
use jsbridge::model::{ParameterDescriptor, Primitive};
use jsbridge::runtime::guest::PromiseState;
use jsbridge::runtime::{
    HostError, HostList, HostMemory, HostObject, HostStruct, HostTask, HostValue, JsError, JsValue, ListAccess,
};
use jsbridge::{HostBindings, MemberDescriptor, ModuleDescriptor, TypeDecl, TypeDescriptor, TypePath};

fn i32_ty() -> TypeDescriptor {
    TypeDescriptor::primitive(Primitive::I32)
}

#[test]
fn test_static_add_needs_no_codecs() {
    let module = ModuleDescriptor::new("calc").with_function(
        "calc.Math",
        MemberDescriptor::method(
            "Add",
            vec![ParameterDescriptor::new("a", i32_ty()), ParameterDescriptor::new("b", i32_ty())],
            i32_ty(),
        ),
    );
    let generated = generate_default(&module);
    assert!(generated.codecs.is_empty());

    let guest = Guest::new();
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_calc_Math_Add"), |_, args| match args {
        [HostValue::I32(a), HostValue::I32(b)] => Ok(HostValue::I32(a + b)),
        _ => Err(HostError::Argument("expected two i32".into())),
    });
    let linked = guest.link(&generated, &bindings);

    let result = guest
        .env()
        .call_method(linked.exports(), "add", &[JsValue::Number(3.0), JsValue::Number(4.0)])
        .unwrap();
    assert_eq!(result, JsValue::Number(7.0));
}

struct Person {
    nickname: Option<String>,
}

#[test]
fn test_nullable_property_reports_absent_both_ways() {
    let module = ModuleDescriptor::new("app").with_type(
        TypeDecl::class("app.Person")
            .with_member(MemberDescriptor::constructor(vec![]))
            .with_member(MemberDescriptor::property("Nickname", TypeDescriptor::string().nullable())),
    );
    let generated = generate_default(&module);
    let guest = Guest::new();

    let person = HostObject::new("app.Person", Person { nickname: Some("Ace".into()) });
    let created = person.clone();
    let bindings = HostBindings::new()
        .with_method(binding(&generated, "__ctor_app_Person_new"), move |_, _| Ok(HostValue::Object(created.clone())))
        .with_method(binding(&generated, "__get_app_Person_Nickname"), |this, _| {
            let this = this.and_then(HostValue::as_object).ok_or(HostError::Argument("this".into()))?;
            this.with(|p: &Person| p.nickname.clone().map(HostValue::from).unwrap_or(HostValue::Null))
        })
        .with_method(binding(&generated, "__set_app_Person_Nickname"), |this, args| {
            let this = this.and_then(HostValue::as_object).ok_or(HostError::Argument("this".into()))?;
            let value = args.first().and_then(HostValue::as_str);
            this.with_mut(|p: &mut Person| p.nickname = value)?;
            Ok(HostValue::Null)
        });
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let ctor = env.get_property(linked.exports(), "Person").unwrap();
    let wrapper = env.construct(ctor, &[]).unwrap();

    person.with_mut(|p: &mut Person| p.nickname = None).unwrap();
    assert!(env.has_property(wrapper, "nickname").unwrap());
    assert_eq!(env.get_property(wrapper, "nickname").unwrap(), JsValue::Undefined);

    env.set_property(wrapper, "nickname", env.create_string("Bo")).unwrap();
    assert_eq!(person.with(|p: &Person| p.nickname.clone()).unwrap().as_deref(), Some("Bo"));

    env.set_property(wrapper, "nickname", JsValue::Undefined).unwrap();
    assert_eq!(person.with(|p: &Person| p.nickname.clone()).unwrap(), None);

    env.set_property(wrapper, "nickname", env.create_string("Cy")).unwrap();
    env.set_property(wrapper, "nickname", JsValue::Null).unwrap();
    assert_eq!(person.with(|p: &Person| p.nickname.clone()).unwrap(), None);
    assert_eq!(env.get_property(wrapper, "nickname").unwrap(), JsValue::Undefined);
}

#[test]
fn test_structs_cross_by_value() {
    let module = ModuleDescriptor::new("app")
        .with_type(
            TypeDecl::structure("app.Label")
                .with_member(MemberDescriptor::field("Value", TypeDescriptor::string()).not_exported()),
        )
        .with_type(
            TypeDecl::class("app.Labels")
                .with_member(MemberDescriptor::method("Current", vec![], TypeDescriptor::structure("app.Label")).static_member())
                .with_member(
                    MemberDescriptor::method(
                        "Store",
                        vec![ParameterDescriptor::new("label", TypeDescriptor::structure("app.Label"))],
                        TypeDescriptor::void(),
                    )
                    .static_member(),
                ),
        );
    let generated = generate_default(&module);
    assert!(!generated.codecs.is_empty());

    let original = HostStruct::new("app.Label").with_field("Value", "first");
    let stored: Arc<Mutex<Option<HostStruct>>> = Arc::new(Mutex::new(None));
    let sink = stored.clone();
    let current = original.clone();
    let bindings = HostBindings::new()
        .with_method(binding(&generated, "__method_app_Labels_Current"), move |_, _| {
            Ok(HostValue::Struct(current.clone()))
        })
        .with_method(binding(&generated, "__method_app_Labels_Store"), move |_, args| match args {
            [HostValue::Struct(label)] => {
                *sink.lock().unwrap() = Some(label.clone());
                Ok(HostValue::Null)
            }
            _ => Err(HostError::Argument("label".into())),
        });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let labels = linked.constructor(&TypePath::parse("app.Labels")).unwrap();

    let copy = env.call_method(labels, "current", &[]).unwrap();
    let text = env.get_property(copy, "value").unwrap();
    assert_eq!(env.read_string(text).unwrap(), "first");

    env.set_property(copy, "value", env.create_string("second")).unwrap();
    env.call_method(labels, "store", &[copy]).unwrap();

    let received = stored.lock().unwrap().clone().unwrap();
    assert_eq!(received.get("Value"), Some(&HostValue::from("second")));
    assert_eq!(original.get("Value"), Some(&HostValue::from("first")));

    let again = env.call_method(labels, "current", &[]).unwrap();
    assert_ne!(again, copy);
    let text = env.get_property(again, "value").unwrap();
    assert_eq!(env.read_string(text).unwrap(), "first");
}

#[test]
fn test_typed_buffer_is_shared_with_host() {
    let module = ModuleDescriptor::new("app").with_function(
        "app.Buffers",
        MemberDescriptor::method(
            "Bump",
            vec![ParameterDescriptor::new(
                "buffer",
                TypeDescriptor::generic("core.Memory", vec![i32_ty()]),
            )],
            TypeDescriptor::void(),
        ),
    );
    let generated = generate_default(&module);
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_app_Buffers_Bump"), |_, args| match args {
        [HostValue::Memory(memory)] => {
            memory.write::<i32>(1, 5)?;
            Ok(HostValue::Null)
        }
        _ => Err(HostError::Argument("buffer".into())),
    });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let buffer = env.create_typed_array(HostMemory::from_slice(&[0i32, 1, 2]));

    env.call_method(linked.exports(), "bump", &[buffer]).unwrap();
    assert_eq!(env.array_get(buffer, 1).unwrap(), JsValue::Number(5.0));
    assert_eq!(env.array_get(buffer, 0).unwrap(), JsValue::Number(0.0));

    let floats = env.create_typed_array(HostMemory::from_slice(&[0.5f64]));
    let err = env.call_method(linked.exports(), "bump", &[floats]).unwrap_err();
    assert!(matches!(err, JsError::Type(_)), "{err}");
}

#[test]
fn test_arrays_are_copied_at_the_boundary() {
    let module = ModuleDescriptor::new("app").with_function(
        "app.Numbers",
        MemberDescriptor::method(
            "Doubled",
            vec![ParameterDescriptor::new("values", TypeDescriptor::array(i32_ty()))],
            TypeDescriptor::array(i32_ty()),
        ),
    );
    let generated = generate_default(&module);
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_app_Numbers_Doubled"), |_, args| match args {
        [HostValue::Array(items)] => Ok(HostValue::Array(
            items
                .iter()
                .map(|v| match v {
                    HostValue::I32(n) => HostValue::I32(n * 2),
                    other => other.clone(),
                })
                .collect(),
        )),
        _ => Err(HostError::Argument("values".into())),
    });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let input = env.create_array(&[JsValue::Number(1.0), JsValue::Number(2.0)]);

    let output = env.call_method(linked.exports(), "doubled", &[input]).unwrap();
    assert_ne!(output, input);
    assert_eq!(env.array_get(output, 1).unwrap(), JsValue::Number(4.0));
    assert_eq!(env.array_get(input, 1).unwrap(), JsValue::Number(2.0));

    env.array_set(output, 0, JsValue::Number(99.0)).unwrap();
    assert_eq!(env.array_get(input, 0).unwrap(), JsValue::Number(1.0));
}

#[test]
fn test_collections_forward_to_host() {
    let list_ty = TypeDescriptor::generic("core.collections.List", vec![TypeDescriptor::string()]);
    let module = ModuleDescriptor::new("app").with_function(
        "app.Registry",
        MemberDescriptor::method("Names", vec![], list_ty).static_member(),
    );
    let generated = generate_default(&module);
    let names = HostList::from_vec(vec![HostValue::from("ada")]);
    let shared = names.clone();
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_app_Registry_Names"), move |_, _| {
        Ok(HostValue::List(shared.clone()))
    });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let view = env.call_method(linked.exports(), "names", &[]).unwrap();

    env.call_method(view, "push", &[env.create_string("grace")]).unwrap();
    assert_eq!(names.len().unwrap(), 2);
    assert_eq!(names.get(1).unwrap(), HostValue::from("grace"));

    names.push(HostValue::from("linus")).unwrap();
    assert_eq!(env.get_property(view, "length").unwrap(), JsValue::Number(3.0));
}

struct Node;

#[test]
fn test_one_wrapper_per_host_instance() {
    let module = ModuleDescriptor::new("app").with_type(TypeDecl::class("app.Node")).with_function(
        "app.Tree",
        MemberDescriptor::method(
            "Same",
            vec![ParameterDescriptor::new("node", TypeDescriptor::class("app.Node"))],
            TypeDescriptor::class("app.Node"),
        ),
    );
    let generated = generate_default(&module);
    let root = HostObject::new("app.Node", Node);
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_app_Tree_Same"), |_, args| {
        Ok(args.first().cloned().unwrap_or(HostValue::Null))
    });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let wrapper = linked.wrap(env, &root).unwrap();

    let back = env.call_method(linked.exports(), "same", &[wrapper]).unwrap();
    assert_eq!(back, wrapper);
    assert_eq!(linked.wrap(env, &root).unwrap(), wrapper);
    assert_eq!(guest.state.proxies.len(), 1);

    assert!(linked.dispose(env, wrapper).unwrap());
    assert_eq!(guest.state.proxies.len(), 0);
    let fresh = linked.wrap(env, &root).unwrap();
    assert_ne!(fresh, wrapper);
}

#[test]
fn test_overloads_pick_by_argument_shape() {
    let module = ModuleDescriptor::new("app")
        .with_function(
            "app.Format",
            MemberDescriptor::method("Show", vec![ParameterDescriptor::new("n", i32_ty())], TypeDescriptor::string()),
        )
        .with_function(
            "app.Format",
            MemberDescriptor::method(
                "Show",
                vec![ParameterDescriptor::new("s", TypeDescriptor::string())],
                TypeDescriptor::string(),
            ),
        );
    let generated = generate_default(&module);
    let mut bindings = HostBindings::new();
    for code in generated.adapters.values() {
        bindings.register_method(code.binding.clone(), |_, args| match args {
            [HostValue::I32(n)] => Ok(HostValue::from(format!("number {n}"))),
            [HostValue::String(s)] => Ok(HostValue::from(format!("text {}", s.to_string_lossy()))),
            _ => Err(HostError::Argument("show".into())),
        });
    }

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let exports = linked.exports();

    for _ in 0..3 {
        let shown = env.call_method(exports, "show", &[JsValue::Number(2.0)]).unwrap();
        assert_eq!(env.read_string(shown).unwrap(), "number 2");
        let shown = env.call_method(exports, "show", &[env.create_string("x")]).unwrap();
        assert_eq!(env.read_string(shown).unwrap(), "text x");
    }
    assert!(env.call_method(exports, "show", &[JsValue::Boolean(true)]).is_err());
}

#[test]
fn test_async_result_settles_promise() {
    let module = ModuleDescriptor::new("app").with_function(
        "app.Jobs",
        MemberDescriptor::method(
            "Answer",
            vec![ParameterDescriptor::new("delay_ms", i32_ty())],
            TypeDescriptor::generic("core.Task", vec![i32_ty()]),
        ),
    );
    let generated = generate_default(&module);
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handle = runtime.handle().clone();
    let bindings = HostBindings::new().with_method(binding(&generated, "__method_app_Jobs_Answer"), move |_, args| {
        let delay = match args {
            [HostValue::I32(ms)] => u64::try_from(*ms).unwrap_or(0),
            _ => return Err(HostError::Argument("delay_ms".into())),
        };
        let (task, completer) = HostTask::pending();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            completer.complete(Ok(HostValue::I32(42)));
        });
        Ok(HostValue::Task(task))
    });

    let guest = Guest::new();
    let linked = guest.link(&generated, &bindings);
    let env = guest.env();
    let promise = env.call_method(linked.exports(), "answer", &[JsValue::Number(10.0)]).unwrap();
    assert_eq!(env.promise_state(promise).unwrap(), PromiseState::Pending);

    assert!(guest.context.run_until(
        || env.promise_state(promise).unwrap() != PromiseState::Pending,
        Duration::from_secs(5)
    ));
    assert_eq!(env.promise_state(promise).unwrap(), PromiseState::Fulfilled(JsValue::Number(42.0)));
}
