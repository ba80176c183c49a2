use super::*;
use crate::classify::Classifier;
use crate::conversion::{CodecTable, Conversion};
use crate::export::CaseTransform;
use crate::model::{Catalog, ModuleDescriptor, Primitive};

fn module() -> ModuleDescriptor {
    ModuleDescriptor::new("app")
        .with_type(
            TypeDecl::class("app.Calc")
                .with_member(MemberDescriptor::constructor(vec![ParameterDescriptor::new(
                    "seed",
                    TypeDescriptor::primitive(Primitive::I32),
                )]))
                .with_member(MemberDescriptor::method(
                    "Add",
                    vec![
                        ParameterDescriptor::new("a", TypeDescriptor::primitive(Primitive::I32)),
                        ParameterDescriptor::new("b", TypeDescriptor::primitive(Primitive::I32))
                            .with_default(DefaultValue::Number(1.0)),
                    ],
                    TypeDescriptor::primitive(Primitive::I32),
                ))
                .with_member(MemberDescriptor::property("Total", TypeDescriptor::primitive(Primitive::F64))),
        )
        .with_type(
            TypeDecl::structure("app.Point")
                .with_member(MemberDescriptor::field("X", TypeDescriptor::primitive(Primitive::F64)))
                .with_member(MemberDescriptor::constructor(Vec::new())),
        )
        .with_type(
            TypeDecl::class("app.Twice")
                .with_member(MemberDescriptor::constructor(Vec::new()).at(SourceLocation::new("Twice.cs", 3, 5)))
                .with_member(
                    MemberDescriptor::constructor(vec![ParameterDescriptor::new("s", TypeDescriptor::string())])
                        .at(SourceLocation::new("Twice.cs", 4, 5)),
                ),
        )
        .with_type(TypeDecl::class("app.Native").with_member(MemberDescriptor::constructor(vec![
            ParameterDescriptor::new("args", TypeDescriptor::callback_args()),
        ])))
}

fn with_emitter<R>(f: impl FnOnce(&mut AdapterEmitter<'_>, &Catalog) -> R) -> R {
    let module = module();
    let catalog = Catalog::new(&module);
    let classifier = Classifier::new();
    let mut codecs = CodecTable::new();
    let builder = ConversionBuilder::new(&catalog, &classifier, &mut codecs, CaseTransform::CamelCase);
    let mut emitter = AdapterEmitter::new(builder);
    f(&mut emitter, &catalog)
}

fn member<'c>(catalog: &'c Catalog, ty: &str, name: &str) -> &'c MemberDescriptor {
    catalog
        .get(&TypePath::parse(ty))
        .and_then(|d| d.members.iter().find(|m| m.name == name))
        .unwrap()
}

#[test]
fn test_instance_method_unpacks_receiver_and_params() {
    with_emitter(|emitter, catalog| {
        let add = member(catalog, "app.Calc", "Add");
        let desc = AdapterDescriptor::for_member(&TypePath::parse("app.Calc"), DeclKind::Class, add, AdapterKind::Method);
        let mut diags = Diagnostics::new();
        let code = emitter.emit(&desc, &mut diags).unwrap();

        assert_eq!(code.name, "__method_app_Calc_Add");
        assert_eq!(code.binding, "app.Calc::Add(core.i32,core.i32)");
        assert_eq!(code.receiver.as_ref().unwrap().op, Conversion::Class(TypePath::parse("app.Calc")));
        assert_eq!(code.params.len(), 2);
        assert!(!code.params[0].spec.optional);
        assert!(code.params[1].spec.optional);
        assert_eq!(code.params[1].spec.shape, ParamShape::Number(jsbridge_runtime::NumericKind::I32));
        assert!(code.source.contains("let b = args.length > 1 ? to_host_i32(args[1]) : 1;"));
        assert!(code.source.contains("return to_guest_i32(result);"));
    });
}

#[test]
fn test_same_descriptor_reuses_adapter() {
    with_emitter(|emitter, catalog| {
        let add = member(catalog, "app.Calc", "Add");
        let desc = AdapterDescriptor::for_member(&TypePath::parse("app.Calc"), DeclKind::Class, add, AdapterKind::Method);
        let mut diags = Diagnostics::new();
        let first = emitter.emit(&desc, &mut diags).unwrap();
        let second = emitter.emit(&desc, &mut diags).unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(emitter.emitted(), 1);
    });
}

#[test]
fn test_property_gets_getter_and_setter() {
    with_emitter(|emitter, catalog| {
        let total = member(catalog, "app.Calc", "Total");
        assert_eq!(adapter_kinds(total), vec![AdapterKind::Getter, AdapterKind::Setter]);

        let path = TypePath::parse("app.Calc");
        let mut diags = Diagnostics::new();
        let getter = emitter
            .emit(&AdapterDescriptor::for_member(&path, DeclKind::Class, total, AdapterKind::Getter), &mut diags)
            .unwrap();
        let setter = emitter
            .emit(&AdapterDescriptor::for_member(&path, DeclKind::Class, total, AdapterKind::Setter), &mut diags)
            .unwrap();
        assert_eq!(getter.binding, "app.Calc::get_Total");
        assert!(getter.params.is_empty());
        assert!(getter.result.is_some());
        assert_eq!(setter.binding, "app.Calc::set_Total");
        assert_eq!(setter.params.len(), 1);
        assert!(setter.result.is_none());
    });
}

#[test]
fn test_read_only_property_has_no_setter() {
    let prop = MemberDescriptor::property("Id", TypeDescriptor::string()).with_setter(None);
    assert_eq!(adapter_kinds(&prop), vec![AdapterKind::Getter]);
    let field = MemberDescriptor::field("Max", TypeDescriptor::primitive(Primitive::I32)).read_only();
    assert_eq!(adapter_kinds(&field), vec![AdapterKind::Getter]);
}

#[test]
fn test_raw_shapes_are_direct() {
    with_emitter(|emitter, _| {
        let path = TypePath::parse("app.Calc");
        let raw = MemberDescriptor::method(
            "Invoke",
            vec![ParameterDescriptor::new("args", TypeDescriptor::callback_args())],
            TypeDescriptor::js_value(),
        );
        let desc = AdapterDescriptor::for_member(&path, DeclKind::Class, &raw, AdapterKind::Method);
        assert!(emitter.is_direct(&desc));

        let nothing = MemberDescriptor::method("Reset", Vec::new(), TypeDescriptor::void());
        let desc = AdapterDescriptor::for_member(&path, DeclKind::Class, &nothing, AdapterKind::Method);
        assert!(emitter.is_direct(&desc));

        let typed = MemberDescriptor::method("Count", Vec::new(), TypeDescriptor::primitive(Primitive::I32));
        let desc = AdapterDescriptor::for_member(&path, DeclKind::Class, &typed, AdapterKind::Method);
        assert!(!emitter.is_direct(&desc));

        let raw_prop = MemberDescriptor::property("Payload", TypeDescriptor::js_value());
        let getter = AdapterDescriptor::for_member(&path, DeclKind::Class, &raw_prop, AdapterKind::Getter);
        let setter = AdapterDescriptor::for_member(&path, DeclKind::Class, &raw_prop, AdapterKind::Setter);
        assert!(emitter.is_direct(&getter));
        assert!(emitter.is_direct(&setter));
    });
}

#[test]
fn test_ref_and_out_parameters_are_reported() {
    with_emitter(|emitter, _| {
        let method = MemberDescriptor::method(
            "TryParse",
            vec![
                ParameterDescriptor::new("text", TypeDescriptor::string()).with_passing(Passing::Ref),
                ParameterDescriptor::new("value", TypeDescriptor::primitive(Primitive::I32)).with_passing(Passing::Out),
                ParameterDescriptor::new("strict", TypeDescriptor::primitive(Primitive::Bool)).with_passing(Passing::In),
            ],
            TypeDescriptor::primitive(Primitive::Bool),
        )
        .static_member();
        let desc = AdapterDescriptor::for_member(&TypePath::parse("app.Calc"), DeclKind::Class, &method, AdapterKind::Method);
        let mut diags = Diagnostics::new();
        assert!(emitter.emit(&desc, &mut diags).is_none());
        let reported: Vec<&Diagnostic> = diags.with_code(DiagnosticCode::UnsupportedCallingConvention).collect();
        assert_eq!(reported.len(), 2);
        assert!(reported[0].message.contains("'text' is passed by ref"));
        assert!(reported[1].message.contains("'value' is passed by out"));
    });
}

#[test]
fn test_unexported_parameter_type_reported_with_hint() {
    with_emitter(|emitter, _| {
        let method = MemberDescriptor::method(
            "Merge",
            vec![ParameterDescriptor::new("other", TypeDescriptor::class("app.Calk"))],
            TypeDescriptor::void(),
        )
        .static_member();
        let desc = AdapterDescriptor::for_member(&TypePath::parse("app.Calc"), DeclKind::Class, &method, AdapterKind::Method);
        let mut diags = Diagnostics::new();
        assert!(emitter.emit(&desc, &mut diags).is_none());
        let diag = &diags.items()[0];
        assert_eq!(diag.code, DiagnosticCode::TypeNotExported);
        assert!(diag.message.contains("parameter 'other'"));
        assert_eq!(diag.suggestions, vec!["Did you mean 'app.Calc'?".to_string()]);
    });
}

#[test]
fn test_class_constructor_attaches_instead_of_returning() {
    with_emitter(|emitter, catalog| {
        let decl = catalog.get(&TypePath::parse("app.Calc")).unwrap().clone();
        let mut diags = Diagnostics::new();
        let ConstructorPlan::Adapter(code) = emitter.plan_constructor(&decl, &mut diags) else {
            panic!("expected adapted constructor");
        };
        assert_eq!(code.binding, "app.Calc::new");
        assert!(code.receiver.is_none());
        assert!(code.result.is_none());
        assert!(code.source.contains("proxy_attach(this, instance, \"app.Calc\");"));
    });
}

#[test]
fn test_struct_constructor_returns_a_copy() {
    with_emitter(|emitter, catalog| {
        let decl = catalog.get(&TypePath::parse("app.Point")).unwrap().clone();
        let mut diags = Diagnostics::new();
        let ConstructorPlan::Adapter(code) = emitter.plan_constructor(&decl, &mut diags) else {
            panic!("expected adapted constructor");
        };
        assert!(matches!(code.result.as_ref().unwrap().op, Conversion::Struct { .. }));
    });
}

#[test]
fn test_two_adapted_constructors_is_an_error() {
    with_emitter(|emitter, catalog| {
        let decl = catalog.get(&TypePath::parse("app.Twice")).unwrap().clone();
        let mut diags = Diagnostics::new();
        assert_eq!(emitter.plan_constructor(&decl, &mut diags), ConstructorPlan::None);
        let diag = diags.with_code(DiagnosticCode::OverloadedConstructor).next().unwrap();
        let note = diag.elaboration.as_deref().unwrap();
        assert!(note.contains("Twice.cs:3:5"));
        assert!(note.contains("Twice.cs:4:5"));
    });
}

#[test]
fn test_raw_constructor_is_bound_directly() {
    with_emitter(|emitter, catalog| {
        let decl = catalog.get(&TypePath::parse("app.Native")).unwrap().clone();
        let mut diags = Diagnostics::new();
        assert_eq!(
            emitter.plan_constructor(&decl, &mut diags),
            ConstructorPlan::Direct("app.Native::new".to_string())
        );
        assert!(!diags.has_errors());
    });
}

#[test]
fn test_overloads_get_distinct_names() {
    with_emitter(|emitter, _| {
        let path = TypePath::parse("app.Calc");
        let by_int = MemberDescriptor::method(
            "Scale",
            vec![ParameterDescriptor::new("n", TypeDescriptor::primitive(Primitive::I32))],
            TypeDescriptor::void(),
        )
        .static_member();
        let by_text = MemberDescriptor::method(
            "Scale",
            vec![ParameterDescriptor::new("n", TypeDescriptor::string())],
            TypeDescriptor::void(),
        )
        .static_member();
        let mut diags = Diagnostics::new();
        let a = emitter
            .emit(&AdapterDescriptor::for_member(&path, DeclKind::Class, &by_int, AdapterKind::Method), &mut diags)
            .unwrap();
        let b = emitter
            .emit(&AdapterDescriptor::for_member(&path, DeclKind::Class, &by_text, AdapterKind::Method), &mut diags)
            .unwrap();
        assert_eq!(a.name, "__method_app_Calc_Scale");
        assert_eq!(b.name, "__method_app_Calc_Scale_2");
        assert_ne!(a.binding, b.binding);
    });
}
