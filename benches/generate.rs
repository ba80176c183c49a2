//! Generation and call-path benchmarks
//!
//! Measures a full generation session over synthetic modules of growing size
//! and the per-call cost of a linked adapter.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::rc::Rc;

use jsbridge::model::{ParameterDescriptor, Primitive};
use jsbridge::runtime::{GuestContext, HostError, HostValue, JsEnv, JsValue, MemoryEnv};
use jsbridge::{
    generate, GeneratorConfig, HostBindings, Linker, MemberDescriptor, ModuleDescriptor, RuntimeState, TypeDecl,
    TypeDescriptor,
};

fn synthetic_module(classes: usize) -> ModuleDescriptor {
    let i32_ty = TypeDescriptor::primitive(Primitive::I32);
    let mut module = ModuleDescriptor::new("bench");
    for i in 0..classes {
        let point = format!("bench.Point{i}");
        module = module
            .with_type(
                TypeDecl::structure(&point)
                    .with_member(MemberDescriptor::field("X", i32_ty.clone()).not_exported())
                    .with_member(MemberDescriptor::field("Y", i32_ty.clone()).not_exported()),
            )
            .with_type(
                TypeDecl::class(&format!("bench.Shape{i}"))
                    .with_member(MemberDescriptor::constructor(vec![ParameterDescriptor::new("size", i32_ty.clone())]))
                    .with_member(MemberDescriptor::property("Name", TypeDescriptor::string().nullable()))
                    .with_member(MemberDescriptor::method(
                        "Move",
                        vec![ParameterDescriptor::new("to", TypeDescriptor::structure(&point))],
                        TypeDescriptor::array(TypeDescriptor::structure(&point)),
                    ))
                    .with_member(MemberDescriptor::method(
                        "Tags",
                        vec![],
                        TypeDescriptor::generic("core.collections.List", vec![TypeDescriptor::string()]),
                    )),
            );
    }
    module
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    for classes in [10, 50, 200] {
        let module = synthetic_module(classes);
        for parallel in [false, true] {
            let mut config = GeneratorConfig::default();
            config.generation.parallel = parallel;
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, classes), &module, |b, module| {
                b.iter(|| generate(black_box(module), &config).map(|g| g.adapters.len()))
            });
        }
    }
    group.finish();
}

fn bench_adapter_call(c: &mut Criterion) {
    let i32_ty = TypeDescriptor::primitive(Primitive::I32);
    let module = ModuleDescriptor::new("calc").with_function(
        "calc.Math",
        MemberDescriptor::method(
            "Add",
            vec![ParameterDescriptor::new("a", i32_ty.clone()), ParameterDescriptor::new("b", i32_ty.clone())],
            i32_ty,
        ),
    );
    let Ok(generated) = generate(&module, &GeneratorConfig::default()) else {
        return;
    };
    let Some(add) = generated.adapter("__method_calc_Math_Add") else {
        return;
    };
    let bindings = HostBindings::new().with_method(add.binding.clone(), |_, args| match args {
        [HostValue::I32(a), HostValue::I32(b)] => Ok(HostValue::I32(a.wrapping_add(*b))),
        _ => Err(HostError::Argument("a, b".into())),
    });

    let env: Rc<dyn JsEnv> = Rc::new(MemoryEnv::new());
    let context = GuestContext::new(env);
    let state = RuntimeState::new(context.handle());
    let Ok(linked) = Linker::link(&generated, &bindings, context.env(), &state) else {
        return;
    };
    let env = context.env();
    let exports = linked.exports();

    c.bench_function("adapter_call_add", |b| {
        b.iter(|| env.call_method(exports, "add", black_box(&[JsValue::Number(3.0), JsValue::Number(4.0)])))
    });
}

criterion_group!(benches, bench_generate, bench_adapter_call);
criterion_main!(benches);
