use super::*;
use crate::classify::Classifier;
use crate::export::CaseTransform;
use crate::model::{Catalog, MemberDescriptor, ModuleDescriptor, Primitive, TypeDecl, TypeDescriptor, Visibility};

fn module() -> ModuleDescriptor {
    ModuleDescriptor::new("app")
        .with_type(
            TypeDecl::structure("app.Point")
                .with_member(MemberDescriptor::field("X", TypeDescriptor::primitive(Primitive::F64)))
                .with_member(MemberDescriptor::field("Y", TypeDescriptor::primitive(Primitive::F64)))
                .with_member(MemberDescriptor::field("Origin", TypeDescriptor::primitive(Primitive::F64)).read_only())
                .with_member(
                    MemberDescriptor::property("Label", TypeDescriptor::string())
                        .with_setter(Some(Visibility::Private)),
                ),
        )
        .with_type(
            TypeDecl::structure("app.Node")
                .with_member(MemberDescriptor::field("Name", TypeDescriptor::string()))
                .with_member(MemberDescriptor::field(
                    "Children",
                    TypeDescriptor::array(TypeDescriptor::structure("app.Node")),
                )),
        )
        .with_type(
            TypeDecl::structure("app.Wrapper")
                .with_member(MemberDescriptor::field("Inner", TypeDescriptor::class("app.Secret"))),
        )
        .with_type(TypeDecl::class("app.Secret").not_exported())
        .with_type(TypeDecl::class("app.Calc"))
}

struct Fixture {
    catalog: Catalog,
    classifier: Classifier,
    codecs: CodecTable,
}

impl Fixture {
    fn new() -> Self {
        Self {
            catalog: Catalog::new(&module()),
            classifier: Classifier::new(),
            codecs: CodecTable::new(),
        }
    }

    fn convert(&mut self, ty: &TypeDescriptor, direction: Direction) -> Result<ConversionExpr, BuildError> {
        let classification = self.classifier.classify(ty)?;
        let mut builder = ConversionBuilder::new(&self.catalog, &self.classifier, &mut self.codecs, CaseTransform::CamelCase);
        builder.build(&classification, direction, ValueExpr::Arg(0))
    }
}

#[test]
fn test_primitive_needs_no_codec() {
    let mut fx = Fixture::new();
    let expr = fx.convert(&TypeDescriptor::primitive(Primitive::I32), Direction::ToHost).unwrap();
    assert_eq!(expr.op, Conversion::Primitive(Primitive::I32));
    assert_eq!(expr.render(), "to_host_i32(args[0])");
    assert!(fx.codecs.is_empty());
}

#[test]
fn test_nullable_render_asymmetry() {
    let mut fx = Fixture::new();
    let ty = TypeDescriptor::string().nullable();
    let to_host = fx.convert(&ty, Direction::ToHost).unwrap();
    assert_eq!(to_host.render(), "(is_nullish(args[0]) ? null : to_host_string(args[0]))");
    let to_guest = fx.convert(&ty, Direction::ToGuest).unwrap();
    assert_eq!(to_guest.render(), "(args[0] == null ? undefined : to_guest_string(args[0]))");
}

#[test]
fn test_struct_codec_fields_and_memoization() {
    let mut fx = Fixture::new();
    let point = TypeDescriptor::structure("app.Point");
    let first = fx.convert(&point, Direction::ToGuest).unwrap();
    let second = fx.convert(&point, Direction::ToHost).unwrap();

    let (Conversion::Struct { codec: a }, Conversion::Struct { codec: b }) = (&first.op, &second.op) else {
        panic!("expected struct conversions");
    };
    assert_eq!(a, b);
    assert_eq!(fx.codecs.len(), 1);

    let codec = fx.codecs.get_struct(a).unwrap();
    // read-only field and privately settable property are not copied
    let names: Vec<&str> = codec.fields.iter().map(|f| f.js_name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert!(a.starts_with("struct_Point_"));
}

#[test]
fn test_recursive_struct_through_array() {
    let mut fx = Fixture::new();
    let expr = fx.convert(&TypeDescriptor::structure("app.Node"), Direction::ToGuest).unwrap();
    let Conversion::Struct { codec } = &expr.op else {
        panic!("expected struct");
    };
    let node = fx.codecs.get_struct(codec).unwrap();
    let children = &node.fields[1];
    let Conversion::Array { codec: array } = &children.conversion.to_guest else {
        panic!("expected array");
    };
    let array = fx.codecs.get_array(array).unwrap();
    assert_eq!(array.element.to_guest, Conversion::Struct { codec: codec.clone() });
    // a cycle cannot be ordered; both codecs are still emitted
    assert_eq!(fx.codecs.emission_order().len(), 2);
}

#[test]
fn test_array_codec_shared_by_element_type() {
    let mut fx = Fixture::new();
    let ints = TypeDescriptor::array(TypeDescriptor::primitive(Primitive::I32));
    fx.convert(&ints, Direction::ToHost).unwrap();
    fx.convert(&ints, Direction::ToGuest).unwrap();
    fx.convert(&TypeDescriptor::array(TypeDescriptor::string()), Direction::ToGuest).unwrap();
    assert_eq!(fx.codecs.arrays().count(), 2);
}

#[test]
fn test_codecs_ordered_after_dependencies() {
    let mut fx = Fixture::new();
    fx.convert(&TypeDescriptor::array(TypeDescriptor::structure("app.Point")), Direction::ToGuest)
        .unwrap();
    let order = fx.codecs.emission_order();
    assert!(matches!(order[0], CodecRef::Struct(_)));
    assert!(matches!(order[1], CodecRef::Array(_)));
    let source = fx.codecs.render();
    assert!(source.contains("obj.x = to_guest_f64(value.X);"));
}

#[test]
fn test_unexported_nested_type_names_field() {
    let mut fx = Fixture::new();
    let err = fx
        .convert(&TypeDescriptor::structure("app.Wrapper"), Direction::ToGuest)
        .unwrap_err();
    assert_eq!(err.code(), crate::errors::DiagnosticCode::TypeNotExported);
    let text = err.to_string();
    assert!(text.contains("field 'Inner' of 'app.Wrapper'"));
    assert!(text.contains("app.Secret"));
    // the failed codec is not left behind
    assert!(fx.codecs.struct_id(&TypePath::parse("app.Wrapper")).is_none());
}

#[test]
fn test_unexported_type_suggests_similar() {
    let mut fx = Fixture::new();
    let err = fx.convert(&TypeDescriptor::class("app.Calx"), Direction::ToGuest).unwrap_err();
    assert_eq!(err.suggestions(), ["app.Calc".to_string()]);
}

#[test]
fn test_collections_carry_both_directions() {
    let mut fx = Fixture::new();
    let map = TypeDescriptor::generic(
        "core.collections.Map",
        vec![TypeDescriptor::string(), TypeDescriptor::structure("app.Point")],
    );
    let expr = fx.convert(&map, Direction::ToGuest).unwrap();
    let Conversion::Collection { kind, element, key } = &expr.op else {
        panic!("expected collection");
    };
    assert_eq!(*kind, crate::classify::CollectionKind::Map);
    assert_eq!(key.as_ref().unwrap().to_host, Conversion::String);
    assert!(matches!(element.to_guest, Conversion::Struct { .. }));
    assert!(expr.render().starts_with("host_map_view(args[0]"));
}

#[test]
fn test_delegate_params_flip_direction() {
    let mut fx = Fixture::new();
    let callback = TypeDescriptor::delegate(
        "app.Callback",
        vec![TypeDescriptor::string()],
        Some(TypeDescriptor::primitive(Primitive::Bool)),
    );
    let expr = fx.convert(&callback, Direction::ToGuest).unwrap();
    assert_eq!(
        expr.render(),
        "forward_function((a0) => to_guest_bool(args[0](to_host_string(a0))))"
    );
}

#[test]
fn test_task_and_tuple() {
    let mut fx = Fixture::new();
    let task = TypeDescriptor::generic("core.Task", vec![TypeDescriptor::primitive(Primitive::I32)]);
    let expr = fx.convert(&task, Direction::ToGuest).unwrap();
    assert_eq!(expr.render(), "promise_from_task(args[0], r => to_guest_i32(r))");

    let tuple = TypeDescriptor::generic(
        "core.Tuple",
        vec![TypeDescriptor::primitive(Primitive::I32), TypeDescriptor::string()],
    );
    let expr = fx.convert(&tuple, Direction::ToGuest).unwrap();
    assert_eq!(expr.render(), "[to_guest_i32(args[0][0]), to_guest_string(args[0][1])]");
}
