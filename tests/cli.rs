use std::fs;
use std::path::Path;

use jsbridge::frontend::cli::{parse_args, Cli};
use jsbridge::model::{ParameterDescriptor, Primitive};
use jsbridge::shape::ModuleShape;
use jsbridge::{MemberDescriptor, ModuleDescriptor, TypeDecl, TypeDescriptor};
use tempfile::TempDir;

fn run(args: &[&str]) -> Result<i32, String> {
    let args: Vec<String> = std::iter::once("jsbridge").chain(args.iter().copied()).map(String::from).collect();
    Cli::new(parse_args(&args)?).run()
}

fn write_module(dir: &Path, module: &ModuleDescriptor) -> String {
    let path = dir.join("module.json");
    fs::write(&path, serde_json::to_string_pretty(module).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

fn geometry() -> ModuleDescriptor {
    let f64_ty = TypeDescriptor::primitive(Primitive::F64);
    ModuleDescriptor::new("geometry").with_type(
        TypeDecl::class("geometry.Circle")
            .with_member(MemberDescriptor::constructor(vec![ParameterDescriptor::new("radius", f64_ty.clone())]))
            .with_member(MemberDescriptor::method("Area", vec![], f64_ty)),
    )
}

#[test]
fn test_generates_source_and_shape_files() {
    let dir = TempDir::new().unwrap();
    let module = write_module(dir.path(), &geometry());
    let out = dir.path().join("out");

    let code = run(&[&module, "--no-color", "--out-dir", out.to_str().unwrap()]).unwrap();
    assert_eq!(code, 0);

    let source = fs::read_to_string(out.join("bindings.generated.js")).unwrap();
    assert!(source.contains("__ctor_geometry_Circle_new"));

    let shape = ModuleShape::from_json(&fs::read_to_string(out.join("bindings.shape.json")).unwrap()).unwrap();
    let circle = shape.find_type("Circle").unwrap();
    assert!(circle.members.iter().any(|m| m.name == "area"));
}

#[test]
fn test_config_file_controls_outputs() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("jsbridge.toml"),
        "[output]\nemit_source = false\nshapes_file = \"circle.json\"\n",
    )
    .unwrap();
    let module = write_module(dir.path(), &geometry());

    assert_eq!(run(&[&module, "--no-color"]).unwrap(), 0);
    assert!(dir.path().join("circle.json").exists());
    assert!(!dir.path().join("bindings.generated.js").exists());
}

#[test]
fn test_invalid_module_exits_nonzero_without_outputs() {
    let dir = TempDir::new().unwrap();
    let module = ModuleDescriptor::new("bad").with_type(TypeDecl::class("bad.Thing").with_member(
        MemberDescriptor::method(
            "Take",
            vec![ParameterDescriptor::new("x", TypeDescriptor::class("bad.Hiddn"))],
            TypeDescriptor::void(),
        ),
    ));
    let path = write_module(dir.path(), &module);

    assert_eq!(run(&[&path, "--no-color"]).unwrap(), 1);
    assert!(!dir.path().join("bindings.shape.json").exists());
}

#[test]
fn test_unreadable_descriptor_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.json");
    fs::write(&path, "{ not json").unwrap();

    let err = run(&[path.to_str().unwrap()]).unwrap_err();
    assert!(err.contains("Invalid module descriptor"), "{err}");
}

#[test]
fn test_init_writes_default_config_once() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().to_str().unwrap();

    assert_eq!(run(&["--init", "--out-dir", out]).unwrap(), 0);
    let text = fs::read_to_string(dir.path().join("jsbridge.toml")).unwrap();
    assert!(text.contains("[output]"));
    assert!(run(&["--init", "--out-dir", out]).is_err());
}
