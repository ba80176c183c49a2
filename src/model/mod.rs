//! Symbol descriptors
//!
//! The already-resolved description of a host module that symbol discovery
//! hands to the generator: type descriptors, declarations with their members,
//! module-level functions and initializer designations. All of it is plain
//! serde data, so discovery can hand it over as JSON.

mod symbols;
mod types;

pub use symbols::{
    DeclKind, DefaultValue, EnumValue, FunctionExport, InitializerDescriptor, InitializerTarget,
    MemberDescriptor, MemberKind, ModuleDescriptor, ParameterDescriptor, Passing, TypeDecl, Visibility,
};
pub use types::{Primitive, TypeDescriptor, TypeKind, TypePath, COLLECTIONS_NAMESPACE, CORE_NAMESPACE};

use std::collections::HashMap;

use glob::Pattern;

/// Lookup of the declarations in one module, by path.
#[derive(Debug, Default)]
pub struct Catalog {
    decls: HashMap<TypePath, TypeDecl>,
    excluded: Vec<Pattern>,
}

impl Catalog {
    pub fn new(module: &ModuleDescriptor) -> Self {
        Self::with_exclusions(module, Vec::new())
    }

    /// Declarations whose path matches one of `excluded` count as not
    /// exported.
    pub fn with_exclusions(module: &ModuleDescriptor, excluded: Vec<Pattern>) -> Self {
        let decls = module
            .types
            .iter()
            .map(|decl| (decl.path.clone(), decl.clone()))
            .collect();
        Self { decls, excluded }
    }

    pub fn get(&self, path: &TypePath) -> Option<&TypeDecl> {
        self.decls.get(path)
    }

    pub fn is_excluded(&self, path: &TypePath) -> bool {
        let text = path.to_string();
        self.excluded.iter().any(|p| p.matches(&text))
    }

    /// Declaration of an exported, non-excluded type.
    pub fn exported(&self, path: &TypePath) -> Option<&TypeDecl> {
        self.decls
            .get(path)
            .filter(|decl| decl.exported && !self.is_excluded(path))
    }

    pub fn is_exported(&self, path: &TypePath) -> bool {
        self.exported(path).is_some()
    }

    /// Sorted paths of every exported type.
    pub fn exported_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .decls
            .values()
            .filter(|decl| decl.exported && !self.is_excluded(&decl.path))
            .map(|decl| decl.path.to_string())
            .collect();
        names.sort();
        names
    }

    /// Exported declarations in path order.
    pub fn exported_decls(&self) -> Vec<&TypeDecl> {
        let mut decls: Vec<&TypeDecl> = self
            .decls
            .values()
            .filter(|decl| decl.exported && !self.is_excluded(&decl.path))
            .collect();
        decls.sort_by(|a, b| a.path.cmp(&b.path));
        decls
    }

    /// Guest-facing name of an exported type.
    pub fn external_name(&self, path: &TypePath) -> String {
        self.decls
            .get(path)
            .map(|decl| decl.external_name().to_string())
            .unwrap_or_else(|| path.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleDescriptor {
        ModuleDescriptor::new("app")
            .with_type(TypeDecl::class("app.Calc"))
            .with_type(TypeDecl::structure("app.Point"))
            .with_type(TypeDecl::class("app.Secret").not_exported())
            .with_type(TypeDecl::class("app.internal.Cache"))
    }

    #[test]
    fn test_exported_lookup() {
        let catalog = Catalog::new(&module());
        assert!(catalog.is_exported(&TypePath::parse("app.Calc")));
        assert!(!catalog.is_exported(&TypePath::parse("app.Secret")));
        assert!(catalog.get(&TypePath::parse("app.Secret")).is_some());
        assert_eq!(
            catalog.exported_names(),
            vec!["app.Calc", "app.Point", "app.internal.Cache"]
        );
    }

    #[test]
    fn test_exclusion_patterns() {
        let patterns = vec![Pattern::new("app.internal.*").unwrap()];
        let catalog = Catalog::with_exclusions(&module(), patterns);
        assert!(!catalog.is_exported(&TypePath::parse("app.internal.Cache")));
        assert!(catalog.is_exported(&TypePath::parse("app.Point")));
    }

    #[test]
    fn test_module_json() {
        let json = r#"{
            "name": "calc",
            "types": [{
                "path": {"namespace": "app", "name": "Calc"},
                "kind": "class",
                "exported": true,
                "members": [{
                    "name": "Add",
                    "kind": "method",
                    "is_static": true,
                    "params": [
                        {"name": "a", "ty": {"path": {"namespace": "core", "name": "i32"}, "kind": "value"}},
                        {"name": "b", "ty": {"path": {"namespace": "core", "name": "i32"}, "kind": "value"}}
                    ],
                    "ty": {"path": {"namespace": "core", "name": "i32"}, "kind": "value"}
                }]
            }]
        }"#;
        let module = ModuleDescriptor::from_json(json).unwrap();
        let member = &module.types[0].members[0];
        assert_eq!(member.kind, MemberKind::Method);
        assert!(member.exported);
        assert_eq!(member.signature(), "core.i32,core.i32");
        assert_eq!(module.referenced_types().len(), 1);
    }
}
