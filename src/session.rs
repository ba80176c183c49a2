//! Generation session
//!
//! One pass over a module descriptor: classify, build conversions and
//! codecs, emit adapters, assemble the export tables and the shape
//! description. Every caches and dedup table lives for exactly one session.
//! Problems are collected, never raised, so a failing run reports all of
//! them at once.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use jsbridge_runtime::ClassHierarchy;
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::classify::Classifier;
use crate::conversion::{CodecTable, ConversionBuilder};
use crate::emit::{adapter_kinds, AdapterCode, AdapterDescriptor, AdapterEmitter, AdapterKind, ConstructorPlan};
use crate::errors::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::export::{CaseTransform, ExportItem, ExportRole, ExportTable, ExportTableBuilder, ExportTarget};
use crate::frontend::config::{ConfigError, GeneratorConfig};
use crate::model::{
    Catalog, DeclKind, EnumValue, MemberDescriptor, MemberKind, ModuleDescriptor, TypeDecl, TypePath, Visibility,
};
use crate::shape::{ModuleShape, ShapeBuilder, ShapeItem};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("generation failed with {count} diagnostic(s)")]
    Failed { diagnostics: Vec<Diagnostic>, count: usize },
}

/// Registration of one exported type: the guest object that carries its
/// constructor, static members and prototype.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassExport {
    pub path: TypePath,
    pub kind: DeclKind,
    pub external_name: String,
    pub table: ExportTable,
    pub enum_values: Vec<EnumValue>,
}

#[derive(Debug)]
pub struct GeneratedModule {
    pub name: String,
    /// The module object's table. Empty when building it failed.
    pub module: ExportTable,
    pub classes: Vec<ClassExport>,
    /// Adapters by generated name.
    pub adapters: BTreeMap<String, AdapterCode>,
    pub codecs: CodecTable,
    /// Base classes and interfaces, for class parameter checks at run time.
    pub hierarchy: ClassHierarchy,
    /// Generated module source; empty when source emission is off.
    pub source: String,
    pub shape: ModuleShape,
    pub diagnostics: Vec<Diagnostic>,
    /// Diagnostics raised beyond the configured cap.
    pub dropped_diagnostics: usize,
}

impl GeneratedModule {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty() || self.dropped_diagnostics > 0
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.len() + self.dropped_diagnostics
    }

    pub fn class(&self, path: &TypePath) -> Option<&ClassExport> {
        self.classes.iter().find(|c| &c.path == path)
    }

    pub fn adapter(&self, name: &str) -> Option<&AdapterCode> {
        self.adapters.get(name)
    }
}

/// Run a session and fail if it reported anything.
pub fn generate(module: &ModuleDescriptor, config: &GeneratorConfig) -> Result<GeneratedModule, GenerationError> {
    let generated = Session::new(module, config).run()?;
    if generated.has_errors() {
        return Err(GenerationError::Failed {
            count: generated.error_count(),
            diagnostics: generated.diagnostics,
        });
    }
    Ok(generated)
}

pub struct Session<'a> {
    module: &'a ModuleDescriptor,
    config: &'a GeneratorConfig,
}

impl<'a> Session<'a> {
    pub fn new(module: &'a ModuleDescriptor, config: &'a GeneratorConfig) -> Self {
        Self { module, config }
    }

    /// Generate the module. Diagnostics are returned inside the result; only
    /// an unusable configuration is an error here.
    pub fn run(&self) -> Result<GeneratedModule, ConfigError> {
        let span = info_span!("generate", module = %self.module.name);
        let _enter = span.enter();

        let naming = self.config.naming.case_transform;
        let catalog = Catalog::with_exclusions(self.module, self.config.exclusion_patterns()?);
        let classifier = Classifier::new();
        if self.config.generation.parallel {
            let referenced = self.module.referenced_types();
            classifier.classify_all(&referenced);
            debug!(target: "classify", types = referenced.len(), "classification pre-pass");
        }

        let mut codecs = CodecTable::new();
        let mut work = Work {
            emitter: AdapterEmitter::new(ConversionBuilder::new(&catalog, &classifier, &mut codecs, naming)),
            shapes: ShapeBuilder::new(&catalog, &classifier, naming),
            naming,
            adapters: BTreeMap::new(),
            diagnostics: Diagnostics::with_max(self.config.diagnostics.max_diagnostics),
        };

        let decls = catalog.exported_decls();
        for decl in &decls {
            work.check_container(&catalog, decl);
        }
        let mut classes = Vec::new();
        let mut shape = ModuleShape {
            name: self.module.name.clone(),
            ..ModuleShape::default()
        };
        for decl in &decls {
            let nested: Vec<&TypeDecl> = decls
                .iter()
                .copied()
                .filter(|d| d.declaring_type.as_ref() == Some(&decl.path))
                .collect();
            let (class, type_shape) = work.class_export(decl, &nested);
            shape.types.push(type_shape);
            classes.extend(class);
        }
        let module = work.module_table(self.module, &decls, &mut shape);

        let Work {
            adapters,
            diagnostics,
            ..
        } = work;

        let source = if self.config.output.emit_source {
            render_source(&self.module.name, &codecs, &adapters)
        } else {
            String::new()
        };

        info!(
            target: "codegen",
            classes = classes.len(),
            adapters = adapters.len(),
            codecs = codecs.len(),
            diagnostics = diagnostics.error_count(),
            "module generated"
        );

        let dropped = diagnostics.dropped();
        Ok(GeneratedModule {
            name: self.module.name.clone(),
            module: module.unwrap_or_default(),
            classes,
            adapters,
            codecs,
            hierarchy: self.module.class_hierarchy(),
            source,
            shape,
            diagnostics: diagnostics.into_vec(),
            dropped_diagnostics: dropped,
        })
    }
}

fn render_source(name: &str, codecs: &CodecTable, adapters: &BTreeMap<String, AdapterCode>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// generated bindings for module '{name}'\n");
    if !codecs.is_empty() {
        out.push_str(&codecs.render());
        out.push('\n');
    }
    for code in adapters.values() {
        out.push_str(&code.source);
        out.push('\n');
    }
    out
}

/// Mutable state threaded through one session's table building.
struct Work<'a> {
    emitter: AdapterEmitter<'a>,
    shapes: ShapeBuilder<'a>,
    naming: CaseTransform,
    adapters: BTreeMap<String, AdapterCode>,
    diagnostics: Diagnostics,
}

/// Member names declared more than once with the same static-ness.
fn overloaded_names<'m>(members: impl Iterator<Item = &'m MemberDescriptor>) -> HashMap<(String, bool), usize> {
    let mut counts: HashMap<(String, bool), usize> = HashMap::new();
    for member in members.filter(|m| m.kind == MemberKind::Method) {
        *counts.entry((member.name.clone(), member.is_static)).or_default() += 1;
    }
    counts.retain(|_, count| *count > 1);
    counts
}

impl<'a> Work<'a> {
    /// A nested type is reachable only through its declaring type, so that
    /// type has to be exported too.
    fn check_container(&mut self, catalog: &Catalog, decl: &TypeDecl) {
        let Some(container) = &decl.declaring_type else {
            return;
        };
        if catalog.is_exported(container) {
            return;
        }
        let reason = if catalog.get(container).is_none() {
            "is not declared in this module"
        } else if catalog.is_excluded(container) {
            "is excluded from export"
        } else {
            "is not exported"
        };
        self.diagnostics.add(
            Diagnostic::new(
                DiagnosticCode::VisibilityViolation,
                decl.path.to_string(),
                decl.location.clone(),
                format!("nested type '{}' is exported but its declaring type '{container}' {reason}", decl.path),
            )
            .with_elaboration("a nested type is exported through its declaring type")
            .with_suggestion(format!("Export '{container}' or stop exporting '{}'", decl.path)),
        );
    }

    fn class_export(&mut self, decl: &TypeDecl, nested: &[&TypeDecl]) -> (Option<ClassExport>, crate::shape::TypeShape) {
        let mut items = Vec::new();
        let mut shape_members = Vec::new();
        let exported: Vec<&MemberDescriptor> = decl
            .members
            .iter()
            .filter(|m| m.exported && m.kind != MemberKind::Constructor)
            .collect();
        let overloaded = overloaded_names(exported.iter().copied());

        for member in &exported {
            let is_overloaded = overloaded.contains_key(&(member.name.clone(), member.is_static));
            let member_items = self.member_items(&decl.path, decl.kind, decl.visibility, member, is_overloaded);
            if member.visibility.is_public() && !member_items.is_empty() {
                shape_members.push(self.shapes.member(member));
            }
            items.extend(member_items);
        }

        if let Some(item) = self.constructor_item(decl, &mut shape_members) {
            items.insert(0, item);
        }

        let mut nested_names = Vec::new();
        for child in nested {
            nested_names.push(child.external_name().to_string());
            items.push(ExportItem {
                host_name: child.external_name().to_string(),
                symbol: child.path.to_string(),
                export_name: child.export_name.clone(),
                role: ExportRole::NestedClass,
                target: ExportTarget::Class(child.path.clone()),
                is_static: true,
                visibility: child.visibility,
                container_visibility: decl.visibility,
                location: child.location.clone(),
            });
        }

        let type_shape = self.shapes.type_shape(decl, shape_members, nested_names);
        let table = ExportTableBuilder::class(decl.path.clone(), self.naming).build(items, &[], &mut self.diagnostics);
        let class = table.map(|table| ClassExport {
            path: decl.path.clone(),
            kind: decl.kind,
            external_name: decl.external_name().to_string(),
            table,
            enum_values: decl.enum_values.clone(),
        });
        (class, type_shape)
    }

    fn constructor_item(&mut self, decl: &TypeDecl, shape_members: &mut Vec<ShapeItem>) -> Option<ExportItem> {
        let ctors: Vec<&MemberDescriptor> = decl.constructors().filter(|c| c.exported).collect();
        let chosen = ctors
            .iter()
            .copied()
            .find(|c| matches!(c.params.as_slice(), [p] if p.ty.is_callback_args()))
            .or_else(|| ctors.first().copied())?;

        let target = match self.emitter.plan_constructor(decl, &mut self.diagnostics) {
            ConstructorPlan::None => return None,
            ConstructorPlan::Direct(binding) => ExportTarget::Direct(binding),
            ConstructorPlan::Adapter(code) => {
                let name = code.name.clone();
                self.adapters.insert(name.clone(), code);
                ExportTarget::Adapter(name)
            }
        };
        shape_members.insert(0, self.shapes.member(chosen));
        Some(ExportItem {
            host_name: "constructor".to_string(),
            symbol: format!("{}.new", decl.path),
            export_name: None,
            role: ExportRole::Constructor,
            target,
            is_static: true,
            visibility: chosen.visibility,
            container_visibility: decl.visibility,
            location: chosen.location.clone(),
        })
    }

    /// Export items for one member. Members that cannot be exported still
    /// produce an item when the table builder is the one to report them.
    fn member_items(
        &mut self,
        declaring: &TypePath,
        declaring_kind: DeclKind,
        container: Visibility,
        member: &MemberDescriptor,
        overloaded: bool,
    ) -> Vec<ExportItem> {
        let item = |role: ExportRole, target: ExportTarget, visibility: Visibility| ExportItem {
            host_name: member.name.clone(),
            symbol: format!("{declaring}.{}", member.name),
            export_name: member.export_name.clone(),
            role,
            target,
            is_static: member.is_static,
            visibility,
            container_visibility: container,
            location: member.location.clone(),
        };
        let placeholder = ExportTarget::Direct(format!("{declaring}::{}", member.name));

        if !member.visibility.is_public() {
            let role = if member.kind == MemberKind::Method { ExportRole::Method } else { ExportRole::Getter };
            return vec![item(role, placeholder, member.visibility)];
        }

        let kinds = adapter_kinds(member);
        if kinds.is_empty() {
            let visibility = member.getter.or(member.setter).unwrap_or(Visibility::Private);
            return vec![item(ExportRole::Getter, placeholder, visibility)];
        }

        let mut items = Vec::new();
        for kind in kinds {
            let desc = AdapterDescriptor::for_member(declaring, declaring_kind, member, kind);
            let target = if !overloaded && self.emitter.is_direct(&desc) {
                debug!(target: "codegen", symbol = %desc.symbol(), kind = ?kind, "bound directly");
                ExportTarget::Direct(desc.binding.clone())
            } else {
                match self.emitter.emit(&desc, &mut self.diagnostics) {
                    Some(code) => {
                        let name = code.name.clone();
                        self.adapters.insert(name.clone(), code);
                        ExportTarget::Adapter(name)
                    }
                    None => continue,
                }
            };
            let role = match kind {
                AdapterKind::Method => ExportRole::Method,
                AdapterKind::Getter => ExportRole::Getter,
                AdapterKind::Setter => ExportRole::Setter,
                AdapterKind::Constructor => ExportRole::Constructor,
            };
            items.push(item(role, target, Visibility::Public));
        }
        items
    }

    /// The module object: top-level types, module functions and the
    /// optional initializer.
    fn module_table(
        &mut self,
        module: &ModuleDescriptor,
        decls: &[&TypeDecl],
        shape: &mut ModuleShape,
    ) -> Option<ExportTable> {
        let mut items = Vec::new();
        for decl in decls.iter().filter(|d| d.declaring_type.is_none()) {
            items.push(ExportItem {
                host_name: decl.external_name().to_string(),
                symbol: decl.path.to_string(),
                export_name: decl.export_name.clone(),
                role: ExportRole::NestedClass,
                target: ExportTarget::Class(decl.path.clone()),
                is_static: true,
                visibility: decl.visibility,
                container_visibility: Visibility::Public,
                location: decl.location.clone(),
            });
        }

        let functions: Vec<MemberDescriptor> = module
            .functions
            .iter()
            .map(|f| {
                let mut member = f.member.clone();
                member.is_static = true;
                member
            })
            .collect();
        let overloaded = overloaded_names(functions.iter());
        for (function, member) in module.functions.iter().zip(&functions) {
            let is_overloaded = overloaded.contains_key(&(member.name.clone(), true));
            let member_items = self.member_items(
                &function.declaring_type,
                DeclKind::Class,
                function.declaring_visibility,
                member,
                is_overloaded,
            );
            if member.visibility.is_public() && !member_items.is_empty() {
                shape.functions.push(self.shapes.member(member));
            }
            items.extend(member_items);
        }

        ExportTableBuilder::module(self.naming).build(items, &module.initializers, &mut self.diagnostics)
    }
}
