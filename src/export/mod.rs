//! Registration and export tables
//!
//! Assembles adapters and pass-through bindings into the surface one guest
//! object exposes: the module object, or a class's constructor and
//! prototype. Member names are transformed, collisions rejected, nested
//! types registered as constructible classes, and a module initializer kept
//! exclusive of item-level exports. Every problem is reported; a table with
//! errors is not produced.

mod naming;

pub use naming::CaseTransform;

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::errors::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
use crate::model::{InitializerDescriptor, InitializerTarget, TypePath, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportRole {
    Method,
    Getter,
    Setter,
    Constructor,
    NestedClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// Generated adapter by name.
    Adapter(String),
    /// Host binding registered without adaptation.
    Direct(String),
    /// Adapters sharing one external name, chosen per call.
    Overloads(Vec<String>),
    /// Class registration object of a nested type.
    Class(TypePath),
}

/// One candidate for a table, before naming and validation.
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub host_name: String,
    /// Qualified symbol for diagnostics, e.g. `app.Calc.Add`.
    pub symbol: String,
    pub export_name: Option<String>,
    pub role: ExportRole,
    pub target: ExportTarget,
    pub is_static: bool,
    pub visibility: Visibility,
    pub container_visibility: Visibility,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub role: ExportRole,
    pub target: ExportTarget,
    pub is_static: bool,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInitializer {
    pub symbol: String,
    pub binding: String,
    pub is_class: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportTable {
    /// Owning class; `None` for the module table.
    pub owner: Option<TypePath>,
    pub entries: Vec<ExportEntry>,
    pub constructor: Option<ExportTarget>,
    pub initializer: Option<ModuleInitializer>,
}

impl ExportTable {
    pub fn get(&self, name: &str, role: ExportRole) -> Option<&ExportEntry> {
        self.entries.iter().find(|e| e.name == name && e.role == role)
    }

    pub fn find(&self, name: &str) -> impl Iterator<Item = &ExportEntry> {
        let name = name.to_string();
        self.entries.iter().filter(move |e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.name.as_str()) {
                names.push(&entry.name);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.constructor.is_none() && self.initializer.is_none()
    }
}

pub struct ExportTableBuilder {
    owner: Option<TypePath>,
    naming: CaseTransform,
}

impl ExportTableBuilder {
    pub fn module(naming: CaseTransform) -> Self {
        Self { owner: None, naming }
    }

    pub fn class(owner: TypePath, naming: CaseTransform) -> Self {
        Self {
            owner: Some(owner),
            naming,
        }
    }

    fn owner_symbol(&self) -> String {
        self.owner
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<module>".to_string())
    }

    pub fn build(
        &self,
        items: Vec<ExportItem>,
        initializers: &[InitializerDescriptor],
        diagnostics: &mut Diagnostics,
    ) -> Option<ExportTable> {
        let before = diagnostics.error_count();
        let mut table = ExportTable {
            owner: self.owner.clone(),
            ..ExportTable::default()
        };

        if initializers.len() > 1 {
            for initializer in initializers {
                diagnostics.add(
                    Diagnostic::new(
                        DiagnosticCode::InvalidInitializer,
                        initializer.symbol(),
                        initializer.location.clone(),
                        format!("'{}' is one of {} module initializers", initializer.symbol(), initializers.len()),
                    )
                    .with_elaboration("a module may designate at most one initializer"),
                );
            }
            return None;
        }
        if let Some(initializer) = initializers.first() {
            if !items.is_empty() {
                let symbols: Vec<&str> = items.iter().map(|i| i.symbol.as_str()).collect();
                diagnostics.add(
                    Diagnostic::new(
                        DiagnosticCode::InvalidInitializer,
                        initializer.symbol(),
                        initializer.location.clone(),
                        format!(
                            "module initializer '{}' cannot be combined with item-level exports",
                            initializer.symbol()
                        ),
                    )
                    .with_elaboration(format!("exported items: {}", symbols.join(", "))),
                );
                return None;
            }
            table.initializer = Some(ModuleInitializer {
                symbol: initializer.symbol(),
                binding: initializer.binding(),
                is_class: matches!(initializer.target, InitializerTarget::Class(_)),
            });
        }

        // (name, is_static) -> indices of the entries under that name
        let mut by_name: HashMap<(String, bool), Vec<usize>> = HashMap::new();

        for item in items {
            if !item.visibility.is_public() || !item.container_visibility.is_public() {
                let (what, visibility) = if item.visibility.is_public() {
                    ("its containing type", item.container_visibility)
                } else {
                    ("the member", item.visibility)
                };
                diagnostics.add(
                    Diagnostic::new(
                        DiagnosticCode::VisibilityViolation,
                        &item.symbol,
                        item.location.clone(),
                        format!("'{}' is exported but {} is {}", item.symbol, what, visibility.name()),
                    )
                    .with_elaboration("exported members and their containing types must be public"),
                );
                continue;
            }

            if item.role == ExportRole::Constructor {
                if table.constructor.is_some() {
                    self.collision(diagnostics, &item, "constructor", &self.owner_symbol());
                } else {
                    table.constructor = Some(item.target);
                }
                continue;
            }

            let name = match item.role {
                ExportRole::NestedClass => item.export_name.clone().unwrap_or_else(|| item.host_name.clone()),
                _ => self.naming.external_name(&item.host_name, item.export_name.as_deref()),
            };
            let key = (name.clone(), item.is_static);

            let existing = by_name.get(&key).cloned().unwrap_or_default();
            let mut merged = false;
            let mut clash: Option<String> = None;
            for index in existing {
                let entry = &mut table.entries[index];
                let same_member = entry.symbol == item.symbol;
                match (entry.role, item.role) {
                    (ExportRole::Getter, ExportRole::Setter) | (ExportRole::Setter, ExportRole::Getter)
                        if same_member => {}
                    (ExportRole::Method, ExportRole::Method) if same_member => {
                        match overload_set(&entry.target, &item.target) {
                            Some(target) => {
                                entry.target = target;
                                merged = true;
                            }
                            None => clash = Some(entry.symbol.clone()),
                        }
                    }
                    _ => clash = Some(entry.symbol.clone()),
                }
            }

            if let Some(other) = clash {
                self.collision(diagnostics, &item, &name, &other);
                continue;
            }
            if merged {
                continue;
            }
            by_name.entry(key).or_default().push(table.entries.len());
            table.entries.push(ExportEntry {
                name,
                role: item.role,
                target: item.target,
                is_static: item.is_static,
                symbol: item.symbol,
            });
        }

        if diagnostics.error_count() > before {
            return None;
        }
        debug!(
            target: "codegen",
            owner = %self.owner_symbol(),
            entries = table.entries.len(),
            "export table built"
        );
        Some(table)
    }

    fn collision(&self, diagnostics: &mut Diagnostics, item: &ExportItem, name: &str, other: &str) {
        diagnostics.add(
            Diagnostic::new(
                DiagnosticCode::NameCollision,
                &item.symbol,
                item.location.clone(),
                format!(
                    "'{}' is exported as '{}' in {}, which is already taken by '{}'",
                    item.symbol,
                    name,
                    self.owner_symbol(),
                    other
                ),
            )
            .with_suggestion("supply an explicit export name for one of the members".to_string()),
        );
    }
}

/// Merge two adapted overloads of one host member.
fn overload_set(existing: &ExportTarget, new: &ExportTarget) -> Option<ExportTarget> {
    let mut names = match existing {
        ExportTarget::Adapter(name) => vec![name.clone()],
        ExportTarget::Overloads(names) => names.clone(),
        _ => return None,
    };
    match new {
        ExportTarget::Adapter(name) => names.push(name.clone()),
        _ => return None,
    }
    Some(ExportTarget::Overloads(names))
}
