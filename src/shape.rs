//! Shape description of a generated module
//!
//! A simplified, serializable view of every exported symbol: names,
//! parameter and return shapes and nested type membership. The declaration
//! generator consumes it to write a statically typed surface; `Display`
//! renders a declaration-style preview.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classify::{Classification, Classifier, CollectionKind, MarshalCategory};
use crate::export::CaseTransform;
use crate::model::{Catalog, DeclKind, MemberDescriptor, MemberKind, Primitive, TypeDecl, TypeDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Method,
    Property,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeItem {
    pub name: String,
    pub kind: ShapeKind,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ShapeParam>,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeShape {
    pub name: String,
    pub path: String,
    pub kind: DeclKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ShapeItem>,
    /// External names of nested exported types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleShape {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<ShapeItem>,
    #[serde(default)]
    pub types: Vec<TypeShape>,
}

impl ModuleShape {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeShape> {
        self.types.iter().find(|t| t.name == name)
    }
}

fn write_item(f: &mut fmt::Formatter<'_>, indent: &str, item: &ShapeItem) -> fmt::Result {
    let prefix = if item.is_static { "static " } else { "" };
    match item.kind {
        ShapeKind::Property => {
            let readonly = if item.readonly { "readonly " } else { "" };
            writeln!(f, "{indent}{prefix}{readonly}{}: {};", item.name, item.ty)
        }
        ShapeKind::Method | ShapeKind::Constructor => {
            let params: Vec<String> = item
                .params
                .iter()
                .map(|p| format!("{}{}: {}", p.name, if p.optional { "?" } else { "" }, p.ty))
                .collect();
            if item.kind == ShapeKind::Constructor {
                writeln!(f, "{indent}constructor({});", params.join(", "))
            } else {
                writeln!(f, "{indent}{prefix}{}({}): {};", item.name, params.join(", "), item.ty)
            }
        }
    }
}

impl fmt::Display for ModuleShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// module {}", self.name)?;
        for function in &self.functions {
            write_item(f, "export function ", function)?;
        }
        for ty in &self.types {
            match ty.kind {
                DeclKind::Enum => {
                    writeln!(f, "export enum {} {{", ty.name)?;
                    for value in &ty.enum_values {
                        writeln!(f, "    {} = {},", value.name, value.value)?;
                    }
                }
                DeclKind::Interface => writeln!(f, "export interface {} {{", ty.name)?,
                DeclKind::Class | DeclKind::Struct => writeln!(f, "export class {} {{", ty.name)?,
            }
            for member in &ty.members {
                write_item(f, "    ", member)?;
            }
            for nested in &ty.nested {
                writeln!(f, "    static readonly {nested}: typeof {nested};")?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// Builds shape entries from declarations, using the session's classifier.
pub struct ShapeBuilder<'a> {
    catalog: &'a Catalog,
    classifier: &'a Classifier,
    naming: CaseTransform,
}

impl<'a> ShapeBuilder<'a> {
    pub fn new(catalog: &'a Catalog, classifier: &'a Classifier, naming: CaseTransform) -> Self {
        Self {
            catalog,
            classifier,
            naming,
        }
    }

    /// Declaration-style text for a host type. Types that fail to classify
    /// render as `unknown`; the failure itself is reported elsewhere.
    pub fn type_text(&self, ty: &TypeDescriptor) -> String {
        if ty.is_void() {
            return "void".to_string();
        }
        match self.classifier.classify(ty) {
            Ok(classification) => self.classified_text(&classification),
            Err(_) => "unknown".to_string(),
        }
    }

    fn classified_text(&self, c: &Classification) -> String {
        let text = match &c.category {
            MarshalCategory::Raw(_) => "any".to_string(),
            MarshalCategory::Primitive(Primitive::Bool) => "boolean".to_string(),
            MarshalCategory::Primitive(Primitive::Char) | MarshalCategory::String => "string".to_string(),
            MarshalCategory::Primitive(_) => "number".to_string(),
            MarshalCategory::Struct(path) | MarshalCategory::Class(path) | MarshalCategory::Enum(path) => {
                self.catalog.external_name(path)
            }
            MarshalCategory::Array(element) => format!("{}[]", self.element_text(element)),
            MarshalCategory::Collection { kind, args } => {
                let args: Vec<String> = args.iter().map(|a| self.classified_text(a)).collect();
                let joined = args.join(", ");
                match kind {
                    CollectionKind::ReadOnlyList | CollectionKind::Sequence => format!("readonly {joined}[]"),
                    CollectionKind::List => format!("{joined}[]"),
                    CollectionKind::ReadOnlySet => format!("ReadonlySet<{joined}>"),
                    CollectionKind::Set => format!("Set<{joined}>"),
                    CollectionKind::ReadOnlyMap => format!("ReadonlyMap<{joined}>"),
                    CollectionKind::Map => format!("Map<{joined}>"),
                }
            }
            MarshalCategory::Memory { element, .. } => element.typed_array_name().to_string(),
            MarshalCategory::Delegate { params, ret } => {
                let params: Vec<String> = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("arg{i}: {}", self.classified_text(p)))
                    .collect();
                let ret = ret
                    .as_ref()
                    .map(|r| self.classified_text(r))
                    .unwrap_or_else(|| "void".to_string());
                format!("(({}) => {ret})", params.join(", "))
            }
            MarshalCategory::Task(inner) => {
                let inner = inner
                    .as_ref()
                    .map(|r| self.classified_text(r))
                    .unwrap_or_else(|| "void".to_string());
                format!("Promise<{inner}>")
            }
            MarshalCategory::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|i| self.classified_text(i)).collect();
                format!("[{}]", items.join(", "))
            }
        };
        if c.nullable {
            format!("{text} | undefined")
        } else {
            text
        }
    }

    fn element_text(&self, element: &Classification) -> String {
        let text = self.classified_text(element);
        if text.contains(' ') {
            format!("({text})")
        } else {
            text
        }
    }

    /// Shape entry for a method, property or field.
    pub fn member(&self, member: &MemberDescriptor) -> ShapeItem {
        let name = match member.kind {
            MemberKind::Constructor => "constructor".to_string(),
            _ => self.naming.external_name(&member.name, member.export_name.as_deref()),
        };
        let kind = match member.kind {
            MemberKind::Constructor => ShapeKind::Constructor,
            MemberKind::Method => ShapeKind::Method,
            MemberKind::Property | MemberKind::Field => ShapeKind::Property,
        };
        let params = member
            .params
            .iter()
            .map(|p| ShapeParam {
                name: p.name.clone(),
                ty: self.type_text(&p.ty),
                optional: p.default.is_some(),
            })
            .collect();
        ShapeItem {
            name,
            kind,
            is_static: member.is_static,
            readonly: kind == ShapeKind::Property && !member.is_writable(),
            params,
            ty: self.type_text(&member.ty),
        }
    }

    pub fn type_shape(&self, decl: &TypeDecl, members: Vec<ShapeItem>, nested: Vec<String>) -> TypeShape {
        TypeShape {
            name: decl.external_name().to_string(),
            path: decl.path.to_string(),
            kind: decl.kind,
            members,
            nested,
            enum_values: decl
                .enum_values
                .iter()
                .map(|v| EnumMember {
                    name: v.name.clone(),
                    value: v.value,
                })
                .collect(),
        }
    }
}
