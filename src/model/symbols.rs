use jsbridge_runtime::ClassHierarchy;
use serde::{Deserialize, Serialize};

use super::types::{Primitive, TypeDescriptor, TypePath, TypeKind};
use crate::errors::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Protected,
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        self == Self::Public
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }
}

/// How an argument is passed to the host member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Passing {
    #[default]
    Value,
    /// Read-only by reference; marshals like `Value`.
    In,
    Ref,
    Out,
}

/// Default value of an optional parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
    #[serde(default)]
    pub passing: Passing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            passing: Passing::Value,
            default: None,
        }
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_passing(mut self, passing: Passing) -> Self {
        self.passing = passing;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Constructor,
    Method,
    Property,
    Field,
}

/// One member of a host type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub params: Vec<ParameterDescriptor>,
    /// Return type of a method, or the type of a property or field.
    #[serde(default = "TypeDescriptor::void")]
    pub ty: TypeDescriptor,
    /// Property accessors; `None` when the accessor does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<Visibility>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub constant: bool,
    /// Marked for export by discovery. Struct codecs consider every member;
    /// export tables only the marked ones.
    #[serde(default = "default_true")]
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
    #[serde(default)]
    pub location: SourceLocation,
}

fn default_true() -> bool {
    true
}

impl MemberDescriptor {
    fn base(name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            kind,
            visibility: Visibility::Public,
            is_static: false,
            params: Vec::new(),
            ty: TypeDescriptor::void(),
            getter: None,
            setter: None,
            readonly: false,
            constant: false,
            exported: true,
            export_name: None,
            location: SourceLocation::default(),
        }
    }

    pub fn method(name: impl Into<String>, params: Vec<ParameterDescriptor>, ret: TypeDescriptor) -> Self {
        let mut member = Self::base(name, MemberKind::Method);
        member.params = params;
        member.ty = ret;
        member
    }

    pub fn constructor(params: Vec<ParameterDescriptor>) -> Self {
        let mut member = Self::base(".ctor", MemberKind::Constructor);
        member.params = params;
        member
    }

    /// Property with a public getter and setter.
    pub fn property(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        let mut member = Self::base(name, MemberKind::Property);
        member.ty = ty;
        member.getter = Some(Visibility::Public);
        member.setter = Some(Visibility::Public);
        member
    }

    pub fn field(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        let mut member = Self::base(name, MemberKind::Field);
        member.ty = ty;
        member
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_setter(mut self, setter: Option<Visibility>) -> Self {
        self.setter = setter;
        self
    }

    pub fn with_getter(mut self, getter: Option<Visibility>) -> Self {
        self.getter = getter;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn not_exported(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn with_export_name(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    /// Whether the guest can read this member.
    pub fn is_readable(&self) -> bool {
        match self.kind {
            MemberKind::Property => self.getter.is_some_and(Visibility::is_public),
            MemberKind::Field => self.visibility.is_public(),
            _ => false,
        }
    }

    /// Whether the guest can write this member.
    pub fn is_writable(&self) -> bool {
        match self.kind {
            MemberKind::Property => self.setter.is_some_and(Visibility::is_public),
            MemberKind::Field => self.visibility.is_public() && !self.readonly && !self.constant,
            _ => false,
        }
    }

    /// Copied across by a struct codec: public mutable fields and properties
    /// with both accessors public.
    pub fn is_codec_eligible(&self) -> bool {
        !self.is_static && self.is_readable() && self.is_writable()
    }

    /// Comma-joined parameter types, distinguishing overloads.
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| p.ty.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Class,
    Struct,
    Interface,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// A host type declaration with its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub path: TypePath,
    pub kind: DeclKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying: Option<Primitive>,
    /// Generic parameter names of a generic type definition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_params: Vec<String>,
    /// Enclosing type of a nested declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaring_type: Option<TypePath>,
    /// Base class and implemented interfaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<TypePath>,
    #[serde(default)]
    pub location: SourceLocation,
}

impl TypeDecl {
    pub fn new(path: &str, kind: DeclKind) -> Self {
        Self {
            path: TypePath::parse(path),
            kind,
            visibility: Visibility::Public,
            exported: true,
            export_name: None,
            members: Vec::new(),
            enum_values: Vec::new(),
            underlying: None,
            generic_params: Vec::new(),
            declaring_type: None,
            bases: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    pub fn class(path: &str) -> Self {
        Self::new(path, DeclKind::Class)
    }

    pub fn interface(path: &str) -> Self {
        Self::new(path, DeclKind::Interface)
    }

    pub fn structure(path: &str) -> Self {
        Self::new(path, DeclKind::Struct)
    }

    pub fn enumeration(path: &str, values: &[(&str, i64)]) -> Self {
        let mut decl = Self::new(path, DeclKind::Enum);
        decl.underlying = Some(Primitive::I32);
        decl.enum_values = values
            .iter()
            .map(|(name, value)| EnumValue {
                name: name.to_string(),
                value: *value,
            })
            .collect();
        decl
    }

    pub fn with_member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    /// Derive from a base class or implement an interface.
    pub fn with_base(mut self, base: &str) -> Self {
        self.bases.push(TypePath::parse(base));
        self
    }

    pub fn nested_in(mut self, parent: &str) -> Self {
        self.declaring_type = Some(TypePath::parse(parent));
        self
    }

    pub fn not_exported(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    /// Descriptor by which members refer to this type.
    pub fn descriptor(&self) -> TypeDescriptor {
        let kind = match self.kind {
            DeclKind::Class => TypeKind::Reference,
            DeclKind::Struct => TypeKind::Value,
            DeclKind::Interface => TypeKind::Interface,
            DeclKind::Enum => TypeKind::Enum {
                underlying: self.underlying.unwrap_or(Primitive::I32),
            },
        };
        TypeDescriptor::new(self.path.clone(), kind)
    }

    /// Name of the type on the guest side. Type names keep their case.
    pub fn external_name(&self) -> &str {
        self.export_name.as_deref().unwrap_or(&self.path.name)
    }

    pub fn constructors(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members
            .iter()
            .filter(|m| m.kind == MemberKind::Constructor)
    }
}

/// A module-level function: a static method exported on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExport {
    pub declaring_type: TypePath,
    #[serde(default)]
    pub declaring_visibility: Visibility,
    pub member: MemberDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitializerTarget {
    /// A class constructed with `(env, exports)`.
    Class(TypePath),
    /// A static function called with `(env, exports)`.
    Function { declaring_type: TypePath, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializerDescriptor {
    pub target: InitializerTarget,
    #[serde(default)]
    pub location: SourceLocation,
}

impl InitializerDescriptor {
    pub fn symbol(&self) -> String {
        match &self.target {
            InitializerTarget::Class(path) => path.to_string(),
            InitializerTarget::Function { declaring_type, name } => format!("{declaring_type}.{name}"),
        }
    }

    /// Host binding invoked to initialize the module.
    pub fn binding(&self) -> String {
        match &self.target {
            InitializerTarget::Class(path) => format!("{path}::new"),
            InitializerTarget::Function { declaring_type, name } => format!("{declaring_type}::{name}"),
        }
    }
}

/// Everything symbol discovery reports about one module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionExport>,
    #[serde(default)]
    pub initializers: Vec<InitializerDescriptor>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    /// Export a static method of `declaring_type` at module level.
    pub fn with_function(mut self, declaring_type: &str, member: MemberDescriptor) -> Self {
        self.functions.push(FunctionExport {
            declaring_type: TypePath::parse(declaring_type),
            declaring_visibility: Visibility::Public,
            member,
        });
        self
    }

    pub fn with_initializer(mut self, target: InitializerTarget, location: SourceLocation) -> Self {
        self.initializers.push(InitializerDescriptor { target, location });
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Base relations between the module's declarations. Instances of a
    /// class may cross wherever one of its bases is expected.
    pub fn class_hierarchy(&self) -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new();
        for decl in self.types.iter().filter(|d| !d.bases.is_empty()) {
            hierarchy.insert(decl.path.to_string(), decl.bases.iter().map(ToString::to_string));
        }
        hierarchy
    }

    /// Every type descriptor referenced by a member signature or field.
    pub fn referenced_types(&self) -> Vec<TypeDescriptor> {
        let members = self
            .types
            .iter()
            .flat_map(|t| t.members.iter())
            .chain(self.functions.iter().map(|f| &f.member));

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for member in members {
            let types = member.params.iter().map(|p| &p.ty).chain(std::iter::once(&member.ty));
            for ty in types {
                if !ty.is_void() && seen.insert(ty.clone()) {
                    out.push(ty.clone());
                }
            }
        }
        out
    }
}
