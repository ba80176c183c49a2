use jsbridge_runtime::NumericKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of the well-known host types.
pub const CORE_NAMESPACE: &str = "core";
pub const COLLECTIONS_NAMESPACE: &str = "core.collections";

/// Dotted path of a host type, e.g. `app.geometry.Point`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypePath {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl TypePath {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split at the last dot: `a.b.C` is namespace `a.b`, name `C`.
    pub fn parse(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new("", path),
        }
    }

    pub fn core(name: &str) -> Self {
        Self::new(CORE_NAMESPACE, name)
    }

    pub fn is_core(&self) -> bool {
        self.namespace == CORE_NAMESPACE || self.namespace == COLLECTIONS_NAMESPACE
    }

    /// Path with dots replaced, usable inside generated identifiers.
    pub fn ident(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// Host primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "i8" => Self::I8,
            "u8" => Self::U8,
            "i16" => Self::I16,
            "u16" => Self::U16,
            "i32" => Self::I32,
            "u32" => Self::U32,
            "i64" => Self::I64,
            "u64" => Self::U64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "char" => Self::Char,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            other => other.numeric_kind().map(NumericKind::name).unwrap_or("?"),
        }
    }

    /// Numeric element kind, for the numeric primitives.
    pub fn numeric_kind(self) -> Option<NumericKind> {
        Some(match self {
            Self::I8 => NumericKind::I8,
            Self::U8 => NumericKind::U8,
            Self::I16 => NumericKind::I16,
            Self::U16 => NumericKind::U16,
            Self::I32 => NumericKind::I32,
            Self::U32 => NumericKind::U32,
            Self::I64 => NumericKind::I64,
            Self::U64 => NumericKind::U64,
            Self::F32 => NumericKind::F32,
            Self::F64 => NumericKind::F64,
            Self::Bool | Self::Char => return None,
        })
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value-vs-reference kind of a host type, plus the constructed kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Value,
    #[default]
    Reference,
    Interface,
    Enum {
        underlying: Primitive,
    },
    Delegate {
        #[serde(default)]
        params: Vec<TypeDescriptor>,
        #[serde(default)]
        ret: Option<Box<TypeDescriptor>>,
    },
    Array {
        element: Box<TypeDescriptor>,
        #[serde(default = "default_rank")]
        rank: u32,
    },
    ByRef {
        element: Box<TypeDescriptor>,
    },
    Pointer {
        element: Box<TypeDescriptor>,
    },
    GenericParameter,
}

fn default_rank() -> u32 {
    1
}

/// A host type as handed over by symbol discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub path: TypePath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_args: Vec<TypeDescriptor>,
    /// Nullable annotation on a reference type.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(default)]
    pub kind: TypeKind,
}

impl TypeDescriptor {
    pub fn new(path: TypePath, kind: TypeKind) -> Self {
        Self {
            path,
            generic_args: Vec::new(),
            nullable: false,
            kind,
        }
    }

    pub fn primitive(primitive: Primitive) -> Self {
        Self::new(TypePath::core(primitive.name()), TypeKind::Value)
    }

    pub fn string() -> Self {
        Self::new(TypePath::core("string"), TypeKind::Reference)
    }

    pub fn void() -> Self {
        Self::new(TypePath::core("void"), TypeKind::Value)
    }

    pub fn js_value() -> Self {
        Self::new(TypePath::core("JsValue"), TypeKind::Value)
    }

    pub fn callback_args() -> Self {
        Self::new(TypePath::core("JsCallbackArgs"), TypeKind::Value)
    }

    pub fn class(path: &str) -> Self {
        Self::new(TypePath::parse(path), TypeKind::Reference)
    }

    pub fn interface(path: &str) -> Self {
        Self::new(TypePath::parse(path), TypeKind::Interface)
    }

    pub fn structure(path: &str) -> Self {
        Self::new(TypePath::parse(path), TypeKind::Value)
    }

    pub fn enumeration(path: &str, underlying: Primitive) -> Self {
        Self::new(TypePath::parse(path), TypeKind::Enum { underlying })
    }

    /// Single-dimension array of `element`.
    pub fn array(element: TypeDescriptor) -> Self {
        Self::array_of_rank(element, 1)
    }

    pub fn array_of_rank(element: TypeDescriptor, rank: u32) -> Self {
        let path = TypePath::new(element.path.namespace.clone(), format!("{}[]", element.path.name));
        Self::new(
            path,
            TypeKind::Array {
                element: Box::new(element),
                rank,
            },
        )
    }

    pub fn delegate(path: &str, params: Vec<TypeDescriptor>, ret: Option<TypeDescriptor>) -> Self {
        Self::new(
            TypePath::parse(path),
            TypeKind::Delegate {
                params,
                ret: ret.map(Box::new),
            },
        )
    }

    /// Instantiation of a generic host type, e.g. `core.collections.List<T>`.
    pub fn generic(path: &str, args: Vec<TypeDescriptor>) -> Self {
        let mut ty = Self::new(TypePath::parse(path), TypeKind::Reference);
        ty.generic_args = args;
        ty
    }

    /// `core.Nullable<T>` around a value type.
    pub fn nullable_value(inner: TypeDescriptor) -> Self {
        let mut ty = Self::new(TypePath::core("Nullable"), TypeKind::Value);
        ty.generic_args = vec![inner];
        ty
    }

    /// The same type with the nullable annotation set.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_void(&self) -> bool {
        self.path.namespace == CORE_NAMESPACE && self.path.name == "void"
    }

    pub fn is_js_value(&self) -> bool {
        self.path.namespace == CORE_NAMESPACE && self.path.name == "JsValue" && !self.nullable
    }

    pub fn is_callback_args(&self) -> bool {
        self.path.namespace == CORE_NAMESPACE && self.path.name == "JsCallbackArgs"
    }

    /// Raw guest values need no adaptation in either direction.
    pub fn is_raw(&self) -> bool {
        self.is_js_value() || self.is_callback_args()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Array { element, rank } => {
                write!(f, "{}[{}]", element, ",".repeat(rank.saturating_sub(1) as usize))?;
            }
            TypeKind::ByRef { element } => write!(f, "ref {}", element)?,
            TypeKind::Pointer { element } => write!(f, "{}*", element)?,
            _ => {
                write!(f, "{}", self.path)?;
                if !self.generic_args.is_empty() {
                    let args: Vec<String> = self.generic_args.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
            }
        }
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse() {
        let path = TypePath::parse("app.geometry.Point");
        assert_eq!(path.namespace, "app.geometry");
        assert_eq!(path.name, "Point");
        assert_eq!(path.to_string(), "app.geometry.Point");
        assert_eq!(path.ident(), "app_geometry_Point");
        assert_eq!(TypePath::parse("Bare").to_string(), "Bare");
    }

    #[test]
    fn test_descriptor_display() {
        let list = TypeDescriptor::generic(
            "core.collections.List",
            vec![TypeDescriptor::primitive(Primitive::I32)],
        );
        assert_eq!(list.to_string(), "core.collections.List<core.i32>");
        assert_eq!(TypeDescriptor::array(TypeDescriptor::string()).to_string(), "core.string[]");
        assert_eq!(
            TypeDescriptor::array_of_rank(TypeDescriptor::primitive(Primitive::F64), 2).to_string(),
            "core.f64[,]"
        );
        assert_eq!(TypeDescriptor::string().nullable().to_string(), "core.string?");
    }

    #[test]
    fn test_descriptor_json_defaults() {
        let ty: TypeDescriptor =
            serde_json::from_str(r#"{"path":{"namespace":"app","name":"Calc"}}"#).unwrap();
        assert_eq!(ty, TypeDescriptor::class("app.Calc"));

        let ty: TypeDescriptor = serde_json::from_str(
            r#"{"path":{"namespace":"app","name":"Color"},"kind":{"enum":{"underlying":"i32"}}}"#,
        )
        .unwrap();
        assert_eq!(ty.kind, TypeKind::Enum { underlying: Primitive::I32 });
    }

    #[test]
    fn test_primitive_names() {
        for name in ["bool", "i8", "u64", "f32", "char"] {
            assert_eq!(Primitive::from_name(name).map(Primitive::name), Some(name));
        }
        assert_eq!(Primitive::from_name("decimal"), None);
        assert_eq!(Primitive::I16.numeric_kind(), Some(NumericKind::I16));
        assert_eq!(Primitive::Char.numeric_kind(), None);
    }
}
