use jsbridge_runtime::NumericKind;
use std::fmt;
use thiserror::Error;

use crate::model::{Primitive, TypeDescriptor, TypePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    ReadOnlyList,
    List,
    ReadOnlySet,
    Set,
    ReadOnlyMap,
    Map,
    /// Generic sequence; read-only, ordered.
    Sequence,
}

impl CollectionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ReadOnlyList" => Self::ReadOnlyList,
            "List" => Self::List,
            "ReadOnlySet" => Self::ReadOnlySet,
            "Set" => Self::Set,
            "ReadOnlyMap" => Self::ReadOnlyMap,
            "Map" => Self::Map,
            "Sequence" => Self::Sequence,
            _ => return None,
        })
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnlyList | Self::ReadOnlySet | Self::ReadOnlyMap | Self::Sequence)
    }

    pub fn is_map(self) -> bool {
        matches!(self, Self::ReadOnlyMap | Self::Map)
    }

    pub fn is_set(self) -> bool {
        matches!(self, Self::ReadOnlySet | Self::Set)
    }

    /// Number of generic arguments the interface takes.
    pub fn arity(self) -> usize {
        if self.is_map() {
            2
        } else {
            1
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadOnlyList => "ReadOnlyList",
            Self::List => "List",
            Self::ReadOnlySet => "ReadOnlySet",
            Self::Set => "Set",
            Self::ReadOnlyMap => "ReadOnlyMap",
            Self::Map => "Map",
            Self::Sequence => "Sequence",
        }
    }
}

/// Whether a raw guest value is a single value or the whole argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawShape {
    Value,
    CallbackArgs,
}

/// Marshalling category of a type. Nested types carry their own
/// classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarshalCategory {
    Raw(RawShape),
    Primitive(Primitive),
    String,
    Struct(TypePath),
    Class(TypePath),
    Array(Box<Classification>),
    Collection {
        kind: CollectionKind,
        args: Vec<Classification>,
    },
    Memory {
        element: NumericKind,
        read_only: bool,
    },
    Delegate {
        params: Vec<Classification>,
        ret: Option<Box<Classification>>,
    },
    Task(Option<Box<Classification>>),
    Tuple(Vec<Classification>),
    Enum(TypePath),
}

/// Flat category tag, for reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryTag {
    Primitive,
    NullablePrimitive,
    StringLike,
    StructByValue,
    ClassByReference,
    Array,
    ReadOnlyCollection,
    MutableCollection,
    TypedMemory,
    Delegate,
    Task,
    Tuple,
    Enum,
    Raw,
    Unsupported,
}

impl CategoryTag {
    pub fn of(result: &Result<Classification, ClassifyError>) -> Self {
        match result {
            Ok(classification) => classification.tag(),
            Err(_) => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Classification {
    pub category: MarshalCategory,
    /// Host null crosses as guest `undefined` and back.
    pub nullable: bool,
    pub ty: TypeDescriptor,
}

impl Classification {
    pub fn new(category: MarshalCategory, ty: TypeDescriptor) -> Self {
        Self {
            category,
            nullable: false,
            ty,
        }
    }

    pub fn tag(&self) -> CategoryTag {
        match &self.category {
            MarshalCategory::Raw(_) => CategoryTag::Raw,
            MarshalCategory::Primitive(_) if self.nullable => CategoryTag::NullablePrimitive,
            MarshalCategory::Primitive(_) => CategoryTag::Primitive,
            MarshalCategory::String => CategoryTag::StringLike,
            MarshalCategory::Struct(_) => CategoryTag::StructByValue,
            MarshalCategory::Class(_) => CategoryTag::ClassByReference,
            MarshalCategory::Array(_) => CategoryTag::Array,
            MarshalCategory::Collection { kind, .. } if kind.is_read_only() => CategoryTag::ReadOnlyCollection,
            MarshalCategory::Collection { .. } => CategoryTag::MutableCollection,
            MarshalCategory::Memory { .. } => CategoryTag::TypedMemory,
            MarshalCategory::Delegate { .. } => CategoryTag::Delegate,
            MarshalCategory::Task(_) => CategoryTag::Task,
            MarshalCategory::Tuple(_) => CategoryTag::Tuple,
            MarshalCategory::Enum(_) => CategoryTag::Enum,
        }
    }

    /// Whether the value crosses without any adaptation.
    pub fn is_raw(&self) -> bool {
        matches!(self.category, MarshalCategory::Raw(_))
    }

    /// Exported types this classification refers to directly or through
    /// nested element types.
    pub fn referenced_paths(&self, out: &mut Vec<TypePath>) {
        match &self.category {
            MarshalCategory::Struct(path) | MarshalCategory::Class(path) | MarshalCategory::Enum(path) => {
                out.push(path.clone())
            }
            MarshalCategory::Array(element) => element.referenced_paths(out),
            MarshalCategory::Collection { args, .. } | MarshalCategory::Tuple(args) => {
                args.iter().for_each(|a| a.referenced_paths(out))
            }
            MarshalCategory::Delegate { params, ret } => {
                params.iter().for_each(|p| p.referenced_paths(out));
                if let Some(ret) = ret {
                    ret.referenced_paths(out);
                }
            }
            MarshalCategory::Task(Some(inner)) => inner.referenced_paths(out),
            MarshalCategory::Task(None)
            | MarshalCategory::Raw(_)
            | MarshalCategory::Primitive(_)
            | MarshalCategory::String
            | MarshalCategory::Memory { .. } => {}
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.tag())?;
        if self.nullable && !matches!(self.tag(), CategoryTag::NullablePrimitive) {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ClassifyError {
    #[error("type '{ty}' cannot cross the boundary: {reason}")]
    Unsupported { ty: String, reason: String },

    #[error("'{ty}' takes {expected} type argument(s), found {found}")]
    Arity { ty: String, expected: String, found: usize },

    #[error("{inner} (in '{outer}')")]
    Nested { outer: String, inner: Box<ClassifyError> },
}

impl ClassifyError {
    pub fn unsupported(ty: &TypeDescriptor, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }

    pub fn arity(ty: &TypeDescriptor, expected: impl Into<String>) -> Self {
        Self::Arity {
            ty: ty.path.to_string(),
            expected: expected.into(),
            found: ty.generic_args.len(),
        }
    }

    pub(crate) fn within(self, outer: &TypeDescriptor) -> Self {
        Self::Nested {
            outer: outer.to_string(),
            inner: Box::new(self),
        }
    }
}
