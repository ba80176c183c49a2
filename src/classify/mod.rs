//! Type classifier
//!
//! Maps a host type descriptor to the marshalling category that decides its
//! guest representation and whether it is copied or referenced. Rules are
//! tried in a fixed order and the first match wins:
//!
//! 1. nullable wrapper or annotation (unwrap one level, set the flag)
//! 2. primitive, string or raw guest value
//! 3. typed memory over a numeric element kind
//! 4. single-dimension array
//! 5. generic collection interface
//! 6. tuple
//! 7. delegate
//! 8. task
//! 9. struct
//! 10. class or interface
//! 11. enum
//! 12. anything else is an error
//!
//! Classification is pure; results are cached per descriptor for the
//! lifetime of the `Classifier`, which is one generation session.

mod category;

pub use category::{CategoryTag, Classification, ClassifyError, CollectionKind, MarshalCategory, RawShape};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::trace;

use crate::model::{Primitive, TypeDescriptor, TypeKind};

#[derive(Debug, Clone, Copy)]
enum WellKnown {
    Primitive(Primitive),
    String,
    Void,
    Raw(RawShape),
    Nullable,
    Memory { read_only: bool },
    Collection(CollectionKind),
    Tuple,
    Task,
}

static WELL_KNOWN: Lazy<HashMap<&'static str, WellKnown>> = Lazy::new(|| {
    let mut table = HashMap::new();
    let primitives = [
        ("core.bool", Primitive::Bool),
        ("core.i8", Primitive::I8),
        ("core.u8", Primitive::U8),
        ("core.i16", Primitive::I16),
        ("core.u16", Primitive::U16),
        ("core.i32", Primitive::I32),
        ("core.u32", Primitive::U32),
        ("core.i64", Primitive::I64),
        ("core.u64", Primitive::U64),
        ("core.f32", Primitive::F32),
        ("core.f64", Primitive::F64),
        ("core.char", Primitive::Char),
    ];
    for (path, primitive) in primitives {
        table.insert(path, WellKnown::Primitive(primitive));
    }
    table.insert("core.string", WellKnown::String);
    table.insert("core.void", WellKnown::Void);
    table.insert("core.JsValue", WellKnown::Raw(RawShape::Value));
    table.insert("core.JsCallbackArgs", WellKnown::Raw(RawShape::CallbackArgs));
    table.insert("core.Nullable", WellKnown::Nullable);
    table.insert("core.Memory", WellKnown::Memory { read_only: false });
    table.insert("core.ReadOnlyMemory", WellKnown::Memory { read_only: true });
    table.insert("core.Tuple", WellKnown::Tuple);
    table.insert("core.Task", WellKnown::Task);
    let collections = [
        ("core.collections.ReadOnlyList", CollectionKind::ReadOnlyList),
        ("core.collections.List", CollectionKind::List),
        ("core.collections.ReadOnlySet", CollectionKind::ReadOnlySet),
        ("core.collections.Set", CollectionKind::Set),
        ("core.collections.ReadOnlyMap", CollectionKind::ReadOnlyMap),
        ("core.collections.Map", CollectionKind::Map),
        ("core.collections.Sequence", CollectionKind::Sequence),
    ];
    for (path, kind) in collections {
        table.insert(path, WellKnown::Collection(kind));
    }
    table
});

/// Largest tuple arity in the host tuple family.
pub const MAX_TUPLE_ARITY: usize = 7;

type ClassifyResult = Result<Classification, ClassifyError>;

/// Session-scoped classifier with a concurrent per-descriptor cache.
#[derive(Debug, Default)]
pub struct Classifier {
    cache: DashMap<TypeDescriptor, ClassifyResult>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, ty: &TypeDescriptor) -> ClassifyResult {
        if let Some(hit) = self.cache.get(ty) {
            return hit.clone();
        }
        let result = self.compute(ty);
        trace!(target: "classify", ty = %ty, tag = ?CategoryTag::of(&result), "classified");
        self.cache.insert(ty.clone(), result.clone());
        result
    }

    /// Classify a batch in parallel, sharing the cache.
    pub fn classify_all(&self, types: &[TypeDescriptor]) -> Vec<ClassifyResult> {
        types.par_iter().map(|ty| self.classify(ty)).collect()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn compute(&self, ty: &TypeDescriptor) -> ClassifyResult {
        // 1. nullable annotation or wrapper
        if ty.nullable {
            let mut inner = ty.clone();
            inner.nullable = false;
            let mut classification = self.classify(&inner)?;
            classification.nullable = true;
            classification.ty = ty.clone();
            return Ok(classification);
        }

        let known = WELL_KNOWN.get(ty.path.to_string().as_str()).copied();
        if let Some(WellKnown::Nullable) = known {
            let [inner] = ty.generic_args.as_slice() else {
                return Err(ClassifyError::arity(ty, "1"));
            };
            let mut classification = self.classify(inner).map_err(|e| e.within(ty))?;
            if classification.nullable {
                return Err(ClassifyError::unsupported(ty, "nested nullable wrappers"));
            }
            classification.nullable = true;
            classification.ty = ty.clone();
            return Ok(classification);
        }

        // 2. primitives, text and raw guest values
        match known {
            Some(WellKnown::Primitive(primitive)) => {
                return self.leaf(ty, MarshalCategory::Primitive(primitive));
            }
            Some(WellKnown::String) => return self.leaf(ty, MarshalCategory::String),
            Some(WellKnown::Raw(shape)) => return self.leaf(ty, MarshalCategory::Raw(shape)),
            Some(WellKnown::Void) => {
                return Err(ClassifyError::unsupported(ty, "'void' has no value representation"));
            }
            _ => {}
        }

        // 3. typed memory; other element kinds fall through
        let mut fallthrough = None;
        if let Some(WellKnown::Memory { read_only }) = known {
            let [element] = ty.generic_args.as_slice() else {
                return Err(ClassifyError::arity(ty, "1"));
            };
            let numeric = match self.classify(element) {
                Ok(Classification {
                    category: MarshalCategory::Primitive(p),
                    nullable: false,
                    ..
                }) => p.numeric_kind(),
                _ => None,
            };
            match numeric {
                Some(element) => {
                    return Ok(Classification::new(
                        MarshalCategory::Memory { element, read_only },
                        ty.clone(),
                    ));
                }
                None => {
                    fallthrough = Some(format!("'{element}' is not a numeric memory element kind"));
                }
            }
        }

        // 4. arrays
        if let TypeKind::Array { element, rank } = &ty.kind {
            if *rank != 1 {
                return Err(ClassifyError::unsupported(ty, "multi-dimensional arrays are not supported"));
            }
            if matches!(element.kind, TypeKind::Array { .. }) {
                return Err(ClassifyError::unsupported(ty, "jagged arrays are not supported"));
            }
            let element = self.classify(element).map_err(|e| e.within(ty))?;
            return Ok(Classification::new(MarshalCategory::Array(Box::new(element)), ty.clone()));
        }

        // 5. collection interfaces
        if let Some(WellKnown::Collection(kind)) = known {
            if ty.generic_args.len() != kind.arity() {
                return Err(ClassifyError::arity(ty, kind.arity().to_string()));
            }
            let args = self.classify_args(ty)?;
            return Ok(Classification::new(MarshalCategory::Collection { kind, args }, ty.clone()));
        }

        // 6. tuples
        if let Some(WellKnown::Tuple) = known {
            if ty.generic_args.is_empty() || ty.generic_args.len() > MAX_TUPLE_ARITY {
                return Err(ClassifyError::arity(ty, format!("1 to {MAX_TUPLE_ARITY}")));
            }
            let items = self.classify_args(ty)?;
            return Ok(Classification::new(MarshalCategory::Tuple(items), ty.clone()));
        }

        // 7. delegates
        if let TypeKind::Delegate { params, ret } = &ty.kind {
            let params = params
                .iter()
                .map(|p| self.classify(p).map_err(|e| e.within(ty)))
                .collect::<Result<Vec<_>, _>>()?;
            let ret = match ret.as_deref() {
                Some(ret) if !ret.is_void() => {
                    Some(Box::new(self.classify(ret).map_err(|e| e.within(ty))?))
                }
                _ => None,
            };
            return Ok(Classification::new(MarshalCategory::Delegate { params, ret }, ty.clone()));
        }

        // 8. tasks
        if let Some(WellKnown::Task) = known {
            let result = match ty.generic_args.as_slice() {
                [] => None,
                [inner] => Some(Box::new(self.classify(inner).map_err(|e| e.within(ty))?)),
                _ => return Err(ClassifyError::arity(ty, "0 or 1")),
            };
            return Ok(Classification::new(MarshalCategory::Task(result), ty.clone()));
        }

        // 9 to 11. user aggregates and enums
        if !ty.path.is_core() {
            if !ty.generic_args.is_empty() {
                return Err(ClassifyError::unsupported(ty, "generic aggregate types cannot be exported"));
            }
            match &ty.kind {
                TypeKind::Value => return self.leaf(ty, MarshalCategory::Struct(ty.path.clone())),
                TypeKind::Reference | TypeKind::Interface => {
                    return self.leaf(ty, MarshalCategory::Class(ty.path.clone()));
                }
                TypeKind::Enum { .. } => return self.leaf(ty, MarshalCategory::Enum(ty.path.clone())),
                _ => {}
            }
        }

        // 12. everything else
        let reason = match (&ty.kind, fallthrough) {
            (_, Some(reason)) => reason,
            (TypeKind::ByRef { .. }, _) => "by-reference types cannot cross the boundary".to_string(),
            (TypeKind::Pointer { .. }, _) => "pointer types cannot cross the boundary".to_string(),
            (TypeKind::GenericParameter, _) => "open generic parameters cannot cross the boundary".to_string(),
            _ => "no marshalling category matches this type".to_string(),
        };
        Err(ClassifyError::unsupported(ty, reason))
    }

    fn leaf(&self, ty: &TypeDescriptor, category: MarshalCategory) -> ClassifyResult {
        if !ty.generic_args.is_empty() {
            return Err(ClassifyError::arity(ty, "0"));
        }
        Ok(Classification::new(category, ty.clone()))
    }

    fn classify_args(&self, ty: &TypeDescriptor) -> Result<Vec<Classification>, ClassifyError> {
        ty.generic_args
            .iter()
            .map(|arg| self.classify(arg).map_err(|e| e.within(ty)))
            .collect()
    }
}
