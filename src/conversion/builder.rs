use thiserror::Error;
use tracing::debug;

use super::codecs::{ArrayCodec, CodecTable, FieldCodec, StructCodec};
use super::{Bidi, Conversion, ConversionExpr, Direction, ValueExpr};
use crate::classify::{Classification, Classifier, ClassifyError, MarshalCategory};
use crate::errors::{find_similar_names, DiagnosticCode};
use crate::export::CaseTransform;
use crate::model::{Catalog, MemberKind, TypePath};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("type '{ty}' is not exported")]
    TypeNotExported { ty: String, suggestions: Vec<String> },

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("field '{field}' of '{owner}': {source}")]
    Field {
        owner: String,
        field: String,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    /// Diagnostic code of the root cause.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::TypeNotExported { .. } => DiagnosticCode::TypeNotExported,
            Self::Classify(_) => DiagnosticCode::UnsupportedType,
            Self::Field { source, .. } => source.code(),
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::TypeNotExported { suggestions, .. } => suggestions,
            Self::Classify(_) => &[],
            Self::Field { source, .. } => source.suggestions(),
        }
    }

    fn in_field(owner: &TypePath, field: &str, source: BuildError) -> Self {
        Self::Field {
            owner: owner.to_string(),
            field: field.to_string(),
            source: Box::new(source),
        }
    }
}

/// Builds conversion IR, creating struct and array codecs on first need.
pub struct ConversionBuilder<'a> {
    catalog: &'a Catalog,
    classifier: &'a Classifier,
    codecs: &'a mut CodecTable,
    naming: CaseTransform,
}

impl<'a> ConversionBuilder<'a> {
    pub fn new(
        catalog: &'a Catalog,
        classifier: &'a Classifier,
        codecs: &'a mut CodecTable,
        naming: CaseTransform,
    ) -> Self {
        Self {
            catalog,
            classifier,
            codecs,
            naming,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        self.classifier
    }

    pub fn catalog(&self) -> &Catalog {
        self.catalog
    }

    pub fn codecs(&self) -> &CodecTable {
        self.codecs
    }

    pub fn naming(&self) -> CaseTransform {
        self.naming
    }

    pub fn build(
        &mut self,
        classification: &Classification,
        direction: Direction,
        input: ValueExpr,
    ) -> Result<ConversionExpr, BuildError> {
        let op = self.conversion(classification, direction)?;
        Ok(ConversionExpr::new(direction, input, op))
    }

    pub fn conversion(
        &mut self,
        classification: &Classification,
        direction: Direction,
    ) -> Result<Conversion, BuildError> {
        let op = match &classification.category {
            MarshalCategory::Raw(_) => return Ok(Conversion::Raw),
            MarshalCategory::Primitive(primitive) => Conversion::Primitive(*primitive),
            MarshalCategory::String => Conversion::String,
            MarshalCategory::Struct(path) => {
                self.require_exported(path)?;
                Conversion::Struct {
                    codec: self.struct_codec(path)?,
                }
            }
            MarshalCategory::Class(path) => {
                self.require_exported(path)?;
                Conversion::Class(path.clone())
            }
            MarshalCategory::Array(element) => Conversion::Array {
                codec: self.array_codec(element)?,
            },
            MarshalCategory::Collection { kind, args } => {
                let (key, element) = match args.as_slice() {
                    [key, value] => (Some(Box::new(self.bidi(key)?)), self.bidi(value)?),
                    [element] => (None, self.bidi(element)?),
                    _ => {
                        return Err(BuildError::Classify(ClassifyError::arity(
                            &classification.ty,
                            kind.arity().to_string(),
                        )))
                    }
                };
                Conversion::Collection {
                    kind: *kind,
                    element: Box::new(element),
                    key,
                }
            }
            MarshalCategory::Memory { element, read_only } => Conversion::Memory {
                element: *element,
                read_only: *read_only,
            },
            MarshalCategory::Delegate { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.conversion(p, direction.flip()))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = match ret {
                    Some(ret) => Some(Box::new(self.conversion(ret, direction)?)),
                    None => None,
                };
                Conversion::Delegate { params, ret }
            }
            MarshalCategory::Task(inner) => match inner {
                Some(inner) => Conversion::Task(Some(Box::new(self.conversion(inner, direction)?))),
                None => Conversion::Task(None),
            },
            MarshalCategory::Tuple(items) => Conversion::Tuple(
                items
                    .iter()
                    .map(|item| self.conversion(item, direction))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            MarshalCategory::Enum(path) => {
                self.require_exported(path)?;
                Conversion::Enum(path.clone())
            }
        };

        if classification.nullable {
            Ok(Conversion::Nullable(Box::new(op)))
        } else {
            Ok(op)
        }
    }

    pub fn bidi(&mut self, classification: &Classification) -> Result<Bidi, BuildError> {
        Ok(Bidi {
            to_host: self.conversion(classification, Direction::ToHost)?,
            to_guest: self.conversion(classification, Direction::ToGuest)?,
        })
    }

    fn require_exported(&self, path: &TypePath) -> Result<(), BuildError> {
        if self.catalog.is_exported(path) {
            return Ok(());
        }
        let ty = path.to_string();
        let suggestions = find_similar_names(&ty, &self.catalog.exported_names(), 3);
        Err(BuildError::TypeNotExported { ty, suggestions })
    }

    /// Codec id for the struct at `path`, building it on first request.
    fn struct_codec(&mut self, path: &TypePath) -> Result<String, BuildError> {
        if let Some(id) = self.codecs.struct_id(path) {
            return Ok(id.to_string());
        }
        let id = self.codecs.reserve_struct(path);
        match self.struct_fields(path) {
            Ok(fields) => {
                debug!(target: "codegen", codec = %id, ty = %path, fields = fields.len(), "struct codec created");
                self.codecs.insert_struct(StructCodec {
                    id: id.clone(),
                    path: path.clone(),
                    fields,
                });
                Ok(id)
            }
            Err(err) => {
                self.codecs.abandon_struct(path);
                Err(err)
            }
        }
    }

    fn struct_fields(&mut self, path: &TypePath) -> Result<Vec<FieldCodec>, BuildError> {
        let catalog = self.catalog;
        let Some(decl) = catalog.get(path) else {
            return Ok(Vec::new());
        };
        let mut fields = Vec::new();
        let eligible = decl
            .members
            .iter()
            .filter(|m| matches!(m.kind, MemberKind::Field | MemberKind::Property) && m.is_codec_eligible());
        for member in eligible {
            let classification = self
                .classifier
                .classify(&member.ty)
                .map_err(|e| BuildError::in_field(path, &member.name, e.into()))?;
            let conversion = self
                .bidi(&classification)
                .map_err(|e| BuildError::in_field(path, &member.name, e))?;
            fields.push(FieldCodec {
                host_name: member.name.clone(),
                js_name: self.naming.external_name(&member.name, member.export_name.as_deref()),
                conversion,
            });
        }
        Ok(fields)
    }

    /// Codec id for arrays of `element`, building it on first request.
    fn array_codec(&mut self, element: &Classification) -> Result<String, BuildError> {
        if let Some(id) = self.codecs.array_id(&element.ty) {
            return Ok(id.to_string());
        }
        let id = self.codecs.reserve_array(&element.ty);
        match self.bidi(element) {
            Ok(conversion) => {
                debug!(target: "codegen", codec = %id, element = %element.ty, "array codec created");
                self.codecs.insert_array(ArrayCodec {
                    id: id.clone(),
                    element_type: element.ty.clone(),
                    element: conversion,
                });
                Ok(id)
            }
            Err(err) => {
                self.codecs.abandon_array(&element.ty);
                Err(err)
            }
        }
    }
}
