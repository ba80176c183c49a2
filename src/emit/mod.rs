//! Adapter emitter
//!
//! Turns a member descriptor into an adapter: the receiver conversion (for
//! instance members), one conversion per parameter by position, the host
//! binding to invoke and the conversion of its result. Members whose shape
//! already matches the guest-native calling convention are registered
//! directly and get no adapter.
//!
//! The emitter never registers anything. It returns IR plus rendered source,
//! and reports problems into the session's diagnostics.

mod render;

use std::collections::HashMap;

use jsbridge_runtime::{CollectionShape, ParamShape, ParamSpec};
use thiserror::Error;
use tracing::{debug, trace};

use crate::classify::{Classification, CollectionKind, MarshalCategory};
use crate::conversion::{BuildError, ConversionBuilder, ConversionExpr, Direction, ValueExpr};
use crate::errors::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
use crate::model::{
    DeclKind, DefaultValue, MemberDescriptor, MemberKind, ParameterDescriptor, Passing, TypeDecl,
    TypeDescriptor, TypePath,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Constructor,
    Method,
    Getter,
    Setter,
}

impl AdapterKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Constructor => "ctor",
            Self::Method => "method",
            Self::Getter => "get",
            Self::Setter => "set",
        }
    }
}

/// Everything needed to emit one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterDescriptor {
    /// Requested adapter name; the emitter keeps names unique.
    pub name: String,
    pub kind: AdapterKind,
    pub declaring: TypePath,
    pub declaring_kind: DeclKind,
    /// Host member name.
    pub member: String,
    pub is_static: bool,
    pub params: Vec<ParameterDescriptor>,
    pub ret: TypeDescriptor,
    /// Host binding the adapter invokes.
    pub binding: String,
    pub location: SourceLocation,
}

impl AdapterDescriptor {
    /// Descriptor for `member` of the type at `declaring`. Accessor kinds
    /// take the member type as their return (getter) or sole parameter
    /// (setter).
    pub fn for_member(
        declaring: &TypePath,
        declaring_kind: DeclKind,
        member: &MemberDescriptor,
        kind: AdapterKind,
    ) -> Self {
        let (params, ret, binding) = match kind {
            AdapterKind::Constructor => (member.params.clone(), TypeDescriptor::void(), format!("{declaring}::new")),
            AdapterKind::Method => {
                let binding = if member.params.is_empty() {
                    format!("{declaring}::{}", member.name)
                } else {
                    format!("{declaring}::{}({})", member.name, member.signature())
                };
                (member.params.clone(), member.ty.clone(), binding)
            }
            AdapterKind::Getter => (Vec::new(), member.ty.clone(), format!("{declaring}::get_{}", member.name)),
            AdapterKind::Setter => (
                vec![ParameterDescriptor::new("value", member.ty.clone())],
                TypeDescriptor::void(),
                format!("{declaring}::set_{}", member.name),
            ),
        };
        let member_name = match kind {
            AdapterKind::Constructor => "new".to_string(),
            _ => member.name.clone(),
        };
        Self {
            name: format!("__{}_{}_{}", kind.prefix(), declaring.ident(), member_name),
            kind,
            declaring: declaring.clone(),
            declaring_kind,
            member: member_name,
            is_static: member.is_static || kind == AdapterKind::Constructor,
            params,
            ret,
            binding,
            location: member.location.clone(),
        }
    }

    /// Qualified symbol, e.g. `app.Calc.Add`.
    pub fn symbol(&self) -> String {
        format!("{}.{}", self.declaring, self.member)
    }

    /// Two descriptors with the same key produce the same adapter.
    pub fn dedup_key(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!("{:?}:{}({})->{}", self.kind, self.binding, params.join(","), self.ret)
    }
}

/// Conversion plan for one positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamPlan {
    pub name: String,
    pub conversion: ConversionExpr,
    /// Value used when the guest omits a trailing argument.
    pub default: Option<DefaultValue>,
    /// Shape used to pick between overloads.
    pub spec: ParamSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCode {
    pub name: String,
    pub kind: AdapterKind,
    pub symbol: String,
    pub binding: String,
    pub declaring: TypePath,
    pub is_static: bool,
    /// Conversion of `this` into the host receiver, for instance members.
    pub receiver: Option<ConversionExpr>,
    pub params: Vec<ParamPlan>,
    /// Conversion of the host result; `None` for void members and class
    /// constructors, whose result is attached to the new guest object.
    pub result: Option<ConversionExpr>,
    pub source: String,
}

impl AdapterCode {
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        self.params.iter().map(|p| p.spec.clone()).collect()
    }
}

/// How a type's constructor is exposed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorPlan {
    /// No public constructor: the class registration object exists but
    /// cannot be constructed from the guest.
    None,
    /// Constructor taking the raw call arguments, bound without adaptation.
    Direct(String),
    Adapter(AdapterCode),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmitError {
    #[error("parameter '{param}' is passed by {passing}")]
    UnsupportedPassing { param: String, passing: &'static str },

    #[error("{position}: {source}")]
    Conversion {
        position: String,
        #[source]
        source: BuildError,
    },

    #[error("'{ty}' declares {count} adaptable constructors")]
    OverloadedConstructor { ty: String, count: usize },
}

impl EmitError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::UnsupportedPassing { .. } => DiagnosticCode::UnsupportedCallingConvention,
            Self::Conversion { source, .. } => source.code(),
            Self::OverloadedConstructor { .. } => DiagnosticCode::OverloadedConstructor,
        }
    }

    fn into_diagnostic(self, symbol: &str, location: SourceLocation) -> Diagnostic {
        let code = self.code();
        let diagnostic = Diagnostic::new(code, symbol, location, format!("'{symbol}': {self}"));
        match self {
            Self::UnsupportedPassing { .. } => diagnostic
                .with_elaboration("by-reference and output parameters cannot cross the boundary"),
            Self::Conversion { source, .. } => {
                let similar = source.suggestions().to_vec();
                diagnostic.with_similar(&similar)
            }
            Self::OverloadedConstructor { .. } => diagnostic,
        }
    }
}

/// Whether a member can be bound without an adapter: no parameters or the
/// single raw-arguments parameter, and a void or raw return.
fn is_direct_shape(params: &[ParameterDescriptor], ret: &TypeDescriptor) -> bool {
    let params_native = match params {
        [] => true,
        [only] => only.ty.is_callback_args() && only.passing == Passing::Value,
        _ => false,
    };
    params_native && (ret.is_void() || ret.is_raw())
}

/// Overload parameter shape of a classified type.
pub fn param_shape(classification: &Classification) -> ParamShape {
    use jsbridge_runtime::NumericKind;
    use crate::model::Primitive;

    match &classification.category {
        MarshalCategory::Raw(_) => ParamShape::Any,
        MarshalCategory::Primitive(Primitive::Bool) => ParamShape::Boolean,
        MarshalCategory::Primitive(Primitive::Char) => ParamShape::Char,
        MarshalCategory::Primitive(p) => ParamShape::Number(p.numeric_kind().unwrap_or(NumericKind::F64)),
        MarshalCategory::String => ParamShape::String,
        MarshalCategory::Struct(_) => ParamShape::Struct,
        MarshalCategory::Class(path) => ParamShape::Class(path.to_string()),
        MarshalCategory::Array(_) | MarshalCategory::Tuple(_) => ParamShape::Array,
        MarshalCategory::Collection { kind, .. } => ParamShape::Collection(match kind {
            CollectionKind::ReadOnlyMap | CollectionKind::Map => CollectionShape::Map,
            CollectionKind::ReadOnlySet | CollectionKind::Set => CollectionShape::Set,
            CollectionKind::ReadOnlyList | CollectionKind::List | CollectionKind::Sequence => {
                CollectionShape::List
            }
        }),
        MarshalCategory::Memory { element, .. } => ParamShape::TypedArray(*element),
        MarshalCategory::Delegate { .. } => ParamShape::Function,
        MarshalCategory::Task(_) => ParamShape::Promise,
        MarshalCategory::Enum(_) => ParamShape::Enum,
    }
}

pub struct AdapterEmitter<'a> {
    builder: ConversionBuilder<'a>,
    /// dedup key -> adapter
    emitted: HashMap<String, AdapterCode>,
    /// base name -> times used
    names: HashMap<String, usize>,
}

impl<'a> AdapterEmitter<'a> {
    pub fn new(builder: ConversionBuilder<'a>) -> Self {
        Self {
            builder,
            emitted: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn builder(&mut self) -> &mut ConversionBuilder<'a> {
        &mut self.builder
    }

    pub fn emitted(&self) -> usize {
        self.emitted.len()
    }

    /// Whether a member needs no adapter.
    pub fn is_direct(&self, desc: &AdapterDescriptor) -> bool {
        match desc.kind {
            AdapterKind::Constructor => false,
            AdapterKind::Method => is_direct_shape(&desc.params, &desc.ret),
            AdapterKind::Getter => desc.ret.is_raw(),
            AdapterKind::Setter => desc.params.first().is_some_and(|p| p.ty.is_raw()),
        }
    }

    /// Emit the adapter for `desc`. Every problem in the signature is
    /// reported, not just the first.
    pub fn emit(&mut self, desc: &AdapterDescriptor, diagnostics: &mut Diagnostics) -> Option<AdapterCode> {
        let key = desc.dedup_key();
        if let Some(existing) = self.emitted.get(&key) {
            trace!(target: "codegen", adapter = %existing.name, "adapter reused");
            return Some(existing.clone());
        }

        match self.plan(desc) {
            Ok((receiver, params, result)) => {
                let name = self.unique_name(&desc.name);
                let mut code = AdapterCode {
                    name,
                    kind: desc.kind,
                    symbol: desc.symbol(),
                    binding: desc.binding.clone(),
                    declaring: desc.declaring.clone(),
                    is_static: desc.is_static,
                    receiver,
                    params,
                    result,
                    source: String::new(),
                };
                code.source = render::adapter_source(&code);
                debug!(
                    target: "codegen",
                    adapter = %code.name,
                    kind = ?code.kind,
                    params = code.params.len(),
                    "adapter emitted"
                );
                self.emitted.insert(key, code.clone());
                Some(code)
            }
            Err(errors) => {
                let symbol = desc.symbol();
                for error in errors {
                    diagnostics.add(error.into_diagnostic(&symbol, desc.location.clone()));
                }
                None
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn plan(
        &mut self,
        desc: &AdapterDescriptor,
    ) -> Result<(Option<ConversionExpr>, Vec<ParamPlan>, Option<ConversionExpr>), Vec<EmitError>> {
        let mut errors = Vec::new();

        let receiver = if desc.is_static {
            None
        } else {
            let ty = match desc.declaring_kind {
                DeclKind::Struct => TypeDescriptor::structure(&desc.declaring.to_string()),
                DeclKind::Interface => TypeDescriptor::interface(&desc.declaring.to_string()),
                DeclKind::Class | DeclKind::Enum => TypeDescriptor::class(&desc.declaring.to_string()),
            };
            match self.convert(&ty, Direction::ToHost, ValueExpr::This) {
                Ok(expr) => Some(expr),
                Err(source) => {
                    errors.push(EmitError::Conversion {
                        position: "receiver".to_string(),
                        source,
                    });
                    None
                }
            }
        };

        let mut params = Vec::with_capacity(desc.params.len());
        for (index, param) in desc.params.iter().enumerate() {
            if matches!(param.passing, Passing::Ref | Passing::Out) {
                errors.push(EmitError::UnsupportedPassing {
                    param: param.name.clone(),
                    passing: if param.passing == Passing::Ref { "ref" } else { "out" },
                });
                continue;
            }
            let classification = match self.builder.classifier().classify(&param.ty) {
                Ok(c) => c,
                Err(err) => {
                    errors.push(EmitError::Conversion {
                        position: format!("parameter '{}'", param.name),
                        source: err.into(),
                    });
                    continue;
                }
            };
            match self.builder.build(&classification, Direction::ToHost, ValueExpr::Arg(index)) {
                Ok(conversion) => params.push(ParamPlan {
                    name: param.name.clone(),
                    spec: ParamSpec {
                        shape: param_shape(&classification),
                        nullable: classification.nullable,
                        optional: param.default.is_some(),
                    },
                    conversion,
                    default: param.default.clone(),
                }),
                Err(source) => errors.push(EmitError::Conversion {
                    position: format!("parameter '{}'", param.name),
                    source,
                }),
            }
        }

        let result = match desc.kind {
            AdapterKind::Constructor if desc.declaring_kind == DeclKind::Struct => {
                let ty = TypeDescriptor::structure(&desc.declaring.to_string());
                self.result_conversion(&ty, &mut errors)
            }
            AdapterKind::Constructor => None,
            _ if desc.ret.is_void() => None,
            _ => self.result_conversion(&desc.ret, &mut errors),
        };

        if errors.is_empty() {
            Ok((receiver, params, result))
        } else {
            Err(errors)
        }
    }

    fn result_conversion(&mut self, ty: &TypeDescriptor, errors: &mut Vec<EmitError>) -> Option<ConversionExpr> {
        match self.convert(ty, Direction::ToGuest, ValueExpr::Result) {
            Ok(expr) => Some(expr),
            Err(source) => {
                errors.push(EmitError::Conversion {
                    position: "return value".to_string(),
                    source,
                });
                None
            }
        }
    }

    fn convert(&mut self, ty: &TypeDescriptor, direction: Direction, input: ValueExpr) -> Result<ConversionExpr, BuildError> {
        let classification = self.builder.classifier().classify(ty)?;
        self.builder.build(&classification, direction, input)
    }

    fn unique_name(&mut self, base: &str) -> String {
        let count = self.names.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.to_string()
        } else {
            format!("{base}_{count}")
        }
    }

    /// Decide how the constructor of `decl` is exposed. A constructor taking
    /// only the raw call arguments is bound directly; otherwise at most one
    /// exported constructor may be adapted.
    pub fn plan_constructor(&mut self, decl: &TypeDecl, diagnostics: &mut Diagnostics) -> ConstructorPlan {
        let exported: Vec<&MemberDescriptor> = decl.constructors().filter(|c| c.exported).collect();

        let raw = exported
            .iter()
            .filter(|c| !c.params.is_empty() && is_direct_shape(&c.params, &TypeDescriptor::void()))
            .count();
        if raw == 1 {
            debug!(target: "codegen", ty = %decl.path, "raw constructor bound directly");
            return ConstructorPlan::Direct(format!("{}::new", decl.path));
        }

        match exported.as_slice() {
            [] => ConstructorPlan::None,
            [ctor] => {
                let desc = AdapterDescriptor::for_member(&decl.path, decl.kind, ctor, AdapterKind::Constructor);
                match self.emit(&desc, diagnostics) {
                    Some(code) => ConstructorPlan::Adapter(code),
                    None => ConstructorPlan::None,
                }
            }
            many => {
                let locations: Vec<String> = many.iter().map(|c| format!("({}) at {}", c.signature(), c.location)).collect();
                let error = EmitError::OverloadedConstructor {
                    ty: decl.path.to_string(),
                    count: many.len(),
                };
                diagnostics.add(
                    error
                        .into_diagnostic(&format!("{}.new", decl.path), decl.location.clone())
                        .with_elaboration(format!("constructors: {}", locations.join("; "))),
                );
                ConstructorPlan::None
            }
        }
    }
}

/// Adapters a member needs. Properties and fields get a getter and/or a
/// setter depending on which accessors are public.
pub fn adapter_kinds(member: &MemberDescriptor) -> Vec<AdapterKind> {
    match member.kind {
        MemberKind::Constructor => vec![AdapterKind::Constructor],
        MemberKind::Method => vec![AdapterKind::Method],
        MemberKind::Property | MemberKind::Field => {
            let mut kinds = Vec::new();
            if member.is_readable() {
                kinds.push(AdapterKind::Getter);
            }
            if member.is_writable() {
                kinds.push(AdapterKind::Setter);
            }
            kinds
        }
    }
}

#[cfg(test)]
mod tests;
