//! Overload resolver
//!
//! Picks one of several adapters sharing an external name for a concrete
//! call. Matching is shallow: only the top-level category of each argument is
//! inspected, never the elements of arrays or collections. Resolution runs on
//! every call.

use std::collections::{HashMap, HashSet};

use crate::error::OverloadError;
use crate::guest::{JsEnv, JsType, JsValue, ViewKind};
use crate::logging::{log_overload_failed, log_overload_resolved};
use crate::memory::NumericKind;

/// Runtime category of one call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    Undefined,
    Null,
    Boolean,
    Number(f64),
    String,
    Function,
    Array,
    TypedArray(NumericKind),
    Promise,
    View(ViewKind),
    /// Plain object, or a host wrapper carrying its class path.
    Object { class: Option<String> },
}

impl ArgKind {
    /// Categorize `value`. `class_of` names the host class behind a wrapper
    /// object, if any.
    pub fn of(env: &dyn JsEnv, value: JsValue, class_of: impl Fn(JsValue) -> Option<String>) -> Self {
        match env.type_of(value) {
            JsType::Undefined => Self::Undefined,
            JsType::Null => Self::Null,
            JsType::Boolean => Self::Boolean,
            JsType::Number => Self::Number(value.as_number().unwrap_or(f64::NAN)),
            JsType::String => Self::String,
            JsType::Function => Self::Function,
            JsType::Array => Self::Array,
            JsType::TypedArray(kind) => Self::TypedArray(kind),
            JsType::Promise => Self::Promise,
            JsType::View(kind) => Self::View(kind),
            JsType::Object | JsType::Error => Self::Object {
                class: class_of(value),
            },
        }
    }
}

/// Collection family a parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionShape {
    List,
    Set,
    Map,
}

/// Fixed category a parameter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamShape {
    /// Raw guest value; accepts anything, preferred last.
    Any,
    Boolean,
    Number(NumericKind),
    Char,
    String,
    /// Host class by path.
    Class(String),
    Struct,
    /// Arrays and tuples.
    Array,
    Collection(CollectionShape),
    TypedArray(NumericKind),
    Function,
    Promise,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub shape: ParamShape,
    pub nullable: bool,
    /// Trailing parameter with a default value.
    pub optional: bool,
}

impl ParamSpec {
    pub fn required(shape: ParamShape) -> Self {
        Self {
            shape,
            nullable: false,
            optional: false,
        }
    }
}

/// Declared base classes and interfaces of each host class, by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassHierarchy {
    bases: HashMap<String, Vec<String>>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&mut self, class: impl Into<String>, bases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bases
            .entry(class.into())
            .or_default()
            .extend(bases.into_iter().map(Into::into));
    }

    pub fn with(mut self, class: &str, bases: &[&str]) -> Self {
        self.insert(class, bases.iter().copied());
        self
    }

    /// Whether an instance of `actual` may stand where `expected` is
    /// declared: the same class, or one reachable through its bases.
    pub fn is_assignable(&self, expected: &str, actual: &str) -> bool {
        if expected == actual {
            return true;
        }
        let mut seen = HashSet::new();
        let mut pending = vec![actual];
        while let Some(class) = pending.pop() {
            for base in self.bases.get(class).into_iter().flatten() {
                if base == expected {
                    return true;
                }
                if seen.insert(base.as_str()) {
                    pending.push(base.as_str());
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverloadCandidate {
    pub params: Vec<ParamSpec>,
}

impl OverloadCandidate {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    fn required_count(&self) -> usize {
        self.params.iter().take_while(|p| !p.optional).count()
    }

    fn accepts_count(&self, count: usize) -> bool {
        count >= self.required_count() && count <= self.params.len()
    }
}

const EXACT: u32 = 0;
const RAW: u32 = 1000;

/// Score of `arg` against `param`, lower is tighter; `None` eliminates.
fn score(param: &ParamSpec, arg: &ArgKind, classes: &ClassHierarchy) -> Option<u32> {
    if matches!(param.shape, ParamShape::Any) {
        return Some(RAW);
    }
    match arg {
        ArgKind::Undefined => (param.nullable || param.optional).then_some(EXACT),
        ArgKind::Null => param.nullable.then_some(EXACT),
        ArgKind::Number(value) => match param.shape {
            ParamShape::Number(kind) => numeric_fit(kind, *value),
            ParamShape::Enum => NumericKind::I64.accepts(*value).then_some(EXACT),
            _ => None,
        },
        other => category_matches(&param.shape, other, classes).then_some(EXACT),
    }
}

fn category_matches(shape: &ParamShape, arg: &ArgKind, classes: &ClassHierarchy) -> bool {
    use CollectionShape as C;
    match (shape, arg) {
        (ParamShape::Boolean, ArgKind::Boolean) => true,
        (ParamShape::String | ParamShape::Char, ArgKind::String) => true,
        (ParamShape::Class(expected), ArgKind::Object { class: Some(actual) }) => {
            classes.is_assignable(expected, actual)
        }
        (ParamShape::Struct, ArgKind::Object { class: None }) => true,
        (ParamShape::Array, ArgKind::Array | ArgKind::View(ViewKind::List)) => true,
        (ParamShape::Collection(C::List | C::Set), ArgKind::Array) => true,
        (ParamShape::Collection(C::List), ArgKind::View(ViewKind::List)) => true,
        (ParamShape::Collection(C::Set), ArgKind::View(ViewKind::Set)) => true,
        (ParamShape::Collection(C::Map), ArgKind::View(ViewKind::Map)) => true,
        (ParamShape::Collection(C::Map), ArgKind::Object { class: None }) => true,
        (ParamShape::TypedArray(expected), ArgKind::TypedArray(actual)) => expected == actual,
        (ParamShape::Function, ArgKind::Function) => true,
        (ParamShape::Promise, ArgKind::Promise) => true,
        _ => false,
    }
}

/// Integral values prefer the narrowest integer kind that holds them (signed
/// before unsigned), then floats. Non-integral values only fit floats and
/// prefer f64.
fn numeric_fit(kind: NumericKind, value: f64) -> Option<u32> {
    if !kind.accepts(value) {
        return None;
    }
    let integral = value.is_finite() && value.fract() == 0.0;
    let rank = match kind {
        NumericKind::I8 | NumericKind::U8 => 1,
        NumericKind::I16 | NumericKind::U16 => 2,
        NumericKind::I32 | NumericKind::U32 => 3,
        NumericKind::I64 | NumericKind::U64 => 4,
        NumericKind::F32 if integral => 5,
        NumericKind::F64 if integral => 6,
        NumericKind::F64 => 7,
        NumericKind::F32 => 8,
    };
    Some(rank * 2 + u32::from(kind.is_unsigned()))
}

/// Index of the single best candidate for `args`. Wrapper arguments match
/// class parameters of their own class or any of its bases in `classes`.
pub fn resolve(
    member: &str,
    candidates: &[OverloadCandidate],
    args: &[ArgKind],
    classes: &ClassHierarchy,
) -> Result<usize, OverloadError> {
    let mut best: Option<(u32, usize)> = None;
    let mut tied = 0usize;

    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.accepts_count(args.len()) {
            continue;
        }
        let total = candidate
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| score(param, arg, classes))
            .try_fold(0u32, |acc, s| s.map(|s| acc + s));
        let Some(total) = total else {
            continue;
        };
        match best {
            Some((best_score, _)) if total > best_score => {}
            Some((best_score, _)) if total == best_score => tied += 1,
            _ => {
                best = Some((total, index));
                tied = 0;
            }
        }
    }

    match best {
        Some((_, index)) if tied == 0 => {
            log_overload_resolved(member, candidates.len(), index);
            Ok(index)
        }
        Some(_) => {
            let err = OverloadError::Ambiguous {
                member: member.to_string(),
                candidates: tied + 1,
            };
            log_overload_failed(member, &err.to_string());
            Err(err)
        }
        None => {
            let err = OverloadError::NoMatch {
                member: member.to_string(),
                arg_count: args.len(),
            };
            log_overload_failed(member, &err.to_string());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(shapes: &[ParamShape]) -> OverloadCandidate {
        OverloadCandidate::new(shapes.iter().cloned().map(ParamSpec::required).collect())
    }

    fn none() -> ClassHierarchy {
        ClassHierarchy::new()
    }

    fn wrapper(class: &str) -> ArgKind {
        ArgKind::Object {
            class: Some(class.into()),
        }
    }

    #[test]
    fn test_count_filter_with_optional_params() {
        let mut with_default = candidate(&[ParamShape::String, ParamShape::Number(NumericKind::I32)]);
        with_default.params[1].optional = true;
        let candidates = vec![with_default, candidate(&[])];

        assert_eq!(resolve("f", &candidates, &[ArgKind::String], &none()), Ok(0));
        assert_eq!(resolve("f", &candidates, &[], &none()), Ok(1));
        assert!(matches!(
            resolve("f", &candidates, &[ArgKind::String, ArgKind::Number(1.0), ArgKind::Null], &none()),
            Err(OverloadError::NoMatch { arg_count: 3, .. })
        ));
    }

    #[test]
    fn test_category_filter() {
        let candidates = vec![
            candidate(&[ParamShape::String]),
            candidate(&[ParamShape::Class("app.Widget".into())]),
        ];
        assert_eq!(resolve("f", &candidates, &[ArgKind::String], &none()), Ok(0));
        let widget = ArgKind::Object {
            class: Some("app.Widget".into()),
        };
        assert_eq!(resolve("f", &candidates, &[widget], &none()), Ok(1));
        assert!(resolve("f", &candidates, &[ArgKind::Boolean], &none()).is_err());
    }

    #[test]
    fn test_integral_value_prefers_integer_overload() {
        let candidates = vec![
            candidate(&[ParamShape::Number(NumericKind::F64)]),
            candidate(&[ParamShape::Number(NumericKind::I32)]),
        ];
        assert_eq!(resolve("f", &candidates, &[ArgKind::Number(3.0)], &none()), Ok(1));
        assert_eq!(resolve("f", &candidates, &[ArgKind::Number(3.5)], &none()), Ok(0));
        assert_eq!(resolve("f", &candidates, &[ArgKind::Number(1e12)], &none()), Ok(0));
    }

    #[test]
    fn test_signed_preferred_over_unsigned() {
        let candidates = vec![
            candidate(&[ParamShape::Number(NumericKind::U32)]),
            candidate(&[ParamShape::Number(NumericKind::I32)]),
        ];
        assert_eq!(resolve("f", &candidates, &[ArgKind::Number(3.0)], &none()), Ok(1));
        assert_eq!(resolve("f", &candidates, &[ArgKind::Number(3e9)], &none()), Ok(0));
    }

    #[test]
    fn test_ambiguity_is_an_error_every_time() {
        let candidates = vec![
            candidate(&[ParamShape::Collection(CollectionShape::List)]),
            candidate(&[ParamShape::Array]),
        ];
        for _ in 0..3 {
            assert_eq!(
                resolve("take", &candidates, &[ArgKind::Array], &none()),
                Err(OverloadError::Ambiguous {
                    member: "take".into(),
                    candidates: 2
                })
            );
        }
    }

    #[test]
    fn test_raw_parameter_loses_to_specific() {
        let candidates = vec![candidate(&[ParamShape::Any]), candidate(&[ParamShape::Boolean])];
        assert_eq!(resolve("f", &candidates, &[ArgKind::Boolean], &none()), Ok(1));
        assert_eq!(resolve("f", &candidates, &[ArgKind::Function], &none()), Ok(0));
    }

    #[test]
    fn test_null_requires_nullable() {
        let mut nullable = candidate(&[ParamShape::String]);
        nullable.params[0].nullable = true;
        let candidates = vec![candidate(&[ParamShape::Number(NumericKind::F64)]), nullable];
        assert_eq!(resolve("f", &candidates, &[ArgKind::Null], &none()), Ok(1));
        assert_eq!(resolve("f", &candidates, &[ArgKind::Undefined], &none()), Ok(1));
    }

    #[test]
    fn test_no_match_names_member() {
        let err = resolve("Calc.add", &[candidate(&[ParamShape::Boolean])], &[], &none()).unwrap_err();
        assert!(err.to_string().contains("Calc.add"));
    }

    #[test]
    fn test_interface_parameter_accepts_implementing_class() {
        let classes = ClassHierarchy::new()
            .with("app.Circle", &["app.Shape", "app.IShape"])
            .with("app.Shape", &["app.IDrawable"]);
        let candidates = vec![
            candidate(&[ParamShape::Class("app.IShape".into())]),
            candidate(&[ParamShape::String]),
        ];

        assert_eq!(resolve("render", &candidates, &[wrapper("app.Circle")], &classes), Ok(0));
        assert!(resolve("render", &candidates, &[wrapper("app.Circle")], &none()).is_err());
        assert!(resolve("render", &candidates, &[wrapper("app.Square")], &classes).is_err());

        assert!(classes.is_assignable("app.IDrawable", "app.Circle"));
        assert!(!classes.is_assignable("app.Circle", "app.Shape"));
    }

    #[test]
    fn test_cyclic_bases_terminate() {
        let classes = ClassHierarchy::new().with("app.A", &["app.B"]).with("app.B", &["app.A"]);
        assert!(classes.is_assignable("app.B", "app.A"));
        assert!(!classes.is_assignable("app.C", "app.A"));
    }
}
