//! Conversion expressions
//!
//! One IR node per marshalling category, recursive over nested types. The
//! linker interprets the IR at run time; `render` turns it into the
//! deterministic listing that goes into the generated module source.
//!
//! Nullable conversions keep one deliberate asymmetry: guest `undefined` and
//! `null` both become host null, while host null always becomes guest
//! `undefined`.

mod builder;
mod codecs;

pub use builder::{BuildError, ConversionBuilder};
pub use codecs::{ArrayCodec, CodecRef, CodecTable, FieldCodec, StructCodec};

use jsbridge_runtime::NumericKind;
use std::fmt;

use crate::classify::CollectionKind;
use crate::model::{Primitive, TypePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Guest value into a host value.
    ToHost,
    /// Host value into a guest value.
    ToGuest,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Self::ToHost => Self::ToGuest,
            Self::ToGuest => Self::ToHost,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::ToHost => "to_host",
            Self::ToGuest => "to_guest",
        }
    }
}

/// Where a converted value comes from inside an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueExpr {
    Arg(usize),
    This,
    /// Value returned by the host member.
    Result,
    /// Value handed to a setter or codec.
    Value,
    Field(Box<ValueExpr>, String),
    Element(Box<ValueExpr>),
}

impl ValueExpr {
    pub fn field(self, name: impl Into<String>) -> Self {
        Self::Field(Box::new(self), name.into())
    }

    pub fn element(self) -> Self {
        Self::Element(Box::new(self))
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arg(index) => write!(f, "args[{index}]"),
            Self::This => f.write_str("this"),
            Self::Result => f.write_str("result"),
            Self::Value => f.write_str("value"),
            Self::Field(base, name) => write!(f, "{base}.{name}"),
            Self::Element(base) => write!(f, "{base}[i]"),
        }
    }
}

/// Conversions for both directions of one element type. Live collection
/// views read through one and write through the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Bidi {
    pub to_host: Conversion,
    pub to_guest: Conversion,
}

impl Bidi {
    pub fn get(&self, direction: Direction) -> &Conversion {
        match direction {
            Direction::ToHost => &self.to_host,
            Direction::ToGuest => &self.to_guest,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// No adaptation.
    Raw,
    Primitive(Primitive),
    /// Fresh UTF-16 / UTF-8 decode on every crossing.
    String,
    Nullable(Box<Conversion>),
    /// By-value copy through a struct codec.
    Struct { codec: String },
    /// By-reference through the proxy table.
    Class(TypePath),
    /// Full copy through an array codec.
    Array { codec: String },
    /// Live forwarding view. `key` is set for maps.
    Collection {
        kind: CollectionKind,
        element: Box<Bidi>,
        key: Option<Box<Bidi>>,
    },
    /// Shared memory; nothing is copied.
    Memory { element: NumericKind, read_only: bool },
    /// Forwarding function. `params` convert in the opposite direction of
    /// the delegate itself, `ret` in the same direction.
    Delegate {
        params: Vec<Conversion>,
        ret: Option<Box<Conversion>>,
    },
    Task(Option<Box<Conversion>>),
    Tuple(Vec<Conversion>),
    Enum(TypePath),
}

impl Conversion {
    /// Whether the conversion is the identity.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Codecs this conversion calls, directly or through nested conversions.
    pub fn codec_refs(&self, out: &mut Vec<CodecRef>) {
        match self {
            Self::Struct { codec } => out.push(CodecRef::Struct(codec.clone())),
            Self::Array { codec } => out.push(CodecRef::Array(codec.clone())),
            Self::Nullable(inner) => inner.codec_refs(out),
            Self::Collection { element, key, .. } => {
                element.to_host.codec_refs(out);
                element.to_guest.codec_refs(out);
                if let Some(key) = key {
                    key.to_host.codec_refs(out);
                    key.to_guest.codec_refs(out);
                }
            }
            Self::Delegate { params, ret } => {
                params.iter().for_each(|p| p.codec_refs(out));
                if let Some(ret) = ret {
                    ret.codec_refs(out);
                }
            }
            Self::Task(Some(inner)) => inner.codec_refs(out),
            Self::Tuple(items) => items.iter().for_each(|i| i.codec_refs(out)),
            Self::Raw
            | Self::Primitive(_)
            | Self::String
            | Self::Class(_)
            | Self::Memory { .. }
            | Self::Task(None)
            | Self::Enum(_) => {}
        }
    }

    pub fn render(&self, direction: Direction, input: &str) -> String {
        let prefix = direction.prefix();
        match self {
            Self::Raw => input.to_string(),
            Self::Primitive(p) => format!("{prefix}_{p}({input})"),
            Self::String => format!("{prefix}_string({input})"),
            Self::Nullable(inner) => match direction {
                Direction::ToHost => {
                    format!("(is_nullish({input}) ? null : {})", inner.render(direction, input))
                }
                Direction::ToGuest => {
                    format!("({input} == null ? undefined : {})", inner.render(direction, input))
                }
            },
            Self::Struct { codec } | Self::Array { codec } => format!("__{prefix}_{codec}({input})"),
            Self::Class(path) => match direction {
                Direction::ToHost => format!("proxy_from_guest({input}, \"{path}\")"),
                Direction::ToGuest => format!("proxy_to_guest({input}, \"{path}\")"),
            },
            Self::Collection { kind, element, key } => {
                let owner = match direction {
                    Direction::ToHost => "guest",
                    Direction::ToGuest => "host",
                };
                let mut text = format!(
                    "{owner}_{}_view({input}, item => {}, item => {}",
                    kind.name().to_lowercase(),
                    element.to_host.render(Direction::ToHost, "item"),
                    element.to_guest.render(Direction::ToGuest, "item"),
                );
                if let Some(key) = key {
                    text.push_str(&format!(
                        ", key => {}, key => {}",
                        key.to_host.render(Direction::ToHost, "key"),
                        key.to_guest.render(Direction::ToGuest, "key"),
                    ));
                }
                text.push(')');
                text
            }
            Self::Memory { element, read_only } => {
                let access = if *read_only { "readonly " } else { "" };
                match direction {
                    Direction::ToHost => format!("host_memory<{access}{element}>({input})"),
                    Direction::ToGuest => format!("{}({input}.buffer)", element.typed_array_name()),
                }
            }
            Self::Delegate { params, ret } => {
                let args: Vec<String> = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| p.render(direction.flip(), &format!("a{i}")))
                    .collect();
                let names: Vec<String> = (0..params.len()).map(|i| format!("a{i}")).collect();
                let call = format!("{input}({})", args.join(", "));
                let body = match ret {
                    Some(ret) => ret.render(direction, &call),
                    None => call,
                };
                format!("forward_function(({}) => {body})", names.join(", "))
            }
            Self::Task(inner) => {
                let settle = inner
                    .as_ref()
                    .map(|c| c.render(direction, "r"))
                    .unwrap_or_else(|| "undefined".to_string());
                match direction {
                    Direction::ToGuest => format!("promise_from_task({input}, r => {settle})"),
                    Direction::ToHost => format!("task_from_promise({input}, r => {settle})"),
                }
            }
            Self::Tuple(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c.render(direction, &format!("{input}[{i}]")))
                    .collect();
                match direction {
                    Direction::ToGuest => format!("[{}]", parts.join(", ")),
                    Direction::ToHost => format!("tuple({})", parts.join(", ")),
                }
            }
            Self::Enum(path) => match direction {
                Direction::ToHost => format!("enum_from_number<{path}>({input})"),
                Direction::ToGuest => format!("enum_to_number({input})"),
            },
        }
    }
}

/// A conversion applied to a concrete value inside an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionExpr {
    pub direction: Direction,
    pub input: ValueExpr,
    pub op: Conversion,
}

impl ConversionExpr {
    pub fn new(direction: Direction, input: ValueExpr, op: Conversion) -> Self {
        Self { direction, input, op }
    }

    pub fn render(&self) -> String {
        self.op.render(self.direction, &self.input.to_string())
    }
}

impl fmt::Display for ConversionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests;
