//! Session-scoped struct and array codec table
//!
//! Each distinct struct type and each distinct array element type gets one
//! codec pair, whatever the number of members referring to it. Codec ids are
//! derived from the type's structural key, so re-requesting a codec returns
//! the name assigned the first time.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::{Bidi, Conversion, Direction};
use crate::model::{TypeDescriptor, TypePath};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodecRef {
    Struct(String),
    Array(String),
}

impl CodecRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Struct(id) | Self::Array(id) => id,
        }
    }
}

impl fmt::Display for CodecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCodec {
    /// Member name on the host struct.
    pub host_name: String,
    /// Property name on the guest object.
    pub js_name: String,
    pub conversion: Bidi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructCodec {
    pub id: String,
    pub path: TypePath,
    pub fields: Vec<FieldCodec>,
}

impl StructCodec {
    pub fn to_guest_name(&self) -> String {
        format!("__to_guest_{}", self.id)
    }

    pub fn to_host_name(&self) -> String {
        format!("__to_host_{}", self.id)
    }

    fn render(&self) -> String {
        let mut out = format!("// struct codec for {}\n", self.path);
        out.push_str(&format!("fn {}(value) {{\n    let obj = {{}};\n", self.to_guest_name()));
        for field in &self.fields {
            let input = format!("value.{}", field.host_name);
            out.push_str(&format!(
                "    obj.{} = {};\n",
                field.js_name,
                field.conversion.to_guest.render(Direction::ToGuest, &input)
            ));
        }
        out.push_str("    return obj;\n}\n");
        out.push_str(&format!(
            "fn {}(value) {{\n    let out = new {}();\n",
            self.to_host_name(),
            self.path
        ));
        for field in &self.fields {
            let input = format!("value.{}", field.js_name);
            out.push_str(&format!(
                "    out.{} = {};\n",
                field.host_name,
                field.conversion.to_host.render(Direction::ToHost, &input)
            ));
        }
        out.push_str("    return out;\n}\n");
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayCodec {
    pub id: String,
    pub element_type: TypeDescriptor,
    pub element: Bidi,
}

impl ArrayCodec {
    pub fn to_guest_name(&self) -> String {
        format!("__to_guest_{}", self.id)
    }

    pub fn to_host_name(&self) -> String {
        format!("__to_host_{}", self.id)
    }

    fn render(&self) -> String {
        format!(
            "// array codec for {elem}[]\n\
             fn {tg}(value) {{\n    let out = new Array(value.length);\n    \
             for (i in 0..value.length) out[i] = {eg};\n    return out;\n}}\n\
             fn {th}(value) {{\n    let out = new {elem}[value.length];\n    \
             for (i in 0..value.length) out[i] = {eh};\n    return out;\n}}\n",
            elem = self.element_type,
            tg = self.to_guest_name(),
            th = self.to_host_name(),
            eg = self.element.to_guest.render(Direction::ToGuest, "value[i]"),
            eh = self.element.to_host.render(Direction::ToHost, "value[i]"),
        )
    }
}

/// Stable codec id: readable stem plus a short blake3 digest of the key.
fn codec_id(kind: &str, stem: &str, key: &str) -> String {
    let digest = blake3::hash(key.as_bytes()).to_hex();
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{kind}_{stem}_{}", &digest.as_str()[..8])
}

#[derive(Debug, Clone, Default)]
pub struct CodecTable {
    structs: BTreeMap<String, StructCodec>,
    arrays: BTreeMap<String, ArrayCodec>,
    struct_ids: HashMap<TypePath, String>,
    array_ids: HashMap<TypeDescriptor, String>,
}

impl CodecTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id assigned to the struct codec of `path`, including one still being
    /// built.
    pub fn struct_id(&self, path: &TypePath) -> Option<&str> {
        self.struct_ids.get(path).map(String::as_str)
    }

    pub fn array_id(&self, element: &TypeDescriptor) -> Option<&str> {
        self.array_ids.get(element).map(String::as_str)
    }

    /// Assign an id before the codec's fields are built, so self-referential
    /// structs resolve to the codec under construction.
    pub(crate) fn reserve_struct(&mut self, path: &TypePath) -> String {
        self.struct_ids
            .entry(path.clone())
            .or_insert_with(|| codec_id("struct", &path.name, &path.to_string()))
            .clone()
    }

    pub(crate) fn reserve_array(&mut self, element: &TypeDescriptor) -> String {
        self.array_ids
            .entry(element.clone())
            .or_insert_with(|| codec_id("array", &element.path.name, &element.to_string()))
            .clone()
    }

    pub(crate) fn abandon_struct(&mut self, path: &TypePath) {
        if let Some(id) = self.struct_ids.remove(path) {
            self.structs.remove(&id);
        }
    }

    pub(crate) fn abandon_array(&mut self, element: &TypeDescriptor) {
        if let Some(id) = self.array_ids.remove(element) {
            self.arrays.remove(&id);
        }
    }

    pub(crate) fn insert_struct(&mut self, codec: StructCodec) {
        self.structs.insert(codec.id.clone(), codec);
    }

    pub(crate) fn insert_array(&mut self, codec: ArrayCodec) {
        self.arrays.insert(codec.id.clone(), codec);
    }

    pub fn get_struct(&self, id: &str) -> Option<&StructCodec> {
        self.structs.get(id)
    }

    pub fn get_array(&self, id: &str) -> Option<&ArrayCodec> {
        self.arrays.get(id)
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructCodec> {
        self.structs.values()
    }

    pub fn arrays(&self) -> impl Iterator<Item = &ArrayCodec> {
        self.arrays.values()
    }

    pub fn len(&self) -> usize {
        self.structs.len() + self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dependencies(&self, codec: &CodecRef) -> Vec<CodecRef> {
        let mut out = Vec::new();
        match codec {
            CodecRef::Struct(id) => {
                if let Some(codec) = self.structs.get(id) {
                    for field in &codec.fields {
                        field.conversion.to_guest.codec_refs(&mut out);
                        field.conversion.to_host.codec_refs(&mut out);
                    }
                }
            }
            CodecRef::Array(id) => {
                if let Some(codec) = self.arrays.get(id) {
                    codec.element.to_guest.codec_refs(&mut out);
                    codec.element.to_host.codec_refs(&mut out);
                }
            }
        }
        out
    }

    /// Codecs ordered so that each comes after the codecs it calls. Cycles
    /// (self-referential structs) fall back to id order.
    pub fn emission_order(&self) -> Vec<CodecRef> {
        let refs: Vec<CodecRef> = self
            .structs
            .keys()
            .map(|id| CodecRef::Struct(id.clone()))
            .chain(self.arrays.keys().map(|id| CodecRef::Array(id.clone())))
            .collect();

        let mut graph: DiGraph<CodecRef, ()> = DiGraph::new();
        let nodes: HashMap<CodecRef, NodeIndex> = refs
            .iter()
            .map(|r| (r.clone(), graph.add_node(r.clone())))
            .collect();
        for codec in &refs {
            for dependency in self.dependencies(codec) {
                if let (Some(&from), Some(&to)) = (nodes.get(&dependency), nodes.get(codec)) {
                    if from != to {
                        graph.update_edge(from, to, ());
                    }
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|n| graph[n].clone()).collect(),
            Err(_) => refs,
        }
    }

    /// Generated source of every codec, in emission order.
    pub fn render(&self) -> String {
        self.emission_order()
            .iter()
            .filter_map(|codec| match codec {
                CodecRef::Struct(id) => self.structs.get(id).map(StructCodec::render),
                CodecRef::Array(id) => self.arrays.get(id).map(ArrayCodec::render),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Codec a conversion calls at its top level.
    pub fn lookup(&self, conversion: &Conversion) -> Option<CodecRef> {
        match conversion {
            Conversion::Struct { codec } if self.structs.contains_key(codec) => {
                Some(CodecRef::Struct(codec.clone()))
            }
            Conversion::Array { codec } if self.arrays.contains_key(codec) => {
                Some(CodecRef::Array(codec.clone()))
            }
            Conversion::Nullable(inner) => self.lookup(inner),
            _ => None,
        }
    }
}
