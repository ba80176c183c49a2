//! Source text for emitted adapters
//!
//! The listing is deterministic for a given descriptor set, so generated
//! modules diff cleanly between builds.

use std::fmt::Write;

use super::{AdapterCode, AdapterKind};
use crate::model::DefaultValue;

fn default_literal(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Null => "null".to_string(),
        DefaultValue::Bool(b) => b.to_string(),
        DefaultValue::Number(n) => n.to_string(),
        DefaultValue::String(s) => format!("{s:?}"),
    }
}

pub(super) fn adapter_source(code: &AdapterCode) -> String {
    let mut out = String::new();
    let signature = if code.kind == AdapterKind::Getter { "this" } else { "this, args" };
    let _ = writeln!(out, "// {} ({:?})", code.symbol, code.kind);
    let _ = writeln!(out, "fn {}({signature}) {{", code.name);

    let mut call_args = Vec::new();
    if let Some(receiver) = &code.receiver {
        let _ = writeln!(out, "    let receiver = {};", receiver.render());
        call_args.push("receiver".to_string());
    }
    for (index, param) in code.params.iter().enumerate() {
        let converted = param.conversion.render();
        match &param.default {
            Some(default) => {
                let _ = writeln!(
                    out,
                    "    let {} = args.length > {index} ? {converted} : {};",
                    param.name,
                    default_literal(default)
                );
            }
            None => {
                let _ = writeln!(out, "    let {} = {converted};", param.name);
            }
        }
        call_args.push(param.name.clone());
    }

    let call = format!("{}({})", code.binding, call_args.join(", "));
    match (code.kind, &code.result) {
        (AdapterKind::Constructor, None) => {
            let _ = writeln!(out, "    let instance = {call};");
            let _ = writeln!(out, "    proxy_attach(this, instance, \"{}\");", code.declaring);
            let _ = writeln!(out, "    return this;");
        }
        (_, Some(result)) => {
            let _ = writeln!(out, "    let result = {call};");
            let _ = writeln!(out, "    return {};", result.render());
        }
        (_, None) => {
            let _ = writeln!(out, "    {call};");
            let _ = writeln!(out, "    return undefined;");
        }
    }
    out.push_str("}\n");
    out
}
