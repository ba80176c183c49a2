//! Call path of exported members
//!
//! A guest call lands in one of three places: a bound adapter, which
//! converts the receiver and arguments, calls the host and converts the
//! result; an overload set, which picks an adapter per call; or a direct
//! binding, which sees the guest values untouched.

use jsbridge_runtime::error::JsResult;
use jsbridge_runtime::logging::{log_adapter_call, log_conversion_error, log_host_exception};
use jsbridge_runtime::overload::{self, ArgKind, OverloadCandidate};
use jsbridge_runtime::{HostError, HostValue, JsEnv, JsError, JsValue};

use crate::emit::{AdapterCode, ParamPlan};
use crate::link::bindings::HostCallable;
use crate::link::marshal::{within, Marshaller};
use crate::model::DefaultValue;

/// Generated adapter paired with the host member it calls.
#[derive(Debug, Clone)]
pub(crate) struct BoundAdapter {
    code: AdapterCode,
    callable: HostCallable,
}

impl BoundAdapter {
    pub(crate) fn new(code: AdapterCode, callable: HostCallable) -> Self {
        Self { code, callable }
    }

    pub(crate) fn code(&self) -> &AdapterCode {
        &self.code
    }

    /// Full call: arguments in, host call, result out.
    pub(crate) fn call(&self, env: &dyn JsEnv, marshaller: &Marshaller, this: JsValue, args: &[JsValue]) -> JsResult<JsValue> {
        if let HostCallable::Raw(f) = &self.callable {
            log_adapter_call(&self.code.name, args.len());
            return f(env, this, args);
        }
        let result = self.call_host(env, marshaller, this, args)?;
        match &self.code.result {
            Some(expr) => marshaller.to_guest(env, &expr.op, &result).map_err(|err| {
                log_conversion_error(&self.code.name, &err.to_string());
                within(err, &format!("{} result", self.code.symbol))
            }),
            None => Ok(JsValue::Undefined),
        }
    }

    /// Convert the receiver and arguments and call the host, returning the
    /// unconverted host result.
    pub(crate) fn call_host(
        &self,
        env: &dyn JsEnv,
        marshaller: &Marshaller,
        this: JsValue,
        args: &[JsValue],
    ) -> JsResult<HostValue> {
        log_adapter_call(&self.code.name, args.len());
        let HostCallable::Method(f) = &self.callable else {
            return Err(JsError::type_error(format!(
                "'{}' is bound to a raw host function",
                self.code.binding
            )));
        };

        let receiver = match &self.code.receiver {
            Some(expr) => Some(marshaller.to_host(env, &expr.op, this).map_err(|err| {
                log_conversion_error(&self.code.name, &err.to_string());
                within(err, &format!("{} receiver", self.code.symbol))
            })?),
            None => None,
        };

        let mut host_args = Vec::with_capacity(self.code.params.len());
        for (index, param) in self.code.params.iter().enumerate() {
            let supplied = args.get(index).copied().filter(|v| !v.is_undefined());
            let converted = match (supplied, &param.default) {
                (Some(value), _) => marshaller.to_host(env, &param.conversion.op, value),
                (None, Some(default)) => default_to_host(env, marshaller, param, default),
                (None, None) => marshaller.to_host(env, &param.conversion.op, JsValue::Undefined),
            };
            let converted = converted.map_err(|err| {
                log_conversion_error(&self.code.name, &err.to_string());
                within(err, &format!("{} parameter '{}'", self.code.symbol, param.name))
            })?;
            host_args.push(converted);
        }

        f(receiver.as_ref(), &host_args).map_err(|err| host_failure(&self.code.binding, err))
    }
}

fn default_to_host(
    env: &dyn JsEnv,
    marshaller: &Marshaller,
    param: &ParamPlan,
    default: &DefaultValue,
) -> JsResult<HostValue> {
    let guest = match default {
        DefaultValue::Null => return Ok(HostValue::Null),
        DefaultValue::Bool(b) => JsValue::Boolean(*b),
        DefaultValue::Number(n) => JsValue::Number(*n),
        DefaultValue::String(s) => env.create_string(s),
    };
    marshaller.to_host(env, &param.conversion.op, guest)
}

fn host_failure(binding: &str, err: HostError) -> JsError {
    log_host_exception(binding, &err.to_string());
    JsError::from(err)
}

/// Adapters sharing one external name. Resolution runs on every call.
#[derive(Debug, Clone)]
pub(crate) struct OverloadSet {
    member: String,
    adapters: Vec<BoundAdapter>,
    candidates: Vec<OverloadCandidate>,
}

impl OverloadSet {
    pub(crate) fn new(member: impl Into<String>, adapters: Vec<BoundAdapter>) -> Self {
        let candidates = adapters
            .iter()
            .map(|a| OverloadCandidate::new(a.code().param_specs()))
            .collect();
        Self {
            member: member.into(),
            adapters,
            candidates,
        }
    }

    pub(crate) fn call(&self, env: &dyn JsEnv, marshaller: &Marshaller, this: JsValue, args: &[JsValue]) -> JsResult<JsValue> {
        let kinds: Vec<ArgKind> = args
            .iter()
            .map(|v| ArgKind::of(env, *v, |value| marshaller.class_of(env, value)))
            .collect();
        let chosen = overload::resolve(&self.member, &self.candidates, &kinds, marshaller.hierarchy())?;
        let adapter = self
            .adapters
            .get(chosen)
            .ok_or_else(|| JsError::type_error(format!("no overload {chosen} of '{}'", self.member)))?;
        adapter.call(env, marshaller, this, args)
    }
}

/// Call a host member bound without adaptation. Method bindings see every
/// argument as `HostValue::Raw` and must return a raw guest value or null.
pub(crate) fn call_direct(
    env: &dyn JsEnv,
    marshaller: &Marshaller,
    callable: &HostCallable,
    binding: &str,
    instance: bool,
    this: JsValue,
    args: &[JsValue],
) -> JsResult<JsValue> {
    log_adapter_call(binding, args.len());
    let f = match callable {
        HostCallable::Raw(f) => return f(env, this, args),
        HostCallable::Method(f) => f,
    };
    let receiver = if instance {
        Some(match marshaller.state().proxies.from_guest(env, this)? {
            Some(object) => HostValue::Object(object),
            None => HostValue::Raw(this),
        })
    } else {
        None
    };
    let host_args: Vec<HostValue> = args.iter().map(|v| HostValue::Raw(*v)).collect();
    match f(receiver.as_ref(), &host_args).map_err(|err| host_failure(binding, err))? {
        HostValue::Raw(value) => Ok(value),
        HostValue::Null => Ok(JsValue::Undefined),
        other => Err(JsError::type_error(format!(
            "direct binding '{binding}' returned a host {}",
            other.type_name()
        ))),
    }
}
