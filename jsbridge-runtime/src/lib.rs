//! jsbridge runtime - the run-time half of the host/guest bridge
//!
//! Everything generated adapter code touches while a program runs lives here:
//! the host value model, the guest value-handle API (`JsEnv`) with an
//! in-memory engine, the guest execution context and its hand-off queue, the
//! proxy identity table and the overload resolver.

pub mod collections;
pub mod context;
pub mod error;
pub mod guest;
pub mod logging;
pub mod memory;
pub mod overload;
pub mod proxy;
pub mod task;
pub mod value;

pub use collections::{HostList, HostMap, HostSet, ListAccess, MapAccess, SetAccess};
pub use context::{ContextHandle, GuestContext, GuestReference};
pub use error::{ContextError, HostError, JsError, OverloadError};
pub use guest::{JsEnv, JsType, JsValue, MemoryEnv, NativeFn, ViewHandler, ViewKind};
pub use memory::{HostMemory, NumericKind, SharedBuffer};
pub use overload::{ArgKind, ClassHierarchy, CollectionShape, OverloadCandidate, ParamShape, ParamSpec};
pub use proxy::{ProxyGuard, ProxyState, ProxyTable};
pub use task::{HostTask, TaskCompleter};
pub use value::{HostFunction, HostObject, HostString, HostStruct, HostValue, ObjectId, WeakHostObject};
