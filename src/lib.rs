//! jsbridge: marshalling between a managed host runtime and a JavaScript
//! guest engine.
//!
//! The generator half (`classify`, `conversion`, `emit`, `export`,
//! `shape`) turns a [`model::ModuleDescriptor`] into adapters, export
//! tables and a declaration shape. The [`link`] half instantiates that
//! output inside a guest environment from `jsbridge_runtime`.

// Core modules
pub mod classify;
pub mod conversion;
pub mod emit;
pub mod errors;
pub mod export;
pub mod frontend;
pub mod infrastructure;
pub mod link;
pub mod model;
pub mod session;
pub mod shape;

// Re-export commonly used items
pub use errors::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
pub use frontend::{cli_main, ConfigError, GeneratorConfig};
pub use link::{HostBindings, LinkError, LinkedModule, Linker, Marshaller, RuntimeState};
pub use model::{MemberDescriptor, ModuleDescriptor, TypeDecl, TypeDescriptor, TypePath};
pub use session::{generate, GeneratedModule, GenerationError, Session};

pub use jsbridge_runtime as runtime;

