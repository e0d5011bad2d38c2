//! Python type database for typedb.
//!
//! This crate loads the precomputed Python type database and resolves
//! symbols across modules. It includes:
//! - Member records parsed from decoded module files ([`record`])
//! - The resolved member graph ([`members`], [`multiple`])
//! - The reader and its fixup queue for forward and cyclic references
//!   ([`reader`])
//! - Lazily loaded modules with a memlist existence fast path ([`module`])
//! - The database aggregate and its factory configuration ([`database`],
//!   [`config`])
//! - Builtin type ids and MRO linearization ([`builtins`], [`mro`])

pub mod builtins;
pub mod config;
pub mod database;
pub mod members;
pub mod module;
pub mod mro;
pub mod multiple;
pub mod reader;
pub mod record;
mod sink;

pub use builtins::BuiltinTypeId;
pub use config::{DatabaseConfig, DatabaseOptions, TypeDatabaseFactory};
pub use database::{
    CorruptionListener, CorruptionReport, DatabaseError, DatabaseResult, TypeDatabase,
};
pub use members::{Member, MemberKind, PythonType};
pub use module::{LoadState, PythonModule};
pub use multiple::PythonMultipleMembers;
pub use reader::FixupStats;
