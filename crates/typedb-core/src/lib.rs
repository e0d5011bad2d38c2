//! Core infrastructure for typedb.
//!
//! This crate provides the language-agnostic pieces of the type database:
//! - The pickle-like primitive codec ([`pickle`]) that turns database files
//!   into [`pickle::RawValue`] trees and back
//! - The file-system collaborator ([`fs`]) every database read goes through
//! - Language version tags and version-gate parsing ([`version`])
//! - The unified error type and stable exit codes ([`error`])

pub mod error;
pub mod fs;
pub mod pickle;
pub mod version;
