//! Command-line inspection of a Python type database.
//!
//! The binary is a thin layer over [`commands`]: each command opens the
//! database through a [`typedb_python::DatabaseConfig`], builds one of the
//! JSON responses in [`output`], and prints it.

pub mod commands;
pub mod output;
