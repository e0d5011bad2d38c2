//! Builders for synthetic database files.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use typedb_core::pickle::{encode, RawValue};

pub fn type_ref(module: &str, name: &str) -> RawValue {
    RawValue::tuple([RawValue::from(module), RawValue::from(name)])
}

pub fn builtin_ref(name: &str) -> RawValue {
    type_ref("", name)
}

fn record(kind: &str, value: RawValue) -> RawValue {
    RawValue::dict([("kind", RawValue::from(kind)), ("value", value)])
}

pub fn class(bases: Vec<RawValue>, members: Vec<(&str, RawValue)>) -> RawValue {
    record(
        "type",
        RawValue::dict([
            ("bases", RawValue::list(bases)),
            ("members", RawValue::dict(members)),
        ]),
    )
}

pub fn hidden_class() -> RawValue {
    record(
        "type",
        RawValue::dict([
            ("is_hidden", RawValue::from(true)),
            ("members", RawValue::dict::<&str, _>([])),
        ]),
    )
}

pub fn function(ret_type: RawValue) -> RawValue {
    record(
        "function",
        RawValue::dict([
            ("doc", RawValue::from("a function")),
            ("args", RawValue::list([RawValue::dict([("name", RawValue::from("x"))])])),
            ("ret_type", ret_type),
        ]),
    )
}

pub fn constant(ty: RawValue) -> RawValue {
    record("data", RawValue::dict([("type", ty)]))
}

pub fn gated(mut member: RawValue, gate: &str) -> RawValue {
    if let RawValue::Dict(fields) = &mut member {
        fields.insert("version".to_string(), RawValue::from(gate));
    }
    member
}

pub fn module_ref(name: &str) -> RawValue {
    RawValue::dict([
        ("kind", RawValue::from("moduleref")),
        ("value", RawValue::tuple([RawValue::from(name)])),
    ])
}

pub fn type_alias(ty: RawValue) -> RawValue {
    RawValue::dict([("kind", RawValue::from("typeref")), ("value", ty)])
}

pub fn func_ref(path: &str) -> RawValue {
    record("funcref", RawValue::dict([("func_name", RawValue::from(path))]))
}

pub fn multiple(candidates: Vec<RawValue>) -> RawValue {
    record("multiple", RawValue::dict([("members", RawValue::list(candidates))]))
}

pub fn module_file(members: Vec<(&str, RawValue)>) -> Vec<u8> {
    encode(&RawValue::dict([
        ("doc", RawValue::from("synthetic module")),
        ("members", RawValue::dict(members)),
    ]))
}

/// A database directory on disk.
pub struct DbDir {
    dir: TempDir,
}

impl DbDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, file: &str, bytes: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(file);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn module(&self, name: &str, members: Vec<(&str, RawValue)>) -> PathBuf {
        self.write(&format!("{}.idb", name), module_file(members))
    }

    /// A minimal builtin module with `object`, `int` and `str`.
    pub fn builtins(&self) -> PathBuf {
        self.module(
            "builtins",
            vec![
                ("object", class(vec![], vec![])),
                ("int", class(vec![builtin_ref("object")], vec![])),
                ("str", class(vec![builtin_ref("object")], vec![])),
            ],
        )
    }
}
