//! Integration tests for the CLI commands against a database on disk.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use typedb::commands::{
    find_member, open_database, run_check, run_dump, run_modules, run_show, ShowResponse,
};
use typedb_core::error::TypeDbError;
use typedb_core::fs::OsFs;
use typedb_core::pickle::{encode, RawValue};
use typedb_core::version::LanguageVersion;
use typedb_python::{DatabaseConfig, DatabaseOptions, MemberKind};

// ============================================================================
// Fixtures
// ============================================================================

fn type_ref(module: &str, name: &str) -> RawValue {
    RawValue::tuple([RawValue::from(module), RawValue::from(name)])
}

fn class(bases: Vec<RawValue>, members: Vec<(&str, RawValue)>) -> RawValue {
    RawValue::dict([
        ("kind", RawValue::from("type")),
        (
            "value",
            RawValue::dict([
                ("bases", RawValue::list(bases)),
                ("members", RawValue::dict(members)),
            ]),
        ),
    ])
}

fn function(ret_type: RawValue) -> RawValue {
    RawValue::dict([
        ("kind", RawValue::from("function")),
        (
            "value",
            RawValue::dict([
                ("doc", RawValue::from("Join paths.")),
                (
                    "args",
                    RawValue::list([RawValue::dict([
                        ("name", RawValue::from("parts")),
                        ("arg_format", RawValue::from("*")),
                    ])]),
                ),
                ("ret_type", ret_type),
            ]),
        ),
    ])
}

fn write_module(dir: &Path, name: &str, members: Vec<(&str, RawValue)>) {
    let bytes = encode(&RawValue::dict([
        ("doc", RawValue::from(format!("The {} module.", name))),
        ("members", RawValue::dict(members)),
    ]));
    fs::write(dir.join(format!("{}.idb", name)), bytes).unwrap();
}

/// A small database: builtins, `os.path` with a function, and `shapes`
/// with a class hierarchy.
fn sample_db() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_module(
        dir.path(),
        "builtins",
        vec![
            ("object", class(vec![], vec![])),
            ("str", class(vec![type_ref("", "object")], vec![])),
        ],
    );
    write_module(dir.path(), "os.path", vec![("join", function(type_ref("", "str")))]);
    write_module(
        dir.path(),
        "shapes",
        vec![
            (
                "Shape",
                class(
                    vec![type_ref("", "object")],
                    vec![("area", function(type_ref("", "str")))],
                ),
            ),
            ("Circle", class(vec![type_ref("shapes", "Shape")], vec![])),
        ],
    );
    fs::write(dir.path().join("database.ver"), "26\n").unwrap();
    dir
}

fn config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig::new(LanguageVersion::V3_8)
        .with_path(dir)
        .with_options(DatabaseOptions::default().with_preload(false))
}

// ============================================================================
// modules / show
// ============================================================================

#[test]
fn test_modules_lists_sorted_and_lazy() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();
    let response = run_modules(&db);
    let names: Vec<&str> = response.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["builtins", "os.path", "shapes"]);
    assert!(response.modules.iter().all(|m| !m.loaded));
}

#[test]
fn test_show_module_lists_members() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();
    let ShowResponse::Module(response) = run_show(&db, "shapes", None).unwrap() else {
        panic!("expected a module listing");
    };
    assert_eq!(response.doc.as_deref(), Some("The shapes module."));
    let names: Vec<&str> = response.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Circle", "Shape"]);
    assert!(response.members.iter().all(|m| m.kind == MemberKind::Type));
}

#[test]
fn test_show_function_detail() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();
    let ShowResponse::Member(response) = run_show(&db, "os.path", Some("join")).unwrap() else {
        panic!("expected member detail");
    };
    let detail = response.member;
    assert_eq!(detail.kind, MemberKind::Function);
    assert_eq!(detail.doc.as_deref(), Some("Join paths."));
    assert_eq!(detail.overloads.len(), 1);
    assert_eq!(detail.overloads[0].parameters[0].name, "parts");
    assert_eq!(detail.overloads[0].returns, vec!["builtins.str"]);

    let json = serde_json::to_value(&detail).unwrap();
    assert_eq!(json["overloads"][0]["parameters"][0]["kind"], "var_args");
}

#[test]
fn test_show_type_detail_has_mro() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();
    let ShowResponse::Member(response) = run_show(&db, "shapes", Some("Circle")).unwrap() else {
        panic!("expected member detail");
    };
    assert_eq!(response.member.bases, vec!["shapes.Shape"]);
    assert_eq!(response.member.mro, vec!["shapes.Circle", "shapes.Shape", "builtins.object"]);
}

#[test]
fn test_inherited_member_path() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();
    let shapes = db.get_module("shapes").unwrap();
    let area = find_member(&db, &shapes, "Circle.area").unwrap();
    assert_eq!(area.kind(), MemberKind::Function);
}

#[test]
fn test_show_missing_module_and_member() {
    let dir = sample_db();
    let db = open_database(&config(dir.path())).unwrap();

    let err = run_show(&db, "nosuch", None).unwrap_err();
    assert!(matches!(err, TypeDbError::ModuleNotFound { .. }));

    let err = run_show(&db, "shapes", Some("Square")).unwrap_err();
    assert!(matches!(err, TypeDbError::MemberNotFound { .. }));
    assert_eq!(err.error_code().code(), 3);
}

#[test]
fn test_show_imports_from_search_path() {
    let dir = sample_db();
    let extra = TempDir::new().unwrap();
    write_module(extra.path(), "vendored", vec![("Thing", class(vec![], vec![]))]);
    let db = open_database(&config(dir.path()).with_search_path(extra.path())).unwrap();

    let ShowResponse::Module(response) = run_show(&db, "vendored", None).unwrap() else {
        panic!("expected a module listing");
    };
    assert_eq!(response.members.len(), 1);
}

// ============================================================================
// check
// ============================================================================

#[test]
fn test_check_clean_database() {
    let dir = sample_db();
    let response = run_check(&config(dir.path())).unwrap();
    assert!(response.is_clean());
    assert!(response.version_current);
    assert!(!response.regenerating);
    assert_eq!(response.modules, 3);
    assert_eq!(response.language_version, "3.8");
}

#[test]
fn test_check_reports_corrupt_module() {
    let dir = sample_db();
    fs::write(dir.path().join("broken.idb"), b"\x80\x02}q\x00(X").unwrap();
    fs::write(dir.path().join("database.pid"), "1234").unwrap();

    let response = run_check(&config(dir.path())).unwrap();
    assert!(!response.is_clean());
    assert_eq!(response.corrupt.len(), 1);
    assert_eq!(response.corrupt[0].module, "broken");
    assert!(response.regenerating);
}

#[test]
fn test_check_counts_dropped_references() {
    let dir = sample_db();
    write_module(dir.path(), "dangling", vec![("f", function(type_ref("gone", "Missing")))]);
    let response = run_check(&config(dir.path())).unwrap();
    assert!(response.is_clean());
    assert!(response.fixups.dropped >= 1);
}

#[test]
fn test_check_requires_path() {
    let err = run_check(&DatabaseConfig::new(LanguageVersion::V3_8)).unwrap_err();
    assert!(matches!(err, TypeDbError::InvalidArguments { .. }));
}

// ============================================================================
// dump
// ============================================================================

#[test]
fn test_dump_complete_file() {
    let dir = sample_db();
    let response = run_dump(&OsFs, &dir.path().join("shapes.idb")).unwrap();
    assert!(response.complete);
    assert!(response.error.is_none());
    let value = response.value.unwrap();
    assert_eq!(value.get("doc").and_then(RawValue::as_str), Some("The shapes module."));
}

#[test]
fn test_dump_truncated_file_salvages_prefix() {
    let dir = sample_db();
    let bytes = fs::read(dir.path().join("shapes.idb")).unwrap();
    let cut = dir.path().join("cut.idb");
    fs::write(&cut, &bytes[..bytes.len() / 2]).unwrap();

    let response = run_dump(&OsFs, &cut).unwrap();
    assert!(!response.complete);
    assert!(response.error.is_some());
}

#[test]
fn test_dump_missing_file_is_internal_error() {
    let dir = TempDir::new().unwrap();
    let err = run_dump(&OsFs, &dir.path().join("absent.idb")).unwrap_err();
    assert_eq!(err.error_code().code(), 10);
}
