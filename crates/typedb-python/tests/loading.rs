//! Module loading, load batches and database lifecycle.
//!
//! Each test builds a synthetic database directory, then checks loading
//! behavior through the public query interface.

mod support;

use std::path::Path;
use std::sync::{Arc, Mutex};

use typedb_core::fs::{MemoryFs, OsFs};
use typedb_core::version::LanguageVersion;
use typedb_python::{
    CorruptionReport, DatabaseConfig, DatabaseError, DatabaseOptions, LoadState, Member,
    PythonModule, TypeDatabase,
};

use support::*;

fn open(dir: &DbDir) -> TypeDatabase {
    let db = TypeDatabase::new(LanguageVersion::V3_8, Arc::new(OsFs));
    db.load_database(dir.path()).unwrap();
    db
}

fn collect_reports(db: &TypeDatabase) -> Arc<Mutex<Vec<CorruptionReport>>> {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    db.add_listener(Arc::new(move |report: &CorruptionReport| {
        sink.lock().unwrap().push(report.clone());
    }));
    reports
}

// ============================================================================
// Self-Referential Types
// ============================================================================

#[test]
fn test_self_base_loads_without_recursion() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module("m", vec![("C", class(vec![type_ref("m", "C")], vec![]))]);
    let db = open(&dir);

    let module = db.get_module("m").unwrap();
    let Some(Member::Type(c)) = module.get_member(&db, "C") else {
        panic!("C should be a type");
    };
    assert!(c.base_slots().is_complete());
    let mro = c.mro();
    assert_eq!(mro.len(), 1);
    assert!(Arc::ptr_eq(&mro[0], &c));
    assert_eq!(db.reader().pending_fixups(), 0);
}

#[test]
fn test_mro_follows_resolved_bases() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module(
        "m",
        vec![
            ("A", class(vec![builtin_ref("object")], vec![])),
            ("B", class(vec![type_ref("m", "A")], vec![])),
        ],
    );
    let db = open(&dir);
    let module = db.get_module("m").unwrap();
    let b = module.get_member(&db, "B").unwrap();
    let names: Vec<String> =
        b.as_type().unwrap().mro().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["B", "A", "object"]);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_ensure_loaded_twice_keeps_identities() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module(
        "m",
        vec![
            ("T", class(vec![], vec![])),
            ("f", function(builtin_ref("int"))),
        ],
    );
    let db = open(&dir);
    let module = db.get_module("m").unwrap();

    module.ensure_loaded(&db);
    let names = module.member_names(&db);
    let t = module.get_member(&db, "T").unwrap();
    let f = module.get_member(&db, "f").unwrap();

    module.ensure_loaded(&db);
    assert_eq!(module.member_names(&db), names);
    assert!(module.get_member(&db, "T").unwrap().ptr_eq(&t));
    assert!(module.get_member(&db, "f").unwrap().ptr_eq(&f));
}

// ============================================================================
// Partial Failure
// ============================================================================

#[test]
fn test_truncated_module_keeps_complete_members() {
    let dir = DbDir::new();
    let bytes = module_file(vec![
        ("member_1", class(vec![], vec![])),
        ("member_2", constant(builtin_ref("int"))),
        ("member_3", class(vec![], vec![])),
        ("member_4", class(vec![], vec![])),
    ]);
    let key = b"member_3";
    let at = bytes.windows(key.len()).position(|w| w == key).unwrap();
    // Cut before the BINUNICODE opcode and length that introduce the key.
    dir.write("m.idb", &bytes[..at - 5]);
    let db = open(&dir);
    let reports = collect_reports(&db);

    let module = db.get_module("m").unwrap();
    assert_eq!(module.member_names(&db), vec!["member_1", "member_2"]);
    assert!(module.is_loaded());
    assert!(module.get_member(&db, "member_3").is_none());

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].module, "m");
}

#[test]
fn test_corrupt_member_record_is_reported_once() {
    let dir = DbDir::new();
    dir.module(
        "m",
        vec![
            ("good", class(vec![], vec![])),
            ("bad", typedb_core::pickle::RawValue::Int(7)),
            ("worse", typedb_core::pickle::RawValue::from("nope")),
        ],
    );
    let db = open(&dir);
    let reports = collect_reports(&db);
    let module = db.get_module("m").unwrap();
    assert_eq!(module.member_names(&db), vec!["good"]);
    module.ensure_loaded(&db);
    assert_eq!(reports.lock().unwrap().len(), 1);
}

#[test]
fn test_garbage_module_is_empty_and_reported() {
    let dir = DbDir::new();
    dir.write("m.idb", b"\x80\x09garbage");
    let db = open(&dir);
    let reports = collect_reports(&db);
    let module = db.get_module("m").unwrap();
    assert!(module.member_names(&db).is_empty());
    assert_eq!(reports.lock().unwrap().len(), 1);
}

#[test]
fn test_missing_backing_file_is_empty_module() {
    let dir = DbDir::new();
    let path = dir.module("m", vec![("x", class(vec![], vec![]))]);
    let db = open(&dir);
    std::fs::remove_file(path).unwrap();
    let reports = collect_reports(&db);
    let module = db.get_module("m").unwrap();
    assert!(module.get_member(&db, "x").is_none());
    assert_eq!(module.load_state(), LoadState::Loaded);
    assert!(reports.lock().unwrap().is_empty());
}

// ============================================================================
// Load Batches
// ============================================================================

#[test]
fn test_mutual_references_resolve_in_one_batch() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module(
        "a",
        vec![
            ("TA", class(vec![], vec![])),
            ("uses_b", function(type_ref("b", "TB"))),
        ],
    );
    dir.module(
        "b",
        vec![
            ("TB", class(vec![], vec![])),
            ("uses_a", function(type_ref("a", "TA"))),
        ],
    );
    let db = open(&dir);
    let a = db.get_module("a").unwrap();
    let b = db.get_module("b").unwrap();
    {
        let _batch = db.begin_load();
        a.ensure_loaded(&db);
        b.ensure_loaded(&db);
    }
    assert_eq!(db.reader().pending_fixups(), 0);

    let ta = a.get_member(&db, "TA").unwrap();
    let tb = b.get_member(&db, "TB").unwrap();
    let uses_b = a.get_member(&db, "uses_b").unwrap();
    let uses_a = b.get_member(&db, "uses_a").unwrap();
    let ret_b = uses_b.as_function().unwrap().overloads()[0].return_types();
    let ret_a = uses_a.as_function().unwrap().overloads()[0].return_types();
    assert!(Member::Type(Arc::clone(&ret_b[0])).ptr_eq(&tb));
    assert!(Member::Type(Arc::clone(&ret_a[0])).ptr_eq(&ta));
}

#[test]
fn test_forward_base_across_modules_resolves_by_fixup() {
    let dir = DbDir::new();
    dir.builtins();
    // a.Derived(b.Base) and b.Base's method returns a.Derived
    dir.module("a", vec![("Derived", class(vec![type_ref("b", "Base")], vec![]))]);
    dir.module(
        "b",
        vec![(
            "Base",
            class(vec![], vec![("clone", function(type_ref("a", "Derived")))]),
        )],
    );
    let db = open(&dir);
    let a = db.get_module("a").unwrap();
    let derived = a.get_member(&db, "Derived").unwrap();
    let derived = derived.as_type().unwrap();
    assert_eq!(derived.bases()[0].name(), "Base");

    let b = db.get_module("b").unwrap();
    let base = b.get_member(&db, "Base").unwrap();
    let clone = base.as_type().unwrap().get_member("clone").unwrap();
    let returns = clone.as_function().unwrap().overloads()[0].return_types();
    assert!(Arc::ptr_eq(&returns[0], derived));
}

#[test]
fn test_unresolvable_reference_leaves_field_empty() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module("m", vec![("f", function(type_ref("nowhere", "Thing")))]);
    let db = open(&dir);
    let module = db.get_module("m").unwrap();
    let f = module.get_member(&db, "f").unwrap();
    let overload = &f.as_function().unwrap().overloads()[0];
    assert!(overload.return_types().is_empty());
    assert!(db.fixup_stats().dropped >= 1);
    assert_eq!(db.reader().pending_fixups(), 0);
}

// ============================================================================
// Existence Fast Path
// ============================================================================

#[test]
fn test_memlist_probe_never_opens_corrupt_module() {
    let fs = Arc::new(MemoryFs::new());
    fs.insert("/db/m.idb", b"\x80\x02}garbage".to_vec());
    fs.insert("/db/m.idb.$memlist", b"real_member\nother\n".to_vec());
    let db = TypeDatabase::new(LanguageVersion::V3_8, fs.clone());
    db.load_database(Path::new("/db")).unwrap();
    let reports = collect_reports(&db);

    let module = db.get_module("m").unwrap();
    assert!(module.get_member(&db, "nonexistent").is_none());
    assert_eq!(fs.read_count(Path::new("/db/m.idb")), 0);
    assert!(reports.lock().unwrap().is_empty());

    assert!(module.get_member(&db, "real_member").is_none());
    assert_eq!(fs.read_count(Path::new("/db/m.idb")), 1);
    assert_eq!(reports.lock().unwrap().len(), 1);
}

// ============================================================================
// Clone Isolation
// ============================================================================

#[test]
fn test_clone_has_independent_module_table() {
    let dir = DbDir::new();
    dir.builtins();
    let db = open(&dir);
    let db2 = db.clone();
    let m = Arc::new(PythonModule::empty("x"));
    db2.add_module("x", Arc::clone(&m));

    assert!(db.get_module("x").is_none());
    assert!(Arc::ptr_eq(&db2.get_module("x").unwrap(), &m));
    assert!(Arc::ptr_eq(
        &db.get_module("builtins").unwrap(),
        &db2.get_module("builtins").unwrap()
    ));
}

#[test]
fn test_clone_with_builtins_replaces_builtin_module() {
    let dir = DbDir::new();
    dir.builtins();
    let db = open(&dir);
    let replacement = Arc::new(PythonModule::empty("builtins"));
    let db2 = db.clone_with_builtins(Arc::clone(&replacement));
    assert!(Arc::ptr_eq(&db2.builtin_module().unwrap(), &replacement));
    assert!(!Arc::ptr_eq(&db.builtin_module().unwrap(), &replacement));
}

#[test]
fn test_shared_module_loaded_through_clone_resolves_in_source() {
    let dir = DbDir::new();
    dir.builtins();
    dir.module("m", vec![("c", constant(type_ref("x", "X")))]);
    let db = open(&dir);

    let overlay = DbDir::new();
    overlay.module("x", vec![("X", class(vec![], vec![]))]);
    let project = db.clone();
    project.load_database(overlay.path()).unwrap();

    // The first load of `m` happens through the clone.
    let m = project.get_module("m").unwrap();
    let c = m.get_member(&project, "c").unwrap();
    let Member::Constant(constant) = c else {
        panic!("expected a constant");
    };
    assert!(constant.types().is_empty());
    assert!(db.get_module("x").is_none());

    let x = project.get_module("x").unwrap();
    assert!(x.get_member(&project, "X").unwrap().as_type().is_some());
    assert_eq!(db.reader().pending_fixups(), 0);
    assert_eq!(project.reader().pending_fixups(), 0);
}

// ============================================================================
// Default Database
// ============================================================================

#[test]
fn test_create_default_preloads_in_one_batch() {
    let dir = DbDir::new();
    dir.builtins();
    dir.write("database.ver", "26\n");
    dir.module("a", vec![("f", function(type_ref("b", "T")))]);
    dir.module("b", vec![("T", class(vec![builtin_ref("object")], vec![]))]);

    let config = DatabaseConfig::new(LanguageVersion::V3_8).with_path(dir.path());
    let db = TypeDatabase::create_default(&config).unwrap();
    assert_eq!(db.module_names(), vec!["a", "b", "builtins"]);
    assert!(db.modules().iter().all(|m| m.is_loaded()));
    assert!(TypeDatabase::is_database_version_current(&OsFs, dir.path()));
    assert_eq!(db.reader().depth(), 0);
    assert_eq!(db.reader().pending_fixups(), 0);

    let f = db.get_module("a").unwrap().get_member(&db, "f").unwrap();
    assert_eq!(f.as_function().unwrap().overloads()[0].return_types()[0].name(), "T");
}

#[test]
fn test_create_default_without_preload_stays_lazy() {
    let dir = DbDir::new();
    dir.builtins();
    let config = DatabaseConfig::new(LanguageVersion::V3_8)
        .with_path(dir.path())
        .with_options(DatabaseOptions::default().with_preload(false));
    let db = TypeDatabase::create_default(&config).unwrap();
    assert!(db.modules().iter().all(|m| !m.is_loaded()));
}

#[test]
fn test_create_default_requires_path() {
    let config = DatabaseConfig::new(LanguageVersion::V3_8);
    let err = TypeDatabase::create_default(&config).unwrap_err();
    assert!(matches!(err, DatabaseError::MissingDatabasePath));
}
