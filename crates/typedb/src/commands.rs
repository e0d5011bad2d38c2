//! Command implementations for the typedb CLI.
//!
//! Each command builds its response without printing it, so the same code
//! serves the binary and the integration tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use typedb_core::error::TypeDbError;
use typedb_core::fs::DatabaseFs;
use typedb_core::pickle::decode_prefix;
use typedb_core::version::LanguageVersion;
use typedb_python::module::MODULE_KEEP_OPEN;
use typedb_python::{
    CorruptionReport, DatabaseOptions, Member, PythonModule, TypeDatabase, TypeDatabaseFactory,
};

use crate::output::{
    CheckResponse, CorruptionView, DumpResponse, MemberDetail, MemberResponse, MemberSummary,
    ModuleResponse, ModuleSummary, ModulesResponse, SCHEMA_VERSION,
};

/// Open the database described by `factory`.
pub fn open_database(factory: &dyn TypeDatabaseFactory) -> Result<TypeDatabase, TypeDbError> {
    TypeDatabase::create_default(factory).map_err(TypeDbError::from)
}

// ============================================================================
// modules
// ============================================================================

pub fn run_modules(db: &TypeDatabase) -> ModulesResponse {
    let modules = db
        .modules()
        .iter()
        .map(|module| ModuleSummary {
            name: module.name().to_string(),
            loaded: module.is_loaded(),
        })
        .collect();
    ModulesResponse::new(modules)
}

// ============================================================================
// show
// ============================================================================

/// Response for `show`: a module listing or one member's detail.
#[derive(Debug)]
pub enum ShowResponse {
    Module(ModuleResponse),
    Member(MemberResponse),
}

/// Find a module, importing it from the search paths if needed.
pub fn find_module(db: &TypeDatabase, name: &str) -> Result<Arc<PythonModule>, TypeDbError> {
    db.import_module(name).ok_or_else(|| TypeDbError::ModuleNotFound {
        name: name.to_string(),
    })
}

/// Walk a dotted member path (`Outer.Inner.method`) from a module.
pub fn find_member(
    db: &TypeDatabase,
    module: &Arc<PythonModule>,
    path: &str,
) -> Result<Member, TypeDbError> {
    let not_found = || TypeDbError::MemberNotFound {
        module: module.name().to_string(),
        member: path.to_string(),
    };
    let mut parts = path.split('.');
    let first = parts.next().ok_or_else(not_found)?;
    let mut current = module.get_member(db, first).ok_or_else(not_found)?;
    for part in parts {
        current = match &current {
            Member::Type(ty) => ty.lookup_member(part),
            Member::Module(module) => module.get_member(db, part),
            _ => None,
        }
        .ok_or_else(not_found)?;
    }
    Ok(current)
}

pub fn run_show(
    db: &TypeDatabase,
    module_name: &str,
    member: Option<&str>,
) -> Result<ShowResponse, TypeDbError> {
    let module = find_module(db, module_name)?;
    match member {
        Some(path) => {
            let found = find_member(db, &module, path)?;
            let detail = MemberDetail::describe(path, &found);
            Ok(ShowResponse::Member(MemberResponse::new(module.name(), detail)))
        }
        None => {
            let info = module.info(db);
            let members = module
                .member_names(db)
                .into_iter()
                .filter_map(|name| {
                    let kind = module.get_member(db, &name)?.kind();
                    Some(MemberSummary { name, kind })
                })
                .collect();
            Ok(ShowResponse::Module(ModuleResponse {
                status: "ok".to_string(),
                schema_version: SCHEMA_VERSION.to_string(),
                module: module.name().to_string(),
                doc: info.doc,
                filename: info.filename,
                children: info.children,
                members,
            }))
        }
    }
}

// ============================================================================
// check
// ============================================================================

/// Load every module in one batch and report what failed.
///
/// The factory's preload option is ignored: loading happens after the
/// corruption listener is attached.
pub fn run_check(factory: &dyn TypeDatabaseFactory) -> Result<CheckResponse, TypeDbError> {
    let dir = factory
        .database_path()
        .ok_or_else(|| TypeDbError::invalid_args("check needs a database directory"))?;
    let fs = factory.fs();
    let options = factory.options().with_preload(false);
    let lazy = CheckFactory { inner: factory, options };
    let db = TypeDatabase::create_default(&lazy)?;

    let reports: Arc<Mutex<Vec<CorruptionReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    db.add_listener(Arc::new(move |report: &CorruptionReport| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(report.clone());
    }));

    let modules = db.modules();
    {
        let _batch = db.begin_load();
        for module in &modules {
            module.try_ensure_loaded(&db)?;
        }
    }
    let stats = db.fixup_stats();
    info!(
        "checked {} modules: {} references resolved, {} dropped, {} abandoned",
        modules.len(),
        stats.resolved,
        stats.dropped,
        stats.abandoned
    );

    let corrupt = reports
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(CorruptionView::from)
        .collect();
    Ok(CheckResponse {
        status: "ok".to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        language_version: db.version().to_string(),
        version_current: TypeDatabase::is_database_version_current(fs.as_ref(), &dir),
        regenerating: TypeDatabase::is_database_regenerating(fs.as_ref(), &dir),
        modules: modules.len(),
        fixups: stats,
        unresolved_module_refs: db.reader().parked_module_refs(),
        corrupt,
    })
}

/// Wraps a factory to override its options.
struct CheckFactory<'a> {
    inner: &'a dyn TypeDatabaseFactory,
    options: DatabaseOptions,
}

impl TypeDatabaseFactory for CheckFactory<'_> {
    fn database_path(&self) -> Option<PathBuf> {
        self.inner.database_path()
    }

    fn language_version(&self) -> LanguageVersion {
        self.inner.language_version()
    }

    fn search_paths(&self) -> Vec<PathBuf> {
        self.inner.search_paths()
    }

    fn options(&self) -> DatabaseOptions {
        self.options.clone()
    }

    fn fs(&self) -> Arc<dyn DatabaseFs> {
        self.inner.fs()
    }
}

// ============================================================================
// dump
// ============================================================================

/// Decode one database file as far as it goes.
pub fn run_dump(fs: &dyn DatabaseFs, file: &Path) -> Result<DumpResponse, TypeDbError> {
    let bytes = fs.read(file)?;
    debug!("decoding {} bytes from {}", bytes.len(), file.display());
    let decoded = decode_prefix(&bytes, MODULE_KEEP_OPEN);
    Ok(DumpResponse {
        status: "ok".to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        file: file.to_path_buf(),
        complete: decoded.is_complete(),
        error: decoded.error.as_ref().map(ToString::to_string),
        value: decoded.value,
    })
}
