//! The type database aggregate.
//!
//! A [`TypeDatabase`] maps module names to [`PythonModule`]s and owns the
//! reader that resolves references between them. Modules are shared by
//! reference: [`TypeDatabase::clone`] copies the module table, not the
//! modules, so a per-project overlay can add modules to its clone without
//! touching the shared database. A lazy module always loads through the
//! database that registered it, whichever database asks for its members.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};

use thiserror::Error;
use tracing::{debug, info, warn};

use typedb_core::error::TypeDbError;
use typedb_core::fs::DatabaseFs;
use typedb_core::version::LanguageVersion;

use crate::builtins::{builtin_module_name, BuiltinTypeId, LEGACY_BUILTIN_MODULE};
use crate::config::{DatabaseOptions, TypeDatabaseFactory};
use crate::members::{Member, MemberLink, PythonType};
use crate::module::PythonModule;
use crate::reader::{FixupStats, LoadBatch, TypeDatabaseReader};

/// Version written to `database.ver` by a scraper of the current format.
pub const CURRENT_VERSION: u32 = 26;

/// Extension of module files.
pub const MODULE_EXTENSION: &str = "idb";

const VERSION_FILE: &str = "database.ver";
const REGENERATING_FILE: &str = "database.pid";

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the database aggregate.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database has no such builtin type.
    #[error("builtin type '{name}' not found in database")]
    NotFound { name: String },

    /// The factory supplied no database path.
    #[error("no type database path configured")]
    MissingDatabasePath,

    /// An I/O failure other than a missing or locked file.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A base database and an overlay disagree on language version.
    #[error("language version mismatch: expected {expected}, found {found}")]
    LanguageVersionMismatch {
        expected: LanguageVersion,
        found: LanguageVersion,
    },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<DatabaseError> for TypeDbError {
    fn from(err: DatabaseError) -> Self {
        let message = err.to_string();
        match err {
            DatabaseError::NotFound { name } => TypeDbError::MemberNotFound {
                module: "<builtins>".to_string(),
                member: name,
            },
            DatabaseError::Io { .. } => TypeDbError::InternalError { message },
            DatabaseError::MissingDatabasePath | DatabaseError::LanguageVersionMismatch { .. } => {
                TypeDbError::Configuration { message }
            }
        }
    }
}

// ============================================================================
// Corruption Reporting
// ============================================================================

/// A module whose backing file could not be fully decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    pub module: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Receives corruption reports. Called once per damaged module load.
pub trait CorruptionListener: Send + Sync {
    fn on_database_corrupt(&self, report: &CorruptionReport);
}

impl<F> CorruptionListener for F
where
    F: Fn(&CorruptionReport) + Send + Sync,
{
    fn on_database_corrupt(&self, report: &CorruptionReport) {
        self(report)
    }
}

// ============================================================================
// TypeDatabase
// ============================================================================

/// An additional directory served by its own file system, such as a
/// database directory packaged inside an archive.
#[derive(Clone)]
struct ArchivePath {
    root: PathBuf,
    fs: Arc<dyn DatabaseFs>,
}

/// Modules, the builtin module, and the reader that links them.
///
/// The contents live behind an [`Arc`] so that lazy modules can hold a weak
/// handle to the database that registered them and always load through it.
pub struct TypeDatabase {
    state: Arc<DatabaseState>,
}

pub(crate) struct DatabaseState {
    version: LanguageVersion,
    fs: Arc<dyn DatabaseFs>,
    options: DatabaseOptions,
    directory: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    archives: Vec<ArchivePath>,
    modules: RwLock<HashMap<String, Arc<PythonModule>>>,
    reader: TypeDatabaseReader,
    listeners: RwLock<Vec<Arc<dyn CorruptionListener>>>,
    /// The database this one was cloned from. Its modules are still bound to
    /// it, so it must outlive the clone.
    base: Option<Arc<DatabaseState>>,
}

impl DatabaseState {
    /// A copy with its own module table and a fresh reader.
    fn duplicate(&self) -> DatabaseState {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner()).clone();
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        DatabaseState {
            version: self.version,
            fs: Arc::clone(&self.fs),
            options: self.options.clone(),
            directory: self.directory.clone(),
            search_paths: self.search_paths.clone(),
            archives: self.archives.clone(),
            modules: RwLock::new(modules),
            reader: TypeDatabaseReader::new(&self.options),
            listeners: RwLock::new(listeners),
            base: self.base.clone(),
        }
    }
}

impl TypeDatabase {
    /// An empty database.
    pub fn new(version: LanguageVersion, fs: Arc<dyn DatabaseFs>) -> Self {
        let options = DatabaseOptions::default();
        let state = DatabaseState {
            version,
            fs,
            reader: TypeDatabaseReader::new(&options),
            options,
            directory: None,
            search_paths: Vec::new(),
            archives: Vec::new(),
            modules: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            base: None,
        };
        TypeDatabase {
            state: Arc::new(state),
        }
    }

    /// A handle on an existing database, sharing everything with it.
    pub(crate) fn from_state(state: Arc<DatabaseState>) -> Self {
        TypeDatabase { state }
    }

    pub(crate) fn downgrade(&self) -> Weak<DatabaseState> {
        Arc::downgrade(&self.state)
    }

    fn configure(self, apply: impl FnOnce(&mut DatabaseState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|shared| shared.duplicate());
        apply(&mut state);
        TypeDatabase {
            state: Arc::new(state),
        }
    }

    pub fn with_options(self, options: DatabaseOptions) -> Self {
        self.configure(|state| {
            state.reader = TypeDatabaseReader::new(&options);
            state.options = options;
        })
    }

    /// Add a directory searched by [`TypeDatabase::import_module`].
    pub fn with_search_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.configure(|state| state.search_paths.push(path))
    }

    /// Add a directory read through its own file system, searched after the
    /// search paths.
    pub fn with_archive(self, root: impl Into<PathBuf>, fs: Arc<dyn DatabaseFs>) -> Self {
        let root = root.into();
        self.configure(|state| state.archives.push(ArchivePath { root, fs }))
    }

    /// Build a database from `factory`, loading its whole directory in one
    /// batch when preloading is enabled.
    pub fn create_default(factory: &dyn TypeDatabaseFactory) -> DatabaseResult<TypeDatabase> {
        let path = factory.database_path().ok_or(DatabaseError::MissingDatabasePath)?;
        let options = factory.options();
        let search_paths = factory.search_paths();
        let directory = path.clone();
        let db = TypeDatabase::new(factory.language_version(), factory.fs())
            .with_options(options)
            .configure(|state| {
                state.search_paths = search_paths;
                state.directory = Some(directory);
            });

        if !Self::is_database_version_current(db.state.fs.as_ref(), &path) {
            warn!("type database at {} is not version {}", path.display(), CURRENT_VERSION);
        }
        if Self::is_database_regenerating(db.state.fs.as_ref(), &path) {
            info!("type database at {} is being regenerated", path.display());
        }

        let count = db.load_database(&path)?;
        if db.builtin_module().is_none() {
            warn!("type database at {} has no builtin module", path.display());
        }

        if db.state.options.preload {
            let _batch = db.begin_load();
            for module in db.modules() {
                module.try_ensure_loaded(&db)?;
            }
        }
        info!("type database ready: {} modules from {}", count, path.display());
        Ok(db)
    }

    pub fn version(&self) -> LanguageVersion {
        self.state.version
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.state.options
    }

    /// The directory this database was created from, if any.
    pub fn directory(&self) -> Option<&Path> {
        self.state.directory.as_deref()
    }

    pub fn reader(&self) -> &TypeDatabaseReader {
        &self.state.reader
    }

    pub fn fixup_stats(&self) -> FixupStats {
        self.state.reader.stats()
    }

    /// Start a load batch. Fixups run when the outermost batch is dropped.
    pub fn begin_load(&self) -> LoadBatch<'_> {
        self.state.reader.begin_load(self)
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Name of the builtin module for this language version.
    pub fn builtin_module_name(&self) -> &'static str {
        builtin_module_name(self.state.version)
    }

    /// Whether `name` refers to the builtin module.
    pub fn is_builtin_name(&self, name: &str) -> bool {
        name == self.builtin_module_name() || name == LEGACY_BUILTIN_MODULE
    }

    pub fn builtin_module(&self) -> Option<Arc<PythonModule>> {
        let modules = self.state.modules.read().unwrap_or_else(|e| e.into_inner());
        modules
            .get(self.builtin_module_name())
            .or_else(|| modules.get(LEGACY_BUILTIN_MODULE))
            .cloned()
    }

    /// Look up a registered module. Never loads anything.
    pub fn get_module(&self, name: &str) -> Option<Arc<PythonModule>> {
        if self.is_builtin_name(name) {
            return self.builtin_module();
        }
        let modules = self.state.modules.read().unwrap_or_else(|e| e.into_inner());
        if let Some(module) = modules.get(name) {
            return Some(Arc::clone(module));
        }
        let alias = self.module_alias(name)?;
        modules.get(alias).cloned()
    }

    fn module_alias(&self, name: &str) -> Option<&'static str> {
        if !self.state.options.default_database || !self.state.version.is_3x() {
            return None;
        }
        match name {
            "cPickle" => Some("_pickle"),
            "thread" => Some("_thread"),
            _ => None,
        }
    }

    /// Registered module names, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let modules = self.state.modules.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered modules, sorted by name.
    pub fn modules(&self) -> Vec<Arc<PythonModule>> {
        let modules = self.state.modules.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Arc<PythonModule>> = modules.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Register `module` under `name`, replacing any previous module, and
    /// resolve references that were waiting for it.
    pub fn add_module(&self, name: impl Into<String>, module: Arc<PythonModule>) {
        let name = name.into();
        debug!("adding module '{}'", name);
        module.bind_owner(self.downgrade());
        {
            let mut modules = self.state.modules.write().unwrap_or_else(|e| e.into_inner());
            modules.insert(name.clone(), Arc::clone(&module));
        }
        let waiting = self.state.reader.take_module_refs(&name);
        if !waiting.is_empty() {
            debug!("resolving {} references to module '{}'", waiting.len(), name);
        }
        for sink in waiting {
            sink.deliver(MemberLink::linked(&Member::Module(Arc::clone(&module))));
        }
    }

    /// Remove a module from this database's table.
    pub fn unload_module(&self, name: &str) -> Option<Arc<PythonModule>> {
        let mut modules = self.state.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.remove(name)
    }

    /// Register every module file in `dir`.
    ///
    /// Files named `*.idb` without a `$` are registered lazily. A module
    /// already registered is replaced, except the builtin module, which the
    /// first directory to provide it keeps. On 3.x a directory without
    /// `builtins.idb` may provide `__builtin__.idb` instead.
    pub fn load_database(&self, dir: &Path) -> DatabaseResult<usize> {
        let files = self.state.fs.list_dir(dir).map_err(|source| DatabaseError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut count = 0;
        for file in files {
            let Some(name) = module_name_for(&file) else {
                continue;
            };
            if self.is_builtin_name(name) && self.builtin_module().is_some() {
                debug!("keeping existing builtin module over {}", file.display());
                continue;
            }
            let module = Arc::new(PythonModule::lazy(name, &file, Arc::clone(&self.state.fs)));
            self.add_module(name, module);
            count += 1;
        }
        debug!("registered {} modules from {}", count, dir.display());
        Ok(count)
    }

    /// Find a module by name: registered modules first, then the search
    /// paths, then archive directories. Modules found on disk are registered.
    pub fn import_module(&self, name: &str) -> Option<Arc<PythonModule>> {
        if let Some(module) = self.get_module(name) {
            return Some(module);
        }
        let file_name = format!("{}.{}", name, MODULE_EXTENSION);
        let candidates = self
            .state.search_paths
            .iter()
            .map(|dir| (dir.join(&file_name), Arc::clone(&self.state.fs)))
            .chain(
                self.state.archives
                    .iter()
                    .map(|archive| (archive.root.join(&file_name), Arc::clone(&archive.fs))),
            );
        for (path, fs) in candidates {
            if fs.exists(&path) {
                debug!("importing module '{}' from {}", name, path.display());
                let module = Arc::new(PythonModule::lazy(name, path, fs));
                self.add_module(name, Arc::clone(&module));
                return Some(module);
            }
        }
        None
    }

    /// A builtin type by id.
    pub fn get_builtin_type(&self, id: BuiltinTypeId) -> DatabaseResult<Arc<PythonType>> {
        let not_found = || DatabaseError::NotFound {
            name: format!("{:?}", id),
        };
        let name = id.type_name(self.state.version).ok_or_else(not_found)?;
        let builtins = self.builtin_module().ok_or_else(not_found)?;
        match builtins.get_any_member(self, name) {
            Some(Member::Type(ty)) => Ok(ty),
            _ => Err(not_found()),
        }
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    /// A clone whose builtin module is replaced by `builtins`.
    pub fn clone_with_builtins(&self, builtins: Arc<PythonModule>) -> TypeDatabase {
        let db = self.clone();
        builtins.bind_owner(db.downgrade());
        {
            let mut modules = db.state.modules.write().unwrap_or_else(|e| e.into_inner());
            modules.remove(LEGACY_BUILTIN_MODULE);
            modules.insert(self.builtin_module_name().to_string(), builtins);
        }
        db
    }

    /// Verify that `other` targets the same language version.
    pub fn check_version(&self, other: LanguageVersion) -> DatabaseResult<()> {
        if self.state.version == other {
            Ok(())
        } else {
            Err(DatabaseError::LanguageVersionMismatch {
                expected: self.state.version,
                found: other,
            })
        }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Whether `dir/database.ver` holds [`CURRENT_VERSION`].
    pub fn is_database_version_current(fs: &dyn DatabaseFs, dir: &Path) -> bool {
        match fs.read_lines(&dir.join(VERSION_FILE)) {
            Ok(lines) => lines
                .first()
                .and_then(|line| line.parse::<u32>().ok())
                .is_some_and(|version| version == CURRENT_VERSION),
            Err(_) => false,
        }
    }

    /// Whether a scraper is rewriting `dir` (a `database.pid` is present).
    pub fn is_database_regenerating(fs: &dyn DatabaseFs, dir: &Path) -> bool {
        fs.exists(&dir.join(REGENERATING_FILE))
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn add_listener(&self, listener: Arc<dyn CorruptionListener>) {
        let mut listeners = self.state.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    pub(crate) fn report_corruption(&self, module: &str, path: &Path, reason: String) {
        warn!("type database module '{}' is corrupt: {}", module, reason);
        let report = CorruptionReport {
            module: module.to_string(),
            path: path.to_path_buf(),
            reason,
        };
        let listeners = self.state.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in listeners {
            listener.on_database_corrupt(&report);
        }
    }
}

/// A database sharing this one's modules with an independent table.
///
/// The clone has its own reader: fixups and parked module references of the
/// source database are not carried over. Corruption listeners are copied.
/// Shared modules keep loading through the source database, so modules added
/// to the clone never become visible from the source.
impl Clone for TypeDatabase {
    fn clone(&self) -> Self {
        let mut state = self.state.duplicate();
        state.base = Some(Arc::clone(&self.state));
        TypeDatabase {
            state: Arc::new(state),
        }
    }
}

impl std::fmt::Debug for TypeDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDatabase")
            .field("version", &self.state.version)
            .field("directory", &self.state.directory)
            .field("modules", &self.module_names().len())
            .field("reader", &self.state.reader)
            .finish()
    }
}

/// Module name for a database file, or `None` if the file is not a module.
fn module_name_for(file: &Path) -> Option<&str> {
    if file.extension()?.to_str()? != MODULE_EXTENSION {
        return None;
    }
    let name = file.file_stem()?.to_str()?;
    if name.is_empty() || name.contains('$') {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use typedb_core::fs::MemoryFs;
    use typedb_core::pickle::{encode, RawValue};

    fn type_record() -> RawValue {
        RawValue::dict([
            ("kind", RawValue::Str("type".into())),
            ("value", RawValue::dict([("members", RawValue::dict::<String, _>([]))])),
        ])
    }

    fn builtins_file(types: &[&str]) -> Vec<u8> {
        let members = RawValue::dict(types.iter().map(|name| (name.to_string(), type_record())));
        encode(&RawValue::dict([("members", members)]))
    }

    fn memory_db(files: &[(&str, Vec<u8>)]) -> TypeDatabase {
        let fs = Arc::new(MemoryFs::new());
        for (path, bytes) in files {
            fs.insert(*path, bytes.clone());
        }
        TypeDatabase::new(LanguageVersion::V3_8, fs)
    }

    // ========================================================================
    // Errors
    // ========================================================================

    mod error_conversion {
        use super::*;
        use typedb_core::error::OutputErrorCode;

        #[test]
        fn test_missing_path_is_configuration() {
            let err: TypeDbError = DatabaseError::MissingDatabasePath.into();
            assert!(matches!(err, TypeDbError::Configuration { .. }));
        }

        #[test]
        fn test_not_found_is_resolution_error() {
            let err: TypeDbError = DatabaseError::NotFound { name: "Int".into() }.into();
            assert_eq!(err.error_code(), OutputErrorCode::ResolutionError);
        }
    }

    // ========================================================================
    // Module Table
    // ========================================================================

    #[test]
    fn test_module_name_for_filters_files() {
        assert_eq!(module_name_for(Path::new("/db/os.idb")), Some("os"));
        assert_eq!(module_name_for(Path::new("/db/os.path.idb")), Some("os.path"));
        assert_eq!(module_name_for(Path::new("/db/os.idb.$memlist")), None);
        assert_eq!(module_name_for(Path::new("/db/a$b.idb")), None);
        assert_eq!(module_name_for(Path::new("/db/database.ver")), None);
    }

    #[test]
    fn test_load_database_registers_lazily() {
        let db = memory_db(&[
            ("/db/builtins.idb", builtins_file(&["int"])),
            ("/db/os.idb", builtins_file(&[])),
            ("/db/os.idb.$memlist", b"path\n".to_vec()),
            ("/db/database.ver", b"26\n".to_vec()),
        ]);
        assert_eq!(db.load_database(Path::new("/db")).unwrap(), 2);
        assert_eq!(db.module_names(), vec!["builtins", "os"]);
        assert!(db.modules().iter().all(|m| !m.is_loaded()));
    }

    #[test]
    fn test_load_database_keeps_first_builtins() {
        let db = memory_db(&[
            ("/a/builtins.idb", builtins_file(&["int"])),
            ("/a/os.idb", builtins_file(&[])),
            ("/b/builtins.idb", builtins_file(&["str"])),
            ("/b/os.idb", builtins_file(&[])),
        ]);
        db.load_database(Path::new("/a")).unwrap();
        db.load_database(Path::new("/b")).unwrap();
        let builtins = db.builtin_module().unwrap();
        assert_eq!(builtins.path(), Some(Path::new("/a/builtins.idb")));
        assert_eq!(db.get_module("os").unwrap().path(), Some(Path::new("/b/os.idb")));
    }

    #[test]
    fn test_load_database_missing_dir_is_io_error() {
        let db = memory_db(&[]);
        let err = db.load_database(Path::new("/nowhere")).unwrap_err();
        assert!(matches!(err, DatabaseError::Io { .. }));
    }

    #[test]
    fn test_legacy_builtin_fallback_on_3x() {
        let db = memory_db(&[("/db/__builtin__.idb", builtins_file(&["int"]))]);
        db.load_database(Path::new("/db")).unwrap();
        let builtins = db.builtin_module().unwrap();
        assert_eq!(builtins.name(), "__builtin__");
        assert!(Arc::ptr_eq(&db.get_module("builtins").unwrap(), &builtins));
        assert!(db.get_builtin_type(BuiltinTypeId::Int).is_ok());
    }

    #[test]
    fn test_aliases_only_for_default_database() {
        let db = memory_db(&[]);
        db.add_module("_pickle", Arc::new(PythonModule::empty("_pickle")));
        assert!(db.get_module("cPickle").is_none());

        let options = DatabaseOptions::default().with_default_database(true);
        let db = memory_db(&[]).with_options(options);
        db.add_module("_pickle", Arc::new(PythonModule::empty("_pickle")));
        assert_eq!(db.get_module("cPickle").unwrap().name(), "_pickle");
    }

    #[test]
    fn test_unload_module() {
        let db = memory_db(&[]);
        db.add_module("x", Arc::new(PythonModule::empty("x")));
        assert!(db.unload_module("x").is_some());
        assert!(db.get_module("x").is_none());
        assert!(db.unload_module("x").is_none());
    }

    // ========================================================================
    // Builtin Types
    // ========================================================================

    #[test]
    fn test_get_builtin_type_found() {
        let db = memory_db(&[("/db/builtins.idb", builtins_file(&["int", "str"]))]);
        db.load_database(Path::new("/db")).unwrap();
        let int = db.get_builtin_type(BuiltinTypeId::Int).unwrap();
        assert_eq!(int.name(), "int");
        assert_eq!(int.builtin_id(), BuiltinTypeId::Int);
    }

    #[test]
    fn test_get_builtin_type_missing() {
        let db = memory_db(&[("/db/builtins.idb", builtins_file(&["int"]))]);
        db.load_database(Path::new("/db")).unwrap();
        let err = db.get_builtin_type(BuiltinTypeId::Str).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn test_get_builtin_type_without_builtins() {
        let db = memory_db(&[]);
        assert!(matches!(
            db.get_builtin_type(BuiltinTypeId::Object),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    // ========================================================================
    // Health
    // ========================================================================

    #[test]
    fn test_database_version_checks() {
        let fs = MemoryFs::new();
        assert!(!TypeDatabase::is_database_version_current(&fs, Path::new("/db")));
        fs.insert("/db/database.ver", b"25\n".to_vec());
        assert!(!TypeDatabase::is_database_version_current(&fs, Path::new("/db")));
        fs.insert("/db/database.ver", b" 26 \n".to_vec());
        assert!(TypeDatabase::is_database_version_current(&fs, Path::new("/db")));
    }

    #[test]
    fn test_regenerating_marker() {
        let fs = MemoryFs::new();
        assert!(!TypeDatabase::is_database_regenerating(&fs, Path::new("/db")));
        fs.insert("/db/database.pid", b"1234".to_vec());
        assert!(TypeDatabase::is_database_regenerating(&fs, Path::new("/db")));
    }

    #[test]
    fn test_check_version() {
        let db = memory_db(&[]);
        assert!(db.check_version(LanguageVersion::V3_8).is_ok());
        assert!(matches!(
            db.check_version(LanguageVersion::V2_7),
            Err(DatabaseError::LanguageVersionMismatch { .. })
        ));
    }
}
