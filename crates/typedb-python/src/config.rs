//! Database configuration and the factory abstraction.
//!
//! [`TypeDatabaseFactory`] supplies what [`TypeDatabase::create_default`]
//! needs: the backing directory, the language version, search paths and
//! options. [`DatabaseConfig`] is the concrete implementation.
//!
//! [`TypeDatabase::create_default`]: crate::database::TypeDatabase::create_default

use std::path::PathBuf;
use std::sync::Arc;

use typedb_core::fs::{DatabaseFs, OsFs};
use typedb_core::version::LanguageVersion;

/// Directory layout version of completion databases.
pub const FORMAT_VERSION: u32 = 1;

/// Options for loading and resolution.
///
/// # Example
///
/// ```
/// use typedb_python::config::DatabaseOptions;
///
/// let options = DatabaseOptions {
///     report_unresolved: true,
///     ..Default::default()
/// };
/// assert_eq!(options.max_fixup_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Load every module of the database directory in one batch when the
    /// database is created.
    ///
    /// Default: `true`
    pub preload: bool,

    /// Log each dropped fixup at `warn` instead of `debug`.
    ///
    /// Default: `false`
    pub report_unresolved: bool,

    /// Times a queued fixup is retried before it is dropped.
    ///
    /// Default: `3`
    pub max_fixup_attempts: u32,

    /// A drain stops after `factor x fixups registered` steps.
    ///
    /// Default: `3`
    pub fixup_budget_factor: usize,

    /// Enable the module aliases of the shipped standard library database
    /// (`cPickle`, `thread`).
    ///
    /// Default: `false`
    pub default_database: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            preload: true,
            report_unresolved: false,
            max_fixup_attempts: 3,
            fixup_budget_factor: 3,
            default_database: false,
        }
    }
}

impl DatabaseOptions {
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_report_unresolved(mut self, report: bool) -> Self {
        self.report_unresolved = report;
        self
    }

    pub fn with_max_fixup_attempts(mut self, attempts: u32) -> Self {
        self.max_fixup_attempts = attempts;
        self
    }

    pub fn with_fixup_budget_factor(mut self, factor: usize) -> Self {
        self.fixup_budget_factor = factor;
        self
    }

    pub fn with_default_database(mut self, enabled: bool) -> Self {
        self.default_database = enabled;
        self
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Supplies everything needed to build a database.
pub trait TypeDatabaseFactory {
    /// Directory holding the `*.idb` files. `None` is a misconfiguration.
    fn database_path(&self) -> Option<PathBuf>;

    fn language_version(&self) -> LanguageVersion;

    /// Directories searched by `import_module` after the database itself.
    fn search_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn options(&self) -> DatabaseOptions {
        DatabaseOptions::default()
    }

    fn fs(&self) -> Arc<dyn DatabaseFs> {
        Arc::new(OsFs)
    }
}

/// The per-user default database directory:
/// `<data_local_dir>/typedb/CompletionDB/<FORMAT_VERSION>`.
pub fn default_database_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| {
        dir.join("typedb")
            .join("CompletionDB")
            .join(FORMAT_VERSION.to_string())
    })
}

/// Builder-style [`TypeDatabaseFactory`].
#[derive(Clone)]
pub struct DatabaseConfig {
    path: Option<PathBuf>,
    version: LanguageVersion,
    search_paths: Vec<PathBuf>,
    options: DatabaseOptions,
    fs: Arc<dyn DatabaseFs>,
}

impl DatabaseConfig {
    pub fn new(version: LanguageVersion) -> Self {
        Self {
            path: None,
            version,
            search_paths: Vec::new(),
            options: DatabaseOptions::default(),
            fs: Arc::new(OsFs),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use [`default_database_dir`] when no path was given.
    pub fn with_default_path(mut self) -> Self {
        if self.path.is_none() {
            self.path = default_database_dir();
        }
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_options(mut self, options: DatabaseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn DatabaseFs>) -> Self {
        self.fs = fs;
        self
    }
}

impl TypeDatabaseFactory for DatabaseConfig {
    fn database_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn language_version(&self) -> LanguageVersion {
        self.version
    }

    fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.clone()
    }

    fn options(&self) -> DatabaseOptions {
        self.options.clone()
    }

    fn fs(&self) -> Arc<dyn DatabaseFs> {
        Arc::clone(&self.fs)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("search_paths", &self.search_paths)
            .field("options", &self.options)
            .finish()
    }
}
