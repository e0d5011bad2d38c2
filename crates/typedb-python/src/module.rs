//! Lazily loaded modules.
//!
//! A [`PythonModule`] registered from a database directory knows only its
//! name and backing file until something asks for a member. The first query
//! reads and decodes the file, builds every member, and marks the module
//! loaded. A file that is missing or unreadable yields an empty module. A
//! file that is corrupt yields whatever decoded cleanly before the damage,
//! and the corruption is reported once.
//!
//! A `<file>.$memlist` sidecar, when present, answers negative existence
//! probes without reading the main file.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use tracing::{debug, warn};

use typedb_core::fs::DatabaseFs;
use typedb_core::pickle::{decode_prefix, RawValue};

use crate::database::{DatabaseError, DatabaseResult, DatabaseState, TypeDatabase};
use crate::members::{ContainerRef, Member, MemberLink};
use crate::reader::ReadScope;
use crate::record::parse_members;
use crate::sink::MemberSink;

/// Suffix of the member-name sidecar, appended to the module file name.
pub const MEMLIST_SUFFIX: &str = ".$memlist";

/// Outermost containers salvaged from a damaged module file: the module
/// mapping and its `members` mapping.
pub const MODULE_KEEP_OPEN: usize = 2;

/// Load progress of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// Module-level fields other than members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub doc: Option<String>,
    pub filename: Option<String>,
    /// Names of child modules.
    pub children: Vec<String>,
}

struct ModuleSource {
    path: PathBuf,
    fs: Arc<dyn DatabaseFs>,
}

/// A module and its member table.
pub struct PythonModule {
    name: String,
    source: Option<ModuleSource>,
    state: Mutex<LoadState>,
    members: RwLock<HashMap<String, MemberLink>>,
    info: OnceLock<ModuleInfo>,
    memlist: OnceLock<Option<HashSet<String>>>,
    /// The database the module was first registered with.
    owner: OnceLock<Weak<DatabaseState>>,
}

impl PythonModule {
    /// A module backed by `path`, loaded on first use.
    pub fn lazy(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        fs: Arc<dyn DatabaseFs>,
    ) -> Self {
        Self {
            name: name.into(),
            source: Some(ModuleSource {
                path: path.into(),
                fs,
            }),
            state: Mutex::new(LoadState::Unloaded),
            members: RwLock::new(HashMap::new()),
            info: OnceLock::new(),
            memlist: OnceLock::new(),
            owner: OnceLock::new(),
        }
    }

    /// An already-loaded module with no members.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::from_members(name, Vec::new())
    }

    /// An already-loaded module holding `members`.
    pub fn from_members(
        name: impl Into<String>,
        members: impl IntoIterator<Item = (String, Member)>,
    ) -> Self {
        let table = members
            .into_iter()
            .map(|(name, member)| (name, MemberLink::Owned(member)))
            .collect();
        Self {
            name: name.into(),
            source: None,
            state: Mutex::new(LoadState::Loaded),
            members: RwLock::new(table),
            info: OnceLock::new(),
            memlist: OnceLock::new(),
            owner: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file, if the module has one.
    pub fn path(&self) -> Option<&Path> {
        self.source.as_ref().map(|source| source.path.as_path())
    }

    /// Loads run through the first database to register the module. Later
    /// registrations, such as a clone's, leave the binding as is.
    pub(crate) fn bind_owner(&self, owner: Weak<DatabaseState>) {
        let _ = self.owner.set(owner);
    }

    pub fn load_state(&self) -> LoadState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state() == LoadState::Loaded
    }

    pub(crate) fn loaded_doc(&self) -> Option<&str> {
        self.info.get().and_then(|info| info.doc.as_deref())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// A visible member. Hidden types are excluded.
    ///
    /// Loads the module unless the memlist sidecar shows `name` is absent.
    pub fn get_member(self: &Arc<Self>, db: &TypeDatabase, name: &str) -> Option<Member> {
        self.get_any_member(db, name).filter(|member| !is_hidden(member))
    }

    /// A member, hidden or not.
    pub fn get_any_member(self: &Arc<Self>, db: &TypeDatabase, name: &str) -> Option<Member> {
        if self.load_state() == LoadState::Unloaded {
            if let Some(names) = self.memlist() {
                if !names.contains(name) {
                    return None;
                }
            }
        }
        self.ensure_loaded(db);
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        members.get(name).and_then(MemberLink::get)
    }

    /// Whether `name` exists. Answered from the memlist sidecar when the
    /// module is not loaded yet.
    pub fn contains_member(self: &Arc<Self>, db: &TypeDatabase, name: &str) -> bool {
        if self.load_state() == LoadState::Unloaded {
            if let Some(names) = self.memlist() {
                return names.contains(name);
            }
        }
        self.get_member(db, name).is_some()
    }

    /// Names of visible members, sorted. Loads the module.
    pub fn member_names(self: &Arc<Self>, db: &TypeDatabase) -> Vec<String> {
        self.ensure_loaded(db);
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = members
            .iter()
            .filter(|(_, link)| link.get().is_some_and(|member| !is_hidden(&member)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Documentation and child module names. Loads the module.
    pub fn info(self: &Arc<Self>, db: &TypeDatabase) -> ModuleInfo {
        self.ensure_loaded(db);
        self.info.get().cloned().unwrap_or_default()
    }

    pub(crate) fn insert_member(&self, name: String, link: MemberLink) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members.insert(name, link);
    }

    fn memlist(&self) -> Option<&HashSet<String>> {
        self.memlist
            .get_or_init(|| {
                let source = self.source.as_ref()?;
                let mut sidecar = source.path.clone().into_os_string();
                sidecar.push(MEMLIST_SUFFIX);
                match source.fs.read_lines(Path::new(&sidecar)) {
                    Ok(names) => Some(names.into_iter().collect()),
                    Err(err) => {
                        debug!("no memlist for module '{}': {}", self.name, err);
                        None
                    }
                }
            })
            .as_ref()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the module if it has not been loaded. Failures are logged.
    pub fn ensure_loaded(self: &Arc<Self>, db: &TypeDatabase) {
        if let Err(err) = self.try_ensure_loaded(db) {
            warn!("failed to load module '{}': {}", self.name, err);
        }
    }

    /// Load the module if it has not been loaded.
    ///
    /// Reentrant calls made while the module is loading return immediately;
    /// the caller sees the members read so far. Only unexpected I/O failures
    /// are returned. The module is marked loaded either way.
    ///
    /// References are resolved against the database that registered the
    /// module, or against `db` when that database is gone.
    pub fn try_ensure_loaded(self: &Arc<Self>, db: &TypeDatabase) -> DatabaseResult<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != LoadState::Unloaded {
                return Ok(());
            }
            *state = LoadState::Loading;
        }

        let owner = self.owner.get().and_then(Weak::upgrade).map(TypeDatabase::from_state);
        let db = owner.as_ref().unwrap_or(db);
        let _batch = db.begin_load();
        let result = self.load(db);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = LoadState::Loaded;
        result
    }

    fn load(self: &Arc<Self>, db: &TypeDatabase) -> DatabaseResult<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let bytes = match source.fs.read(&source.path) {
            Ok(bytes) => bytes,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                debug!("module '{}' unavailable, treating as empty: {}", self.name, err);
                return Ok(());
            }
            Err(err) => {
                return Err(DatabaseError::Io {
                    path: source.path.clone(),
                    source: err,
                })
            }
        };

        debug!("loading module '{}' from {}", self.name, source.path.display());
        let decoded = decode_prefix(&bytes, MODULE_KEEP_OPEN);
        let mut problems: Vec<String> = Vec::new();
        if let Some(err) = &decoded.error {
            problems.push(err.to_string());
        }

        match decoded.value.as_ref().and_then(RawValue::as_dict) {
            Some(top) => self.read_top_level(db, top, &mut problems),
            None if decoded.value.is_some() => {
                problems.push("top-level value is not a mapping".to_string())
            }
            None => {}
        }

        if let Some(first) = problems.first() {
            let reason = match problems.len() {
                1 => first.clone(),
                n => format!("{} (and {} more problems)", first, n - 1),
            };
            db.report_corruption(&self.name, &source.path, reason);
        }
        Ok(())
    }

    fn read_top_level(
        self: &Arc<Self>,
        db: &TypeDatabase,
        top: &std::collections::BTreeMap<String, RawValue>,
        problems: &mut Vec<String>,
    ) {
        let info = ModuleInfo {
            doc: top.get("doc").and_then(RawValue::as_str).map(str::to_string),
            filename: top.get("filename").and_then(RawValue::as_str).map(str::to_string),
            children: top
                .get("children")
                .and_then(RawValue::as_sequence)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(RawValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };
        let _ = self.info.set(info);

        let mut issues = Vec::new();
        let records = match top.get("members") {
            Some(raw) => parse_members(raw, &mut issues),
            None => Vec::new(),
        };
        problems.extend(issues.iter().map(ToString::to_string));

        let scope = ReadScope {
            db,
            module: &self.name,
            container: ContainerRef::Module(Arc::downgrade(self)),
            in_builtin: db.is_builtin_name(&self.name),
        };
        for (name, record) in &records {
            let owner = Arc::downgrade(self);
            let key = name.clone();
            let sink = MemberSink::new(move |link| {
                if let (Some(owner), Some(link)) = (owner.upgrade(), link) {
                    owner.insert_member(key, link);
                }
            });
            db.reader().read_member(&scope, name, record, sink);
        }
        debug!("module '{}': read {} members", self.name, records.len());
    }
}

fn is_hidden(member: &Member) -> bool {
    matches!(member, Member::Type(ty) if ty.is_hidden())
}

impl std::fmt::Debug for PythonModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonModule")
            .field("name", &self.name)
            .field("path", &self.path())
            .field("state", &self.load_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typedb_core::fs::MemoryFs;
    use typedb_core::pickle::encode;
    use typedb_core::version::LanguageVersion;

    use crate::members::PythonConstant;

    fn constant_record() -> RawValue {
        RawValue::dict([
            ("kind", RawValue::Str("data".into())),
            ("value", RawValue::dict([("type", RawValue::None)])),
        ])
    }

    fn module_bytes(members: &[&str]) -> Vec<u8> {
        let members =
            RawValue::dict(members.iter().map(|name| (name.to_string(), constant_record())));
        encode(&RawValue::dict([
            ("doc", RawValue::Str("module doc".into())),
            ("children", RawValue::list([RawValue::Str("sub".into())])),
            ("members", members),
        ]))
    }

    fn setup(files: &[(&str, Vec<u8>)]) -> (Arc<MemoryFs>, TypeDatabase) {
        let fs = Arc::new(MemoryFs::new());
        for (path, bytes) in files {
            fs.insert(*path, bytes.clone());
        }
        let db = TypeDatabase::new(LanguageVersion::V3_8, fs.clone());
        (fs, db)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn test_lazy_module_loads_on_first_query() {
        let (fs, db) = setup(&[("/db/m.idb", module_bytes(&["a", "b"]))]);
        let module = Arc::new(PythonModule::lazy("m", "/db/m.idb", fs.clone()));
        assert_eq!(module.load_state(), LoadState::Unloaded);
        assert!(module.get_member(&db, "a").is_some());
        assert!(module.is_loaded());
        assert_eq!(module.member_names(&db), vec!["a", "b"]);
        assert_eq!(fs.read_count(Path::new("/db/m.idb")), 1);
    }

    #[test]
    fn test_module_info_fields() {
        let (fs, db) = setup(&[("/db/m.idb", module_bytes(&[]))]);
        let module = Arc::new(PythonModule::lazy("m", "/db/m.idb", fs));
        let info = module.info(&db);
        assert_eq!(info.doc.as_deref(), Some("module doc"));
        assert_eq!(info.children, vec!["sub"]);
        assert_eq!(Member::Module(module).doc(), Some("module doc"));
    }

    #[test]
    fn test_missing_file_is_empty_module() {
        let (fs, db) = setup(&[]);
        let module = Arc::new(PythonModule::lazy("gone", "/db/gone.idb", fs));
        assert!(module.try_ensure_loaded(&db).is_ok());
        assert!(module.is_loaded());
        assert!(module.member_names(&db).is_empty());
    }

    #[test]
    fn test_locked_file_is_empty_module() {
        let (fs, db) = setup(&[]);
        fs.insert_failing("/db/locked.idb", io::ErrorKind::PermissionDenied);
        let module = Arc::new(PythonModule::lazy("locked", "/db/locked.idb", fs));
        assert!(module.try_ensure_loaded(&db).is_ok());
        assert!(module.member_names(&db).is_empty());
    }

    #[test]
    fn test_unexpected_io_error_propagates() {
        let (fs, db) = setup(&[]);
        fs.insert_failing("/db/bad.idb", io::ErrorKind::InvalidData);
        let module = Arc::new(PythonModule::lazy("bad", "/db/bad.idb", fs));
        let err = module.try_ensure_loaded(&db).unwrap_err();
        assert!(matches!(err, DatabaseError::Io { .. }));
        assert!(module.is_loaded());
    }

    #[test]
    fn test_non_mapping_top_level_is_corrupt() {
        let (fs, db) = setup(&[("/db/m.idb", encode(&RawValue::list([RawValue::Int(1)])))]);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        db.add_listener(Arc::new(move |report: &crate::database::CorruptionReport| {
            sink.lock().unwrap().push(report.reason.clone());
        }));
        let module = Arc::new(PythonModule::lazy("m", "/db/m.idb", fs));
        module.ensure_loaded(&db);
        assert_eq!(*reports.lock().unwrap(), vec!["top-level value is not a mapping".to_string()]);
    }

    // ========================================================================
    // Memlist
    // ========================================================================

    #[test]
    fn test_memlist_answers_negative_without_reading_module() {
        let (fs, db) = setup(&[
            ("/db/m.idb", module_bytes(&["a"])),
            ("/db/m.idb.$memlist", b"a\n".to_vec()),
        ]);
        let module = Arc::new(PythonModule::lazy("m", "/db/m.idb", fs.clone()));
        assert!(module.get_member(&db, "zzz").is_none());
        assert!(!module.contains_member(&db, "zzz"));
        assert!(module.contains_member(&db, "a"));
        assert_eq!(fs.read_count(Path::new("/db/m.idb")), 0);
        assert_eq!(module.load_state(), LoadState::Unloaded);

        assert!(module.get_member(&db, "a").is_some());
        assert_eq!(fs.read_count(Path::new("/db/m.idb")), 1);
    }

    #[test]
    fn test_without_memlist_probe_loads() {
        let (fs, db) = setup(&[("/db/m.idb", module_bytes(&["a"]))]);
        let module = Arc::new(PythonModule::lazy("m", "/db/m.idb", fs.clone()));
        assert!(module.get_member(&db, "zzz").is_none());
        assert!(module.is_loaded());
    }

    // ========================================================================
    // In-memory modules
    // ========================================================================

    #[test]
    fn test_from_members_is_loaded() {
        let (_fs, db) = setup(&[]);
        let constant = Member::Constant(Arc::new(PythonConstant {
            types: crate::members::DeferredTypes::empty(),
        }));
        let members = vec![("c".to_string(), constant.clone())];
        let module = Arc::new(PythonModule::from_members("x", members));
        assert!(module.is_loaded());
        assert!(module.path().is_none());
        assert!(module.get_member(&db, "c").unwrap().ptr_eq(&constant));
    }
}
