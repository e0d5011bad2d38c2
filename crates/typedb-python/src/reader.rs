//! Member reading and the fixup queue.
//!
//! [`TypeDatabaseReader`] turns parsed member records into nodes and owns the
//! deferred-resolution protocol:
//!
//! - every cross reference is tried immediately; a miss becomes a fixup
//! - loads nest (module A's load can trigger module B's through a lookup);
//!   a per-database depth counter tracks the outermost batch
//! - when the outermost batch ends, fixups drain in FIFO order, each retried
//!   up to `max_fixup_attempts` times, under a step budget of
//!   `fixup_budget_factor` times the queue length when the drain starts
//!
//! A fixup that never resolves is dropped. Dropping settles its target as
//! unresolved, so fields end up empty rather than pending.
//!
//! # Threading
//!
//! The depth counter is per database, not per thread. Loads of one database
//! must be serialized by the caller; the reader never holds its lock while
//! running a fixup or loading a module.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::builtins::BuiltinTypeId;
use crate::config::DatabaseOptions;
use crate::database::TypeDatabase;
use crate::members::{
    ContainerRef, DeferredTypes, Member, MemberLink, PythonConstant, PythonFunction, PythonMethod,
    PythonOverload, PythonParameter, PythonProperty, PythonType, UnknownMember,
};
use crate::multiple::PythonMultipleMembers;
use crate::record::{FunctionRecord, MemberRecord, RecordKind, TypeList, TypeRecord, TypeRef};
use crate::sink::{MemberSink, TypeSink};

// ============================================================================
// Fixups
// ============================================================================

/// Counters from fixup draining, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixupStats {
    /// Fixups that found their target.
    pub resolved: usize,
    /// Fixups dropped after exhausting their attempts.
    pub dropped: usize,
    /// Fixups discarded because a drain exceeded its step budget.
    pub abandoned: usize,
}

pub(crate) enum FixupOutcome {
    Resolved,
    Retry,
}

type FixupFn = Box<dyn FnMut(&TypeDatabase) -> FixupOutcome + Send>;

struct Fixup {
    label: String,
    attempts: u32,
    run: FixupFn,
}

#[derive(Default)]
struct ReaderState {
    depth: usize,
    fixups: VecDeque<Fixup>,
    module_refs: HashMap<String, Vec<MemberSink>>,
    stats: FixupStats,
}

/// Guard for one load. Dropping the outermost guard drains the fixup queue.
#[must_use = "fixups run when the batch is dropped"]
pub struct LoadBatch<'a> {
    db: &'a TypeDatabase,
}

impl Drop for LoadBatch<'_> {
    fn drop(&mut self) {
        self.db.reader().end_load(self.db);
    }
}

/// Where the record being read lives.
pub(crate) struct ReadScope<'a> {
    pub(crate) db: &'a TypeDatabase,
    pub(crate) module: &'a str,
    pub(crate) container: ContainerRef,
    pub(crate) in_builtin: bool,
}

/// Builds member nodes and resolves their cross references.
pub struct TypeDatabaseReader {
    state: Mutex<ReaderState>,
    max_attempts: u32,
    budget_factor: usize,
    report_unresolved: bool,
}

impl TypeDatabaseReader {
    pub(crate) fn new(options: &DatabaseOptions) -> Self {
        Self {
            state: Mutex::new(ReaderState::default()),
            max_attempts: options.max_fixup_attempts.max(1),
            budget_factor: options.fixup_budget_factor.max(1),
            report_unresolved: options.report_unresolved,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current nesting depth of loads.
    pub fn depth(&self) -> usize {
        self.lock().depth
    }

    /// Fixups waiting for the outermost batch to end.
    pub fn pending_fixups(&self) -> usize {
        self.lock().fixups.len()
    }

    /// Module references waiting for their module to be added.
    pub fn parked_module_refs(&self) -> usize {
        self.lock().module_refs.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> FixupStats {
        self.lock().stats
    }

    pub(crate) fn begin_load<'a>(&self, db: &'a TypeDatabase) -> LoadBatch<'a> {
        self.lock().depth += 1;
        LoadBatch { db }
    }

    fn end_load(&self, db: &TypeDatabase) {
        let outermost = self.lock().depth == 1;
        // Depth stays at 1 while draining so loads triggered by fixups
        // append to the running drain instead of starting their own.
        if outermost && !std::thread::panicking() {
            self.run_fixups(db);
        }
        let mut state = self.lock();
        state.depth = state.depth.saturating_sub(1);
    }

    pub(crate) fn add_fixup(
        &self,
        label: impl Into<String>,
        run: impl FnMut(&TypeDatabase) -> FixupOutcome + Send + 'static,
    ) {
        self.lock().fixups.push_back(Fixup {
            label: label.into(),
            attempts: 0,
            run: Box::new(run),
        });
    }

    /// Drain the queue. The step budget is fixed from the queue length at the
    /// start; fixups added while draining share it.
    fn run_fixups(&self, db: &TypeDatabase) {
        let initial = self.lock().fixups.len();
        if initial == 0 {
            return;
        }
        debug!("running {} fixups", initial);
        let budget = self.budget_factor.saturating_mul(initial);
        let mut steps = 0usize;

        loop {
            let next = {
                let mut state = self.lock();
                if steps >= budget && !state.fixups.is_empty() {
                    let abandoned: Vec<Fixup> = state.fixups.drain(..).collect();
                    state.stats.abandoned += abandoned.len();
                    drop(state);
                    warn!(
                        "abandoning {} unresolved fixups after {} steps",
                        abandoned.len(),
                        steps
                    );
                    // Dropped outside the lock: settling may touch other nodes.
                    drop(abandoned);
                    return;
                }
                state.fixups.pop_front()
            };
            let Some(mut fixup) = next else {
                return;
            };

            steps += 1;
            fixup.attempts += 1;
            match (fixup.run)(db) {
                FixupOutcome::Resolved => self.lock().stats.resolved += 1,
                FixupOutcome::Retry if fixup.attempts < self.max_attempts => {
                    self.lock().fixups.push_back(fixup);
                }
                FixupOutcome::Retry => {
                    self.lock().stats.dropped += 1;
                    if self.report_unresolved {
                        warn!("unresolved reference: {}", fixup.label);
                    } else {
                        debug!("dropping unresolved reference: {}", fixup.label);
                    }
                    drop(fixup);
                }
            }
        }
    }

    // ========================================================================
    // Module References
    // ========================================================================

    fn park_module_ref(&self, module: &str, sink: MemberSink) {
        debug!("module '{}' not present, parking reference", module);
        self.lock().module_refs.entry(module.to_string()).or_default().push(sink);
    }

    /// Hand out the references waiting for `module`.
    pub(crate) fn take_module_refs(&self, module: &str) -> Vec<MemberSink> {
        self.lock().module_refs.remove(module).unwrap_or_default()
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Build the node for one record and hand it to `sink`.
    ///
    /// Concrete kinds deliver before returning. References that cannot be
    /// resolved yet deliver later, from a fixup or when their module is
    /// added. A record excluded by its version gate is never delivered.
    pub(crate) fn read_member(
        &self,
        scope: &ReadScope<'_>,
        name: &str,
        record: &MemberRecord,
        sink: MemberSink,
    ) {
        let db = scope.db;
        if let Some(gate) = &record.version {
            if !db.version().applies(gate) {
                debug!("skipping {}.{}: version gate '{}'", scope.module, name, gate);
                return;
            }
        }

        match &record.kind {
            RecordKind::Type(rec) => {
                let ty = self.make_type(scope, name, rec);
                sink.deliver(MemberLink::Owned(Member::Type(ty)));
            }
            RecordKind::Function(rec) => {
                let function = self.make_function(scope, name, rec);
                sink.deliver(MemberLink::Owned(Member::Function(Arc::new(function))));
            }
            RecordKind::Method(rec) => {
                let method = PythonMethod {
                    function: self.make_function(scope, name, rec),
                    is_bound: rec.is_bound,
                };
                sink.deliver(MemberLink::Owned(Member::Method(Arc::new(method))));
            }
            RecordKind::Property(rec) => {
                let property = PythonProperty {
                    doc: rec.doc.clone(),
                    location: rec.location,
                    types: self.deferred_types(db, &rec.types),
                };
                sink.deliver(MemberLink::Owned(Member::Property(Arc::new(property))));
            }
            RecordKind::Constant(types) => {
                let constant = PythonConstant {
                    types: self.deferred_types(db, types),
                };
                sink.deliver(MemberLink::Owned(Member::Constant(Arc::new(constant))));
            }
            RecordKind::Multiple(candidates) => {
                let multiple = Arc::new(PythonMultipleMembers::new(
                    name,
                    scope.container.clone(),
                    candidates,
                ));
                for (index, candidate) in candidates.iter().enumerate() {
                    let target = Arc::downgrade(&multiple);
                    let candidate_sink = MemberSink::new(move |link| {
                        if let Some(multiple) = target.upgrade() {
                            multiple.resolve(index, link);
                        }
                    });
                    self.read_member(scope, name, candidate, candidate_sink);
                }
                sink.deliver(MemberLink::Owned(Member::Multiple(multiple)));
            }
            RecordKind::ModuleRef(target) => match db.get_module(target) {
                Some(module) => sink.deliver(MemberLink::linked(&Member::Module(module))),
                None => self.park_module_ref(target, sink),
            },
            RecordKind::TypeRef(types) => match types.first() {
                Some(tref) => self.lookup_type(db, tref, TypeSink::member(sink)),
                None => debug!("typeref {}.{} names no type", scope.module, name),
            },
            RecordKind::FuncRef(path) => self.read_func_ref(db, path, sink),
            RecordKind::Unknown(kind) => {
                debug!("unknown member kind '{}' for {}.{}", kind, scope.module, name);
                let unknown = UnknownMember {
                    name: name.to_string(),
                    kind: kind.clone(),
                };
                sink.deliver(MemberLink::Owned(Member::Unknown(Arc::new(unknown))));
            }
        }
    }

    fn make_type(&self, scope: &ReadScope<'_>, name: &str, rec: &TypeRecord) -> Arc<PythonType> {
        let db = scope.db;
        let builtin_id = match (&scope.container, scope.in_builtin) {
            (ContainerRef::Module(_), true) => BuiltinTypeId::from_type_name(name, db.version()),
            _ => BuiltinTypeId::Unknown,
        };
        let mut ty = PythonType::new(name, scope.module);
        ty.doc = rec.doc.clone();
        ty.builtin_id = builtin_id;
        ty.is_builtin = rec.is_builtin;
        ty.is_hidden = rec.is_hidden;
        ty.location = rec.location;
        ty.bases = self.deferred_types(db, &rec.bases);
        ty.explicit_mro = rec.mro.as_ref().map(|mro| self.deferred_types(db, mro));
        let ty = Arc::new(ty);

        let type_scope = ReadScope {
            db,
            module: scope.module,
            container: ContainerRef::Type(Arc::downgrade(&ty)),
            in_builtin: scope.in_builtin,
        };
        for (member_name, member) in &rec.members {
            let owner = Arc::downgrade(&ty);
            let key = member_name.clone();
            let member_sink = MemberSink::new(move |link| {
                if let (Some(owner), Some(link)) = (owner.upgrade(), link) {
                    owner.insert_member(key, link);
                }
            });
            self.read_member(&type_scope, member_name, member, member_sink);
        }
        ty
    }

    fn make_function(
        &self,
        scope: &ReadScope<'_>,
        name: &str,
        rec: &FunctionRecord,
    ) -> PythonFunction {
        let db = scope.db;
        let overloads = rec
            .overloads
            .iter()
            .map(|overload| PythonOverload {
                doc: overload.doc.clone(),
                return_doc: overload.return_doc.clone(),
                params: overload
                    .params
                    .iter()
                    .map(|param| PythonParameter {
                        name: param.name.clone(),
                        kind: param.kind,
                        default_value: param.default_value.clone(),
                        types: self.deferred_types(db, &param.types),
                    })
                    .collect(),
                return_types: self.deferred_types(db, &overload.return_types),
            })
            .collect();
        PythonFunction {
            name: name.to_string(),
            module: scope.module.to_string(),
            declaring_type: scope.container.type_name(),
            doc: rec.doc.clone(),
            is_builtin: rec.is_builtin,
            is_static: rec.is_static,
            location: rec.location,
            overloads,
        }
    }

    /// One slot per reference, each filled by its own lookup.
    fn deferred_types(&self, db: &TypeDatabase, list: &TypeList) -> DeferredTypes {
        let types = DeferredTypes::with_len(list.len());
        for (index, tref) in list.iter().enumerate() {
            self.lookup_type(db, tref, TypeSink::slot(types.clone(), index));
        }
        types
    }

    fn read_func_ref(&self, db: &TypeDatabase, path: &str, sink: MemberSink) {
        if let Some(member) = resolve_path(db, path) {
            sink.deliver(MemberLink::linked(&member));
            return;
        }
        let owned_path = path.to_string();
        let mut sink = Some(sink);
        self.add_fixup(path, move |db| match resolve_path(db, &owned_path) {
            Some(member) => {
                if let Some(sink) = sink.take() {
                    sink.deliver(MemberLink::linked(&member));
                }
                FixupOutcome::Resolved
            }
            None => FixupOutcome::Retry,
        });
    }

    // ========================================================================
    // Type Lookup
    // ========================================================================

    /// Resolve `tref` into `sink`, now if possible, otherwise from a fixup.
    pub(crate) fn lookup_type(&self, db: &TypeDatabase, tref: &TypeRef, sink: TypeSink) {
        if try_lookup_type(db, tref, &sink) {
            return;
        }
        let pending = tref.clone();
        self.add_fixup(tref.display_name(), move |db| {
            if try_lookup_type(db, &pending, &sink) {
                FixupOutcome::Resolved
            } else {
                FixupOutcome::Retry
            }
        });
    }
}

impl std::fmt::Debug for TypeDatabaseReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TypeDatabaseReader")
            .field("depth", &state.depth)
            .field("pending_fixups", &state.fixups.len())
            .field("stats", &state.stats)
            .finish()
    }
}

fn try_lookup_type(db: &TypeDatabase, tref: &TypeRef, sink: &TypeSink) -> bool {
    let found = match (tref.module.as_deref(), tref.name.as_deref()) {
        (_, None) => builtin_member(db, "object"),
        (None, Some(name)) => builtin_member(db, name),
        (Some(module), Some(name)) => find_member(db, module, name),
    };
    match found {
        Some(member) => {
            assign_types(db, &member, sink);
            true
        }
        None => false,
    }
}

fn assign_types(db: &TypeDatabase, member: &Member, sink: &TypeSink) {
    match member {
        Member::Type(ty) => sink.push(Arc::clone(ty)),
        Member::Multiple(multiple) => multiple.assign_types(db, sink),
        other => debug!("type reference resolved to a {}", other.kind()),
    }
}

fn builtin_member(db: &TypeDatabase, name: &str) -> Option<Member> {
    let builtins = db.builtin_module()?;
    member_path(db, Member::Module(builtins), name)
}

/// Find `name` (possibly dotted) in `module`.
///
/// A module that is not registered is retried as a type path inside its
/// parent: `pkg.mod.Outer` + `Inner` becomes module `pkg.mod`, path
/// `Outer.Inner`.
fn find_member(db: &TypeDatabase, module: &str, name: &str) -> Option<Member> {
    if let Some(found) = db.get_module(module) {
        return member_path(db, Member::Module(found), name);
    }
    let (parent, last) = module.rsplit_once('.')?;
    let container = find_member(db, parent, last)?;
    member_path(db, container, name)
}

fn member_path(db: &TypeDatabase, start: Member, dotted: &str) -> Option<Member> {
    dotted.split('.').try_fold(start, |current, part| child_member(db, &current, part))
}

fn child_member(db: &TypeDatabase, container: &Member, name: &str) -> Option<Member> {
    match container {
        Member::Module(module) if db.is_builtin_name(module.name()) => {
            module.get_any_member(db, name)
        }
        Member::Module(module) => module.get_member(db, name),
        Member::Type(ty) => ty.get_member(name),
        _ => None,
    }
}

/// Resolve a dotted `funcref` path through modules, submodules and types.
fn resolve_path(db: &TypeDatabase, path: &str) -> Option<Member> {
    let mut parts = path.split('.');
    let mut current = Member::Module(db.get_module(parts.next()?)?);
    for part in parts {
        current = match &current {
            Member::Module(module) => match db.get_module(&format!("{}.{}", module.name(), part)) {
                Some(submodule) => Member::Module(submodule),
                None => child_member(db, &current, part)?,
            },
            _ => child_member(db, &current, part)?,
        };
    }
    Some(current)
}
