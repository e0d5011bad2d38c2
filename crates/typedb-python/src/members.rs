//! Member nodes: the resolved symbol graph.
//!
//! A [`Member`] is what queries return. Nodes are immutable once built,
//! except for [`DeferredTypes`] slots (base lists, return types, property
//! types) which are filled exactly once, possibly later by a fixup.
//!
//! # Ownership
//!
//! A module owns the members defined in it, and a type owns its own members.
//! Everything else is a cross-reference and is held weakly:
//!
//! - type slots (bases, MRO, return and parameter types) hold `Weak` types
//! - `typeref`, `moduleref` and `funcref` members are stored as links that do
//!   not keep their target alive
//!
//! so mutually-referential modules never form an ownership cycle. A link whose
//! target was unloaded simply stops resolving.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use serde::Serialize;

use crate::builtins::BuiltinTypeId;
use crate::module::PythonModule;
use crate::mro;
use crate::multiple::PythonMultipleMembers;
use crate::record::{Location, ParameterKind};

// ============================================================================
// Member
// ============================================================================

/// The kind of a member, for display and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Type,
    Function,
    Method,
    Property,
    Constant,
    Module,
    Multiple,
    Unknown,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberKind::Type => "type",
            MemberKind::Function => "function",
            MemberKind::Method => "method",
            MemberKind::Property => "property",
            MemberKind::Constant => "constant",
            MemberKind::Module => "module",
            MemberKind::Multiple => "multiple",
            MemberKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A resolved member.
///
/// Cloning is cheap. Identity is pointer identity: two `Member`s are the same
/// node iff [`Member::ptr_eq`] holds.
#[derive(Clone)]
pub enum Member {
    Type(Arc<PythonType>),
    Function(Arc<PythonFunction>),
    Method(Arc<PythonMethod>),
    Property(Arc<PythonProperty>),
    Constant(Arc<PythonConstant>),
    Module(Arc<PythonModule>),
    Multiple(Arc<PythonMultipleMembers>),
    Unknown(Arc<UnknownMember>),
}

impl Member {
    pub fn kind(&self) -> MemberKind {
        match self {
            Member::Type(_) => MemberKind::Type,
            Member::Function(_) => MemberKind::Function,
            Member::Method(_) => MemberKind::Method,
            Member::Property(_) => MemberKind::Property,
            Member::Constant(_) => MemberKind::Constant,
            Member::Module(_) => MemberKind::Module,
            Member::Multiple(_) => MemberKind::Multiple,
            Member::Unknown(_) => MemberKind::Unknown,
        }
    }

    /// Whether both values are the same node.
    pub fn ptr_eq(&self, other: &Member) -> bool {
        self.address() == other.address()
    }

    fn address(&self) -> *const () {
        match self {
            Member::Type(m) => Arc::as_ptr(m) as *const (),
            Member::Function(m) => Arc::as_ptr(m) as *const (),
            Member::Method(m) => Arc::as_ptr(m) as *const (),
            Member::Property(m) => Arc::as_ptr(m) as *const (),
            Member::Constant(m) => Arc::as_ptr(m) as *const (),
            Member::Module(m) => Arc::as_ptr(m) as *const (),
            Member::Multiple(m) => Arc::as_ptr(m) as *const (),
            Member::Unknown(m) => Arc::as_ptr(m) as *const (),
        }
    }

    /// Documentation, where the node carries any. Module docs are only
    /// available once the module is loaded.
    pub fn doc(&self) -> Option<&str> {
        match self {
            Member::Type(t) => t.doc(),
            Member::Function(f) => f.doc(),
            Member::Method(m) => m.function().doc(),
            Member::Property(p) => p.doc(),
            Member::Module(m) => m.loaded_doc(),
            Member::Constant(_) | Member::Multiple(_) | Member::Unknown(_) => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            Member::Type(t) => t.location(),
            Member::Function(f) => f.location(),
            Member::Method(m) => m.function().location(),
            Member::Property(p) => p.location(),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Arc<PythonType>> {
        match self {
            Member::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&Arc<PythonModule>> {
        match self {
            Member::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&PythonFunction> {
        match self {
            Member::Function(f) => Some(f),
            Member::Method(m) => Some(m.function()),
            _ => None,
        }
    }

    pub fn as_multiple(&self) -> Option<&Arc<PythonMultipleMembers>> {
        match self {
            Member::Multiple(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakMember {
        match self {
            Member::Type(m) => WeakMember::Type(Arc::downgrade(m)),
            Member::Function(m) => WeakMember::Function(Arc::downgrade(m)),
            Member::Method(m) => WeakMember::Method(Arc::downgrade(m)),
            Member::Property(m) => WeakMember::Property(Arc::downgrade(m)),
            Member::Constant(m) => WeakMember::Constant(Arc::downgrade(m)),
            Member::Module(m) => WeakMember::Module(Arc::downgrade(m)),
            Member::Multiple(m) => WeakMember::Multiple(Arc::downgrade(m)),
            Member::Unknown(m) => WeakMember::Unknown(Arc::downgrade(m)),
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Type(t) => write!(f, "Type({})", t.qualified_name()),
            Member::Function(func) => write!(f, "Function({})", func.name()),
            Member::Method(m) => write!(f, "Method({})", m.function().name()),
            Member::Property(_) => write!(f, "Property"),
            Member::Constant(_) => write!(f, "Constant"),
            Member::Module(m) => write!(f, "Module({})", m.name()),
            Member::Multiple(m) => write!(f, "Multiple({})", m.name()),
            Member::Unknown(u) => write!(f, "Unknown({}: {})", u.name, u.kind),
        }
    }
}

/// Non-owning counterpart of [`Member`].
#[derive(Clone)]
pub(crate) enum WeakMember {
    Type(Weak<PythonType>),
    Function(Weak<PythonFunction>),
    Method(Weak<PythonMethod>),
    Property(Weak<PythonProperty>),
    Constant(Weak<PythonConstant>),
    Module(Weak<PythonModule>),
    Multiple(Weak<PythonMultipleMembers>),
    Unknown(Weak<UnknownMember>),
}

impl WeakMember {
    pub(crate) fn upgrade(&self) -> Option<Member> {
        Some(match self {
            WeakMember::Type(w) => Member::Type(w.upgrade()?),
            WeakMember::Function(w) => Member::Function(w.upgrade()?),
            WeakMember::Method(w) => Member::Method(w.upgrade()?),
            WeakMember::Property(w) => Member::Property(w.upgrade()?),
            WeakMember::Constant(w) => Member::Constant(w.upgrade()?),
            WeakMember::Module(w) => Member::Module(w.upgrade()?),
            WeakMember::Multiple(w) => Member::Multiple(w.upgrade()?),
            WeakMember::Unknown(w) => Member::Unknown(w.upgrade()?),
        })
    }
}

/// A member table entry: a node defined here, or a reference to one defined
/// elsewhere.
#[derive(Clone)]
pub(crate) enum MemberLink {
    Owned(Member),
    Linked(WeakMember),
}

impl MemberLink {
    pub(crate) fn linked(member: &Member) -> Self {
        MemberLink::Linked(member.downgrade())
    }

    pub(crate) fn get(&self) -> Option<Member> {
        match self {
            MemberLink::Owned(member) => Some(member.clone()),
            MemberLink::Linked(weak) => weak.upgrade(),
        }
    }
}

/// Where a member being read will be stored.
#[derive(Clone)]
pub(crate) enum ContainerRef {
    Module(Weak<PythonModule>),
    Type(Weak<PythonType>),
}

impl ContainerRef {
    /// Whether `member` is this container.
    pub(crate) fn is(&self, member: &Member) -> bool {
        match (self, member) {
            (ContainerRef::Module(w), Member::Module(m)) => {
                std::ptr::eq(w.as_ptr(), Arc::as_ptr(m))
            }
            (ContainerRef::Type(w), Member::Type(t)) => std::ptr::eq(w.as_ptr(), Arc::as_ptr(t)),
            _ => false,
        }
    }

    /// Name of the enclosing type, when reading class members.
    pub(crate) fn type_name(&self) -> Option<String> {
        match self {
            ContainerRef::Type(w) => w.upgrade().map(|t| t.name().to_string()),
            ContainerRef::Module(_) => None,
        }
    }
}

// ============================================================================
// Deferred Type Slots
// ============================================================================

/// A fixed number of type slots, each filled at most once.
///
/// Each slot corresponds to one type reference in the database. A slot that
/// is never filled (the reference could not be resolved) reads as empty;
/// callers treat empty as "no information".
#[derive(Clone)]
pub struct DeferredTypes {
    slots: Arc<[OnceLock<Vec<Weak<PythonType>>>]>,
}

impl DeferredTypes {
    pub(crate) fn with_len(len: usize) -> Self {
        let slots: Vec<OnceLock<Vec<Weak<PythonType>>>> =
            (0..len).map(|_| OnceLock::new()).collect();
        Self {
            slots: slots.into(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::with_len(0)
    }

    /// Fill a slot. Returns false if it was already filled or out of range.
    pub(crate) fn fill(&self, index: usize, types: Vec<Weak<PythonType>>) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.set(types).is_ok(),
            None => false,
        }
    }

    /// Number of type references, resolved or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether every slot has been settled by a lookup or fixup.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|slot| slot.get().is_some())
    }

    /// The resolved types, in slot order, without duplicates.
    pub fn resolved(&self) -> Vec<Arc<PythonType>> {
        let mut out: Vec<Arc<PythonType>> = Vec::new();
        for slot in self.slots.iter() {
            for ty in slot.get().into_iter().flatten().filter_map(Weak::upgrade) {
                if !out.iter().any(|seen| Arc::ptr_eq(seen, &ty)) {
                    out.push(ty);
                }
            }
        }
        out
    }
}

impl fmt::Debug for DeferredTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.resolved().iter().map(|t| t.qualified_name()).collect();
        f.debug_struct("DeferredTypes")
            .field("slots", &self.slots.len())
            .field("resolved", &names)
            .finish()
    }
}

// ============================================================================
// Types
// ============================================================================

/// A class.
pub struct PythonType {
    pub(crate) name: String,
    pub(crate) module: String,
    pub(crate) doc: Option<String>,
    pub(crate) builtin_id: BuiltinTypeId,
    pub(crate) is_builtin: bool,
    pub(crate) is_hidden: bool,
    pub(crate) location: Option<Location>,
    pub(crate) bases: DeferredTypes,
    pub(crate) explicit_mro: Option<DeferredTypes>,
    pub(crate) members: RwLock<HashMap<String, MemberLink>>,
}

impl PythonType {
    pub(crate) fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            doc: None,
            builtin_id: BuiltinTypeId::Unknown,
            is_builtin: false,
            is_hidden: false,
            location: None,
            bases: DeferredTypes::empty(),
            explicit_mro: None,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the declaring module.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn builtin_id(&self) -> BuiltinTypeId {
        self.builtin_id
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    /// Hidden types are only visible to builtin-type lookups.
    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Direct bases, in declaration order. Unresolved bases are omitted.
    pub fn bases(&self) -> Vec<Arc<PythonType>> {
        self.bases.resolved()
    }

    /// The raw base slots, for callers that need to know what is unresolved.
    pub fn base_slots(&self) -> &DeferredTypes {
        &self.bases
    }

    /// Method resolution order, starting with `self`.
    ///
    /// Uses the order recorded in the database when present, otherwise C3
    /// over the resolved bases. Never contains an unresolved entry.
    pub fn mro(self: &Arc<Self>) -> Vec<Arc<PythonType>> {
        if let Some(explicit) = &self.explicit_mro {
            let recorded = explicit.resolved();
            if !recorded.is_empty() {
                let mut mro = vec![Arc::clone(self)];
                mro.extend(recorded.into_iter().filter(|t| !Arc::ptr_eq(t, self)));
                return mro;
            }
        }
        mro::linearize_or_fallback(&TypeKey(Arc::clone(self)), |key| {
            key.0.bases().into_iter().map(TypeKey).collect()
        })
        .into_iter()
        .map(|key| key.0)
        .collect()
    }

    /// A member defined directly on this type.
    pub fn get_member(&self, name: &str) -> Option<Member> {
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        members.get(name).and_then(MemberLink::get)
    }

    /// A member defined on this type or inherited through the MRO.
    pub fn lookup_member(self: &Arc<Self>, name: &str) -> Option<Member> {
        self.mro().iter().find_map(|ty| ty.get_member(name))
    }

    /// Names of members defined directly on this type, sorted.
    pub fn member_names(&self) -> Vec<String> {
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = members.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn insert_member(&self, name: String, link: MemberLink) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members.insert(name, link);
    }
}

impl fmt::Debug for PythonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonType")
            .field("name", &self.qualified_name())
            .field("builtin_id", &self.builtin_id)
            .field("bases", &self.bases)
            .finish()
    }
}

/// Pointer-identity key for MRO computation.
#[derive(Clone)]
struct TypeKey(Arc<PythonType>);

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.qualified_name())
    }
}

// ============================================================================
// Functions
// ============================================================================

#[derive(Debug)]
pub struct PythonParameter {
    pub(crate) name: String,
    pub(crate) kind: ParameterKind,
    pub(crate) default_value: Option<String>,
    pub(crate) types: DeferredTypes,
}

impl PythonParameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn types(&self) -> Vec<Arc<PythonType>> {
        self.types.resolved()
    }
}

#[derive(Debug)]
pub struct PythonOverload {
    pub(crate) doc: Option<String>,
    pub(crate) return_doc: Option<String>,
    pub(crate) params: Vec<PythonParameter>,
    pub(crate) return_types: DeferredTypes,
}

impl PythonOverload {
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn return_doc(&self) -> Option<&str> {
        self.return_doc.as_deref()
    }

    pub fn parameters(&self) -> &[PythonParameter] {
        &self.params
    }

    /// Possible return types. Empty means unknown.
    pub fn return_types(&self) -> Vec<Arc<PythonType>> {
        self.return_types.resolved()
    }
}

#[derive(Debug)]
pub struct PythonFunction {
    pub(crate) name: String,
    pub(crate) module: String,
    pub(crate) declaring_type: Option<String>,
    pub(crate) doc: Option<String>,
    pub(crate) is_builtin: bool,
    pub(crate) is_static: bool,
    pub(crate) location: Option<Location>,
    pub(crate) overloads: Vec<PythonOverload>,
}

impl PythonFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Name of the class this function is defined in, if any.
    pub fn declaring_type(&self) -> Option<&str> {
        self.declaring_type.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn overloads(&self) -> &[PythonOverload] {
        &self.overloads
    }
}

/// A method descriptor: a function plus binding information.
#[derive(Debug)]
pub struct PythonMethod {
    pub(crate) function: PythonFunction,
    pub(crate) is_bound: bool,
}

impl PythonMethod {
    pub fn function(&self) -> &PythonFunction {
        &self.function
    }

    pub fn is_bound(&self) -> bool {
        self.is_bound
    }
}

// ============================================================================
// Properties, Constants, Unknown
// ============================================================================

#[derive(Debug)]
pub struct PythonProperty {
    pub(crate) doc: Option<String>,
    pub(crate) location: Option<Location>,
    pub(crate) types: DeferredTypes,
}

impl PythonProperty {
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn types(&self) -> Vec<Arc<PythonType>> {
        self.types.resolved()
    }
}

/// A module- or class-level value of known type.
#[derive(Debug)]
pub struct PythonConstant {
    pub(crate) types: DeferredTypes,
}

impl PythonConstant {
    pub fn types(&self) -> Vec<Arc<PythonType>> {
        self.types.resolved()
    }
}

/// A member whose kind this reader does not understand.
#[derive(Debug)]
pub struct UnknownMember {
    pub name: String,
    pub kind: String,
}
