//! Multiple-member resolution.
//!
//! A name with several candidate definitions (platform or version specific)
//! is read into one [`PythonMultipleMembers`] node. Each candidate is read
//! independently and may resolve late through a fixup. While any candidate is
//! pending the node answers queries from what has resolved so far; once all
//! have settled it collapses to a de-duplicated list that excludes the
//! container it lives in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::database::TypeDatabase;
use crate::members::{ContainerRef, Member, MemberLink};
use crate::record::{MemberRecord, RecordKind, TypeList};
use crate::sink::TypeSink;

enum Candidate {
    Pending(MemberRecord),
    Resolved(MemberLink),
    /// Never resolved, or excluded by a version gate.
    Skipped,
}

enum MultipleState {
    Partial(Vec<Candidate>),
    Resolved(Vec<MemberLink>),
}

/// Several definitions of one name.
pub struct PythonMultipleMembers {
    name: String,
    container: ContainerRef,
    state: RwLock<MultipleState>,
    /// Set while [`PythonMultipleMembers::assign_types`] looks up pending
    /// candidates, which may lead back to this node.
    assigning: AtomicBool,
}

/// Clears the `assigning` flag when the outermost lookup finishes.
struct AssignGuard<'a>(&'a AtomicBool);

impl Drop for AssignGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PythonMultipleMembers {
    pub(crate) fn new(
        name: impl Into<String>,
        container: ContainerRef,
        records: &[MemberRecord],
    ) -> Self {
        let candidates = records.iter().cloned().map(Candidate::Pending).collect();
        Self {
            name: name.into(),
            container,
            state: RwLock::new(MultipleState::Partial(candidates)),
            assigning: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether every candidate has settled.
    pub fn is_resolved(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        matches!(*state, MultipleState::Resolved(_))
    }

    /// The distinct resolved members, excluding the container.
    ///
    /// Valid at any point; before full resolution it returns the candidates
    /// that have resolved so far.
    pub fn members(&self) -> Vec<Member> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let links: Vec<&MemberLink> = match &*state {
            MultipleState::Resolved(links) => links.iter().collect(),
            MultipleState::Partial(candidates) => candidates
                .iter()
                .filter_map(|c| match c {
                    Candidate::Resolved(link) => Some(link),
                    _ => None,
                })
                .collect(),
        };
        self.distinct(links.into_iter().filter_map(MemberLink::get))
    }

    /// Settle candidate `index`. Collapses the node once nothing is pending.
    pub(crate) fn resolve(&self, index: usize, link: Option<MemberLink>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let MultipleState::Partial(candidates) = &mut *state else {
            return;
        };
        let Some(slot) = candidates.get_mut(index) else {
            return;
        };
        if !matches!(slot, Candidate::Pending(_)) {
            return;
        }
        *slot = match link {
            Some(link) => Candidate::Resolved(link),
            None => Candidate::Skipped,
        };
        if candidates.iter().any(|c| matches!(c, Candidate::Pending(_))) {
            return;
        }

        let mut finished: Vec<(MemberLink, Member)> = Vec::new();
        for candidate in candidates.drain(..) {
            let Candidate::Resolved(link) = candidate else {
                continue;
            };
            let Some(member) = link.get() else {
                continue;
            };
            if self.container.is(&member) || finished.iter().any(|(_, seen)| seen.ptr_eq(&member)) {
                continue;
            }
            finished.push((link, member));
        }
        debug!("multiple member '{}' resolved to {} entries", self.name, finished.len());
        *state = MultipleState::Resolved(finished.into_iter().map(|(link, _)| link).collect());
    }

    /// Push every type this node can stand for into `sink`.
    ///
    /// Resolved type candidates are pushed directly. Candidates still pending
    /// that name types are looked up again, so a partially resolved node
    /// still contributes everything it will eventually resolve to. A lookup
    /// that leads back to this node (a candidate naming the node itself, or a
    /// cycle through other multiple members) only sees the resolved types.
    pub(crate) fn assign_types(&self, db: &TypeDatabase, sink: &TypeSink) {
        for member in self.members() {
            if let Member::Type(ty) = member {
                sink.push(ty);
            }
        }
        if self.assigning.swap(true, Ordering::AcqRel) {
            debug!("multiple member '{}' refers back to itself", self.name);
            return;
        }
        let _guard = AssignGuard(&self.assigning);

        let mut pending: Vec<TypeList> = Vec::new();
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let MultipleState::Partial(candidates) = &*state {
                for candidate in candidates {
                    if let Candidate::Pending(MemberRecord {
                        kind: RecordKind::TypeRef(list),
                        ..
                    }) = candidate
                    {
                        pending.push(list.clone());
                    }
                }
            }
        }

        for tref in pending.iter().flatten() {
            db.reader().lookup_type(db, tref, sink.clone());
        }
    }

    fn distinct(&self, members: impl Iterator<Item = Member>) -> Vec<Member> {
        let mut out: Vec<Member> = Vec::new();
        for member in members {
            if self.container.is(&member) || out.iter().any(|seen| seen.ptr_eq(&member)) {
                continue;
            }
            out.push(member);
        }
        out
    }
}

impl std::fmt::Debug for PythonMultipleMembers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonMultipleMembers")
            .field("name", &self.name)
            .field("members", &self.members())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::members::{PythonType, UnknownMember};
    use crate::record::TypeRef;

    fn typeref_record(name: &str) -> MemberRecord {
        MemberRecord::new(RecordKind::TypeRef(vec![TypeRef::new(Some("m"), name)]))
    }

    fn owned_type(name: &str) -> (Arc<PythonType>, MemberLink) {
        let ty = Arc::new(PythonType::new(name, "m"));
        let link = MemberLink::Owned(Member::Type(Arc::clone(&ty)));
        (ty, link)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    #[test]
    fn test_collapses_when_all_settled() {
        let container_type = Arc::new(PythonType::new("Holder", "m"));
        let container = ContainerRef::Type(Arc::downgrade(&container_type));
        let records = vec![typeref_record("A"), typeref_record("B"), typeref_record("Holder")];
        let multiple = PythonMultipleMembers::new("x", container, &records);

        let (_a, a_link) = owned_type("A");
        let (_b, b_link) = owned_type("B");
        multiple.resolve(0, Some(a_link));
        assert!(!multiple.is_resolved());
        assert_eq!(multiple.members().len(), 1);

        multiple.resolve(1, Some(b_link));
        multiple.resolve(2, Some(MemberLink::linked(&Member::Type(Arc::clone(&container_type)))));
        assert!(multiple.is_resolved());
        let members = multiple.members();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| !m.ptr_eq(&Member::Type(Arc::clone(&container_type)))));
    }

    #[test]
    fn test_duplicate_identities_collapse() {
        let holder = Arc::new(PythonType::new("Holder", "m"));
        let records = vec![typeref_record("A"), typeref_record("A")];
        let container = ContainerRef::Type(Arc::downgrade(&holder));
        let multiple = PythonMultipleMembers::new("x", container, &records);
        let a = Arc::new(PythonType::new("A", "m"));
        multiple.resolve(0, Some(MemberLink::linked(&Member::Type(Arc::clone(&a)))));
        multiple.resolve(1, Some(MemberLink::linked(&Member::Type(Arc::clone(&a)))));
        assert!(multiple.is_resolved());
        assert_eq!(multiple.members().len(), 1);
    }

    #[test]
    fn test_skipped_candidates_still_allow_collapse() {
        let holder = Arc::new(PythonType::new("Holder", "m"));
        let records = vec![typeref_record("A"), typeref_record("Missing")];
        let container = ContainerRef::Type(Arc::downgrade(&holder));
        let multiple = PythonMultipleMembers::new("x", container, &records);
        let unknown = Member::Unknown(Arc::new(UnknownMember {
            name: "x".to_string(),
            kind: "future".to_string(),
        }));
        multiple.resolve(0, Some(MemberLink::Owned(unknown)));
        multiple.resolve(1, None);
        assert!(multiple.is_resolved());
        assert_eq!(multiple.members().len(), 1);
    }

    #[test]
    fn test_resolve_ignores_repeat_and_out_of_range() {
        let holder = Arc::new(PythonType::new("Holder", "m"));
        let records = vec![typeref_record("A"), typeref_record("B")];
        let container = ContainerRef::Type(Arc::downgrade(&holder));
        let multiple = PythonMultipleMembers::new("x", container, &records);
        let (_a, a_link) = owned_type("A");
        let (_b, b_link) = owned_type("B");
        multiple.resolve(0, Some(a_link));
        multiple.resolve(0, Some(b_link));
        multiple.resolve(7, None);
        assert!(!multiple.is_resolved());
        assert_eq!(multiple.members()[0].as_type().unwrap().name(), "A");
    }
}
