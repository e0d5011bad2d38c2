//! Completion handles for deferred reads.
//!
//! A read that cannot finish immediately hands its handle to a fixup. The
//! handle settles its target exactly once: when it is completed, or when it
//! is dropped (the fixup gave up, or a version gate skipped the record).
//! Dropping is the only way an unresolved read is finalized, so nothing can
//! be left waiting forever.

use std::sync::{Arc, Mutex};

use crate::members::{DeferredTypes, Member, MemberLink, PythonType};

// ============================================================================
// MemberSink
// ============================================================================

type AssignFn = Box<dyn FnOnce(Option<MemberLink>) + Send>;

/// Receives the member produced by one record.
///
/// `assign` runs once: with the member on [`MemberSink::deliver`], or with
/// `None` when the sink is dropped unfulfilled.
pub(crate) struct MemberSink {
    assign: Option<AssignFn>,
}

impl MemberSink {
    pub(crate) fn new(assign: impl FnOnce(Option<MemberLink>) + Send + 'static) -> Self {
        Self {
            assign: Some(Box::new(assign)),
        }
    }

    pub(crate) fn deliver(mut self, link: MemberLink) {
        if let Some(assign) = self.assign.take() {
            assign(Some(link));
        }
    }
}

impl Drop for MemberSink {
    fn drop(&mut self) {
        if let Some(assign) = self.assign.take() {
            assign(None);
        }
    }
}

// ============================================================================
// TypeSink
// ============================================================================

enum TypeTarget {
    /// One slot of a deferred type list.
    Slot(DeferredTypes, usize),
    /// A `typeref` member: the first type found becomes the member.
    Member(MemberSink),
}

struct TypeSinkInner {
    found: Mutex<Vec<Arc<PythonType>>>,
    target: Mutex<Option<TypeTarget>>,
}

/// Collects the types a lookup produces.
///
/// Clones share one collection. A lookup that expands into several lookups
/// (a multiple-member whose candidates are still pending) clones the sink
/// per sub-lookup; the target is settled when the last clone is dropped.
#[derive(Clone)]
pub(crate) struct TypeSink(Arc<TypeSinkInner>);

impl TypeSink {
    fn with_target(target: TypeTarget) -> Self {
        TypeSink(Arc::new(TypeSinkInner {
            found: Mutex::new(Vec::new()),
            target: Mutex::new(Some(target)),
        }))
    }

    pub(crate) fn slot(types: DeferredTypes, index: usize) -> Self {
        Self::with_target(TypeTarget::Slot(types, index))
    }

    pub(crate) fn member(sink: MemberSink) -> Self {
        Self::with_target(TypeTarget::Member(sink))
    }

    pub(crate) fn push(&self, ty: Arc<PythonType>) {
        let mut found = self.0.found.lock().unwrap_or_else(|e| e.into_inner());
        if !found.iter().any(|seen| Arc::ptr_eq(seen, &ty)) {
            found.push(ty);
        }
    }
}

impl Drop for TypeSinkInner {
    fn drop(&mut self) {
        let found = std::mem::take(self.found.get_mut().unwrap_or_else(|e| e.into_inner()));
        let target = self.target.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        match target {
            Some(TypeTarget::Slot(types, index)) => {
                types.fill(index, found.iter().map(Arc::downgrade).collect());
            }
            Some(TypeTarget::Member(sink)) => {
                if let Some(first) = found.into_iter().next() {
                    sink.deliver(MemberLink::linked(&Member::Type(first)));
                }
            }
            None => {}
        }
    }
}
