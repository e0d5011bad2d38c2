//! Method Resolution Order (MRO) computation using C3 linearization.
//!
//! Types read from the database usually carry an explicit `mro` written by the
//! scraper. When they do not, the order is computed from the resolved bases.
//!
//! # Algorithm
//!
//! C3 linearization guarantees:
//!
//! - Children precede their parents
//! - Bases keep the order they were declared in
//! - A consistent ordering exists across the hierarchy
//!
//! Database input is not trusted to be consistent. A hierarchy that has no C3
//! order, or that is cyclic (`class C(C)` written by a broken scraper), falls
//! back to a de-duplicated depth-first order via [`linearize_or_fallback`], so
//! a query never fails or recurses forever.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

use thiserror::Error;
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during MRO computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MroError {
    /// The inheritance hierarchy has no valid C3 linearization.
    #[error("inconsistent hierarchy for class '{class_name}': cannot compute MRO")]
    InconsistentHierarchy { class_name: String },

    /// A class is its own ancestor.
    #[error("cyclic hierarchy through class '{class_name}'")]
    Cycle { class_name: String },
}

/// Result type for MRO operations.
pub type MroResult<T> = Result<T, MroError>;

// ============================================================================
// C3 Linearization
// ============================================================================

/// Compute the MRO of `class` with C3 linearization.
///
/// `bases` returns the direct bases of a class in declaration order.
pub fn linearize<N, F>(class: &N, bases: F) -> MroResult<Vec<N>>
where
    N: Clone + Eq + Hash + Display,
    F: Fn(&N) -> Vec<N>,
{
    let mut visiting = HashSet::new();
    linearize_internal(class, &bases, &mut visiting)
}

fn linearize_internal<N, F>(class: &N, bases: &F, visiting: &mut HashSet<N>) -> MroResult<Vec<N>>
where
    N: Clone + Eq + Hash + Display,
    F: Fn(&N) -> Vec<N>,
{
    if !visiting.insert(class.clone()) {
        return Err(MroError::Cycle {
            class_name: class.to_string(),
        });
    }

    let direct = bases(class);
    if direct.is_empty() {
        visiting.remove(class);
        return Ok(vec![class.clone()]);
    }

    let mut seqs: Vec<Vec<N>> = Vec::with_capacity(direct.len() + 1);
    for base in &direct {
        match linearize_internal(base, bases, visiting) {
            Ok(base_mro) => seqs.push(base_mro),
            Err(err) => {
                visiting.remove(class);
                return Err(err);
            }
        }
    }
    seqs.push(direct);

    let mut mro = vec![class.clone()];
    let merged = merge(&mut seqs);
    visiting.remove(class);
    match merged {
        Some(merged) => {
            mro.extend(merged);
            Ok(mro)
        }
        None => Err(MroError::InconsistentHierarchy {
            class_name: class.to_string(),
        }),
    }
}

/// C3 merge: repeatedly take the first head that appears in no tail.
fn merge<N: Clone + Eq>(seqs: &mut Vec<Vec<N>>) -> Option<Vec<N>> {
    let mut result = Vec::new();

    loop {
        seqs.retain(|seq| !seq.is_empty());

        if seqs.is_empty() {
            return Some(result);
        }

        let mut candidate = None;
        for seq in seqs.iter() {
            let head = &seq[0];
            let in_tail = seqs.iter().any(|s| s.len() > 1 && s[1..].contains(head));
            if !in_tail {
                candidate = Some(head.clone());
                break;
            }
        }

        // No candidate: inconsistent hierarchy
        let cand = candidate?;

        for seq in seqs.iter_mut() {
            if seq.first() == Some(&cand) {
                seq.remove(0);
            }
        }
        result.push(cand);
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// C3 when possible, otherwise a de-duplicated depth-first order.
pub fn linearize_or_fallback<N, F>(class: &N, bases: F) -> Vec<N>
where
    N: Clone + Eq + Hash + Display,
    F: Fn(&N) -> Vec<N>,
{
    match linearize(class, &bases) {
        Ok(mro) => mro,
        Err(err) => {
            debug!("falling back to depth-first MRO: {}", err);
            depth_first(class, &bases)
        }
    }
}

fn depth_first<N, F>(class: &N, bases: &F) -> Vec<N>
where
    N: Clone + Eq + Hash,
    F: Fn(&N) -> Vec<N>,
{
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![class.clone()];
    while let Some(next) = stack.pop() {
        if !seen.insert(next.clone()) {
            continue;
        }
        let mut direct = bases(&next);
        direct.reverse();
        stack.extend(direct);
        order.push(next);
    }
    order
}
