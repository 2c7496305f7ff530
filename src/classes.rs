//! Equivalence-class store (C2)
//!
//! Holds the candidate partition over AIG nodes. Classes only ever split
//! (never merge) over the life of a refinement run; the representative of
//! a class is always its smallest-id member, and const-1 candidates form
//! one designated class tracked separately from the general multi-node
//! classes (§3).
//!
//! Storage follows the arena re-architecture from the design notes: a
//! dense, id-ordered `Vec<NodeId>` per class, plus a `repr` side table
//! mapping any node to the representative of its class in O(1). Splitting
//! a class builds the surviving partitions in temporary buffers and swaps
//! them in, rather than threading intrusive next-pointers through the
//! nodes themselves.

#![forbid(unsafe_code)]

use crate::aig::{Aig, NodeId};
use crate::sim::Sim;
use std::collections::HashMap;

/// Errors raised while maintaining the class store.
#[derive(Debug, thiserror::Error)]
pub enum ClassError {
    #[error("node {0:?} is not a current class representative")]
    NotARepresentative(NodeId),
}

/// A candidate equivalence-class partition over an AIG's nodes.
#[derive(Debug, Default)]
pub struct ClassStore {
    /// repr[id] = Some(r) if id is a non-representative member of class r;
    /// None if id is its own representative (singleton or unclassified).
    repr: HashMap<NodeId, NodeId>,
    /// Dense, id-ascending members of each non-trivial class, keyed by repr id.
    members: HashMap<NodeId, Vec<NodeId>>,
    /// Members of the designated const-1 class, id-ascending.
    const1: Vec<NodeId>,
    const_corr: bool,
}

impl ClassStore {
    pub fn new() -> Self {
        ClassStore::default()
    }

    pub fn n_classes(&self) -> usize {
        self.members.len()
    }

    pub fn n_cand1(&self) -> usize {
        self.const1.len()
    }

    /// Sum of `|C| - 1` across all non-trivial non-const1 classes — the
    /// number of literals that would be eliminated by merging.
    pub fn n_lits(&self) -> usize {
        self.members.values().map(|m| m.len() - 1).sum()
    }

    /// The representative of `n`'s class, or `n` itself if it is
    /// unclassified/singleton. Returns `None` if `n` is a const-1 candidate
    /// (callers distinguish via `is_const1_cand`).
    pub fn representative(&self, n: NodeId) -> NodeId {
        *self.repr.get(&n).unwrap_or(&n)
    }

    pub fn is_const1_cand(&self, n: NodeId) -> bool {
        self.const1.binary_search(&n).is_ok()
    }

    pub fn class_members(&self, repr: NodeId) -> &[NodeId] {
        self.members.get(&repr).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn const1_members(&self) -> &[NodeId] {
        &self.const1
    }

    /// `prepare_simple`: tag every eligible node (or only LOs, when
    /// `latch_only`) as a const-1 candidate. `max_levels` is accepted for
    /// interface parity but this engine has no level structure to cap
    /// against until the sweeper assigns one; nodes beyond `max_levels`
    /// (when `Some`) are simply excluded up front by the caller via
    /// `eligible`, so this routine takes the final candidate set directly.
    pub fn prepare_simple(&mut self, aig: &Aig, latch_only: bool) {
        self.repr.clear();
        self.members.clear();
        self.const1.clear();
        let nodes: Vec<NodeId> = if latch_only {
            aig.los.clone()
        } else {
            aig.and_nodes_topo().into_iter().chain(aig.los.iter().copied()).collect()
        };
        self.const1 = nodes;
        self.const1.sort();
    }

    /// `prepare_hash`: bucket candidate nodes by their simulation hash.
    /// Nodes whose normalized simulation is all-zero become const-1
    /// candidates; the rest are grouped by identical hash into classes
    /// (later split further by exact equality, see `refine_all`). When
    /// `const_corr` is set, multi-node buckets are discarded entirely and
    /// only the const-1 class is kept.
    pub fn prepare_hash(&mut self, sim: &Sim, cands: &[NodeId], const_corr: bool) {
        self.repr.clear();
        self.members.clear();
        self.const1.clear();
        self.const_corr = const_corr;

        let mut buckets: HashMap<u64, Vec<NodeId>> = HashMap::new();
        for &n in cands {
            if sim.obj_is_zero(n) {
                self.const1.push(n);
                continue;
            }
            buckets.entry(sim.obj_hash_word(n)).or_default().push(n);
        }
        self.const1.sort();

        if const_corr {
            return;
        }
        for (_, mut bucket) in buckets {
            if bucket.len() < 2 {
                continue;
            }
            bucket.sort();
            let repr = bucket[0];
            for &m in &bucket[1..] {
                self.repr.insert(m, repr);
            }
            self.members.insert(repr, bucket);
        }
    }

    /// `refine_one`: partition the class rooted at `repr` by `sim`'s
    /// equality predicate. The first member that differs from `repr`
    /// becomes the representative of a freshly split-off class. When
    /// `recursive` and that new class still has more than one member,
    /// keeps splitting until every resulting class is internally
    /// equality-consistent. Returns the number of new classes created.
    pub fn refine_one(&mut self, repr: NodeId, sim: &Sim, recursive: bool) -> Result<usize, ClassError> {
        let Some(class) = self.members.get(&repr).cloned() else {
            return Err(ClassError::NotARepresentative(repr));
        };
        let mut created = 0usize;
        let mut remaining = class;
        loop {
            let anchor = remaining[0];
            let mut same = vec![anchor];
            let mut diff = Vec::new();
            for &m in &remaining[1..] {
                if sim.objs_equal_word(anchor, m) {
                    same.push(m);
                } else {
                    diff.push(m);
                }
            }
            self.install_class(anchor, same);
            if diff.is_empty() {
                break;
            }
            created += 1;
            if !recursive {
                self.install_class(diff[0], diff);
                break;
            }
            remaining = diff;
        }
        Ok(created)
    }

    fn install_class(&mut self, repr: NodeId, mut members: Vec<NodeId>) {
        members.sort();
        debug_assert_eq!(members[0], repr, "representative must be the smallest id");
        if members.len() == 1 {
            self.members.remove(&repr);
            self.repr.remove(&repr);
            return;
        }
        for &m in &members[1..] {
            self.repr.insert(m, repr);
        }
        self.repr.remove(&repr);
        self.members.insert(repr, members);
    }

    /// `refine_all`: invoke `refine_one` on every current representative.
    /// Returns the total number of new classes created.
    pub fn refine_all(&mut self, sim: &Sim, recursive: bool) -> usize {
        let reprs: Vec<NodeId> = self.members.keys().copied().collect();
        let mut total = 0;
        for r in reprs {
            total += self.refine_one(r, sim, recursive).unwrap_or(0);
        }
        total
    }

    /// `refine_const1`: drop any const-1 member whose simulation is no
    /// longer all-zero; the first such node becomes the representative of
    /// a newly split-off class (further split by `refine_all` semantics
    /// when `recursive`).
    pub fn refine_const1(&mut self, sim: &Sim, recursive: bool) -> usize {
        if self.const_corr {
            self.const1.retain(|&n| sim.obj_is_zero(n));
            return 0;
        }
        let mut still_zero = Vec::new();
        let mut fell_out = Vec::new();
        for &n in &self.const1 {
            if sim.obj_is_zero(n) {
                still_zero.push(n);
            } else {
                fell_out.push(n);
            }
        }
        self.const1 = still_zero;
        if fell_out.is_empty() {
            return 0;
        }
        let repr = fell_out[0];
        self.install_class(repr, fell_out);
        if recursive {
            self.refine_one(repr, sim, true).unwrap_or(0) + 1
        } else {
            1
        }
    }

    /// `remove_node`: detach `n` from its class. If the class's remaining
    /// size drops to 1, the class is destroyed and its last member
    /// downgraded to a singleton representative.
    pub fn remove_node(&mut self, n: NodeId) {
        if let Some(pos) = self.const1.iter().position(|&x| x == n) {
            self.const1.remove(pos);
            return;
        }
        let repr = self.representative(n);
        if repr == n {
            // n was itself a representative; reassign to the next member.
            if let Some(mut members) = self.members.remove(&repr) {
                members.retain(|&x| x != n);
                if members.len() > 1 {
                    let new_repr = members[0];
                    for &m in &members[1..] {
                        self.repr.insert(m, new_repr);
                    }
                    self.repr.remove(&new_repr);
                    self.members.insert(new_repr, members);
                } else if members.len() == 1 {
                    self.repr.remove(&members[0]);
                }
            }
            return;
        }
        if let Some(members) = self.members.get_mut(&repr) {
            members.retain(|&x| x != n);
            self.repr.remove(&n);
            if members.len() <= 1 {
                self.members.remove(&repr);
                self.repr.remove(&repr);
            }
        }
    }

    /// Debug-only consistency check over the invariants stated in §4.2.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        for (&repr, members) in &self.members {
            assert!(members.len() > 1, "a stored class must have >1 member");
            assert_eq!(members[0], repr, "repr must be the minimum-id member");
            assert!(members.windows(2).all(|w| w[0] < w[1]), "members must be id-ascending");
            for &m in &members[1..] {
                assert_eq!(self.repr.get(&m), Some(&repr));
            }
        }
        let computed_lits: usize = self.members.values().map(|m| m.len() - 1).sum();
        assert_eq!(computed_lits, self.n_lits());
        let mut sorted_const1 = self.const1.clone();
        sorted_const1.sort();
        assert_eq!(sorted_const1, self.const1, "const1 must stay id-ascending");
    }
}
