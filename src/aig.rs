//! AIG arena: index-based And-Inverter Graph storage
//!
//! The source system this engine is modeled on couples node identity with
//! raw pointers and uses scratch pointer fields for unrelated purposes
//! ("next frame copy" and "equivalence representative" reuse the same slot).
//! Here the graph is a plain arena (`Vec<Node>`) addressed by `NodeId`, and
//! every side-role (phase, simulation words, equivalence representative,
//! frame mapping, SAT variable) lives in its own side table owned by the
//! component that needs it. This makes cloning a partition, or re-running a
//! sweep from scratch, a matter of cloning a `Vec`, never a pointer graph.
//!
//! This module intentionally stays small: allocation, fanin wiring, and a
//! topological walk are the only primitives the rest of the engine needs.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a node in the arena. Index 0 is reserved for constant-1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The constant-1 node, always id 0.
    pub const CONST1: NodeId = NodeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A fanin edge: a node id plus a complement (inversion) bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lit {
    pub node: NodeId,
    pub complement: bool,
}

impl Lit {
    #[inline]
    pub fn new(node: NodeId, complement: bool) -> Self {
        Lit { node, complement }
    }

    #[inline]
    pub fn positive(node: NodeId) -> Self {
        Lit { node, complement: false }
    }

    #[inline]
    pub fn negate(self) -> Self {
        Lit { node: self.node, complement: !self.complement }
    }

    pub const CONST0: Lit = Lit { node: NodeId::CONST1, complement: true };
    pub const CONST1: Lit = Lit { node: NodeId::CONST1, complement: false };
}

/// The kind of a node in the arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Constant-1 driver, always node 0.
    Const1,
    /// Primary input: no fanins, free each frame.
    Pi,
    /// Latch output (state bit read at the start of a frame).
    /// Carries the index of its paired latch input (LI) among `co`s of kind `Li`.
    Lo { reg: u32 },
    /// Two-input AND gate.
    And { fanin0: Lit, fanin1: Lit },
}

/// The kind of a combinational output (PO or LI); COs are not arena nodes,
/// they are named fanin edges recorded separately from internal nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoKind {
    /// Primary output.
    Po,
    /// Latch input, paired with LO register `reg`.
    Li { reg: u32 },
}

/// A combinational output: a named fanin edge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Co {
    pub kind: CoKind,
    pub fanin: Lit,
}

/// An index-based And-Inverter Graph.
///
/// Nodes are stored in a single arena in creation order; `Const1` is always
/// node 0. `Pi` and `Lo` nodes are combinational inputs (CIs); `And` nodes
/// are internal gates. Combinational outputs (`Co`, POs and LIs) are stored
/// separately since they carry no id of their own, only a fanin edge.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Aig {
    nodes: Vec<NodeKind>,
    /// Node id of each PI, in declaration order.
    pub pis: Vec<NodeId>,
    /// Node id of each LO, in register order (`los[r]` pairs with `lis[r]`).
    pub los: Vec<NodeId>,
    /// Combinational outputs: POs first conceptually via `CoKind::Po`,
    /// LIs via `CoKind::Li`; both live in the same dense vector, in
    /// declaration order, so an index into `cos` is stable.
    pub cos: Vec<Co>,
    /// Number of trailing POs (within the `Po`-kind subsequence) that are
    /// constraint outputs rather than property outputs. See C7.
    pub n_constrs: usize,
    /// The node's value under the all-zero CI assignment ("phase").
    phase: Vec<bool>,
}

impl Aig {
    pub fn new() -> Self {
        let mut aig = Aig { nodes: Vec::new(), pis: Vec::new(), los: Vec::new(), cos: Vec::new(), n_constrs: 0, phase: Vec::new() };
        aig.nodes.push(NodeKind::Const1);
        aig.phase.push(true);
        aig
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()]
    }

    /// Value of `id` under the all-zero CI assignment, recomputed lazily is
    /// unnecessary here: phases are filled in topological order as nodes are
    /// created (AND gates only ever reference earlier ids).
    pub fn phase(&self, id: NodeId) -> bool {
        self.phase[id.index()]
    }

    pub fn lit_phase(&self, lit: Lit) -> bool {
        self.phase(lit.node) ^ lit.complement
    }

    fn push(&mut self, kind: NodeKind, phase: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(kind);
        self.phase.push(phase);
        id
    }

    pub fn add_pi(&mut self) -> NodeId {
        let id = self.push(NodeKind::Pi, false);
        self.pis.push(id);
        id
    }

    /// Allocate a new register: an LO node (phase fixed at `init_phase`,
    /// almost always `false`) and return its id. The paired LI is added
    /// later via `add_li`.
    pub fn add_lo(&mut self, init_phase: bool) -> NodeId {
        let reg = self.los.len() as u32;
        let id = self.push(NodeKind::Lo { reg }, init_phase);
        self.los.push(id);
        id
    }

    /// Two-input AND. Phase is computed from fanin phases, matching the
    /// "phase under all-zero CI assignment" convention used throughout the
    /// simulator for normalization.
    pub fn add_and(&mut self, fanin0: Lit, fanin1: Lit) -> NodeId {
        // Structural hashing on (fanin0, fanin1) is the AIG's usual job but
        // is out of scope here (§1); callers are responsible for not
        // creating duplicate gates if that matters to them.
        let phase = self.lit_phase(fanin0) && self.lit_phase(fanin1);
        self.push(NodeKind::And { fanin0, fanin1 }, phase)
    }

    pub fn add_po(&mut self, fanin: Lit) {
        self.cos.push(Co { kind: CoKind::Po, fanin });
    }

    /// Mark the last `n` POs added as constraint outputs (C7). Must be
    /// called after all constraint POs have been pushed.
    pub fn set_constrs(&mut self, n: usize) {
        self.n_constrs = n;
    }

    pub fn add_li(&mut self, reg: u32, fanin: Lit) {
        self.cos.push(Co { kind: CoKind::Li { reg }, fanin });
    }

    pub fn reg_count(&self) -> usize {
        self.los.len()
    }

    /// Iterate POs (property outputs, excluding constraints) in declaration order.
    pub fn property_pos(&self) -> impl Iterator<Item = &Co> {
        let n_constrs = self.n_constrs;
        let po_count = self.cos.iter().filter(|c| matches!(c.kind, CoKind::Po)).count();
        self.cos
            .iter()
            .filter(|c| matches!(c.kind, CoKind::Po))
            .take(po_count.saturating_sub(n_constrs))
    }

    /// Iterate constraint POs (the last `n_constrs` of the `Po`-kind COs).
    pub fn constraint_pos(&self) -> impl Iterator<Item = &Co> {
        let n_constrs = self.n_constrs;
        let po_count = self.cos.iter().filter(|c| matches!(c.kind, CoKind::Po)).count();
        self.cos
            .iter()
            .filter(|c| matches!(c.kind, CoKind::Po))
            .skip(po_count.saturating_sub(n_constrs))
    }

    /// All internal (AND) node ids in topological (creation) order. Since
    /// `add_and` only ever references already-created ids, creation order
    /// already is a valid topological order; this helper exists so callers
    /// don't have to know that invariant.
    pub fn and_nodes_topo(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, k)| matches!(k, NodeKind::And { .. }).then(|| NodeId(i as u32)))
            .collect()
    }

    /// All node ids in the arena, 0 included (constant-1).
    pub fn all_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32).map(NodeId).collect()
    }

    /// The LI fanin paired with LO register `reg`.
    pub fn li_fanin(&self, reg: u32) -> Lit {
        self.cos
            .iter()
            .find_map(|c| matches!(c.kind, CoKind::Li { reg: r } if r == reg).then(|| c.fanin))
            .expect("every LO register has a paired LI")
    }

    /// Build a fresh empty clone sharing no storage, used as the scratch
    /// "frames AIG" target by the frame builder (C4).
    pub fn empty_like(&self) -> Aig {
        Aig::new()
    }

    /// Duplicate a node's fanin cone while rewriting any node through the
    /// equivalence map `repr` (class representative lookup). Used by the
    /// controller (C6) to materialize the final reduced AIG.
    ///
    /// `repr(n)` returns `Some(lit)` when `n` should be replaced by
    /// `lit` (already phrased in terms of *original* node ids — callers
    /// pass their class representative, optionally complemented); `None`
    /// leaves `n` untouched. Applies to LOs as well as AND nodes: a
    /// register whose class collapses it to a representative (or to
    /// const-1) is dropped entirely rather than carried over as a
    /// now-redundant register, and its paired LI is dropped with it.
    /// `self.los` must be visited in ascending id order (guaranteed by
    /// construction) so that any LO's representative, if itself an LO, is
    /// already present in `map` by the time it's needed.
    pub fn dup_repr(&self, repr: &dyn Fn(NodeId) -> Option<Lit>) -> (Aig, HashMap<NodeId, Lit>) {
        let mut out = Aig::new();
        let mut map: HashMap<NodeId, Lit> = HashMap::new();
        map.insert(NodeId::CONST1, Lit::CONST1);

        let resolve = |map: &HashMap<NodeId, Lit>, lit: Lit| -> Lit {
            let base = map[&lit.node];
            Lit::new(base.node, base.complement ^ lit.complement)
        };

        for pi in &self.pis {
            let id = out.add_pi();
            map.insert(*pi, Lit::positive(id));
        }

        // reg_remap[original reg index] = Some(new reg index) for kept
        // registers, None for registers collapsed away by `repr`.
        let mut reg_remap: Vec<Option<u32>> = Vec::with_capacity(self.los.len());
        for &lo in &self.los {
            if let Some(target) = repr(lo) {
                let resolved = resolve(&map, target);
                map.insert(lo, resolved);
                reg_remap.push(None);
                continue;
            }
            let init = self.phase(lo);
            let id = out.add_lo(init);
            map.insert(lo, Lit::positive(id));
            reg_remap.push(Some(out.reg_count() as u32 - 1));
        }

        for id in self.and_nodes_topo() {
            if let Some(target) = repr(id) {
                let resolved = resolve(&map, target);
                map.insert(id, resolved);
                continue;
            }
            let NodeKind::And { fanin0, fanin1 } = self.kind(id) else { unreachable!() };
            let f0 = resolve(&map, *fanin0);
            let f1 = resolve(&map, *fanin1);
            let new_id = out.add_and(f0, f1);
            map.insert(id, Lit::positive(new_id));
        }
        for co in &self.cos {
            let fanin = resolve(&map, co.fanin);
            match co.kind {
                CoKind::Po => out.add_po(fanin),
                CoKind::Li { reg } => {
                    if let Some(new_reg) = reg_remap[reg as usize] {
                        out.add_li(new_reg, fanin);
                    }
                }
            }
        }
        out.set_constrs(self.n_constrs);
        (out, map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const1_is_node_zero_and_phase_true() {
        let aig = Aig::new();
        assert_eq!(aig.node_count(), 1);
        assert!(aig.phase(NodeId::CONST1));
    }

    #[test]
    fn and_phase_follows_fanins() {
        let mut aig = Aig::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        // phase(a) = phase(b) = false (PIs default false), so AND(a,b) phase = false
        let g = aig.add_and(Lit::positive(a), Lit::positive(b));
        assert!(!aig.phase(g));
        // AND(~a, ~b): phase(~a)=true, phase(~b)=true -> phase = true
        let g2 = aig.add_and(Lit::positive(a).negate(), Lit::positive(b).negate());
        assert!(aig.phase(g2));
    }

    #[test]
    fn register_pairing_round_trips() {
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        let lo = aig.add_lo(false);
        let not_lo = Lit::positive(lo).negate();
        aig.add_li(0, not_lo);
        assert_eq!(aig.li_fanin(0), not_lo);
        aig.add_po(Lit::positive(pi));
        assert_eq!(aig.property_pos().count(), 1);
    }

    #[test]
    fn constraint_pos_are_the_trailing_ones() {
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        aig.add_po(Lit::positive(pi));
        aig.add_po(Lit::positive(pi).negate());
        aig.set_constrs(1);
        assert_eq!(aig.property_pos().count(), 1);
        assert_eq!(aig.constraint_pos().count(), 1);
    }

    #[test]
    fn dup_repr_drops_a_register_collapsed_to_const1() {
        let mut aig = Aig::new();
        let lo_a = aig.add_lo(true);
        let lo_b = aig.add_lo(false);
        aig.add_li(0, Lit::CONST1);
        aig.add_li(1, Lit::positive(lo_b));
        aig.add_po(Lit::positive(lo_a));

        let (reduced, map) = aig.dup_repr(&|n| if n == lo_a { Some(Lit::CONST1) } else { None });
        assert_eq!(reduced.reg_count(), 1);
        assert_eq!(map[&lo_a], Lit::CONST1);
        assert_eq!(reduced.li_fanin(0), Lit::positive(map[&lo_b].node));
    }

    #[test]
    fn dup_repr_merges_one_register_into_another() {
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        let lo_a = aig.add_lo(false);
        let lo_b = aig.add_lo(false);
        aig.add_li(0, Lit::positive(pi));
        aig.add_li(1, Lit::positive(pi));
        aig.add_po(Lit::positive(lo_a));
        aig.add_po(Lit::positive(lo_b));

        let (reduced, map) = aig.dup_repr(&|n| if n == lo_b { Some(Lit::positive(lo_a)) } else { None });
        assert_eq!(reduced.reg_count(), 1);
        assert_eq!(map[&lo_a], map[&lo_b]);
    }
}
