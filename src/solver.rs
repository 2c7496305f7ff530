//! CNF/Solver adapter (C3)
//!
//! Translates an AIG cone into CNF on demand and owns an incremental SAT
//! solver behind a trait, so the rest of the engine (C5, C7) never speaks
//! to a concrete solver implementation. `MiniSolver` is a small DPLL-style
//! solver with unit propagation and a conflict counter, included so the
//! engine is testable end-to-end without an external dependency; a caller
//! embedding this crate in a larger pipeline is expected to supply a real
//! incremental CDCL solver behind the same trait.

#![forbid(unsafe_code)]

use crate::aig::{Aig, Lit as AigLit, NodeId, NodeKind};
use std::collections::{HashMap, HashSet};

/// A SAT-solver-visible variable (1-based; 0 is never used).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Var(pub u32);

/// A signed solver literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SatLit {
    pub var: Var,
    pub negated: bool,
}

impl SatLit {
    pub fn pos(var: Var) -> Self {
        SatLit { var, negated: false }
    }
    pub fn neg(var: Var) -> Self {
        SatLit { var, negated: true }
    }
}

/// Outcome of a bounded solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Sat,
    Unsat,
    /// The conflict budget was exhausted before a verdict was reached.
    Timeout,
}

/// Errors raised by the solver adapter.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("clause addition made the solver's formula inconsistent")]
    Contradiction,
}

/// The uniform solver interface the rest of the engine programs against.
pub trait SatSolver {
    fn new_var(&mut self) -> Var;
    fn add_clause(&mut self, lits: &[SatLit]) -> Result<(), SolverError>;
    fn solve_with_assumptions(&mut self, assumptions: &[SatLit], conflict_limit: u64) -> SolveOutcome;
    fn value(&self, var: Var) -> Option<bool>;
}

/// A small DPLL solver: unit propagation plus chronological backtracking,
/// with a conflict counter checked against the caller's budget. Sufficient
/// for the cones this engine builds in tests; not meant to scale to large
/// industrial CNFs.
#[derive(Default)]
pub struct MiniSolver {
    n_vars: u32,
    clauses: Vec<Vec<SatLit>>,
    model: Vec<Option<bool>>,
}

impl MiniSolver {
    pub fn new() -> Self {
        MiniSolver { n_vars: 0, clauses: Vec::new(), model: vec![None] }
    }

    fn eval_clause(&self, clause: &[SatLit], assign: &[Option<bool>]) -> Option<bool> {
        let mut any_unknown = false;
        for lit in clause {
            match assign[lit.var.0 as usize] {
                Some(v) if v != lit.negated => return Some(true),
                Some(_) => {}
                None => any_unknown = true,
            }
        }
        if any_unknown {
            None
        } else {
            Some(false)
        }
    }

    fn solve_rec(&self, assign: &mut Vec<Option<bool>>, conflicts: &mut u64, limit: u64) -> Option<bool> {
        loop {
            let mut progressed = false;
            for clause in &self.clauses {
                match self.eval_clause(clause, assign) {
                    Some(false) => {
                        *conflicts += 1;
                        return Some(false);
                    }
                    Some(true) => continue,
                    None => {
                        let unknowns: Vec<&SatLit> = clause
                            .iter()
                            .filter(|l| assign[l.var.0 as usize].is_none())
                            .collect();
                        if unknowns.len() == 1 {
                            let lit = unknowns[0];
                            assign[lit.var.0 as usize] = Some(!lit.negated);
                            progressed = true;
                        }
                    }
                }
            }
            if *conflicts > limit {
                return None;
            }
            if !progressed {
                break;
            }
        }
        let next_var = (1..=self.n_vars).find(|&v| assign[v as usize].is_none());
        let Some(v) = next_var else {
            return Some(true);
        };
        for &try_val in &[true, false] {
            let mut branch = assign.clone();
            branch[v as usize] = Some(try_val);
            if *conflicts > limit {
                return None;
            }
            match self.solve_rec(&mut branch, conflicts, limit) {
                Some(true) => {
                    *assign = branch;
                    return Some(true);
                }
                Some(false) => continue,
                None => return None,
            }
        }
        Some(false)
    }
}

impl SatSolver for MiniSolver {
    fn new_var(&mut self) -> Var {
        self.n_vars += 1;
        self.model.push(None);
        Var(self.n_vars)
    }

    fn add_clause(&mut self, lits: &[SatLit]) -> Result<(), SolverError> {
        if lits.is_empty() {
            return Err(SolverError::Contradiction);
        }
        self.clauses.push(lits.to_vec());
        Ok(())
    }

    fn solve_with_assumptions(&mut self, assumptions: &[SatLit], conflict_limit: u64) -> SolveOutcome {
        let mut assign = vec![None; (self.n_vars + 1) as usize];
        for a in assumptions {
            assign[a.var.0 as usize] = Some(!a.negated);
        }
        let mut conflicts = 0u64;
        match self.solve_rec(&mut assign, &mut conflicts, conflict_limit) {
            Some(true) => {
                self.model = assign;
                SolveOutcome::Sat
            }
            Some(false) => SolveOutcome::Unsat,
            None => SolveOutcome::Timeout,
        }
    }

    fn value(&self, var: Var) -> Option<bool> {
        self.model.get(var.0 as usize).copied().flatten()
    }
}

/// Result of an equivalence query between two frame-AIG literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquivResult {
    Equal,
    NotEqual { pi_values: Vec<(NodeId, bool)> },
    Timeout,
}

/// Owns the AIG→CNF variable map and the incremental solver for one frames
/// AIG (C4's output). `cnf_load` only ever extends `sat_var`/`used_pis`; it
/// never retracts them, matching the "lazily assigned in DFS order" rule.
pub struct CnfContext {
    sat_var: HashMap<NodeId, Var>,
    pub used_pis: HashSet<NodeId>,
    solver: Box<dyn SatSolver>,
    polar_flip: bool,
}

impl CnfContext {
    /// `solver_start`: create the solver, preload constant-1 as var 1 with
    /// a unit clause.
    pub fn solver_start(mut solver: Box<dyn SatSolver>, polar_flip: bool) -> Self {
        let v = solver.new_var();
        solver.add_clause(&[SatLit::pos(v)]).expect("fresh solver accepts a unit clause");
        let mut sat_var = HashMap::new();
        sat_var.insert(NodeId::CONST1, v);
        CnfContext { sat_var, used_pis: HashSet::new(), solver, polar_flip }
    }

    fn lit_of(&self, lit: AigLit) -> SatLit {
        let var = self.sat_var[&lit.node];
        SatLit { var, negated: lit.complement }
    }

    /// Flip clause polarity where the source node's structural phase is 1,
    /// biasing the search toward the typical simulation polarity, when
    /// `polar_flip` is enabled. Flipping is applied uniformly to a whole
    /// clause's sign convention and does not change satisfiability.
    fn maybe_flip(&self, aig: &Aig, node: NodeId, sat: SatLit) -> SatLit {
        if self.polar_flip && aig.phase(node) {
            SatLit { var: sat.var, negated: !sat.negated }
        } else {
            sat
        }
    }

    /// Attempt to recognize `node` as a 2-level MUX `s ? d1 : d0`: both
    /// fanins of `node` are themselves AND gates, and they share one input
    /// in complementary polarity (the selector).
    fn detect_mux(aig: &Aig, node: NodeId) -> Option<(AigLit, AigLit, AigLit)> {
        let NodeKind::And { fanin0, fanin1 } = aig.kind(node) else { return None };
        let NodeKind::And { fanin0: a0, fanin1: a1 } = aig.kind(fanin0.node) else { return None };
        let NodeKind::And { fanin0: b0, fanin1: b1 } = aig.kind(fanin1.node) else { return None };
        let a_pair = [*a0, *a1];
        let b_pair = [*b0, *b1];
        for &a in &a_pair {
            for &b in &b_pair {
                if a.node == b.node && a.complement != b.complement {
                    let sel_is_a0 = a == a_pair[0];
                    let d1 = if sel_is_a0 { a_pair[1] } else { a_pair[0] };
                    let sel_is_b0 = b == b_pair[0];
                    let d0 = if sel_is_b0 { b_pair[1] } else { b_pair[0] };
                    let sel = AigLit::new(a.node, a.complement ^ fanin0.complement);
                    let d1 = AigLit::new(d1.node, d1.complement ^ fanin0.complement);
                    let d0 = AigLit::new(d0.node, d0.complement ^ fanin1.complement);
                    return Some((sel, d1, d0));
                }
            }
        }
        None
    }

    /// `cnf_load`: depth-first traversal from `node`, stopping at nodes
    /// that already have a SAT variable. Emits Tseitin clauses for plain
    /// AND gates, or the 6-clause MUX encoding when the gate matches the
    /// 2-level MUX pattern. Every CI encountered is recorded in `used_pis`.
    pub fn cnf_load(&mut self, aig: &Aig, node: NodeId) -> Result<(), SolverError> {
        if self.sat_var.contains_key(&node) {
            return Ok(());
        }
        match aig.kind(node) {
            NodeKind::Const1 => unreachable!("const1 is always preloaded"),
            NodeKind::Pi | NodeKind::Lo { .. } => {
                let v = self.solver.new_var();
                self.sat_var.insert(node, v);
                self.used_pis.insert(node);
                Ok(())
            }
            NodeKind::And { .. } => {
                if let Some((sel, d1, d0)) = Self::detect_mux(aig, node) {
                    self.cnf_load(aig, sel.node)?;
                    self.cnf_load(aig, d1.node)?;
                    self.cnf_load(aig, d0.node)?;
                    let g = self.solver.new_var();
                    self.sat_var.insert(node, g);
                    let s = self.maybe_flip(aig, sel.node, self.lit_of(sel));
                    let a = self.maybe_flip(aig, d1.node, self.lit_of(d1));
                    let b = self.maybe_flip(aig, d0.node, self.lit_of(d0));
                    let gl = SatLit::pos(g);
                    let ngl = SatLit::neg(g);
                    let ns = SatLit { var: s.var, negated: !s.negated };
                    // g <-> (s ? a : b), 6 clauses.
                    self.solver.add_clause(&[ns, SatLit { var: a.var, negated: !a.negated }, gl])?;
                    self.solver.add_clause(&[ns, a, ngl])?;
                    self.solver.add_clause(&[s, SatLit { var: b.var, negated: !b.negated }, gl])?;
                    self.solver.add_clause(&[s, b, ngl])?;
                    self.solver.add_clause(&[SatLit { var: a.var, negated: !a.negated }, SatLit { var: b.var, negated: !b.negated }, gl])?;
                    self.solver.add_clause(&[a, b, ngl])?;
                    return Ok(());
                }
                let NodeKind::And { fanin0, fanin1 } = aig.kind(node) else { unreachable!() };
                let (f0, f1) = (*fanin0, *fanin1);
                self.cnf_load(aig, f0.node)?;
                self.cnf_load(aig, f1.node)?;
                let g = self.solver.new_var();
                self.sat_var.insert(node, g);
                let l0 = self.maybe_flip(aig, f0.node, self.lit_of(f0));
                let l1 = self.maybe_flip(aig, f1.node, self.lit_of(f1));
                let gl = SatLit::pos(g);
                let ngl = SatLit::neg(g);
                self.solver.add_clause(&[ngl, l0])?;
                self.solver.add_clause(&[ngl, l1])?;
                self.solver
                    .add_clause(&[gl, SatLit { var: l0.var, negated: !l0.negated }, SatLit { var: l1.var, negated: !l1.negated }])?;
                Ok(())
            }
        }
    }

    fn extract_pi_values(&self) -> Vec<(NodeId, bool)> {
        let mut out: Vec<(NodeId, bool)> = self
            .used_pis
            .iter()
            .filter_map(|&n| self.sat_var.get(&n).and_then(|&v| self.solver.value(v)).map(|b| (n, b)))
            .collect();
        out.sort_by_key(|(n, _)| n.0);
        out
    }

    /// `nodes_equiv`: check whether AIG literals `a` and `b` are equivalent
    /// under the currently loaded CNF, with a per-call conflict budget.
    pub fn nodes_equiv(&mut self, aig: &Aig, a: AigLit, b: AigLit, bt_limit: u64) -> Result<EquivResult, SolverError> {
        self.cnf_load(aig, a.node)?;
        self.cnf_load(aig, b.node)?;
        let la = self.lit_of(a);
        let lb = self.lit_of(b);

        let not_b = SatLit { var: lb.var, negated: !lb.negated };
        match self.solver.solve_with_assumptions(&[la, not_b], bt_limit) {
            SolveOutcome::Sat => return Ok(EquivResult::NotEqual { pi_values: self.extract_pi_values() }),
            SolveOutcome::Timeout => return Ok(EquivResult::Timeout),
            SolveOutcome::Unsat => {}
        }
        if a.node != NodeId::CONST1 {
            let not_a = SatLit { var: la.var, negated: !la.negated };
            match self.solver.solve_with_assumptions(&[not_a, lb], bt_limit) {
                SolveOutcome::Sat => return Ok(EquivResult::NotEqual { pi_values: self.extract_pi_values() }),
                SolveOutcome::Timeout => return Ok(EquivResult::Timeout),
                SolveOutcome::Unsat => {}
            }
        }
        Ok(EquivResult::Equal)
    }

    /// `nodes_constrain`: assert `a = b` unconditionally (used by C4 to wire
    /// in a speculated-equals-raw constraint CO).
    pub fn nodes_constrain(&mut self, aig: &Aig, a: AigLit, b: AigLit) -> Result<(), SolverError> {
        self.cnf_load(aig, a.node)?;
        self.cnf_load(aig, b.node)?;
        let la = self.lit_of(a);
        let lb = self.lit_of(b);
        let not_a = SatLit { var: la.var, negated: !la.negated };
        let not_b = SatLit { var: lb.var, negated: !lb.negated };
        self.solver.add_clause(&[not_a, lb])?;
        self.solver.add_clause(&[la, not_b])?;
        Ok(())
    }

    /// `node_constrain1`: assert `a = 1` unconditionally (used by C7 to pin
    /// a constraint PO to hold).
    pub fn node_constrain1(&mut self, aig: &Aig, a: AigLit) -> Result<(), SolverError> {
        self.cnf_load(aig, a.node)?;
        let la = self.lit_of(a);
        self.solver.add_clause(&[la])
    }

    pub fn n_sat_vars(&self) -> usize {
        self.sat_var.len()
    }

    /// Solve the accumulated clause set with no extra assumptions, used by
    /// C7's initial-phase finder to obtain one concrete model satisfying
    /// every asserted constraint.
    pub fn solve(&mut self, bt_limit: u64) -> SolveOutcome {
        self.solver.solve_with_assumptions(&[], bt_limit)
    }

    /// Read `lit`'s value under the solver's last model, if any and if
    /// `lit`'s node has already been loaded into the CNF.
    pub fn literal_value(&self, lit: AigLit) -> Option<bool> {
        let var = *self.sat_var.get(&lit.node)?;
        self.solver.value(var).map(|v| v ^ lit.complement)
    }
}
