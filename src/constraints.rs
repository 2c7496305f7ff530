//! Constraint handler (C7)
//!
//! Treats the trailing `n_constrs` primary outputs of an AIG as invariants
//! that hold in every reachable state. Three pieces of machinery exist to
//! honor that: finding an input assignment consistent with the invariants
//! at frame 0 ("initial-phase finder"), biasing the simulator to replay
//! that assignment, and pinning constraint fanins to 1 while building CNF
//! so equivalence queries are only ever asked relative to constrained
//! states. A fourth pair, `dup_unfold_constrs`/`dup_fold_constrs`, converts
//! between that "assert every frame" representation and an equivalent one
//! where each constraint lives in its own register instead.

#![forbid(unsafe_code)]

use crate::aig::{Aig, Lit, NodeId, NodeKind};
use crate::frames::FrameBuilder;
use crate::sim::Sim;
use crate::solver::{CnfContext, SolveOutcome, SolverError};
use crate::classes::ClassStore;
use std::collections::HashMap;

/// Errors raised by the constraint handler.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("no input assignment satisfies all constraint outputs in every frame")]
    Unsat,
}

/// `find_initial_phase`: build `k+1` constraint-only frames (no property
/// POs are needed — only the constraint cone matters), assert every
/// constraint fanin to 1 in every frame, and ask the solver for a model.
/// On success, returns one PI-value vector per frame (`v_inits`).
pub fn find_initial_phase(aig: &Aig, k: usize) -> Result<Vec<Vec<(crate::aig::NodeId, bool)>>, ConstraintError> {
    if aig.n_constrs == 0 {
        return Ok(vec![Vec::new(); k + 1]);
    }
    let classes = ClassStore::new();
    let frames = FrameBuilder::unroll_bmc(aig, k + 1, &classes);
    let mut ctx = CnfContext::solver_start(Box::new(crate::solver::MiniSolver::new()), false);

    for frame in 0..=k {
        for co in aig.constraint_pos() {
            let lit = resolve_in_frame(&frames.spec[frame], co.fanin);
            ctx.cnf_load(&frames.frames_aig, lit.node)?;
            ctx.node_constrain1(&frames.frames_aig, lit)?;
        }
    }
    for frame in 0..=k {
        for &pi in &aig.pis {
            if let Some(&lit) = frames.spec[frame].get(&pi) {
                ctx.cnf_load(&frames.frames_aig, lit.node)?;
            }
        }
    }
    if ctx.solve(u64::MAX) != SolveOutcome::Sat {
        return Err(ConstraintError::Unsat);
    }

    let mut per_frame = Vec::with_capacity(k + 1);
    for frame in 0..=k {
        let mut assignment = Vec::new();
        for &pi in &aig.pis {
            if let Some(&lit) = frames.spec[frame].get(&pi) {
                if let Some(v) = ctx.literal_value(lit) {
                    assignment.push((pi, v));
                }
            }
        }
        per_frame.push(assignment);
    }
    Ok(per_frame)
}

fn resolve_in_frame(map: &std::collections::HashMap<crate::aig::NodeId, Lit>, lit: Lit) -> Lit {
    let base = map[&lit.node];
    Lit::new(base.node, base.complement ^ lit.complement)
}

/// `replay_under_constraints`: seed the simulator's PIs from `v_inits`
/// (one assignment per frame, as returned by [`find_initial_phase`]) and
/// run it, so subsequent class refinement only ever observes
/// constraint-consistent states.
pub fn replay_under_constraints(aig: &Aig, sim: &mut Sim, v_inits: &[Vec<(crate::aig::NodeId, bool)>]) {
    for (frame, assignment) in v_inits.iter().enumerate() {
        for &(pi, v) in assignment {
            sim.set_raw_word(pi, frame, 0, if v { u64::MAX } else { 0 });
        }
    }
    sim.sim_run(aig);
}

/// `constrain_solver`: pin every constraint-PO fanin to 1 in every frame of
/// `ctx`'s loaded CNF, so downstream equivalence queries are implicitly
/// restricted to constraint-consistent states (the "sweep-with-constraints"
/// variant of C4/C5).
pub fn constrain_solver(
    ctx: &mut CnfContext,
    frames_aig: &Aig,
    constraint_lits: &[Lit],
) -> Result<(), SolverError> {
    for &lit in constraint_lits {
        ctx.node_constrain1(frames_aig, lit)?;
    }
    Ok(())
}

/// Outcome of a solve used purely to check satisfiability of the
/// accumulated constraint set, without caring about a model.
pub fn is_consistent(ctx: &mut CnfContext, frames_aig: &Aig) -> Result<bool, SolverError> {
    match ctx.nodes_equiv(frames_aig, Lit::CONST1, Lit::CONST1, u64::MAX)? {
        crate::solver::EquivResult::Equal => Ok(true),
        crate::solver::EquivResult::Timeout => Ok(false),
        crate::solver::EquivResult::NotEqual { .. } => Ok(true),
    }
}

/// Which unfold variant to build. Type I turns each constraint into a bare
/// latch holding that constraint's own fanin. Type II additionally threads
/// a single sticky accumulator latch that goes (and stays) low the first
/// time any constraint is violated, and gates every original property PO
/// with that accumulator so a violated constraint makes every property
/// vacuously true rather than letting a spurious counter-example surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnfoldKind {
    TypeI,
    TypeII,
}

fn resolve_map(map: &HashMap<NodeId, Lit>, lit: Lit) -> Lit {
    let base = map[&lit.node];
    Lit::new(base.node, base.complement ^ lit.complement)
}

/// `dup_unfold_constrs`: rebuild `aig` with its constraint outputs folded
/// into extra registers instead of asserted as invariants every frame.
/// Returns the new AIG (constraints dropped, `n_constrs == 0`) together
/// with the LO ids of the freshly added registers, in declaration order,
/// so a caller can re-fold them later via [`dup_fold_constrs`].
pub fn dup_unfold_constrs(aig: &Aig, kind: UnfoldKind) -> (Aig, Vec<NodeId>) {
    let mut out = Aig::new();
    let mut map: HashMap<NodeId, Lit> = HashMap::new();
    map.insert(NodeId::CONST1, Lit::CONST1);

    for pi in &aig.pis {
        let id = out.add_pi();
        map.insert(*pi, Lit::positive(id));
    }
    for &lo in &aig.los {
        let id = out.add_lo(aig.phase(lo));
        map.insert(lo, Lit::positive(id));
    }
    for id in aig.and_nodes_topo() {
        let NodeKind::And { fanin0, fanin1 } = aig.kind(id) else { unreachable!() };
        let f0 = resolve_map(&map, *fanin0);
        let f1 = resolve_map(&map, *fanin1);
        let new_id = out.add_and(f0, f1);
        map.insert(id, Lit::positive(new_id));
    }
    for &lo in &aig.los {
        let NodeKind::Lo { reg } = aig.kind(lo) else { unreachable!() };
        out.add_li(*reg, resolve_map(&map, aig.li_fanin(*reg)));
    }

    let constraint_lits: Vec<Lit> = aig.constraint_pos().map(|co| resolve_map(&map, co.fanin)).collect();
    let mut new_regs = Vec::with_capacity(constraint_lits.len() + 1);
    for &lit in &constraint_lits {
        let lo = out.add_lo(false);
        out.add_li(out.reg_count() as u32 - 1, lit);
        new_regs.push(lo);
    }

    if kind == UnfoldKind::TypeII && !new_regs.is_empty() {
        // Sticky accumulator: true once every constraint register's
        // previous value and the accumulator's own previous value have
        // both held, i.e. no constraint has ever been violated so far.
        let mut held = Lit::positive(new_regs[0]);
        for &r in &new_regs[1..] {
            held = Lit::positive(out.add_and(held, Lit::positive(r)));
        }
        let acc_lo = out.add_lo(true);
        let acc_reg = out.reg_count() as u32 - 1;
        let acc_next = out.add_and(held, Lit::positive(acc_lo));
        out.add_li(acc_reg, Lit::positive(acc_next));
        new_regs.push(acc_lo);

        for co in aig.property_pos() {
            let fanin = resolve_map(&map, co.fanin);
            let gated = out.add_and(fanin, Lit::positive(acc_lo));
            out.add_po(Lit::positive(gated));
        }
    } else {
        for co in aig.property_pos() {
            out.add_po(resolve_map(&map, co.fanin));
        }
    }

    (out, new_regs)
}

/// `dup_fold_constrs`: the structural inverse of a type-I [`dup_unfold_constrs`]
/// — drop the last `n_new_regs` registers of `aig` and re-expose each
/// dropped register's own LI fanin as a fresh constraint PO. Assumes those
/// registers' LI fanins reference only nodes that survive the drop (true
/// for type I; a type-II accumulator register depends on the other new
/// registers and cannot be folded back by this function).
pub fn dup_fold_constrs(aig: &Aig, n_new_regs: usize) -> Aig {
    let total_regs = aig.los.len();
    let keep = total_regs.saturating_sub(n_new_regs);

    let mut out = Aig::new();
    let mut map: HashMap<NodeId, Lit> = HashMap::new();
    map.insert(NodeId::CONST1, Lit::CONST1);

    for pi in &aig.pis {
        let id = out.add_pi();
        map.insert(*pi, Lit::positive(id));
    }
    for &lo in aig.los.iter().take(keep) {
        let id = out.add_lo(aig.phase(lo));
        map.insert(lo, Lit::positive(id));
    }
    for id in aig.and_nodes_topo() {
        let NodeKind::And { fanin0, fanin1 } = aig.kind(id) else { unreachable!() };
        let f0 = resolve_map(&map, *fanin0);
        let f1 = resolve_map(&map, *fanin1);
        let new_id = out.add_and(f0, f1);
        map.insert(id, Lit::positive(new_id));
    }

    for co in aig.property_pos() {
        out.add_po(resolve_map(&map, co.fanin));
    }
    let new_constraints: Vec<Lit> = (keep..total_regs).map(|r| resolve_map(&map, aig.li_fanin(r as u32))).collect();
    for &lit in &new_constraints {
        out.add_po(lit);
    }
    out.set_constrs(new_constraints.len());

    for reg in 0..keep {
        out.add_li(reg as u32, resolve_map(&map, aig.li_fanin(reg as u32)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aig::Lit as AigLit;

    fn single_constraint_aig() -> Aig {
        // PO is a plain PI; constraint PO forces that PI to 1.
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        aig.add_po(AigLit::positive(pi));
        aig.add_po(AigLit::positive(pi));
        aig.set_constrs(1);
        aig
    }

    #[test]
    fn find_initial_phase_returns_empty_assignments_with_no_constraints() {
        let mut aig = Aig::new();
        aig.add_pi();
        let v = find_initial_phase(&aig, 1).unwrap();
        assert_eq!(v.len(), 2);
        assert!(v[0].is_empty());
    }

    #[test]
    fn find_initial_phase_satisfies_a_simple_constraint() {
        let aig = single_constraint_aig();
        let v = find_initial_phase(&aig, 0).unwrap();
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn replay_under_constraints_drives_the_simulator() {
        let aig = single_constraint_aig();
        let v = find_initial_phase(&aig, 0).unwrap();
        let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
        replay_under_constraints(&aig, &mut sim, &v);
        // The constraint forces the sole PI to 1, and the (non-constraint)
        // property PO is the same PI, so it reads non-zero after replay.
        assert!(sim.check_non_const_outputs(&aig).is_some());
    }

    #[test]
    fn unfold_then_fold_recovers_the_original_constraint_structure() {
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        let lo = aig.add_lo(false);
        aig.add_li(0, AigLit::positive(pi));
        aig.add_po(AigLit::positive(lo));
        aig.add_po(AigLit::positive(pi));
        aig.set_constrs(1);

        let (unfolded, new_regs) = dup_unfold_constrs(&aig, UnfoldKind::TypeI);
        assert_eq!(unfolded.n_constrs, 0);
        assert_eq!(unfolded.reg_count(), aig.reg_count() + 1);
        assert_eq!(new_regs.len(), 1);

        let refolded = dup_fold_constrs(&unfolded, new_regs.len());
        assert_eq!(refolded.reg_count(), aig.reg_count());
        assert_eq!(refolded.n_constrs, 1);

        let orig_constraint = aig.constraint_pos().next().unwrap().fanin;
        let refolded_constraint = refolded.constraint_pos().next().unwrap().fanin;
        assert_eq!(orig_constraint, refolded_constraint);

        let orig_property = aig.property_pos().next().unwrap().fanin;
        let refolded_property = refolded.property_pos().next().unwrap().fanin;
        assert_eq!(orig_property, refolded_property);
        assert_eq!(aig.li_fanin(0), refolded.li_fanin(0));
    }

    #[test]
    fn unfold_type_ii_gates_every_property_with_the_sticky_accumulator() {
        let mut aig = Aig::new();
        let pi = aig.add_pi();
        aig.add_po(AigLit::positive(pi));
        aig.add_po(AigLit::positive(pi));
        aig.set_constrs(1);

        let (unfolded, new_regs) = dup_unfold_constrs(&aig, UnfoldKind::TypeII);
        // one register per constraint plus the sticky accumulator
        assert_eq!(new_regs.len(), 2);
        assert_eq!(unfolded.n_constrs, 0);
        assert_eq!(unfolded.reg_count(), 2);

        // the property PO's fanin is now an accumulator-gated AND, not the
        // bare PI it was before unfolding.
        let property_fanin = unfolded.property_pos().next().unwrap().fanin;
        assert!(matches!(unfolded.kind(property_fanin.node), NodeKind::And { .. }));
    }
}
