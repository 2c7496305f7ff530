//! Induction / BMC sweeper (C5)
//!
//! Drives the per-node equivalence queries through the solver adapter (C3)
//! and folds the outcome back into the class store (C2). A sweep walks
//! every candidate `n` (topological order, LOs first) against its class
//! representative `r`; each query either confirms the candidate (frame
//! mapping rewritten to `r`), refines the classes (a counter-example
//! splits `n` out, and the simulator replays it to split whatever else it
//! affects), or conservatively drops the candidate on timeout.

#![forbid(unsafe_code)]

use crate::aig::{Aig, Lit, NodeId, NodeKind};
use crate::classes::ClassStore;
use crate::frames::FrameSet;
use crate::sim::Sim;
use crate::solver::{CnfContext, EquivResult, SolverError};
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Errors raised while sweeping.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Per-sweep diagnostics (C10). `strangers` counts nodes whose simulated
/// phase-normalized value disagreed with the frame AIG's structural phase —
/// a condition the engine tolerates rather than treats as a bug (§9).
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub n_confirmed: usize,
    pub n_refined: usize,
    pub n_removed: usize,
    pub n_sat_calls: usize,
    pub strangers: usize,
}

/// Outcome of one full pass over every candidate.
pub struct SweepOutcome {
    pub refined: bool,
    pub stats: SweepStats,
}

pub struct Sweeper<'a> {
    aig: &'a Aig,
    bt_limit: u64,
    resim_batch: usize,
}

impl<'a> Sweeper<'a> {
    pub fn new(aig: &'a Aig, bt_limit: u64) -> Self {
        Sweeper { aig, bt_limit, resim_batch: 32 }
    }

    /// `sweep`: plain, non-dynamic pass. `ctx`/`frames` must come from the
    /// same `unroll_ind`/`unroll_bmc` call; `classes`/`sim` are mutated in
    /// place as candidates are confirmed or refined.
    pub fn sweep<R: Rng>(
        &self,
        frames: &FrameSet,
        ctx: &mut CnfContext,
        classes: &mut ClassStore,
        sim: &mut Sim,
        rng: &mut R,
    ) -> Result<SweepOutcome, SweepError> {
        let last = frames.raw.len() - 1;
        let mut stats = SweepStats::default();
        let mut refined = false;

        // Assert the induction hypothesis: frames 0..last carry
        // raw(f) ≡ spec(f) as accumulated fact, since those frames were
        // already (speculatively) proven by a prior round. Frame `last` is
        // left unconstrained — it's the one this sweep actually tests.
        for &(frame, raw_lit, spec_lit) in &frames.constraints {
            if frame != last {
                ctx.nodes_constrain(&frames.frames_aig, raw_lit, spec_lit)?;
            }
        }

        let mut candidates: Vec<NodeId> = self.aig.los.clone();
        candidates.extend(self.aig.and_nodes_topo());

        for n in candidates {
            let r = classes.representative(n);
            let is_const1 = classes.is_const1_cand(n);
            if !is_const1 && r == n {
                continue; // singleton, nothing to check
            }

            let (a, b) = if is_const1 {
                (Lit::CONST1, frames.raw[last][&n])
            } else {
                (frames.raw[last][&r], frames.raw[last][&n])
            };
            if a == b {
                stats.n_confirmed += 1;
                continue;
            }

            stats.n_sat_calls += 1;
            match ctx.nodes_equiv(&frames.frames_aig, a, b, self.bt_limit)? {
                EquivResult::Equal => {
                    stats.n_confirmed += 1;
                }
                EquivResult::NotEqual { pi_values } => {
                    self.refine_from_counterexample(classes, sim, &pi_values, stats.n_sat_calls, rng);
                    stats.n_refined += 1;
                    refined = true;
                }
                EquivResult::Timeout => {
                    classes.remove_node(n);
                    stats.n_removed += 1;
                    refined = true;
                    warn!(node = n.0, "sweep: conflict budget exhausted, dropping candidate");
                }
            }

            let structural_phase = self.aig.phase(n);
            let simulated_phase = sim.obj_is_zero(n);
            if is_const1 && structural_phase != !simulated_phase {
                stats.strangers += 1;
                debug!(node = n.0, "sweep: phase stranger (simulated vs structural disagreement)");
            }
        }
        Ok(SweepOutcome { refined, stats })
    }

    /// `sweep_dyn`: same per-candidate logic as `sweep`, but the induction
    /// hypothesis is not loaded eagerly for every accumulated constraint
    /// before the pass starts. Instead, before each candidate's SAT query,
    /// walk the fanin cone of the two frame literals actually being
    /// compared and assert only the `frames.constraints` entries whose own
    /// frame literal falls inside that cone. A constraint produced by an
    /// earlier round's substitution that this round's query never touches
    /// is never handed to the solver at all, controlling solver growth at
    /// the cost of the extra cone walk per query.
    pub fn sweep_dyn<R: Rng>(
        &self,
        frames: &FrameSet,
        ctx: &mut CnfContext,
        classes: &mut ClassStore,
        sim: &mut Sim,
        rng: &mut R,
    ) -> Result<SweepOutcome, SweepError> {
        let last = frames.raw.len() - 1;
        let mut stats = SweepStats::default();
        let mut refined = false;
        let mut asserted: HashSet<usize> = HashSet::new();

        let mut candidates: Vec<NodeId> = self.aig.los.clone();
        candidates.extend(self.aig.and_nodes_topo());

        for n in candidates {
            let r = classes.representative(n);
            let is_const1 = classes.is_const1_cand(n);
            if !is_const1 && r == n {
                continue; // singleton, nothing to check
            }

            let (a, b) = if is_const1 {
                (Lit::CONST1, frames.raw[last][&n])
            } else {
                (frames.raw[last][&r], frames.raw[last][&n])
            };
            if a == b {
                stats.n_confirmed += 1;
                continue;
            }

            let cone = cone_ancestors(&frames.frames_aig, &[a.node, b.node]);
            for (idx, &(frame, raw_lit, spec_lit)) in frames.constraints.iter().enumerate() {
                if frame == last || asserted.contains(&idx) {
                    continue;
                }
                if cone.contains(&raw_lit.node) || cone.contains(&spec_lit.node) {
                    ctx.nodes_constrain(&frames.frames_aig, raw_lit, spec_lit)?;
                    asserted.insert(idx);
                }
            }

            stats.n_sat_calls += 1;
            match ctx.nodes_equiv(&frames.frames_aig, a, b, self.bt_limit)? {
                EquivResult::Equal => {
                    stats.n_confirmed += 1;
                }
                EquivResult::NotEqual { pi_values } => {
                    self.refine_from_counterexample(classes, sim, &pi_values, stats.n_sat_calls, rng);
                    stats.n_refined += 1;
                    refined = true;
                }
                EquivResult::Timeout => {
                    classes.remove_node(n);
                    stats.n_removed += 1;
                    refined = true;
                    warn!(node = n.0, "sweep_dyn: conflict budget exhausted, dropping candidate");
                }
            }

            let structural_phase = self.aig.phase(n);
            let simulated_phase = sim.obj_is_zero(n);
            if is_const1 && structural_phase != !simulated_phase {
                stats.strangers += 1;
                debug!(node = n.0, "sweep_dyn: phase stranger (simulated vs structural disagreement)");
            }
        }
        Ok(SweepOutcome { refined, stats })
    }

    fn refine_from_counterexample<R: Rng>(
        &self,
        classes: &mut ClassStore,
        sim: &mut Sim,
        pi_values: &[(NodeId, bool)],
        sat_calls: usize,
        rng: &mut R,
    ) {
        for &(pi, val) in pi_values {
            if sim.n_frames() > 0 {
                sim.set_raw_word(pi, sim.n_pref(), 0, if val { u64::MAX } else { 0 });
            }
        }
        if sat_calls % self.resim_batch == 0 {
            sim.sim_seed_random(rng, false);
        }
        sim.sim_run(self.aig);
        classes.refine_const1(sim, true);
        classes.refine_all(sim, true);
    }
}

/// Backward fanin closure of `roots` within `frames_aig`: every AND node
/// transitively feeding one of `roots`, plus the roots themselves.
fn cone_ancestors(frames_aig: &Aig, roots: &[NodeId]) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<NodeId> = roots.to_vec();
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let NodeKind::And { fanin0, fanin1 } = frames_aig.kind(n) {
            stack.push(fanin0.node);
            stack.push(fanin1.node);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aig::Lit as AigLit;
    use crate::frames::FrameBuilder;
    use crate::solver::MiniSolver;
    use rand::SeedableRng;

    fn two_identical_gates() -> (Aig, NodeId, NodeId) {
        let mut aig = Aig::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g1 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        let g2 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        (aig, g1, g2)
    }

    #[test]
    fn sweep_confirms_structurally_identical_candidates() {
        let (aig, g1, g2) = two_identical_gates();
        let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        sim.sim_seed_random(&mut rng, false);
        sim.sim_run(&aig);
        let mut classes = ClassStore::new();
        classes.prepare_hash(&sim, &[g1, g2], false);

        let frames = FrameBuilder::unroll_ind(&aig, 0, &classes);
        let mut ctx = CnfContext::solver_start(Box::new(MiniSolver::new()), false);
        let sweeper = Sweeper::new(&aig, 10_000);
        let outcome = sweeper.sweep(&frames, &mut ctx, &mut classes, &mut sim, &mut rng).unwrap();
        assert!(!outcome.refined);
        assert_eq!(outcome.stats.n_confirmed, 1);
    }

    #[test]
    fn sweep_refines_genuinely_different_candidates() {
        let mut aig = Aig::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g1 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        let g2 = aig.add_and(AigLit::positive(a), AigLit::positive(b).negate());
        let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
        // Force g1 and g2 into the same initial bucket despite being
        // semantically different, mimicking an under-sampled seed: pin the
        // gates' own words (not their fanins') equal and nonzero so
        // `prepare_hash` buckets them together despite the structural
        // mismatch; the sweep's solver query then has to tell them apart.
        sim.set_raw_word(g1, 0, 0, 0b1010);
        sim.set_raw_word(g2, 0, 0, 0b1010);
        let mut classes = ClassStore::new();
        classes.prepare_hash(&sim, &[g1, g2], false);
        assert_eq!(classes.n_classes(), 1);

        let frames = FrameBuilder::unroll_ind(&aig, 0, &classes);
        let mut ctx = CnfContext::solver_start(Box::new(MiniSolver::new()), false);
        let sweeper = Sweeper::new(&aig, 10_000);
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let outcome = sweeper.sweep(&frames, &mut ctx, &mut classes, &mut sim, &mut rng).unwrap();
        assert!(outcome.refined);
        assert_eq!(outcome.stats.n_refined, 1);
    }

    /// Builds an AIG with two disjoint cones: `g1`/`g2` over `a, b` (the
    /// only real candidate pair this round) and `h` over an unrelated PI
    /// `c`. Returns everything needed to run a sweep plus `h`'s frame-0
    /// literal, so a test can fabricate a "prior round already proved
    /// something about `h`" constraint entry that no candidate this round
    /// actually needs.
    fn disjoint_cones_setup() -> (Aig, FrameSet, ClassStore, Sim, Lit) {
        let mut aig = Aig::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let c = aig.add_pi();
        let g1 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        let g2 = aig.add_and(AigLit::positive(a), AigLit::positive(b).negate());
        let h = aig.add_and(AigLit::positive(c), AigLit::positive(c));

        let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
        // Force g1 and g2 into the same bucket despite being structurally
        // different, so the sweep has to ask the solver (as in
        // `sweep_refines_genuinely_different_candidates`).
        sim.set_raw_word(g1, 0, 0, 0b1010);
        sim.set_raw_word(g2, 0, 0, 0b1010);
        let mut classes = ClassStore::new();
        classes.prepare_hash(&sim, &[g1, g2], false);
        assert_eq!(classes.n_classes(), 1);

        let mut frames = FrameBuilder::unroll_ind(&aig, 0, &classes);
        let h_lit = frames.raw[0][&h];
        // Fabricate a hypothesis constraint tied to `h`'s cone, as if an
        // earlier round had already claimed an equivalence involving `h`.
        // `usize::MAX` is a sentinel frame index guaranteed not to equal
        // `last`, so both sweep modes consider it a live prior-round fact.
        frames.constraints.push((usize::MAX, h_lit, Lit::CONST1));
        (aig, frames, classes, sim, h_lit)
    }

    #[test]
    fn sweep_eagerly_loads_constraints_outside_the_queried_cone() {
        let (aig, frames, mut classes, mut sim, h_lit) = disjoint_cones_setup();
        let cone = cone_ancestors(&frames.frames_aig, &[h_lit.node]);
        // Sanity: `h`'s own node is trivially in its own cone, confirming
        // the fabricated entry is a real, loadable literal.
        assert!(cone.contains(&h_lit.node));

        let mut ctx = CnfContext::solver_start(Box::new(MiniSolver::new()), false);
        let sweeper = Sweeper::new(&aig, 10_000);
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        sweeper.sweep(&frames, &mut ctx, &mut classes, &mut sim, &mut rng).unwrap();
        // Plain `sweep` asserts every accumulated constraint up front,
        // regardless of whether any candidate this round touches its cone.
        assert!(ctx.n_sat_vars() > 1);
    }

    #[test]
    fn sweep_dyn_skips_constraints_outside_the_queried_cone() {
        // Two independent, identically-constructed setups (the helper is
        // deterministic) so each solver context gets its own `ClassStore`
        // and `Sim` to mutate.
        let (aig_a, frames_a, mut classes_a, mut sim_a, _) = disjoint_cones_setup();
        let (aig_b, frames_b, mut classes_b, mut sim_b, _) = disjoint_cones_setup();

        let mut ctx_eager = CnfContext::solver_start(Box::new(MiniSolver::new()), false);
        let sweeper_a = Sweeper::new(&aig_a, 10_000);
        let mut rng1 = rand::rngs::StdRng::seed_from_u64(9);
        sweeper_a.sweep(&frames_a, &mut ctx_eager, &mut classes_a, &mut sim_a, &mut rng1).unwrap();

        let mut ctx_dyn = CnfContext::solver_start(Box::new(MiniSolver::new()), false);
        let sweeper_b = Sweeper::new(&aig_b, 10_000);
        let mut rng2 = rand::rngs::StdRng::seed_from_u64(9);
        sweeper_b.sweep_dyn(&frames_b, &mut ctx_dyn, &mut classes_b, &mut sim_b, &mut rng2).unwrap();

        // Both modes load the same variables for the real g1/g2 query; the
        // dynamic pass loads strictly fewer because it never touches `h`'s
        // cone, which no candidate this round actually needs.
        assert!(ctx_dyn.n_sat_vars() < ctx_eager.n_sat_vars());
    }
}
