//! Speculative-frame builder (C4)
//!
//! Builds a *frames AIG*: the unrolling of one or several copies of the
//! original transition function, with current equivalence candidates
//! folded in as substitutions. Two unrolling modes exist:
//!
//! - [`FrameBuilder::unroll_bmc`] — a plain K-frame unrolling with no
//!   substitution, used for the bounded base case (induction depth 0).
//! - [`FrameBuilder::unroll_ind`] — a (K+1)-frame unrolling that, at every
//!   node with a candidate representative, substitutes in the
//!   representative's frame-node ("speculation") while still emitting the
//!   unsubstituted ("raw") node as a parallel output, wired together by a
//!   `raw ≡ spec` constraint output. Frames `0..K` carry the induction
//!   hypothesis (the constraint holds); frame `K` is left unconstrained —
//!   the query the sweeper asks is whether it holds there too.
//!
//! Every `(node, frame)` pair maps to a literal in the frames AIG; when two
//! original nodes are candidates in the same class, both resolve (via
//! `spec`) to the same frames-AIG literal, which is exactly what lets a
//! single SAT query stand in for an equivalence check.

#![forbid(unsafe_code)]

use crate::aig::{Aig, Lit, NodeId, NodeKind};
use crate::classes::ClassStore;
use std::collections::HashMap;

/// Per-frame node→literal maps produced by an unrolling.
pub struct FrameSet {
    pub frames_aig: Aig,
    /// `spec[frame][orig_node]`: the (possibly substituted) frame literal.
    pub spec: Vec<HashMap<NodeId, Lit>>,
    /// `raw[frame][orig_node]`: the unsubstituted frame literal. For
    /// `unroll_bmc` this is identical to `spec` (no substitution ever
    /// happens); for `unroll_ind` it is the literal the frame AIG would
    /// have gotten had no candidate been assumed.
    pub raw: Vec<HashMap<NodeId, Lit>>,
    /// `(frame, raw_lit, spec_lit)` for every node whose substitution
    /// produced a *new*, non-trivial constraint (raw and spec are
    /// different frame literals).
    pub constraints: Vec<(usize, Lit, Lit)>,
    /// Total candidates visited that had a non-self representative.
    pub n_constr_total: usize,
    /// Of those, how many collapsed to an already-identical literal and so
    /// needed no new constraint output.
    pub n_constr_reduced: usize,
}

pub struct FrameBuilder;

impl FrameBuilder {
    /// `unroll_bmc`: build frames `0..n_frames` with no substitution. LO
    /// literals at frame 0 are fixed to the current candidate polarity
    /// when the LO is a const-1 candidate (const-0 in the unprimed AIG's
    /// own phase convention), otherwise each LO is a fresh CI.
    pub fn unroll_bmc(aig: &Aig, n_frames: usize, classes: &ClassStore) -> FrameSet {
        let mut out = Aig::new();
        let mut maps: Vec<HashMap<NodeId, Lit>> = vec![HashMap::new(); n_frames.max(1)];
        for m in &mut maps {
            m.insert(NodeId::CONST1, Lit::CONST1);
        }

        for frame in 0..n_frames {
            for &pi in &aig.pis {
                let id = out.add_pi();
                maps[frame].insert(pi, Lit::positive(id));
            }
            for &lo in &aig.los {
                if frame == 0 {
                    let lit = Self::frame0_lo_literal(&mut out, aig, classes, lo);
                    maps[0].insert(lo, lit);
                }
                // frame > 0 LOs are seeded below, via LI feed-forward.
            }
            for id in aig.and_nodes_topo() {
                let NodeKind::And { fanin0, fanin1 } = aig.kind(id) else { unreachable!() };
                let c0 = Self::resolve(&maps[frame], *fanin0);
                let c1 = Self::resolve(&maps[frame], *fanin1);
                let g = out.add_and(c0, c1);
                maps[frame].insert(id, Lit::positive(g));
            }
            if frame + 1 < n_frames {
                for (r, _) in aig.los.iter().enumerate() {
                    let li = aig.li_fanin(r as u32);
                    let lit = Self::resolve(&maps[frame], li);
                    maps[frame + 1].insert(aig.los[r], lit);
                }
            }
        }
        let raw = maps.clone();
        FrameSet { frames_aig: out, spec: maps, raw, constraints: Vec::new(), n_constr_total: 0, n_constr_reduced: 0 }
    }

    /// `unroll_ind`: build frames `0..=k`, substituting candidate
    /// representatives at every node per the rule in §4.4: if `n`'s repr
    /// is `r` and `phase(n) == phase(r)`, `spec(n) = spec(r)`; otherwise
    /// `spec(n) = ¬spec(r)`.
    pub fn unroll_ind(aig: &Aig, k: usize, classes: &ClassStore) -> FrameSet {
        let n_frames = k + 1;
        let mut out = Aig::new();
        let mut spec: Vec<HashMap<NodeId, Lit>> = vec![HashMap::new(); n_frames];
        let mut raw: Vec<HashMap<NodeId, Lit>> = vec![HashMap::new(); n_frames];
        for f in 0..n_frames {
            spec[f].insert(NodeId::CONST1, Lit::CONST1);
            raw[f].insert(NodeId::CONST1, Lit::CONST1);
        }
        let mut constraints = Vec::new();
        let mut n_constr_total = 0usize;
        let mut n_constr_reduced = 0usize;

        for frame in 0..n_frames {
            for &pi in &aig.pis {
                let id = out.add_pi();
                spec[frame].insert(pi, Lit::positive(id));
                raw[frame].insert(pi, Lit::positive(id));
            }
            for &lo in &aig.los {
                if frame == 0 {
                    let lit = Self::frame0_lo_literal(&mut out, aig, classes, lo);
                    spec[0].insert(lo, lit);
                    raw[0].insert(lo, lit);
                }
                // frame > 0 LOs are seeded below, via LI feed-forward.
            }
            for id in aig.and_nodes_topo() {
                let NodeKind::And { fanin0, fanin1 } = aig.kind(id) else { unreachable!() };
                let rc0 = Self::resolve(&raw[frame], *fanin0);
                let rc1 = Self::resolve(&raw[frame], *fanin1);
                let raw_g = out.add_and(rc0, rc1);
                let raw_lit = Lit::positive(raw_g);
                raw[frame].insert(id, raw_lit);

                let sc0 = Self::resolve(&spec[frame], *fanin0);
                let sc1 = Self::resolve(&spec[frame], *fanin1);
                let built_spec = Lit::positive(out.add_and(sc0, sc1));

                let final_spec = if classes.is_const1_cand(id) {
                    n_constr_total += 1;
                    let substituted = if aig.phase(id) { Lit::CONST1 } else { Lit::CONST0 };
                    if substituted == built_spec {
                        n_constr_reduced += 1;
                    } else {
                        constraints.push((frame, built_spec, substituted));
                    }
                    substituted
                } else if classes.representative(id) != id {
                    n_constr_total += 1;
                    let r = classes.representative(id);
                    let base = *spec[frame].get(&r).expect("repr already visited (topo order)");
                    let same_phase = aig.phase(id) == aig.phase(r);
                    let substituted = if same_phase { base } else { base.negate() };
                    if substituted == built_spec {
                        n_constr_reduced += 1;
                    } else {
                        constraints.push((frame, built_spec, substituted));
                    }
                    substituted
                } else {
                    built_spec
                };
                spec[frame].insert(id, final_spec);
            }
            if frame + 1 < n_frames {
                for (r, &lo) in aig.los.iter().enumerate() {
                    let li = aig.li_fanin(r as u32);
                    let raw_lit = Self::resolve(&raw[frame], li);
                    let spec_lit = Self::resolve(&spec[frame], li);
                    raw[frame + 1].insert(lo, raw_lit);
                    spec[frame + 1].insert(lo, spec_lit);
                }
            }
        }
        FrameSet { frames_aig: out, spec, raw, constraints, n_constr_total, n_constr_reduced }
    }

    /// Frame-0 literal for an LO: fixed to its own phase when it is a
    /// current const-1 candidate (the sweeper is speculating it never
    /// toggles), otherwise a fresh free CI in the frames AIG.
    fn frame0_lo_literal(out: &mut Aig, aig: &Aig, classes: &ClassStore, lo: NodeId) -> Lit {
        if classes.is_const1_cand(lo) {
            if aig.phase(lo) {
                Lit::CONST1
            } else {
                Lit::CONST0
            }
        } else {
            Lit::positive(out.add_pi())
        }
    }

    fn resolve(map: &HashMap<NodeId, Lit>, lit: Lit) -> Lit {
        let base = map[&lit.node];
        Lit::new(base.node, base.complement ^ lit.complement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aig::Lit as AigLit;

    fn inverter_register() -> Aig {
        let mut aig = Aig::new();
        let lo = aig.add_lo(false);
        aig.add_li(0, AigLit::positive(lo).negate());
        aig
    }

    #[test]
    fn bmc_unroll_produces_one_frame_per_step() {
        let aig = inverter_register();
        let classes = ClassStore::new();
        let fs = FrameBuilder::unroll_bmc(&aig, 3, &classes);
        assert_eq!(fs.spec.len(), 3);
        assert!(fs.spec[0].contains_key(&aig.los[0]));
    }

    #[test]
    fn ind_unroll_builds_k_plus_one_frames() {
        let aig = inverter_register();
        let classes = ClassStore::new();
        let fs = FrameBuilder::unroll_ind(&aig, 2, &classes);
        assert_eq!(fs.spec.len(), 3);
    }

    #[test]
    fn substitution_collapses_candidate_members_to_one_literal() {
        let mut aig = Aig::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g1 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        let g2 = aig.add_and(AigLit::positive(a), AigLit::positive(b));
        let mut classes = ClassStore::new();
        let sim = crate::sim::Sim::sim_alloc(&aig, 0, 1, 1);
        classes.prepare_hash(&sim, &[g1, g2], false);
        classes.refine_all(&sim, true); // no-op: words are both zero, stays merged

        let fs = FrameBuilder::unroll_ind(&aig, 0, &classes);
        let l1 = fs.spec[0][&g1];
        let l2 = fs.spec[0][&g2];
        assert_eq!(l1, l2);
    }
}
