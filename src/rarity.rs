//! Rarity-driven semi-formal engine (C8)
//!
//! Bit-parallel exploration that looks for property violations, and
//! optionally filters equivalence classes, without ever calling the SAT
//! solver. Each round simulates `n_frames` combinational steps from a
//! `v_inits` state vector, scores the resulting 64 patterns per simulation
//! word by how rarely each byte-sized slice of register state has been
//! seen so far, and keeps the least-seen patterns as next round's seed —
//! biasing exploration toward states the simulator hasn't visited yet.

#![forbid(unsafe_code)]

use crate::aig::{Aig, NodeId};
use crate::classes::ClassStore;
use crate::sim::Sim;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Errors raised by the rarity engine.
#[derive(Debug, thiserror::Error)]
pub enum RarityError {
    #[error("reconstructed counter-example failed replay: PO {0} did not assert at frame {1}")]
    InvalidCex(usize, usize),
}

/// Parameters for the rarity engine (§6/§4.8 defaults).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RarPars {
    pub n_frames: usize,
    pub n_words: usize,
    pub n_bin_size: usize,
    pub n_rounds: Option<usize>,
    pub n_restart: Option<usize>,
    pub n_rand_seed: u64,
    pub time_out: Option<u64>,
    pub time_out_gap: Option<u64>,
    pub f_solve_all: bool,
    pub f_drop_sat_outs: bool,
    pub f_set_last_state: bool,
}

impl Default for RarPars {
    fn default() -> Self {
        RarPars {
            n_frames: 20,
            n_words: 50,
            n_bin_size: 8,
            n_rounds: None,
            n_restart: None,
            n_rand_seed: 0,
            time_out: None,
            time_out_gap: None,
            f_solve_all: false,
            f_drop_sat_outs: false,
            f_set_last_state: false,
        }
    }
}

/// A discovered property violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterExample {
    pub n_regs: usize,
    pub n_pis: usize,
    pub n_frames: usize,
    pub i_po: usize,
    pub i_frame: usize,
    /// Bit-packed per §6: `n_regs` initial LO bits, then `n_pis` bits per
    /// frame `0..=i_frame`.
    pub bitmap: Vec<bool>,
}

/// Result of running the rarity engine to completion or to a stop condition.
#[derive(Debug, Default)]
pub struct RarResult {
    pub cex_seq: Option<CounterExample>,
    pub n_solved: usize,
    pub rounds_run: usize,
}

/// Bit-matrix transpose state and rarity bookkeeping.
pub struct RarMan {
    pars: RarPars,
    n_regs: usize,
    n_groups: usize,
    /// `rarity[group][pattern]`.
    rarity: Vec<Vec<u32>>,
    pat_bests: Vec<Vec<usize>>,
    round: usize,
}

impl RarMan {
    pub fn new(pars: RarPars, n_regs: usize) -> Self {
        let n_groups = (n_regs + pars.n_bin_size - 1) / pars.n_bin_size.max(1);
        let table_width = 1usize << pars.n_bin_size.min(16);
        RarMan {
            rarity: vec![vec![0u32; table_width]; n_groups.max(1)],
            pat_bests: Vec::new(),
            n_regs,
            n_groups: n_groups.max(1),
            pars,
            round: 0,
        }
    }

    /// `which_one_for_phase`: the phase-coercion predicate preserved from
    /// the original engine's `Ssw_RarManObjWhichOne`. Given a node's
    /// structural phase and its simulated (phase-normalized) bit, decide
    /// which raw polarity to record as "the interesting one" for rarity
    /// bucketing: the raw bit that disagrees with the node's resting
    /// (all-zero-input) phase is always the rarer, more informative one,
    /// so this coerces toward reporting *that* bit regardless of which
    /// operand order the caller passed in.
    pub fn which_one_for_phase(structural_phase: bool, normalized_bit: bool) -> bool {
        normalized_bit ^ structural_phase
    }

    /// `transpose64`: in-place 64×64 bit-matrix transpose, the
    /// "Hacker's Delight" recursive shuffle. `rows[i]` bit `j` and
    /// `rows[j]` bit `i` are swapped for every `i != j`.
    pub fn transpose64(rows: &mut [u64; 64]) {
        let mut j = 32usize;
        let mut m: u64 = 0x0000_0000_FFFF_FFFF;
        while j != 0 {
            let mut k = 0usize;
            while k < 64 {
                let t = (rows[k] ^ (rows[k + j] >> j)) & m;
                rows[k] ^= t;
                rows[k + j] ^= t << j;
                k = (k + j + 1) & !j;
            }
            j >>= 1;
            m ^= m << j;
        }
    }

    /// `transpose_li_to_patterns`: given `n_words` simulation words per
    /// register (each word 64 patterns wide), produce the pattern matrix
    /// `pat[k][r]` (`k` ranges over `64 * n_words` patterns, `r` over
    /// `ceil(n_regs/64)` register-words) by transposing 64 registers' worth
    /// of simulation words at a time.
    pub fn transpose_li_to_patterns(&self, li_words: &[Vec<u64>]) -> Vec<Vec<u64>> {
        let n_words = self.pars.n_words;
        let n_reg_words = (self.n_regs + 63) / 64;
        let mut pat = vec![vec![0u64; n_reg_words]; 64 * n_words];

        for reg_word in 0..n_reg_words {
            let regs_in_block = (self.n_regs - reg_word * 64).min(64);
            for w in 0..n_words {
                let mut block = [0u64; 64];
                for (r, slot) in block.iter_mut().enumerate().take(regs_in_block) {
                    let reg = reg_word * 64 + r;
                    *slot = li_words[reg][w];
                }
                Self::transpose64(&mut block);
                for (k, &word) in block.iter().enumerate() {
                    pat[w * 64 + k][reg_word] = word;
                }
            }
        }
        pat
    }

    fn byte_group(pattern: &[u64], group: usize, bin_size: usize) -> usize {
        let bit_start = group * bin_size;
        let mut v = 0usize;
        for b in 0..bin_size {
            let bit = bit_start + b;
            let word = bit / 64;
            let off = bit % 64;
            if word < pattern.len() && (pattern[word] >> off) & 1 == 1 {
                v |= 1 << b;
            }
        }
        v
    }

    /// `update_rarity`: bucket every pattern's `n_bin_size`-bit groups into
    /// the rarity table.
    pub fn update_rarity(&mut self, pat: &[Vec<u64>]) {
        let bin_size = self.pars.n_bin_size.min(16);
        for pattern in pat {
            for g in 0..self.n_groups {
                let bucket = Self::byte_group(pattern, g, bin_size);
                if bucket < self.rarity[g].len() {
                    self.rarity[g][bucket] += 1;
                }
            }
        }
    }

    /// `score_and_select`: cost of pattern `k` is `Σ_g 1 / rarity[g][bucket(k)]²`
    /// (treating a never-seen bucket as cost `1.0`, since `1/0²` would be
    /// nonsensical and "never seen" is already maximally interesting), then
    /// picks the `n_words_out` lowest-rarity (highest-cost) patterns without
    /// repeats.
    pub fn score_and_select(&self, pat: &[Vec<u64>], n_words_out: usize) -> Vec<usize> {
        let bin_size = self.pars.n_bin_size.min(16);
        let mut cost: Vec<f64> = pat
            .iter()
            .map(|pattern| {
                let mut c = 0.0;
                for g in 0..self.n_groups {
                    let bucket = Self::byte_group(pattern, g, bin_size);
                    let r = self.rarity[g].get(bucket).copied().unwrap_or(0);
                    c += if r == 0 { 1.0 } else { 1.0 / (r as f64 * r as f64) };
                }
                c
            })
            .collect();

        let mut chosen = Vec::with_capacity(n_words_out);
        for _ in 0..n_words_out.min(cost.len()) {
            let (idx, _) = cost
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .expect("cost vector nonempty");
            chosen.push(idx);
            cost[idx] = f64::NEG_INFINITY;
        }
        chosen
    }

    /// Run one round: returns the indices selected for the next round's
    /// `v_inits`, and records them in `pat_bests`.
    pub fn run_round(&mut self, li_words: &[Vec<u64>]) -> Vec<usize> {
        let pat = self.transpose_li_to_patterns(li_words);
        self.update_rarity(&pat);
        let selected = self.score_and_select(&pat, self.pars.n_words);
        self.pat_bests.push(selected.clone());
        self.round += 1;
        if let Some(restart) = self.pars.n_restart {
            if self.round >= restart {
                info!(round = self.round, "rarity: restart boundary reached, clearing pattern history");
                self.pat_bests.clear();
                self.round = 0;
            }
        }
        selected
    }

    pub fn round(&self) -> usize {
        self.round
    }

    /// Selected-pattern history, one entry per completed round, in order.
    /// Used to replay which lane of that round's simulation fed the next
    /// round's `v_inits` when reconstructing a counter-example.
    pub fn pat_bests(&self) -> &[Vec<usize>] {
        &self.pat_bests
    }
}

/// `explore`: run the rarity engine for up to `pars.n_rounds` rounds (or
/// until a property violation is found), seeding PIs fresh each frame and
/// LOs from the evolving `v_inits`.
pub fn explore(aig: &Aig, pars: RarPars) -> RarResult {
    let n_regs = aig.reg_count();
    let mut man = RarMan::new(pars.clone(), n_regs);
    let mut rng = StdRng::seed_from_u64(pars.n_rand_seed);
    let mut v_inits = vec![false; n_regs];
    let mut n_solved = 0usize;
    let mut cex_seq = None;
    let max_rounds = pars.n_rounds.unwrap_or(64);

    for round in 0..max_rounds {
        let mut sim = Sim::sim_alloc(aig, 0, pars.n_frames, pars.n_words);
        sim.sim_seed_vec(&v_inits);
        sim.sim_seed_random(&mut rng, false);
        sim.sim_run(aig);

        if let Some((po_idx, frame, w, raw)) = sim.check_non_const_outputs(aig) {
            n_solved += 1;
            let bit = raw.trailing_zeros();
            cex_seq = Some(reconstruct_cex_global(aig, &pars, man.pat_bests(), round, po_idx, frame, w, bit));
            if !pars.f_solve_all {
                break;
            }
        }

        let li_words: Vec<Vec<u64>> = (0..n_regs)
            .map(|r| {
                let li = aig.li_fanin(r as u32);
                (0..pars.n_words)
                    .map(|w| {
                        let last_frame = pars.n_frames - 1;
                        let raw = sim.raw_word(li.node, last_frame, w);
                        if li.complement { !raw } else { raw }
                    })
                    .collect()
            })
            .collect();
        let selected = man.run_round(&li_words);

        if let Some(&k) = selected.first() {
            let pat = man.transpose_li_to_patterns(&li_words);
            for (r, slot) in v_inits.iter_mut().enumerate() {
                let word_idx = r / 64;
                let bit = r % 64;
                *slot = (pat[k][word_idx] >> bit) & 1 == 1;
            }
        }
    }
    RarResult { cex_seq, n_solved, rounds_run: man.round() }
}

/// Trace out one specific pattern column (`w`, `bit`) across every frame up
/// to `i_frame`, the lane whose raw value at `check_non_const_outputs`
/// asserted the violation.
fn reconstruct_cex(aig: &Aig, sim: &Sim, po_idx: usize, i_frame: usize, w: usize, bit: u32) -> CounterExample {
    let n_regs = aig.reg_count();
    let n_pis = aig.pis.len();
    let mut bitmap = Vec::with_capacity(n_regs + n_pis * (i_frame + 1));
    for &lo in &aig.los {
        bitmap.push((sim.raw_word(lo, 0, w) >> bit) & 1 == 1);
    }
    for f in 0..=i_frame {
        for &pi in &aig.pis {
            bitmap.push((sim.raw_word(pi, f, w) >> bit) & 1 == 1);
        }
    }
    CounterExample { n_regs, n_pis, n_frames: i_frame + 1, i_po: po_idx, i_frame, bitmap }
}

/// `reconstruct_cex_global`: build a counter-example for a violation `explore` found in
/// `violating_round`'s simulation at local frame `local_frame`, lane
/// `(w, bit)`. Unlike [`reconstruct_cex`], this replays every round from
/// the true all-zero reset instead of reading the violating round's own
/// (already-advanced) `v_inits`: rounds prior to `violating_round` are
/// re-simulated with a fresh `StdRng` seeded exactly as `explore`'s was,
/// and `pat_bests` (the per-round selected-pattern history `explore`
/// already recorded) tells us which lane of each prior round's simulation
/// fed the next round's `v_inits` — the same backward-then-forward walk
/// `Ssw_RarDeriveCex` does, expressed as a deterministic forward replay
/// since nothing here needs to economize on re-simulating.
///
/// The returned bitmap's leading `n_regs` bits are therefore always `false`
/// (round 0 starts from reset, by construction of `explore`), and `i_frame`
/// is the cumulative frame index `violating_round * pars.n_frames +
/// local_frame`, not `local_frame` alone.
#[allow(clippy::too_many_arguments)]
fn reconstruct_cex_global(
    aig: &Aig,
    pars: &RarPars,
    pat_bests: &[Vec<usize>],
    violating_round: usize,
    po_idx: usize,
    local_frame: usize,
    w: usize,
    bit: u32,
) -> CounterExample {
    let n_regs = aig.reg_count();
    let n_pis = aig.pis.len();
    let n_frames = pars.n_frames;
    let geom = RarMan::new(pars.clone(), n_regs);
    let i_frame = violating_round * n_frames + local_frame;

    let mut rng = StdRng::seed_from_u64(pars.n_rand_seed);
    let mut v_inits = vec![false; n_regs];
    let mut bitmap = vec![false; n_regs];

    for round in 0..=violating_round {
        let mut sim = Sim::sim_alloc(aig, 0, n_frames, pars.n_words);
        sim.sim_seed_vec(&v_inits);
        sim.sim_seed_random(&mut rng, false);
        sim.sim_run(aig);

        let (frame_hi, lane_w, lane_bit) = if round == violating_round {
            (local_frame, w, bit)
        } else {
            let k = pat_bests[round].first().copied().unwrap_or(0);
            (n_frames - 1, k / 64, (k % 64) as u32)
        };
        for f in 0..=frame_hi {
            for &pi in &aig.pis {
                bitmap.push((sim.raw_word(pi, f, lane_w) >> lane_bit) & 1 == 1);
            }
        }

        if round != violating_round {
            let last_frame = n_frames - 1;
            let li_words: Vec<Vec<u64>> = (0..n_regs)
                .map(|r| {
                    let li = aig.li_fanin(r as u32);
                    (0..pars.n_words)
                        .map(|wi| {
                            let raw = sim.raw_word(li.node, last_frame, wi);
                            if li.complement { !raw } else { raw }
                        })
                        .collect()
                })
                .collect();
            let pat = geom.transpose_li_to_patterns(&li_words);
            let k = pat_bests[round].first().copied().unwrap_or(0);
            for (r, slot) in v_inits.iter_mut().enumerate() {
                let word_idx = r / 64;
                let bitpos = r % 64;
                *slot = (pat[k][word_idx] >> bitpos) & 1 == 1;
            }
        }
    }

    CounterExample { n_regs, n_pis, n_frames: i_frame + 1, i_po: po_idx, i_frame, bitmap }
}

/// `signal_filter`: like [`explore`] but also refines an equivalence-class
/// store using the same simulation trace, with no SAT solver involved.
pub fn signal_filter(aig: &Aig, pars: RarPars, classes: &mut ClassStore, cands: &[NodeId]) -> RarResult {
    let mut rng = StdRng::seed_from_u64(pars.n_rand_seed);
    let mut sim = Sim::sim_alloc(aig, 0, pars.n_frames, pars.n_words);
    sim.sim_seed_random(&mut rng, true);
    sim.sim_run(aig);
    classes.prepare_hash(&sim, cands, false);
    let mut result = RarResult::default();
    for round in 1..pars.n_rounds.unwrap_or(4) {
        sim.sim_transfer_last_to_first(aig);
        sim.sim_seed_random(&mut rng, false);
        sim.sim_run(aig);
        classes.refine_const1(&sim, true);
        classes.refine_all(&sim, true);
        result.rounds_run = round;
        if let Some((po_idx, frame, w, raw)) = sim.check_non_const_outputs(aig) {
            result.cex_seq = Some(reconstruct_cex(aig, &sim, po_idx, frame, w, raw.trailing_zeros()));
            result.n_solved += 1;
            break;
        }
    }
    result
}

/// `find_starting_state`: replay an externally supplied counter-example
/// forward and record the LO values at its target frame as a fresh
/// `v_inits` seed.
pub fn find_starting_state(aig: &Aig, cex: &CounterExample) -> Vec<bool> {
    let mut sim = Sim::sim_alloc(aig, 0, cex.n_frames, 1);
    let mut idx = 0usize;
    let mut lo_init = vec![false; cex.n_regs];
    for v in lo_init.iter_mut() {
        *v = cex.bitmap[idx];
        idx += 1;
    }
    sim.sim_seed_vec(&lo_init);
    for f in 0..cex.n_frames {
        for &pi in &aig.pis {
            let bit = cex.bitmap.get(idx).copied().unwrap_or(false);
            idx += 1;
            sim.set_raw_word(pi, f, 0, if bit { u64::MAX } else { 0 });
        }
    }
    sim.sim_run(aig);
    aig.los.iter().map(|&lo| sim.raw_word(lo, cex.i_frame.min(cex.n_frames - 1), 0) & 1 == 1).collect()
}
