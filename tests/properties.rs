//! Property-style tests for the invariants listed in the specification's
//! testable-properties section. Each test picks a small, hand-constructed
//! instance and checks the property directly rather than asserting a
//! specific end-to-end scenario (see `tests/correspondence.rs` for those).

use seqcorr::aig::{Aig, Lit};
use seqcorr::classes::ClassStore;
use seqcorr::rarity::{explore, RarPars};
use seqcorr::scheduler::{run_correspondence, Pars};
use seqcorr::sim::Sim;
use rand::SeedableRng;

/// 1. Refinement monotonicity: across repeated `refine_all` passes, the
/// class count never decreases and the eliminated-literal count (`n_lits`)
/// never increases.
#[test]
fn refinement_only_ever_splits_classes() {
    let mut aig = Aig::new();
    let a = aig.add_pi();
    let b = aig.add_pi();
    let c = aig.add_pi();
    let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
    // a, b, c all start in one bucket (identical words); c is nudged apart
    // on each subsequent round, driving a strictly increasing class count
    // and a strictly decreasing n_lits across the sequence of refinements.
    sim.set_raw_word(a, 0, 0, 0xAAAA);
    sim.set_raw_word(b, 0, 0, 0xAAAA);
    sim.set_raw_word(c, 0, 0, 0xAAAA);

    let mut classes = ClassStore::new();
    classes.prepare_hash(&sim, &[a, b, c], false);
    let mut prev_classes = classes.n_classes();
    let mut prev_lits = classes.n_lits();

    sim.set_raw_word(c, 0, 0, 0x5555);
    classes.refine_all(&sim, true);
    assert!(classes.n_classes() >= prev_classes);
    assert!(classes.n_lits() <= prev_lits);
    prev_classes = classes.n_classes();
    prev_lits = classes.n_lits();

    sim.set_raw_word(b, 0, 0, 0x1234);
    classes.refine_all(&sim, true);
    assert!(classes.n_classes() >= prev_classes);
    assert!(classes.n_lits() <= prev_lits);
    classes.check_invariants();
}

/// 2. Simulation consistency: an internal AND node's stored word always
/// equals the bitwise AND of its (complement-adjusted) fanin words in the
/// same frame, for every frame and every random seed tried.
#[test]
fn and_node_words_match_fanin_bitwise_and() {
    let mut aig = Aig::new();
    let a = aig.add_pi();
    let b = aig.add_pi();
    let c = aig.add_pi();
    let g1 = aig.add_and(Lit::positive(a), Lit::positive(b).negate());
    let g2 = aig.add_and(Lit::positive(g1), Lit::positive(c));

    for seed in 0..5u64 {
        let mut sim = Sim::sim_alloc(&aig, 0, 3, 2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        sim.sim_seed_random(&mut rng, false);
        sim.sim_run(&aig);

        for frame in 0..3 {
            for w in 0..2 {
                let wa = sim.raw_word(a, frame, w);
                let wb = sim.raw_word(b, frame, w);
                let expected_g1 = wa & !wb;
                assert_eq!(sim.raw_word(g1, frame, w), expected_g1);

                let wg1 = sim.raw_word(g1, frame, w);
                let wc = sim.raw_word(c, frame, w);
                let expected_g2 = wg1 & wc;
                assert_eq!(sim.raw_word(g2, frame, w), expected_g2);
            }
        }
    }
}

/// The simulator is generic over `Rng`; the consistency property must hold
/// just as well fed by a non-default generator, not only `StdRng`.
#[test]
fn and_node_words_match_fanin_bitwise_and_under_xorshift() {
    use rand_xorshift::XorShiftRng;

    let mut aig = Aig::new();
    let a = aig.add_pi();
    let b = aig.add_pi();
    let g = aig.add_and(Lit::positive(a), Lit::positive(b).negate());

    let mut sim = Sim::sim_alloc(&aig, 0, 2, 1);
    let mut rng = XorShiftRng::seed_from_u64(99);
    sim.sim_seed_random(&mut rng, false);
    sim.sim_run(&aig);

    for frame in 0..2 {
        let wa = sim.raw_word(a, frame, 0);
        let wb = sim.raw_word(b, frame, 0);
        assert_eq!(sim.raw_word(g, frame, 0), wa & !wb);
    }
}

/// 3. Phase invariance: `objs_equal_word` must track equivalence purely
/// through the phase-normalized word, so two structurally different gates
/// that differ by a fixed polarity flip in every assignment are still
/// reported equal, while two gates that merely coincide on one simulation
/// round (but differ structurally) are not conflated by the raw word.
#[test]
fn equivalence_predicate_ignores_raw_polarity_but_not_real_differences() {
    let mut aig = Aig::new();
    let a = aig.add_pi();
    let b = aig.add_pi();
    // not_a's raw word is always the bitwise complement of a's, yet the
    // phase-normalized predicate must still report them equivalent: a's
    // phase is false, not_a's is true, so both normalize to the same bits.
    let not_a = aig.add_and(Lit::positive(a).negate(), Lit::positive(a).negate());

    let mut sim = Sim::sim_alloc(&aig, 0, 1, 1);
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    sim.sim_seed_random(&mut rng, false);
    sim.sim_run(&aig);
    assert_ne!(sim.raw_word(a, 0, 0), sim.raw_word(not_a, 0, 0));
    assert!(sim.objs_equal_word(a, not_a));

    // A node that only coincidentally matches and_ab's raw word in this
    // particular frame (but is semantically different) must not be
    // reported equal by the normalized predicate once a disagreeing frame
    // is simulated.
    let and_ab = aig.add_and(Lit::positive(a), Lit::positive(b));
    let different = aig.add_and(Lit::positive(a), Lit::positive(b).negate());
    let mut sim2 = Sim::sim_alloc(&aig, 0, 1, 1);
    sim2.set_raw_word(a, 0, 0, 0b1100);
    sim2.set_raw_word(b, 0, 0, 0b1010);
    sim2.sim_run(&aig);
    assert!(!sim2.objs_equal_word(and_ab, different));
}

/// 4. CEX soundness: replaying a rarity-engine-reported counter-example's
/// bitmap through a fresh simulator must assert the violated PO exactly at
/// the reported frame, and nowhere earlier.
#[test]
fn rarity_counterexample_replays_to_the_reported_frame() {
    let mut aig = Aig::new();
    let pi = aig.add_pi();
    aig.add_po(Lit::positive(pi));

    let pars = RarPars { n_frames: 4, n_words: 2, n_rounds: Some(3), ..RarPars::default() };
    let result = explore(&aig, pars);
    let cex = result.cex_seq.expect("a live PI output must assert within a few rounds");

    let mut sim = Sim::sim_alloc(&aig, 0, cex.n_frames, 1);
    let mut idx = 0usize;
    for _ in 0..cex.n_regs {
        idx += 1; // no registers in this AIG; loop is a no-op but keeps the bitmap layout explicit
    }
    // bitmap only carries frames 0..=i_frame; later frames are left at their
    // simulator-default zero word, which is fine since nothing past i_frame
    // is asserted below.
    for f in 0..=cex.i_frame {
        for &p in &aig.pis {
            let bit = cex.bitmap[idx];
            idx += 1;
            sim.set_raw_word(p, f, 0, if bit { u64::MAX } else { 0 });
        }
    }
    sim.sim_run(&aig);

    for f in 0..cex.i_frame {
        assert_eq!(sim.raw_word(pi, f, 0), 0, "PO must not assert before the reported frame");
    }
    assert_ne!(sim.raw_word(pi, cex.i_frame, 0), 0, "PO must assert at the reported frame");
}

/// 5. Induction soundness (spot check): when the engine reports two
/// registers equivalent, replaying the *original* (unreduced) AIG under
/// several independent random input sequences must show their values
/// agreeing in every frame — a necessary condition for the claimed
/// equivalence to actually be sound.
#[test]
fn reported_register_equivalence_holds_under_independent_replay() {
    let mut aig = Aig::new();
    let pi = aig.add_pi();
    let lo_a = aig.add_lo(false);
    let lo_b = aig.add_lo(false);
    aig.add_li(0, Lit::positive(pi));
    aig.add_li(1, Lit::positive(pi));
    aig.add_po(Lit::positive(lo_a));
    aig.add_po(Lit::positive(lo_b));

    let pars = Pars { n_frames_k: 1, ..Pars::default() };
    let result = run_correspondence(&aig, &pars).unwrap();
    assert_eq!(result.reduced_aig.reg_count(), 1, "precondition: the engine must have claimed the merge");

    for seed in 0..4u64 {
        let mut sim = Sim::sim_alloc(&aig, 0, 6, 1);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        sim.sim_seed_random(&mut rng, true);
        sim.sim_run(&aig);
        for frame in 0..6 {
            assert_eq!(sim.raw_word(lo_a, frame, 0), sim.raw_word(lo_b, frame, 0));
        }
    }
}
