//! Crate root: public surface, core aliases, and crate-wide invariants
//!
//! This module is the single canonical entry point for downstream users of
//! the library. It re-exports the submodules implementing sequential
//! equivalence checking over And-Inverter Graphs: SAT sweeping under
//! speculative frame unrolling (k-induction), bit-parallel simulation,
//! rarity-driven semi-formal search, and register-window partitioning.
//!
//! ## Invariants
//!
//! - **Arena graph, no unsafe.** The AIG is a flat arena of nodes addressed
//!   by `NodeId`; every edge carries its own polarity bit. We forbid unsafe
//!   throughout the crate.
//! - **Monotone refinement.** Candidate equivalence classes only ever
//!   split over the life of a run; a confirmed equivalence is never later
//!   retracted except by an explicit timeout-driven removal.
//! - **Explicit randomness.** There is no process-global RNG; every
//!   simulation and rarity-search entry point threads an explicit `Rng`
//!   value supplied by the caller (or seeded deterministically from
//!   `Pars`/`RarPars`).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// And-Inverter Graph arena (nodes, literals, combinational outputs).
pub mod aig;
/// Bit-parallel simulator over an AIG.
pub mod sim;
/// Candidate equivalence-class store (splits only, never merges).
pub mod classes;
/// CNF/Tseitin encoding and the `SatSolver` trait, plus a self-contained solver.
pub mod solver;
/// Speculative-reduction frame unrolling (BMC and k-induction).
pub mod frames;
/// Induction/BMC sweeper: drives per-candidate equivalence queries.
pub mod sweep;
/// Constraint handler: initial-phase finding and constrained replay.
pub mod constraints;
/// Rarity-driven semi-formal simulation engine.
pub mod rarity;
/// Register-window partitioner with a bounded worker pool.
pub mod partition;
/// Refinement controller orchestrating the modules above into one run.
pub mod scheduler;

pub use crate::aig::{Aig, Lit, NodeId};
pub use crate::classes::ClassStore;
pub use crate::rarity::CounterExample;
pub use crate::scheduler::{run_correspondence, CorrError, CorrespondenceResult, Diagnostics, Pars};
pub use crate::sim::Sim;
