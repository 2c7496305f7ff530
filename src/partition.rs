//! Register-window partitioner (C9)
//!
//! Slices an unconstrained AIG into overlapping windows of registers, runs
//! the full correspondence engine on each window's sub-AIG independently,
//! and lifts the resulting `repr` maps back onto the original node ids.
//! Windows run on a bounded worker pool: one coordinator thread dispatches
//! `(sub_aig, Pars)` tasks over a `crossbeam_channel::bounded` queue, and N
//! worker threads each own one task exclusively for its duration. Results
//! come back tagged with their partition index and are placed into a
//! pre-sized slot rather than appended in completion order, so the merged
//! map is independent of thread interleaving.

#![forbid(unsafe_code)]

use crate::aig::{Aig, Lit, NodeId, NodeKind};
use crate::scheduler::{run_correspondence, CorrError, Pars};
use std::collections::{HashMap, HashSet};
use std::thread;
use tracing::{debug, info, warn};

/// Errors raised by the partitioner itself (as opposed to errors bubbling
/// up from a per-partition correspondence run, which abort that window's
/// task but are reported per-window rather than aborting the whole run).
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("partitioning is not supported on a constrained AIG ({0} constraint outputs present); run the full engine instead")]
    HasConstraints(usize),
    #[error("register window size must be at least 1")]
    EmptyWindow,
}

/// One register window: the registers it owns, the sub-AIG built from
/// their transition-function fanin cones, and the map back to the
/// original AIG's node ids.
pub struct Partition {
    pub regs: Vec<u32>,
    pub sub_aig: Aig,
    /// sub_aig NodeId -> original Aig NodeId.
    back_map: HashMap<NodeId, NodeId>,
}

/// Slice `n_regs` registers into overlapping windows of `window_size`,
/// advancing by `window_size - overlap` each step. The last window is
/// clamped to whatever registers remain.
pub fn register_windows(n_regs: usize, window_size: usize, overlap: usize) -> Vec<Vec<u32>> {
    if window_size == 0 || n_regs == 0 {
        return Vec::new();
    }
    let stride = window_size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window_size).min(n_regs);
        windows.push((start as u32..end as u32).collect());
        if end >= n_regs {
            break;
        }
        start += stride;
    }
    windows
}

fn resolve(map: &HashMap<NodeId, Lit>, lit: Lit) -> Lit {
    let base = map[&lit.node];
    Lit::new(base.node, base.complement ^ lit.complement)
}

/// Build the sub-AIG for one register window: a fresh AIG containing the
/// window's own registers (kept as LO/LI pairs so the correspondence
/// engine can speculate on them directly), every PI and out-of-window LO
/// reachable from their next-state functions (the latter become fresh PIs
/// — the window doesn't own their transition, so it treats the current
/// value as a free input), and the AND gates in between.
pub fn build_subaig(aig: &Aig, regs: &[u32]) -> Partition {
    let mut needed: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = regs.iter().map(|&r| aig.li_fanin(r).node).collect();
    while let Some(id) = stack.pop() {
        if !needed.insert(id) {
            continue;
        }
        if let NodeKind::And { fanin0, fanin1 } = aig.kind(id) {
            stack.push(fanin0.node);
            stack.push(fanin1.node);
        }
    }

    let mut out = Aig::new();
    let mut fwd: HashMap<NodeId, Lit> = HashMap::new();
    let mut back: HashMap<NodeId, NodeId> = HashMap::new();
    fwd.insert(NodeId::CONST1, Lit::CONST1);
    back.insert(NodeId::CONST1, NodeId::CONST1);

    let reg_set: HashSet<u32> = regs.iter().copied().collect();
    for &r in regs {
        let orig_lo = aig.los[r as usize];
        let new_lo = out.add_lo(aig.phase(orig_lo));
        fwd.insert(orig_lo, Lit::positive(new_lo));
        back.insert(new_lo, orig_lo);
    }

    let mut ordered: Vec<NodeId> = needed.into_iter().collect();
    ordered.sort();
    for &id in &ordered {
        match aig.kind(id) {
            NodeKind::Pi => {
                let new_id = out.add_pi();
                fwd.insert(id, Lit::positive(new_id));
                back.insert(new_id, id);
            }
            NodeKind::Lo { reg } if !reg_set.contains(reg) => {
                let new_id = out.add_pi();
                fwd.insert(id, Lit::positive(new_id));
                back.insert(new_id, id);
            }
            NodeKind::Lo { .. } | NodeKind::Const1 | NodeKind::And { .. } => {}
        }
    }
    for &id in &ordered {
        if let NodeKind::And { fanin0, fanin1 } = aig.kind(id) {
            let f0 = resolve(&fwd, *fanin0);
            let f1 = resolve(&fwd, *fanin1);
            let new_id = out.add_and(f0, f1);
            fwd.insert(id, Lit::positive(new_id));
            back.insert(new_id, id);
        }
    }
    for (local, &r) in regs.iter().enumerate() {
        let li = aig.li_fanin(r);
        let lit = resolve(&fwd, li);
        out.add_li(local as u32, lit);
    }

    Partition { regs: regs.to_vec(), sub_aig: out, back_map: back }
}

/// Translate a partition-local `repr` map (sub-AIG node → sub-AIG literal)
/// back onto the original AIG's node ids. Entries whose local node or
/// target fell outside the window's id map (shouldn't happen — every
/// sub-AIG node is constructed from a back-mapped original node) are
/// skipped defensively rather than panicking.
fn lift_repr(partition: &Partition, local_repr: &HashMap<NodeId, Lit>) -> HashMap<NodeId, Lit> {
    let mut lifted = HashMap::new();
    for (&local_node, &local_target) in local_repr {
        let (Some(&orig_node), Some(&orig_target_node)) =
            (partition.back_map.get(&local_node), partition.back_map.get(&local_target.node))
        else {
            continue;
        };
        lifted.insert(orig_node, Lit::new(orig_target_node, local_target.complement));
    }
    lifted
}

/// Per-window outcome returned to the coordinator.
struct WindowResult {
    index: usize,
    repr: Result<HashMap<NodeId, Lit>, CorrError>,
}

/// Run the correspondence engine over every register window of `aig`,
/// using up to `n_workers` worker threads, and merge the lifted `repr`
/// maps back onto `aig`'s own node ids.
///
/// Constraints (`aig.n_constrs > 0`) disable partitioning outright: an
/// equivalence proven inside one window's sub-AIG says nothing about
/// states the original constraints would have excluded, since the
/// sub-AIG's own constraint set is necessarily empty.
pub fn run_partitioned(
    aig: &Aig,
    pars: &Pars,
    window_size: usize,
    overlap: usize,
    n_workers: usize,
) -> Result<HashMap<NodeId, Lit>, PartitionError> {
    if aig.n_constrs > 0 {
        return Err(PartitionError::HasConstraints(aig.n_constrs));
    }
    if window_size == 0 {
        return Err(PartitionError::EmptyWindow);
    }

    let windows = register_windows(aig.reg_count(), window_size, overlap);
    info!(n_windows = windows.len(), window_size, overlap, "partition: dispatching");

    let partitions: Vec<Partition> = windows.iter().map(|regs| build_subaig(aig, regs)).collect();
    let n_workers = n_workers.max(1).min(partitions.len().max(1));

    let (task_tx, task_rx) = crossbeam_channel::bounded::<(usize, Partition)>(partitions.len());
    let (result_tx, result_rx) = crossbeam_channel::bounded::<WindowResult>(partitions.len());

    for (index, partition) in partitions.into_iter().enumerate() {
        task_tx.send((index, partition)).expect("task channel has capacity for every partition");
    }
    drop(task_tx);

    thread::scope(|scope| {
        for worker in 0..n_workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let pars = pars.clone();
            scope.spawn(move || {
                while let Ok((index, partition)) = task_rx.recv() {
                    debug!(worker, index, n_regs = partition.regs.len(), "partition: worker running window");
                    let outcome = run_correspondence(&partition.sub_aig, &pars)
                        .map(|result| lift_repr(&partition, &result.repr));
                    let _ = result_tx.send(WindowResult { index, repr: outcome });
                }
            });
        }
        drop(result_tx);

        let mut slots: Vec<Option<HashMap<NodeId, Lit>>> = (0..windows.len()).map(|_| None).collect();
        for WindowResult { index, repr } in result_rx.iter() {
            match repr {
                Ok(map) => slots[index] = Some(map),
                Err(err) => warn!(index, error = %err, "partition: window failed, dropping its equivalences"),
            }
        }

        let mut merged = HashMap::new();
        for slot in slots.into_iter().flatten() {
            merged.extend(slot);
        }
        Ok(merged)
    })
}
