//! Human-readable and diffable map display.
//!
//! Only the driver's rank 0 ever emits a display; everyone else's
//! `emit_display` call is a no-op, mirroring the source's
//! `PRTE_PROC_MY_NAME->rank == 0` guard.

use std::fmt::Write as _;

use crate::job::Job;
use crate::node::NodePool;
use crate::topology::Locality;

/// Renders the flat, diffable XML-like stream used for golden-file tests
/// and automated comparison across runs.
pub fn display_map_diffable(job: &Job, pool: &NodePool) -> String {
    let mut out = String::new();
    let Some(map) = &job.map else { return out };

    out.push_str("<map>\n");
    for (host_num, node_name) in map.nodes.iter().enumerate() {
        let _ = writeln!(out, "  <host num={host_num}>");
        for proc in map.processes.iter().filter(|p| &p.node == node_name) {
            let binding = if proc.is_bound() {
                proc.cpu_bitmap.to_string()
            } else {
                "UNBOUND".to_string()
            };
            let _ = writeln!(
                out,
                "    <process rank={} app_idx={} local_rank={} node_rank={} binding={binding}>",
                proc.rank, proc.app_index, proc.local_rank, proc.node_rank
            );
        }
        out.push_str("  </host>\n");
    }

    out.push_str("  <locality>\n");
    if let Some(rank0) = map.processes.iter().find(|p| p.rank == 0) {
        for proc in &map.processes {
            if proc.rank == 0 {
                continue;
            }
            let locality = pairwise_locality(pool, rank0, proc);
            let _ = writeln!(out, "    <rank=0 rank={} locality={locality}>", proc.rank);
        }
    }
    out.push_str("  </locality>\n</map>\n");
    out
}

fn pairwise_locality(pool: &NodePool, a: &crate::job::Process, b: &crate::job::Process) -> Locality {
    if a.node != b.node {
        return Locality::None;
    }
    pool.get(&a.node)
        .and_then(|n| n.topology())
        .map(|t| t.locality(&a.cpu_bitmap, &b.cpu_bitmap))
        .unwrap_or(Locality::None)
}

/// Renders the human-readable summary form (one line per process, grouped
/// by node).
pub fn display_map_human(job: &Job) -> String {
    let mut out = String::new();
    let Some(map) = &job.map else { return out };

    let _ = writeln!(
        out,
        "Job: {:?}  procs={}  nodes={}  policy.mapping={:?} ranking={:?} binding={:?}",
        job.id, map.num_procs, map.num_nodes, map.policy.mapping, map.policy.ranking, map.policy.binding
    );
    for node_name in &map.nodes {
        let _ = writeln!(out, " Node {node_name}:");
        for proc in map.processes.iter().filter(|p| &p.node == node_name) {
            let binding = if proc.is_bound() {
                proc.cpu_bitmap.to_string()
            } else {
                "unbound".to_string()
            };
            let _ = writeln!(
                out,
                "   rank {} (app {}, local {}, node {}) bound to {binding}",
                proc.rank, proc.app_index, proc.local_rank, proc.node_rank
            );
        }
    }
    out
}

/// Emits whichever display form the job's attributes call for, or `None`
/// when nothing should be printed (not rank 0, or no display attribute
/// set).
pub fn emit_display(job: &Job, pool: &NodePool, is_driver_rank_zero: bool) -> Option<String> {
    if !is_driver_rank_zero {
        return None;
    }
    if job.attributes.display_diff {
        Some(display_map_diffable(job, pool))
    } else if job.attributes.display_map || job.attributes.display_devel_map {
        Some(display_map_human(job))
    } else {
        None
    }
}
