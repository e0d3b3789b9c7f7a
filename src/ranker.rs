//! Rank assignment: global rank (vpid), local rank, and node rank.

use std::collections::HashMap;

use crate::error::PlannerError;
use crate::job::Job;
use crate::node::NodePool;
use crate::policy::{MappingPolicy, RankingPolicy};

/// Assigns `rank`, `local_rank`, and `node_rank` to every process in
/// `job.map`. `ByUser`-mapped jobs already carry their rank from the
/// rankfile and only need local/node ranks filled in.
pub fn rank_job(job: &mut Job, pool: &mut NodePool) -> Result<(), PlannerError> {
    let is_by_user = matches!(
        job.map.as_ref().and_then(|m| m.policy.mapping.clone()),
        Some(MappingPolicy::ByUser)
    );

    if !is_by_user {
        let ranking = job
            .map
            .as_ref()
            .and_then(|m| m.policy.ranking)
            .unwrap_or(RankingPolicy::BySlot);
        let map = job.map.as_mut().expect("map initialized");
        match ranking {
            RankingPolicy::BySlot => rank_by_slot(map),
            RankingPolicy::ByObject(_) => rank_by_object(map),
            RankingPolicy::ByNode => rank_by_node(map),
        }
    }

    assign_local_and_node_ranks(job, pool);
    assign_first_ranks(job);
    Ok(())
}

/// Records each app's first (lowest) global rank, so a single rank space can
/// be shared across apps without the environment preparer having to
/// re-derive per-app offsets itself.
fn assign_first_ranks(job: &mut Job) {
    let Some(map) = job.map.as_ref() else { return };
    let mut first: HashMap<usize, u32> = HashMap::new();
    for proc in &map.processes {
        first
            .entry(proc.app_index)
            .and_modify(|r| *r = (*r).min(proc.rank))
            .or_insert(proc.rank);
    }
    for (app_index, app) in job.apps.iter_mut().enumerate() {
        if let Some(&rank) = first.get(&app_index) {
            app.first_rank = rank;
        }
    }
}

fn node_index_of(nodes: &[String]) -> HashMap<&str, usize> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect()
}

/// Rank in node-then-placement order: within the job's node list, each
/// node's processes keep the relative order the mapper placed them in
/// (which for by-slot mapping is slot order).
fn rank_by_slot(map: &mut crate::job::JobMap) {
    let node_index = node_index_of(&map.nodes);
    let mut order: Vec<usize> = (0..map.processes.len()).collect();
    order.sort_by_key(|&i| node_index[map.processes[i].node.as_str()]);
    for (rank, idx) in order.into_iter().enumerate() {
        map.processes[idx].rank = rank as u32;
    }
}

/// Rank in node-then-object order: within each node, processes are ordered
/// by the logical index of the topology object the mapper placed them on
/// (falling back to placement order for processes a by-object mapper never
/// touched), rather than raw placement order.
fn rank_by_object(map: &mut crate::job::JobMap) {
    let node_index = node_index_of(&map.nodes);
    let mut order: Vec<usize> = (0..map.processes.len()).collect();
    order.sort_by_key(|&i| {
        (
            node_index[map.processes[i].node.as_str()],
            map.processes[i].mapped_object.unwrap_or(0),
        )
    });
    for (rank, idx) in order.into_iter().enumerate() {
        map.processes[idx].rank = rank as u32;
    }
}

/// Rank striped across nodes: rank 0 on node 0, rank 1 on node 1, ...,
/// wrapping back to node 0 once every node's first slot is taken.
fn rank_by_node(map: &mut crate::job::JobMap) {
    let node_index = node_index_of(&map.nodes);
    let mut per_node: Vec<Vec<usize>> = vec![Vec::new(); map.nodes.len()];
    for (i, p) in map.processes.iter().enumerate() {
        per_node[node_index[p.node.as_str()]].push(i);
    }
    let max_len = per_node.iter().map(Vec::len).max().unwrap_or(0);
    let mut rank = 0u32;
    for slot in 0..max_len {
        for bucket in &per_node {
            if let Some(&idx) = bucket.get(slot) {
                map.processes[idx].rank = rank;
                rank += 1;
            }
        }
    }
}

/// Fills in `local_rank` (dense per (job, node)) and `node_rank` (dense per
/// node, persisting across jobs via the node's resident counter).
fn assign_local_and_node_ranks(job: &mut Job, pool: &mut NodePool) {
    let Some(map) = job.map.as_mut() else { return };
    map.processes.sort_by_key(|p| p.rank);

    let mut local_counters: HashMap<String, u32> = HashMap::new();
    let mut local_total = 0u32;
    for proc in &mut map.processes {
        let local_rank = local_counters.entry(proc.node.clone()).or_insert(0);
        proc.local_rank = *local_rank;
        *local_rank += 1;
        local_total += 1;

        if let Some(node) = pool.get_mut(&proc.node) {
            proc.node_rank = node.next_node_rank();
        }
    }
    map.num_local_procs = local_total;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AppContext, Job, JobId, JobMap, Process};
    use crate::node::Node;
    use crate::policy::PolicyTuple;
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    fn topo() -> Arc<crate::topology::Topology> {
        Arc::new(SyntheticTopology::simple(1, 4, 1).build())
    }

    #[test]
    fn by_slot_ranks_are_contiguous_per_node() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));
        pool.insert(Node::new("b", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.ranking = Some(RankingPolicy::BySlot);
        let mut map = JobMap::new(policy);
        for n in ["a", "a", "b", "b"] {
            map.processes.push(Process::unbound(0, n));
        }
        map.nodes = vec!["a".into(), "b".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(4)]);
        job.map = Some(map);

        rank_job(&mut job, &mut pool).unwrap();
        let ranks: Vec<u32> = job.map.as_ref().unwrap().processes.iter().map(|p| p.rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn first_rank_is_recorded_per_app() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.ranking = Some(RankingPolicy::BySlot);
        let mut map = JobMap::new(policy);
        // app 0 gets two processes, app 1 gets one, placed in that order.
        map.processes.push(Process::unbound(0, "a"));
        map.processes.push(Process::unbound(0, "a"));
        map.processes.push(Process::unbound(1, "a"));
        map.nodes = vec!["a".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(2), AppContext::new(1)]);
        job.map = Some(map);

        rank_job(&mut job, &mut pool).unwrap();
        assert_eq!(job.apps[0].first_rank, 0);
        assert_eq!(job.apps[1].first_rank, 2);
    }

    #[test]
    fn by_object_ranks_within_a_node_by_mapped_object_index() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.ranking = Some(RankingPolicy::ByObject(crate::topology::ObjectType::Core));
        let mut map = JobMap::new(policy);
        // Placed out of object order (core 1 before core 0): ranking must
        // reorder by mapped_object, not placement order.
        let mut p0 = Process::unbound(0, "a");
        p0.mapped_object = Some(1);
        let mut p1 = Process::unbound(0, "a");
        p1.mapped_object = Some(0);
        map.processes.push(p0);
        map.processes.push(p1);
        map.nodes = vec!["a".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
        job.map = Some(map);

        rank_job(&mut job, &mut pool).unwrap();
        let procs = &job.map.as_ref().unwrap().processes;
        let by_mapped_object: HashMap<usize, u32> = procs
            .iter()
            .map(|p| (p.mapped_object.unwrap(), p.rank))
            .collect();
        assert!(by_mapped_object[&0] < by_mapped_object[&1]);
    }
}
