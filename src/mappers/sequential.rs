//! Sequential mapping: one process per hostfile/target-list entry, visited
//! in order, no round-robin repeat.

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple};
use crate::target::select_targets;

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialMapper;

impl MapStrategy for SequentialMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(policy.mapping, Some(MappingPolicy::Sequential))
    }

    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError> {
        let policy = cx.job.map.as_ref().expect("map initialized").policy.clone();
        if !self.matches(&policy) {
            return Ok(MapOutcome::Declined);
        }
        let allow_oversubscribe = !policy.directives.no_oversubscribe;
        let bookmark = cx.job.map.as_ref().unwrap().bookmark.clone();

        let mut placements: Vec<(usize, String)> = Vec::new();

        for app_index in 0..cx.job.apps.len() {
            let count = cx.resolved_counts[app_index];
            if count == 0 {
                continue;
            }
            let targets = select_targets(app_index, cx.pool, &policy, None, bookmark.as_deref())?;
            // Exactly one process per entry; a job asking for more
            // processes than hostfile entries cannot be satisfied without
            // inventing an ordering the source doesn't define, so it's
            // resource-busy rather than silently wrapping.
            if count as usize > targets.len() {
                return Ok(MapOutcome::ResourceBusy);
            }
            for name in targets.into_iter().take(count as usize) {
                if !allow_oversubscribe {
                    let node = cx.pool.get(&name).ok_or(PlannerError::NotFound)?;
                    if node.is_at_capacity(false) {
                        return Ok(MapOutcome::ResourceBusy);
                    }
                }
                placements.push((app_index, name));
            }
        }

        for (_, name) in &placements {
            cx.pool
                .get_mut(name)
                .ok_or(PlannerError::NotFound)?
                .reserve(1, allow_oversubscribe)?;
        }

        let map = cx.job.map.as_mut().unwrap();
        for (app_index, name) in placements {
            map.touch_node(&name);
            map.processes.push(Process::unbound(app_index, name));
        }
        Ok(MapOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AppContext, Job, JobId, JobMap};
    use crate::node::{Node, NodePool};
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    fn topo() -> Arc<crate::topology::Topology> {
        Arc::new(SyntheticTopology::simple(1, 1, 1).build())
    }

    #[test]
    fn refuses_when_more_processes_than_targets() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::Sequential);
        let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
        job.map = Some(JobMap::new(policy));

        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![2],
        };
        assert_eq!(
            SequentialMapper.map_job(&mut cx).unwrap(),
            MapOutcome::ResourceBusy
        );
    }

    #[test]
    fn one_process_per_target_entry() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));
        pool.insert(Node::new("b", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::Sequential);
        let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
        job.map = Some(JobMap::new(policy));

        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![2],
        };
        assert_eq!(
            SequentialMapper.map_job(&mut cx).unwrap(),
            MapOutcome::Claimed
        );
        assert_eq!(job.map.as_ref().unwrap().processes.len(), 2);
    }
}
