//! By-slot mapping: fill each target node to its slot count before moving
//! on to the next.

use std::collections::HashMap;

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple};
use crate::target::select_targets;

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct BySlotMapper;

impl MapStrategy for BySlotMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(policy.mapping, Some(MappingPolicy::BySlot))
    }

    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError> {
        let policy = cx.job.map.as_ref().expect("map initialized").policy.clone();
        if !self.matches(&policy) {
            return Ok(MapOutcome::Declined);
        }
        let allow_oversubscribe = !policy.directives.no_oversubscribe;
        let bookmark = cx.job.map.as_ref().unwrap().bookmark.clone();

        let mut speculative: HashMap<String, u32> = HashMap::new();
        let mut placements: Vec<(usize, String)> = Vec::new();

        for app_index in 0..cx.job.apps.len() {
            let count = cx.resolved_counts[app_index];
            if count == 0 {
                continue;
            }
            let targets = select_targets(app_index, cx.pool, &policy, None, bookmark.as_deref())?;
            let mut placed = 0u32;
            for name in &targets {
                if placed >= count {
                    break;
                }
                let node = cx.pool.get(name).ok_or(PlannerError::NotFound)?;
                let already = *speculative.get(name).unwrap_or(&0);
                let room = if allow_oversubscribe {
                    count - placed
                } else {
                    node.free_slots().saturating_sub(already)
                };
                let take = room.min(count - placed);
                if take == 0 {
                    continue;
                }
                for _ in 0..take {
                    placements.push((app_index, name.clone()));
                }
                placed += take;
                *speculative.entry(name.clone()).or_insert(0) += take;
            }
            if placed < count {
                return Ok(MapOutcome::ResourceBusy);
            }
        }

        for (name, count) in &speculative {
            cx.pool
                .get_mut(name)
                .ok_or(PlannerError::NotFound)?
                .reserve(*count, allow_oversubscribe)?;
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
    use crate::node::Node;
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    fn topo() -> Arc<crate::topology::Topology> {
        Arc::new(SyntheticTopology::simple(1, 4, 1).build())
    }

    #[test]
    fn fills_first_node_before_advancing() {
        let mut pool = crate::node::NodePool::new();
        pool.insert(Node::new("a", 2, topo()));
        pool.insert(Node::new("b", 2, topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::BySlot);
        let mut job = Job::new(JobId(1), vec![AppContext::new(3)]);
        job.map = Some(JobMap::new(policy));

        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![3],
        };
        let outcome = BySlotMapper.map_job(&mut cx).unwrap();
        assert_eq!(outcome, MapOutcome::Claimed);

        let map = job.map.as_ref().unwrap();
        let on_a = map.processes.iter().filter(|p| p.node == "a").count();
        let on_b = map.processes.iter().filter(|p| p.node == "b").count();
        assert_eq!(on_a, 2);
        assert_eq!(on_b, 1);
    }

    #[test]
    fn refuses_oversubscription_leaving_no_partial_state() {
        let mut pool = crate::node::NodePool::new();
        pool.insert(Node::new("a", 2, topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::BySlot);
        policy.directives.no_oversubscribe = true;
        let mut job = Job::new(JobId(1), vec![AppContext::new(3)]);
        job.map = Some(JobMap::new(policy));

        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![3],
        };
        let outcome = BySlotMapper.map_job(&mut cx).unwrap();
        assert_eq!(outcome, MapOutcome::ResourceBusy);
        assert!(job.map.as_ref().unwrap().processes.is_empty());
        assert_eq!(pool.get("a").unwrap().slots_in_use(), 0);
    }
}
