//! By-hwthread / by-core / by-cache / by-package / by-NUMA mapping: one
//! granularity parameterized by the object type it targets.

use std::collections::HashMap;

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple};
use crate::target::select_targets;
use crate::topology::ObjectType;

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy)]
pub struct ByObjectMapper {
    object_type: ObjectType,
}

impl ByObjectMapper {
    pub fn new(object_type: ObjectType) -> Self {
        ByObjectMapper { object_type }
    }
}

impl MapStrategy for ByObjectMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(&policy.mapping, Some(MappingPolicy::ByObject(ty)) if *ty == self.object_type)
    }

    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError> {
        let policy = cx.job.map.as_ref().expect("map initialized").policy.clone();
        if !self.matches(&policy) {
            return Ok(MapOutcome::Declined);
        }
        let allow_oversubscribe = !policy.directives.no_oversubscribe;
        let pes = policy.pes_per_proc.filter(|p| *p > 1).unwrap_or(1);
        let bookmark = cx.job.map.as_ref().unwrap().bookmark.clone();

        // Speculative per-node reservation so a later app in the same job
        // (or a later failure) never observes a partially-committed plan.
        let mut speculative: HashMap<String, u32> = HashMap::new();
        // Tracks how many processes a node has already been assigned via
        // this mapper, so each process can be given the logical index of
        // the object it lands on (cycling through the node's objects of
        // this type, one per pass): ranking and binding both need to know
        // which specific object a process was mapped to, not just its node.
        let mut obj_cursor: HashMap<String, u32> = HashMap::new();
        let mut placements: Vec<(usize, String, usize)> = Vec::new();

        for app_index in 0..cx.job.apps.len() {
            let count = cx.resolved_counts[app_index];
            if count == 0 {
                continue;
            }
            let targets = select_targets(app_index, cx.pool, &policy, None, bookmark.as_deref())?;
            let mut placed = 0u32;
            loop {
                let mut progressed = false;
                for name in &targets {
                    if placed >= count {
                        break;
                    }
                    let node = cx.pool.get(name).ok_or(PlannerError::NotFound)?;
                    let arity = node
                        .topology()
                        .map_or(1, |t| t.count_by_type(self.object_type).max(1))
                        as u32;
                    // Each process consumes `pes` atomic leaves of this
                    // object type, so the node's placement capacity is
                    // `arity` divided by that factor, not `arity` itself.
                    let capacity = arity / pes;
                    let already = *speculative.get(name).unwrap_or(&0);
                    let free = if allow_oversubscribe {
                        capacity
                    } else {
                        capacity.min(node.free_slots().saturating_sub(already))
                    };
                    let take = free.min(count - placed);
                    if take == 0 {
                        continue;
                    }
                    let cursor = obj_cursor.entry(name.clone()).or_insert(0);
                    for i in 0..take {
                        let obj_logical = ((*cursor + i * pes) % arity) as usize;
                        placements.push((app_index, name.clone(), obj_logical));
                    }
                    *cursor += take * pes;
                    placed += take;
                    *speculative.entry(name.clone()).or_insert(0) += take;
                    progressed = true;
                }
                if placed >= count {
                    break;
                }
                if !progressed {
                    return Ok(MapOutcome::ResourceBusy);
                }
            }
        }

        for (name, count) in &speculative {
            cx.pool
                .get_mut(name)
                .ok_or(PlannerError::NotFound)?
                .reserve(*count, allow_oversubscribe)?;
        }

        let map = cx.job.map.as_mut().unwrap();
        for (app_index, name, obj_logical) in placements {
            map.touch_node(&name);
            let mut proc = Process::unbound(app_index, name);
            proc.mapped_object = Some(obj_logical);
            map.processes.push(proc);
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
        Arc::new(SyntheticTopology::simple(1, 2, 1).build())
    }

    #[test]
    fn by_core_advances_to_next_node_on_overflow() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));
        pool.insert(Node::new("b", 4, topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::by_core());
        let mut job = Job::new(JobId(1), vec![AppContext::new(3)]);
        job.map = Some(JobMap::new(policy));

        let mapper = ByObjectMapper::new(ObjectType::Core);
        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![3],
        };
        assert_eq!(mapper.map_job(&mut cx).unwrap(), MapOutcome::Claimed);

        let map = job.map.as_ref().unwrap();
        let on_a = map.processes.iter().filter(|p| p.node == "a").count();
        let on_b = map.processes.iter().filter(|p| p.node == "b").count();
        assert_eq!(on_a, 2);
        assert_eq!(on_b, 1);
    }
}
