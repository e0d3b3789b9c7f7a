//! Processes-per-resource mapping: exactly `n` processes per node, or per
//! package per node.

use std::collections::HashMap;

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple, PprUnit};
use crate::target::select_targets;
use crate::topology::ObjectType;

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct PprMapper;

impl MapStrategy for PprMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(policy.mapping, Some(MappingPolicy::Ppr(_)))
    }

    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError> {
        let policy = cx.job.map.as_ref().expect("map initialized").policy.clone();
        let Some(MappingPolicy::Ppr(pattern)) = policy.mapping else {
            return Ok(MapOutcome::Declined);
        };
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
                let node = cx.pool.get(name).ok_or(PlannerError::NotFound)?;
                let per_node = match pattern.unit {
                    PprUnit::Node => pattern.count,
                    PprUnit::Package => {
                        let packages = node
                            .topology()
                            .map_or(0, |t| t.count_by_type(ObjectType::Package))
                            as u32;
                        pattern.count * packages
                    }
                };
                if !allow_oversubscribe && per_node > node.free_slots() {
                    return Ok(MapOutcome::ResourceBusy);
                }
                for _ in 0..per_node {
                    placements.push((app_index, name.clone()));
                }
                *speculative.entry(name.clone()).or_insert(0) += per_node;
                placed += per_node;
            }
            if placed != count && placed < count {
                // The estimator and the mapper disagree on node count; that
                // can only happen if the pool changed between estimation
                // and mapping.
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
    use crate::node::{Node, NodePool};
    use crate::policy::PprPattern;
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    fn two_package_topo() -> Arc<crate::topology::Topology> {
        Arc::new(SyntheticTopology::simple(2, 2, 1).build())
    }

    #[test]
    fn ppr_per_package_places_exactly_n_per_package() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 8, two_package_topo()));
        pool.insert(Node::new("b", 8, two_package_topo()));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::Ppr(
            PprPattern::parse("2:package").unwrap(),
        ));
        let mut job = Job::new(JobId(1), vec![AppContext::new(8)]);
        job.map = Some(JobMap::new(policy));

        let mut cx = MapContext {
            job: &mut job,
            pool: &mut pool,
            resolved_counts: vec![8],
        };
        assert_eq!(PprMapper.map_job(&mut cx).unwrap(), MapOutcome::Claimed);

        let map = job.map.as_ref().unwrap();
        assert_eq!(map.processes.len(), 8);
        for node in ["a", "b"] {
            let on_node = map.processes.iter().filter(|p| p.node == node).count();
            assert_eq!(on_node, 4);
        }
    }
}
