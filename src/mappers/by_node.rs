//! By-node mapping: round-robin, one process per node per visit.

use std::collections::HashMap;

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple};
use crate::target::select_targets;

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct ByNodeMapper;

impl MapStrategy for ByNodeMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(policy.mapping, Some(MappingPolicy::ByNode))
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
            loop {
                let mut progressed = false;
                for name in &targets {
                    if placed >= count {
                        break;
                    }
                    let node = cx.pool.get(name).ok_or(PlannerError::NotFound)?;
                    let already = *speculative.get(name).unwrap_or(&0);
                    if !allow_oversubscribe && already >= node.free_slots() {
                        continue;
                    }
                    placements.push((app_index, name.clone()));
                    placed += 1;
                    *speculative.entry(name.clone()).or_insert(0) += 1;
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
        for (app_index, name) in placements {
            map.touch_node(&name);
            map.processes.push(Process::unbound(app_index, name));
        }
        Ok(MapOutcome::Claimed)
    }
}
