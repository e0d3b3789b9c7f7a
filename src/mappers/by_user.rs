//! Rankfile-driven mapping: explicit (rank, host, slot) triples, no
//! balancing across nodes.

use crate::error::PlannerError;
use crate::job::Process;
use crate::policy::{MappingPolicy, PolicyTuple};

use super::{MapContext, MapOutcome, MapStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct ByUserMapper;

impl MapStrategy for ByUserMapper {
    fn matches(&self, policy: &PolicyTuple) -> bool {
        matches!(policy.mapping, Some(MappingPolicy::ByUser))
    }

    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError> {
        let policy = cx.job.map.as_ref().expect("map initialized").policy.clone();
        if !self.matches(&policy) {
            return Ok(MapOutcome::Declined);
        }
        let Some(entries) = cx.job.rankfile.clone() else {
            return Err(PlannerError::BadParam(
                "ByUser mapping requested without a rankfile".into(),
            ));
        };
        let allow_oversubscribe = !policy.directives.no_oversubscribe;

        // No balancing: every rankfile entry is placed exactly where it
        // says, so reserve speculatively and bail before any real mutation
        // if any single reservation would fail.
        let mut per_node: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for entry in &entries {
            *per_node.entry(entry.host.clone()).or_insert(0) += 1;
        }
        for (host, count) in &per_node {
            let node = cx.pool.get(host).ok_or_else(|| {
                PlannerError::BadParam(format!("rankfile references unknown host {host}"))
            })?;
            if !allow_oversubscribe && *count > node.free_slots() {
                return Ok(MapOutcome::ResourceBusy);
            }
        }
        for (host, count) in &per_node {
            cx.pool
                .get_mut(host)
                .ok_or(PlannerError::NotFound)?
                .reserve(*count, allow_oversubscribe)?;
        }

        let num_hwthreads = cx
            .pool
            .iter()
            .find_map(|n| n.topology().map(|t| t.num_hwthreads()))
            .unwrap_or(0);

        let map = cx.job.map.as_mut().unwrap();
        for entry in &entries {
            map.touch_node(&entry.host);
            let mut proc = Process::unbound(0, entry.host.clone());
            proc.rank = entry.rank;
            let mut bitmap = crate::topology::CpuBitmap::empty(num_hwthreads);
            for hwthread in entry.slot.expand(num_hwthreads) {
                bitmap.set(hwthread);
            }
            proc.cpu_bitmap = bitmap;
            map.processes.push(proc);
        }
        map.processes.sort_by_key(|p| p.rank);

        Ok(MapOutcome::Claimed)
    }
}
