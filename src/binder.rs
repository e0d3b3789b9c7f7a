//! CPU binding: turns mapping granularity + binding policy into each
//! process's CPU bitmap.

use itertools::Itertools;

use crate::error::PlannerError;
use crate::job::Job;
use crate::node::NodePool;
use crate::policy::{BindingPolicy, MappingPolicy};
use crate::topology::{CpuBitmap, ObjectType, Topology, TopologyObject};

/// Computes and stores every process's `cpu_bitmap` (and, where exact,
/// `bound_to`). `ByUser`-mapped jobs are already bound by the rankfile
/// mapper and are left untouched.
pub fn bind_job(job: &mut Job, pool: &NodePool) -> Result<(), PlannerError> {
    let policy = job.map.as_ref().expect("map initialized").policy.clone();

    if matches!(policy.mapping, Some(MappingPolicy::ByUser)) {
        return Ok(());
    }
    let Some(binding) = policy.binding.clone() else {
        return Ok(());
    };
    if matches!(binding, BindingPolicy::None) {
        return Ok(());
    }

    let map = job.map.as_mut().expect("map initialized");
    let by_node: std::collections::HashMap<String, Vec<usize>> = (0..map.processes.len())
        .into_group_map_by(|&i| map.processes[i].node.clone());

    for (node_name, idxs) in by_node {
        let node = pool.get(&node_name).ok_or(PlannerError::NotFound)?;
        let topo = node.topology().ok_or(PlannerError::NotFound)?;
        let locals = idxs.len() as u32;

        match &binding {
            BindingPolicy::Object(ty) => {
                let arity = topo.count_by_type(*ty) as u32;
                if arity == 0 {
                    if policy.binding_options.if_supported {
                        continue;
                    }
                    return Err(PlannerError::BindingInfeasible(format!(
                        "node {node_name} has no {ty}"
                    )));
                }
                // When the mapper placed processes at this same object
                // granularity, bind each process to the exact object it was
                // mapped to rather than re-deriving one from local_idx: the
                // mapper may have cycled through objects fewer than once
                // per process (e.g. 4 locals, 1 package), which local_idx
                // alone can't reconstruct.
                let mapped_aligned =
                    matches!(&policy.mapping, Some(MappingPolicy::ByObject(mty)) if mty == ty);
                for (local_idx, &proc_idx) in idxs.iter().enumerate() {
                    let obj_logical = if mapped_aligned {
                        map.processes[proc_idx]
                            .mapped_object
                            .unwrap_or(local_idx % arity as usize)
                    } else if arity >= locals {
                        local_idx
                    } else if policy.binding_options.allow_overload {
                        local_idx % arity as usize
                    } else if policy.binding_options.if_supported {
                        continue;
                    } else {
                        return Err(PlannerError::BindingInfeasible(format!(
                            "{locals} locals on node {node_name} exceed {arity} {ty} without overload"
                        )));
                    };
                    let obj = topo
                        .get_by_type(*ty, obj_logical)
                        .ok_or(PlannerError::NotFound)?;
                    let mut bitmap = obj.cpuset().clone();
                    if let Some(pes) = policy.pes_per_proc.filter(|p| *p > 1) {
                        bitmap = widen_bitmap(topo, *ty, obj.logical_index(), pes);
                    }
                    map.processes[proc_idx].cpu_bitmap = bitmap;
                    map.processes[proc_idx].bound_to = Some(obj.id());
                }
            }
            BindingPolicy::CpuList(specs) => {
                let num_hw = topo.num_hwthreads();
                for (local_idx, &proc_idx) in idxs.iter().enumerate() {
                    let spec = if policy.binding_options.ordered || specs.is_empty() {
                        specs.get(local_idx)
                    } else {
                        specs.get(local_idx % specs.len())
                    };
                    let Some(spec) = spec else { continue };
                    let mut bitmap = CpuBitmap::empty(num_hw);
                    for hwthread in spec.expand(num_hw) {
                        bitmap.set(hwthread);
                    }
                    map.processes[proc_idx].cpu_bitmap = bitmap;
                }
            }
            BindingPolicy::None => unreachable!("filtered above"),
        }
    }

    Ok(())
}

/// Unions `pes` consecutive same-type objects starting at `start_logical`,
/// clamped to however many actually exist.
fn widen_bitmap(topo: &Topology, ty: ObjectType, start_logical: usize, pes: u32) -> CpuBitmap {
    let objects: Vec<&TopologyObject> = topo.objects_of_type(ty).collect();
    let end = (start_logical + pes as usize).min(objects.len());
    let mut bitmap = CpuBitmap::empty(topo.num_hwthreads());
    for obj in &objects[start_logical.min(objects.len())..end] {
        bitmap = bitmap.union(obj.cpuset());
    }
    bitmap
}

/// Diagnostic locality pairing between two processes' bitmaps, used by
/// display.
pub fn locality_between(topo: &Topology, a: &CpuBitmap, b: &CpuBitmap) -> crate::topology::Locality {
    topo.locality(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AppContext, Job, JobId, JobMap, Process};
    use crate::node::Node;
    use crate::policy::{BindingOptions, PolicyTuple};
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    #[test]
    fn binds_distinct_core_per_local_when_arity_sufficient() {
        let topo = Arc::new(SyntheticTopology::simple(1, 2, 1).build());
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::by_core());
        policy.binding = Some(BindingPolicy::Object(ObjectType::Core));
        policy.binding_options = BindingOptions::default();

        let mut map = JobMap::new(policy);
        map.processes.push(Process::unbound(0, "a"));
        map.processes.push(Process::unbound(0, "a"));
        map.processes[1].rank = 1;
        map.nodes = vec!["a".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
        job.map = Some(map);

        bind_job(&mut job, &pool).unwrap();
        let procs = &job.map.as_ref().unwrap().processes;
        assert!(!procs[0].cpu_bitmap.intersects(&procs[1].cpu_bitmap));
        assert!(procs[0].bound_to.is_some());
    }

    #[test]
    fn infeasible_binding_without_overload_errors() {
        let topo = Arc::new(SyntheticTopology::simple(1, 1, 1).build());
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo));

        let mut policy = PolicyTuple::default();
        policy.binding = Some(BindingPolicy::Object(ObjectType::Core));

        let mut map = JobMap::new(policy);
        map.processes.push(Process::unbound(0, "a"));
        map.processes.push(Process::unbound(0, "a"));
        map.nodes = vec!["a".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
        job.map = Some(map);

        assert!(bind_job(&mut job, &pool).is_err());
    }

    #[test]
    fn object_aligned_mapping_binds_to_the_mapped_object_even_when_locals_outnumber_it() {
        // 1 package per node, 4 cores per package, 4 local processes mapped
        // by-package: every process should bind to the whole package's
        // bitmap rather than error out for "locals exceed arity".
        let topo = Arc::new(SyntheticTopology::simple(1, 4, 1).build());
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo));

        let mut policy = PolicyTuple::default();
        policy.mapping = Some(MappingPolicy::by_package());
        policy.binding = Some(BindingPolicy::Object(ObjectType::Package));
        policy.binding_options = BindingOptions::default();

        let mut map = JobMap::new(policy);
        for _ in 0..4 {
            let mut p = Process::unbound(0, "a");
            p.mapped_object = Some(0);
            map.processes.push(p);
        }
        map.nodes = vec!["a".into()];

        let mut job = Job::new(JobId(1), vec![AppContext::new(4)]);
        job.map = Some(map);

        bind_job(&mut job, &pool).unwrap();
        let procs = &job.map.as_ref().unwrap().processes;
        assert_eq!(procs.len(), 4);
        for p in procs {
            assert!(p.is_bound());
            assert!(p.bound_to.is_some());
        }
        assert_eq!(procs[0].cpu_bitmap, procs[3].cpu_bitmap);
    }
}
