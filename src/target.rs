//! Target selection: which nodes a given app may use, and how many
//! processes a job is estimated to need before mapping runs.

use crate::error::PlannerError;
use crate::job::AppContext;
use crate::node::NodePool;
use crate::policy::{MappingPolicy, PolicyTuple, PprUnit};
use crate::topology::ObjectType;

/// An explicit host filter an app may carry (hostfile / `--host` /
/// `--dash-host`).
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub hosts: Vec<String>,
    /// Preserve `hosts`' order rather than falling back to stable name
    /// order.
    pub ordered: bool,
}

/// Builds the ordered list of usable node names an app may be mapped onto.
pub fn select_targets(
    app_index: usize,
    pool: &NodePool,
    policy: &PolicyTuple,
    host_filter: Option<&HostFilter>,
    bookmark: Option<&str>,
) -> Result<Vec<String>, PlannerError> {
    let mut names: Vec<String> = pool
        .iter()
        .filter(|n| n.is_usable())
        .filter(|n| !policy.directives.no_oversubscribe || !n.is_at_capacity(false))
        .filter(|n| !(policy.directives.no_use_local && is_head_node(n.name())))
        .map(|n| n.name().to_string())
        .collect();

    if let Some(filter) = host_filter {
        if !filter.hosts.is_empty() {
            if filter.ordered {
                names = filter
                    .hosts
                    .iter()
                    .filter(|h| names.contains(h))
                    .cloned()
                    .collect();
            } else {
                names.retain(|n| filter.hosts.contains(n));
                names.sort();
            }
        } else {
            names.sort();
        }
    } else {
        names.sort();
    }

    if let Some(mark) = bookmark {
        if let Some(pos) = names.iter().position(|n| n == mark) {
            names.rotate_left(pos + 1);
        }
    }

    if names.is_empty() {
        return Err(PlannerError::NoTargets { app_index });
    }
    Ok(names)
}

fn is_head_node(name: &str) -> bool {
    // The head node is conventionally the first node registered; callers
    // needing a different convention should filter via `HostFilter` instead.
    name == "localhost" || name == "head"
}

/// Estimates the total process count across all apps in a job. Apps
/// requesting `num_procs == 0` ("fill") contribute an estimate derived from
/// their target node list and the job's mapping policy.
pub fn estimate_nprocs(
    apps: &[AppContext],
    pool: &NodePool,
    policy: &PolicyTuple,
) -> Result<u32, PlannerError> {
    let mut total = 0u32;
    for (idx, app) in apps.iter().enumerate() {
        if app.num_procs != 0 {
            total += app.num_procs;
            continue;
        }
        let targets = select_targets(idx, pool, policy, None, None)?;
        let estimate = match &policy.mapping {
            Some(MappingPolicy::Ppr(pattern)) => match pattern.unit {
                PprUnit::Node => pattern.count * targets.len() as u32,
                PprUnit::Package => targets
                    .iter()
                    .filter_map(|name| pool.get(name))
                    .filter_map(|n| n.topology())
                    .map(|t| pattern.count * t.count_by_type(ObjectType::Package) as u32)
                    .sum(),
            },
            Some(MappingPolicy::Sequential) => targets.len() as u32,
            _ => targets
                .iter()
                .filter_map(|name| pool.get(name))
                .map(|n| n.slots_total())
                .sum(),
        };
        total += estimate;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::topology::SyntheticTopology;
    use std::sync::Arc;

    fn topo() -> Arc<crate::topology::Topology> {
        Arc::new(SyntheticTopology::simple(1, 2, 1).build())
    }

    #[test]
    fn select_targets_excludes_full_nodes_without_oversubscribe() {
        let mut pool = NodePool::new();
        let mut full = Node::new("a", 2, topo());
        full.reserve(2, false).unwrap();
        pool.insert(full);
        pool.insert(Node::new("b", 2, topo()));

        // Exercise the realistic resolved default (`no_oversubscribe ==
        // true`, per `ProcessDefaults::default()`), not the struct-derive
        // default, since that's the value every job actually sees post
        // `apply_inheritance`.
        let mut policy = PolicyTuple::default();
        policy.directives.no_oversubscribe = true;
        let targets = select_targets(0, &pool, &policy, None, None).unwrap();
        assert_eq!(targets, vec!["b".to_string()]);
    }

    #[test]
    fn bookmark_continues_after_last_visited() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 2, topo()));
        pool.insert(Node::new("b", 2, topo()));
        pool.insert(Node::new("c", 2, topo()));
        let policy = PolicyTuple::default();
        let targets = select_targets(0, &pool, &policy, None, Some("a")).unwrap();
        assert_eq!(targets, vec!["b".to_string(), "c".to_string()]);
    }
}
