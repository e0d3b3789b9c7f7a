//! End-to-end scenarios driven through `map_job`, mirroring the way the
//! teacher's own `tests/` crate exercises its storage stack against the
//! public API rather than internal module functions.

use std::sync::Arc;

use jobplan_core::{
    default_mapper_priority, map_job, parse_rankfile, AppContext, BindingPolicy, DriverContext,
    Job, JobId, JobMap, JobState, MappingPolicy, Node, NodePool, PlannerError, PolicyTuple,
    ProcessDefaults, RankingPolicy, SyntheticTopology,
};

fn topo(packages: usize, cores_per_package: usize, hwthreads_per_core: usize) -> Arc<jobplan_core::Topology> {
    Arc::new(SyntheticTopology::simple(packages, cores_per_package, hwthreads_per_core).build())
}

#[test]
fn two_procs_one_node_two_cores_defaults_to_by_core_binding() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 4, topo(1, 2, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();
    let mut cx = DriverContext {
        pool: &mut pool,
        defaults: &defaults,
        mappers: &mappers,
        is_driver_rank_zero: true,
    };

    let mut job = Job::new(JobId(1), vec![AppContext::new(2)]);
    job.attributes.fully_described = true;

    map_job(&mut job, None, None, &mut cx).unwrap();

    assert_eq!(job.state, JobState::MapComplete);
    let map = job.map.as_ref().unwrap();
    assert_eq!(map.policy.mapping, Some(MappingPolicy::by_core()));
    assert_eq!(map.policy.binding, Some(BindingPolicy::Object(jobplan_core::ObjectType::Core)));

    let mut ranks: Vec<u32> = map.processes.iter().map(|p| p.rank).collect();
    ranks.sort();
    assert_eq!(ranks, vec![0, 1]);

    assert!(!map.processes[0].cpu_bitmap.intersects(&map.processes[1].cpu_bitmap));
    assert!(map.processes.iter().all(|p| !p.cpu_bitmap.is_empty()));
}

#[test]
fn eight_procs_two_nodes_one_package_each_defaults_to_by_package_binding() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 4, topo(1, 4, 1)));
    pool.insert(Node::new("b", 4, topo(1, 4, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();
    let mut cx = DriverContext {
        pool: &mut pool,
        defaults: &defaults,
        mappers: &mappers,
        is_driver_rank_zero: true,
    };

    let mut job = Job::new(JobId(1), vec![AppContext::new(8)]);
    job.attributes.fully_described = true;

    map_job(&mut job, None, None, &mut cx).unwrap();

    let map = job.map.as_ref().unwrap();
    assert_eq!(map.policy.mapping, Some(MappingPolicy::by_package()));
    assert_eq!(map.policy.binding, Some(BindingPolicy::Object(jobplan_core::ObjectType::Package)));
    assert_eq!(map.processes.len(), 8);

    for node in ["a", "b"] {
        let on_node: Vec<_> = map.processes.iter().filter(|p| p.node == node).collect();
        assert_eq!(on_node.len(), 4);
        let mut ranks: Vec<u32> = on_node.iter().map(|p| p.rank).collect();
        ranks.sort();
        let expected = if node == "a" {
            vec![0, 1, 2, 3]
        } else {
            vec![4, 5, 6, 7]
        };
        assert_eq!(ranks, expected);

        // Every process on this node's lone package shares the same bitmap:
        // the whole package's hardware threads.
        let first_bitmap = &on_node[0].cpu_bitmap;
        assert!(on_node.iter().all(|p| &p.cpu_bitmap == first_bitmap));
        assert!(!first_bitmap.is_empty());
    }
}

#[test]
fn ppr_two_per_package_on_two_nodes_two_packages_each() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 8, topo(2, 2, 1)));
    pool.insert(Node::new("b", 8, topo(2, 2, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();
    let mut cx = DriverContext {
        pool: &mut pool,
        defaults: &defaults,
        mappers: &mappers,
        is_driver_rank_zero: true,
    };

    let mut policy = PolicyTuple::default();
    policy.mapping = Some(MappingPolicy::Ppr(
        jobplan_core::PprPattern::parse("2:package").unwrap(),
    ));
    let mut job = Job::new(JobId(1), vec![AppContext::new(8)]);
    job.map = Some(JobMap::new(policy));

    map_job(&mut job, None, None, &mut cx).unwrap();

    let map = job.map.as_ref().unwrap();
    assert_eq!(map.num_procs, 8);
    for node in ["a", "b"] {
        let on_node = map.processes.iter().filter(|p| p.node == node).count();
        assert_eq!(on_node, 4);
    }
}

#[test]
fn oversubscribe_refused_leaves_no_partial_state() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 4, topo(1, 4, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();
    let mut cx = DriverContext {
        pool: &mut pool,
        defaults: &defaults,
        mappers: &mappers,
        is_driver_rank_zero: true,
    };

    let mut job = Job::new(JobId(1), vec![AppContext::new(5)]);
    let err = map_job(&mut job, None, None, &mut cx).unwrap_err();

    assert_eq!(err.kind(), "RESOURCE_BUSY");
    assert!(matches!(err, PlannerError::ResourceBusy { .. }));
    assert_eq!(job.state, JobState::MapFailed);
    assert!(job.exit_code.is_some());

    assert_eq!(cx.pool.get("a").unwrap().slots_in_use(), 0);
}

#[test]
fn rankfile_places_exactly_as_given() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 4, topo(1, 2, 1)));
    pool.insert(Node::new("b", 4, topo(1, 2, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();
    let mut cx = DriverContext {
        pool: &mut pool,
        defaults: &defaults,
        mappers: &mappers,
        is_driver_rank_zero: true,
    };

    let entries =
        parse_rankfile("rank 0=a slot=0\nrank 1=a slot=1\nrank 2=b slot=0\n").unwrap();

    let mut policy = PolicyTuple::default();
    policy.mapping = Some(MappingPolicy::ByUser);
    let mut job = Job::new(JobId(1), vec![AppContext::new(3)]);
    job.map = Some(JobMap::new(policy));
    job.rankfile = Some(entries);

    map_job(&mut job, None, None, &mut cx).unwrap();

    let map = job.map.as_ref().unwrap();
    let ranks: Vec<u32> = map.processes.iter().map(|p| p.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2]);
    assert_eq!(map.processes[2].node, "b");
    assert!(map.processes.iter().all(|p| !p.cpu_bitmap.is_empty()));
}

#[test]
fn child_inherits_parent_policy_and_continues_from_parent_bookmark() {
    let mut pool = NodePool::new();
    pool.insert(Node::new("a", 4, topo(1, 1, 1)));
    pool.insert(Node::new("b", 4, topo(1, 1, 1)));

    let defaults = ProcessDefaults::default();
    let mappers = default_mapper_priority();

    let mut parent_policy = PolicyTuple::default();
    parent_policy.mapping = Some(MappingPolicy::ByNode);
    parent_policy.ranking = Some(RankingPolicy::BySlot);
    parent_policy.directives.given = true;
    let mut parent_map = JobMap::new(parent_policy);
    parent_map.bookmark = Some("a".to_string());
    let mut parent = Job::new(JobId(1), vec![]);
    parent.map = Some(parent_map);
    parent.state = JobState::MapComplete;

    let mut child = Job::new(JobId(2), vec![AppContext::new(2)]);
    child.launch_proxy = Some(parent.id);

    {
        let mut cx = DriverContext {
            pool: &mut pool,
            defaults: &defaults,
            mappers: &mappers,
            is_driver_rank_zero: true,
        };
        map_job(&mut child, Some(&parent), None, &mut cx).unwrap();
    }

    let map = child.map.as_ref().unwrap();
    assert_eq!(map.policy.mapping, Some(MappingPolicy::ByNode));
    assert_eq!(map.policy.ranking, Some(RankingPolicy::BySlot));

    let rank0 = map.processes.iter().find(|p| p.rank == 0).unwrap();
    assert_eq!(rank0.node, "b");
}
