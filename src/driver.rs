//! The planner driver: the state machine that sequences resolution,
//! mapping, ranking, and binding for a single job.
//!
//! Policy resolution and nprocs estimation happen before any mapper is
//! tried; a single installed mapper is offered the job first regardless of
//! its declared policy ("requested mapper"); oversubscription silently
//! clears an un-requested binding policy; and the global process-count
//! offset is only advanced once mapping fully succeeds.

use log::{debug, error, trace, warn};

use crate::binder;
use crate::counters;
use crate::display;
use crate::error::PlannerError;
use crate::job::{Job, JobMap, JobState};
use crate::mappers::{MapContext, MapOutcome, MapStrategy, Mapper};
use crate::node::NodePool;
use crate::policy::{self, PolicyTuple, ProcessDefaults};
use crate::ranker;
use crate::target;
use crate::topology::ObjectType;

/// Everything the driver needs that isn't carried on the job itself.
pub struct DriverContext<'a> {
    pub pool: &'a mut NodePool,
    pub defaults: &'a ProcessDefaults,
    pub mappers: &'a [Mapper],
    /// Only the driver instance holding rank 0 emits display output.
    pub is_driver_rank_zero: bool,
}

/// Runs one job through `INIT -> MAP -> MAP_COMPLETE|MAP_FAILED -> CLEANUP`.
///
/// `parent` is the job named by `job.launch_proxy`, if any, already looked
/// up by the caller (this core has no job registry of its own). On success
/// returns the display string, if one was requested and this driver holds
/// rank 0. On failure `job.state == MapFailed` and `job.exit_code` is set;
/// the map, if any, is left in place for diagnostics but must not be acted
/// on by the launcher.
pub fn map_job(
    job: &mut Job,
    parent: Option<&Job>,
    mut originator: Option<&mut Job>,
    cx: &mut DriverContext,
) -> Result<Option<String>, PlannerError> {
    job.state = JobState::Map;
    trace!("job {:?} entering MAP", job.id);

    if let Err(e) = check_cancelled(job) {
        return Err(fail(job, cx.pool, e));
    }

    let inherit = policy::should_inherit(job);
    let parent_is_tool = parent.map_or(false, |p| p.attributes.tool);

    let map_is_fresh = job.map.is_none();
    if map_is_fresh {
        job.map = Some(JobMap::new(PolicyTuple::default()));
    }

    // A freshly created map starts its bookmark where the launch_proxy
    // parent's left off, so the first mapper visited continues placing
    // processes after the parent's last-used node instead of restarting
    // from the front of the node list.
    if map_is_fresh && inherit && !parent_is_tool {
        if let Some(parent_bookmark) = parent.and_then(|p| p.map.as_ref()).and_then(|m| m.bookmark.clone()) {
            job.map.as_mut().unwrap().bookmark = Some(parent_bookmark);
        }
    }

    let requested = job.map.as_ref().unwrap().policy.clone();
    let partial = policy::apply_inheritance(&requested, parent, cx.defaults, inherit, parent_is_tool);
    job.map.as_mut().unwrap().policy = partial;

    let any_package_present = cx
        .pool
        .iter()
        .any(|n| n.topology().map_or(false, |t| t.count_by_type(ObjectType::Package) > 0));

    let nprocs_hint = match target::estimate_nprocs(&job.apps, cx.pool, &job.map.as_ref().unwrap().policy) {
        Ok(n) => n,
        Err(e) => return Err(fail(job, cx.pool, e)),
    };

    let resolved = policy::apply_defaults(
        &job.map.as_ref().unwrap().policy,
        cx.defaults,
        nprocs_hint,
        any_package_present,
    );
    job.map.as_mut().unwrap().policy = resolved;
    debug!(
        "job {:?} resolved policy: mapping={:?} ranking={:?} binding={:?} nprocs_hint={nprocs_hint}",
        job.id,
        job.map.as_ref().unwrap().policy.mapping,
        job.map.as_ref().unwrap().policy.ranking,
        job.map.as_ref().unwrap().policy.binding,
    );

    if let Err(e) = check_cancelled(job) {
        return Err(fail(job, cx.pool, e));
    }

    if job.attributes.do_not_launch {
        if let Err(e) = cx.pool.fill_missing_topologies_from_first() {
            return Err(fail(job, cx.pool, e));
        }
    }

    // Resolve per-app counts ("fill" apps get their share of the estimate).
    let resolved_counts = resolve_app_counts(job, cx.pool)?;

    let outcome = run_mappers(job, cx.pool, resolved_counts, cx.mappers);
    match outcome {
        Ok(MapOutcome::Claimed) => {}
        Ok(MapOutcome::ResourceBusy) => {
            warn!("job {:?}: cannot launch, resource busy", job.id);
            return Err(fail(
                job,
                cx.pool,
                PlannerError::ResourceBusy {
                    node: "<unspecified>".into(),
                },
            ));
        }
        Ok(MapOutcome::Declined) => {
            return Err(fail(
                job,
                cx.pool,
                PlannerError::MappingFailed("no installed mapper claimed the job".into()),
            ));
        }
        Err(e) => return Err(fail(job, cx.pool, e)),
    }

    let map = job.map.as_ref().unwrap();
    if map.processes.is_empty() || map.nodes.is_empty() {
        return Err(fail(
            job,
            cx.pool,
            PlannerError::MappingFailed("mapping produced zero procs or zero nodes".into()),
        ));
    }

    finalize_counts(job);
    detect_oversubscription(job, cx.pool);

    if let Err(e) = check_cancelled(job) {
        return Err(fail(job, cx.pool, e));
    }

    if let Err(e) = ranker::rank_job(job, cx.pool) {
        return Err(fail(job, cx.pool, e));
    }

    let should_bind = job.attributes.display_map
        || job.attributes.display_devel_map
        || job.attributes.display_diff
        || job.attributes.fully_described;
    if should_bind {
        if let Err(e) = binder::bind_job(job, cx.pool) {
            return Err(fail(job, cx.pool, e));
        }
    }

    let offset = counters::advance_total_procs(job.map.as_ref().unwrap().num_procs);
    trace!("job {:?} total-procs offset = {offset}", job.id);

    if let Some(originator) = originator.as_deref_mut() {
        if let (Some(bookmark), Some(orig_map)) = (
            job.map.as_ref().and_then(|m| m.bookmark.clone()),
            originator.map.as_mut(),
        ) {
            orig_map.bookmark = Some(bookmark);
        }
    }

    let rendered = display::emit_display(job, cx.pool, cx.is_driver_rank_zero);

    job.state = JobState::MapComplete;
    cleanup(job, cx.pool);

    Ok(rendered)
}

fn check_cancelled(job: &Job) -> Result<(), PlannerError> {
    if job.attributes.cancelled {
        Err(PlannerError::Cancelled)
    } else {
        Ok(())
    }
}

fn fail(job: &mut Job, pool: &mut NodePool, e: PlannerError) -> PlannerError {
    error!("job {:?} failed mapping: {} ({})", job.id, e, e.kind());
    job.state = JobState::MapFailed;
    job.exit_code = Some(e.clone());
    cleanup(job, pool);
    e
}

fn cleanup(job: &Job, pool: &mut NodePool) {
    if let Some(map) = &job.map {
        for name in &map.nodes {
            if let Some(node) = pool.get_mut(name) {
                node.clear_mapped_flag();
            }
        }
    }
}

/// Resolves each app's `num_procs == 0` ("fill") request to a concrete
/// count using the same per-app target estimation the overall `nprocs`
/// estimate draws on.
fn resolve_app_counts(job: &Job, pool: &NodePool) -> Result<Vec<u32>, PlannerError> {
    let policy = &job.map.as_ref().unwrap().policy;
    let mut counts = Vec::with_capacity(job.apps.len());
    for (idx, app) in job.apps.iter().enumerate() {
        if app.num_procs != 0 {
            counts.push(app.num_procs);
            continue;
        }
        let single = std::slice::from_ref(app);
        let estimate = target::estimate_nprocs(single, pool, policy)?;
        let _ = idx;
        counts.push(estimate);
    }
    Ok(counts)
}

fn run_mappers(
    job: &mut Job,
    pool: &mut NodePool,
    resolved_counts: Vec<u32>,
    mappers: &[Mapper],
) -> Result<MapOutcome, PlannerError> {
    let mut cx = MapContext {
        job,
        pool,
        resolved_counts,
    };

    // "Requested mapper" shortcut: if exactly one mapper is
    // installed, it gets the first attempt regardless of the resolved
    // policy.
    if mappers.len() == 1 {
        return mappers[0].map_job(&mut cx);
    }

    for mapper in mappers {
        match mapper.map_job(&mut cx)? {
            MapOutcome::Declined => continue,
            other => return Ok(other),
        }
    }
    Ok(MapOutcome::Declined)
}

fn finalize_counts(job: &mut Job) {
    let Some(map) = job.map.as_mut() else { return };
    map.num_procs = map.processes.len() as u32;
    map.num_nodes = map.nodes.len() as u32;
}

/// Sets the map's `OVERSUBSCRIBED` flag if any touched node ended up over
/// its slot count, and — unless binding was explicitly requested — clears
/// binding to `None` for safety.
fn detect_oversubscription(job: &mut Job, pool: &NodePool) {
    let Some(map) = job.map.as_mut() else { return };
    let oversubscribed = map.nodes.iter().any(|n| pool.get(n).map_or(false, |n| n.is_oversubscribed()));
    map.oversubscribed = oversubscribed;
    if oversubscribed && !map.policy.directives.binding_given {
        map.policy.binding = Some(crate::policy::BindingPolicy::None);
    }
}
