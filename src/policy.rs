//! The mapping/ranking/binding policy tuple and its resolution.
//!
//! The source system expressed directives as bitfields tested with masks;
//! here each directive is its own named field (Design Notes: "bitfield
//! directives -> explicit struct of booleans + enum").

use log::trace;

use crate::error::PlannerError;
use crate::job::Job;
use crate::rankfile::SlotSpec;
use crate::topology::ObjectType;

/// Which resource a PPR pattern counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PprUnit {
    Node,
    Package,
}

/// A parsed "processes per resource" pattern, e.g. `2:package`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PprPattern {
    pub count: u32,
    pub unit: PprUnit,
}

impl PprPattern {
    /// Parses `N:node` or `N:package`, case-insensitive on the unit keyword.
    /// Mirrors the source's `strcasestr(tmp, "node"|"package")` +
    /// `strtoul` pairing rather than a strict grammar.
    pub fn parse(s: &str) -> Result<PprPattern, PlannerError> {
        let (count_str, rest) = s
            .split_once(':')
            .ok_or_else(|| PlannerError::BadParam(format!("malformed PPR string: {s}")))?;
        let count: u32 = count_str
            .trim()
            .parse()
            .map_err(|_| PlannerError::BadParam(format!("malformed PPR count: {count_str}")))?;
        let lower = rest.trim().to_ascii_lowercase();
        let unit = if lower.contains("package") {
            PprUnit::Package
        } else if lower.contains("node") {
            PprUnit::Node
        } else {
            return Err(PlannerError::BadParam(format!(
                "unrecognized PPR unit: {rest}"
            )));
        };
        Ok(PprPattern { count, unit })
    }
}

/// How processes are assigned to nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingPolicy {
    BySlot,
    ByNode,
    ByObject(ObjectType),
    ByUser,
    Sequential,
    Ppr(PprPattern),
}

impl MappingPolicy {
    pub fn by_hwthread() -> Self {
        MappingPolicy::ByObject(ObjectType::HwThread)
    }
    pub fn by_core() -> Self {
        MappingPolicy::ByObject(ObjectType::Core)
    }
    pub fn by_package() -> Self {
        MappingPolicy::ByObject(ObjectType::Package)
    }
}

/// How global/local/node ranks are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingPolicy {
    BySlot,
    ByNode,
    ByObject(ObjectType),
}

/// What a process is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingPolicy {
    None,
    Object(ObjectType),
    CpuList(Vec<SlotSpec>),
}

/// Qualifier bits riding alongside a [`BindingPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingOptions {
    /// Multiple locals may share the same CPU set when the object's arity
    /// is smaller than the number of locals.
    pub allow_overload: bool,
    /// Downgrade `BINDING_INFEASIBLE` to a silent fall-through to `None`.
    pub if_supported: bool,
    /// An explicit `CpuList` is positional rather than round-robin.
    pub ordered: bool,
}

/// Directive bits recorded alongside the mapping policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingDirectives {
    /// The user (or an ancestor job) explicitly set the mapping policy.
    pub given: bool,
    /// The user explicitly set a binding policy (as opposed to it being
    /// filled in by the defaulting ladder). Consulted by the driver when
    /// an oversubscribed map needs to force binding off for safety:
    /// a policy the user asked for is left alone even when oversubscribed.
    pub binding_given: bool,
    pub subscribe_given: bool,
    pub no_oversubscribe: bool,
    pub no_use_local: bool,
    pub local_given: bool,
}

/// The fully (or partially, mid-resolution) specified policy tuple.
#[derive(Debug, Clone, Default)]
pub struct PolicyTuple {
    pub mapping: Option<MappingPolicy>,
    pub ranking: Option<RankingPolicy>,
    pub binding: Option<BindingPolicy>,
    pub binding_options: BindingOptions,
    pub directives: MappingDirectives,
    /// Processing elements per process; `None` means 1.
    pub pes_per_proc: Option<u32>,
    /// CPU designation: bind/step by hardware thread rather than core.
    pub use_hwthreads: bool,
}

/// Process-wide defaults consulted when a job has no parent to inherit
/// from, or a field remains unset after inheritance.
#[derive(Debug, Clone)]
pub struct ProcessDefaults {
    pub no_oversubscribe: bool,
    pub no_use_local: bool,
    pub allow_overload: bool,
    /// True when daemons are launched on the head node, forcing
    /// `NO_USE_LOCAL` regardless of job or parent state.
    pub daemons_on_head_node: bool,
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        ProcessDefaults {
            no_oversubscribe: true,
            no_use_local: false,
            allow_overload: false,
            daemons_on_head_node: false,
        }
    }
}

/// Resolves a job's policy tuple from its own partial request, an optional
/// parent (`launch_proxy`), and process-wide defaults.
///
/// `nprocs_hint` is the estimated process count used by the defaulting
/// ladders; callers compute it via [`crate::target::estimate_nprocs`]
/// before calling this, since the ladder itself needs to know whether any
/// package is present on the candidate nodes.
pub fn resolve_policy(
    requested: &PolicyTuple,
    parent: Option<&Job>,
    defaults: &ProcessDefaults,
    inherit: bool,
    parent_is_tool: bool,
    nprocs_hint: u32,
    any_package_present: bool,
) -> PolicyTuple {
    let tuple = apply_inheritance(requested, parent, defaults, inherit, parent_is_tool);
    apply_defaults(&tuple, defaults, nprocs_hint, any_package_present)
}

/// Stage one of resolution: copy down from the parent (or process-wide
/// defaults) anything the job didn't request explicitly. Leaves `mapping`,
/// `ranking`, and `binding` as `None` when neither the job nor its parent
/// specified them — the final defaulting ladder needs to know the
/// estimated process count, which in turn may depend on this
/// still-partial mapping policy (PPR/Sequential estimation
/// branches), so the two stages cannot be collapsed into one call without
/// also collapsing that ordering dependency.
pub fn apply_inheritance(
    requested: &PolicyTuple,
    parent: Option<&Job>,
    defaults: &ProcessDefaults,
    inherit: bool,
    parent_is_tool: bool,
) -> PolicyTuple {
    let mut tuple = requested.clone();

    let parent_tuple = parent
        .filter(|_| inherit && !parent_is_tool)
        .and_then(|p| p.map.as_ref())
        .map(|m| &m.policy);

    if let Some(parent_tuple) = parent_tuple {
        if tuple.mapping.is_none() {
            tuple.mapping = parent_tuple.mapping.clone();
        }
        if tuple.ranking.is_none() {
            tuple.ranking = parent_tuple.ranking;
        }
        if tuple.binding.is_none() {
            tuple.binding = parent_tuple.binding.clone();
        }
        if tuple.pes_per_proc.is_none() {
            tuple.pes_per_proc = parent_tuple.pes_per_proc;
        }
        if !tuple.use_hwthreads {
            tuple.use_hwthreads = parent_tuple.use_hwthreads;
        }
    }

    // Oversubscribe directive: inherit from parent, else process default.
    if !tuple.directives.subscribe_given {
        if let Some(parent_tuple) = parent_tuple {
            tuple.directives.no_oversubscribe = parent_tuple.directives.no_oversubscribe;
        } else {
            tuple.directives.no_oversubscribe = defaults.no_oversubscribe;
        }
    }

    // No-use-local: a global "daemons on head node" policy always wins.
    if defaults.daemons_on_head_node {
        tuple.directives.no_use_local = true;
    } else if !tuple.directives.local_given {
        if let Some(parent_tuple) = parent_tuple {
            tuple.directives.no_use_local = parent_tuple.directives.no_use_local;
        } else {
            tuple.directives.no_use_local = defaults.no_use_local;
        }
    }

    tuple
}

/// Stage two of resolution: fill in whatever `mapping`/`ranking`/`binding`
/// inheritance left unset, now that `nprocs_hint` is known.
pub fn apply_defaults(
    tuple: &PolicyTuple,
    defaults: &ProcessDefaults,
    nprocs_hint: u32,
    any_package_present: bool,
) -> PolicyTuple {
    let mut tuple = tuple.clone();

    if tuple.mapping.is_none() {
        tuple.mapping = Some(default_mapping(
            nprocs_hint,
            tuple.pes_per_proc,
            tuple.use_hwthreads,
            any_package_present,
        ));
    }

    if tuple.ranking.is_none() {
        tuple.ranking = Some(RankingPolicy::BySlot);
    }

    if tuple.binding.is_none() {
        tuple.binding = Some(default_binding(&tuple, nprocs_hint, any_package_present));
    }

    if defaults.allow_overload {
        tuple.binding_options.allow_overload = true;
    }

    tuple
}

fn default_mapping(
    nprocs: u32,
    pes_per_proc: Option<u32>,
    use_hwthreads: bool,
    any_package_present: bool,
) -> MappingPolicy {
    if nprocs <= 2 {
        if pes_per_proc.map_or(false, |p| p > 1) {
            trace!("mapping not given, nprocs={nprocs} <= 2 with pes_per_proc>1 — using byslot");
            MappingPolicy::BySlot
        } else if use_hwthreads {
            trace!("mapping not given, nprocs={nprocs} <= 2, use_hwthreads — using byhwthread");
            MappingPolicy::by_hwthread()
        } else {
            trace!("mapping not given, nprocs={nprocs} <= 2 — using bycore");
            MappingPolicy::by_core()
        }
    } else if any_package_present {
        trace!("mapping not given, nprocs={nprocs} > 2, package present — using bypackage");
        MappingPolicy::by_package()
    } else {
        trace!("mapping not given, nprocs={nprocs} > 2, no package — using byslot");
        MappingPolicy::BySlot
    }
}

fn default_binding(
    tuple: &PolicyTuple,
    nprocs: u32,
    any_package_present: bool,
) -> BindingPolicy {
    if tuple.pes_per_proc.map_or(false, |p| p > 1) {
        trace!("binding not given, pes_per_proc>1 — binding to CPU designation");
        return if tuple.use_hwthreads {
            BindingPolicy::Object(ObjectType::HwThread)
        } else {
            BindingPolicy::Object(ObjectType::Core)
        };
    }
    if let Some(MappingPolicy::ByObject(ty)) = tuple.mapping {
        trace!("binding not given — following mapping granularity {ty}");
        return BindingPolicy::Object(ty);
    }
    match default_mapping(nprocs, tuple.pes_per_proc, tuple.use_hwthreads, any_package_present) {
        MappingPolicy::ByObject(ty) => BindingPolicy::Object(ty),
        _ => {
            trace!("binding not given, mapping defaults to a non-object granularity — using none");
            BindingPolicy::None
        }
    }
}

/// Whether a job inherits from its `launch_proxy`: unless the job
/// explicitly requests `NO_INHERIT`, and the parent isn't a bare tool.
pub fn should_inherit(job: &Job) -> bool {
    job.attributes.inherit != Some(false)
}
