//! Jobs, application contexts, and the map each job owns.

mod process;

pub use process::Process;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::PlannerError;
use crate::policy::PolicyTuple;
use crate::rankfile::RankfileEntry;

/// Lifecycle state of a job as it moves through the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Init,
    Map,
    MapComplete,
    MapFailed,
    Cleanup,
}

/// Attributes the orchestrator may set on a job or app, plus a side-table
/// for anything this core doesn't model directly.
///
/// Design Notes: the source's string-keyed heterogeneous attribute list is
/// re-expressed as a typed record for the fields the planner actually reads;
/// everything else an external collaborator attaches rides along in `extra`
/// rather than being dropped.
#[derive(Debug, Clone, Default)]
pub struct AttributeBag {
    pub do_not_launch: bool,
    pub display_map: bool,
    pub display_devel_map: bool,
    pub display_diff: bool,
    pub fully_described: bool,
    pub cancelled: bool,
    /// `Some(true)` = explicit INHERIT, `Some(false)` = explicit
    /// NO_INHERIT, `None` = unspecified (default: inherit).
    pub inherit: Option<bool>,
    /// The job is a bare tool connection; treated as having no inheritable
    /// policy of its own.
    pub tool: bool,
    extra: JsonMap<String, JsonValue>,
}

impl AttributeBag {
    pub fn get_extra(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: JsonValue) {
        self.extra.insert(key.into(), value);
    }
}

/// One application within a job.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Requested process count; 0 means "fill available slots".
    pub num_procs: u32,
    pub executable: Option<String>,
    pub prefix: Option<String>,
    pub cwd: Option<String>,
    /// Assigned by the ranker: the first global rank this app occupies.
    pub first_rank: u32,
    pub attributes: AttributeBag,
}

impl AppContext {
    pub fn new(num_procs: u32) -> Self {
        AppContext {
            num_procs,
            executable: None,
            prefix: None,
            cwd: None,
            first_rank: 0,
            attributes: AttributeBag::default(),
        }
    }
}

/// The mapping result owned by a job: resolved policy, nodes touched,
/// bookmark, and the placed processes.
#[derive(Debug, Clone)]
pub struct JobMap {
    pub policy: PolicyTuple,
    /// Nodes actually used, in the order they were first touched.
    pub nodes: Vec<String>,
    /// Last node visited by a mapper; subsequent apps or dynamic spawns
    /// continue from here.
    pub bookmark: Option<String>,
    pub num_procs: u32,
    pub num_nodes: u32,
    pub num_local_procs: u32,
    pub oversubscribed: bool,
    pub processes: Vec<Process>,
}

impl JobMap {
    pub fn new(policy: PolicyTuple) -> Self {
        JobMap {
            policy,
            nodes: Vec::new(),
            bookmark: None,
            num_procs: 0,
            num_nodes: 0,
            num_local_procs: 0,
            oversubscribed: false,
            processes: Vec::new(),
        }
    }

    pub fn touch_node(&mut self, name: &str) {
        if !self.nodes.iter().any(|n| n == name) {
            self.nodes.push(name.to_string());
        }
        self.bookmark = Some(name.to_string());
    }
}

/// An identifier for a job, unique within the orchestrator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// A job: one or more app contexts sharing a single mapping/ranking/binding
/// pass.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub apps: Vec<AppContext>,
    pub state: JobState,
    pub personality: Option<String>,
    /// Parent job this one should inherit policy from, if any.
    pub launch_proxy: Option<JobId>,
    /// For dynamic spawns: the job whose bookmark should be advanced when
    /// this one finishes mapping.
    pub originator: Option<JobId>,
    pub map: Option<JobMap>,
    pub exit_code: Option<PlannerError>,
    pub attributes: AttributeBag,
    /// Explicit rank->host/slot assignments, present only for `ByUser`
    /// mapping.
    pub rankfile: Option<Vec<RankfileEntry>>,
}

impl Job {
    pub fn new(id: JobId, apps: Vec<AppContext>) -> Self {
        Job {
            id,
            apps,
            state: JobState::Init,
            personality: None,
            launch_proxy: None,
            originator: None,
            map: None,
            exit_code: None,
            attributes: AttributeBag::default(),
            rankfile: None,
        }
    }

    pub fn num_procs(&self) -> u32 {
        self.map.as_ref().map_or(0, |m| m.num_procs)
    }

    pub fn num_local_procs(&self) -> u32 {
        self.map.as_ref().map_or(0, |m| m.num_local_procs)
    }

    /// Invariant check for `state >= MAP_COMPLETE`: process count and node
    /// count must match the map's bookkeeping.
    pub fn is_map_consistent(&self) -> bool {
        match &self.map {
            Some(m) => {
                m.num_procs as usize == m.processes.len()
                    && m.num_nodes as usize == m.nodes.len()
            }
            None => true,
        }
    }
}
