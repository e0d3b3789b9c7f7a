//! Policy-driven job-to-node mapping, ranking, and CPU binding planner.
//!
//! Given a [`job::Job`] (one or more [`job::AppContext`]s) and a
//! [`node::NodePool`] describing the available nodes and their
//! [`topology::Topology`], [`driver::map_job`] resolves the job's mapping,
//! ranking, and binding policy, assigns every process to a node with a
//! global rank and a CPU bitmap, and reports the outcome as
//! `job.state == MapComplete` or `MapFailed`.

pub mod binder;
pub mod config;
pub mod counters;
pub mod display;
pub mod driver;
pub mod error;
pub mod job;
pub mod mappers;
pub mod node;
pub mod policy;
pub mod ranker;
pub mod rankfile;
pub mod target;
pub mod topology;

pub use driver::{map_job, DriverContext};
pub use error::PlannerError;
pub use job::{AppContext, AttributeBag, Job, JobId, JobMap, JobState, Process};
pub use mappers::{default_mapper_priority, Mapper};
pub use node::{Node, NodeFlags, NodePool};
pub use policy::{
    BindingOptions, BindingPolicy, MappingDirectives, MappingPolicy, PolicyTuple, PprPattern,
    PprUnit, ProcessDefaults, RankingPolicy,
};
pub use rankfile::{parse_rankfile, RankfileEntry, SlotSpec};
pub use target::HostFilter;
pub use topology::{CpuBitmap, Locality, ObjectType, SyntheticTopology, Topology};

/// Installs an [`env_logger`] subscriber reading `RUST_LOG`. Intended for
/// binaries embedding this planner; library consumers with their own `log`
/// subscriber should not call this.
#[cfg(feature = "init_env_logger")]
pub fn init_env_logger() {
    let _ = env_logger::Builder::from_default_env().try_init();
}
