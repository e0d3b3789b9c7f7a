//! Pluggable mapping strategies.
//!
//! Design Notes: the source's dynamically-loaded mapper components become a
//! closed sum type, probed in priority order; `TAKE_NEXT_OPTION` becomes
//! [`MapOutcome::Declined`] rather than a sentinel return code.

mod by_node;
mod by_object;
mod by_slot;
mod by_user;
mod ppr;
mod sequential;

pub use by_node::ByNodeMapper;
pub use by_object::ByObjectMapper;
pub use by_slot::BySlotMapper;
pub use by_user::ByUserMapper;
pub use ppr::PprMapper;
pub use sequential::SequentialMapper;

use enum_dispatch::enum_dispatch;

use crate::error::PlannerError;
use crate::job::Job;
use crate::node::NodePool;
use crate::policy::PolicyTuple;

/// What a mapper did with the job it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    Claimed,
    Declined,
    ResourceBusy,
}

/// Shared state a mapper needs: the job being mapped (and the counts it
/// should place, since a `num_procs == 0` "fill" app is resolved to a
/// concrete count before mapping starts) plus the node pool it draws from.
pub struct MapContext<'a> {
    pub job: &'a mut Job,
    pub pool: &'a mut NodePool,
    /// Resolved per-app process counts, same length and order as
    /// `job.apps`.
    pub resolved_counts: Vec<u32>,
}

#[enum_dispatch]
pub trait MapStrategy {
    /// Does this strategy match the job's resolved mapping policy? The
    /// "requested mapper" shortcut bypasses this when exactly one
    /// mapper is installed.
    fn matches(&self, policy: &PolicyTuple) -> bool;

    /// Attempt to map the job. Mutates `cx.job.map` and `cx.pool` only when
    /// returning `Ok(MapOutcome::Claimed)`; a declined or resource-busy
    /// attempt must leave no partial state behind.
    fn map_job(&self, cx: &mut MapContext) -> Result<MapOutcome, PlannerError>;
}

#[enum_dispatch(MapStrategy)]
#[derive(Debug, Clone)]
pub enum Mapper {
    BySlot(BySlotMapper),
    ByNode(ByNodeMapper),
    ByObject(ByObjectMapper),
    Sequential(SequentialMapper),
    Ppr(PprMapper),
    ByUser(ByUserMapper),
}

/// The default priority order mappers are offered a job in, coarsest
/// granularity last so that more specific object-level strategies get first
/// refusal.
pub fn default_mapper_priority() -> Vec<Mapper> {
    use crate::topology::ObjectType;
    vec![
        Mapper::ByUser(ByUserMapper::default()),
        Mapper::Ppr(PprMapper),
        Mapper::Sequential(SequentialMapper),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::HwThread)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::Core)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::L1Cache)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::L2Cache)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::L3Cache)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::Numa)),
        Mapper::ByObject(ByObjectMapper::new(ObjectType::Package)),
        Mapper::ByNode(ByNodeMapper),
        Mapper::BySlot(BySlotMapper),
    ]
}
