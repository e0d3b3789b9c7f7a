//! A single placed process.

use crate::topology::{CpuBitmap, ObjectId};

/// One process of a mapped job.
///
/// Created by a mapper with `node` and `app_index` set; annotated by the
/// ranker (`rank`, `local_rank`, `node_rank`) and the binder (`cpu_bitmap`,
/// `bound_to`). Destroyed with its job.
#[derive(Debug, Clone)]
pub struct Process {
    /// Global rank, unique within the job.
    pub rank: u32,
    pub app_index: usize,
    /// Unique within (job, node).
    pub local_rank: u32,
    /// Unique within a node, across all jobs visible there.
    pub node_rank: u32,
    pub node: String,
    /// The logical index (within its type, on this process's node) of the
    /// topology object an object-granularity mapper placed this process on.
    /// `None` for mappers that don't map at object granularity (by-slot,
    /// by-node, sequential, by-user).
    pub mapped_object: Option<usize>,
    pub cpu_bitmap: CpuBitmap,
    /// Set only when the binding matches a topology object exactly.
    pub bound_to: Option<ObjectId>,
}

impl Process {
    pub fn unbound(app_index: usize, node: impl Into<String>) -> Self {
        Process {
            rank: 0,
            app_index,
            local_rank: 0,
            node_rank: 0,
            node: node.into(),
            mapped_object: None,
            cpu_bitmap: CpuBitmap::default(),
            bound_to: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        !self.cpu_bitmap.is_empty()
    }
}
