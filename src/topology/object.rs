//! Typed topology objects and the CPU bitmaps attached to them.

use bitvec::prelude::{BitVec, Lsb0};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into a [`Topology`](super::Topology)'s object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) usize);

/// The kind of hardware object a [`TopologyObject`] represents.
///
/// Ordered coarsest-first so that `Ord` reflects nesting depth: a
/// [`Locality`] built from this ordering can be compared with `>=` to ask
/// "at least as localized as".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Machine,
    Package,
    Numa,
    L3Cache,
    L2Cache,
    L1Cache,
    Core,
    HwThread,
}

impl ObjectType {
    /// All mappable object types, coarsest first. `Machine` is excluded since
    /// no mapper ever maps "by machine".
    pub const MAPPABLE: &'static [ObjectType] = &[
        ObjectType::Package,
        ObjectType::Numa,
        ObjectType::L3Cache,
        ObjectType::L2Cache,
        ObjectType::L1Cache,
        ObjectType::Core,
        ObjectType::HwThread,
    ];
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Machine => "machine",
            ObjectType::Package => "package",
            ObjectType::Numa => "numa",
            ObjectType::L3Cache => "L3cache",
            ObjectType::L2Cache => "L2cache",
            ObjectType::L1Cache => "L1cache",
            ObjectType::Core => "core",
            ObjectType::HwThread => "hwthread",
        };
        f.write_str(s)
    }
}

/// A set of hardware-thread IDs, dense-encoded relative to a single node's
/// topology.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuBitmap(BitVec<usize, Lsb0>);

impl CpuBitmap {
    /// An empty bitmap sized to hold up to `num_hwthreads` bits.
    pub fn empty(num_hwthreads: usize) -> Self {
        Self(BitVec::repeat(false, num_hwthreads))
    }

    /// A bitmap with a single hardware-thread ID set.
    pub fn single(num_hwthreads: usize, hwthread: usize) -> Self {
        let mut b = Self::empty(num_hwthreads);
        b.set(hwthread);
        b
    }

    pub fn set(&mut self, hwthread: usize) {
        if hwthread >= self.0.len() {
            self.0.resize(hwthread + 1, false);
        }
        self.0.set(hwthread, true);
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }

    pub fn count_ones(&self) -> usize {
        self.0.count_ones()
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter_ones()
    }

    /// Bitwise union of `self` and `other`, widened to the larger length.
    pub fn union(&self, other: &CpuBitmap) -> CpuBitmap {
        let len = self.0.len().max(other.0.len());
        let mut out = BitVec::repeat(false, len);
        for i in self.iter_ones() {
            out.set(i, true);
        }
        for i in other.iter_ones() {
            out.set(i, true);
        }
        CpuBitmap(out)
    }

    /// True if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &CpuBitmap) -> bool {
        other.iter_ones().all(|i| self.0.get(i).map_or(false, |b| *b))
    }

    /// True if `self` and `other` share at least one set bit.
    pub fn intersects(&self, other: &CpuBitmap) -> bool {
        other.iter_ones().any(|i| self.0.get(i).map_or(false, |b| *b))
    }
}

impl fmt::Display for CpuBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.iter_ones().map(|i| i.to_string()).collect();
        write!(f, "[{}]", ids.join(","))
    }
}

/// One node in the hardware topology tree.
#[derive(Debug, Clone)]
pub struct TopologyObject {
    pub(crate) id: ObjectId,
    pub(crate) object_type: ObjectType,
    /// Index among all objects of the same type on this node, assigned in
    /// depth-first order. Stable for the lifetime of the topology.
    pub(crate) logical_index: usize,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) children: Vec<ObjectId>,
    pub(crate) cpuset: CpuBitmap,
}

impl TopologyObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn logical_index(&self) -> usize {
        self.logical_index
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn cpuset(&self) -> &CpuBitmap {
        &self.cpuset
    }
}

/// The deepest topology level two CPU bitmaps share, coarsest-to-finest so
/// that `>=` means "at least this localized".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Locality {
    /// The two bitmaps belong to different nodes (or either is empty).
    None,
    Node,
    Package,
    Numa,
    L3Cache,
    L2Cache,
    L1Cache,
    Core,
    HwThread,
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Locality::None => "unrelated",
            Locality::Node => "node",
            Locality::Package => "package",
            Locality::Numa => "numa",
            Locality::L3Cache => "L3cache",
            Locality::L2Cache => "L2cache",
            Locality::L1Cache => "L1cache",
            Locality::Core => "core",
            Locality::HwThread => "hwthread",
        };
        f.write_str(s)
    }
}

impl From<ObjectType> for Locality {
    fn from(ty: ObjectType) -> Self {
        match ty {
            ObjectType::Machine => Locality::Node,
            ObjectType::Package => Locality::Package,
            ObjectType::Numa => Locality::Numa,
            ObjectType::L3Cache => Locality::L3Cache,
            ObjectType::L2Cache => Locality::L2Cache,
            ObjectType::L1Cache => Locality::L1Cache,
            ObjectType::Core => Locality::Core,
            ObjectType::HwThread => Locality::HwThread,
        }
    }
}
