//! In-memory hardware topology model.
//!
//! A [`Topology`] is a rooted tree of typed [`TopologyObject`]s: a single
//! `Machine` root, `Package`s below it, then `Numa`/cache/`Core`/`HwThread`
//! layers down to the leaves. Mappers and the binder never discover real
//! hardware — topologies are either built synthetically for tests or
//! supplied by whatever out-of-core component owns hardware discovery for a
//! given node.

mod object;

pub use object::{CpuBitmap, Locality, ObjectId, ObjectType, TopologyObject};

use rustc_hash::FxHashMap;

/// A single node's hardware hierarchy.
#[derive(Debug, Clone)]
pub struct Topology {
    objects: Vec<TopologyObject>,
    by_type: FxHashMap<ObjectType, Vec<ObjectId>>,
    root: ObjectId,
    num_hwthreads: usize,
}

impl Topology {
    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn object(&self, id: ObjectId) -> &TopologyObject {
        &self.objects[id.0]
    }

    pub fn num_hwthreads(&self) -> usize {
        self.num_hwthreads
    }

    /// Number of objects of the given type present on this node.
    pub fn count_by_type(&self, ty: ObjectType) -> usize {
        self.by_type.get(&ty).map_or(0, Vec::len)
    }

    /// The object of type `ty` at the given node-local logical index, if any.
    pub fn get_by_type(&self, ty: ObjectType, logical_index: usize) -> Option<&TopologyObject> {
        self.by_type
            .get(&ty)
            .and_then(|v| v.get(logical_index))
            .map(|id| self.object(*id))
    }

    /// All objects of the given type, in logical index order.
    pub fn objects_of_type(&self, ty: ObjectType) -> impl Iterator<Item = &TopologyObject> {
        self.by_type
            .get(&ty)
            .into_iter()
            .flatten()
            .map(move |id| self.object(*id))
    }

    fn ancestors(&self, id: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        std::iter::successors(Some(id), move |cur| self.object(*cur).parent())
    }

    /// The deepest common ancestor type of two CPU bitmaps on this node's
    /// topology. Empty bitmaps never share locality.
    pub fn locality(&self, a: &CpuBitmap, b: &CpuBitmap) -> Locality {
        if a.is_empty() || b.is_empty() {
            return Locality::None;
        }
        // Walk up from any object fully covering `a`, return the first
        // ancestor (inclusive) whose cpuset also fully covers `b`.
        let Some(start) = self.smallest_covering(a) else {
            return Locality::None;
        };
        for anc in self.ancestors(start) {
            let obj = self.object(anc);
            if obj.cpuset().contains_all(b) {
                return Locality::from(obj.object_type());
            }
        }
        Locality::Node
    }

    /// The smallest object whose cpuset fully covers `bitmap`, if any.
    fn smallest_covering(&self, bitmap: &CpuBitmap) -> Option<ObjectId> {
        // HwThread leaves are always the smallest possible covering objects;
        // walking leaf-to-root via any one of bitmap's hwthreads suffices
        // because cpusets are monotonically non-decreasing towards the root.
        let first = bitmap.iter_ones().next()?;
        let leaf = self.get_by_type(ObjectType::HwThread, first)?;
        let mut cur = leaf.id();
        loop {
            let obj = self.object(cur);
            if obj.cpuset().contains_all(bitmap) {
                return Some(cur);
            }
            cur = obj.parent()?;
        }
    }

    /// The CPU bitmap of a single hardware thread by its (machine-wide,
    /// since HwThread logical index is the hwthread ID) logical index.
    pub fn hwthread_bitmap(&self, hwthread: usize) -> CpuBitmap {
        CpuBitmap::single(self.num_hwthreads, hwthread)
    }
}

/// Builds a symmetric synthetic topology: every object at a given depth has
/// the same number of children. This mirrors how hwloc's own "synthetic"
/// topology strings describe a uniform machine for testing.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticTopology {
    pub packages: usize,
    pub numas_per_package: usize,
    pub l3_per_numa: usize,
    pub l2_per_l3: usize,
    pub l1_per_l2: usize,
    pub cores_per_l1: usize,
    pub hwthreads_per_core: usize,
}

impl Default for SyntheticTopology {
    fn default() -> Self {
        SyntheticTopology {
            packages: 1,
            numas_per_package: 1,
            l3_per_numa: 1,
            l2_per_l3: 1,
            l1_per_l2: 1,
            cores_per_l1: 1,
            hwthreads_per_core: 1,
        }
    }
}

impl SyntheticTopology {
    /// Convenience shape: `packages` packages, each with `cores` cores
    /// directly (one L1/L2/L3/Numa wrapper each), `hwthreads_per_core`
    /// threads per core.
    pub fn simple(packages: usize, cores_per_package: usize, hwthreads_per_core: usize) -> Self {
        SyntheticTopology {
            packages,
            numas_per_package: 1,
            l3_per_numa: 1,
            l2_per_l3: 1,
            l1_per_l2: 1,
            cores_per_l1: cores_per_package,
            hwthreads_per_core,
        }
    }

    pub fn build(self) -> Topology {
        let mut objects = Vec::new();
        let mut by_type: FxHashMap<ObjectType, Vec<ObjectId>> = FxHashMap::default();

        let mut push = |object_type: ObjectType,
                        parent: Option<ObjectId>,
                        objects: &mut Vec<TopologyObject>,
                        by_type: &mut FxHashMap<ObjectType, Vec<ObjectId>>|
         -> ObjectId {
            let id = ObjectId(objects.len());
            let logical_index = by_type.entry(object_type).or_default().len();
            objects.push(TopologyObject {
                id,
                object_type,
                logical_index,
                parent,
                children: Vec::new(),
                cpuset: CpuBitmap::empty(0),
            });
            by_type.get_mut(&object_type).unwrap().push(id);
            if let Some(p) = parent {
                objects[p.0].children.push(id);
            }
            id
        };

        let root = push(ObjectType::Machine, None, &mut objects, &mut by_type);

        let mut hwthread_counter = 0usize;
        for _pkg in 0..self.packages {
            let pkg = push(ObjectType::Package, Some(root), &mut objects, &mut by_type);
            for _numa in 0..self.numas_per_package {
                let numa = push(ObjectType::Numa, Some(pkg), &mut objects, &mut by_type);
                for _l3 in 0..self.l3_per_numa {
                    let l3 = push(ObjectType::L3Cache, Some(numa), &mut objects, &mut by_type);
                    for _l2 in 0..self.l2_per_l3 {
                        let l2 = push(ObjectType::L2Cache, Some(l3), &mut objects, &mut by_type);
                        for _l1 in 0..self.l1_per_l2 {
                            let l1 =
                                push(ObjectType::L1Cache, Some(l2), &mut objects, &mut by_type);
                            for _core in 0..self.cores_per_l1 {
                                let core =
                                    push(ObjectType::Core, Some(l1), &mut objects, &mut by_type);
                                for _ht in 0..self.hwthreads_per_core {
                                    push(ObjectType::HwThread, Some(core), &mut objects, &mut by_type);
                                    hwthread_counter += 1;
                                }
                            }
                        }
                    }
                }
            }
        }

        let num_hwthreads = hwthread_counter;
        // Hardware-thread IDs are assigned in push order, which is also each
        // HwThread's logical index; cpusets then propagate bottom-up as the
        // union of children's cpusets.
        for id in by_type.get(&ObjectType::HwThread).cloned().unwrap_or_default() {
            let hwthread_id = objects[id.0].logical_index;
            objects[id.0].cpuset = CpuBitmap::single(num_hwthreads, hwthread_id);
        }
        propagate_cpusets(&mut objects, root, num_hwthreads);

        Topology {
            objects,
            by_type,
            root,
            num_hwthreads,
        }
    }
}

fn propagate_cpusets(objects: &mut [TopologyObject], id: ObjectId, num_hwthreads: usize) {
    if objects[id.0].object_type == ObjectType::HwThread {
        return;
    }
    let children = objects[id.0].children.clone();
    let mut acc = CpuBitmap::empty(num_hwthreads);
    for child in children {
        propagate_cpusets(objects, child, num_hwthreads);
        acc = acc.union(objects[child.0].cpuset());
    }
    objects[id.0].cpuset = acc;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_topology_has_expected_counts() {
        let topo = SyntheticTopology::simple(2, 4, 2).build();
        assert_eq!(topo.count_by_type(ObjectType::Package), 2);
        assert_eq!(topo.count_by_type(ObjectType::Core), 8);
        assert_eq!(topo.count_by_type(ObjectType::HwThread), 16);
        assert_eq!(topo.num_hwthreads(), 16);
    }

    #[test]
    fn locality_same_core_finer_than_same_package() {
        let topo = SyntheticTopology::simple(2, 2, 2).build();
        let ht0 = topo.hwthread_bitmap(0);
        let ht1 = topo.hwthread_bitmap(1);
        // hwthreads 0 and 1 share the first core (2 hwthreads/core)
        assert_eq!(topo.locality(&ht0, &ht1), Locality::Core);

        let ht_other_pkg = topo.hwthread_bitmap(4); // second package (2 cores * 2 ht = 4/pkg)
        assert!(topo.locality(&ht0, &ht_other_pkg) >= Locality::Node);
        assert!(topo.locality(&ht0, &ht_other_pkg) < Locality::Package);
    }

    #[test]
    fn get_by_type_logical_index() {
        let topo = SyntheticTopology::simple(1, 2, 1).build();
        assert!(topo.get_by_type(ObjectType::Core, 0).is_some());
        assert!(topo.get_by_type(ObjectType::Core, 1).is_some());
        assert!(topo.get_by_type(ObjectType::Core, 2).is_none());
    }
}
