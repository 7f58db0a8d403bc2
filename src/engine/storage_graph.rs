use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Error};
use log::{debug, warn};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    Direction,
};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use osutils::{
    losetup::{self, LoopDevice},
    lsblk::{self, BlockDevice, BlockDeviceType},
    lvm::{self, LogicalVolume, PhysicalVolume},
};

/// Kinds of live storage entities the cleanup engine distinguishes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Disk,
    Partition,
    MdArray,
    Vg,
    Lv,
    Dm,
    Crypt,
    Loop,
    Filesystem,
    Swap,
}

/// A node in the live storage graph. Rebuilt fresh on every cleanup
/// invocation; identified by (kind, id) so shared entities appear once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageNode {
    pub kind: NodeKind,

    /// Device path for block nodes, `vg` / `vg/lv` for LVM nodes, the
    /// mountpoint for filesystem nodes
    pub id: String,

    /// Block device path, when the node maps to one
    pub device: Option<PathBuf>,

    /// Mountpoint, for filesystem nodes
    pub mountpoint: Option<PathBuf>,

    /// Backing file, for loop nodes, so it can be reported after detach
    pub backing_file: Option<PathBuf>,

    /// The node is an LVM physical volume
    pub is_pv: bool,

    /// The node is a partition holding an md superblock
    pub md_member: bool,

    /// Rotational flag, for disk nodes
    pub rotational: bool,
}

impl StorageNode {
    fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        StorageNode {
            kind,
            id: id.into(),
            device: None,
            mountpoint: None,
            backing_file: None,
            is_pv: false,
            md_member: false,
            rotational: false,
        }
    }

    /// The path teardown commands operate on.
    pub fn device_path(&self) -> Option<&Path> {
        self.device.as_deref()
    }
}

/// A node scheduled for teardown, with its depth in the reachable subforest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownNode {
    pub node: StorageNode,

    /// Longest path from a leaf beneath this node; leaves are 0
    pub depth: usize,
}

/// The reachable subforest under a set of requested root disks, ordered for
/// teardown (ascending depth, leaves first).
#[derive(Debug, Clone, PartialEq)]
pub struct ReachableForest {
    /// Root disks that resolved to live nodes
    pub roots: Vec<StorageNode>,

    /// Requested roots with no corresponding live disk
    pub missing_roots: Vec<PathBuf>,

    /// Every node beneath a root, exactly once, leaves first
    pub descendants: Vec<TeardownNode>,
}

/// The global storage graph fused from the block-device tree, the LVM
/// report, and the loop-device table. Edges point from a device to what
/// sits on it.
#[derive(Debug, Default)]
pub struct StorageGraph {
    graph: DiGraph<StorageNode, ()>,
    index: HashMap<(NodeKind, String), NodeIndex>,
}

impl StorageGraph {
    /// Builds the graph from the live system view.
    pub fn collect() -> Result<StorageGraph, Error> {
        let devices = lsblk::list()?;

        // LVM or loop tooling may be absent on minimal systems; that only
        // means those overlays are empty.
        let pvs = lvm::pvs().unwrap_or_else(|e| {
            warn!("Proceeding without the PV overlay: {e:#}");
            Vec::new()
        });
        let lvs = lvm::lvs().unwrap_or_else(|e| {
            warn!("Proceeding without the LV overlay: {e:#}");
            Vec::new()
        });
        let loops = losetup::list().unwrap_or_else(|e| {
            warn!("Proceeding without the loop-device table: {e:#}");
            Vec::new()
        });

        Ok(Self::build(&devices, &pvs, &lvs, &loops))
    }

    /// Pure fusion step over already-fetched views.
    pub fn build(
        devices: &[BlockDevice],
        pvs: &[PhysicalVolume],
        lvs: &[LogicalVolume],
        loops: &[LoopDevice],
    ) -> StorageGraph {
        let mut graph = StorageGraph::default();

        for device in devices {
            graph.add_block_device(device, None);
        }

        for pv in pvs {
            let Some(vg_name) = pv.vg() else {
                continue;
            };
            let vg_ix = graph.intern(StorageNode::new(NodeKind::Vg, vg_name));
            if let Some(pv_ix) = graph.find_by_device(&pv.pv_name) {
                graph.graph[pv_ix].is_pv = true;
                graph.add_edge(pv_ix, vg_ix);
            }
        }

        for lv in lvs {
            let vg_ix = graph.intern(StorageNode::new(NodeKind::Vg, lv.vg_name.clone()));
            let mut node = StorageNode::new(NodeKind::Lv, lv.qualified_name());
            node.device = Some(lv.lv_path.clone());
            let lv_ix = graph.intern(node);
            graph.add_edge(vg_ix, lv_ix);
        }

        for lp in loops {
            let ix = graph
                .index
                .get(&(NodeKind::Loop, lp.name.display().to_string()))
                .copied()
                .unwrap_or_else(|| {
                    let mut node = StorageNode::new(NodeKind::Loop, lp.name.display().to_string());
                    node.device = Some(lp.name.clone());
                    graph.intern(node)
                });
            graph.graph[ix].backing_file = lp.backing_file.clone();
        }

        debug!("Storage graph: {} node(s)", graph.graph.node_count());
        graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Computes the reachable subforest under the requested roots and the
    /// leaf-to-root teardown order. The graph must be a DAG; the VG
    /// pseudo-node sits between PVs and LVs, so no true cycle can exist,
    /// and this asserts it.
    pub fn reachable_from(&self, roots: &[PathBuf]) -> Result<ReachableForest, Error> {
        let mut root_nodes = Vec::new();
        let mut root_ixs = Vec::new();
        let mut missing_roots = Vec::new();

        for root in roots {
            let key = (NodeKind::Disk, root.display().to_string());
            match self.index.get(&key) {
                Some(&ix) => {
                    root_nodes.push(self.graph[ix].clone());
                    root_ixs.push(ix);
                }
                None => missing_roots.push(root.clone()),
            }
        }

        // Every node beneath any root, exactly once
        let mut reachable: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = root_ixs.clone();
        while let Some(ix) = stack.pop() {
            for child in self.graph.neighbors_directed(ix, Direction::Outgoing) {
                if reachable.insert(child) {
                    stack.push(child);
                }
            }
        }

        let depths = self.leaf_depths(&reachable, &root_ixs)?;

        let mut descendants: Vec<TeardownNode> = reachable
            .iter()
            .map(|&ix| TeardownNode {
                node: self.graph[ix].clone(),
                depth: depths[&ix],
            })
            .collect();
        descendants.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.node.kind.cmp(&b.node.kind))
                .then_with(|| a.node.id.cmp(&b.node.id))
        });

        Ok(ReachableForest {
            roots: root_nodes,
            missing_roots,
            descendants,
        })
    }

    /// Longest path from a leaf for every reachable node, by post-order
    /// traversal with an on-stack check that rejects cycles.
    fn leaf_depths(
        &self,
        reachable: &HashSet<NodeIndex>,
        roots: &[NodeIndex],
    ) -> Result<HashMap<NodeIndex, usize>, Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Visiting,
            Done,
        }

        let mut depths: HashMap<NodeIndex, usize> = HashMap::new();
        let mut states: HashMap<NodeIndex, State> = HashMap::new();

        // Iterative DFS with an explicit enter/exit stack
        for &start in roots.iter().chain(reachable.iter()) {
            if states.get(&start) == Some(&State::Done) {
                continue;
            }

            let mut stack: Vec<(NodeIndex, bool)> = vec![(start, false)];
            while let Some((ix, exiting)) = stack.pop() {
                if exiting {
                    let depth = self
                        .graph
                        .neighbors_directed(ix, Direction::Outgoing)
                        .filter(|c| reachable.contains(c))
                        .map(|c| depths.get(&c).copied().unwrap_or(0) + 1)
                        .max()
                        .unwrap_or(0);
                    depths.insert(ix, depth);
                    states.insert(ix, State::Done);
                    continue;
                }

                match states.get(&ix) {
                    Some(State::Done) => continue,
                    Some(State::Visiting) => {
                        bail!("Storage graph contains a cycle at '{}'", self.graph[ix].id)
                    }
                    None => {}
                }

                states.insert(ix, State::Visiting);
                stack.push((ix, true));
                for child in self.graph.neighbors_directed(ix, Direction::Outgoing) {
                    if reachable.contains(&child) {
                        match states.get(&child) {
                            Some(State::Visiting) => bail!(
                                "Storage graph contains a cycle at '{}'",
                                self.graph[child].id
                            ),
                            Some(State::Done) => {}
                            None => stack.push((child, false)),
                        }
                    }
                }
            }
        }

        Ok(depths)
    }

    fn intern(&mut self, node: StorageNode) -> NodeIndex {
        let key = (node.kind, node.id.clone());
        match self.index.get(&key) {
            Some(&ix) => {
                // First sighting wins; fill in attributes discovered later
                if self.graph[ix].device.is_none() {
                    self.graph[ix].device = node.device;
                }
                ix
            }
            None => {
                let ix = self.graph.add_node(node);
                self.index.insert(key, ix);
                ix
            }
        }
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }

    fn find_by_device(&self, path: &Path) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&ix| self.graph[ix].device.as_deref() == Some(path))
    }

    fn add_block_device(&mut self, device: &BlockDevice, parent: Option<NodeIndex>) {
        let Some((kind, id)) = block_node_identity(device) else {
            return;
        };

        let mut node = StorageNode::new(kind, id);
        node.device = Some(device.name.clone());
        node.rotational = device.rotational;
        let ix = self.intern(node);

        if let Some(parent) = parent {
            self.add_edge(parent, ix);
        }

        // A mounted filesystem or active swap is a leaf node on top of the
        // block device that carries it.
        if device.is_active_swap() {
            let mut swap = StorageNode::new(NodeKind::Swap, device.name.display().to_string());
            swap.device = Some(device.name.clone());
            let swap_ix = self.intern(swap);
            self.add_edge(ix, swap_ix);
        } else {
            for mountpoint in &device.mountpoints {
                let mut fs =
                    StorageNode::new(NodeKind::Filesystem, mountpoint.display().to_string());
                fs.device = Some(device.name.clone());
                fs.mountpoint = Some(mountpoint.clone());
                let fs_ix = self.intern(fs);
                self.add_edge(ix, fs_ix);
            }
        }

        for child in &device.children {
            self.add_block_device(child, Some(ix));
            if child.blkdev_type == BlockDeviceType::Raid {
                self.graph[ix].md_member = true;
            }
        }
    }
}

/// Maps an lsblk device to its graph identity. LVM logical volumes are keyed
/// as `vg/lv` so the device-mapper path and the LVM report deduplicate onto
/// one node.
fn block_node_identity(device: &BlockDevice) -> Option<(NodeKind, String)> {
    let path = device.name.display().to_string();

    let kind = match device.blkdev_type {
        BlockDeviceType::Disk => NodeKind::Disk,
        BlockDeviceType::Partition => NodeKind::Partition,
        BlockDeviceType::Raid => NodeKind::MdArray,
        BlockDeviceType::Crypt => NodeKind::Crypt,
        BlockDeviceType::Dm | BlockDeviceType::Mpath => NodeKind::Dm,
        BlockDeviceType::Loop => NodeKind::Loop,
        BlockDeviceType::Lvm => {
            let id = parse_mapper_name(&device.name)
                .map(|(vg, lv)| format!("{vg}/{lv}"))
                .unwrap_or(path);
            return Some((NodeKind::Lv, id));
        }
        BlockDeviceType::Rom | BlockDeviceType::Unknown => return None,
    };

    Some((kind, path))
}

/// Splits `/dev/mapper/<vg>-<lv>` into the VG and LV names. A literal dash
/// inside either name is escaped as `--` by device-mapper.
pub fn parse_mapper_name(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?;

    let mut vg = String::new();
    let mut lv = String::new();
    let mut in_lv = false;
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '-' {
            if chars.peek() == Some(&'-') {
                chars.next();
                if in_lv {
                    lv.push('-');
                } else {
                    vg.push('-');
                }
            } else if in_lv {
                // More than one unescaped dash: not a vg-lv name
                return None;
            } else {
                in_lv = true;
            }
        } else if in_lv {
            lv.push(c);
        } else {
            vg.push(c);
        }
    }

    if vg.is_empty() || lv.is_empty() {
        None
    } else {
        Some((vg, lv))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn part(name: &str, children: Vec<BlockDevice>) -> BlockDevice {
        BlockDevice {
            name: name.into(),
            blkdev_type: BlockDeviceType::Partition,
            children,
            ..Default::default()
        }
    }

    pub(crate) fn disk(name: &str, children: Vec<BlockDevice>) -> BlockDevice {
        BlockDevice {
            name: name.into(),
            blkdev_type: BlockDeviceType::Disk,
            children,
            ..Default::default()
        }
    }

    /// The §8 residue scenario: /dev/md127 across vdb1+vdc1, carrying an
    /// active, mounted LV.
    pub(crate) fn residue_fixture() -> (
        Vec<BlockDevice>,
        Vec<PhysicalVolume>,
        Vec<LogicalVolume>,
        Vec<LoopDevice>,
    ) {
        let lv_dev = BlockDevice {
            name: "/dev/mapper/vg_residue-lv_residue".into(),
            blkdev_type: BlockDeviceType::Lvm,
            mountpoint: Some("/mnt/residue".into()),
            mountpoints: vec!["/mnt/residue".into()],
            ..Default::default()
        };

        let md = |children| BlockDevice {
            name: "/dev/md127".into(),
            blkdev_type: BlockDeviceType::Raid,
            children,
            ..Default::default()
        };

        let devices = vec![
            disk("/dev/vdb", vec![part("/dev/vdb1", vec![md(vec![lv_dev.clone()])])]),
            disk("/dev/vdc", vec![part("/dev/vdc1", vec![md(vec![lv_dev])])]),
        ];

        let pvs = vec![PhysicalVolume {
            pv_name: "/dev/md127".into(),
            vg_name: "vg_residue".to_string(),
            pv_size: 1 << 30,
        }];

        let lvs = vec![LogicalVolume {
            lv_name: "lv_residue".to_string(),
            vg_name: "vg_residue".to_string(),
            lv_path: "/dev/vg_residue/lv_residue".into(),
            lv_size: 1 << 29,
            lv_active: "active".to_string(),
        }];

        (devices, pvs, lvs, vec![])
    }

    #[test]
    fn test_parse_mapper_name() {
        assert_eq!(
            parse_mapper_name(Path::new("/dev/mapper/main-slash")),
            Some(("main".to_string(), "slash".to_string()))
        );
        assert_eq!(
            parse_mapper_name(Path::new("/dev/mapper/vg_residue-lv_residue")),
            Some(("vg_residue".to_string(), "lv_residue".to_string()))
        );
        // Escaped dashes
        assert_eq!(
            parse_mapper_name(Path::new("/dev/mapper/my--vg-my--lv")),
            Some(("my-vg".to_string(), "my-lv".to_string()))
        );
        assert_eq!(parse_mapper_name(Path::new("/dev/mapper/noseparator")), None);
        assert_eq!(parse_mapper_name(Path::new("/dev/mapper/a-b-c")), None);
    }

    #[test]
    fn test_shared_md_array_appears_once() {
        let (devices, pvs, lvs, loops) = residue_fixture();
        let graph = StorageGraph::build(&devices, &pvs, &lvs, &loops);

        let forest = graph
            .reachable_from(&["/dev/vdb".into(), "/dev/vdc".into()])
            .unwrap();

        let md_nodes: Vec<_> = forest
            .descendants
            .iter()
            .filter(|n| n.node.kind == NodeKind::MdArray)
            .collect();
        assert_eq!(md_nodes.len(), 1);
        assert_eq!(md_nodes[0].node.id, "/dev/md127");

        // The LVM device-mapper node and the lvs report fused into one node
        let lv_nodes: Vec<_> = forest
            .descendants
            .iter()
            .filter(|n| n.node.kind == NodeKind::Lv)
            .collect();
        assert_eq!(lv_nodes.len(), 1);
        assert_eq!(lv_nodes[0].node.id, "vg_residue/lv_residue");

        // Both member partitions are marked as carrying md superblocks
        let members: Vec<_> = forest
            .descendants
            .iter()
            .filter(|n| n.node.kind == NodeKind::Partition)
            .collect();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|n| n.node.md_member));
    }

    #[test]
    fn test_teardown_order_is_leaf_first() {
        let (devices, pvs, lvs, loops) = residue_fixture();
        let graph = StorageGraph::build(&devices, &pvs, &lvs, &loops);
        let forest = graph
            .reachable_from(&["/dev/vdb".into(), "/dev/vdc".into()])
            .unwrap();

        let pos = |kind: NodeKind| {
            forest
                .descendants
                .iter()
                .position(|n| n.node.kind == kind)
                .unwrap_or_else(|| panic!("no {kind} node"))
        };

        assert!(pos(NodeKind::Filesystem) < pos(NodeKind::Lv));
        assert!(pos(NodeKind::Lv) < pos(NodeKind::Vg));
        assert!(pos(NodeKind::Vg) < pos(NodeKind::MdArray));
        assert!(pos(NodeKind::MdArray) < pos(NodeKind::Partition));

        // Roots are not part of the descendant walk
        assert!(forest
            .descendants
            .iter()
            .all(|n| n.node.kind != NodeKind::Disk));
        assert_eq!(forest.roots.len(), 2);
        assert!(forest.missing_roots.is_empty());

        // Depths ascend monotonically
        for pair in forest.descendants.windows(2) {
            assert!(pair[0].depth <= pair[1].depth);
        }
    }

    #[test]
    fn test_unrelated_nodes_are_excluded() {
        let (mut devices, pvs, lvs, loops) = residue_fixture();
        devices.push(disk(
            "/dev/sda",
            vec![part("/dev/sda1", vec![])],
        ));

        let graph = StorageGraph::build(&devices, &pvs, &lvs, &loops);
        let forest = graph.reachable_from(&["/dev/vdb".into()]).unwrap();

        assert!(forest
            .descendants
            .iter()
            .all(|n| !n.node.id.starts_with("/dev/sda")));
    }

    #[test]
    fn test_missing_root_is_reported() {
        let (devices, pvs, lvs, loops) = residue_fixture();
        let graph = StorageGraph::build(&devices, &pvs, &lvs, &loops);

        let forest = graph.reachable_from(&["/dev/vdz".into()]).unwrap();
        assert!(forest.roots.is_empty());
        assert_eq!(forest.missing_roots, vec![PathBuf::from("/dev/vdz")]);
        assert!(forest.descendants.is_empty());
    }

    #[test]
    fn test_pv_marking_and_swap_nodes() {
        let swap_part = BlockDevice {
            name: "/dev/vdb2".into(),
            blkdev_type: BlockDeviceType::Partition,
            mountpoint: Some("[SWAP]".into()),
            mountpoints: vec!["[SWAP]".into()],
            ..Default::default()
        };
        let devices = vec![disk(
            "/dev/vdb",
            vec![part("/dev/vdb1", vec![]), swap_part],
        )];
        let pvs = vec![PhysicalVolume {
            pv_name: "/dev/vdb1".into(),
            vg_name: "data".to_string(),
            pv_size: 1 << 30,
        }];

        let graph = StorageGraph::build(&devices, &pvs, &[], &[]);
        let forest = graph.reachable_from(&["/dev/vdb".into()]).unwrap();

        let pv = forest
            .descendants
            .iter()
            .find(|n| n.node.id == "/dev/vdb1")
            .unwrap();
        assert!(pv.node.is_pv);

        assert!(forest
            .descendants
            .iter()
            .any(|n| n.node.kind == NodeKind::Swap));
        assert!(forest
            .descendants
            .iter()
            .any(|n| n.node.kind == NodeKind::Vg && n.node.id == "data"));
    }

    #[test]
    fn test_loop_backing_file_recorded() {
        let loop_dev = BlockDevice {
            name: "/dev/loop3".into(),
            blkdev_type: BlockDeviceType::Loop,
            ..Default::default()
        };
        let loops = vec![LoopDevice {
            name: "/dev/loop3".into(),
            backing_file: Some("/var/lib/images/disk.img".into()),
            size_limit: None,
        }];

        let graph = StorageGraph::build(&[loop_dev], &[], &[], &loops);
        assert_eq!(graph.node_count(), 1);

        let ix = graph.find_by_device(Path::new("/dev/loop3")).unwrap();
        assert_eq!(
            graph.graph[ix].backing_file,
            Some(PathBuf::from("/var/lib/images/disk.img"))
        );
    }
}
