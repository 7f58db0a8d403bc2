use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use drydock_api::config::HostConfig;
use osutils::{
    blkdiscard, blockdev, cryptsetup,
    dependencies::DependencyError,
    dmsetup, losetup, lvm, mdadm, mount, sgdisk, shred, swap, udevadm, wipefs,
};

use crate::engine::{
    storage_graph::{NodeKind, ReachableForest, StorageGraph},
    Environment,
};

/// How far the engine goes on the requested roots.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CleanupMode {
    /// Teardown, descendant metadata scrub, and full root scrub
    WipeSignatures,

    /// Teardown and root scrub, leaving descendant metadata alone
    ZapOnly,

    /// Teardown and descendant metadata scrub without touching the roots
    MetadataOnly,
}

impl CleanupMode {
    fn scrub_descendants(&self) -> bool {
        !matches!(self, CleanupMode::ZapOnly)
    }

    fn scrub_roots(&self) -> bool {
        !matches!(self, CleanupMode::MetadataOnly)
    }
}

/// One executed step and its result. Failures carry the exit code and the
/// stderr tail for post-mortem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub kind: NodeKind,
    pub id: String,
    pub op: String,
    pub ok: bool,
    pub exit: Option<i32>,
    pub stderr_tail: Option<String>,
}

/// Per-node outcomes of a cleanup pass. The pass is successful when every
/// requested root ended up ready for a fresh GPT write; intermediate errors
/// stay recorded either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub mode: CleanupMode,
    pub roots: Vec<PathBuf>,

    /// Requested roots that had no corresponding live disk
    pub missing_roots: Vec<PathBuf>,

    /// Live entities found beneath the roots; zero on a re-entrant pass
    /// over already-clean disks
    pub descendants_visited: usize,

    pub outcomes: Vec<NodeOutcome>,

    /// Every root finished its final signature wipe successfully
    pub roots_ready: bool,
}

impl CleanupReport {
    fn new(mode: CleanupMode, roots: &[PathBuf], missing_roots: Vec<PathBuf>) -> Self {
        CleanupReport {
            mode,
            roots: roots.to_vec(),
            missing_roots,
            descendants_visited: 0,
            outcomes: Vec::new(),
            roots_ready: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.roots_ready || !self.mode.scrub_roots()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }

    fn record(
        &mut self,
        kind: NodeKind,
        id: &str,
        op: &str,
        result: Result<(), Box<DependencyError>>,
    ) -> bool {
        match result {
            Ok(()) => {
                debug!("{op} on '{id}': ok");
                self.outcomes.push(NodeOutcome {
                    kind,
                    id: id.to_string(),
                    op: op.to_string(),
                    ok: true,
                    exit: Some(0),
                    stderr_tail: None,
                });
                true
            }
            Err(e) => {
                warn!("{op} on '{id}' failed: {e}");
                self.outcomes.push(NodeOutcome {
                    kind,
                    id: id.to_string(),
                    op: op.to_string(),
                    ok: false,
                    exit: e.exit_code(),
                    stderr_tail: Some(e.stderr_tail(4)),
                });
                false
            }
        }
    }
}

/// Dismantles everything living on the requested root disks and leaves them
/// ready for a fresh GPT write. Works purely from the live system view, so
/// re-running it is well-defined: the second pass finds nothing to tear
/// down. Step failures never abort the walk.
pub fn cleanup(
    env: &Environment,
    roots: &[PathBuf],
    mode: CleanupMode,
) -> Result<CleanupReport, Error> {
    info!("Cleaning up {} root disk(s) in {mode} mode", roots.len());

    let graph = StorageGraph::collect().context("Failed to build the storage graph")?;
    let forest = graph
        .reachable_from(roots)
        .context("Failed to compute the reachable storage subforest")?;

    for missing in &forest.missing_roots {
        warn!("Requested root '{}' has no live disk node", missing.display());
    }
    debug!(
        "{} descendant node(s) beneath {} root(s)",
        forest.descendants.len(),
        forest.roots.len()
    );

    let mut report = CleanupReport::new(mode, roots, forest.missing_roots.clone());
    report.descendants_visited = forest.descendants.len();

    teardown(&forest, &mut report);

    if mode.scrub_descendants() {
        scrub_descendants(&forest, &mut report);
    }

    if mode.scrub_roots() {
        scrub_roots(&env.config, roots, &forest, &mut report);

        // The zapped tables invalidate whatever nodes udev was holding
        if let Err(e) = udevadm::trigger() {
            debug!("udev trigger after cleanup failed: {e:#}");
        }
    }

    if let Err(e) = udevadm::settle() {
        debug!("udev settle after cleanup failed: {e:#}");
    }

    Ok(report)
}

/// Phase A: quiesce every descendant, leaves first.
fn teardown(forest: &ReachableForest, report: &mut CleanupReport) {
    for entry in &forest.descendants {
        let node = &entry.node;
        match node.kind {
            NodeKind::Filesystem => {
                if let Some(mountpoint) = node.mountpoint.clone() {
                    report.record(node.kind, &node.id, "umount", mount::umount(&mountpoint));
                }
            }
            NodeKind::Swap => {
                if let Some(device) = node.device_path() {
                    report.record(node.kind, &node.id, "swapoff", swap::swapoff(device));
                }
            }
            NodeKind::Lv => {
                let target = node
                    .device_path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(&node.id));
                report.record(node.kind, &node.id, "lvchange -an", lvm::lv_deactivate(target));
            }
            NodeKind::Vg => {
                report.record(node.kind, &node.id, "vgchange -an", lvm::vg_deactivate(&node.id));
            }
            NodeKind::MdArray => {
                if let Some(device) = node.device_path() {
                    report.record(node.kind, &node.id, "mdadm --stop", mdadm::stop(device));
                }
            }
            NodeKind::Dm => {
                if let Some(device) = node.device_path() {
                    report.record(node.kind, &node.id, "dmsetup remove", dmsetup::remove(device));
                }
            }
            NodeKind::Crypt => {
                if let Some(device) = node.device_path() {
                    report.record(node.kind, &node.id, "cryptsetup close", cryptsetup::close(device));
                }
            }
            NodeKind::Loop => {
                if let Some(device) = node.device_path() {
                    if let Some(backing) = &node.backing_file {
                        info!(
                            "Loop device '{}' was backed by '{}'",
                            node.id,
                            backing.display()
                        );
                    }
                    report.record(node.kind, &node.id, "losetup -d", losetup::detach(device));
                }
            }
            NodeKind::Partition | NodeKind::Disk => {}
        }
    }
}

/// Phase B: walk the same order again and scrub descendant metadata so
/// nothing re-assembles on the next boot.
fn scrub_descendants(forest: &ReachableForest, report: &mut CleanupReport) {
    for entry in &forest.descendants {
        let node = &entry.node;
        match node.kind {
            NodeKind::Lv => {
                let target = node
                    .device_path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(&node.id));
                report.record(node.kind, &node.id, "lvremove -fy", lvm::lv_remove(target));
            }
            NodeKind::Vg => {
                report.record(node.kind, &node.id, "vgremove -ff -y", lvm::vg_remove(&node.id));
            }
            NodeKind::Partition => {
                let Some(device) = node.device_path().map(Path::to_path_buf) else {
                    continue;
                };
                if node.is_pv {
                    report.record(node.kind, &node.id, "pvremove -ff -y", lvm::pv_remove(&device));
                }
                if node.md_member {
                    report.record(
                        node.kind,
                        &node.id,
                        "mdadm --zero-superblock",
                        mdadm::zero_superblock(&device),
                    );
                }
                report.record(node.kind, &node.id, "wipefs -af", wipefs::all(&device));
            }
            // Stopped arrays, removed mappings, and detached loops have no
            // device node left to wipe; their members were handled above.
            NodeKind::MdArray
            | NodeKind::Dm
            | NodeKind::Crypt
            | NodeKind::Loop
            | NodeKind::Filesystem
            | NodeKind::Swap
            | NodeKind::Disk => {}
        }
    }
}

/// Phase C: scrub each requested root so a fresh GPT write succeeds.
fn scrub_roots(
    config: &HostConfig,
    roots: &[PathBuf],
    forest: &ReachableForest,
    report: &mut CleanupReport,
) {
    let mut all_ready = true;

    for root in roots {
        let id = root.display().to_string();

        report.record(NodeKind::Disk, &id, "sgdisk --zap-all", sgdisk::zap_all(root));

        // A failed re-read is recorded but never blocks the scrub
        report.record(
            NodeKind::Disk,
            &id,
            "blockdev --rereadpt",
            blockdev::rereadpt(root),
        );

        if let Some(node) = forest.roots.iter().find(|n| n.device_path() == Some(root)) {
            if node.rotational && config.shred_roots {
                report.record(NodeKind::Disk, &id, "shred", shred::run(root));
            } else if !node.rotational && config.discard_roots {
                report.record(NodeKind::Disk, &id, "blkdiscard", blkdiscard::run(root));
            }
        }

        let ready = report.record(NodeKind::Disk, &id, "wipefs -af", wipefs::all(root));
        all_ready &= ready;
    }

    report.roots_ready = all_ready;
}
