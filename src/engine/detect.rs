use std::path::PathBuf;

use anyhow::{Context, Error};
use log::warn;
use serde::{Deserialize, Serialize};

use osutils::{
    lsblk::{self, BlockDevice, BlockDeviceType},
    lvm::{self, LogicalVolume, VolumeGroup},
    mdadm::{self, MdadmDetail},
};

use crate::engine::Environment;

/// Read-only summary of the storage already on the machine, consumed by the
/// TUI and the announcement surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub disks: Vec<DetectedDisk>,
    pub arrays: Vec<DetectedArray>,
    pub vgs: Vec<DetectedVg>,
}

impl Layout {
    /// True when nothing but bare disks was found.
    pub fn is_pristine(&self) -> bool {
        self.arrays.is_empty()
            && self.vgs.is_empty()
            && self.disks.iter().all(|d| d.partitions.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedDisk {
    pub path: PathBuf,
    pub size: u64,
    pub rotational: bool,
    pub partitions: Vec<DetectedPartition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPartition {
    pub path: PathBuf,
    pub size: u64,
    pub fstype: Option<String>,
    pub label: Option<String>,
    pub mountpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedArray {
    pub path: PathBuf,
    pub level: String,
    pub members: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedVg {
    pub name: String,
    pub size: u64,
    pub free: u64,
    pub lvs: Vec<DetectedLv>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLv {
    pub name: String,
    pub size: u64,
    pub active: bool,
}

/// Summarizes the live storage layout. LVM and mdadm overlays degrade to
/// empty when their tooling is unavailable.
pub fn detect_existing_layout(_env: &Environment) -> Result<Layout, Error> {
    let devices = lsblk::list().context("Failed to list block devices")?;

    let arrays = mdadm::details().unwrap_or_else(|e| {
        warn!("Proceeding without RAID details: {e:#}");
        Vec::new()
    });
    let vgs = lvm::vgs().unwrap_or_else(|e| {
        warn!("Proceeding without VG details: {e:#}");
        Vec::new()
    });
    let lvs = lvm::lvs().unwrap_or_else(|e| {
        warn!("Proceeding without LV details: {e:#}");
        Vec::new()
    });

    Ok(build(&devices, &arrays, &vgs, &lvs))
}

/// Pure distillation over already-fetched views.
pub fn build(
    devices: &[BlockDevice],
    arrays: &[MdadmDetail],
    vgs: &[VolumeGroup],
    lvs: &[LogicalVolume],
) -> Layout {
    let disks = devices
        .iter()
        .filter(|d| d.blkdev_type == BlockDeviceType::Disk)
        .map(|d| DetectedDisk {
            path: d.name.clone(),
            size: d.size,
            rotational: d.rotational,
            partitions: d
                .children
                .iter()
                .filter(|c| c.blkdev_type == BlockDeviceType::Partition)
                .map(|p| DetectedPartition {
                    path: p.name.clone(),
                    size: p.size,
                    fstype: p.fstype.clone(),
                    label: p.label.clone(),
                    mountpoint: p.mountpoint.clone(),
                })
                .collect(),
        })
        .collect();

    let arrays = arrays
        .iter()
        .map(|a| DetectedArray {
            path: a.raid_path.clone(),
            level: a.level.clone(),
            members: a.devices.clone(),
        })
        .collect();

    let vgs = vgs
        .iter()
        .map(|vg| DetectedVg {
            name: vg.vg_name.clone(),
            size: vg.vg_size,
            free: vg.vg_free,
            lvs: lvs
                .iter()
                .filter(|lv| lv.vg_name == vg.vg_name)
                .map(|lv| DetectedLv {
                    name: lv.lv_name.clone(),
                    size: lv.lv_size,
                    active: lv.is_active(),
                })
                .collect(),
        })
        .collect();

    Layout { disks, arrays, vgs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_layout() {
        let devices = vec![BlockDevice {
            name: "/dev/sda".into(),
            size: 1 << 40,
            rotational: true,
            blkdev_type: BlockDeviceType::Disk,
            children: vec![BlockDevice {
                name: "/dev/sda1".into(),
                size: 1 << 39,
                fstype: Some("ext4".to_string()),
                label: Some("old-root".to_string()),
                mountpoint: Some("/mnt/old".into()),
                blkdev_type: BlockDeviceType::Partition,
                ..Default::default()
            }],
            ..Default::default()
        }];

        let arrays = vec![MdadmDetail {
            raid_path: "/dev/md127".into(),
            level: "raid1".to_string(),
            uuid: "a:b:c:d".to_string(),
            devices: vec!["/dev/sda1".into(), "/dev/sdb1".into()],
        }];

        let vgs = vec![VolumeGroup {
            vg_name: "old".to_string(),
            vg_size: 1 << 39,
            vg_free: 1 << 30,
            vg_extent_size: 4 << 20,
        }];

        let lvs = vec![LogicalVolume {
            lv_name: "data".to_string(),
            vg_name: "old".to_string(),
            lv_path: "/dev/old/data".into(),
            lv_size: 1 << 38,
            lv_active: "active".to_string(),
        }];

        let layout = build(&devices, &arrays, &vgs, &lvs);
        assert!(!layout.is_pristine());

        assert_eq!(layout.disks.len(), 1);
        assert_eq!(layout.disks[0].partitions.len(), 1);
        assert_eq!(
            layout.disks[0].partitions[0].label.as_deref(),
            Some("old-root")
        );

        assert_eq!(layout.arrays.len(), 1);
        assert_eq!(layout.arrays[0].level, "raid1");

        assert_eq!(layout.vgs.len(), 1);
        assert_eq!(layout.vgs[0].lvs.len(), 1);
        assert!(layout.vgs[0].lvs[0].active);
    }

    #[test]
    fn test_pristine_layout() {
        let devices = vec![BlockDevice {
            name: "/dev/sda".into(),
            size: 1 << 40,
            blkdev_type: BlockDeviceType::Disk,
            ..Default::default()
        }];

        let layout = build(&devices, &[], &[], &[]);
        assert!(layout.is_pristine());
    }

    #[test]
    fn test_serialization() {
        let layout = build(&[], &[], &[], &[]);
        let json = serde_json::to_string(&layout).unwrap();
        assert_eq!(json, r#"{"disks":[],"arrays":[],"vgs":[]}"#);
    }
}
