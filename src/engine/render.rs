use std::collections::BTreeMap;
use std::path::Path;

use log::warn;

use drydock_api::{
    constants::{ESP_LABEL, ESP_MOUNTPOINT, TYPECODE_ESP},
    disko::{
        Content, DiskEntry, DiskTag, DiskoDocument, LvEntry, LvmVgEntry, LvmVgTag, MdadmEntry,
        MdadmTag, PartitionEntry,
    },
    plan::{LvContent, Plan, PlannedDisk, PlannedPartition, PvSource},
};

/// Projects a plan into the declarative device graph the external formatter
/// consumes. The projection is total and deterministic: all maps are
/// key-sorted on serialization and partition order is preserved through the
/// `priority` attribute.
pub fn render(plan: &Plan) -> DiskoDocument {
    let mut document = DiskoDocument::default();

    for disk in &plan.disks {
        let mut partitions = BTreeMap::new();
        for partition in plan
            .partitions
            .get(&disk.path.display().to_string())
            .into_iter()
            .flatten()
        {
            partitions.insert(
                partition.name.clone(),
                PartitionEntry {
                    priority: partition.index,
                    size: partition.size.render(),
                    typecode: partition.typecode.clone(),
                    content: partition_content(plan, disk, partition),
                },
            );
        }

        document.disk.insert(
            disk_key(&disk.path),
            DiskEntry {
                tag: DiskTag::Disk,
                device: disk.path.clone(),
                content: Content::Gpt { partitions },
            },
        );
    }

    for array in &plan.arrays {
        let vg = plan.vgs.iter().find_map(|vg| match &vg.pv {
            PvSource::Array { array: name } if *name == array.name => Some(vg.name.clone()),
            _ => None,
        });

        let Some(vg) = vg else {
            warn!("Array '{}' backs no volume group; not rendering it", array.name);
            continue;
        };

        document.mdadm.insert(
            array.name.clone(),
            MdadmEntry {
                tag: MdadmTag::Mdadm,
                level: array.level.numeric(),
                content: Content::LvmPv { vg },
            },
        );
    }

    for vg in &plan.vgs {
        let mut lvs = BTreeMap::new();
        for lv in plan.lvs_in(&vg.name) {
            lvs.insert(
                lv.name.clone(),
                LvEntry {
                    size: lv.size.to_string(),
                    content: lv_content(&lv.content),
                },
            );
        }

        document.lvm_vg.insert(
            vg.name.clone(),
            LvmVgEntry {
                tag: LvmVgTag::LvmVg,
                lvs,
            },
        );
    }

    document
}

/// Key under the top-level `disk` map: the kernel device name.
fn disk_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string().replace('/', "_"))
}

fn partition_content(
    plan: &Plan,
    disk: &PlannedDisk,
    partition: &PlannedPartition,
) -> Option<Content> {
    if partition.typecode == TYPECODE_ESP {
        return Some(Content::Filesystem {
            format: "vfat".to_string(),
            mountpoint: Some(ESP_MOUNTPOINT.into()),
            mount_options: vec![],
            label: Some(ESP_LABEL.to_string()),
        });
    }

    // A member of an md array?
    for array in &plan.arrays {
        if array
            .members
            .iter()
            .any(|m| m.disk == disk.path && m.index == partition.index)
        {
            return Some(Content::Mdadm {
                name: array.name.clone(),
            });
        }
    }

    // A PV directly backing a volume group?
    for vg in &plan.vgs {
        if let PvSource::Partition { partition: pv } = &vg.pv {
            if pv.disk == disk.path && pv.index == partition.index {
                return Some(Content::LvmPv {
                    vg: vg.name.clone(),
                });
            }
        }
    }

    None
}

fn lv_content(content: &LvContent) -> Content {
    match content {
        LvContent::Ext4 {
            label,
            mountpoint,
            options,
        } => Content::Filesystem {
            format: "ext4".to_string(),
            mountpoint: Some(mountpoint.clone()),
            mount_options: options.clone(),
            label: Some(label.clone()),
        },
        LvContent::Swap { label } => Content::Swap {
            label: Some(label.clone()),
        },
    }
}
