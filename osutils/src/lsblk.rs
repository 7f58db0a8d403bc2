use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};

use crate::dependencies::Dependency;

/// Mountpoint lsblk reports for active swap space.
pub const SWAP_MOUNTPOINT: &str = "[SWAP]";

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

/// A block device as returned by `lsblk --json --paths --output-all --bytes`.
/// See `man lsblk` for the column descriptions. Unknown columns are ignored so
/// the parser works across util-linux releases.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlockDevice {
    /// Device name; a full path because the listing runs with `--paths`
    pub name: PathBuf,

    /// Filesystem type
    pub fstype: Option<String>,

    /// Filesystem label
    pub label: Option<String>,

    /// Partition table type (gpt, dos, ...)
    #[serde(default)]
    pub pttype: Option<String>,

    /// Partition type GUID
    #[serde(default)]
    pub parttype: Option<String>,

    /// Size of the device in bytes
    #[serde(default)]
    pub size: u64,

    /// Rotational device flag
    #[serde(default, rename = "rota")]
    pub rotational: bool,

    /// Removable device flag
    #[serde(default, rename = "rm")]
    pub removable: bool,

    /// Read-only device flag
    #[serde(default, rename = "ro")]
    pub readonly: bool,

    /// Device transport (nvme, sata, virtio, usb, ...)
    #[serde(default, rename = "tran")]
    pub transport: Option<String>,

    /// Logical sector size; absent when the probe failed
    #[serde(default, rename = "log-sec")]
    pub logical_sector_size: Option<u64>,

    /// Physical sector size; absent when the probe failed
    #[serde(default, rename = "phy-sec")]
    pub physical_sector_size: Option<u64>,

    /// Device vendor
    #[serde(default)]
    pub vendor: Option<String>,

    /// Device model
    #[serde(default)]
    pub model: Option<String>,

    /// Device serial number
    #[serde(default)]
    pub serial: Option<String>,

    /// Internal parent kernel device name
    #[serde(default, rename = "pkname")]
    pub parent_kernel_name: Option<PathBuf>,

    /// Where the device is mounted
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,

    /// All locations where the device is mounted
    #[serde(default, deserialize_with = "skip_nulls")]
    pub mountpoints: Vec<PathBuf>,

    /// Device type
    #[serde(default, rename = "type")]
    pub blkdev_type: BlockDeviceType,

    /// List of children devices
    ///
    /// Not a column, only present with --json. Contains all children devices
    /// (e.g. partitions of a disk device).
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Gets a list of all mountpoints for this device and its children.
    pub fn all_mountpoints_recursive(&self) -> Vec<&Path> {
        self.mountpoints
            .iter()
            .map(|p| p.as_path())
            .chain(
                self.children
                    .iter()
                    .flat_map(|ch| ch.all_mountpoints_recursive()),
            )
            .collect()
    }

    /// True when the device or anything under it carries a filesystem, RAID,
    /// or partition-table signature.
    pub fn has_signature_recursive(&self) -> bool {
        self.fstype.is_some()
            || self.pttype.is_some()
            || self.children.iter().any(|ch| ch.has_signature_recursive())
    }

    /// True when the device is an active swap space.
    pub fn is_active_swap(&self) -> bool {
        self.mountpoint.as_deref() == Some(Path::new(SWAP_MOUNTPOINT))
    }

    /// Finds the first device (self or descendant) carrying the given
    /// filesystem label.
    pub fn find_by_label(&self, label: &str) -> Option<&BlockDevice> {
        if self.label.as_deref() == Some(label) {
            return Some(self);
        }
        self.children.iter().find_map(|ch| ch.find_by_label(label))
    }
}

/// Device types returned by lsblk that this tool distinguishes. RAID devices
/// report their level ("raid0", "raid1", ...), which all map to `Raid`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceType {
    Disk,
    #[serde(alias = "part")]
    Partition,
    Lvm,
    Crypt,
    Dm,
    Mpath,
    Loop,
    Rom,
    #[serde(
        alias = "raid0",
        alias = "raid1",
        alias = "raid4",
        alias = "raid5",
        alias = "raid6",
        alias = "raid10",
        alias = "linear"
    )]
    Raid,

    #[default]
    #[serde(other)]
    Unknown,
}

/// Returns the tree of all block devices on the system.
pub fn list() -> Result<Vec<BlockDevice>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .arg("--json")
        .arg("--paths")
        .arg("--output-all")
        .arg("--bytes")
        .output_and_check()
        .context("Failed to execute lsblk")?;

    parse_lsblk_output(result.as_str())
}

/// Retrieves information for a specific block device, if it exists.
pub fn try_get(device_path: impl AsRef<Path>) -> Result<Option<BlockDevice>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .arg("--json")
        .arg("--paths")
        .arg("--output-all")
        .arg("--bytes")
        .arg(device_path.as_ref())
        .output_and_check()
        .context("Failed to execute lsblk")?;

    let parsed =
        parse_lsblk_output(result.as_str()).context("Failed to parse output from lsblk")?;

    if parsed.len() > 1 {
        bail!(
            "Unexpected number of block devices returned for device '{}': {}",
            device_path.as_ref().display(),
            parsed.len()
        );
    }

    Ok(parsed.into_iter().next())
}

/// Retrieves information about a specific block device. Fails when the device
/// does not exist.
pub fn get(device_path: impl AsRef<Path>) -> Result<BlockDevice, Error> {
    try_get(device_path.as_ref())
        .with_context(|| {
            format!(
                "Failed to get block device information for '{}'",
                device_path.as_ref().display()
            )
        })?
        .with_context(|| {
            format!(
                "No block device found at '{}'",
                device_path.as_ref().display()
            )
        })
}

/// Finds all block devices (and their children) matching a predicate. Each
/// device appears at most once even when the tree repeats it.
pub fn find(predicate: impl Fn(&BlockDevice) -> bool) -> Result<Vec<BlockDevice>, Error> {
    let block_devices = list().context("Failed to list block devices")?;
    Ok(find_in(&block_devices, &predicate))
}

/// Predicate search over an already-fetched device tree.
pub fn find_in(
    block_devices: &[BlockDevice],
    predicate: &impl Fn(&BlockDevice) -> bool,
) -> Vec<BlockDevice> {
    let mut seen = HashSet::new();
    let mut matching = Vec::new();
    find_recursive(block_devices, predicate, &mut seen, &mut matching);
    matching
}

fn find_recursive(
    block_devices: &[BlockDevice],
    predicate: &impl Fn(&BlockDevice) -> bool,
    seen: &mut HashSet<PathBuf>,
    matching: &mut Vec<BlockDevice>,
) {
    for block_device in block_devices {
        if predicate(block_device) && seen.insert(block_device.name.clone()) {
            matching.push(block_device.clone());
        }

        find_recursive(&block_device.children, predicate, seen, matching);
    }
}

pub fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    Ok(parsed.blockdevices)
}

fn skip_nulls<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    let v: Vec<Option<T>> = serde::Deserialize::deserialize(deserializer)?;
    Ok(v.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Trimmed from `lsblk --json --paths --output-all --bytes` on a VM with
    /// one SATA disk carrying an ESP and a root partition.
    const SAMPLE_LSBLK_OUTPUT: &str = indoc::indoc! {r#"
        {
            "blockdevices": [
                {
                    "name": "/dev/sda",
                    "fstype": null,
                    "label": null,
                    "pttype": "gpt",
                    "parttype": null,
                    "mountpoint": null,
                    "mountpoints": [ null ],
                    "rm": false,
                    "ro": false,
                    "rota": true,
                    "tran": "sata",
                    "log-sec": 512,
                    "phy-sec": 512,
                    "vendor": "ATA     ",
                    "model": "QEMU HARDDISK",
                    "serial": "QM00001",
                    "size": 17179869184,
                    "type": "disk",
                    "pkname": null,
                    "children": [
                        {
                            "name": "/dev/sda1",
                            "fstype": "vfat",
                            "label": "EFI",
                            "pttype": null,
                            "parttype": "c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
                            "mountpoint": "/boot/efi",
                            "mountpoints": [ "/boot/efi" ],
                            "rm": false,
                            "ro": false,
                            "rota": true,
                            "tran": null,
                            "log-sec": 512,
                            "phy-sec": 512,
                            "vendor": null,
                            "model": null,
                            "serial": null,
                            "size": 1073741824,
                            "type": "part",
                            "pkname": "/dev/sda"
                        },
                        {
                            "name": "/dev/sda2",
                            "fstype": "ext4",
                            "label": "slash",
                            "pttype": null,
                            "parttype": "0fc63daf-8483-4772-8e79-3d69d8477de4",
                            "mountpoint": "/",
                            "mountpoints": [ "/" ],
                            "rm": false,
                            "ro": false,
                            "rota": true,
                            "tran": null,
                            "log-sec": 512,
                            "phy-sec": 512,
                            "vendor": null,
                            "model": null,
                            "serial": null,
                            "size": 16104357888,
                            "type": "part",
                            "pkname": "/dev/sda"
                        }
                    ]
                }
            ]
        }
    "#};

    #[test]
    fn test_parse_lsblk_output() {
        let parsed = parse_lsblk_output(SAMPLE_LSBLK_OUTPUT).unwrap();
        assert_eq!(parsed.len(), 1);

        let disk = &parsed[0];
        assert_eq!(disk.name, PathBuf::from("/dev/sda"));
        assert_eq!(disk.blkdev_type, BlockDeviceType::Disk);
        assert_eq!(disk.size, 17179869184);
        assert!(disk.rotational);
        assert!(!disk.removable);
        assert_eq!(disk.transport.as_deref(), Some("sata"));
        assert_eq!(disk.serial.as_deref(), Some("QM00001"));
        assert_eq!(disk.logical_sector_size, Some(512));
        assert_eq!(disk.children.len(), 2);

        let esp = &disk.children[0];
        assert_eq!(esp.blkdev_type, BlockDeviceType::Partition);
        assert_eq!(esp.fstype.as_deref(), Some("vfat"));
        assert_eq!(esp.label.as_deref(), Some("EFI"));
        assert_eq!(esp.parent_kernel_name, Some(PathBuf::from("/dev/sda")));

        parse_lsblk_output("bad output").unwrap_err();
    }

    #[test]
    fn test_raid_and_unknown_types() {
        let output = indoc::indoc! {r#"
            {
                "blockdevices": [
                    { "name": "/dev/md127", "size": 1024, "type": "raid1" },
                    { "name": "/dev/sr0", "size": 1024, "type": "rom" },
                    { "name": "/dev/weird0", "size": 1024, "type": "printer" }
                ]
            }
        "#};

        let parsed = parse_lsblk_output(output).unwrap();
        assert_eq!(parsed[0].blkdev_type, BlockDeviceType::Raid);
        assert_eq!(parsed[1].blkdev_type, BlockDeviceType::Rom);
        assert_eq!(parsed[2].blkdev_type, BlockDeviceType::Unknown);
    }

    #[test]
    fn test_signature_and_mountpoint_helpers() {
        let parsed = parse_lsblk_output(SAMPLE_LSBLK_OUTPUT).unwrap();
        let disk = &parsed[0];

        assert!(disk.has_signature_recursive());
        assert!(!disk.is_active_swap());

        let mountpoints = disk.all_mountpoints_recursive();
        assert_eq!(mountpoints.len(), 2);
        assert!(mountpoints.contains(&Path::new("/boot/efi")));
        assert!(mountpoints.contains(&Path::new("/")));

        let slash = disk.find_by_label("slash").unwrap();
        assert_eq!(slash.name, PathBuf::from("/dev/sda2"));
        assert!(disk.find_by_label("nope").is_none());

        let bare = BlockDevice {
            name: "/dev/sdb".into(),
            size: 1024,
            blkdev_type: BlockDeviceType::Disk,
            ..Default::default()
        };
        assert!(!bare.has_signature_recursive());
    }

    #[test]
    fn test_find_in_no_duplicates() {
        let devices = vec![
            BlockDevice {
                name: "/dev/sda".into(),
                children: vec![BlockDevice {
                    name: "/dev/sda1".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            BlockDevice {
                name: "/dev/sda".into(),
                ..Default::default()
            },
        ];

        let matching = find_in(&devices, &|d: &BlockDevice| {
            d.name == PathBuf::from("/dev/sda")
        });
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn test_active_swap() {
        let output = indoc::indoc! {r#"
            {
                "blockdevices": [
                    { "name": "/dev/dm-3", "size": 1024, "type": "lvm", "mountpoint": "[SWAP]" }
                ]
            }
        "#};

        let parsed = parse_lsblk_output(output).unwrap();
        assert!(parsed[0].is_active_swap());
    }
}
