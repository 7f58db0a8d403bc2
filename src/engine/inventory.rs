use std::path::{Path, PathBuf};

use log::{debug, warn};

use drydock_api::{error::InventoryError, plan::BusType};
use osutils::lsblk::{self, BlockDevice, BlockDeviceType};

/// The set of candidate disks for planning, produced once per pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub disks: Vec<Disk>,
}

/// A physical disk eligible for provisioning. Attributes whose probe failed
/// are `None` and the disk stays eligible.
#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub path: PathBuf,
    pub size: u64,
    pub rotational: bool,
    pub bus: BusType,
    pub logical_sector_size: Option<u64>,
    pub physical_sector_size: Option<u64>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,

    /// Any filesystem, RAID, LVM, or partition-table signature anywhere on
    /// the disk
    pub has_signature: bool,
}

/// Enumerates the block devices and distills the candidate disks.
pub fn inventory() -> Result<Inventory, InventoryError> {
    let devices = lsblk::list().map_err(|e| InventoryError::EnumerationFailed {
        detail: format!("{e:#}"),
    })?;

    build(&devices)
}

/// Pure distillation step over an already-fetched device tree.
pub fn build(devices: &[BlockDevice]) -> Result<Inventory, InventoryError> {
    if devices.is_empty() {
        return Err(InventoryError::NoBlockDevices);
    }

    let mut disks = Vec::new();
    for device in devices {
        if device.blkdev_type != BlockDeviceType::Disk {
            continue;
        }
        if device.removable || device.readonly {
            debug!(
                "Skipping removable or read-only device '{}'",
                device.name.display()
            );
            continue;
        }
        if is_ignored_family(&device.name) {
            debug!("Skipping ignored device family '{}'", device.name.display());
            continue;
        }
        if hosts_boot_medium(device) {
            warn!(
                "Skipping '{}': it hosts the running system",
                device.name.display()
            );
            continue;
        }
        if device.size == 0 {
            warn!("Skipping '{}': zero reported size", device.name.display());
            continue;
        }

        disks.push(Disk {
            path: device.name.clone(),
            size: device.size,
            rotational: device.rotational,
            bus: BusType::from_transport(device.transport.as_deref()),
            logical_sector_size: device.logical_sector_size,
            physical_sector_size: device.physical_sector_size,
            vendor: device.vendor.as_deref().map(|s| s.trim().to_string()),
            model: device.model.as_deref().map(|s| s.trim().to_string()),
            serial: device.serial.as_deref().map(|s| s.trim().to_string()),
            has_signature: device.has_signature_recursive(),
        });
    }

    disks.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Inventory { disks })
}

/// Device families that are never provisioning targets: loop and RAM disks,
/// floppies, optical media, device-mapper leaves, zram, and assembled md
/// devices (those are torn down, not planned over).
fn is_ignored_family(path: &Path) -> bool {
    const IGNORED_PREFIXES: [&str; 7] = ["loop", "ram", "fd", "sr", "dm-", "zram", "md"];

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };

    IGNORED_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// True when any filesystem in the device's subtree is a mountpoint of the
/// running system, which marks the active boot medium.
fn hosts_boot_medium(device: &BlockDevice) -> bool {
    device.all_mountpoints_recursive().iter().any(|mp| {
        *mp == Path::new("/")
            || *mp == Path::new("/boot")
            || *mp == Path::new("/boot/efi")
            || mp.starts_with("/run/initramfs")
    })
}
