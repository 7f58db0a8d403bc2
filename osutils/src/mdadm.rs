use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, error, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    dependencies::{Dependency, DependencyError},
    lsblk,
};

/// Stops a RAID array.
pub fn stop(raid_array: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Stopping RAID array '{}'", raid_array.as_ref().display());

    if let Err(e) = Dependency::Mdadm
        .cmd()
        .arg("--stop")
        .arg(raid_array.as_ref())
        .run_and_check()
    {
        // If stop returns an error, do best effort to log what is holding the
        // block device
        if let Ok(Some(block_device)) = lsblk::try_get(raid_array.as_ref()) {
            error!(
                "Failed to stop '{}': active children: {:?}, active mount points: {:?}",
                raid_array.as_ref().display(),
                block_device.children,
                block_device.mountpoints
            );
        }

        return Err(e);
    }

    Ok(())
}

/// Erases the md superblock from a former member device so the kernel will
/// not re-assemble it.
pub fn zero_superblock(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!(
        "Zeroing md superblock on '{}'",
        device.as_ref().display()
    );

    Dependency::Mdadm
        .cmd()
        .arg("--zero-superblock")
        .arg(device.as_ref())
        .run_and_check()
}

#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq, Default)]
pub struct MdadmDetail {
    pub raid_path: PathBuf,
    pub level: String,
    pub uuid: String,
    pub devices: Vec<PathBuf>,
}

/// Details for all assembled RAID arrays.
pub fn details() -> Result<Vec<MdadmDetail>, Error> {
    debug!("Getting details for all RAID arrays");

    let output = Dependency::Mdadm
        .cmd()
        .arg("--detail")
        .arg("--scan")
        .arg("--verbose")
        .output_and_check()
        .context("Failed to run mdadm detail")?;

    parse_detail_output(&output).context("Failed to parse mdadm detail")
}

pub fn parse_detail_output(mdadm_output: &str) -> Result<Vec<MdadmDetail>, Error> {
    let mut mdadm_details = Vec::new();

    let array_regex = Regex::new(r"ARRAY\s+(/dev/\S+)").unwrap();
    let level_regex = Regex::new(r"(?:^|\s)level=(\w+)").unwrap();
    let uuid_regex = Regex::new(r"(?:^|\s)UUID=([\da-zA-Z:]+)").unwrap();
    let devices_regex = Regex::new(r"(?:^|\s)devices=([^=]+)").unwrap();

    let mut current = MdadmDetail::default();

    for line in mdadm_output.lines() {
        if let Some(captures) = array_regex.captures(line) {
            current.raid_path = PathBuf::from(
                captures
                    .get(1)
                    .context("Failed to parse RAID path from details")?
                    .as_str(),
            );
        }
        if let Some(captures) = level_regex.captures(line) {
            current.level = captures
                .get(1)
                .context("Failed to parse RAID level from details")?
                .as_str()
                .to_string();
        }
        if let Some(captures) = uuid_regex.captures(line) {
            current.uuid = captures
                .get(1)
                .context("Failed to parse RAID UUID from details")?
                .as_str()
                .to_string();
        }
        if let Some(captures) = devices_regex.captures(line) {
            current.devices = captures
                .get(1)
                .context("Failed to parse RAID devices from details")?
                .as_str()
                .split(',')
                .map(|d| PathBuf::from(d.trim()))
                .collect();

            mdadm_details.push(current.clone());
            current = MdadmDetail::default();
        }
    }

    Ok(mdadm_details)
}
