use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::info;
use serde::{Deserialize, Serialize};

use crate::dependencies::{Dependency, DependencyError};

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
struct LosetupOutput {
    #[serde(default)]
    loopdevices: Vec<LoopDevice>,
}

/// A loop device as reported by `losetup --list --json`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LoopDevice {
    pub name: PathBuf,

    /// File the loop device is backed by; absent for detached devices
    #[serde(default, rename = "back-file")]
    pub backing_file: Option<PathBuf>,

    #[serde(default, rename = "sizelimit")]
    pub size_limit: Option<u64>,
}

/// Lists all configured loop devices.
pub fn list() -> Result<Vec<LoopDevice>, Error> {
    let output = Dependency::Losetup
        .cmd()
        .arg("--list")
        .arg("--json")
        .output_and_check()
        .context("Failed to execute losetup")?;

    parse_losetup_output(&output)
}

/// Detaches a loop device from its backing file.
pub fn detach(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Detaching loop device '{}'", device.as_ref().display());

    Dependency::Losetup
        .cmd()
        .arg("-d")
        .arg(device.as_ref())
        .run_and_check()
}

pub fn parse_losetup_output(output: &str) -> Result<Vec<LoopDevice>, Error> {
    // losetup prints nothing at all when no loop devices exist
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parsed: LosetupOutput =
        serde_json::from_str(output).context("Failed to parse losetup output")?;

    Ok(parsed.loopdevices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_losetup_output() {
        let output = indoc::indoc! {r#"
            {
                "loopdevices": [
                    {"name": "/dev/loop0", "sizelimit": 0, "back-file": "/var/lib/images/root.img"},
                    {"name": "/dev/loop1", "sizelimit": 0, "back-file": null}
                ]
            }
        "#};

        let loops = parse_losetup_output(output).unwrap();
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[0].name, PathBuf::from("/dev/loop0"));
        assert_eq!(
            loops[0].backing_file,
            Some(PathBuf::from("/var/lib/images/root.img"))
        );
        assert_eq!(loops[1].backing_file, None);
    }

    #[test]
    fn test_parse_losetup_output_empty() {
        assert!(parse_losetup_output("").unwrap().is_empty());
        assert!(parse_losetup_output("\n").unwrap().is_empty());
        parse_losetup_output("not json").unwrap_err();
    }
}
