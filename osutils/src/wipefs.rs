use std::path::Path;

use crate::dependencies::{Dependency, DependencyError};

/// Erases all filesystem, RAID, and partition-table signatures from a device
/// (`wipefs --all --force`).
pub fn all(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    Dependency::Wipefs
        .cmd()
        .arg("--all")
        .arg("--force")
        .arg(device.as_ref())
        .run_and_check()
}
