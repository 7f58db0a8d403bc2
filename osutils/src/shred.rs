use std::path::Path;

use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Overwrites the device with one random pass followed by zeros. This can run
/// for hours on large rotational media.
pub fn run(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Shredding '{}'", device.as_ref().display());

    Dependency::Shred
        .cmd()
        .arg("--iterations=1")
        .arg("--zero")
        .arg(device.as_ref())
        .run_and_check()
}
