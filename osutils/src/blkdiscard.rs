use std::path::Path;

use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Discards the whole device. Only meaningful for SSDs.
pub fn run(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Discarding '{}'", device.as_ref().display());

    Dependency::Blkdiscard
        .cmd()
        .arg("--force")
        .arg(device.as_ref())
        .run_and_check()
}
