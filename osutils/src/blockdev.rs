use std::path::Path;

use crate::dependencies::{Dependency, DependencyError};

/// Asks the kernel to re-read the partition table of a device.
pub fn rereadpt(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    Dependency::Blockdev
        .cmd()
        .arg("--rereadpt")
        .arg(device.as_ref())
        .run_and_check()
}
