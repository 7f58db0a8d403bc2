use std::path::Path;

use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Removes a device-mapper mapping.
pub fn remove(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!(
        "Removing device-mapper device '{}'",
        device.as_ref().display()
    );

    Dependency::Dmsetup
        .cmd()
        .arg("remove")
        .arg(device.as_ref())
        .run_and_check()
}
