use std::path::Path;

use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Closes an open crypt mapping.
pub fn close(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Closing crypt device '{}'", device.as_ref().display());

    Dependency::Cryptsetup
        .cmd()
        .arg("close")
        .arg(device.as_ref())
        .run_and_check()
}
