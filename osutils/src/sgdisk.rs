use std::path::Path;

use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Destroys the primary and backup GPT headers along with any protective MBR
/// (`sgdisk --zap-all`).
pub fn zap_all(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!(
        "Zapping partition tables on '{}'",
        device.as_ref().display()
    );

    Dependency::Sgdisk
        .cmd()
        .arg("--zap-all")
        .arg(device.as_ref())
        .run_and_check()
}
