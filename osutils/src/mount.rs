use std::path::Path;

use log::{info, warn};

use crate::dependencies::{Dependency, DependencyError};

/// Unmounts a filesystem. Tries a graceful unmount first and falls back to a
/// forced one when that fails.
pub fn umount(target: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Unmounting '{}'", target.as_ref().display());

    if let Err(e) = Dependency::Umount
        .cmd()
        .arg(target.as_ref())
        .run_and_check()
    {
        warn!(
            "Graceful unmount of '{}' failed ({}), retrying with --force",
            target.as_ref().display(),
            e.stderr_tail(1),
        );

        return umount_force(target);
    }

    Ok(())
}

/// Forcibly unmounts a filesystem.
pub fn umount_force(target: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    Dependency::Umount
        .cmd()
        .arg("--force")
        .arg(target.as_ref())
        .run_and_check()
}
