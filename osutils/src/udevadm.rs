use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Waits for the udev event queue to drain so device nodes reflect the latest
/// kernel state.
pub fn settle() -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .arg("settle")
        .run_and_check()
        .context("Failed to settle udev")
}

/// Requests udev to replay device events, repopulating nodes and symlinks
/// after partition tables changed underneath it.
pub fn trigger() -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .arg("trigger")
        .run_and_check()
        .context("Failed to trigger udev")
}
