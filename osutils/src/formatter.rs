use std::path::Path;

use anyhow::{Context, Error};
use log::{debug, info};

use crate::dependencies::{Command, DependencyError};

/// Driver for the external declarative disk formatter (disko or a
/// work-alike). The tool's command surface differs across releases, so the
/// supported invocation is probed once from `--help` before the first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatterCapabilities {
    /// Accepts the combined `--mode destroy,format,mount` invocation
    pub combined_mode: bool,

    /// Requires `--yes-wipe-all-disks` to acknowledge destruction
    pub wipe_acknowledgement: bool,
}

impl FormatterCapabilities {
    /// Probes the formatter binary once. `--help` is executed and its output
    /// searched; a non-zero exit still produces usable help text for some
    /// releases, so only a spawn failure is an error.
    pub fn probe(formatter_cmd: &str) -> Result<Self, Error> {
        let output = Command::external(formatter_cmd)
            .with_arg("--help")
            .output()
            .with_context(|| format!("Failed to probe formatter '{formatter_cmd}'"))?;

        let help_text = format!("{}{}", output.output(), output.error_output());
        let capabilities = Self::from_help_text(&help_text);

        debug!("Formatter '{formatter_cmd}' capabilities: {capabilities:?}");

        Ok(capabilities)
    }

    pub fn from_help_text(help_text: &str) -> Self {
        FormatterCapabilities {
            combined_mode: help_text.contains("destroy,format,mount"),
            wipe_acknowledgement: help_text.contains("--yes-wipe-all-disks"),
        }
    }
}

/// Runs the formatter in destroy+format+mount mode against a rendered
/// declarative file, with every filesystem mounted under `mount_root`.
pub fn run(
    formatter_cmd: &str,
    capabilities: FormatterCapabilities,
    rendered_file: &Path,
    mount_root: &Path,
) -> Result<(), Box<DependencyError>> {
    info!(
        "Invoking formatter '{formatter_cmd}' on '{}'",
        rendered_file.display()
    );

    let mut command = Command::external(formatter_cmd);

    if capabilities.combined_mode {
        command.arg("--mode").arg("destroy,format,mount");
        if capabilities.wipe_acknowledgement {
            command.arg("--yes-wipe-all-disks");
        }
    } else {
        command.arg("--mode").arg("disko");
    }

    command
        .arg("--root-mountpoint")
        .arg(mount_root)
        .arg(rendered_file)
        .run_and_check()
}
