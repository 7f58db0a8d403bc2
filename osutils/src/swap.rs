use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{Dependency, DependencyError};

/// Disables a swap space.
pub fn swapoff(device: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Disabling swap on '{}'", device.as_ref().display());

    Dependency::Swapoff
        .cmd()
        .arg(device.as_ref())
        .run_and_check()
}

/// An active swap space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapSpace {
    pub name: PathBuf,
    pub swap_type: String,
    pub size: u64,
    pub priority: i32,
}

impl SwapSpace {
    /// Reads the active swap spaces from `swapon --show`.
    pub fn read() -> Result<Vec<SwapSpace>, Error> {
        let output = Dependency::Swapon
            .cmd()
            .arg("--show=NAME,TYPE,SIZE,PRIO")
            .arg("--raw")
            .arg("--bytes")
            .arg("--noheadings")
            .output_and_check()
            .context("Failed to execute swapon")?;

        parse_swapon_output(&output)
    }

    fn from_line(line: &str) -> Result<SwapSpace, Error> {
        let mut parts = line.split_whitespace();
        let name = parts
            .next()
            .context("Failed to parse swap space name")?
            .into();

        let swap_type = parts
            .next()
            .context("Failed to parse swap space type")?
            .to_string();

        let size = parts
            .next()
            .context("Failed to parse swap space size")?
            .parse::<u64>()
            .context("Swap space size is not an integer")?;

        let priority = parts
            .next()
            .context("Failed to parse swap space priority")?
            .parse::<i32>()
            .context("Swap space priority is not an integer")?;

        Ok(SwapSpace {
            name,
            swap_type,
            size,
            priority,
        })
    }
}

pub fn parse_swapon_output(output: &str) -> Result<Vec<SwapSpace>, Error> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            SwapSpace::from_line(line)
                .with_context(|| format!("Failed to parse swap space line: {line}"))
        })
        .collect()
}
