use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Error};
use procfs::Current;

use drydock_api::{config::HostConfig, constants};

pub mod apply;
pub mod cleanup;
pub mod detect;
pub mod inventory;
pub mod planner;
pub mod render;
pub mod storage_graph;

/// Everything the engine entrypoints need from the outside world, threaded
/// explicitly instead of living in module-level state. RAM is probed once at
/// construction so the planner stays a pure function of its inputs.
pub struct Environment {
    pub config: HostConfig,

    /// Directory for the plan, the rendered file, and the status record
    pub state_dir: PathBuf,

    /// Where the formatter mounts the target tree
    pub mount_root: PathBuf,

    /// Installed RAM; drives `swap_size: auto`
    pub ram_bytes: u64,

    cancel: AtomicBool,
}

impl Environment {
    /// Builds an environment with default paths, probing system facts.
    pub fn new(config: HostConfig) -> Result<Self, Error> {
        let meminfo = procfs::Meminfo::current().context("Failed to read /proc/meminfo")?;

        Ok(Self::with_facts(
            config,
            constants::DEFAULT_STATE_DIR.into(),
            constants::DEFAULT_MOUNT_ROOT.into(),
            meminfo.mem_total,
        ))
    }

    /// Builds an environment from explicit facts.
    pub fn with_facts(
        config: HostConfig,
        state_dir: PathBuf,
        mount_root: PathBuf,
        ram_bytes: u64,
    ) -> Self {
        Environment {
            config,
            state_dir,
            mount_root,
            ram_bytes,
            cancel: AtomicBool::new(false),
        }
    }

    pub fn plan_path(&self) -> PathBuf {
        self.state_dir.join(constants::PLAN_FILENAME)
    }

    pub fn rendered_path(&self) -> PathBuf {
        self.state_dir.join(constants::RENDERED_FILENAME)
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join(constants::STATUS_FILENAME)
    }

    pub fn cleanup_report_path(&self) -> PathBuf {
        self.state_dir.join(constants::CLEANUP_REPORT_FILENAME)
    }

    /// Requests cooperative cancellation. The applier honors it between
    /// external commands; a command already in flight keeps running.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Environment over a temporary state directory with fixed facts, for
    /// deterministic planner and applier tests.
    pub fn test_environment(config: HostConfig, ram_bytes: u64) -> (Environment, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::with_facts(
            config,
            dir.path().join("state"),
            PathBuf::from("/mnt"),
            ram_bytes,
        );
        (env, dir)
    }
}
