use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::primitives::bytes::ByteCount;

/// Disk enumeration failed outright. Per-attribute probe failures are not
/// errors; they degrade the attribute to unknown.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryError {
    #[error("No block devices were found on the system")]
    NoBlockDevices,

    #[error("Failed to enumerate block devices: {detail}")]
    EnumerationFailed { detail: String },
}

/// The planner could not produce a valid plan. The planner is pure and
/// total: every refusal is one of these.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PlanError {
    #[error("No eligible disks remained after exclusions")]
    NoEligibleDisks,

    #[error("Capacity {available} of volume group 'main' cannot hold the {required} root volume")]
    InsufficientCapacityForRoot {
        required: ByteCount,
        available: ByteCount,
    },

    #[error("Configuration conflict: {detail}")]
    ConfigConflict { detail: String },
}

/// An apply attempt failed. The status record derives its DETAIL from the
/// variant via [`ApplyError::detail`].
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Failed to write plan artifacts: {detail}")]
    RenderFailed { detail: String },

    #[error("Failed to inspect live storage state: {detail}")]
    DetectionFailed { detail: String },

    #[error("Formatter exited unsuccessfully (exit {exit:?}): {stderr_tail}")]
    FormatterFailed {
        exit: Option<i32>,
        stderr_tail: String,
    },

    #[error("Post-apply command '{command}' failed with exit {exit:?}")]
    PostApplyFailed { command: String, exit: Option<i32> },

    #[error("Failed to write status record: {detail}")]
    StatusWriteFailed { detail: String },

    #[error("Apply was cancelled between commands")]
    Cancelled,
}

impl ApplyError {
    /// DETAIL token recorded in the status file for this failure.
    pub fn detail(&self) -> String {
        match self {
            ApplyError::Inventory(InventoryError::NoBlockDevices) => "no-disks".to_string(),
            ApplyError::Inventory(_) | ApplyError::DetectionFailed { .. } => {
                "detection-error".to_string()
            }
            ApplyError::Plan(e) => format!("plan-error-{}", <&str>::from(e)),
            ApplyError::RenderFailed { .. } => "render-error".to_string(),
            ApplyError::FormatterFailed { exit, .. } => match exit {
                Some(code) => format!("formatter-exit-{code}"),
                None => "formatter-killed".to_string(),
            },
            ApplyError::PostApplyFailed { .. } => "post-apply-error".to_string(),
            ApplyError::StatusWriteFailed { .. } => "status-write-error".to_string(),
            ApplyError::Cancelled => "cancelled".to_string(),
        }
    }
}
