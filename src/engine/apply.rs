use std::path::PathBuf;

use log::{debug, info, warn};
use strum_macros::Display;

use drydock_api::{
    constants::ESP_LABEL,
    error::ApplyError,
    plan::{LvContent, Plan},
    status::{detail, ApplyOutcome, ProvisionState, StatusRecord},
};
use osutils::{
    dependencies::Command,
    files,
    formatter::{self, FormatterCapabilities},
    lsblk::{self, BlockDevice},
    swap::SwapSpace,
    udevadm,
};

use crate::engine::{
    cleanup::{cleanup, CleanupMode, CleanupReport},
    Environment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum ApplyState {
    Ready,
    RenderingPlan,
    PreCleanup,
    Formatting,
    PostFailureCleanup,
    PostApply,
    AppliedSuccess,
    AppliedFailed,
}

/// Makes the live system match the plan: render, pre-apply cleanup, external
/// formatter (with one full-cleanup retry), post-apply commands, status
/// record. Re-entrant: a system already matching the plan skips the
/// destructive steps entirely. The status record is written on every exit
/// path and is the authoritative outcome.
pub fn apply(env: &Environment, plan: &Plan) -> Result<ApplyOutcome, ApplyError> {
    match run(env, plan) {
        Ok(outcome) => {
            write_status(env, &StatusRecord::new(outcome.state, outcome.detail.clone()))?;
            info!("Apply finished: {} ({})", outcome.state, outcome.detail);
            Ok(outcome)
        }
        Err(e) => {
            let record = StatusRecord::new(ProvisionState::Failed, failure_detail(env, &e));
            if let Err(status_err) = write_status(env, &record) {
                warn!("Could not write the failure status record: {status_err}");
            }
            Err(e)
        }
    }
}

fn run(env: &Environment, plan: &Plan) -> Result<ApplyOutcome, ApplyError> {
    let mut state = ApplyState::Ready;

    check_cancel(env)?;
    advance(&mut state, ApplyState::RenderingPlan);
    persist_plan_artifacts(env, plan)?;

    match system_matches_plan(plan)? {
        true => {
            info!("Live storage already matches the plan; skipping formatting");
            advance(&mut state, ApplyState::PostApply);
            verify_applied(env, plan);
            advance(&mut state, ApplyState::AppliedSuccess);
            return Ok(ApplyOutcome {
                state: ProvisionState::Applied,
                detail: detail::EXISTING_STORAGE.to_string(),
            });
        }
        false => debug!("Live storage does not match the plan; provisioning"),
    }

    let roots = plan.disk_paths();
    let flagged = plan.flagged_disk_paths();
    if !flagged.is_empty() {
        info!(
            "{} disk(s) carry foreign signatures and will be wiped: {flagged:?}",
            flagged.len()
        );
    }

    check_cancel(env)?;
    advance(&mut state, ApplyState::PreCleanup);
    let report = run_cleanup(env, &roots)?;
    if !report.is_success() {
        warn!(
            "Pre-apply cleanup left {} step(s) failed; attempting to format anyway",
            report.failures()
        );
    }

    check_cancel(env)?;
    advance(&mut state, ApplyState::Formatting);
    let capabilities = FormatterCapabilities::probe(&env.config.formatter_cmd).map_err(|e| {
        ApplyError::FormatterFailed {
            exit: None,
            stderr_tail: format!("{e:#}"),
        }
    })?;

    let rendered_path = env.rendered_path();
    let first_attempt = formatter::run(
        &env.config.formatter_cmd,
        capabilities,
        &rendered_path,
        &env.mount_root,
    );

    if let Err(first_error) = first_attempt {
        warn!(
            "Formatter failed (exit {:?}); running full-graph cleanup and retrying once",
            first_error.exit_code()
        );

        check_cancel(env)?;
        advance(&mut state, ApplyState::PostFailureCleanup);
        run_cleanup(env, &roots)?;

        check_cancel(env)?;
        advance(&mut state, ApplyState::Formatting);
        formatter::run(
            &env.config.formatter_cmd,
            capabilities,
            &rendered_path,
            &env.mount_root,
        )
        .map_err(|e| {
            advance(&mut state, ApplyState::AppliedFailed);
            ApplyError::FormatterFailed {
                exit: e.exit_code(),
                stderr_tail: e.stderr_tail(6),
            }
        })?;
    }

    check_cancel(env)?;
    advance(&mut state, ApplyState::PostApply);
    if let Err(e) = udevadm::settle() {
        debug!("udev settle after formatting failed: {e:#}");
    }
    run_post_apply_commands(plan)?;
    verify_applied(env, plan);

    advance(&mut state, ApplyState::AppliedSuccess);
    Ok(ApplyOutcome {
        state: ProvisionState::Applied,
        detail: detail::AUTO_APPLIED.to_string(),
    })
}

fn advance(state: &mut ApplyState, next: ApplyState) {
    debug!("Apply state: {state} -> {next}");
    *state = next;
}

fn check_cancel(env: &Environment) -> Result<(), ApplyError> {
    if env.cancel_requested() {
        warn!("Apply cancelled between commands");
        return Err(ApplyError::Cancelled);
    }
    Ok(())
}

/// Persists the canonical plan JSON and the rendered declarative file.
pub fn persist_plan_artifacts(env: &Environment, plan: &Plan) -> Result<(), ApplyError> {
    let render_failed = |detail: String| ApplyError::RenderFailed { detail };

    let plan_json = plan
        .to_canonical_json()
        .map_err(|e| render_failed(e.to_string()))?;
    files::write_atomic(env.plan_path(), plan_json)
        .map_err(|e| render_failed(format!("{e:#}")))?;

    let rendered = plan
        .disko
        .to_canonical_json()
        .map_err(|e| render_failed(e.to_string()))?;
    files::write_atomic(env.rendered_path(), rendered)
        .map_err(|e| render_failed(format!("{e:#}")))?;

    debug!(
        "Persisted plan artifacts under '{}'",
        env.state_dir.display()
    );
    Ok(())
}

/// Writes the status record atomically.
pub fn write_status(env: &Environment, record: &StatusRecord) -> Result<(), ApplyError> {
    files::write_atomic(env.status_path(), record.render()).map_err(|e| {
        ApplyError::StatusWriteFailed {
            detail: format!("{e:#}"),
        }
    })
}

fn failure_detail(env: &Environment, error: &ApplyError) -> String {
    match error {
        ApplyError::FormatterFailed { .. } => format!(
            "{} (diagnostics: {})",
            error.detail(),
            env.state_dir.display()
        ),
        _ => error.detail(),
    }
}

fn run_cleanup(env: &Environment, roots: &[PathBuf]) -> Result<CleanupReport, ApplyError> {
    let report = cleanup(env, roots, CleanupMode::WipeSignatures).map_err(|e| {
        ApplyError::DetectionFailed {
            detail: format!("{e:#}"),
        }
    })?;

    // Keep the latest per-node outcomes around for post-mortem
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            if let Err(e) = files::write_atomic(env.cleanup_report_path(), json) {
                warn!("Could not persist the cleanup report: {e:#}");
            }
        }
        Err(e) => warn!("Could not serialize the cleanup report: {e}"),
    }

    Ok(report)
}

/// Filesystem labels the plan expects to find on a matching system.
pub fn expected_labels(plan: &Plan) -> Vec<String> {
    let mut labels = Vec::new();

    if plan
        .partitions
        .values()
        .flatten()
        .any(|p| p.typecode == drydock_api::constants::TYPECODE_ESP)
    {
        labels.push(ESP_LABEL.to_string());
    }

    for lv in &plan.lvs {
        match &lv.content {
            LvContent::Ext4 { label, .. } | LvContent::Swap { label } => {
                labels.push(label.clone())
            }
        }
    }

    labels
}

/// True when every expected label is present somewhere in the device tree.
pub fn labels_present(devices: &[BlockDevice], labels: &[String]) -> bool {
    labels
        .iter()
        .all(|label| devices.iter().any(|d| d.find_by_label(label).is_some()))
}

/// Compares the live system against the plan. Matching is by filesystem
/// labels; the follow-up verification covers mounts and swap.
fn system_matches_plan(plan: &Plan) -> Result<bool, ApplyError> {
    let devices = lsblk::list().map_err(|e| ApplyError::DetectionFailed {
        detail: format!("{e:#}"),
    })?;

    Ok(labels_present(&devices, &expected_labels(plan)))
}

/// Post-apply idempotency checks: every planned filesystem mounted under the
/// mount root, planned swap active. Discrepancies are reported, not fatal;
/// the status record still reflects the storage state.
fn verify_applied(env: &Environment, plan: &Plan) {
    let devices = match lsblk::list() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Skipping post-apply verification: {e:#}");
            return;
        }
    };

    for lv in &plan.lvs {
        if let LvContent::Ext4 { label, mountpoint, .. } = &lv.content {
            let expected = env
                .mount_root
                .join(mountpoint.strip_prefix("/").unwrap_or(mountpoint));
            let mounted = devices.iter().any(|d| {
                d.find_by_label(label)
                    .map(|dev| dev.mountpoints.contains(&expected))
                    .unwrap_or(false)
            });
            if !mounted {
                warn!(
                    "Verification: '{}/{}' is not mounted at '{}'",
                    lv.vg,
                    lv.name,
                    expected.display()
                );
            }
        }
    }

    let plans_swap = plan
        .lvs
        .iter()
        .any(|lv| matches!(lv.content, LvContent::Swap { .. }));
    if plans_swap {
        match SwapSpace::read() {
            Ok(spaces) if spaces.is_empty() => {
                warn!("Verification: the plan includes swap but none is active")
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping swap verification: {e:#}"),
        }
    }
}

fn run_post_apply_commands(plan: &Plan) -> Result<(), ApplyError> {
    for argv in &plan.post_apply_commands {
        let Some((program, args)) = argv.split_first() else {
            continue;
        };
        info!("Running post-apply command: {}", argv.join(" "));

        let mut command = Command::external(program);
        command.args(args);
        command.run_and_check().map_err(|e| {
            ApplyError::PostApplyFailed {
                command: argv.join(" "),
                exit: e.exit_code(),
            }
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use drydock_api::{
        config::HostConfig,
        plan::{PartitionSize, PlannedLv, PlannedPartition},
        primitives::bytes::ByteCount,
    };
    use osutils::lsblk::BlockDeviceType;

    use crate::engine::testutil::test_environment;

    use super::*;

    fn plan_with_labels() -> Plan {
        let mut plan = Plan::default();
        plan.partitions.insert(
            "/dev/sda".to_string(),
            vec![PlannedPartition {
                index: 1,
                name: "ESP".to_string(),
                size: PartitionSize::Bytes(ByteCount::gib(1)),
                typecode: "EF00".to_string(),
            }],
        );
        plan.lvs.push(PlannedLv {
            content: LvContent::Ext4 {
                label: "slash".to_string(),
                mountpoint: "/".into(),
                options: vec![],
            },
            name: "slash".to_string(),
            size: ByteCount::gib(50),
            vg: "main".to_string(),
        });
        plan.lvs.push(PlannedLv {
            content: LvContent::Swap {
                label: "swap".to_string(),
            },
            name: "swap".to_string(),
            size: ByteCount::gib(8),
            vg: "main".to_string(),
        });
        plan
    }

    fn labeled_device(label: &str) -> BlockDevice {
        BlockDevice {
            name: format!("/dev/disk-{label}").into(),
            label: Some(label.to_string()),
            blkdev_type: BlockDeviceType::Lvm,
            ..Default::default()
        }
    }

    #[test]
    fn test_expected_labels() {
        let labels = expected_labels(&plan_with_labels());
        assert_eq!(labels, vec!["EFI", "slash", "swap"]);

        assert!(expected_labels(&Plan::default()).is_empty());
    }

    #[test]
    fn test_labels_present() {
        let labels = expected_labels(&plan_with_labels());

        let complete: Vec<BlockDevice> = vec![
            labeled_device("EFI"),
            labeled_device("slash"),
            labeled_device("swap"),
        ];
        assert!(labels_present(&complete, &labels));

        let partial = &complete[..2];
        assert!(!labels_present(partial, &labels));

        // Labels nested under a disk are found too
        let nested = vec![BlockDevice {
            name: "/dev/sda".into(),
            blkdev_type: BlockDeviceType::Disk,
            children: complete,
            ..Default::default()
        }];
        assert!(labels_present(&nested, &labels));
    }

    #[test]
    fn test_persist_plan_artifacts_and_status() {
        let (env, _dir) = test_environment(HostConfig::default(), 8 << 30);
        let plan = plan_with_labels();

        persist_plan_artifacts(&env, &plan).unwrap();
        let plan_json = std::fs::read_to_string(env.plan_path()).unwrap();
        assert_eq!(Plan::from_json(&plan_json).unwrap(), plan);

        let rendered = std::fs::read_to_string(env.rendered_path()).unwrap();
        drydock_api::disko::DiskoDocument::from_json(&rendered).unwrap();

        let record = StatusRecord::new(ProvisionState::PlanOnly, detail::PLAN_RENDERED);
        write_status(&env, &record).unwrap();
        let written = std::fs::read_to_string(env.status_path()).unwrap();
        let parsed = StatusRecord::parse(&written).unwrap();
        assert_eq!(parsed.state, ProvisionState::PlanOnly);
        assert_eq!(parsed.detail, detail::PLAN_RENDERED);
    }

    #[test]
    fn test_cancelled_apply_writes_failed_status() {
        let (env, _dir) = test_environment(HostConfig::default(), 8 << 30);
        env.request_cancel();

        let err = apply(&env, &plan_with_labels()).unwrap_err();
        assert_eq!(err, ApplyError::Cancelled);

        let written = std::fs::read_to_string(env.status_path()).unwrap();
        let parsed = StatusRecord::parse(&written).unwrap();
        assert_eq!(parsed.state, ProvisionState::Failed);
        assert_eq!(parsed.detail, "cancelled");
    }

    #[test]
    fn test_failure_detail_references_diagnostics() {
        let (env, _dir) = test_environment(HostConfig::default(), 8 << 30);

        let detail = failure_detail(
            &env,
            &ApplyError::FormatterFailed {
                exit: Some(3),
                stderr_tail: "boom".to_string(),
            },
        );
        assert!(detail.starts_with("formatter-exit-3 (diagnostics: "));

        let detail = failure_detail(&env, &ApplyError::Cancelled);
        assert_eq!(detail, "cancelled");
    }
}
