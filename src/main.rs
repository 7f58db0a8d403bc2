use std::{fs, path::Path, process::ExitCode};

use anyhow::{bail, Context, Error};
use clap::Parser;
use log::{error, info, warn};

use drydock::{
    cli::{Cli, Commands},
    engine::{apply, cleanup, detect, inventory, planner},
    Environment, DRYDOCK_VERSION,
};
use drydock_api::{
    config::HostConfig,
    error::ApplyError,
    status::{detail, ApplyOutcome, ProvisionState, StatusRecord},
};

const DEFAULT_CONFIG_PATH: &str = "/etc/drydock/config.yaml";

fn main() -> ExitCode {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbosity)
        .init();

    info!("drydock version {DRYDOCK_VERSION}");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<(), Error> {
    let config = load_config(args.config.as_deref())?;
    let env = Environment::new(config).context("Failed to probe the environment")?;

    match args.command {
        Commands::Plan => {
            let inventory = inventory::inventory()?;
            let plan = planner::plan(&inventory, &env)?;
            apply::persist_plan_artifacts(&env, &plan)?;
            apply::write_status(
                &env,
                &StatusRecord::new(ProvisionState::PlanOnly, detail::PLAN_RENDERED),
            )?;
            println!("{}", env.plan_path().display());
        }

        Commands::Apply => {
            let outcome = run_apply(&env)?;
            info!("Outcome: {} ({})", outcome.state, outcome.detail);
        }

        Commands::Cleanup { roots, mode } => {
            let report = cleanup::cleanup(&env, &roots, mode)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                bail!("Cleanup left one or more roots not ready for provisioning");
            }
        }

        Commands::Detect => {
            let layout = detect::detect_existing_layout(&env)?;
            println!("{}", serde_json::to_string_pretty(&layout)?);
        }
    }

    Ok(())
}

/// Inventory and planning failures ahead of the applier still leave an
/// authoritative failed status record behind.
fn run_apply(env: &Environment) -> Result<ApplyOutcome, Error> {
    let planned = inventory::inventory()
        .map_err(ApplyError::from)
        .and_then(|inventory| planner::plan(&inventory, env).map_err(ApplyError::from));

    let plan = match planned {
        Ok(plan) => plan,
        Err(e) => {
            let record = StatusRecord::new(ProvisionState::Failed, e.detail());
            if let Err(status_err) = apply::write_status(env, &record) {
                warn!("Could not write the failure status record: {status_err}");
            }
            return Err(e.into());
        }
    };

    Ok(apply::apply(env, &plan)?)
}

fn load_config(path: Option<&Path>) -> Result<HostConfig, Error> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(HostConfig::default()),
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration '{}'", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse configuration '{}'", path.display()))
}
