pub mod cli;
pub mod engine;

pub use engine::{
    apply::apply,
    cleanup::{cleanup, CleanupMode, CleanupReport},
    detect::detect_existing_layout,
    inventory::inventory,
    planner::plan,
    Environment,
};

pub const DRYDOCK_VERSION: &str = env!("CARGO_PKG_VERSION");
