use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::info;
use serde::{Deserialize, Deserializer, Serialize};

use crate::dependencies::{Dependency, DependencyError};

/// Typed views over the LVM JSON reports (`pvs`/`vgs`/`lvs --reportformat
/// json --units b --nosuffix`) plus the teardown verbs the cleanup engine
/// drives. Creation of PVs/VGs/LVs is the declarative formatter's job and is
/// deliberately absent here.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhysicalVolume {
    pub pv_name: PathBuf,

    /// Empty string when the PV is orphaned
    pub vg_name: String,

    #[serde(deserialize_with = "size_str")]
    pub pv_size: u64,
}

impl PhysicalVolume {
    pub fn vg(&self) -> Option<&str> {
        if self.vg_name.is_empty() {
            None
        } else {
            Some(&self.vg_name)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeGroup {
    pub vg_name: String,

    #[serde(deserialize_with = "size_str")]
    pub vg_size: u64,

    #[serde(deserialize_with = "size_str")]
    pub vg_free: u64,

    #[serde(deserialize_with = "size_str")]
    pub vg_extent_size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogicalVolume {
    pub lv_name: String,

    pub vg_name: String,

    pub lv_path: PathBuf,

    #[serde(deserialize_with = "size_str")]
    pub lv_size: u64,

    /// "active" when the LV is mapped
    #[serde(default)]
    pub lv_active: String,
}

impl LogicalVolume {
    pub fn is_active(&self) -> bool {
        self.lv_active == "active"
    }

    /// The `<vg>/<lv>` identifier LVM tools accept in place of a path.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.lv_name)
    }
}

#[derive(Deserialize)]
struct PvsOutput {
    report: Vec<PvsReport>,
}

#[derive(Deserialize)]
struct PvsReport {
    #[serde(default)]
    pv: Vec<PhysicalVolume>,
}

#[derive(Deserialize)]
struct VgsOutput {
    report: Vec<VgsReport>,
}

#[derive(Deserialize)]
struct VgsReport {
    #[serde(default)]
    vg: Vec<VolumeGroup>,
}

#[derive(Deserialize)]
struct LvsOutput {
    report: Vec<LvsReport>,
}

#[derive(Deserialize)]
struct LvsReport {
    #[serde(default)]
    lv: Vec<LogicalVolume>,
}

/// Lists all physical volumes known to LVM.
pub fn pvs() -> Result<Vec<PhysicalVolume>, Error> {
    let output = Dependency::Pvs
        .cmd()
        .args(report_args())
        .args(["--options", "pv_name,vg_name,pv_size"])
        .output_and_check()
        .context("Failed to execute pvs")?;

    parse_pvs_output(&output)
}

/// Lists all volume groups known to LVM.
pub fn vgs() -> Result<Vec<VolumeGroup>, Error> {
    let output = Dependency::Vgs
        .cmd()
        .args(report_args())
        .args(["--options", "vg_name,vg_size,vg_free,vg_extent_size"])
        .output_and_check()
        .context("Failed to execute vgs")?;

    parse_vgs_output(&output)
}

/// Lists all logical volumes known to LVM.
pub fn lvs() -> Result<Vec<LogicalVolume>, Error> {
    let output = Dependency::Lvs
        .cmd()
        .args(report_args())
        .args(["--options", "lv_name,vg_name,lv_path,lv_size,lv_active"])
        .output_and_check()
        .context("Failed to execute lvs")?;

    parse_lvs_output(&output)
}

fn report_args() -> [&'static str; 5] {
    ["--reportformat", "json", "--units", "b", "--nosuffix"]
}

/// Deactivates a logical volume (`lvchange -an`).
pub fn lv_deactivate(lv_path: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!(
        "Deactivating logical volume '{}'",
        lv_path.as_ref().display()
    );

    Dependency::Lvchange
        .cmd()
        .arg("-an")
        .arg(lv_path.as_ref())
        .run_and_check()
}

/// Deactivates all logical volumes of a volume group (`vgchange -an`).
pub fn vg_deactivate(vg_name: &str) -> Result<(), Box<DependencyError>> {
    info!("Deactivating volume group '{vg_name}'");

    Dependency::Vgchange
        .cmd()
        .arg("-an")
        .arg(vg_name)
        .run_and_check()
}

/// Removes a logical volume and its metadata (`lvremove -fy`).
pub fn lv_remove(lv_path: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Removing logical volume '{}'", lv_path.as_ref().display());

    Dependency::Lvremove
        .cmd()
        .arg("-fy")
        .arg(lv_path.as_ref())
        .run_and_check()
}

/// Removes a volume group and its metadata (`vgremove -ff -y`).
pub fn vg_remove(vg_name: &str) -> Result<(), Box<DependencyError>> {
    info!("Removing volume group '{vg_name}'");

    Dependency::Vgremove
        .cmd()
        .arg("-ff")
        .arg("-y")
        .arg(vg_name)
        .run_and_check()
}

/// Scrubs the LVM label from a physical volume (`pvremove -ff -y`).
pub fn pv_remove(pv_path: impl AsRef<Path>) -> Result<(), Box<DependencyError>> {
    info!("Removing physical volume '{}'", pv_path.as_ref().display());

    Dependency::Pvremove
        .cmd()
        .arg("-ff")
        .arg("-y")
        .arg(pv_path.as_ref())
        .run_and_check()
}

pub fn parse_pvs_output(output: &str) -> Result<Vec<PhysicalVolume>, Error> {
    let parsed: PvsOutput =
        serde_json::from_str(output).context("Failed to parse pvs output")?;

    Ok(parsed.report.into_iter().flat_map(|r| r.pv).collect())
}

pub fn parse_vgs_output(output: &str) -> Result<Vec<VolumeGroup>, Error> {
    let parsed: VgsOutput =
        serde_json::from_str(output).context("Failed to parse vgs output")?;

    Ok(parsed.report.into_iter().flat_map(|r| r.vg).collect())
}

pub fn parse_lvs_output(output: &str) -> Result<Vec<LogicalVolume>, Error> {
    let parsed: LvsOutput =
        serde_json::from_str(output).context("Failed to parse lvs output")?;

    Ok(parsed.report.into_iter().flat_map(|r| r.lv).collect())
}

/// LVM reports sizes as decimal strings when `--units b --nosuffix` is in
/// effect; older releases keep a "B" suffix. Numbers are accepted too.
fn size_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => s
            .trim()
            .trim_end_matches('B')
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid LVM size: {e}"))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("invalid LVM size, expected unsigned integer")),
        _ => Err(serde::de::Error::custom("invalid LVM size")),
    }
}
