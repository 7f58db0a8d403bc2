use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{disko::DiskoDocument, primitives::bytes::ByteCount};

/// The deterministic description of the intended storage end-state. Immutable
/// once built; field order is alphabetical so the canonical JSON comes out
/// key-sorted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub arrays: Vec<PlannedArray>,

    pub disks: Vec<PlannedDisk>,

    /// The rendered declarative device graph
    pub disko: DiskoDocument,

    pub excluded: Vec<ExcludedDisk>,

    pub lvs: Vec<PlannedLv>,

    /// Per-disk partitions, in physical order
    pub partitions: BTreeMap<String, Vec<PlannedPartition>>,

    /// Argv vectors executed after the formatter succeeds
    pub post_apply_commands: Vec<Vec<String>>,

    pub vgs: Vec<PlannedVg>,
}

impl Plan {
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }

    /// Paths of every disk participating in the plan.
    pub fn disk_paths(&self) -> Vec<PathBuf> {
        self.disks.iter().map(|d| d.path.clone()).collect()
    }

    /// Paths of disks that carried unknown signatures at planning time.
    pub fn flagged_disk_paths(&self) -> Vec<PathBuf> {
        self.disks
            .iter()
            .filter(|d| d.flagged)
            .map(|d| d.path.clone())
            .collect()
    }

    pub fn vg(&self, name: &str) -> Option<&PlannedVg> {
        self.vgs.iter().find(|vg| vg.name == name)
    }

    pub fn lvs_in<'a>(&'a self, vg_name: &'a str) -> impl Iterator<Item = &'a PlannedLv> {
        self.lvs.iter().filter(move |lv| lv.vg == vg_name)
    }
}

/// A physical disk participating in the plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlannedDisk {
    pub bus: BusType,

    /// Carried an unknown signature at planning time; surfaced to the
    /// cleanup engine unless `force_wipe_nonempty` is set
    pub flagged: bool,

    pub path: PathBuf,

    pub rotational: bool,

    pub serial: Option<String>,

    pub size: ByteCount,
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BusType {
    Nvme,
    Sata,
    Virtio,
    Usb,
    #[default]
    Other,
}

impl BusType {
    /// Maps an lsblk `tran` value.
    pub fn from_transport(transport: Option<&str>) -> Self {
        match transport {
            Some(t) => BusType::from_str(t).unwrap_or(BusType::Other),
            None => BusType::Other,
        }
    }
}

/// A GPT slice of one disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlannedPartition {
    /// 1-based physical position on the disk
    pub index: u32,

    /// Name used as the partition key in the rendered document
    pub name: String,

    pub size: PartitionSize,

    /// sgdisk type code (EF00, FD00, 8E00)
    pub typecode: String,
}

/// A fixed byte size or the remainder of the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSize {
    Bytes(ByteCount),
    Remainder,
}

impl PartitionSize {
    /// Size string for the rendered document.
    pub fn render(&self) -> String {
        match self {
            PartitionSize::Bytes(b) => b.to_string(),
            PartitionSize::Remainder => "100%".to_string(),
        }
    }
}

impl serde::Serialize for PartitionSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            PartitionSize::Bytes(b) => b.serialize(serializer),
            PartitionSize::Remainder => serializer.serialize_str("remainder"),
        }
    }
}

impl<'de> serde::Deserialize<'de> for PartitionSize {
    fn deserialize<D>(deserializer: D) -> Result<PartitionSize, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::String(s) if s == "remainder" => Ok(PartitionSize::Remainder),
            serde_yaml::Value::String(s) => ByteCount::from_str(&s)
                .map(PartitionSize::Bytes)
                .map_err(|e| serde::de::Error::custom(format!("invalid partition size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid partition size, expected unsigned integer")
                })?;
                Ok(PartitionSize::Bytes(ByteCount(n)))
            }
            _ => Err(serde::de::Error::custom(
                "invalid partition size, expected 'remainder' or a byte count",
            )),
        }
    }
}

/// A reference to a planned partition: disk path plus 1-based index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartitionRef {
    pub disk: PathBuf,
    pub index: u32,
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    /// The numeric level used in the rendered document and by mdadm.
    pub fn numeric(&self) -> u32 {
        match self {
            RaidLevel::Raid0 => 0,
            RaidLevel::Raid1 => 1,
            RaidLevel::Raid5 => 5,
            RaidLevel::Raid6 => 6,
            RaidLevel::Raid10 => 10,
        }
    }

    /// Whether the level survives a single member failure.
    pub fn redundant(&self) -> bool {
        !matches!(self, RaidLevel::Raid0)
    }
}

/// A planned md array. Members all come from one size bucket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlannedArray {
    /// Chunk size in KiB for striped levels
    pub chunk_kib: Option<u64>,

    pub level: RaidLevel,

    /// Ordered member partitions
    pub members: Vec<PartitionRef>,

    /// md metadata format
    pub metadata: String,

    pub name: String,
}

/// What donates the extents of a volume group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PvSource {
    Array { array: String },
    Partition { partition: PartitionRef },
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VgTier {
    Main,
    Swap,
    Large,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlannedVg {
    /// Secondary buckets plan their VG but stay unmounted
    pub mounted: bool,

    pub name: String,

    pub pv: PvSource,

    pub tier: VgTier,
}

/// Filesystem or swap content of a logical volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LvContent {
    Ext4 {
        label: String,
        mountpoint: PathBuf,
        options: Vec<String>,
    },
    Swap {
        label: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlannedLv {
    pub content: LvContent,

    pub name: String,

    pub size: ByteCount,

    pub vg: String,
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExclusionReason {
    /// Left out of a careful-mode RAID1 pair
    Spare,
}

/// A disk the planner deliberately left out of the plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExcludedDisk {
    pub path: PathBuf,
    pub reason: ExclusionReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raid_level_mapping() {
        assert_eq!(RaidLevel::Raid0.numeric(), 0);
        assert_eq!(RaidLevel::Raid1.numeric(), 1);
        assert_eq!(RaidLevel::Raid5.numeric(), 5);
        assert_eq!(RaidLevel::Raid6.numeric(), 6);
        assert_eq!(RaidLevel::Raid10.numeric(), 10);

        assert!(!RaidLevel::Raid0.redundant());
        assert!(RaidLevel::Raid10.redundant());

        assert_eq!(RaidLevel::Raid5.to_string(), "raid5");
        assert_eq!("raid10".parse::<RaidLevel>().unwrap(), RaidLevel::Raid10);
    }

    #[test]
    fn test_bus_type_from_transport() {
        assert_eq!(BusType::from_transport(Some("nvme")), BusType::Nvme);
        assert_eq!(BusType::from_transport(Some("sata")), BusType::Sata);
        assert_eq!(BusType::from_transport(Some("virtio")), BusType::Virtio);
        assert_eq!(BusType::from_transport(Some("usb")), BusType::Usb);
        assert_eq!(BusType::from_transport(Some("sas")), BusType::Other);
        assert_eq!(BusType::from_transport(None), BusType::Other);
    }

    #[test]
    fn test_partition_size_serde() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            size: PartitionSize,
        }

        let fixed = Wrapper {
            size: PartitionSize::Bytes(ByteCount::gib(1)),
        };
        let json = serde_json::to_string(&fixed).unwrap();
        assert_eq!(json, r#"{"size":"1G"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), fixed);

        let rest = Wrapper {
            size: PartitionSize::Remainder,
        };
        let json = serde_json::to_string(&rest).unwrap();
        assert_eq!(json, r#"{"size":"remainder"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), rest);

        assert_eq!(PartitionSize::Remainder.render(), "100%");
        assert_eq!(PartitionSize::Bytes(ByteCount::gib(1)).render(), "1G");
    }

    #[test]
    fn test_plan_json_keys_are_sorted() {
        let plan = Plan::default();
        let json = plan.to_canonical_json().unwrap();

        let positions: Vec<usize> = [
            "\"arrays\"",
            "\"disks\"",
            "\"disko\"",
            "\"excluded\"",
            "\"lvs\"",
            "\"partitions\"",
            "\"post_apply_commands\"",
            "\"vgs\"",
        ]
        .iter()
        .map(|key| json.find(key).unwrap_or_else(|| panic!("missing {key}")))
        .collect();

        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_plan_accessors() {
        let mut plan = Plan::default();
        plan.disks.push(PlannedDisk {
            bus: BusType::Nvme,
            flagged: true,
            path: "/dev/nvme0n1".into(),
            rotational: false,
            serial: Some("S1".to_string()),
            size: ByteCount::gib(512),
        });
        plan.disks.push(PlannedDisk {
            bus: BusType::Sata,
            flagged: false,
            path: "/dev/sda".into(),
            rotational: true,
            serial: None,
            size: ByteCount::gib(4096),
        });
        plan.vgs.push(PlannedVg {
            mounted: true,
            name: "main".to_string(),
            pv: PvSource::Array {
                array: "md0".to_string(),
            },
            tier: VgTier::Main,
        });
        plan.lvs.push(PlannedLv {
            content: LvContent::Ext4 {
                label: "slash".to_string(),
                mountpoint: "/".into(),
                options: vec!["relatime".to_string()],
            },
            name: "slash".to_string(),
            size: ByteCount::gib(50),
            vg: "main".to_string(),
        });

        assert_eq!(plan.disk_paths().len(), 2);
        assert_eq!(plan.flagged_disk_paths(), vec![PathBuf::from("/dev/nvme0n1")]);
        assert!(plan.vg("main").is_some());
        assert!(plan.vg("large").is_none());
        assert_eq!(plan.lvs_in("main").count(), 1);
        assert_eq!(plan.lvs_in("swap").count(), 0);
    }
}
