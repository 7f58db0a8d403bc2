use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// The declarative device graph handed to the external formatter.
///
/// Serialization is canonical: the three top-level maps and every nested map
/// are `BTreeMap`s (ordered by key), arrays keep plan order, and the RAID
/// level is numeric. Because maps serialize key-sorted, each partition
/// carries a `priority` expressing its physical order on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DiskoDocument {
    #[serde(default)]
    pub disk: BTreeMap<String, DiskEntry>,

    #[serde(default)]
    pub mdadm: BTreeMap<String, MdadmEntry>,

    #[serde(default)]
    pub lvm_vg: BTreeMap<String, LvmVgEntry>,
}

impl DiskoDocument {
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DiskEntry {
    #[serde(rename = "type")]
    pub tag: DiskTag,

    /// Path of the physical device
    pub device: PathBuf,

    /// Always a [`Content::Gpt`]
    pub content: Content,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiskTag {
    #[default]
    Disk,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MdadmEntry {
    #[serde(rename = "type")]
    pub tag: MdadmTag,

    /// Numeric RAID level (0, 1, 5, 6, 10)
    pub level: u32,

    /// What sits on the assembled array, typically a [`Content::LvmPv`]
    pub content: Content,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MdadmTag {
    #[default]
    Mdadm,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LvmVgEntry {
    #[serde(rename = "type")]
    pub tag: LvmVgTag,

    pub lvs: BTreeMap<String, LvEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LvmVgTag {
    #[default]
    LvmVg,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LvEntry {
    /// "50G"-style size string
    pub size: String,

    pub content: Content,
}

/// A GPT slice of a disk. `priority` is 1-based plan order; the formatter
/// lays partitions out by priority, not by key order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartitionEntry {
    pub priority: u32,

    /// "1G"-style size string, or "100%" for the remainder of the disk
    pub size: String,

    /// sgdisk type code (EF00, FD00, 8E00)
    #[serde(rename = "type")]
    pub typecode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

/// What lives on a block device in the rendered graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Filesystem {
        format: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        mountpoint: Option<PathBuf>,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mount_options: Vec<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },

    Swap {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },

    /// The device is a physical volume of the named volume group
    LvmPv { vg: String },

    /// The device carries a GPT with the given partitions
    Gpt {
        partitions: BTreeMap<String, PartitionEntry>,
    },

    /// The partition is a member of the named md array
    Mdadm { name: String },
}
