use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::primitives::bytes::ByteCount;

/// The full configuration surface. Unknown keys are rejected rather than
/// silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Biases RAID level and mkfs choices
    pub mode: ProvisioningMode,

    /// EFI System Partition size in GiB
    pub esp_size_gib: u64,

    /// Swap sizing; `auto` resolves to twice the installed RAM
    pub swap_size: SwapSize,

    /// Fixed size of the root logical volume in GiB
    pub slash_size_gib: u64,

    /// Ceiling for the home logical volume in GiB
    pub home_cap_gib: u64,

    /// Default size of `large/data` in GiB
    pub data_size_gib: u64,

    /// Number of trailing extents never allocated in any volume group
    pub extent_safety: u64,

    /// Run blkdiscard on SSD root disks during cleanup
    pub discard_roots: bool,

    /// Shred rotational root disks during cleanup
    pub shred_roots: bool,

    /// Permit cleanup over disks carrying unknown signatures
    pub force_wipe_nonempty: bool,

    /// Name of the external formatter binary
    pub formatter_cmd: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            mode: ProvisioningMode::Fast,
            esp_size_gib: 1,
            swap_size: SwapSize::Auto,
            slash_size_gib: 50,
            home_cap_gib: 16,
            data_size_gib: 100,
            extent_safety: 2,
            discard_roots: false,
            shred_roots: false,
            force_wipe_nonempty: false,
            formatter_cmd: "disko".to_string(),
        }
    }
}

impl HostConfig {
    pub fn esp_size(&self) -> ByteCount {
        ByteCount::gib(self.esp_size_gib)
    }

    pub fn slash_size(&self) -> ByteCount {
        ByteCount::gib(self.slash_size_gib)
    }

    pub fn home_cap(&self) -> ByteCount {
        ByteCount::gib(self.home_cap_gib)
    }

    pub fn data_size(&self) -> ByteCount {
        ByteCount::gib(self.data_size_gib)
    }
}

/// `fast` optimizes for throughput and accepts RAID0; `careful` prefers
/// redundancy and conservative mkfs defaults.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProvisioningMode {
    #[default]
    Fast,
    Careful,
}

/// Swap sizing policy: the literal string `auto` (twice the installed RAM) or
/// an absolute byte count such as `16G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapSize {
    #[default]
    Auto,
    Absolute(ByteCount),
}

impl SwapSize {
    /// Resolves the policy against the amount of installed RAM.
    pub fn resolve(&self, ram_bytes: u64) -> u64 {
        match self {
            SwapSize::Auto => ram_bytes.saturating_mul(2),
            SwapSize::Absolute(size) => size.bytes(),
        }
    }
}

impl serde::Serialize for SwapSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            SwapSize::Auto => serializer.serialize_str("auto"),
            SwapSize::Absolute(size) => size.serialize(serializer),
        }
    }
}

impl<'de> serde::Deserialize<'de> for SwapSize {
    fn deserialize<D>(deserializer: D) -> Result<SwapSize, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) if s == "auto" => Ok(SwapSize::Auto),
            serde_yaml::Value::String(s) => ByteCount::from_str(&s)
                .map(SwapSize::Absolute)
                .map_err(|e| serde::de::Error::custom(format!("invalid swap size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid swap size, expected unsigned integer")
                })?;
                Ok(SwapSize::Absolute(ByteCount(n)))
            }
            _ => Err(serde::de::Error::custom(
                "invalid swap size, expected 'auto' or a byte count",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.mode, ProvisioningMode::Fast);
        assert_eq!(config.esp_size(), ByteCount::gib(1));
        assert_eq!(config.swap_size, SwapSize::Auto);
        assert_eq!(config.slash_size(), ByteCount::gib(50));
        assert_eq!(config.home_cap(), ByteCount::gib(16));
        assert_eq!(config.data_size(), ByteCount::gib(100));
        assert_eq!(config.extent_safety, 2);
        assert_eq!(config.formatter_cmd, "disko");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = indoc::indoc! {r#"
            mode: careful
            esp_size_gib: 2
            swap_size: 16G
            slash_size_gib: 64
            home_cap_gib: 32
            data_size_gib: 500
            extent_safety: 1
            discard_roots: true
            shred_roots: false
            force_wipe_nonempty: true
            formatter_cmd: disko-ng
        "#};

        let config: HostConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, ProvisioningMode::Careful);
        assert_eq!(config.esp_size_gib, 2);
        assert_eq!(config.swap_size, SwapSize::Absolute(ByteCount::gib(16)));
        assert!(config.discard_roots);
        assert!(config.force_wipe_nonempty);
        assert_eq!(config.formatter_cmd, "disko-ng");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HostConfig = serde_yaml::from_str("mode: careful\n").unwrap();
        assert_eq!(config.mode, ProvisioningMode::Careful);
        assert_eq!(config.slash_size_gib, 50);
    }

    #[test]
    fn test_unknown_key_rejected() {
        serde_yaml::from_str::<HostConfig>("made_up_key: true\n").unwrap_err();
    }

    #[test]
    fn test_swap_size_resolution() {
        let ram = 8 * 1024 * 1024 * 1024u64;
        assert_eq!(SwapSize::Auto.resolve(ram), 2 * ram);
        assert_eq!(
            SwapSize::Absolute(ByteCount::gib(4)).resolve(ram),
            ByteCount::gib(4).bytes()
        );
    }

    #[test]
    fn test_swap_size_serde() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            swap: SwapSize,
        }

        let parsed: Wrapper = serde_yaml::from_str("swap: auto").unwrap();
        assert_eq!(parsed.swap, SwapSize::Auto);
        assert_eq!(serde_yaml::to_string(&parsed).unwrap().trim(), "swap: auto");

        let parsed: Wrapper = serde_yaml::from_str("swap: 4G").unwrap();
        assert_eq!(parsed.swap, SwapSize::Absolute(ByteCount::gib(4)));

        serde_yaml::from_str::<Wrapper>("swap: [1]").unwrap_err();
    }
}
