use drydock_api::{config::ProvisioningMode, plan::RaidLevel};

/// md metadata format for every array this tool creates.
pub const MD_METADATA_FORMAT: &str = "1.2";

/// Chunk size for striped levels, in KiB. RAID1 has no chunking.
pub const STRIPE_CHUNK_KIB: u64 = 512;

/// Array decision for a bucket hosting a `main`-tier volume group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainArrayDecision {
    /// Single disk: its data partition is the PV directly
    Single,

    /// Array over every bucket member
    Array(RaidLevel),

    /// Careful-mode triple: RAID1 over two members, the rest stay out of
    /// the plan as spares
    ArrayWithSpares(RaidLevel, usize),
}

/// Cardinality-to-level mapping for `main`-tier buckets.
pub fn main_array_decision(count: usize, mode: ProvisioningMode) -> MainArrayDecision {
    use MainArrayDecision::*;

    match (count, mode) {
        (1, _) => Single,
        (2, ProvisioningMode::Fast) => Array(RaidLevel::Raid0),
        (2, ProvisioningMode::Careful) => Array(RaidLevel::Raid1),
        (3, ProvisioningMode::Careful) => ArrayWithSpares(RaidLevel::Raid1, 1),
        (3, ProvisioningMode::Fast) => Array(RaidLevel::Raid0),
        (n, ProvisioningMode::Careful) if n % 2 == 0 => Array(RaidLevel::Raid10),
        _ => Array(RaidLevel::Raid0),
    }
}

/// Cardinality-to-level mapping for the HDD data array. A single member
/// means no array at all.
pub fn data_array_level(count: usize) -> Option<RaidLevel> {
    match count {
        0 | 1 => None,
        2 => Some(RaidLevel::Raid1),
        3..=5 => Some(RaidLevel::Raid5),
        _ => Some(RaidLevel::Raid6),
    }
}

/// Chunk size argument for an array of the given level.
pub fn chunk_kib(level: RaidLevel) -> Option<u64> {
    match level {
        RaidLevel::Raid1 => None,
        _ => Some(STRIPE_CHUNK_KIB),
    }
}

/// Usable capacity of an array over members of the given sizes. This is a
/// planning estimate; the formatter does the real allocation.
pub fn array_capacity(level: RaidLevel, member_sizes: &[u64]) -> u64 {
    let Some(&min) = member_sizes.iter().min() else {
        return 0;
    };
    let n = member_sizes.len() as u64;

    match level {
        RaidLevel::Raid0 => member_sizes.iter().sum(),
        RaidLevel::Raid1 => min,
        RaidLevel::Raid5 => min.saturating_mul(n.saturating_sub(1)),
        RaidLevel::Raid6 => min.saturating_mul(n.saturating_sub(2)),
        RaidLevel::Raid10 => min.saturating_mul(n / 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProvisioningMode::{Careful, Fast};

    #[test]
    fn test_main_array_decisions() {
        assert_eq!(main_array_decision(1, Fast), MainArrayDecision::Single);
        assert_eq!(main_array_decision(1, Careful), MainArrayDecision::Single);

        assert_eq!(
            main_array_decision(2, Fast),
            MainArrayDecision::Array(RaidLevel::Raid0)
        );
        assert_eq!(
            main_array_decision(2, Careful),
            MainArrayDecision::Array(RaidLevel::Raid1)
        );

        assert_eq!(
            main_array_decision(3, Fast),
            MainArrayDecision::Array(RaidLevel::Raid0)
        );
        assert_eq!(
            main_array_decision(3, Careful),
            MainArrayDecision::ArrayWithSpares(RaidLevel::Raid1, 1)
        );

        assert_eq!(
            main_array_decision(4, Careful),
            MainArrayDecision::Array(RaidLevel::Raid10)
        );
        assert_eq!(
            main_array_decision(4, Fast),
            MainArrayDecision::Array(RaidLevel::Raid0)
        );
        assert_eq!(
            main_array_decision(5, Careful),
            MainArrayDecision::Array(RaidLevel::Raid0)
        );
        assert_eq!(
            main_array_decision(6, Careful),
            MainArrayDecision::Array(RaidLevel::Raid10)
        );
    }

    #[test]
    fn test_data_array_levels() {
        assert_eq!(data_array_level(0), None);
        assert_eq!(data_array_level(1), None);
        assert_eq!(data_array_level(2), Some(RaidLevel::Raid1));
        assert_eq!(data_array_level(3), Some(RaidLevel::Raid5));
        assert_eq!(data_array_level(4), Some(RaidLevel::Raid5));
        assert_eq!(data_array_level(5), Some(RaidLevel::Raid5));
        assert_eq!(data_array_level(6), Some(RaidLevel::Raid6));
        assert_eq!(data_array_level(12), Some(RaidLevel::Raid6));
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_kib(RaidLevel::Raid1), None);
        assert_eq!(chunk_kib(RaidLevel::Raid0), Some(512));
        assert_eq!(chunk_kib(RaidLevel::Raid6), Some(512));
    }

    #[test]
    fn test_array_capacity() {
        let gib = 1u64 << 30;
        assert_eq!(array_capacity(RaidLevel::Raid0, &[gib, gib]), 2 * gib);
        assert_eq!(array_capacity(RaidLevel::Raid1, &[gib, gib]), gib);
        assert_eq!(
            array_capacity(RaidLevel::Raid5, &[gib, gib, gib, gib]),
            3 * gib
        );
        assert_eq!(
            array_capacity(RaidLevel::Raid6, &[gib, gib, gib, gib]),
            2 * gib
        );
        assert_eq!(
            array_capacity(RaidLevel::Raid10, &[gib, gib, gib, gib]),
            2 * gib
        );
        assert_eq!(array_capacity(RaidLevel::Raid0, &[]), 0);
    }
}
