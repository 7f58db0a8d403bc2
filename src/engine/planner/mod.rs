use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};

use drydock_api::{
    config::HostConfig,
    constants::{
        LVM_EXTENT_SIZE, TYPECODE_ESP, TYPECODE_LINUX_RAID, TYPECODE_LVM, VG_LARGE, VG_MAIN,
        VG_SWAP,
    },
    error::PlanError,
    plan::{
        ExcludedDisk, ExclusionReason, LvContent, PartitionRef, PartitionSize, Plan, PlannedArray,
        PlannedDisk, PlannedLv, PlannedPartition, PlannedVg, PvSource, RaidLevel, VgTier,
    },
    primitives::bytes::ByteCount,
};

use crate::engine::{
    inventory::{Disk, Inventory},
    render, Environment,
};

pub mod buckets;
pub mod raid;
pub mod volumes;

use buckets::{bucketize, SizeBucket};
use raid::MainArrayDecision;

/// Computes the deterministic storage plan for an inventory. Pure: the same
/// inventory, configuration, and RAM figure always yield the same plan.
pub fn plan(inventory: &Inventory, env: &Environment) -> Result<Plan, PlanError> {
    let config = &env.config;
    validate_config(config)?;

    if inventory.disks.is_empty() {
        return Err(PlanError::NoEligibleDisks);
    }

    let swap_bytes = volumes::round_down_to_extent(config.swap_size.resolve(env.ram_bytes));

    let (ssd_buckets, mut hdd_buckets) = bucketize(&inventory.disks);
    debug!(
        "Bucketized inventory: {} SSD bucket(s), {} HDD bucket(s)",
        ssd_buckets.len(),
        hdd_buckets.len()
    );

    let (main_buckets, large_buckets) = if ssd_buckets.is_empty() {
        // No solid-state media at all: the primary HDD bucket hosts `main`
        info!("No SSDs present; the primary HDD bucket hosts the root volume group");
        let main = vec![hdd_buckets.remove(0)];
        (main, hdd_buckets)
    } else {
        (ssd_buckets, hdd_buckets)
    };

    let mut builder = PlanBuilder::new(config, &env.mount_root, swap_bytes);
    for (i, bucket) in main_buckets.iter().enumerate() {
        builder.add_main_bucket(i, bucket);
    }
    for (i, bucket) in large_buckets.iter().enumerate() {
        builder.add_large_bucket(i, bucket);
    }
    builder.add_volumes()?;
    builder.finish()
}

fn validate_config(config: &HostConfig) -> Result<(), PlanError> {
    if config.slash_size_gib == 0 {
        return Err(PlanError::ConfigConflict {
            detail: "slash_size_gib must be non-zero".to_string(),
        });
    }
    if config.esp_size_gib == 0 {
        return Err(PlanError::ConfigConflict {
            detail: "esp_size_gib must be non-zero".to_string(),
        });
    }

    Ok(())
}

struct PlanBuilder<'a> {
    config: &'a HostConfig,
    mount_root: &'a Path,
    swap_bytes: u64,
    plan: Plan,

    /// Estimated PV capacity per VG, for LV sizing decisions
    vg_capacity: BTreeMap<String, u64>,

    md_counter: u32,
}

impl<'a> PlanBuilder<'a> {
    fn new(config: &'a HostConfig, mount_root: &'a Path, swap_bytes: u64) -> Self {
        PlanBuilder {
            config,
            mount_root,
            swap_bytes,
            plan: Plan::default(),
            vg_capacity: BTreeMap::new(),
            md_counter: 0,
        }
    }

    fn next_md_name(&mut self) -> String {
        let name = format!("md{}", self.md_counter);
        self.md_counter += 1;
        name
    }

    fn add_disk(&mut self, disk: &Disk) {
        let flagged = disk.has_signature && !self.config.force_wipe_nonempty;
        if flagged {
            warn!(
                "Disk '{}' carries existing signatures; flagging it for the cleanup engine",
                disk.path.display()
            );
        }

        self.plan.disks.push(PlannedDisk {
            bus: disk.bus,
            flagged,
            path: disk.path.clone(),
            rotational: disk.rotational,
            serial: disk.serial.clone(),
            size: ByteCount(disk.size),
        });
    }

    fn add_partition(&mut self, disk: &Path, partition: PlannedPartition) -> PartitionRef {
        let part_ref = PartitionRef {
            disk: disk.to_path_buf(),
            index: partition.index,
        };
        self.plan
            .partitions
            .entry(disk.display().to_string())
            .or_default()
            .push(partition);
        part_ref
    }

    fn add_array(
        &mut self,
        level: RaidLevel,
        members: Vec<PartitionRef>,
        member_sizes: &[u64],
    ) -> (String, u64) {
        let name = self.next_md_name();
        let member_caps: Vec<u64> = member_sizes
            .iter()
            .map(|s| s.saturating_sub(volumes::MD_MEMBER_RESERVE))
            .collect();
        let capacity = raid::array_capacity(level, &member_caps);

        self.plan.arrays.push(PlannedArray {
            chunk_kib: raid::chunk_kib(level),
            level,
            members,
            metadata: raid::MD_METADATA_FORMAT.to_string(),
            name: name.clone(),
        });

        (name, capacity)
    }

    fn add_vg(&mut self, name: String, tier: VgTier, mounted: bool, pv: PvSource, capacity: u64) {
        self.vg_capacity.insert(name.clone(), capacity);
        self.plan.vgs.push(PlannedVg {
            mounted,
            name,
            pv,
            tier,
        });
    }

    fn add_lv(&mut self, vg: &str, name: &str, size: u64, content: LvContent) {
        self.plan.lvs.push(PlannedLv {
            content,
            name: name.to_string(),
            size: ByteCount(size),
            vg: vg.to_string(),
        });
    }

    fn ext4(label: &str, mountpoint: &str) -> LvContent {
        LvContent::Ext4 {
            label: label.to_string(),
            mountpoint: mountpoint.into(),
            options: vec!["relatime".to_string()],
        }
    }

    /// Lays out one bucket of the `main` tier. Only the primary bucket gets
    /// ESPs and a mounted VG; the rest stay unmounted under suffixed names.
    fn add_main_bucket(&mut self, bucket_index: usize, bucket: &SizeBucket) {
        let vg_name = if bucket_index == 0 {
            VG_MAIN.to_string()
        } else {
            format!("{VG_MAIN}_{bucket_index}")
        };
        let with_esp = bucket_index == 0;
        let decision = raid::main_array_decision(bucket.len(), self.config.mode);
        debug!(
            "Main bucket {bucket_index} ({} member(s)): {decision:?}",
            bucket.len()
        );

        let (members, spares): (Vec<&Disk>, Vec<&Disk>) = match decision {
            MainArrayDecision::ArrayWithSpares(_, spare_count) => {
                let cut = bucket.len() - spare_count;
                (
                    bucket.disks[..cut].iter().collect(),
                    bucket.disks[cut..].iter().collect(),
                )
            }
            _ => (bucket.disks.iter().collect(), Vec::new()),
        };

        for spare in spares {
            info!("Leaving '{}' out of the plan as a spare", spare.path.display());
            self.plan.excluded.push(ExcludedDisk {
                path: spare.path.clone(),
                reason: ExclusionReason::Spare,
            });
        }

        let esp_bytes = self.config.esp_size().bytes();
        let is_array = !matches!(decision, MainArrayDecision::Single);
        let data_typecode = if is_array {
            TYPECODE_LINUX_RAID
        } else {
            TYPECODE_LVM
        };

        let mut data_refs = Vec::new();
        let mut data_sizes = Vec::new();
        for disk in &members {
            self.add_disk(disk);

            let mut index = 1;
            if with_esp {
                self.add_partition(
                    &disk.path,
                    PlannedPartition {
                        index,
                        name: "ESP".to_string(),
                        size: PartitionSize::Bytes(ByteCount(esp_bytes)),
                        typecode: TYPECODE_ESP.to_string(),
                    },
                );
                index += 1;
            }

            let part_ref = self.add_partition(
                &disk.path,
                PlannedPartition {
                    index,
                    name: "data".to_string(),
                    size: PartitionSize::Remainder,
                    typecode: data_typecode.to_string(),
                },
            );
            data_refs.push(part_ref);
            data_sizes.push(volumes::data_partition_size(
                disk.size,
                if with_esp { esp_bytes } else { 0 },
            ));
        }

        let (pv, capacity) = match decision {
            MainArrayDecision::Single => (
                PvSource::Partition {
                    partition: data_refs[0].clone(),
                },
                data_sizes[0],
            ),
            MainArrayDecision::Array(level) | MainArrayDecision::ArrayWithSpares(level, _) => {
                let (array, capacity) = self.add_array(level, data_refs, &data_sizes);
                (PvSource::Array { array }, capacity)
            }
        };

        self.add_vg(vg_name, VgTier::Main, bucket_index == 0, pv, capacity);
    }

    /// Lays out one bucket of the `large` tier. The primary bucket reserves
    /// the swap mirror on its first two members when it has at least two.
    fn add_large_bucket(&mut self, bucket_index: usize, bucket: &SizeBucket) {
        let vg_name = if bucket_index == 0 {
            VG_LARGE.to_string()
        } else {
            format!("{VG_LARGE}_{bucket_index}")
        };

        let swap_partition = volumes::swap_mirror_partition_size(self.swap_bytes);
        let reserve_swap = bucket_index == 0
            && bucket.len() >= 2
            && self.swap_bytes >= LVM_EXTENT_SIZE
            && bucket.disks[..2]
                .iter()
                .all(|d| d.size > swap_partition + volumes::GPT_OVERHEAD + (1 << 30));
        if bucket_index == 0 && bucket.len() >= 2 && !reserve_swap {
            warn!("Skipping the HDD swap mirror: members are too small for it");
        }

        let data_level = raid::data_array_level(bucket.len());
        let data_typecode = if data_level.is_some() {
            TYPECODE_LINUX_RAID
        } else {
            TYPECODE_LVM
        };

        let mut swap_refs = Vec::new();
        let mut swap_sizes = Vec::new();
        let mut data_refs = Vec::new();
        let mut data_sizes = Vec::new();

        for (i, disk) in bucket.disks.iter().enumerate() {
            self.add_disk(disk);

            let mut index = 1;
            let mut preceding = 0;
            if reserve_swap && i < 2 {
                let part_ref = self.add_partition(
                    &disk.path,
                    PlannedPartition {
                        index,
                        name: "swapmirror".to_string(),
                        size: PartitionSize::Bytes(ByteCount(swap_partition)),
                        typecode: TYPECODE_LINUX_RAID.to_string(),
                    },
                );
                swap_refs.push(part_ref);
                swap_sizes.push(swap_partition);
                index += 1;
                preceding = swap_partition;
            }

            let part_ref = self.add_partition(
                &disk.path,
                PlannedPartition {
                    index,
                    name: "data".to_string(),
                    size: PartitionSize::Remainder,
                    typecode: data_typecode.to_string(),
                },
            );
            data_refs.push(part_ref);
            data_sizes.push(volumes::data_partition_size(disk.size, preceding));
        }

        if reserve_swap {
            let (array, capacity) = self.add_array(RaidLevel::Raid1, swap_refs, &swap_sizes);
            self.add_vg(
                VG_SWAP.to_string(),
                VgTier::Swap,
                true,
                PvSource::Array { array },
                capacity,
            );
        }

        let (pv, capacity) = match data_level {
            None => (
                PvSource::Partition {
                    partition: data_refs[0].clone(),
                },
                data_sizes[0],
            ),
            Some(level) => {
                let (array, capacity) = self.add_array(level, data_refs, &data_sizes);
                (PvSource::Array { array }, capacity)
            }
        };

        self.add_vg(vg_name, VgTier::Large, bucket_index == 0, pv, capacity);
    }

    /// Carves the logical volumes: root and home on `main`, the tiered swap
    /// placement, the swap-VG extras, and `large/data`. Every allocation
    /// stays under the usable capacity with the trailing safety extents
    /// reserved.
    fn add_volumes(&mut self) -> Result<(), PlanError> {
        let safety = self.config.extent_safety;
        let usable =
            |cap: Option<&u64>| volumes::vg_usable(cap.copied().unwrap_or(0), safety);

        let main_usable = usable(self.vg_capacity.get(VG_MAIN));
        let slash = self.config.slash_size().bytes();
        if main_usable < slash {
            return Err(PlanError::InsufficientCapacityForRoot {
                required: ByteCount(slash),
                available: ByteCount(main_usable),
            });
        }

        self.add_lv(VG_MAIN, "slash", slash, Self::ext4("slash", "/"));
        let mut main_free = main_usable - slash;

        let home = volumes::home_size(main_free, self.config.home_cap());
        if home > 0 {
            self.add_lv(VG_MAIN, "home", home, Self::ext4("home", "/home"));
            main_free -= home;
        } else {
            debug!("Omitting 'main/home': no free capacity after the root volume");
        }

        let has_swap_vg = self.vg_capacity.contains_key(VG_SWAP);
        let has_large = self.vg_capacity.contains_key(VG_LARGE);
        let mut large_free = usable(self.vg_capacity.get(VG_LARGE));

        let swap = LvContent::Swap {
            label: "swap".to_string(),
        };
        if self.swap_bytes >= LVM_EXTENT_SIZE {
            if has_swap_vg {
                let swap_usable = usable(self.vg_capacity.get(VG_SWAP));
                let swap_lv = self.swap_bytes.min(swap_usable);
                self.add_lv(VG_SWAP, "swap", swap_lv, swap);

                let (var_tmp, var_log) =
                    volumes::swap_vg_extras(swap_lv, swap_usable - swap_lv);
                if var_tmp > 0 {
                    self.add_lv(VG_SWAP, "var_tmp", var_tmp, Self::ext4("var_tmp", "/var/tmp"));
                    self.plan.post_apply_commands.push(vec![
                        "chmod".to_string(),
                        "1777".to_string(),
                        self.mount_root.join("var/tmp").display().to_string(),
                    ]);
                }
                if var_log > 0 {
                    self.add_lv(VG_SWAP, "var_log", var_log, Self::ext4("var_log", "/var/log"));
                }
            } else if has_large && large_free >= self.swap_bytes {
                self.add_lv(VG_LARGE, "swap", self.swap_bytes, swap);
                large_free -= self.swap_bytes;
            } else if main_free >= self.swap_bytes {
                self.add_lv(VG_MAIN, "swap", self.swap_bytes, swap);
            } else {
                info!("Omitting swap: no volume group has room for it");
            }
        }

        if has_large {
            let data =
                volumes::round_down_to_extent(self.config.data_size().bytes().min(large_free));
            if data >= LVM_EXTENT_SIZE {
                self.add_lv(VG_LARGE, "data", data, Self::ext4("data", "/data"));
            }
        }

        Ok(())
    }

    fn finish(mut self) -> Result<Plan, PlanError> {
        self.plan.disko = render::render(&self.plan);
        Ok(self.plan)
    }
}
