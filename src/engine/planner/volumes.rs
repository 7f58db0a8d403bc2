use drydock_api::{constants::LVM_EXTENT_SIZE, primitives::bytes::ByteCount};

/// 1 MiB of alignment at each end of a GPT disk.
pub const GPT_OVERHEAD: u64 = 2 * 1024 * 1024;

/// md metadata 1.2 reserves a data offset at the head of each member.
pub const MD_MEMBER_RESERVE: u64 = 128 * 1024 * 1024;

/// LVM label plus metadata area on a PV.
pub const LVM_METADATA_RESERVE: u64 = 16 * 1024 * 1024;

/// Ceiling for `swap/var_log`.
pub const VAR_LOG_CAP: u64 = 4 * 1024 * 1024 * 1024;

pub fn round_down_to_extent(bytes: u64) -> u64 {
    bytes - bytes % LVM_EXTENT_SIZE
}

/// Capacity of a data partition on a disk after the fixed slices before it.
pub fn data_partition_size(disk_size: u64, preceding: u64) -> u64 {
    disk_size.saturating_sub(preceding + GPT_OVERHEAD)
}

/// Estimated allocatable bytes of a VG over a PV of the given size, with the
/// trailing safety extents already taken out. LV allocations must stay
/// within this.
pub fn vg_usable(pv_size: u64, extent_safety: u64) -> u64 {
    round_down_to_extent(pv_size.saturating_sub(LVM_METADATA_RESERVE))
        .saturating_sub(extent_safety * LVM_EXTENT_SIZE)
}

/// Size of the swap-mirror partition reserved on two primary HDD bucket
/// members: room for `swap/swap`, `swap/var_tmp` (same size), `swap/var_log`
/// (capped), plus headroom for RAID and LVM overheads.
pub fn swap_mirror_partition_size(swap_bytes: u64) -> u64 {
    2 * swap_bytes + swap_bytes.min(VAR_LOG_CAP) + (1 << 30)
}

/// `main/home` sizing: at most the configured cap, at most a quarter of the
/// free capacity after `slash`, rounded down to the extent boundary. Zero
/// means the volume is omitted.
pub fn home_size(free_after_slash: u64, home_cap: ByteCount) -> u64 {
    let size = round_down_to_extent(home_cap.bytes().min(free_after_slash / 4));
    if size >= LVM_EXTENT_SIZE {
        size
    } else {
        0
    }
}

/// `swap/var_tmp` and `swap/var_log` sizing over the VG capacity left after
/// the swap volume. Either comes back zero when it does not fit.
pub fn swap_vg_extras(swap_bytes: u64, residual: u64) -> (u64, u64) {
    if residual < LVM_EXTENT_SIZE {
        return (0, 0);
    }

    let var_log_want = swap_bytes.min(VAR_LOG_CAP);
    let var_tmp = round_down_to_extent(swap_bytes.min(residual.saturating_sub(var_log_want)));
    let var_log = round_down_to_extent(var_log_want.min(residual.saturating_sub(var_tmp)));

    (
        if var_tmp >= LVM_EXTENT_SIZE { var_tmp } else { 0 },
        if var_log >= LVM_EXTENT_SIZE { var_log } else { 0 },
    )
}
