use const_format::concatcp;

/// Runtime state directory holding the plan, the rendered declarative file,
/// and the status record.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/drydock";

/// Canonical plan document, for operators and the TUI.
pub const PLAN_FILENAME: &str = "plan.json";

/// Rendered declarative device graph consumed by the external formatter.
pub const RENDERED_FILENAME: &str = "disko.json";

/// Key=value outcome record; the authoritative result of an apply attempt.
pub const STATUS_FILENAME: &str = "status";

/// Per-run cleanup diagnostics, referenced from failure status records.
pub const CLEANUP_REPORT_FILENAME: &str = "cleanup-report.json";

pub const DEFAULT_PLAN_PATH: &str = concatcp!(DEFAULT_STATE_DIR, "/", PLAN_FILENAME);
pub const DEFAULT_RENDERED_PATH: &str = concatcp!(DEFAULT_STATE_DIR, "/", RENDERED_FILENAME);
pub const DEFAULT_STATUS_PATH: &str = concatcp!(DEFAULT_STATE_DIR, "/", STATUS_FILENAME);

/// Where the formatter mounts the freshly created filesystems.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// LVM allocates in extents; this is the default extent size vgcreate uses.
pub const LVM_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

/// sgdisk type codes for the partitions this tool lays out.
pub const TYPECODE_ESP: &str = "EF00";
pub const TYPECODE_LINUX_RAID: &str = "FD00";
pub const TYPECODE_LVM: &str = "8E00";

/// Filesystem label of the EFI System Partition.
pub const ESP_LABEL: &str = "EFI";

/// Mountpoint of the ESP inside the target tree.
pub const ESP_MOUNTPOINT: &str = "/boot";

/// Base names of the volume-group tiers. Secondary buckets of a tier get
/// `_1`, `_2`, ... suffixes and stay unmounted.
pub const VG_MAIN: &str = "main";
pub const VG_SWAP: &str = "swap";
pub const VG_LARGE: &str = "large";
