pub mod blkdiscard;
pub mod blockdev;
pub mod cryptsetup;
pub mod dependencies;
pub mod dmsetup;
pub mod files;
pub mod formatter;
pub mod losetup;
pub mod lsblk;
pub mod lvm;
pub mod mdadm;
pub mod mount;
pub mod sgdisk;
pub mod shred;
pub mod swap;
pub mod udevadm;
pub mod wipefs;
