use crate::engine::inventory::Disk;

/// Disks grouped by media class and size, the unit of RAID eligibility. Any
/// two members are within 1% relative size of each other, so an array over
/// the bucket never needs truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeBucket {
    pub rotational: bool,

    /// Members in path order
    pub disks: Vec<Disk>,

    /// Summed member capacity, used to rank buckets
    pub capacity: u64,
}

impl SizeBucket {
    fn new(rotational: bool, disk: Disk) -> Self {
        SizeBucket {
            rotational,
            capacity: disk.size,
            disks: vec![disk],
        }
    }

    fn accepts(&self, disk: &Disk) -> bool {
        self.disks.iter().all(|d| within_tolerance(d.size, disk.size))
    }

    fn push(&mut self, disk: Disk) {
        self.capacity += disk.size;
        self.disks.push(disk);
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }
}

/// |a - b| / max(a, b) <= 0.01, in integer arithmetic. Exactly 1% passes.
pub fn within_tolerance(a: u64, b: u64) -> bool {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    (max - min) as u128 * 100 <= max as u128
}

/// Splits the inventory into SSD and HDD buckets. Within each class, buckets
/// are sorted by total capacity descending; the first is the primary bucket
/// of that class. Disks failing the tolerance against every open bucket get
/// a singleton bucket of their own.
pub fn bucketize(disks: &[Disk]) -> (Vec<SizeBucket>, Vec<SizeBucket>) {
    let ssds: Vec<&Disk> = disks.iter().filter(|d| !d.rotational).collect();
    let hdds: Vec<&Disk> = disks.iter().filter(|d| d.rotational).collect();

    (group(&ssds, false), group(&hdds, true))
}

fn group(class: &[&Disk], rotational: bool) -> Vec<SizeBucket> {
    // Largest first so a bucket's first member is its reference size
    let mut by_size: Vec<&Disk> = class.to_vec();
    by_size.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let mut buckets: Vec<SizeBucket> = Vec::new();
    for disk in by_size {
        match buckets.iter_mut().find(|b| b.accepts(disk)) {
            Some(bucket) => bucket.push(disk.clone()),
            None => buckets.push(SizeBucket::new(rotational, disk.clone())),
        }
    }

    for bucket in &mut buckets {
        bucket.disks.sort_by(|a, b| a.path.cmp(&b.path));
    }

    buckets.sort_by(|a, b| {
        b.capacity
            .cmp(&a.capacity)
            .then_with(|| a.disks[0].path.cmp(&b.disks[0].path))
    });

    buckets
}
