//! Volumes, disks and move-TTL-aware space reservation.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    error::WriteError,
    metadata::TableMetadata,
    ttl::{DestinationKind, PartTtlInfos},
};

/// One physical disk of the storage policy.
#[derive(Debug)]
pub struct Disk {
    name: String,
    path: PathBuf,
    capacity: Option<u64>,
    reserved: AtomicU64,
}

impl Disk {
    /// Disk with unbounded capacity.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            path: path.into(),
            capacity: None,
            reserved: AtomicU64::new(0),
        })
    }

    /// Disk with a byte capacity enforced against reservations.
    pub fn with_capacity(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        capacity: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            path: path.into(),
            capacity: Some(capacity),
            reserved: AtomicU64::new(0),
        })
    }

    /// Disk name within the policy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mount path of the disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_reserve(&self, bytes: u64) -> bool {
        let Some(capacity) = self.capacity else {
            self.reserved.fetch_add(bytes, Ordering::Relaxed);
            return true;
        };
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            if current.saturating_add(bytes) > capacity {
                return false;
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.reserved.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Ordered set of disks with one priority within the policy.
pub struct Volume {
    name: String,
    disks: Vec<Arc<Disk>>,
}

impl Volume {
    /// Volume over the given disks.
    pub fn new(name: impl Into<String>, disks: Vec<Arc<Disk>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            disks,
        })
    }

    /// Volume name within the policy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Disks of this volume.
    pub fn disks(&self) -> &[Arc<Disk>] {
        &self.disks
    }

    fn try_reserve(self: &Arc<Self>, bytes: u64) -> Option<Reservation> {
        for disk in &self.disks {
            if disk.try_reserve(bytes) {
                return Some(Reservation {
                    disk: Arc::clone(disk),
                    bytes,
                });
            }
        }
        None
    }
}

/// Multi-volume storage policy; volume 0 is the default tier.
pub struct StoragePolicy {
    volumes: Vec<Arc<Volume>>,
}

impl StoragePolicy {
    /// Policy over the given volumes, in priority order.
    pub fn new(volumes: Vec<Arc<Volume>>) -> Arc<Self> {
        assert!(!volumes.is_empty(), "storage policy requires a volume");
        Arc::new(Self { volumes })
    }

    /// Single-volume, single-disk policy rooted at `path`.
    pub fn single_disk(path: impl Into<PathBuf>) -> Arc<Self> {
        let disk = Disk::new("default", path);
        Self::new(vec![Volume::new("default", vec![disk])])
    }

    /// Volumes in priority order.
    pub fn volumes(&self) -> &[Arc<Volume>] {
        &self.volumes
    }

    fn volume_by_name(&self, name: &str) -> Option<&Arc<Volume>> {
        self.volumes.iter().find(|v| v.name() == name)
    }

    fn disk_by_name(&self, name: &str) -> Option<&Arc<Disk>> {
        self.volumes
            .iter()
            .flat_map(|v| v.disks())
            .find(|d| d.name() == name)
    }

    /// Reserve on the first volume with room, starting at volume 0.
    pub fn reserve(&self, bytes: u64) -> Option<Reservation> {
        self.volumes.iter().find_map(|v| v.try_reserve(bytes))
    }

    /// Reserve space for a part, preferring the destination of a move-TTL
    /// entry that is already expired at `now`.
    ///
    /// Among expired entries the one with the largest `max` wins. When no
    /// entry applies (or its destination is full) volumes are tried in
    /// policy order; failing everywhere is a reservation error and nothing
    /// is written.
    pub fn reserve_preferring_ttl_rules(
        &self,
        metadata: &TableMetadata,
        bytes: u64,
        move_ttl_infos: &PartTtlInfos,
        now: i64,
    ) -> Result<Reservation, WriteError> {
        let mut best: Option<(i64, &crate::ttl::TtlDescription)> = None;
        for entry in &metadata.ttls().moves {
            let Some(info) = move_ttl_infos
                .moves_ttl
                .get(entry.expression.result_name())
            else {
                continue;
            };
            if info.is_empty() || info.max > now {
                continue;
            }
            if best.map(|(max, _)| info.max > max).unwrap_or(true) {
                best = Some((info.max, entry));
            }
        }

        if let Some((_, entry)) = best {
            if let Some(destination) = &entry.destination {
                let reserved = match destination.kind {
                    DestinationKind::Volume => self
                        .volume_by_name(&destination.name)
                        .and_then(|v| v.try_reserve(bytes)),
                    DestinationKind::Disk => {
                        self.disk_by_name(&destination.name).and_then(|disk| {
                            disk.try_reserve(bytes).then(|| Reservation {
                                disk: Arc::clone(disk),
                                bytes,
                            })
                        })
                    }
                };
                if let Some(reservation) = reserved {
                    return Ok(reservation);
                }
            }
        }

        self.reserve(bytes)
            .ok_or(WriteError::Reservation { requested: bytes })
    }
}

/// Space held on one disk until dropped.
#[derive(Debug)]
pub struct Reservation {
    disk: Arc<Disk>,
    bytes: u64,
}

impl Reservation {
    /// Disk the space was reserved on.
    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    /// Reserved byte count.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Reserve directly on a specific disk (projection sub-parts reserve on
    /// the parent's disk).
    pub(crate) fn on_disk(disk: Arc<Disk>, bytes: u64) -> Result<Self, WriteError> {
        if disk.try_reserve(bytes) {
            Ok(Reservation { disk, bytes })
        } else {
            Err(WriteError::Reservation { requested: bytes })
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.disk.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Disk, StoragePolicy, Volume};
    use crate::{
        error::WriteError,
        expr::ColumnExpression,
        metadata::TableMetadata,
        ttl::{DestinationKind, MoveDestination, PartTtlInfos, TtlDescription, TtlInfo},
    };

    fn tiered_policy() -> Arc<StoragePolicy> {
        let hot = Disk::with_capacity("hot", "/tmp/hot", 1000);
        let cold = Disk::with_capacity("cold", "/tmp/cold", 10_000);
        StoragePolicy::new(vec![
            Volume::new("hot", vec![hot]),
            Volume::new("cold", vec![cold]),
        ])
    }

    fn move_metadata() -> TableMetadata {
        let schema = Arc::new(arrow_schema::Schema::new(vec![arrow_schema::Field::new(
            "ts",
            arrow_schema::DataType::Timestamp(arrow_schema::TimeUnit::Second, None),
            false,
        )]));
        TableMetadata::builder(schema)
            .move_ttl(TtlDescription::with_destination(
                ColumnExpression::new("ts"),
                MoveDestination {
                    kind: DestinationKind::Volume,
                    name: "cold".to_owned(),
                },
            ))
            .build()
            .expect("metadata")
    }

    #[test]
    fn expired_move_ttl_prefers_destination() {
        let policy = tiered_policy();
        let metadata = move_metadata();
        let mut infos = PartTtlInfos::default();
        let mut info = TtlInfo::default();
        info.update(100);
        infos.moves_ttl.insert("ts".to_owned(), info);

        // Entire part expired long before `now`: straight to cold.
        let reservation = policy
            .reserve_preferring_ttl_rules(&metadata, 10, &infos, 1_000)
            .expect("reserve");
        assert_eq!(reservation.disk().name(), "cold");

        // Not yet expired: default tier wins.
        let reservation = policy
            .reserve_preferring_ttl_rules(&metadata, 10, &infos, 50)
            .expect("reserve");
        assert_eq!(reservation.disk().name(), "hot");
    }

    #[test]
    fn reservation_failure_when_everything_is_full() {
        let policy = tiered_policy();
        let metadata = move_metadata();
        let err = policy
            .reserve_preferring_ttl_rules(&metadata, 1_000_000, &PartTtlInfos::default(), 0)
            .expect_err("no space anywhere");
        assert!(matches!(err, WriteError::Reservation { .. }));
    }

    #[test]
    fn dropped_reservation_releases_space() {
        let policy = tiered_policy();
        let r1 = policy.reserve(800).expect("first");
        assert_eq!(r1.disk().name(), "hot");
        let spill = policy.reserve(800).expect("spills to cold");
        assert_eq!(spill.disk().name(), "cold");
        drop(r1);
        let r2 = policy.reserve(800).expect("after release");
        assert_eq!(r2.disk().name(), "hot");
    }
}
