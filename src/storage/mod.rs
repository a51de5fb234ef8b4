//! Storage policy, space reservation and part-directory plumbing.

mod builder;
mod policy;

pub use builder::{DirectorySyncGuard, PartStorageBuilder, TempDirLock};
pub use policy::{Disk, Reservation, StoragePolicy, Volume};
