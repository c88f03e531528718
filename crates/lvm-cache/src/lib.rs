//! In-process LVM cache and command engine for a storage host that shares
//! block devices with a cluster of peers.
//!
//! [`LvmCache`] executes lvm with dynamically computed device filters and
//! locking modes, keeps a coherent cache of PVs, VGs and LVs despite
//! concurrent mutation from other hosts, and exposes a typed facade for
//! creating, extending, activating, tagging and deleting LVM objects.

mod cache;
mod config;
mod constants;
mod engine;
mod error;
mod filter;
mod host;
mod ops;
mod records;
mod runner;
#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, CacheInfo, CacheStats};
pub use config::LvmConfig;
pub use constants::{
    MAX_COMMANDS, PV_PREFIX, READ_ONLY_RETRIES, SUPPORTED_BLOCK_SIZES, VG_EXTENT_SIZE_MB,
};
pub use engine::LvmCache;
pub use error::LvmError;
pub use filter::build_filter;
pub use host::{
    BlockSizes, DeviceEnumerator, DeviceMapper, DmsetupMapper, ProcFsInspector, ProcessInfo,
    ProcessInspector, SysfsDevices,
};
pub use records::{
    LogicalVolume, LvAttributes, PhysicalVolume, VgAttributes, VgState, VolumeGroup, fq_pv_name,
    lv_dm_name, lv_path,
};
pub use runner::{CommandRunner, RunOutput, SudoRunner};
