//! Contracts for the host facilities the engine depends on but does not own:
//! multipath enumeration, device-mapper manipulation and process listing.
//! The engine holds these as trait objects so tests can substitute fakes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::LvmConfig;
use crate::constants::PV_PREFIX;

/// Logical and physical block sizes of a block device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    pub logical: u64,
    pub physical: u64,
}

/// A process holding a device node open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
}

/// Multipath device enumeration; feeds the filter builder and block size
/// pre-checks.
pub trait DeviceEnumerator: Send + Sync {
    /// Current multipath device paths under `/dev/mapper`.
    fn multipath_devices(&self) -> io::Result<Vec<String>>;
    /// Block sizes of the multipath device with the given guid.
    fn block_sizes(&self, guid: &str) -> io::Result<BlockSizes>;
}

/// Device-mapper side effects.
pub trait DeviceMapper: Send + Sync {
    /// Tear down any mappings layered on top of the given device, so a
    /// forced `pvcreate` does not fail on busy predecessors.
    fn remove_mappings_holding_device(&self, guid: &str) -> io::Result<()>;
}

/// Process listing for deactivation diagnostics.
pub trait ProcessInspector: Send + Sync {
    /// Processes currently holding `path` open.
    fn holders(&self, path: &Path) -> Vec<ProcessInfo>;
}

fn dm_id(guid: &str) -> io::Result<String> {
    let link = fs::read_link(Path::new(PV_PREFIX).join(guid))?;
    link.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| io::Error::other(format!("no dm device behind {guid}")))
}

/// Production [`DeviceEnumerator`] walking `/dev/mapper` and sysfs.
#[derive(Debug, Default)]
pub struct SysfsDevices;

impl DeviceEnumerator for SysfsDevices {
    fn multipath_devices(&self) -> io::Result<Vec<String>> {
        let mut devices = Vec::new();
        for entry in fs::read_dir(PV_PREFIX)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == "control" {
                continue;
            }
            devices.push(format!("{PV_PREFIX}/{name}"));
        }
        Ok(devices)
    }

    fn block_sizes(&self, guid: &str) -> io::Result<BlockSizes> {
        let queue = PathBuf::from("/sys/block").join(dm_id(guid)?).join("queue");
        let read_size = |attr: &str| -> io::Result<u64> {
            fs::read_to_string(queue.join(attr))?
                .trim()
                .parse()
                .map_err(|_| io::Error::other(format!("unreadable {attr} for {guid}")))
        };
        Ok(BlockSizes {
            logical: read_size("logical_block_size")?,
            physical: read_size("physical_block_size")?,
        })
    }
}

/// Production [`DeviceMapper`] removing holder mappings via `dmsetup`.
#[derive(Debug)]
pub struct DmsetupMapper {
    sudo_path: String,
}

impl DmsetupMapper {
    pub fn new(config: &LvmConfig) -> Self {
        DmsetupMapper {
            sudo_path: config.sudo_path.clone(),
        }
    }
}

impl DeviceMapper for DmsetupMapper {
    fn remove_mappings_holding_device(&self, guid: &str) -> io::Result<()> {
        let holders = PathBuf::from("/sys/block").join(dm_id(guid)?).join("holders");
        for entry in fs::read_dir(holders)? {
            let holder = entry?.file_name();
            let name_path = Path::new("/sys/block").join(&holder).join("dm/name");
            let name = fs::read_to_string(name_path)?.trim().to_string();
            debug!("Removing mapping {name} holding {guid}");
            let status = std::process::Command::new(&self.sudo_path)
                .args(["-n", "dmsetup", "remove", &name])
                .status()?;
            if !status.success() {
                return Err(io::Error::other(format!("dmsetup remove {name} failed")));
            }
        }
        Ok(())
    }
}

/// Production [`ProcessInspector`] scanning `/proc/<pid>/fd`.
#[derive(Debug, Default)]
pub struct ProcFsInspector;

impl ProcessInspector for ProcFsInspector {
    fn holders(&self, path: &Path) -> Vec<ProcessInfo> {
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut holders = Vec::new();
        let Ok(procs) = fs::read_dir("/proc") else {
            return holders;
        };
        for entry in procs.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            let open = fds
                .flatten()
                .filter_map(|fd| fs::read_link(fd.path()).ok())
                .any(|link| link == target);
            if open {
                let command = fs::read_to_string(entry.path().join("comm"))
                    .map(|comm| comm.trim().to_string())
                    .unwrap_or_default();
                holders.push(ProcessInfo { pid, command });
            }
        }
        holders
    }
}
