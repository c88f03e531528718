//! The cache engine: wraps raw lvm argv with a rendered `--config`, executes
//! it under bounded parallelism, and keeps the PV/VG/LV mappings coherent
//! with what the commands report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::{RwLock, Semaphore};
use tokio_retry::strategy::ExponentialBackoff;

use crate::cache::{CacheEntry, CacheInfo, CacheStats};
use crate::config::{LvmConfig, render_config};
use crate::constants::{MAX_COMMANDS, READ_ONLY_RETRIES, lvs_cmd, pvs_cmd, vgs_cmd};
use crate::error::LvmError;
use crate::filter::build_filter;
use crate::host::{
    DeviceEnumerator, DeviceMapper, DmsetupMapper, ProcFsInspector, ProcessInspector, SysfsDevices,
};
use crate::records::{LogicalVolume, PhysicalVolume, VolumeGroup, fq_pv_name, parse_vgs};
use crate::runner::{CommandRunner, RunOutput, SudoRunner};

const MAX_LOGGED_NAMES: usize = 10;

fn logged(names: &[String]) -> String {
    if names.len() <= MAX_LOGGED_NAMES {
        format!("{names:?}")
    } else {
        format!(
            "{:?} and {} more",
            &names[..MAX_LOGGED_NAMES],
            names.len() - MAX_LOGGED_NAMES
        )
    }
}

#[derive(Debug)]
struct CacheMaps {
    pvs: HashMap<String, CacheEntry<PhysicalVolume>>,
    vgs: HashMap<String, CacheEntry<VolumeGroup>>,
    lvs: HashMap<(String, String), CacheEntry<LogicalVolume>>,
    /// VGs whose whole LV listing is known fresh.
    fresh_lv: HashSet<String>,
    stale_pv: bool,
    stale_vg: bool,
}

impl Default for CacheMaps {
    fn default() -> Self {
        CacheMaps {
            pvs: HashMap::new(),
            vgs: HashMap::new(),
            lvs: HashMap::new(),
            fresh_lv: HashSet::new(),
            // Nothing has been read yet; the first listing bulk-loads.
            stale_pv: true,
            stale_vg: true,
        }
    }
}

/// In-process LVM cache and command engine.
///
/// One instance per host process; pass the handle explicitly wherever LVM
/// access is needed. All mutating public operations invalidate the affected
/// entries before returning, so a subsequent read observes authoritative
/// state.
pub struct LvmCache<R> {
    runner: R,
    pub(crate) config: LvmConfig,
    pub(crate) devices: Arc<dyn DeviceEnumerator>,
    pub(crate) mapper: Arc<dyn DeviceMapper>,
    pub(crate) procs: Arc<dyn ProcessInspector>,
    /// Gates the locking mode. `cmd()` holds it shared for the whole retry
    /// ladder; `set_read_only()` takes it exclusively and thereby drains
    /// every in-flight command first.
    read_only: RwLock<bool>,
    cmd_sem: Semaphore,
    /// Memoized global filter; `None` means stale.
    filter: Mutex<Option<String>>,
    maps: Mutex<CacheMaps>,
    stats: CacheStats,
}

impl LvmCache<SudoRunner> {
    pub fn new(config: LvmConfig) -> Self {
        let runner = SudoRunner::new(&config);
        let mapper = Arc::new(DmsetupMapper::new(&config));
        LvmCache::with_collaborators(
            runner,
            config,
            Arc::new(SysfsDevices),
            mapper,
            Arc::new(ProcFsInspector),
        )
    }
}

impl<R: CommandRunner> LvmCache<R> {
    pub fn with_collaborators(
        runner: R,
        config: LvmConfig,
        devices: Arc<dyn DeviceEnumerator>,
        mapper: Arc<dyn DeviceMapper>,
        procs: Arc<dyn ProcessInspector>,
    ) -> Self {
        LvmCache {
            runner,
            config,
            devices,
            mapper,
            procs,
            read_only: RwLock::new(false),
            cmd_sem: Semaphore::new(MAX_COMMANDS),
            filter: Mutex::new(None),
            maps: Mutex::new(CacheMaps::default()),
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &LvmConfig {
        &self.config
    }

    // ─── command path ───

    /// Run an lvm command (`args` starts at the subcommand), wrapped with a
    /// rendered `--config`.
    ///
    /// When `devices` is non-empty the filter accepts exactly those devices;
    /// otherwise the memoized global filter is used. A failing command is
    /// retried once with a rebuilt global filter, and in read-only mode up
    /// to [`READ_ONLY_RETRIES`] more times with exponential backoff.
    pub async fn cmd(&self, args: &[String], devices: &[String]) -> Result<RunOutput, LvmError> {
        let _permit = self.cmd_sem.acquire().await.expect("command semaphore closed");
        let read_only = self.read_only.read().await;
        let locking_type = if *read_only { 4 } else { 1 };

        let specific = self.wrap_command(args, devices, locking_type)?;
        let mut output = self.runner.run(&specific).await?;
        if output.rc != 0 {
            // A LUN that arrived after the filter was built produces
            // zero-row output; one retry with a rebuilt global filter is
            // cheaper than keeping the filter perfectly fresh.
            self.invalidate_filter();
            let wider = self.wrap_command(args, &[], locking_type)?;
            if wider != specific {
                output = self.runner.run(&wider).await?;
            }
            if output.rc != 0 && *read_only {
                // Read-only failures are usually races against the pool
                // master's metadata writer; back off and retry.
                let delays = ExponentialBackoff::from_millis(2)
                    .factor(50)
                    .take(READ_ONLY_RETRIES);
                for delay in delays {
                    tokio::time::sleep(delay).await;
                    output = self.runner.run(&wider).await?;
                    if output.rc == 0 {
                        break;
                    }
                }
            }
        }
        Ok(output)
    }

    fn wrap_command(
        &self,
        args: &[String],
        devices: &[String],
        locking_type: u32,
    ) -> Result<Vec<String>, LvmError> {
        let dev_filter = if devices.is_empty() {
            self.cached_filter()?
        } else {
            build_filter(devices, &self.config.dev_whitelist)
        };
        let conf = render_config(&dev_filter, locking_type);
        let mut wrapped = Vec::with_capacity(args.len() + 2);
        wrapped.push(args[0].clone());
        wrapped.push("--config".to_string());
        wrapped.push(conf);
        wrapped.extend(args[1..].iter().cloned());
        Ok(wrapped)
    }

    fn cached_filter(&self) -> Result<String, LvmError> {
        let mut memo = self.filter.lock();
        if let Some(filter) = memo.as_ref() {
            return Ok(filter.clone());
        }
        // Multipath enumeration is expensive; rebuild only on demand.
        let devices = self.devices.multipath_devices()?;
        let filter = build_filter(devices, &self.config.dev_whitelist);
        *memo = Some(filter.clone());
        Ok(filter)
    }

    pub(crate) fn invalidate_filter(&self) {
        *self.filter.lock() = None;
    }

    /// Switch between read-write (`locking_type=1`) and read-only
    /// (`locking_type=4`) operation. Waits for in-flight commands.
    pub async fn set_read_only(&self, value: bool) {
        let mut read_only = self.read_only.write().await;
        if *read_only != value {
            info!(
                "Switching to {} mode",
                if value { "read-only" } else { "read-write" }
            );
            *read_only = value;
        }
    }

    pub async fn read_only(&self) -> bool {
        *self.read_only.read().await
    }

    /// Run a report command, folding spawn failures into a synthetic
    /// non-zero result so reload bookkeeping sees them as failures.
    async fn run_report(&self, args: &[String], devices: &[String]) -> RunOutput {
        match self.cmd(args, devices).await {
            Ok(output) => output,
            Err(err) => {
                warn!("lvm {} failed to run: {err}", args[0]);
                RunOutput {
                    rc: -1,
                    out: Vec::new(),
                    err: vec![err.to_string()],
                }
            }
        }
    }

    /// Member devices of the given VGs, for filter scoping. An unknown or
    /// stale VG yields an empty list (command runs with the global filter).
    pub(crate) fn vg_devs(&self, vg_names: &[String]) -> Vec<String> {
        let maps = self.maps.lock();
        let mut devices = Vec::new();
        for name in vg_names {
            match maps.vgs.get(name).and_then(CacheEntry::fresh) {
                Some(vg) => devices.extend(vg.pv_name.iter().cloned()),
                None => return Vec::new(),
            }
        }
        devices
    }

    pub(crate) fn vg_devs_of(&self, vg_name: &str) -> Vec<String> {
        self.vg_devs(std::slice::from_ref(&vg_name.to_string()))
    }

    // ─── reload ───

    pub(crate) async fn reload_pvs(&self, names: &[String]) -> Result<(), LvmError> {
        let mut args = pvs_cmd();
        args.extend(names.iter().cloned());
        let output = self.run_report(&args, &[]).await;

        if output.rc != 0 {
            warn!("lvm pvs failed: rc={} err={:?}", output.rc, output.err);
            let mut maps = self.maps.lock();
            let scope: Vec<String> = if names.is_empty() {
                maps.pvs.keys().cloned().collect()
            } else {
                names.to_vec()
            };
            let mut unreadable = Vec::new();
            for name in scope {
                if maps.pvs.get(&name).is_some_and(CacheEntry::is_stale) {
                    maps.pvs
                        .insert(name.clone(), CacheEntry::Unreadable(name.clone()));
                    unreadable.push(name);
                }
            }
            if !unreadable.is_empty() {
                warn!("Marked pvs unreadable: {}", logged(&unreadable));
            }
            return Ok(());
        }

        let mut updated: HashMap<String, PhysicalVolume> = HashMap::new();
        for line in &output.out {
            if let Some(pv) = PhysicalVolume::parse(line)? {
                updated.insert(pv.name.clone(), pv);
            }
        }

        let mut maps = self.maps.lock();
        let scope: Vec<String> = if names.is_empty() {
            maps.pvs.keys().cloned().collect()
        } else {
            names.to_vec()
        };
        for (name, pv) in &updated {
            maps.pvs.insert(name.clone(), CacheEntry::Fresh(pv.clone()));
        }
        for name in scope {
            if !updated.contains_key(&name) && maps.pvs.remove(&name).is_some() {
                warn!("Removing stale PV {name}");
            }
        }
        if names.is_empty() {
            maps.stale_pv = false;
        }
        Ok(())
    }

    pub(crate) async fn reload_vgs(&self, names: &[String]) -> Result<(), LvmError> {
        let mut args = vgs_cmd();
        args.extend(names.iter().cloned());
        let devices = self.vg_devs(names);
        let output = self.run_report(&args, &devices).await;

        if output.rc != 0 {
            warn!("lvm vgs failed: rc={} err={:?}", output.rc, output.err);
            let mut maps = self.maps.lock();
            let scope: Vec<String> = if names.is_empty() {
                maps.vgs.keys().cloned().collect()
            } else {
                names.to_vec()
            };
            let mut unreadable = Vec::new();
            for name in scope {
                if maps.vgs.get(&name).is_some_and(CacheEntry::is_stale) {
                    maps.vgs
                        .insert(name.clone(), CacheEntry::Unreadable(name.clone()));
                    unreadable.push(name);
                }
            }
            if !unreadable.is_empty() {
                warn!("Marked vgs unreadable: {}", logged(&unreadable));
            }
            // Fall through: vgs may emit usable rows even on failure.
        }

        let vgs = parse_vgs(&output.out)?;
        let mut maps = self.maps.lock();
        let mut updated: HashSet<String> = HashSet::new();
        for vg in vgs {
            updated.insert(vg.name.clone());
            maps.vgs.insert(vg.name.clone(), CacheEntry::Fresh(vg));
        }
        if output.rc == 0 {
            let scope: Vec<String> = if names.is_empty() {
                maps.vgs.keys().cloned().collect()
            } else {
                names.to_vec()
            };
            for name in scope {
                if !updated.contains(&name) && maps.vgs.remove(&name).is_some() {
                    warn!("Removing stale VG {name}");
                }
            }
            if names.is_empty() {
                maps.stale_vg = false;
            }
        }
        Ok(())
    }

    pub(crate) async fn reload_lvs(&self, vg_name: &str, names: &[String]) -> Result<(), LvmError> {
        let mut args = lvs_cmd();
        if names.is_empty() {
            args.push(vg_name.to_string());
        } else {
            args.extend(names.iter().map(|lv| format!("{vg_name}/{lv}")));
        }
        let devices = self.vg_devs_of(vg_name);
        let output = self.run_report(&args, &devices).await;

        if output.rc != 0 {
            warn!("lvm lvs failed: rc={} err={:?}", output.rc, output.err);
            let mut maps = self.maps.lock();
            let scope: Vec<String> = if names.is_empty() {
                maps.lvs
                    .keys()
                    .filter(|(vg, _)| vg == vg_name)
                    .map(|(_, lv)| lv.clone())
                    .collect()
            } else {
                names.to_vec()
            };
            let mut unreadable = Vec::new();
            for lv in scope {
                let key = (vg_name.to_string(), lv.clone());
                if maps.lvs.get(&key).is_some_and(CacheEntry::is_stale) {
                    maps.lvs.insert(key, CacheEntry::Unreadable(lv.clone()));
                    unreadable.push(lv);
                }
            }
            if !unreadable.is_empty() {
                warn!("Marked lvs of {vg_name} unreadable: {}", logged(&unreadable));
            }
            return Ok(());
        }

        let mut updated: HashMap<(String, String), LogicalVolume> = HashMap::new();
        for line in &output.out {
            let lv = LogicalVolume::parse(line)?;
            // Only the first extent row of a multi-segment LV is kept.
            if lv.seg_start_pe != 0 {
                continue;
            }
            updated.insert((lv.vg_name.clone(), lv.name.clone()), lv);
        }

        let mut maps = self.maps.lock();
        for (key, lv) in &updated {
            maps.lvs.insert(key.clone(), CacheEntry::Fresh(lv.clone()));
        }
        let scope: Vec<String> = if names.is_empty() {
            maps.lvs
                .keys()
                .filter(|(vg, _)| vg == vg_name)
                .map(|(_, lv)| lv.clone())
                .collect()
        } else {
            names.to_vec()
        };
        for lv in scope {
            let key = (vg_name.to_string(), lv.clone());
            if !updated.contains_key(&key) && maps.lvs.remove(&key).is_some() {
                warn!("Removing stale lv: {vg_name}/{lv}");
            }
        }
        if names.is_empty() {
            maps.fresh_lv.insert(vg_name.to_string());
        }
        Ok(())
    }

    /// Bulk LV load used only during bootstrap: replaces the LV map
    /// wholesale and marks every listed VG fresh.
    pub(crate) async fn load_all_lvs(&self) -> Result<(), LvmError> {
        let args = lvs_cmd();
        let output = self.run_report(&args, &[]).await;
        if output.rc != 0 {
            warn!("lvm lvs failed: rc={} err={:?}", output.rc, output.err);
            return Ok(());
        }
        let mut fresh: HashMap<(String, String), LogicalVolume> = HashMap::new();
        for line in &output.out {
            let lv = LogicalVolume::parse(line)?;
            if lv.seg_start_pe != 0 {
                continue;
            }
            fresh.insert((lv.vg_name.clone(), lv.name.clone()), lv);
        }
        let mut maps = self.maps.lock();
        maps.fresh_lv = fresh.keys().map(|(vg, _)| vg.clone()).collect();
        maps.lvs = fresh
            .into_iter()
            .map(|(key, lv)| (key, CacheEntry::Fresh(lv)))
            .collect();
        Ok(())
    }

    pub(crate) async fn load_cache(&self) -> Result<(), LvmError> {
        self.reload_pvs(&[]).await?;
        self.reload_vgs(&[]).await?;
        self.load_all_lvs().await
    }

    // ─── invalidation ───

    pub(crate) fn invalidate_pvs<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut maps = self.maps.lock();
        for name in names {
            maps.pvs.insert(name.clone(), CacheEntry::Stale(name));
        }
    }

    pub fn invalidate_all_pvs(&self) {
        let mut maps = self.maps.lock();
        maps.stale_pv = true;
        maps.pvs.clear();
    }

    /// Mark every fresh PV belonging to the VG stale.
    pub(crate) fn invalidate_vg_pvs(&self, vg_name: &str) {
        let mut maps = self.maps.lock();
        let members: Vec<String> = maps
            .pvs
            .values()
            .filter_map(CacheEntry::fresh)
            .filter(|pv| pv.vg_name == vg_name)
            .map(|pv| pv.name.clone())
            .collect();
        for name in members {
            maps.pvs.insert(name.clone(), CacheEntry::Stale(name));
        }
    }

    pub(crate) fn invalidate_vgs<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut maps = self.maps.lock();
        for name in names {
            maps.vgs.insert(name.clone(), CacheEntry::Stale(name));
        }
    }

    pub fn invalidate_all_vgs(&self) {
        let mut maps = self.maps.lock();
        maps.stale_vg = true;
        maps.vgs.clear();
    }

    /// Mark LVs stale: the named ones, or every LV of the VG when `names`
    /// is empty. Either way the VG loses its fresh-LV indication.
    pub(crate) fn invalidate_lvs(&self, vg_name: &str, names: &[String]) {
        let mut maps = self.maps.lock();
        if names.is_empty() {
            let keys: Vec<(String, String)> = maps
                .lvs
                .iter()
                .filter(|((vg, _), entry)| vg == vg_name && !entry.is_stale())
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                let lv = key.1.clone();
                maps.lvs.insert(key, CacheEntry::Stale(lv));
            }
        } else {
            for lv in names {
                maps.lvs.insert(
                    (vg_name.to_string(), lv.clone()),
                    CacheEntry::Stale(lv.clone()),
                );
            }
        }
        maps.fresh_lv.remove(vg_name);
    }

    pub fn invalidate_all_lvs(&self) {
        let mut maps = self.maps.lock();
        maps.lvs.clear();
        maps.fresh_lv.clear();
    }

    /// Drop everything; the next reads bulk-reload from lvm.
    pub fn flush(&self) {
        self.invalidate_all_pvs();
        self.invalidate_all_vgs();
        self.invalidate_all_lvs();
    }

    pub(crate) fn forget_vg(&self, vg_name: &str) {
        self.maps.lock().vgs.remove(vg_name);
    }

    pub(crate) fn forget_lvs(&self, vg_name: &str, names: &[String]) {
        let mut maps = self.maps.lock();
        for lv in names {
            maps.lvs.remove(&(vg_name.to_string(), lv.clone()));
        }
    }

    // ─── read API ───

    pub async fn get_pv(&self, pv_name: &str) -> Result<PhysicalVolume, LvmError> {
        let name = fq_pv_name(pv_name);
        if let Some(pv) = self.maps.lock().pvs.get(&name).and_then(CacheEntry::fresh) {
            self.stats.hit();
            return Ok(pv.clone());
        }
        self.stats.miss();
        self.reload_pvs(std::slice::from_ref(&name)).await?;
        match self.maps.lock().pvs.get(&name) {
            Some(CacheEntry::Fresh(pv)) => Ok(pv.clone()),
            Some(CacheEntry::Unreadable(_)) => {
                warn!("{name} can't be reloaded, please check your storage connections");
                Err(LvmError::FailedReload { name })
            }
            _ => Err(LvmError::InaccessiblePhysDev {
                devices: vec![name],
            }),
        }
    }

    pub async fn get_all_pvs(&self) -> Result<Vec<PhysicalVolume>, LvmError> {
        let (bulk, stale): (bool, Vec<String>) = {
            let maps = self.maps.lock();
            (
                maps.stale_pv,
                maps.pvs
                    .iter()
                    .filter(|(_, entry)| entry.is_stale())
                    .map(|(name, _)| name.clone())
                    .collect(),
            )
        };
        if bulk {
            self.stats.miss();
            self.reload_pvs(&[]).await?;
        } else if !stale.is_empty() {
            self.stats.miss();
            self.reload_pvs(&stale).await?;
        } else {
            self.stats.hit();
        }
        Ok(self
            .maps
            .lock()
            .pvs
            .values()
            .filter_map(CacheEntry::fresh)
            .cloned()
            .collect())
    }

    pub async fn get_vg(&self, vg_name: &str) -> Result<VolumeGroup, LvmError> {
        if let Some(vg) = self.maps.lock().vgs.get(vg_name).and_then(CacheEntry::fresh) {
            self.stats.hit();
            return Ok(vg.clone());
        }
        self.stats.miss();
        self.reload_vgs(std::slice::from_ref(&vg_name.to_string()))
            .await?;
        match self.maps.lock().vgs.get(vg_name) {
            Some(CacheEntry::Fresh(vg)) => Ok(vg.clone()),
            Some(CacheEntry::Unreadable(_)) => {
                warn!("{vg_name} can't be reloaded, please check your storage connections");
                Err(LvmError::FailedReload {
                    name: vg_name.to_string(),
                })
            }
            _ => Err(LvmError::VolumeGroupDoesNotExist {
                vg_name: vg_name.to_string(),
            }),
        }
    }

    /// Fetch a set of VGs, reloading only the stale ones in a single scoped
    /// command. Returns only the requested names even though the reload may
    /// have cached unrelated rows.
    pub async fn get_vgs(&self, vg_names: &[String]) -> Result<Vec<VolumeGroup>, LvmError> {
        let stale: Vec<String> = {
            let maps = self.maps.lock();
            vg_names
                .iter()
                .filter(|name| {
                    maps.vgs
                        .get(name.as_str())
                        .is_none_or(CacheEntry::is_stale)
                })
                .cloned()
                .collect()
        };
        if stale.is_empty() {
            self.stats.hit();
        } else {
            self.stats.miss();
            self.reload_vgs(&stale).await?;
        }
        let maps = self.maps.lock();
        Ok(vg_names
            .iter()
            .filter_map(|name| maps.vgs.get(name.as_str()).and_then(CacheEntry::fresh))
            .cloned()
            .collect())
    }

    pub async fn get_all_vgs(&self) -> Result<Vec<VolumeGroup>, LvmError> {
        let (bulk, stale): (bool, Vec<String>) = {
            let maps = self.maps.lock();
            (
                maps.stale_vg,
                maps.vgs
                    .iter()
                    .filter(|(_, entry)| entry.is_stale())
                    .map(|(name, _)| name.clone())
                    .collect(),
            )
        };
        if bulk {
            self.stats.miss();
            self.reload_vgs(&[]).await?;
        } else if !stale.is_empty() {
            self.stats.miss();
            self.reload_vgs(&stale).await?;
        } else {
            self.stats.hit();
        }
        Ok(self
            .maps
            .lock()
            .vgs
            .values()
            .filter_map(CacheEntry::fresh)
            .cloned()
            .collect())
    }

    pub async fn get_lv(&self, vg_name: &str, lv_name: &str) -> Result<LogicalVolume, LvmError> {
        let key = (vg_name.to_string(), lv_name.to_string());
        if let Some(lv) = self.maps.lock().lvs.get(&key).and_then(CacheEntry::fresh) {
            self.stats.hit();
            return Ok(lv.clone());
        }
        self.stats.miss();
        // While here, reload every LV of the VG; it costs the same command.
        self.reload_lvs(vg_name, &[]).await?;
        match self.maps.lock().lvs.get(&key) {
            Some(CacheEntry::Fresh(lv)) => Ok(lv.clone()),
            Some(CacheEntry::Unreadable(_)) => {
                warn!(
                    "{vg_name}/{lv_name} can't be reloaded, please check your storage connections"
                );
                Err(LvmError::FailedReload {
                    name: format!("{vg_name}/{lv_name}"),
                })
            }
            _ => Err(LvmError::LogicalVolumeDoesNotExist {
                vg_name: vg_name.to_string(),
                lv_name: lv_name.to_string(),
            }),
        }
    }

    /// Fresh LVs of a VG. Reloads when LV caching is disabled, the VG's
    /// listing was never completed, or any cached LV of the VG is stale.
    pub async fn get_lvs(&self, vg_name: &str) -> Result<Vec<LogicalVolume>, LvmError> {
        let needs_reload = {
            let maps = self.maps.lock();
            !self.config.cache_lvs
                || !maps.fresh_lv.contains(vg_name)
                || maps
                    .lvs
                    .iter()
                    .any(|((vg, _), entry)| vg == vg_name && entry.is_stale())
        };
        if needs_reload {
            self.stats.miss();
            self.reload_lvs(vg_name, &[]).await?;
        } else {
            self.stats.hit();
        }
        let maps = self.maps.lock();
        Ok(maps
            .lvs
            .iter()
            .filter(|((vg, _), _)| vg == vg_name)
            .filter_map(|(_, entry)| entry.fresh())
            .cloned()
            .collect())
    }

    /// PV names of a VG. Answers from the current snapshot when it is
    /// fresh — the list may be momentarily stale if another task is mid
    /// reload — and falls back to a full VG lookup otherwise.
    pub async fn list_pv_names(&self, vg_name: &str) -> Result<Vec<String>, LvmError> {
        if let Some(vg) = self.maps.lock().vgs.get(vg_name).and_then(CacheEntry::fresh) {
            return Ok(vg.pv_name.clone());
        }
        Ok(self.get_vg(vg_name).await?.pv_name)
    }

    pub fn stats(&self) -> CacheInfo {
        self.stats.info()
    }

    pub fn clear_stats(&self) {
        self.stats.clear();
    }
}
