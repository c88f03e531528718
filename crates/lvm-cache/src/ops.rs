//! Public operations: the typed facade over the cache engine. Every
//! mutating operation invalidates the entries it may have touched before
//! returning, and failures surface as the specific error kind for the
//! operation.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use futures::future::join_all;
use log::{debug, error, info, warn};

use crate::constants::{LVM_NOBACKUP, MIB, SUPPORTED_BLOCK_SIZES, VG_EXTENT_SIZE_MB};
use crate::engine::LvmCache;
use crate::error::LvmError;
use crate::host::ProcessInfo;
use crate::records::{LogicalVolume, PhysicalVolume, basename, fq_pv_name, lv_path};
use crate::runner::CommandRunner;

fn round_up_to_extent(bytes: u64, extent_size: u64) -> u64 {
    bytes.div_ceil(extent_size) * extent_size
}

fn nobackup() -> impl Iterator<Item = String> {
    LVM_NOBACKUP.iter().map(|s| s.to_string())
}

/// Basenames of `<root>/<vg>/*/*`: LVs backing prepared images, which must
/// survive bootstrap.
fn prepared_lvs(root: &Path, vg_name: &str) -> HashSet<String> {
    let mut found = HashSet::new();
    let Ok(images) = fs::read_dir(root.join(vg_name)) else {
        return found;
    };
    for image in images.flatten() {
        let Ok(volumes) = fs::read_dir(image.path()) else {
            continue;
        };
        for volume in volumes.flatten() {
            if let Some(name) = volume.file_name().to_str() {
                found.insert(name.to_string());
            }
        }
    }
    found
}

impl<R: CommandRunner> LvmCache<R> {
    /// Whether the LV's device node exists, i.e. the LV is active on this
    /// host.
    pub fn is_lv_active(&self, vg_name: &str, lv_name: &str) -> bool {
        lv_path(&self.config.dev_root, vg_name, lv_name).exists()
    }

    fn check_pv_block_sizes(
        &self,
        pv_names: &[String],
        vg_block_size: Option<u64>,
    ) -> Result<(), LvmError> {
        let mut expected = vg_block_size;
        for pv in pv_names {
            let sizes = self.devices.block_sizes(basename(pv))?;
            if !SUPPORTED_BLOCK_SIZES.contains(&sizes.logical) || sizes.physical < sizes.logical {
                return Err(LvmError::DeviceBlockSizeError {
                    logical: sizes.logical,
                    physical: sizes.physical,
                });
            }
            match expected {
                None => expected = Some(sizes.logical),
                Some(vg_size) if sizes.logical != vg_size => {
                    return Err(LvmError::VolumeGroupBlockSizeError {
                        vg_block_size: vg_size,
                        device_block_size: sizes.logical,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn init_pvs(
        &self,
        pv_names: &[String],
        metadata_size_mb: u64,
        force: bool,
    ) -> Result<(), LvmError> {
        let mut args: Vec<String> = vec!["pvcreate".to_string()];
        if force {
            // Leftover mappings layered on the devices keep them busy.
            for pv in pv_names {
                if let Err(err) = self.mapper.remove_mappings_holding_device(basename(pv)) {
                    warn!("Could not remove mappings holding {pv}: {err}");
                }
            }
            args.extend(["-y".to_string(), "-ff".to_string()]);
        }
        if metadata_size_mb != 0 {
            args.extend([
                "--metadatasize".to_string(),
                format!("{metadata_size_mb}m"),
                "--metadatacopies".to_string(),
                "2".to_string(),
                "--metadataignore".to_string(),
                "y".to_string(),
            ]);
        }
        args.extend(pv_names.iter().cloned());
        let output = self.cmd(&args, pv_names).await?;
        if output.rc != 0 {
            warn!("pvcreate failed: rc={} err={:?}", output.rc, output.err);
            return Err(LvmError::PhysDevInitializationError {
                devices: pv_names.to_vec(),
            });
        }
        self.invalidate_pvs(pv_names.iter().cloned());
        Ok(())
    }

    /// Initialize `devices` as PVs and create a VG on them. Both metadata
    /// areas are written on every PV but enabled only on the first one.
    pub async fn create_vg(
        &self,
        vg_name: &str,
        devices: &[String],
        initial_tag: Option<&str>,
        metadata_size_mb: u64,
        force: bool,
    ) -> Result<(), LvmError> {
        let pvs: Vec<String> = devices.iter().map(|dev| fq_pv_name(dev)).collect();
        self.check_pv_block_sizes(&pvs, None)?;
        self.init_pvs(&pvs, metadata_size_mb, force).await?;

        let args = vec![
            "pvchange".to_string(),
            "--metadataignore".to_string(),
            "n".to_string(),
            pvs[0].clone(),
        ];
        let output = self.cmd(&args, &pvs).await?;
        if output.rc != 0 {
            return Err(LvmError::PhysDevInitializationError {
                devices: vec![pvs[0].clone()],
            });
        }

        info!("Creating VG {vg_name} on {pvs:?}");
        let mut args = vec![
            "vgcreate".to_string(),
            "--physicalextentsize".to_string(),
            format!("{VG_EXTENT_SIZE_MB}m"),
        ];
        if let Some(tag) = initial_tag {
            args.extend(["--addtag".to_string(), tag.to_string()]);
        }
        args.push(vg_name.to_string());
        args.extend(pvs.iter().cloned());
        let output = self.cmd(&args, &pvs).await?;
        if output.rc != 0 {
            return Err(LvmError::VolumeGroupCreateError {
                vg_name: vg_name.to_string(),
                devices: pvs,
            });
        }
        self.invalidate_pvs(pvs.iter().cloned());
        self.invalidate_vgs([vg_name.to_string()]);
        Ok(())
    }

    /// Best-effort deactivation followed by `vgremove -f`. On failure the VG
    /// is reintroduced as stale so the next lookup re-reads it.
    pub async fn remove_vg(&self, vg_name: &str) -> Result<(), LvmError> {
        if let Err(err) = self.deactivate_vg(vg_name).await {
            warn!("Failed to deactivate VG {vg_name} before removal: {err}");
        }
        info!("Removing VG {vg_name}");
        let args = vec!["vgremove".to_string(), "-f".to_string(), vg_name.to_string()];
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        // Member PVs need a reload either way: removal orphans them, and a
        // failed removal means something is wrong with the devices.
        self.invalidate_vg_pvs(vg_name);
        if output.rc != 0 {
            self.invalidate_vgs([vg_name.to_string()]);
            return Err(LvmError::VolumeGroupRemoveError {
                vg_name: vg_name.to_string(),
            });
        }
        self.forget_vg(vg_name);
        Ok(())
    }

    pub async fn extend_vg(
        &self,
        vg_name: &str,
        devices: &[String],
        force: bool,
    ) -> Result<(), LvmError> {
        let pvs: Vec<String> = devices.iter().map(|dev| fq_pv_name(dev)).collect();
        let vg = self.get_vg(vg_name).await?;
        // New members must match the block size of the existing ones.
        let vg_block = match vg.pv_name.first() {
            Some(member) => Some(self.devices.block_sizes(basename(member))?.logical),
            None => None,
        };
        self.check_pv_block_sizes(&pvs, vg_block)?;
        if let Some(member) = pvs.iter().find(|pv| vg.pv_name.contains(pv)) {
            error!("Device {member} is already a member of VG {vg_name}");
            return Err(LvmError::VolumeGroupExtendError {
                vg_name: vg_name.to_string(),
                devices: pvs,
            });
        }
        // Format the extension PVs like the members already in the VG.
        self.init_pvs(&pvs, vg.vg_mda_size / MIB, force).await?;

        info!("Extending VG {vg_name} with {pvs:?}");
        let mut args = vec!["vgextend".to_string(), vg_name.to_string()];
        args.extend(pvs.iter().cloned());
        let mut devs = self.vg_devs_of(vg_name);
        devs.extend(pvs.iter().cloned());
        let output = self.cmd(&args, &devs).await?;
        if output.rc != 0 {
            return Err(LvmError::VolumeGroupExtendError {
                vg_name: vg_name.to_string(),
                devices: pvs,
            });
        }
        self.invalidate_pvs(pvs.iter().cloned());
        self.invalidate_vgs([vg_name.to_string()]);
        Ok(())
    }

    pub async fn reduce_vg(&self, vg_name: &str, device: &str) -> Result<(), LvmError> {
        let pv_name = fq_pv_name(device);
        info!("Reducing VG {vg_name} by {pv_name}");
        let args = vec!["vgreduce".to_string(), vg_name.to_string(), pv_name.clone()];
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        if output.rc != 0 {
            return Err(LvmError::VolumeGroupReduceError {
                vg_name: vg_name.to_string(),
                device: pv_name,
            });
        }
        self.invalidate_pvs([pv_name]);
        self.invalidate_vgs([vg_name.to_string()]);
        Ok(())
    }

    /// Create an LV of `size_mb` MiB. When `activate` is false the volume
    /// is left unavailable; when true its device node is chowned to the
    /// configured disk image ownership if needed.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_lv(
        &self,
        vg_name: &str,
        lv_name: &str,
        size_mb: u64,
        activate: bool,
        contiguous: bool,
        initial_tags: &[String],
        device: Option<&str>,
    ) -> Result<(), LvmError> {
        let mut args: Vec<String> = vec!["lvcreate".to_string()];
        args.extend(nobackup());
        args.extend([
            "--contiguous".to_string(),
            (if contiguous { "y" } else { "n" }).to_string(),
            "--size".to_string(),
            format!("{size_mb}m"),
        ]);
        for tag in initial_tags {
            args.extend(["--addtag".to_string(), tag.clone()]);
        }
        args.extend(["--name".to_string(), lv_name.to_string(), vg_name.to_string()]);
        if let Some(device) = device {
            args.push(fq_pv_name(device));
        }
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        if output.rc != 0 {
            return Err(LvmError::CannotCreateLogicalVolume {
                vg_name: vg_name.to_string(),
                lv_name: lv_name.to_string(),
                err: output.err,
            });
        }
        self.invalidate_vgs([vg_name.to_string()]);
        self.invalidate_lvs(vg_name, std::slice::from_ref(&lv_name.to_string()));

        if activate {
            let path = lv_path(&self.config.dev_root, vg_name, lv_name);
            let owner = (self.config.disk_image_uid, self.config.disk_image_gid);
            let current = fs::metadata(&path)
                .ok()
                .map(|meta| (meta.uid(), meta.gid()));
            if current != Some(owner) {
                std::os::unix::fs::chown(&path, Some(owner.0), Some(owner.1))?;
            }
        } else {
            self.set_lv_availability(vg_name, std::slice::from_ref(&lv_name.to_string()), false)
                .await?;
        }
        Ok(())
    }

    pub async fn remove_lvs(&self, vg_name: &str, lv_names: &[String]) -> Result<(), LvmError> {
        // Active LVs should have been deactivated by the caller.
        for lv in lv_names {
            if self.is_lv_active(vg_name, lv) {
                warn!("Removing active volume {vg_name}/{lv}");
            }
        }
        let mut args = vec!["lvremove".to_string(), "-f".to_string()];
        args.extend(nobackup());
        args.extend(lv_names.iter().map(|lv| format!("{vg_name}/{lv}")));
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        if output.rc != 0 {
            self.invalidate_lvs(vg_name, lv_names);
            return Err(LvmError::CannotRemoveLogicalVolume {
                vg_name: vg_name.to_string(),
                lv_names: lv_names.to_vec(),
            });
        }
        self.forget_lvs(vg_name, lv_names);
        self.invalidate_vgs([vg_name.to_string()]);
        Ok(())
    }

    /// Extend an LV to at least `size_mb` MiB, rounded up to a whole number
    /// of extents. A volume already large enough is left untouched.
    pub async fn extend_lv(
        &self,
        vg_name: &str,
        lv_name: &str,
        size_mb: u64,
    ) -> Result<(), LvmError> {
        let lv = self.get_lv(vg_name, lv_name).await?;
        let vg = self.get_vg(vg_name).await?;
        let requested = round_up_to_extent(size_mb * MIB, vg.extent_size);
        if lv.size >= requested {
            return Ok(());
        }

        let mut args: Vec<String> = vec!["lvextend".to_string()];
        args.extend(nobackup());
        args.extend([
            "--size".to_string(),
            format!("{size_mb}m"),
            format!("{vg_name}/{lv_name}"),
        ]);
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        // Cached metadata is suspect after either outcome.
        self.invalidate_vgs([vg_name.to_string()]);
        self.invalidate_lvs(vg_name, std::slice::from_ref(&lv_name.to_string()));
        if output.rc == 0 {
            return Ok(());
        }

        // Another host may have extended the volume first; reload and tell
        // that apart from a genuine failure.
        let lv = self.get_lv(vg_name, lv_name).await?;
        if lv.size >= requested {
            debug!("LV {vg_name}/{lv_name} already extended");
            return Ok(());
        }
        let vg = self.get_vg(vg_name).await?;
        let free = vg.extent_size * vg.free_count;
        let needed = requested - lv.size;
        if free < needed {
            Err(LvmError::VolumeGroupSizeError {
                vg_name: vg_name.to_string(),
                free,
                needed,
            })
        } else {
            Err(LvmError::LogicalVolumeExtendError {
                vg_name: vg_name.to_string(),
                lv_name: lv_name.to_string(),
            })
        }
    }

    pub async fn reduce_lv(
        &self,
        vg_name: &str,
        lv_name: &str,
        size_mb: u64,
        force: bool,
    ) -> Result<(), LvmError> {
        info!("Reducing LV {vg_name}/{lv_name} to {size_mb}m (force={force})");
        let mut args: Vec<String> = vec!["lvreduce".to_string()];
        args.extend(nobackup());
        if force {
            args.push("--force".to_string());
        }
        args.extend([
            "--size".to_string(),
            format!("{size_mb}m"),
            format!("{vg_name}/{lv_name}"),
        ]);
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        self.invalidate_vgs([vg_name.to_string()]);
        self.invalidate_lvs(vg_name, std::slice::from_ref(&lv_name.to_string()));
        if output.rc == 0 {
            return Ok(());
        }

        // Only the pool master reduces volumes, so a reload is trustworthy:
        // an already-reduced volume is a success.
        let vg = self.get_vg(vg_name).await?;
        let lv = self.get_lv(vg_name, lv_name).await?;
        let requested = round_up_to_extent(size_mb * MIB, vg.extent_size);
        if lv.size <= requested {
            debug!("LV {vg_name}/{lv_name} already reduced");
            return Ok(());
        }
        Err(LvmError::LogicalVolumeReduceError {
            vg_name: vg_name.to_string(),
            lv_name: lv_name.to_string(),
            size_mb,
        })
    }

    /// Shared `lvchange` helper: runs with the VG's device scope and
    /// invalidates the touched LVs whatever the outcome.
    async fn change_lv(
        &self,
        vg_name: &str,
        lv_names: &[String],
        attrs: &[String],
    ) -> Result<(), LvmError> {
        let mut args: Vec<String> = vec!["lvchange".to_string()];
        args.extend(nobackup());
        args.extend(attrs.iter().cloned());
        args.extend(lv_names.iter().map(|lv| format!("{vg_name}/{lv}")));
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        self.invalidate_lvs(vg_name, lv_names);
        if output.rc != 0 {
            return Err(LvmError::CommandFailed {
                rc: output.rc,
                err: output.err,
            });
        }
        Ok(())
    }

    async fn set_lv_availability(
        &self,
        vg_name: &str,
        lv_names: &[String],
        available: bool,
    ) -> Result<(), LvmError> {
        let flag = if available { "y" } else { "n" };
        let attrs = vec!["--available".to_string(), flag.to_string()];
        match self.change_lv(vg_name, lv_names, &attrs).await {
            Ok(()) => Ok(()),
            Err(LvmError::CommandFailed { rc, err }) => {
                warn!(
                    "lvchange --available {flag} on {vg_name}/{lv_names:?} failed: rc={rc} err={err:?}"
                );
                if available {
                    Err(LvmError::CannotActivateLogicalVolume {
                        vg_name: vg_name.to_string(),
                        lv_names: lv_names.to_vec(),
                    })
                } else {
                    // Find out who keeps the volumes open.
                    let holders: Vec<(String, Vec<ProcessInfo>)> = lv_names
                        .iter()
                        .map(|lv| {
                            let path = lv_path(&self.config.dev_root, vg_name, lv);
                            let procs = self.procs.holders(&path);
                            (path.display().to_string(), procs)
                        })
                        .filter(|(_, procs)| !procs.is_empty())
                        .collect();
                    Err(LvmError::CannotDeactivateLogicalVolume {
                        vg_name: vg_name.to_string(),
                        lv_names: lv_names.to_vec(),
                        holders,
                    })
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Refresh the already-active LVs (when `refresh` is set) and activate
    /// the rest.
    pub async fn activate_lvs(
        &self,
        vg_name: &str,
        lv_names: &[String],
        refresh: bool,
    ) -> Result<(), LvmError> {
        let (active, inactive): (Vec<String>, Vec<String>) = lv_names
            .iter()
            .cloned()
            .partition(|lv| self.is_lv_active(vg_name, lv));
        if refresh && !active.is_empty() {
            self.refresh_lvs(vg_name, &active).await?;
        }
        if !inactive.is_empty() {
            self.set_lv_availability(vg_name, &inactive, true).await?;
        }
        Ok(())
    }

    pub async fn deactivate_lvs(&self, vg_name: &str, lv_names: &[String]) -> Result<(), LvmError> {
        let to_deactivate: Vec<String> = lv_names
            .iter()
            .filter(|lv| self.is_lv_active(vg_name, lv))
            .cloned()
            .collect();
        if !to_deactivate.is_empty() {
            self.set_lv_availability(vg_name, &to_deactivate, false)
                .await?;
        }
        Ok(())
    }

    pub async fn rename_lv(
        &self,
        vg_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), LvmError> {
        let mut args: Vec<String> = vec!["lvrename".to_string()];
        args.extend(nobackup());
        args.extend([
            vg_name.to_string(),
            old_name.to_string(),
            new_name.to_string(),
        ]);
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        if output.rc != 0 {
            return Err(LvmError::LogicalVolumeRenameError {
                vg_name: vg_name.to_string(),
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
            });
        }
        self.forget_lvs(vg_name, std::slice::from_ref(&old_name.to_string()));
        self.reload_lvs(vg_name, std::slice::from_ref(&new_name.to_string()))
            .await?;
        Ok(())
    }

    /// Reload the device-mapper tables of active LVs, picking up metadata
    /// changes made on another host.
    pub async fn refresh_lvs(&self, vg_name: &str, lv_names: &[String]) -> Result<(), LvmError> {
        match self
            .change_lv(vg_name, lv_names, &["--refresh".to_string()])
            .await
        {
            Err(LvmError::CommandFailed { .. }) => Err(LvmError::LogicalVolumeRefreshError {
                vg_name: vg_name.to_string(),
                lv_names: lv_names.to_vec(),
            }),
            other => other,
        }
    }

    pub async fn change_lvs_tags(
        &self,
        vg_name: &str,
        lv_names: &[String],
        del_tags: &[String],
        add_tags: &[String],
    ) -> Result<(), LvmError> {
        if del_tags.iter().any(|tag| add_tags.contains(tag)) {
            return Err(LvmError::LogicalVolumeReplaceTagError {
                vg_name: vg_name.to_string(),
                lv_names: lv_names.to_vec(),
            });
        }
        let mut attrs = Vec::new();
        for tag in del_tags {
            attrs.extend(["--deltag".to_string(), tag.clone()]);
        }
        for tag in add_tags {
            attrs.extend(["--addtag".to_string(), tag.clone()]);
        }
        match self.change_lv(vg_name, lv_names, &attrs).await {
            Err(LvmError::CommandFailed { .. }) => Err(LvmError::LogicalVolumeReplaceTagError {
                vg_name: vg_name.to_string(),
                lv_names: lv_names.to_vec(),
            }),
            other => other,
        }
    }

    pub async fn change_vg_tags(
        &self,
        vg_name: &str,
        del_tags: &[String],
        add_tags: &[String],
    ) -> Result<(), LvmError> {
        if del_tags.iter().any(|tag| add_tags.contains(tag)) {
            return Err(LvmError::VolumeGroupReplaceTagError {
                vg_name: vg_name.to_string(),
            });
        }
        let mut args: Vec<String> = vec!["vgchange".to_string()];
        args.extend(nobackup());
        for tag in del_tags {
            args.extend(["--deltag".to_string(), tag.clone()]);
        }
        for tag in add_tags {
            args.extend(["--addtag".to_string(), tag.clone()]);
        }
        args.push(vg_name.to_string());
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        self.invalidate_vgs([vg_name.to_string()]);
        if output.rc != 0 {
            return Err(LvmError::VolumeGroupReplaceTagError {
                vg_name: vg_name.to_string(),
            });
        }
        Ok(())
    }

    /// Set an LV read-write or read-only.
    pub async fn set_rw_lv(&self, vg_name: &str, lv_name: &str, rw: bool) -> Result<(), LvmError> {
        let permission = if rw { "rw" } else { "r" };
        let attrs = vec!["--permission".to_string(), permission.to_string()];
        match self
            .change_lv(vg_name, std::slice::from_ref(&lv_name.to_string()), &attrs)
            .await
        {
            Ok(()) => Ok(()),
            Err(LvmError::CommandFailed { .. }) => {
                let lv = self.get_lv(vg_name, lv_name).await?;
                if lv.writeable == rw {
                    // lvchange refuses a no-op permission change; the volume
                    // is already in the requested state.
                    return Ok(());
                }
                Err(LvmError::CannotSetRWLogicalVolume {
                    vg_name: vg_name.to_string(),
                    lv_name: lv_name.to_string(),
                    permission,
                })
            }
            Err(other) => Err(other),
        }
    }

    pub async fn resize_pv(&self, vg_name: &str, guid: &str) -> Result<(), LvmError> {
        let pv_name = fq_pv_name(guid);
        info!("Resizing PV {pv_name} of VG {vg_name}");
        let args = vec!["pvresize".to_string(), pv_name.clone()];
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        if output.rc != 0 {
            return Err(LvmError::CouldNotResizePhysicalVolume { pv_name });
        }
        self.invalidate_pvs([pv_name]);
        self.invalidate_vgs([vg_name.to_string()]);
        Ok(())
    }

    /// Move allocated extents off `src_device`, optionally onto specific
    /// destination devices. A PV with nothing allocated is a no-op.
    pub async fn move_pv(
        &self,
        vg_name: &str,
        src_device: &str,
        dst_devices: &[String],
    ) -> Result<(), LvmError> {
        let pv_name = fq_pv_name(src_device);
        // The cached allocation count cannot be trusted for this decision.
        self.invalidate_pvs([pv_name.clone()]);
        let pv = self.get_pv(&pv_name).await?;
        if pv.pe_alloc_count == 0 {
            info!("No data to move on pv {pv_name}, considering as successful");
            return Ok(());
        }
        let mut args = vec!["pvmove".to_string(), pv_name.clone()];
        args.extend(dst_devices.iter().map(|dev| fq_pv_name(dev)));
        info!("Moving pv {pv_name} data (vg {vg_name})");
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        // Data moved within the VG even on a partial failure; nothing in
        // the cache is trustworthy anymore.
        self.invalidate_pvs([pv_name.clone()]);
        self.invalidate_lvs(vg_name, &[]);
        self.invalidate_vgs([vg_name.to_string()]);
        if output.rc != 0 {
            return Err(LvmError::CouldNotMovePVData {
                pv_name,
                vg_name: vg_name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn deactivate_vg(&self, vg_name: &str) -> Result<(), LvmError> {
        self.get_vg(vg_name).await?;
        let mut args: Vec<String> = vec!["vgchange".to_string()];
        args.extend(nobackup());
        args.extend([
            "--available".to_string(),
            "n".to_string(),
            vg_name.to_string(),
        ]);
        let output = self.cmd(&args, &self.vg_devs_of(vg_name)).await?;
        self.invalidate_lvs(vg_name, &[]);
        if output.rc != 0 {
            return Err(LvmError::VolumeGroupActionError {
                vg_name: vg_name.to_string(),
            });
        }
        Ok(())
    }

    /// The PV carrying the VG's enabled metadata areas. There is exactly
    /// one by construction; anything else means foreign or damaged
    /// metadata.
    pub async fn get_vg_metadata_pv(&self, vg_name: &str) -> Result<PhysicalVolume, LvmError> {
        let mut pvs: Vec<PhysicalVolume> = self
            .get_all_pvs()
            .await?
            .into_iter()
            .filter(|pv| pv.vg_name == vg_name && pv.is_metadata_pv())
            .collect();
        if pvs.len() != 1 {
            return Err(LvmError::UnexpectedVolumeGroupMetadata {
                reason: format!(
                    "expected one metadata pv in vg {vg_name}, found {}",
                    pvs.len()
                ),
            });
        }
        Ok(pvs.remove(0))
    }

    pub async fn lvs_by_tag(&self, vg_name: &str, tag: &str) -> Result<Vec<LogicalVolume>, LvmError> {
        Ok(self
            .get_lvs(vg_name)
            .await?
            .into_iter()
            .filter(|lv| lv.tags.iter().any(|t| t == tag))
            .collect())
    }

    /// Bulk-load the cache and deactivate LVs left over from a previous
    /// run: active volumes that are not opened, not in `skip_lvs` and not
    /// backing a prepared image.
    pub async fn bootstrap(&self, skip_lvs: &[String]) -> Result<(), LvmError> {
        self.load_cache().await?;
        let skip: HashSet<&str> = skip_lvs.iter().map(String::as_str).collect();
        let vgs = self.get_all_vgs().await?;
        join_all(
            vgs.iter()
                .map(|vg| self.deactivate_unused_lvs(&vg.name, &skip)),
        )
        .await;
        Ok(())
    }

    async fn deactivate_unused_lvs(&self, vg_name: &str, skip: &HashSet<&str>) {
        let prepared = prepared_lvs(&self.config.prepared_storage_dir, vg_name);
        let lvs = match self.get_lvs(vg_name).await {
            Ok(lvs) => lvs,
            Err(err) => {
                warn!("Could not list lvs of {vg_name}: {err}");
                return;
            }
        };
        let mut deactivate = Vec::new();
        for lv in lvs {
            if !lv.active {
                continue;
            }
            if skip.contains(lv.name.as_str()) {
                debug!("Skipping active lv: vg={vg_name} lv={}", lv.name);
            } else if prepared.contains(&lv.name) {
                debug!("Skipping prepared volume lv: vg={vg_name} lv={}", lv.name);
            } else if lv.opened {
                debug!("Skipping open lv: vg={vg_name} lv={}", lv.name);
            } else {
                deactivate.push(lv.name);
            }
        }
        if deactivate.is_empty() {
            return;
        }
        info!("Deactivating lvs: vg={vg_name} lvs={deactivate:?}");
        // The failed lvchange already invalidated the entries; the next
        // listing re-reads them.
        if let Err(err) = self.set_lv_availability(vg_name, &deactivate, false).await {
            warn!("Failed to deactivate lvs of {vg_name}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_to_extent_multiples() {
        let extent = 128 * MIB;
        assert_eq!(round_up_to_extent(400 * MIB, extent), 512 * MIB);
        assert_eq!(round_up_to_extent(512 * MIB, extent), 512 * MIB);
        assert_eq!(round_up_to_extent(1, extent), extent);
    }

    #[test]
    fn prepared_lvs_globs_two_levels() {
        let root = tempfile::tempdir().unwrap();
        let volume = root.path().join("vg0/img-1/vol-a");
        fs::create_dir_all(&volume).unwrap();
        fs::create_dir_all(root.path().join("vg0/img-2/vol-b")).unwrap();
        fs::create_dir_all(root.path().join("other-vg/img-3/vol-c")).unwrap();

        let found = prepared_lvs(root.path(), "vg0");
        assert_eq!(
            found,
            HashSet::from(["vol-a".to_string(), "vol-b".to_string()])
        );
        assert!(prepared_lvs(root.path(), "missing-vg").is_empty());
    }

    use std::sync::Arc;

    use crate::config::LvmConfig;
    use crate::constants::MIB;
    use crate::engine::LvmCache;
    use crate::testing::{
        FakeDevices, FakeInspector, FakeMapper, FakeRunner, engine, engine_with, fail_output,
        lv_line, ok_output, pv_line, vg_line,
    };

    fn s(value: &str) -> String {
        value.to_string()
    }

    fn has_pair(argv: &[String], pair: [&str; 2]) -> bool {
        argv.windows(2)
            .any(|window| window[0] == pair[0] && window[1] == pair[1])
    }

    #[tokio::test]
    async fn extend_lv_is_idempotent_when_already_large_enough() {
        let env = engine();
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 512 * MIB)]),
        );
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        // 400 MiB rounds up to 512 MiB with 128 MiB extents; the volume is
        // already there.
        env.lvm.extend_lv("vg0", "lv0", 400).await.unwrap();
        assert!(env.runner.calls_of("lvextend").is_empty());
    }

    #[tokio::test]
    async fn extend_lv_invokes_lvextend_and_invalidates() {
        let env = engine();
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 256 * MIB)]),
        );
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.lvm.extend_lv("vg0", "lv0", 400).await.unwrap();

        let calls = env.runner.calls_of("lvextend");
        assert_eq!(calls.len(), 1);
        let argv = &calls[0];
        assert!(has_pair(argv, ["--autobackup", "n"]));
        assert!(has_pair(argv, ["--size", "400m"]));
        assert_eq!(argv.last().unwrap(), "vg0/lv0");

        // Both entries went stale: the next lookup reloads.
        let lvs_before = env.runner.calls_of("lvs").len();
        env.lvm.get_lv("vg0", "lv0").await.unwrap();
        assert_eq!(env.runner.calls_of("lvs").len(), lvs_before + 1);
    }

    #[tokio::test]
    async fn failed_extend_detects_concurrent_extension() {
        let env = engine();
        env.runner
            .enqueue(ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 256 * MIB)]));
        env.runner.enqueue(ok_output(&[&vg_line(
            "vg-uuid-0",
            "vg0",
            400,
            "/dev/mapper/pv0",
        )]));
        env.runner.enqueue(fail_output(5)); // lvextend, specific filter
        env.runner.enqueue(fail_output(5)); // lvextend, wider retry
        // Reload shows another host already extended the volume.
        env.runner
            .enqueue(ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 512 * MIB)]));
        env.lvm.extend_lv("vg0", "lv0", 400).await.unwrap();
    }

    #[tokio::test]
    async fn failed_extend_reports_insufficient_space() {
        let env = engine();
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 256 * MIB)]),
        );
        // One free extent (128 MiB) cannot cover the missing 256 MiB.
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 1, "/dev/mapper/pv0")]),
        );
        env.runner.respond("lvextend", fail_output(5));
        let err = env.lvm.extend_lv("vg0", "lv0", 400).await.unwrap_err();
        match err {
            LvmError::VolumeGroupSizeError { free, needed, .. } => {
                assert_eq!(free, 128 * MIB);
                assert_eq!(needed, 256 * MIB);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_extend_with_enough_space_is_an_extend_error() {
        let env = engine();
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 256 * MIB)]),
        );
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.runner.respond("lvextend", fail_output(5));
        let err = env.lvm.extend_lv("vg0", "lv0", 400).await.unwrap_err();
        assert!(matches!(err, LvmError::LogicalVolumeExtendError { .. }));
    }

    #[tokio::test]
    async fn reduce_lv_is_idempotent_when_already_small_enough() {
        let env = engine();
        env.runner.respond("lvreduce", fail_output(5));
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 128 * MIB)]),
        );
        env.lvm.reduce_lv("vg0", "lv0", 256, false).await.unwrap();

        let argv = &env.runner.calls_of("lvreduce")[0];
        assert!(!argv.contains(&s("--force")));
        assert!(has_pair(argv, ["--size", "256m"]));
    }

    #[tokio::test]
    async fn create_vg_initializes_pvs_enables_metadata_and_creates() {
        let env = engine();
        env.lvm
            .create_vg("vg0", &[s("pv0"), s("/dev/mapper/pv1")], Some("storage"), 128, false)
            .await
            .unwrap();

        let calls = env.runner.calls();
        assert_eq!(calls[0][0], "pvcreate");
        assert!(has_pair(&calls[0], ["--metadatasize", "128m"]));
        assert!(has_pair(&calls[0], ["--metadatacopies", "2"]));
        assert!(has_pair(&calls[0], ["--metadataignore", "y"]));
        assert!(calls[0].contains(&s("/dev/mapper/pv0")));
        assert!(calls[0].contains(&s("/dev/mapper/pv1")));

        assert_eq!(calls[1][0], "pvchange");
        assert!(has_pair(&calls[1], ["--metadataignore", "n"]));
        assert_eq!(calls[1].last().unwrap(), "/dev/mapper/pv0");

        assert_eq!(calls[2][0], "vgcreate");
        assert!(has_pair(&calls[2], ["--physicalextentsize", "128m"]));
        assert!(has_pair(&calls[2], ["--addtag", "storage"]));
        // The specific filter accepts the new devices.
        assert!(calls[2][2].contains("^/dev/mapper/pv0$"));
        assert!(calls[2][2].contains("^/dev/mapper/pv1$"));
    }

    #[tokio::test]
    async fn forced_create_vg_clears_holders_first() {
        let env = engine();
        env.lvm
            .create_vg("vg0", &[s("pv0"), s("pv1")], None, 128, true)
            .await
            .unwrap();
        assert_eq!(env.mapper.removed(), vec![s("pv0"), s("pv1")]);
        let pvcreate = &env.runner.calls_of("pvcreate")[0];
        assert!(pvcreate.contains(&s("-y")));
        assert!(pvcreate.contains(&s("-ff")));
    }

    #[tokio::test]
    async fn create_vg_rejects_unsupported_block_sizes() {
        let env = engine();
        env.devices.set_sizes(520, 520);
        let err = env
            .lvm
            .create_vg("vg0", &[s("pv0")], None, 128, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LvmError::DeviceBlockSizeError { .. }));
        assert_eq!(env.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn extend_vg_rejects_devices_already_in_the_vg() {
        let env = engine();
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        let err = env.lvm.extend_vg("vg0", &[s("pv0")], false).await.unwrap_err();
        assert!(matches!(err, LvmError::VolumeGroupExtendError { .. }));
        assert!(env.runner.calls_of("vgextend").is_empty());
    }

    #[tokio::test]
    async fn extend_vg_formats_new_pvs_like_the_members() {
        let env = engine();
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.lvm.extend_vg("vg0", &[s("lun1")], false).await.unwrap();

        // vg_mda_size is 128 MiB; the new PV gets the same metadata size.
        let pvcreate = &env.runner.calls_of("pvcreate")[0];
        assert!(has_pair(pvcreate, ["--metadatasize", "128m"]));
        let vgextend = &env.runner.calls_of("vgextend")[0];
        assert_eq!(vgextend[3], "vg0");
        assert_eq!(vgextend[4], "/dev/mapper/lun1");
    }

    #[tokio::test]
    async fn remove_vg_deactivates_then_removes() {
        let env = engine();
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.lvm.remove_vg("vg0").await.unwrap();

        let vgchange = &env.runner.calls_of("vgchange")[0];
        assert!(has_pair(vgchange, ["--available", "n"]));
        let vgremove = &env.runner.calls_of("vgremove")[0];
        assert!(vgremove.contains(&s("-f")));
        assert_eq!(vgremove.last().unwrap(), "vg0");
    }

    #[tokio::test]
    async fn failed_remove_vg_reintroduces_the_vg_as_stale() {
        let env = engine();
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.runner.respond("vgremove", fail_output(5));
        let err = env.lvm.remove_vg("vg0").await.unwrap_err();
        assert!(matches!(err, LvmError::VolumeGroupRemoveError { .. }));

        // The stale entry forces a reload on the next lookup.
        let before = env.runner.calls_of("vgs").len();
        env.lvm.get_vg("vg0").await.unwrap();
        assert_eq!(env.runner.calls_of("vgs").len(), before + 1);
    }

    #[tokio::test]
    async fn create_lv_builds_argv_and_leaves_volume_unavailable() {
        let env = engine();
        env.lvm
            .create_lv("vg0", "lv0", 1024, false, true, &[s("tagA")], None)
            .await
            .unwrap();

        let lvcreate = &env.runner.calls_of("lvcreate")[0];
        assert!(has_pair(lvcreate, ["--autobackup", "n"]));
        assert!(has_pair(lvcreate, ["--contiguous", "y"]));
        assert!(has_pair(lvcreate, ["--size", "1024m"]));
        assert!(has_pair(lvcreate, ["--addtag", "tagA"]));
        assert!(has_pair(lvcreate, ["--name", "lv0"]));
        assert_eq!(lvcreate.last().unwrap(), "vg0");

        let lvchange = &env.runner.calls_of("lvchange")[0];
        assert!(has_pair(lvchange, ["--available", "n"]));
        assert_eq!(lvchange.last().unwrap(), "vg0/lv0");
    }

    #[tokio::test]
    async fn create_lv_activation_leaves_correct_ownership_alone() {
        let dev_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(dev_root.path().join("vg0")).unwrap();
        let node = dev_root.path().join("vg0/lv0");
        fs::write(&node, b"").unwrap();
        let meta = fs::metadata(&node).unwrap();

        let config = LvmConfig {
            dev_root: dev_root.path().to_path_buf(),
            disk_image_uid: meta.uid(),
            disk_image_gid: meta.gid(),
            ..LvmConfig::default()
        };
        let env = engine_with(config);
        env.lvm
            .create_lv("vg0", "lv0", 1024, true, false, &[], None)
            .await
            .unwrap();
        // Ownership already matches: no lvchange either way.
        assert!(env.runner.calls_of("lvchange").is_empty());
    }

    #[tokio::test]
    async fn remove_lvs_drops_entries_on_success() {
        let env = engine();
        env.lvm
            .remove_lvs("vg0", &[s("lv0"), s("lv1")])
            .await
            .unwrap();
        let lvremove = &env.runner.calls_of("lvremove")[0];
        assert!(lvremove.contains(&s("-f")));
        assert!(lvremove.contains(&s("vg0/lv0")));
        assert!(lvremove.contains(&s("vg0/lv1")));
    }

    #[tokio::test]
    async fn failed_remove_lvs_invalidates_them() {
        let env = engine();
        env.runner.respond("lvremove", fail_output(5));
        let err = env
            .lvm
            .remove_lvs("vg0", &[s("lv0")])
            .await
            .unwrap_err();
        assert!(matches!(err, LvmError::CannotRemoveLogicalVolume { .. }));
    }

    #[tokio::test]
    async fn activate_refreshes_active_and_activates_inactive() {
        let dev_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(dev_root.path().join("vg0")).unwrap();
        fs::write(dev_root.path().join("vg0/a"), b"").unwrap();

        let config = LvmConfig {
            dev_root: dev_root.path().to_path_buf(),
            ..LvmConfig::default()
        };
        let env = engine_with(config);
        env.lvm
            .activate_lvs("vg0", &[s("a"), s("b")], true)
            .await
            .unwrap();

        let lvchange = env.runner.calls_of("lvchange");
        assert_eq!(lvchange.len(), 2);
        assert!(lvchange[0].contains(&s("--refresh")));
        assert!(lvchange[0].contains(&s("vg0/a")));
        assert!(!lvchange[0].contains(&s("vg0/b")));
        assert!(has_pair(&lvchange[1], ["--available", "y"]));
        assert!(lvchange[1].contains(&s("vg0/b")));
        assert!(!lvchange[1].contains(&s("vg0/a")));
    }

    #[tokio::test]
    async fn deactivate_only_touches_active_lvs() {
        let dev_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(dev_root.path().join("vg0")).unwrap();
        fs::write(dev_root.path().join("vg0/a"), b"").unwrap();

        let config = LvmConfig {
            dev_root: dev_root.path().to_path_buf(),
            ..LvmConfig::default()
        };
        let env = engine_with(config);
        env.lvm
            .deactivate_lvs("vg0", &[s("a"), s("b")])
            .await
            .unwrap();

        let lvchange = env.runner.calls_of("lvchange");
        assert_eq!(lvchange.len(), 1);
        assert!(has_pair(&lvchange[0], ["--available", "n"]));
        assert!(lvchange[0].contains(&s("vg0/a")));
        assert!(!lvchange[0].contains(&s("vg0/b")));
    }

    #[tokio::test]
    async fn failed_deactivation_reports_the_holders() {
        let dev_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(dev_root.path().join("vg0")).unwrap();
        fs::write(dev_root.path().join("vg0/a"), b"").unwrap();

        let config = LvmConfig {
            dev_root: dev_root.path().to_path_buf(),
            ..LvmConfig::default()
        };
        let runner = FakeRunner::new();
        runner.respond("lvchange", fail_output(5));
        let lvm = LvmCache::with_collaborators(
            Arc::clone(&runner),
            config,
            FakeDevices::new(&[]),
            Arc::new(FakeMapper::default()),
            Arc::new(FakeInspector {
                holders: vec![ProcessInfo {
                    pid: 42,
                    command: s("qemu-kvm"),
                }],
            }),
        );

        let err = lvm.deactivate_lvs("vg0", &[s("a")]).await.unwrap_err();
        match err {
            LvmError::CannotDeactivateLogicalVolume { holders, .. } => {
                assert_eq!(holders.len(), 1);
                assert_eq!(holders[0].1[0].pid, 42);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rename_lv_reloads_the_new_name() {
        let env = engine();
        env.lvm.rename_lv("vg0", "old", "new").await.unwrap();
        let lvrename = &env.runner.calls_of("lvrename")[0];
        assert_eq!(
            &lvrename[lvrename.len() - 3..],
            &[s("vg0"), s("old"), s("new")]
        );
        let lvs = env.runner.calls_of("lvs");
        assert!(lvs.last().unwrap().contains(&s("vg0/new")));
    }

    #[tokio::test]
    async fn refresh_failure_maps_to_refresh_error() {
        let env = engine();
        env.runner.respond("lvchange", fail_output(5));
        let err = env
            .lvm
            .refresh_lvs("vg0", &[s("lv0")])
            .await
            .unwrap_err();
        assert!(matches!(err, LvmError::LogicalVolumeRefreshError { .. }));
    }

    #[tokio::test]
    async fn tag_changes_build_del_and_add_arguments() {
        let env = engine();
        env.lvm
            .change_lvs_tags("vg0", &[s("lv0")], &[s("old")], &[s("new")])
            .await
            .unwrap();
        let lvchange = &env.runner.calls_of("lvchange")[0];
        assert!(has_pair(lvchange, ["--deltag", "old"]));
        assert!(has_pair(lvchange, ["--addtag", "new"]));

        env.lvm
            .change_vg_tags("vg0", &[], &[s("fresh")])
            .await
            .unwrap();
        let vgchange = &env.runner.calls_of("vgchange")[0];
        assert!(has_pair(vgchange, ["--addtag", "fresh"]));
        assert_eq!(vgchange.last().unwrap(), "vg0");
    }

    #[tokio::test]
    async fn overlapping_tag_sets_are_rejected() {
        let env = engine();
        let err = env
            .lvm
            .change_lvs_tags("vg0", &[s("lv0")], &[s("x")], &[s("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LvmError::LogicalVolumeReplaceTagError { .. }));
        let err = env
            .lvm
            .change_vg_tags("vg0", &[s("x")], &[s("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LvmError::VolumeGroupReplaceTagError { .. }));
        assert_eq!(env.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn set_rw_lv_tolerates_an_already_matching_permission() {
        let env = engine();
        env.runner.respond("lvchange", fail_output(5));
        env.runner.respond(
            "lvs",
            ok_output(&[&lv_line("lv0", "vg0", "-wi-a---", 512 * MIB)]),
        );
        // The volume is already writable; the failure is benign.
        env.lvm.set_rw_lv("vg0", "lv0", true).await.unwrap();

        // But asking for read-only must surface the failure.
        let err = env.lvm.set_rw_lv("vg0", "lv0", false).await.unwrap_err();
        assert!(matches!(err, LvmError::CannotSetRWLogicalVolume { .. }));
    }

    #[tokio::test]
    async fn move_pv_skips_unallocated_sources() {
        let env = engine();
        env.runner.respond(
            "pvs",
            ok_output(&[&pv_line("pv-uuid-0", "/dev/mapper/pv0", "vg0", 0, 2)]),
        );
        env.lvm.move_pv("vg0", "pv0", &[]).await.unwrap();
        assert!(env.runner.calls_of("pvmove").is_empty());
    }

    #[tokio::test]
    async fn move_pv_runs_pvmove_with_destinations() {
        let env = engine();
        env.runner.respond(
            "pvs",
            ok_output(&[&pv_line("pv-uuid-0", "/dev/mapper/pv0", "vg0", 10, 2)]),
        );
        env.lvm.move_pv("vg0", "pv0", &[s("lun1")]).await.unwrap();
        let pvmove = &env.runner.calls_of("pvmove")[0];
        assert_eq!(pvmove[3], "/dev/mapper/pv0");
        assert_eq!(pvmove[4], "/dev/mapper/lun1");
    }

    #[tokio::test]
    async fn failed_pv_resize_is_reported() {
        let env = engine();
        env.runner.respond("pvresize", fail_output(5));
        let err = env.lvm.resize_pv("vg0", "pv0").await.unwrap_err();
        assert!(matches!(err, LvmError::CouldNotResizePhysicalVolume { .. }));
    }

    #[tokio::test]
    async fn the_metadata_pv_is_unique() {
        let env = engine();
        env.runner.respond(
            "pvs",
            ok_output(&[
                &pv_line("pv-uuid-0", "/dev/mapper/pv0", "vg0", 10, 2),
                &pv_line("pv-uuid-1", "/dev/mapper/pv1", "vg0", 10, 1),
            ]),
        );
        let pv = env.lvm.get_vg_metadata_pv("vg0").await.unwrap();
        assert_eq!(pv.name, "/dev/mapper/pv0");
    }

    #[tokio::test]
    async fn two_metadata_pvs_are_unexpected() {
        let env = engine();
        env.runner.respond(
            "pvs",
            ok_output(&[
                &pv_line("pv-uuid-0", "/dev/mapper/pv0", "vg0", 10, 2),
                &pv_line("pv-uuid-1", "/dev/mapper/pv1", "vg0", 10, 2),
            ]),
        );
        let err = env.lvm.get_vg_metadata_pv("vg0").await.unwrap_err();
        assert!(matches!(
            err,
            LvmError::UnexpectedVolumeGroupMetadata { .. }
        ));
    }

    #[tokio::test]
    async fn lvs_by_tag_filters_on_the_tag_tuple() {
        let env = engine();
        let tagged = "lv-uuid-a|a|vg0|-wi-a---|1073741824|0|/dev/mapper/pv0(0)|keep,extra";
        let untagged = lv_line("b", "vg0", "-wi-a---", 1024 * MIB);
        env.runner.respond("lvs", ok_output(&[tagged, &untagged]));
        let lvs = env.lvm.lvs_by_tag("vg0", "keep").await.unwrap();
        assert_eq!(lvs.len(), 1);
        assert_eq!(lvs[0].name, "a");
    }

    #[tokio::test]
    async fn bootstrap_deactivates_only_unused_lvs() {
        let prepared_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(prepared_root.path().join("vg0/img-1/p")).unwrap();

        let config = LvmConfig {
            prepared_storage_dir: prepared_root.path().to_path_buf(),
            ..LvmConfig::default()
        };
        let env = engine_with(config);
        env.runner.respond(
            "vgs",
            ok_output(&[&vg_line("vg-uuid-0", "vg0", 400, "/dev/mapper/pv0")]),
        );
        env.runner.respond(
            "lvs",
            ok_output(&[
                &lv_line("a", "vg0", "-wi-a---", 512 * MIB), // active, unused
                &lv_line("b", "vg0", "-wi-ao--", 512 * MIB), // opened
                &lv_line("c", "vg0", "-wi-a---", 512 * MIB), // in skip list
                &lv_line("p", "vg0", "-wi-a---", 512 * MIB), // prepared image
                &lv_line("d", "vg0", "-wi-----", 512 * MIB), // inactive
            ]),
        );
        // Deactivation fails: bootstrap logs and carries on.
        env.runner.respond("lvchange", fail_output(5));

        env.lvm.bootstrap(&[s("c")]).await.unwrap();

        // One deactivation, retried once with the wider filter.
        let lvchange = env.runner.calls_of("lvchange");
        assert_eq!(lvchange.len(), 2);
        for argv in &lvchange {
            assert!(has_pair(argv, ["--available", "n"]));
            assert!(argv.contains(&s("vg0/a")));
            for skipped in ["vg0/b", "vg0/c", "vg0/p", "vg0/d"] {
                assert!(!argv.contains(&s(skipped)));
            }
        }

        // The failed lvchange invalidated the entries.
        let before = env.runner.calls_of("lvs").len();
        env.lvm.get_lvs("vg0").await.unwrap();
        assert_eq!(env.runner.calls_of("lvs").len(), before + 1);
    }
}
