use crate::host::ProcessInfo;

#[derive(Debug, thiserror::Error)]
pub enum LvmError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid {command} command output line: {line:?}")]
    InvalidOutputLine { command: &'static str, line: String },
    #[error("Volume group does not exist: {vg_name}")]
    VolumeGroupDoesNotExist { vg_name: String },
    #[error("Logical volume does not exist: {vg_name}/{lv_name}")]
    LogicalVolumeDoesNotExist { vg_name: String, lv_name: String },
    #[error("Cannot access physical devices: {devices:?}")]
    InaccessiblePhysDev { devices: Vec<String> },
    #[error("Failed to initialize physical device: {devices:?}")]
    PhysDevInitializationError { devices: Vec<String> },
    #[error("Cannot create volume group {vg_name} from {devices:?}")]
    VolumeGroupCreateError { vg_name: String, devices: Vec<String> },
    #[error("Cannot extend volume group {vg_name} with {devices:?}")]
    VolumeGroupExtendError { vg_name: String, devices: Vec<String> },
    #[error("Cannot reduce volume group {vg_name} by {device}")]
    VolumeGroupReduceError { vg_name: String, device: String },
    #[error("Cannot remove volume group {vg_name}")]
    VolumeGroupRemoveError { vg_name: String },
    #[error("vgchange on {vg_name} failed")]
    VolumeGroupActionError { vg_name: String },
    #[error("Cannot create logical volume {vg_name}/{lv_name}: {err:?}")]
    CannotCreateLogicalVolume {
        vg_name: String,
        lv_name: String,
        err: Vec<String>,
    },
    #[error("Cannot remove logical volumes {vg_name}/{lv_names:?}")]
    CannotRemoveLogicalVolume {
        vg_name: String,
        lv_names: Vec<String>,
    },
    #[error("Cannot extend logical volume {vg_name}/{lv_name}")]
    LogicalVolumeExtendError { vg_name: String, lv_name: String },
    #[error("Cannot reduce logical volume {vg_name}/{lv_name} to {size_mb}m")]
    LogicalVolumeReduceError {
        vg_name: String,
        lv_name: String,
        size_mb: u64,
    },
    #[error("Failed to refresh logical volumes {vg_name}/{lv_names:?}")]
    LogicalVolumeRefreshError {
        vg_name: String,
        lv_names: Vec<String>,
    },
    #[error("Failed to rename logical volume {vg_name}/{old_name} to {new_name}")]
    LogicalVolumeRenameError {
        vg_name: String,
        old_name: String,
        new_name: String,
    },
    #[error("Cannot activate logical volumes {vg_name}/{lv_names:?}")]
    CannotActivateLogicalVolume {
        vg_name: String,
        lv_names: Vec<String>,
    },
    #[error("Cannot deactivate logical volumes {vg_name}/{lv_names:?}, held open by {holders:?}")]
    CannotDeactivateLogicalVolume {
        vg_name: String,
        lv_names: Vec<String>,
        holders: Vec<(String, Vec<ProcessInfo>)>,
    },
    #[error("Cannot set permission {permission} on logical volume {vg_name}/{lv_name}")]
    CannotSetRWLogicalVolume {
        vg_name: String,
        lv_name: String,
        permission: &'static str,
    },
    #[error("Could not resize physical volume {pv_name}")]
    CouldNotResizePhysicalVolume { pv_name: String },
    #[error("Could not move data off physical volume {pv_name} in {vg_name}")]
    CouldNotMovePVData { pv_name: String, vg_name: String },
    #[error("Failed to replace tags on logical volumes {vg_name}/{lv_names:?}")]
    LogicalVolumeReplaceTagError {
        vg_name: String,
        lv_names: Vec<String>,
    },
    #[error("Failed to replace tags on volume group {vg_name}")]
    VolumeGroupReplaceTagError { vg_name: String },
    #[error("Unexpected volume group metadata: {reason}")]
    UnexpectedVolumeGroupMetadata { reason: String },
    #[error("Device block size not supported: logical {logical}, physical {physical}")]
    DeviceBlockSizeError { logical: u64, physical: u64 },
    #[error("Device block size {device_block_size} does not match volume group block size {vg_block_size}")]
    VolumeGroupBlockSizeError {
        vg_block_size: u64,
        device_block_size: u64,
    },
    #[error("Not enough free extents in volume group {vg_name}: free {free}, needed {needed}")]
    VolumeGroupSizeError {
        vg_name: String,
        free: u64,
        needed: u64,
    },
    #[error("Failed reload: {name}, please check your storage connections")]
    FailedReload { name: String },
    #[error("lvm command failed: rc={rc} err={err:?}")]
    CommandFailed { rc: i32, err: Vec<String> },
}
