use std::path::PathBuf;

/// Host-level configuration of the engine.
///
/// All fields have working defaults; hosts typically override
/// `dev_whitelist` and the disk image ownership.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LvmConfig {
    /// Path of the lvm binary.
    pub lvm_path: String,
    /// Path of the sudo binary used for privilege elevation.
    pub sudo_path: String,
    /// Permanently-allowed device patterns, merged into every filter.
    pub dev_whitelist: Vec<String>,
    /// When false, every whole-VG LV listing reloads from lvm.
    pub cache_lvs: bool,
    /// Ownership applied to activated LV device nodes.
    pub disk_image_uid: u32,
    pub disk_image_gid: u32,
    /// Root of the prepared-images tree; LVs appearing two levels below
    /// `<root>/<vg>` are never deactivated during bootstrap.
    pub prepared_storage_dir: PathBuf,
    /// Root under which LV device nodes appear (`<dev_root>/<vg>/<lv>`).
    /// Tests point this at a scratch directory.
    pub dev_root: PathBuf,
}

impl Default for LvmConfig {
    fn default() -> Self {
        LvmConfig {
            lvm_path: "/usr/sbin/lvm".to_string(),
            sudo_path: "/usr/bin/sudo".to_string(),
            dev_whitelist: Vec::new(),
            cache_lvs: true,
            disk_image_uid: 0,
            disk_image_gid: 0,
            prepared_storage_dir: PathBuf::from("/run/storage"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

const LVMCONF_TEMPLATE: &str = r#"devices {
 preferred_names=["^/dev/mapper/"]
 ignore_suspended_devices=1
 write_cache_state=0
 disable_after_error_count=3
 filter=@FILTER@
 hints="none"
 obtain_device_list_from_udev=0
}
global {
 locking_type=@LOCKING_TYPE@
 prioritise_write_locks=1
 wait_for_locks=1
 use_lvmetad=0
}
backup {
 retain_min=50
 retain_days=0
}"#;

/// Render the single-line `--config` blob for the given filter and locking
/// mode (1 = local read-write, 4 = read-only).
pub(crate) fn render_config(dev_filter: &str, locking_type: u32) -> String {
    LVMCONF_TEMPLATE
        .replace("@FILTER@", dev_filter)
        .replace("@LOCKING_TYPE@", &locking_type.to_string())
        .replace('\n', " ")
}
