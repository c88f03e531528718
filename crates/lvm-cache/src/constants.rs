/// Fields requested from `pvs -o`.
pub const PV_FIELDS: &str = "uuid,name,size,vg_name,vg_uuid,pe_start,pe_count,\
                             pe_alloc_count,mda_count,dev_size,mda_used_count";
pub const PV_FIELDS_LEN: usize = 11;

/// Fields requested from `vgs -o`.
pub const VG_FIELDS: &str = "uuid,name,attr,size,free,extent_size,extent_count,\
                             free_count,tags,vg_mda_size,vg_mda_free,lv_count,\
                             pv_count,pv_name";
pub const VG_FIELDS_LEN: usize = 14;

/// Fields requested from `lvs -o`.
pub const LV_FIELDS: &str = "uuid,name,vg_name,attr,size,seg_start_pe,devices,tags";
pub const LV_FIELDS_LEN: usize = 8;

/// Field separator used by the report commands.
pub const SEPARATOR: char = '|';

/// Returned by `pvs` and `vgs` for a missing PV or unknown VG name.
pub const UNKNOWN_DEVICE: &str = "[unknown]";

/// Flags shared by all report commands (`pvs`/`vgs`/`lvs`).
pub const LVM_FLAGS: &[&str] = &[
    "--noheadings",
    "--units",
    "b",
    "--nosuffix",
    "--separator",
    "|",
    "--ignoreskippedcluster",
];

/// Suppress the automatic metadata backup on mutating LV commands.
pub const LVM_NOBACKUP: &[&str] = &["--autobackup", "n"];

/// Multipath devices live here; a bare guid resolves under this prefix.
pub const PV_PREFIX: &str = "/dev/mapper";

/// Upper bound on concurrently running LVM subprocesses.
pub const MAX_COMMANDS: usize = 10;

/// Read-only commands racing the pool master's metadata writer are retried
/// this many times, with delays of 100ms * 2^k.
pub const READ_ONLY_RETRIES: usize = 4;

/// Physical extent size used when creating a VG, in MiB.
pub const VG_EXTENT_SIZE_MB: u64 = 128;

/// Logical block sizes a PV may carry.
pub const SUPPORTED_BLOCK_SIZES: &[u64] = &[512, 4096];

pub const MIB: u64 = 1 << 20;

fn report_cmd(subcmd: &str, fields: &str) -> Vec<String> {
    let mut cmd = vec![subcmd.to_string()];
    cmd.extend(LVM_FLAGS.iter().map(|s| s.to_string()));
    cmd.push("-o".to_string());
    cmd.push(fields.to_string());
    cmd
}

pub(crate) fn pvs_cmd() -> Vec<String> {
    report_cmd("pvs", PV_FIELDS)
}

pub(crate) fn vgs_cmd() -> Vec<String> {
    report_cmd("vgs", VG_FIELDS)
}

pub(crate) fn lvs_cmd() -> Vec<String> {
    report_cmd("lvs", LV_FIELDS)
}
