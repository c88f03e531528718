//! Typed records parsed from `pvs`/`vgs`/`lvs` report output.
//!
//! Report lines are separator-delimited with a fixed field count per
//! command; anything else is an [`LvmError::InvalidOutputLine`]. Attribute
//! columns are fixed-position bit-strings and decode into per-bit structs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::error;

use crate::constants::{
    LV_FIELDS_LEN, PV_FIELDS_LEN, PV_PREFIX, SEPARATOR, UNKNOWN_DEVICE, VG_FIELDS_LEN,
};
use crate::error::LvmError;

/// Resolve a bare multipath guid to its device path; absolute paths pass
/// through untouched.
pub fn fq_pv_name(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("{PV_PREFIX}/{device}")
    }
}

/// Device node of an LV.
pub fn lv_path(dev_root: &Path, vg_name: &str, lv_name: &str) -> PathBuf {
    dev_root.join(vg_name).join(lv_name)
}

/// Device-mapper name of an LV: dashes in the VG name are doubled.
pub fn lv_dm_name(vg_name: &str, lv_name: &str) -> String {
    format!("{}-{}", vg_name.replace('-', "--"), lv_name)
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn invalid(command: &'static str, line: &str) -> LvmError {
    LvmError::InvalidOutputLine {
        command,
        line: line.to_string(),
    }
}

fn split_line(command: &'static str, line: &str, expected: usize) -> Result<Vec<String>, LvmError> {
    let fields: Vec<String> = line
        .split(SEPARATOR)
        .map(|field| field.trim().to_string())
        .collect();
    if fields.len() != expected {
        return Err(invalid(command, line));
    }
    Ok(fields)
}

fn number(command: &'static str, line: &str, value: &str) -> Result<u64, LvmError> {
    value.parse().map_err(|_| invalid(command, line))
}

fn split_tags(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(',').map(str::to_string).collect()
    }
}

/// VG attribute bits as reported by `vgs -o attr` (e.g. `wz--n-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgAttributes {
    pub permission: char,
    pub resizeable: char,
    pub exported: char,
    pub partial: char,
    pub allocation: char,
    pub clustered: char,
}

impl VgAttributes {
    fn parse(value: &str) -> Option<Self> {
        let mut bits = value.chars();
        Some(VgAttributes {
            permission: bits.next()?,
            resizeable: bits.next()?,
            exported: bits.next()?,
            partial: bits.next()?,
            allocation: bits.next()?,
            clustered: bits.next()?,
        })
    }
}

/// LV attribute bits as reported by `lvs -o attr` (e.g. `-wi-a-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LvAttributes {
    pub voltype: char,
    pub permission: char,
    pub allocations: char,
    pub fixedminor: char,
    pub state: char,
    pub devopen: char,
    pub target: char,
    pub zero: char,
}

impl LvAttributes {
    fn parse(value: &str) -> Option<Self> {
        let mut bits = value.chars();
        Some(LvAttributes {
            voltype: bits.next()?,
            permission: bits.next()?,
            allocations: bits.next()?,
            fixedminor: bits.next()?,
            state: bits.next()?,
            devopen: bits.next()?,
            target: bits.next()?,
            zero: bits.next()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VgState {
    Ok,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub uuid: String,
    pub name: String,
    pub size: u64,
    pub vg_name: String,
    pub vg_uuid: String,
    pub pe_start: u64,
    pub pe_count: u64,
    pub pe_alloc_count: u64,
    pub mda_count: u64,
    pub dev_size: u64,
    pub mda_used_count: u64,
    /// Multipath guid, always the basename of `name`.
    pub guid: String,
}

impl PhysicalVolume {
    /// Parse one `pvs` row. Returns `None` for a missing device
    /// (`name == "[unknown]"`, e.g. a disconnected LUN).
    pub(crate) fn parse(line: &str) -> Result<Option<Self>, LvmError> {
        let f = split_line("pvs", line, PV_FIELDS_LEN)?;
        if f[1] == UNKNOWN_DEVICE {
            error!("Missing pv: {} in vg: {}", f[0], f[3]);
            return Ok(None);
        }
        Ok(Some(PhysicalVolume {
            uuid: f[0].clone(),
            guid: basename(&f[1]).to_string(),
            name: f[1].clone(),
            size: number("pvs", line, &f[2])?,
            vg_name: f[3].clone(),
            vg_uuid: f[4].clone(),
            pe_start: number("pvs", line, &f[5])?,
            pe_count: number("pvs", line, &f[6])?,
            pe_alloc_count: number("pvs", line, &f[7])?,
            mda_count: number("pvs", line, &f[8])?,
            dev_size: number("pvs", line, &f[9])?,
            mda_used_count: number("pvs", line, &f[10])?,
        }))
    }

    /// A VG keeps two metadata areas but enables them on exactly one PV;
    /// that PV reports both of its areas in use.
    pub fn is_metadata_pv(&self) -> bool {
        self.mda_used_count == 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub uuid: String,
    pub name: String,
    pub attr: VgAttributes,
    pub size: u64,
    pub free: u64,
    pub extent_size: u64,
    pub extent_count: u64,
    pub free_count: u64,
    pub tags: Vec<String>,
    pub vg_mda_size: u64,
    pub vg_mda_free: u64,
    pub lv_count: u64,
    pub pv_count: u64,
    pub pv_name: Vec<String>,
    pub writeable: bool,
    pub partial: VgState,
}

impl VolumeGroup {
    fn from_row(line: &str, f: &[String], pv_name: Vec<String>) -> Result<Self, LvmError> {
        let attr = VgAttributes::parse(&f[2]).ok_or_else(|| invalid("vgs", line))?;
        Ok(VolumeGroup {
            uuid: f[0].clone(),
            name: f[1].clone(),
            attr,
            size: number("vgs", line, &f[3])?,
            free: number("vgs", line, &f[4])?,
            extent_size: number("vgs", line, &f[5])?,
            extent_count: number("vgs", line, &f[6])?,
            free_count: number("vgs", line, &f[7])?,
            tags: split_tags(&f[8]),
            vg_mda_size: number("vgs", line, &f[9])?,
            vg_mda_free: number("vgs", line, &f[10])?,
            lv_count: number("vgs", line, &f[11])?,
            pv_count: number("vgs", line, &f[12])?,
            pv_name,
            writeable: attr.permission == 'w',
            partial: if attr.partial == '-' {
                VgState::Ok
            } else {
                VgState::Partial
            },
        })
    }
}

/// Parse `vgs` output. The command emits one row per member PV; rows are
/// grouped by uuid and the per-row `pv_name` collapsed into a list. Rows
/// whose PV is `[unknown]` are skipped.
pub(crate) fn parse_vgs(lines: &[String]) -> Result<Vec<VolumeGroup>, LvmError> {
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, (String, Vec<String>, Vec<String>)> = HashMap::new();
    for line in lines {
        let f = split_line("vgs", line, VG_FIELDS_LEN)?;
        let pv_name = f[13].clone();
        if pv_name == UNKNOWN_DEVICE {
            // The PV is missing, e.g. device lost or target not connected.
            continue;
        }
        let uuid = f[0].clone();
        match rows.get_mut(&uuid) {
            Some((_, _, pv_names)) => pv_names.push(pv_name),
            None => {
                order.push(uuid.clone());
                rows.insert(uuid, (line.clone(), f, vec![pv_name]));
            }
        }
    }

    let mut vgs = Vec::with_capacity(order.len());
    for uuid in &order {
        let (line, f, pv_names) = rows.remove(uuid).expect("grouped row");
        let vg = VolumeGroup::from_row(&line, &f, pv_names)?;
        if vg.pv_count as usize != vg.pv_name.len() {
            error!(
                "vg {} has pv_count {} but pv names {:?}",
                vg.name, vg.pv_count, vg.pv_name
            );
        }
        vgs.push(vg);
    }
    Ok(vgs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub uuid: String,
    pub name: String,
    pub vg_name: String,
    pub attr: LvAttributes,
    pub size: u64,
    pub seg_start_pe: u64,
    pub devices: String,
    pub tags: Vec<String>,
    pub writeable: bool,
    pub opened: bool,
    pub active: bool,
}

impl LogicalVolume {
    /// Parse one `lvs` row. Multi-segment LVs emit one row per segment;
    /// callers keep only the first-extent row (`seg_start_pe == 0`).
    pub(crate) fn parse(line: &str) -> Result<Self, LvmError> {
        let f = split_line("lvs", line, LV_FIELDS_LEN)?;
        let attr = LvAttributes::parse(&f[3]).ok_or_else(|| invalid("lvs", line))?;
        Ok(LogicalVolume {
            uuid: f[0].clone(),
            name: f[1].clone(),
            vg_name: f[2].clone(),
            attr,
            size: number("lvs", line, &f[4])?,
            seg_start_pe: number("lvs", line, &f[5])?,
            devices: f[6].clone(),
            tags: split_tags(&f[7]),
            writeable: attr.permission == 'w',
            opened: attr.devopen == 'o',
            active: attr.state == 'a',
        })
    }
}
