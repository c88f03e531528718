//! LVM device filter assembly.
//!
//! The filter is an accept-list keyed on exact device paths, so LVM never
//! scans devices that do not belong to us. Sorting makes the result
//! deterministic, which lets `cmd()` compare two rendered commands to decide
//! whether a wider retry is worthwhile.

use std::collections::BTreeSet;

/// Build the `devices { filter=... }` expression from the dynamic multipath
/// device list and the static user allowlist.
///
/// Returns `["a|^d1$|^d2$|...|", "r|.*|"]` for a non-empty device set and
/// `["r|.*|"]` (reject everything) otherwise.
pub fn build_filter<I, S>(devices: I, whitelist: &[String]) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    // BTreeSet unions, dedups and sorts in one go.
    let devices: BTreeSet<String> = devices
        .into_iter()
        .map(|d| d.as_ref().trim().to_string())
        .chain(whitelist.iter().map(|d| d.trim().to_string()))
        .filter(|d| !d.is_empty())
        .collect();

    if devices.is_empty() {
        return r#"["r|.*|"]"#.to_string();
    }

    let pattern = devices
        .iter()
        // Multipath names may contain literal \x escapes; double the
        // backslash so the regex engine sees them verbatim.
        .map(|d| format!("^{}$", d.replace(r"\x", r"\\x")))
        .collect::<Vec<_>>()
        .join("|");
    format!(r#"["a|{}|", "r|.*|"]"#, pattern)
}
