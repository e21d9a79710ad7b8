//! Firmware version comparison
//!
//! Printer firmware versions are dotted numeric strings such as `01.07.00.00`.
//! Segments compare numerically, so `01.10` sorts after `01.9`; a segment that
//! is not a number falls back to a plain string comparison.

use std::cmp::Ordering;

/// Compare two dotted version strings; missing trailing segments count as zero
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left: Vec<&str> = left.trim().split('.').collect();
    let right: Vec<&str> = right.trim().split('.').collect();

    for i in 0..left.len().max(right.len()) {
        let a = left.get(i).copied().unwrap_or("0");
        let b = right.get(i).copied().unwrap_or("0");
        let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// True when `candidate` is strictly newer than `published`
pub fn is_newer(candidate: &str, published: &str) -> bool {
    compare_versions(candidate, published) == Ordering::Greater
}
