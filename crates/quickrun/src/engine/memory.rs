//! Resident memory sampling for a spawned process group
//!
//! On Linux the resident set of every process whose process group matches the
//! spawned child is summed from `/proc`. Elsewhere samples read as zero.

/// Tracks the peak resident memory of one process group
#[derive(Debug)]
pub(crate) struct MemorySampler {
    pgid: Option<u32>,
    peak: u64,
}

impl MemorySampler {
    pub fn new(pgid: Option<u32>) -> Self {
        Self { pgid, peak: 0 }
    }

    /// Take a sample, returning the current group total in bytes
    pub fn sample(&mut self) -> u64 {
        let current = self.pgid.map(group_rss).unwrap_or(0);
        self.peak = self.peak.max(current);
        current
    }

    /// Largest sample seen so far, in bytes
    pub fn peak(&self) -> u64 {
        self.peak
    }
}

#[cfg(target_os = "linux")]
fn group_rss(pgid: u32) -> u64 {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let page_size = page_size();

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        // Processes may exit between listing and reading
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .filter(|(group, _)| *group == pgid)
        .map(|(_, pages)| pages.saturating_mul(page_size))
        .sum()
}

#[cfg(not(target_os = "linux"))]
fn group_rss(_pgid: u32) -> u64 {
    0
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}

/// Extract `(pgrp, rss_pages)` from the contents of `/proc/<pid>/stat`
///
/// The command name is parenthesized and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<(u32, u64)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state); pgrp is field 5, rss field 24
    let pgrp = fields.get(2)?.parse().ok()?;
    let rss = fields.get(21)?.parse().ok()?;
    Some((pgrp, rss))
}
