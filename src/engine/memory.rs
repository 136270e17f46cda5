// src/engine/memory.rs
//
// Memory headroom detection for the admission check.
//
// Reads the container limit and usage from cgroup v2 (memory.max /
// memory.current) and falls back to /proc/meminfo when the process is not
// limited. On platforms where neither exists nothing is detected and the
// check passes.

use crate::validate::{MemoryMonitor, Verdict};
use std::fs;

pub const DEFAULT_MAX_USAGE_RATIO: f64 = 0.9;

/// Point-in-time memory limit and usage, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub limit_bytes: u64,
    pub used_bytes: u64,
}

impl MemorySnapshot {
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Rejects new conversions while usage is above `max_usage_ratio` of the limit.
#[derive(Clone, Copy, Debug)]
pub struct SystemMemoryMonitor {
    max_usage_ratio: f64,
    probe: fn() -> Option<MemorySnapshot>,
}

impl SystemMemoryMonitor {
    pub fn new(max_usage_ratio: f64) -> Self {
        Self::with_probe(max_usage_ratio, detect_memory_snapshot)
    }

    /// Use a custom probe instead of reading the host.
    pub fn with_probe(max_usage_ratio: f64, probe: fn() -> Option<MemorySnapshot>) -> Self {
        Self {
            max_usage_ratio: max_usage_ratio.clamp(0.0, 1.0),
            probe,
        }
    }

    pub fn max_usage_ratio(&self) -> f64 {
        self.max_usage_ratio
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USAGE_RATIO)
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn check(&self) -> Verdict {
        let Some(snapshot) = (self.probe)() else {
            return Verdict::Valid;
        };
        let ratio = snapshot.usage_ratio();
        if ratio > self.max_usage_ratio {
            Verdict::invalid(format!(
                "memory usage {:.0}% is above the {:.0}% threshold",
                ratio * 100.0,
                self.max_usage_ratio * 100.0
            ))
        } else {
            Verdict::Valid
        }
    }
}

/// Current limit and usage: cgroup v2 first, then the whole machine.
pub fn detect_memory_snapshot() -> Option<MemorySnapshot> {
    detect_cgroup_v2_snapshot().or_else(detect_system_snapshot)
}

fn detect_cgroup_v2_snapshot() -> Option<MemorySnapshot> {
    let mount_point = fs::read_to_string("/proc/self/mountinfo")
        .ok()
        .and_then(|m| parse_cgroup2_mount_point(&m))
        .unwrap_or_else(|| "/sys/fs/cgroup".to_string());
    let rel = fs::read_to_string("/proc/self/cgroup")
        .ok()
        .and_then(|c| parse_cgroup2_relative_path(&c))
        .unwrap_or_default();

    let limit = fs::read_to_string(cgroup_file(&mount_point, &rel, "memory.max")).ok()?;
    let limit_bytes = parse_cgroup_value(&limit)?;
    let current = fs::read_to_string(cgroup_file(&mount_point, &rel, "memory.current")).ok()?;
    let used_bytes = parse_cgroup_value(&current)?;
    Some(MemorySnapshot {
        limit_bytes,
        used_bytes,
    })
}

fn detect_system_snapshot() -> Option<MemorySnapshot> {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| parse_meminfo(&content))
}

/// A cgroup memory file value. "max" means unlimited and yields None.
pub fn parse_cgroup_value(content: &str) -> Option<u64> {
    match content.trim() {
        "max" => None,
        value => value.parse().ok(),
    }
}

/// Total and used memory from /proc/meminfo (used = MemTotal - MemAvailable).
pub fn parse_meminfo(content: &str) -> Option<MemorySnapshot> {
    let field = |name: &str| {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kb * 1024)
        })
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    Some(MemorySnapshot {
        limit_bytes: total,
        used_bytes: total.saturating_sub(available),
    })
}

fn parse_cgroup2_mount_point(mountinfo: &str) -> Option<String> {
    mountinfo.lines().find_map(|line| {
        // 36 27 0:31 / /sys/fs/cgroup rw,relatime - cgroup2 cgroup2 rw
        let (pre, post) = line.split_once(" - ")?;
        if !post.starts_with("cgroup2") {
            return None;
        }
        pre.split_whitespace().nth(4).map(str::to_string)
    })
}

fn parse_cgroup2_relative_path(content: &str) -> Option<String> {
    // 0::/docker/abcd
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::").map(str::to_string))
}

fn cgroup_file(mount_point: &str, rel: &str, file: &str) -> String {
    let base = mount_point.trim_end_matches('/');
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        format!("{base}/{file}")
    } else {
        format!("{base}/{rel}/{file}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgroup_values() {
        assert_eq!(parse_cgroup_value("max\n"), None);
        assert_eq!(parse_cgroup_value("536870912\n"), Some(536_870_912));
        assert_eq!(parse_cgroup_value("garbage"), None);
    }

    #[test]
    fn test_meminfo_parsing() {
        let sample = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let snapshot = parse_meminfo(sample).unwrap();
        assert_eq!(snapshot.limit_bytes, 16_000_000 * 1024);
        assert_eq!(snapshot.used_bytes, 12_000_000 * 1024);
        assert!((snapshot.usage_ratio() - 0.75).abs() < 1e-9);
        assert_eq!(parse_meminfo("MemTotal: 10 kB\n"), None);
    }

    #[test]
    fn test_mount_and_path_parsing() {
        let mountinfo = "25 1 8:1 / / rw - ext4 /dev/sda1 rw\n36 27 0:31 / /sys/fs/cgroup rw,relatime - cgroup2 cgroup2 rw\n";
        assert_eq!(parse_cgroup2_mount_point(mountinfo).as_deref(), Some("/sys/fs/cgroup"));
        assert_eq!(
            parse_cgroup2_relative_path("0::/docker/abc\n").as_deref(),
            Some("/docker/abc")
        );
        assert_eq!(
            cgroup_file("/sys/fs/cgroup/", "/docker/abc", "memory.max"),
            "/sys/fs/cgroup/docker/abc/memory.max"
        );
        assert_eq!(cgroup_file("/sys/fs/cgroup", "/", "memory.max"), "/sys/fs/cgroup/memory.max");
    }

    #[test]
    fn test_monitor_thresholds() {
        fn busy() -> Option<MemorySnapshot> {
            Some(MemorySnapshot { limit_bytes: 100, used_bytes: 95 })
        }
        fn idle() -> Option<MemorySnapshot> {
            Some(MemorySnapshot { limit_bytes: 100, used_bytes: 10 })
        }
        fn unknown() -> Option<MemorySnapshot> {
            None
        }
        assert!(!SystemMemoryMonitor::with_probe(0.9, busy).check().is_valid());
        assert!(SystemMemoryMonitor::with_probe(0.9, idle).check().is_valid());
        assert!(SystemMemoryMonitor::with_probe(0.9, unknown).check().is_valid());
        assert_eq!(SystemMemoryMonitor::default().max_usage_ratio(), 0.9);
    }
}
