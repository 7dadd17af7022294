//! Utility functions for cgroup operations

use std::fs;
use std::io;
use std::path::Path;

use super::error::{CgroupError, Result};
use crate::iolimit::{IoThrottle, PhysicalDeviceId, ThrottleKey, ThrottleValue};

/// CFS period written to every `cpu.max`, in microseconds
pub const CPU_PERIOD_US: u64 = 100_000;

/// Kernel bounds of `cpu.weight`
pub const MIN_CPU_WEIGHT: u64 = 1;
pub const MAX_CPU_WEIGHT: u64 = 10_000;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Quota of the whole host: one period per core
pub fn host_quota_us(ncores: u32) -> u64 {
    CPU_PERIOD_US * u64::from(ncores)
}

/// `cpu.max` content for a percentage of the whole host
///
/// Examples with 4 cores:
/// - 50 -> "200000 100000"
/// - 0 or -1 -> "max 100000"
pub fn cpu_max_for_percent(percent: i64, ncores: u32) -> String {
    if percent <= 0 {
        return format!("max {}", CPU_PERIOD_US);
    }

    let quota = host_quota_us(ncores) * percent as u64 / 100;
    format!("{} {}", quota, CPU_PERIOD_US)
}

/// Rescale a user priority (100 = normal) to a `cpu.weight` value
pub fn priority_to_weight(priority: u32) -> u64 {
    (u64::from(priority) * 1024 / 100).clamp(MIN_CPU_WEIGHT, MAX_CPU_WEIGHT)
}

/// Percent of the whole host used by `usage_ns` over `duration_us`
pub fn convert_cpu_usage(usage_ns: i64, duration_us: i64, ncores: u32) -> f64 {
    if duration_us <= 0 || ncores == 0 {
        return 0.0;
    }
    usage_ns as f64 / 10.0 / duration_us as f64 / f64::from(ncores)
}

/// One `io.max` line for a device
///
/// Byte rates are configured in MiB/s and written in B/s; unset and
/// unlimited keys both render as `max`.
pub fn io_max_record(device: PhysicalDeviceId, throttle: &IoThrottle) -> String {
    let mut record = device.to_string();
    for key in ThrottleKey::ALL {
        let value = match throttle.get(key) {
            Some(ThrottleValue::Limit(v)) if key.is_byte_rate() => {
                v.saturating_mul(BYTES_PER_MIB).to_string()
            }
            Some(ThrottleValue::Limit(v)) => v.to_string(),
            Some(ThrottleValue::Unlimited) | None => "max".to_string(),
        };
        record.push_str(&format!(" {}={}", key, value));
    }
    record
}

/// Parse CPU stat file
///
/// Format:
/// ```text
/// usage_usec 1234567890
/// user_usec 1000000
/// system_usec 234567890
/// nr_periods 1000
/// nr_throttled 100
/// throttled_usec 50000000
/// ```
pub fn parse_cpu_stat(content: &str) -> Result<CpuStatValues> {
    let mut values = CpuStatValues::default();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split_whitespace();
        let key = parts.next().ok_or_else(|| {
            CgroupError::ParseError(format!("Invalid cpu.stat line: {}", line))
        })?;
        let value = parts
            .next()
            .ok_or_else(|| CgroupError::ParseError(format!("Missing value for: {}", key)))?
            .parse::<u64>()
            .map_err(|e| CgroupError::ParseError(format!("Parse error for {}: {}", key, e)))?;

        match key {
            "usage_usec" => values.usage_usec = value,
            "user_usec" => values.user_usec = value,
            "system_usec" => values.system_usec = value,
            "nr_periods" => values.nr_periods = value,
            "nr_throttled" => values.nr_throttled = value,
            "throttled_usec" => values.throttled_usec = value,
            _ => {}
        }
    }

    Ok(values)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuStatValues {
    pub usage_usec: u64,
    pub user_usec: u64,
    pub system_usec: u64,
    pub nr_periods: u64,
    pub nr_throttled: u64,
    pub throttled_usec: u64,
}

impl CpuStatValues {
    /// Share of enforcement periods in which the group was throttled
    pub fn throttle_percentage(&self) -> f64 {
        if self.nr_periods == 0 {
            return 0.0;
        }
        (self.nr_throttled as f64 / self.nr_periods as f64) * 100.0
    }
}

/// Parse a file holding one unsigned integer, such as `memory.current`
pub fn parse_single_value(name: &str, content: &str) -> Result<u64> {
    content
        .trim()
        .parse()
        .map_err(|_| CgroupError::ParseError(format!("Invalid {}: {}", name, content.trim())))
}

/// Parse `cgroup.procs`: one pid per line
pub fn parse_pid_list(content: &str) -> Result<Vec<u32>> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse()
                .map_err(|_| CgroupError::ParseError(format!("Invalid pid in cgroup.procs: {}", l)))
        })
        .collect()
}

/// Map an I/O error on a cgroup path to a controller error
pub fn map_io_error(path: &Path, e: io::Error) -> CgroupError {
    match e.kind() {
        io::ErrorKind::NotFound => CgroupError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => {
            CgroupError::PermissionDenied(path.display().to_string())
        }
        _ => CgroupError::Io(e),
    }
}

/// Safe read file to string
pub fn read_cgroup_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| map_io_error(path, e))
}

/// Safe write file
pub fn write_cgroup_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| map_io_error(path, e))
}
