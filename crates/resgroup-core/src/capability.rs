//! Capability model for resource groups
//!
//! A [`CapabilitySet`] is the full set of limits owned by one resource group.
//! Values arrive as `(option name, text)` pairs from DDL and are converted
//! into [`CapabilityValue`]s here; range checks live in the validator.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::iolimit::{PhysicalDeviceId, VolumeIoLimit};

pub const DEFAULT_CONCURRENCY: u32 = 20;
pub const DEFAULT_CPU_SOFT_PRIORITY: u32 = 100;

pub const MIN_CONCURRENCY: u32 = 0;

pub const MIN_CPU_HARD_QUOTA: u32 = 1;
pub const MAX_CPU_HARD_QUOTA: u32 = 100;
pub const CPU_HARD_QUOTA_DISABLED: i64 = -1;

pub const MIN_CPU_SOFT_PRIORITY: u32 = 1;
pub const MAX_CPU_SOFT_PRIORITY: u32 = 500;

pub const MIN_MIN_COST: u32 = 0;
pub const MAX_MIN_COST: u32 = 500;

pub const MEMORY_LIMIT_UNSET: i64 = -1;

/// Upper bound on the textual length of a cpuset value
pub const MAX_CPUSET_LENGTH: usize = 1024;

/// Highest core index a cpuset may name
pub const MAX_CPU_CORE: u32 = 8191;

/// `none` signifies "no group" for role assignment and cannot name a group
pub const RESERVED_NAME: &str = "none";

pub const DEFAULT_GROUP_NAME: &str = "default_group";
pub const ADMIN_GROUP_NAME: &str = "admin_group";
pub const SYSTEM_GROUP_NAME: &str = "system_group";

/// Stable resource group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    pub const DEFAULT: GroupId = GroupId(6437);
    pub const ADMIN: GroupId = GroupId(6438);
    /// Hosts the server's own processes; lives only at OS level
    pub const SYSTEM: GroupId = GroupId(6441);
    /// First identifier handed out to user-defined groups
    pub const FIRST_USER: GroupId = GroupId(16384);

    /// Reserved groups always exist and cannot be dropped
    pub fn is_reserved(&self) -> bool {
        matches!(*self, Self::DEFAULT | Self::ADMIN | Self::SYSTEM)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric bounds that depend on server configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBounds {
    /// Upper bound for `concurrency`
    pub max_connections: u32,
}

impl Default for CapabilityBounds {
    fn default() -> Self {
        Self {
            max_connections: 100,
        }
    }
}

/// Capability kinds, one per DDL option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Concurrency,
    CpuHardQuota,
    CpuSoftPriority,
    Cpuset,
    MemoryLimit,
    MinCost,
    IoLimit,
}

impl LimitType {
    pub const ALL: [LimitType; 7] = [
        LimitType::Concurrency,
        LimitType::CpuHardQuota,
        LimitType::CpuSoftPriority,
        LimitType::Cpuset,
        LimitType::MemoryLimit,
        LimitType::MinCost,
        LimitType::IoLimit,
    ];

    /// Option name as written in DDL
    pub fn name(&self) -> &'static str {
        match self {
            LimitType::Concurrency => "concurrency",
            LimitType::CpuHardQuota => "cpu_hard_quota_limit",
            LimitType::CpuSoftPriority => "cpu_soft_priority",
            LimitType::Cpuset => "cpuset",
            LimitType::MemoryLimit => "memory_limit",
            LimitType::MinCost => "min_cost",
            LimitType::IoLimit => "io_limit",
        }
    }

    pub fn from_option_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Legal range of this capability, for error messages
    pub fn range_message(&self) -> String {
        match self {
            LimitType::Concurrency => format!(
                "concurrency range is [{}, 'max_connections']",
                MIN_CONCURRENCY
            ),
            LimitType::CpuHardQuota => format!(
                "cpu_hard_quota_limit range is [{}, {}] or equals to {}",
                MIN_CPU_HARD_QUOTA, MAX_CPU_HARD_QUOTA, CPU_HARD_QUOTA_DISABLED
            ),
            LimitType::CpuSoftPriority => format!(
                "cpu_soft_priority range is [{}, {}]",
                MIN_CPU_SOFT_PRIORITY, MAX_CPU_SOFT_PRIORITY
            ),
            LimitType::MemoryLimit => format!(
                "memory_limit must be {} or a non-negative integer",
                MEMORY_LIMIT_UNSET
            ),
            LimitType::MinCost => {
                format!("min_cost range is [{}, {}]", MIN_MIN_COST, MAX_MIN_COST)
            }
            LimitType::Cpuset => "cpuset must be a list of cores, e.g. 0,2-3".to_string(),
            LimitType::IoLimit => "io_limit must be -1 or <volume>:<key>=<value>,...".to_string(),
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CPU hard quota: a percentage of the whole host, or disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum CpuHardQuota {
    Disabled,
    Percent(u32),
}

impl CpuHardQuota {
    pub fn is_active(&self) -> bool {
        matches!(self, CpuHardQuota::Percent(_))
    }

    pub fn percent(&self) -> Option<u32> {
        match self {
            CpuHardQuota::Disabled => None,
            CpuHardQuota::Percent(p) => Some(*p),
        }
    }
}

impl From<CpuHardQuota> for i64 {
    fn from(quota: CpuHardQuota) -> Self {
        match quota {
            CpuHardQuota::Disabled => CPU_HARD_QUOTA_DISABLED,
            CpuHardQuota::Percent(p) => i64::from(p),
        }
    }
}

impl TryFrom<i64> for CpuHardQuota {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        if value == CPU_HARD_QUOTA_DISABLED {
            return Ok(CpuHardQuota::Disabled);
        }
        u32::try_from(value)
            .map(CpuHardQuota::Percent)
            .map_err(|_| LimitType::CpuHardQuota.range_message())
    }
}

impl fmt::Display for CpuHardQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// Memory limit, or unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum MemoryLimit {
    #[default]
    Unset,
    Limit(u64),
}

impl From<MemoryLimit> for i64 {
    fn from(limit: MemoryLimit) -> Self {
        match limit {
            MemoryLimit::Unset => MEMORY_LIMIT_UNSET,
            MemoryLimit::Limit(v) => i64::try_from(v).unwrap_or(i64::MAX),
        }
    }
}

impl TryFrom<i64> for MemoryLimit {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            MEMORY_LIMIT_UNSET => Ok(MemoryLimit::Unset),
            v if v >= 0 => Ok(MemoryLimit::Limit(v as u64)),
            _ => Err(LimitType::MemoryLimit.range_message()),
        }
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// A set of CPU core indices
///
/// Text form is the kernel cpu list syntax: `0,2-4,7`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CpuSet(BTreeSet<u32>);

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, core: u32) -> bool {
        self.0.contains(&core)
    }

    pub fn insert(&mut self, core: u32) -> bool {
        self.0.insert(core)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.union(&other.0).copied().collect())
    }
}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        CpuSet(iter.into_iter().collect())
    }
}

impl FromStr for CpuSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() >= MAX_CPUSET_LENGTH {
            return Err(Error::InvalidParameterValue(format!(
                "the length of cpuset reached the upper limit {}",
                MAX_CPUSET_LENGTH
            )));
        }

        let text = s.trim();
        let mut cores = BTreeSet::new();
        if text.is_empty() {
            return Ok(CpuSet(cores));
        }

        let invalid = || Error::Syntax(format!("cpuset invalid: \"{}\"", s));

        for part in text.split(',') {
            let part = part.trim();
            let (first, last) = match part.split_once('-') {
                Some((a, b)) => (parse_core(a).ok_or_else(invalid)?, parse_core(b).ok_or_else(invalid)?),
                None => {
                    let core = parse_core(part).ok_or_else(invalid)?;
                    (core, core)
                }
            };
            if first > last {
                return Err(invalid());
            }
            if last > MAX_CPU_CORE {
                return Err(Error::InvalidParameterValue(format!(
                    "cpu core {} exceeds the highest core index {}",
                    last, MAX_CPU_CORE
                )));
            }
            cores.extend(first..=last);
        }

        Ok(CpuSet(cores))
    }
}

fn parse_core(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl fmt::Display for CpuSet {
    /// Compact form, consecutive cores collapsed into ranges
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for core in self.iter() {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == core => *end = core,
                _ => ranges.push((core, core)),
            }
        }

        let parts: Vec<String> = ranges
            .into_iter()
            .map(|(a, b)| if a == b { a.to_string() } else { format!("{}-{}", a, b) })
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl From<CpuSet> for String {
    fn from(set: CpuSet) -> Self {
        set.to_string()
    }
}

impl TryFrom<String> for CpuSet {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse().map_err(|e: Error| e.to_string())
    }
}

/// One parsed capability value
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityValue {
    Concurrency(u32),
    CpuHardQuota(CpuHardQuota),
    CpuSoftPriority(u32),
    Cpuset(CpuSet),
    MemoryLimit(MemoryLimit),
    MinCost(u32),
    IoLimit(Vec<VolumeIoLimit>),
}

impl CapabilityValue {
    pub fn limit_type(&self) -> LimitType {
        match self {
            CapabilityValue::Concurrency(_) => LimitType::Concurrency,
            CapabilityValue::CpuHardQuota(_) => LimitType::CpuHardQuota,
            CapabilityValue::CpuSoftPriority(_) => LimitType::CpuSoftPriority,
            CapabilityValue::Cpuset(_) => LimitType::Cpuset,
            CapabilityValue::MemoryLimit(_) => LimitType::MemoryLimit,
            CapabilityValue::MinCost(_) => LimitType::MinCost,
            CapabilityValue::IoLimit(_) => LimitType::IoLimit,
        }
    }

    /// Convert option text into a typed value
    ///
    /// `parse_io` turns an io_limit string into resolved volume limits; it is
    /// only invoked for [`LimitType::IoLimit`].
    pub fn parse<F>(limit: LimitType, text: &str, parse_io: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Vec<VolumeIoLimit>>,
    {
        let value = match limit {
            LimitType::Cpuset => {
                let cpuset: CpuSet = text.parse()?;
                if cpuset.is_empty() {
                    return Err(Error::InvalidParameterValue("cpuset invalid".to_string()));
                }
                CapabilityValue::Cpuset(cpuset)
            }
            LimitType::IoLimit => CapabilityValue::IoLimit(parse_io(text)?),
            LimitType::Concurrency => CapabilityValue::Concurrency(parse_unsigned(limit, text)?),
            LimitType::CpuSoftPriority => {
                CapabilityValue::CpuSoftPriority(parse_unsigned(limit, text)?)
            }
            LimitType::MinCost => CapabilityValue::MinCost(parse_unsigned(limit, text)?),
            LimitType::CpuHardQuota => CapabilityValue::CpuHardQuota(
                CpuHardQuota::try_from(parse_integer(limit, text)?)
                    .map_err(Error::InvalidParameterValue)?,
            ),
            LimitType::MemoryLimit => CapabilityValue::MemoryLimit(
                MemoryLimit::try_from(parse_integer(limit, text)?)
                    .map_err(Error::InvalidParameterValue)?,
            ),
        };
        Ok(value)
    }
}

/// Parse an integer option; values outside the 32-bit range are rejected
fn parse_integer(limit: LimitType, text: &str) -> Result<i64> {
    let value: i64 = text.trim().parse().map_err(|_| {
        Error::InvalidParameterValue(format!("{} requires a numeric value", limit.name()))
    })?;

    if value < i64::from(i32::MIN) || value > i64::from(i32::MAX) {
        return Err(Error::Syntax(format!(
            "capability {} is out of range",
            limit.name()
        )));
    }
    Ok(value)
}

fn parse_unsigned(limit: LimitType, text: &str) -> Result<u32> {
    let value = parse_integer(limit, text)?;
    u32::try_from(value).map_err(|_| Error::InvalidParameterValue(limit.range_message()))
}

/// All limits owned by one resource group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub concurrency: u32,
    pub cpu_hard_quota: CpuHardQuota,
    pub cpu_soft_priority: u32,
    #[serde(default)]
    pub cpuset: CpuSet,
    #[serde(default)]
    pub memory_limit: MemoryLimit,
    #[serde(default)]
    pub min_cost: u32,
    #[serde(default)]
    pub io_limit: Vec<VolumeIoLimit>,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            cpu_hard_quota: CpuHardQuota::Disabled,
            cpu_soft_priority: DEFAULT_CPU_SOFT_PRIORITY,
            cpuset: CpuSet::new(),
            memory_limit: MemoryLimit::Unset,
            min_cost: 0,
            io_limit: Vec::new(),
        }
    }
}

impl CapabilitySet {
    /// Build the capabilities of a new group from its CREATE options
    ///
    /// Each capability may appear once. Exactly one of
    /// `cpu_hard_quota_limit` and `cpuset` must be given.
    pub fn from_options(values: Vec<CapabilityValue>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut caps = CapabilitySet::default();

        for value in values {
            let limit = value.limit_type();
            if !seen.insert(limit) {
                return Err(Error::Syntax(format!(
                    "found duplicate resource group resource type: {}",
                    limit
                )));
            }

            match value {
                CapabilityValue::Concurrency(v) => caps.concurrency = v,
                CapabilityValue::CpuHardQuota(v) => caps.cpu_hard_quota = v,
                CapabilityValue::CpuSoftPriority(v) => caps.cpu_soft_priority = v,
                CapabilityValue::Cpuset(v) => caps.cpuset = v,
                CapabilityValue::MemoryLimit(v) => caps.memory_limit = v,
                CapabilityValue::MinCost(v) => caps.min_cost = v,
                CapabilityValue::IoLimit(v) => caps.io_limit = v,
            }
        }

        let has_quota = seen.contains(&LimitType::CpuHardQuota);
        let has_cpuset = seen.contains(&LimitType::Cpuset);
        if has_quota && has_cpuset {
            return Err(Error::InvalidParameterValue(
                "can't specify both cpu_hard_quota_limit and cpuset".to_string(),
            ));
        }
        if !has_quota && !has_cpuset {
            return Err(Error::InvalidParameterValue(
                "must specify cpu_hard_quota_limit or cpuset".to_string(),
            ));
        }
        if has_cpuset {
            caps.cpu_hard_quota = CpuHardQuota::Disabled;
        }

        Ok(caps)
    }

    /// Return a copy with one capability replaced (ALTER semantics)
    ///
    /// CPU hard quota and cpuset are mutually exclusive: setting the quota
    /// clears the cpuset, setting the cpuset disables the quota and resets
    /// the soft priority to its default.
    pub fn with_value(&self, value: CapabilityValue) -> CapabilitySet {
        let mut caps = self.clone();
        match value {
            CapabilityValue::Concurrency(v) => caps.concurrency = v,
            CapabilityValue::CpuHardQuota(v) => {
                caps.cpu_hard_quota = v;
                caps.cpuset.clear();
            }
            CapabilityValue::CpuSoftPriority(v) => caps.cpu_soft_priority = v,
            CapabilityValue::Cpuset(v) => {
                caps.cpuset = v;
                caps.cpu_hard_quota = CpuHardQuota::Disabled;
                caps.cpu_soft_priority = DEFAULT_CPU_SOFT_PRIORITY;
            }
            CapabilityValue::MemoryLimit(v) => caps.memory_limit = v,
            CapabilityValue::MinCost(v) => caps.min_cost = v,
            CapabilityValue::IoLimit(v) => caps.io_limit = v,
        }
        caps
    }

    pub fn uses_cpuset(&self) -> bool {
        !self.cpuset.is_empty()
    }

    /// Devices this group throttles with a non-empty throttle
    pub fn io_devices(&self) -> BTreeSet<PhysicalDeviceId> {
        self.io_limit
            .iter()
            .filter(|limit| !limit.throttle.is_empty())
            .flat_map(|limit| limit.devices.iter().copied())
            .collect()
    }

    /// Text form of one capability, as stored and listed
    pub fn value_text(&self, limit: LimitType) -> String {
        match limit {
            LimitType::Concurrency => self.concurrency.to_string(),
            LimitType::CpuHardQuota => self.cpu_hard_quota.to_string(),
            LimitType::CpuSoftPriority => self.cpu_soft_priority.to_string(),
            LimitType::Cpuset => {
                if self.cpuset.is_empty() {
                    "-1".to_string()
                } else {
                    self.cpuset.to_string()
                }
            }
            LimitType::MemoryLimit => self.memory_limit.to_string(),
            LimitType::MinCost => self.min_cost.to_string(),
            LimitType::IoLimit => crate::iolimit::format_io_limit(&self.io_limit),
        }
    }
}
