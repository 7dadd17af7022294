//! I/O throttle data model

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Physical disk identity, never a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PhysicalDeviceId {
    pub major: u64,
    pub minor: u64,
}

impl PhysicalDeviceId {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for PhysicalDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for PhysicalDeviceId {
    type Err = Error;

    /// Parse the kernel `maj:min` form found in sysfs `dev` files
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Io(format!("invalid device number: \"{}\"", s.trim()));
        let (major, minor) = s.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<PhysicalDeviceId> for String {
    fn from(id: PhysicalDeviceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PhysicalDeviceId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse().map_err(|e: Error| e.to_string())
    }
}

/// Throttle keys accepted in an I/O limit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThrottleKey {
    Rbps,
    Wbps,
    Riops,
    Wiops,
}

impl ThrottleKey {
    pub const ALL: [ThrottleKey; 4] = [
        ThrottleKey::Rbps,
        ThrottleKey::Wbps,
        ThrottleKey::Riops,
        ThrottleKey::Wiops,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ThrottleKey::Rbps => "rbps",
            ThrottleKey::Wbps => "wbps",
            ThrottleKey::Riops => "riops",
            ThrottleKey::Wiops => "wiops",
        }
    }

    /// Byte-rate keys are given in MiB/s and written to the kernel in B/s
    pub fn is_byte_rate(&self) -> bool {
        matches!(self, ThrottleKey::Rbps | ThrottleKey::Wbps)
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ThrottleKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::Syntax(format!("io limit: unknown key \"{}\"", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleValue {
    Limit(u64),
    Unlimited,
}

impl fmt::Display for ThrottleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleValue::Limit(v) => write!(f, "{}", v),
            ThrottleValue::Unlimited => f.write_str("max"),
        }
    }
}

/// Four independently optional throttles; each may be assigned once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoThrottle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbps: Option<ThrottleValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wbps: Option<ThrottleValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub riops: Option<ThrottleValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiops: Option<ThrottleValue>,
}

impl IoThrottle {
    fn slot(&mut self, key: ThrottleKey) -> &mut Option<ThrottleValue> {
        match key {
            ThrottleKey::Rbps => &mut self.rbps,
            ThrottleKey::Wbps => &mut self.wbps,
            ThrottleKey::Riops => &mut self.riops,
            ThrottleKey::Wiops => &mut self.wiops,
        }
    }

    pub fn get(&self, key: ThrottleKey) -> Option<ThrottleValue> {
        match key {
            ThrottleKey::Rbps => self.rbps,
            ThrottleKey::Wbps => self.wbps,
            ThrottleKey::Riops => self.riops,
            ThrottleKey::Wiops => self.wiops,
        }
    }

    /// Assign a key; a second assignment of the same key is a syntax error
    pub fn set(&mut self, key: ThrottleKey, value: ThrottleValue) -> Result<()> {
        let slot = self.slot(key);
        if slot.is_some() {
            return Err(Error::Syntax(format!(
                "duplicated IO_LIMIT parameters: {}",
                key
            )));
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        ThrottleKey::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

impl fmt::Display for IoThrottle {
    /// `key=value` pairs of the assigned keys, comma separated
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = ThrottleKey::ALL
            .iter()
            .filter_map(|k| self.get(*k).map(|v| format!("{}={}", k, v)))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Target of one I/O limit entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum VolumeRef {
    Named(String),
    /// `*`: every storage volume known to the system
    All,
}

impl VolumeRef {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, VolumeRef::All)
    }
}

impl fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeRef::Named(name) => f.write_str(name),
            VolumeRef::All => f.write_str("*"),
        }
    }
}

impl From<VolumeRef> for String {
    fn from(volume: VolumeRef) -> Self {
        volume.to_string()
    }
}

impl From<String> for VolumeRef {
    fn from(value: String) -> Self {
        if value == "*" {
            VolumeRef::All
        } else {
            VolumeRef::Named(value)
        }
    }
}

/// One volume's throttle, with the disks it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeIoLimit {
    pub volume: VolumeRef,
    pub devices: BTreeSet<PhysicalDeviceId>,
    pub throttle: IoThrottle,
}

/// Storage form of an I/O limit list; `-1` when there is none
pub fn format_io_limit(limits: &[VolumeIoLimit]) -> String {
    if limits.is_empty() {
        return "-1".to_string();
    }

    limits
        .iter()
        .map(|limit| format!("{}:{}", limit.volume, limit.throttle))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parse() {
        let dev: PhysicalDeviceId = "8:16\n".parse().unwrap();
        assert_eq!(dev, PhysicalDeviceId::new(8, 16));
        assert_eq!(dev.to_string(), "8:16");

        assert!(matches!("8".parse::<PhysicalDeviceId>(), Err(Error::Io(_))));
        assert!(matches!("a:b".parse::<PhysicalDeviceId>(), Err(Error::Io(_))));
    }

    #[test]
    fn test_throttle_set_once() {
        let mut throttle = IoThrottle::default();
        assert!(throttle.is_empty());

        throttle.set(ThrottleKey::Rbps, ThrottleValue::Limit(10)).unwrap();
        assert!(!throttle.is_empty());

        let err = throttle
            .set(ThrottleKey::Rbps, ThrottleValue::Limit(20))
            .unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
        assert_eq!(throttle.rbps, Some(ThrottleValue::Limit(10)));
    }

    #[test]
    fn test_throttle_display() {
        let mut throttle = IoThrottle::default();
        throttle.set(ThrottleKey::Wiops, ThrottleValue::Unlimited).unwrap();
        throttle.set(ThrottleKey::Rbps, ThrottleValue::Limit(5)).unwrap();
        assert_eq!(throttle.to_string(), "rbps=5,wiops=max");
    }

    #[test]
    fn test_throttle_key_parse() {
        assert_eq!("riops".parse::<ThrottleKey>().unwrap(), ThrottleKey::Riops);
        assert!(matches!("rbs".parse::<ThrottleKey>(), Err(Error::Syntax(_))));
        assert!(ThrottleKey::Wbps.is_byte_rate());
        assert!(!ThrottleKey::Wiops.is_byte_rate());
    }

    #[test]
    fn test_format_io_limit() {
        assert_eq!(format_io_limit(&[]), "-1");

        let mut throttle = IoThrottle::default();
        throttle.set(ThrottleKey::Rbps, ThrottleValue::Limit(10)).unwrap();
        let limits = vec![
            VolumeIoLimit {
                volume: VolumeRef::Named("ts1".to_string()),
                devices: BTreeSet::new(),
                throttle,
            },
            VolumeIoLimit {
                volume: VolumeRef::All,
                devices: BTreeSet::new(),
                throttle,
            },
        ];
        assert_eq!(format_io_limit(&limits), "ts1:rbps=10;*:rbps=10");
    }

    #[test]
    fn test_volume_limit_serde() {
        let mut throttle = IoThrottle::default();
        throttle.set(ThrottleKey::Wbps, ThrottleValue::Unlimited).unwrap();
        let limit = VolumeIoLimit {
            volume: VolumeRef::All,
            devices: [PhysicalDeviceId::new(259, 0)].into_iter().collect(),
            throttle,
        };

        let json = serde_json::to_string(&limit).unwrap();
        assert!(json.contains(r#""volume":"*""#));
        assert!(json.contains(r#""259:0""#));

        let back: VolumeIoLimit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, limit);
    }
}
