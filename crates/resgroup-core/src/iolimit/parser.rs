//! Parser for the per-volume I/O limit string
//!
//! ```text
//! config  := "-1" | entry (";" entry)*
//! entry   := volume ":" key "=" value ("," key "=" value)*
//! volume  := "*" | identifier
//! key     := rbps | wbps | riops | wiops
//! value   := "max" | digits
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::debug;

use super::device::DeviceResolver;
use super::types::{IoThrottle, PhysicalDeviceId, ThrottleKey, ThrottleValue, VolumeIoLimit, VolumeRef};
use crate::error::{Error, Result};

/// Explicit "no I/O limit" form
pub const NO_IO_LIMIT: &str = "-1";

/// Storage volumes the DSL may name, with their on-disk locations
pub trait VolumeCatalog: Send + Sync {
    fn location(&self, name: &str) -> Option<PathBuf>;

    /// Every known volume, used to expand `*`
    fn volumes(&self) -> Vec<(String, PathBuf)>;
}

/// Fixed name to location map
#[derive(Debug, Clone, Default)]
pub struct StaticVolumeCatalog {
    volumes: BTreeMap<String, PathBuf>,
}

impl StaticVolumeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, location: impl Into<PathBuf>) {
        self.volumes.insert(name.into(), location.into());
    }
}

impl<N: Into<String>, P: Into<PathBuf>> FromIterator<(N, P)> for StaticVolumeCatalog {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for (name, location) in iter {
            catalog.insert(name, location);
        }
        catalog
    }
}

impl VolumeCatalog for StaticVolumeCatalog {
    fn location(&self, name: &str) -> Option<PathBuf> {
        self.volumes.get(name).cloned()
    }

    fn volumes(&self) -> Vec<(String, PathBuf)> {
        self.volumes
            .iter()
            .map(|(name, location)| (name.clone(), location.clone()))
            .collect()
    }
}

/// One syntactically valid entry, before device resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoLimitEntry {
    pub volume: VolumeRef,
    pub throttle: IoThrottle,
}

/// Syntax-only parse, no volume or device lookups
pub fn parse_io_limit_syntax(text: &str) -> Result<Vec<IoLimitEntry>> {
    let text = text.trim();
    if text == NO_IO_LIMIT {
        return Ok(Vec::new());
    }
    if text.is_empty() {
        return Err(Error::Syntax("io limit: empty value".to_string()));
    }

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for raw in text.split(';') {
        let entry = parse_entry(raw)?;
        if !seen.insert(entry.volume.clone()) {
            return Err(Error::Syntax(format!(
                "io limit: volume \"{}\" appears more than once",
                entry.volume
            )));
        }
        entries.push(entry);
    }

    if entries.len() > 1 && entries.iter().any(|e| e.volume.is_wildcard()) {
        return Err(Error::Syntax(
            "io limit: '*' must be the only entry".to_string(),
        ));
    }

    Ok(entries)
}

fn parse_entry(raw: &str) -> Result<IoLimitEntry> {
    let raw = raw.trim();
    let (volume, throttles) = raw.split_once(':').ok_or_else(|| {
        Error::Syntax(format!("io limit: missing ':' in \"{}\"", raw))
    })?;

    let volume = volume.trim();
    if volume.is_empty() {
        return Err(Error::Syntax(format!("io limit: missing volume in \"{}\"", raw)));
    }
    let volume = VolumeRef::from(volume.to_string());

    let mut throttle = IoThrottle::default();
    for item in throttles.split(',') {
        let (key, value) = item.trim().split_once('=').ok_or_else(|| {
            Error::Syntax(format!("io limit: expected key=value, got \"{}\"", item.trim()))
        })?;
        let key: ThrottleKey = key.trim().parse()?;
        throttle.set(key, parse_value(key, value.trim())?)?;
    }

    Ok(IoLimitEntry { volume, throttle })
}

/// `max` or a non-negative integer; zero never throttles and maps to max
fn parse_value(key: ThrottleKey, value: &str) -> Result<ThrottleValue> {
    if value == "max" {
        return Ok(ThrottleValue::Unlimited);
    }
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Syntax(format!(
            "io limit: invalid value \"{}\" for {}",
            value, key
        )));
    }

    let number: u64 = value.parse().map_err(|_| {
        Error::Syntax(format!("io limit: value of {} is out of range", key))
    })?;
    Ok(match number {
        0 => ThrottleValue::Unlimited,
        n => ThrottleValue::Limit(n),
    })
}

/// Parse an I/O limit string and resolve every volume to its disks
///
/// Two named volumes that live on the same disk cannot both be throttled.
pub fn parse_io_limit(
    text: &str,
    catalog: &dyn VolumeCatalog,
    resolver: &dyn DeviceResolver,
) -> Result<Vec<VolumeIoLimit>> {
    let entries = parse_io_limit_syntax(text)?;
    let mut owners: BTreeMap<PhysicalDeviceId, String> = BTreeMap::new();
    let mut limits = Vec::with_capacity(entries.len());

    for entry in entries {
        let devices = match &entry.volume {
            VolumeRef::Named(name) => {
                let location = catalog.location(name).ok_or_else(|| {
                    Error::InvalidParameterValue(format!("volume \"{}\" does not exist", name))
                })?;
                let device = resolver.resolve(&location)?;

                if let Some(owner) = owners.get(&device) {
                    return Err(Error::DeviceConflict {
                        device: device.to_string(),
                        owner: format!("volume {}", owner),
                    });
                }
                owners.insert(device, name.clone());

                BTreeSet::from([device])
            }
            VolumeRef::All => catalog
                .volumes()
                .iter()
                .map(|(_, location)| resolver.resolve(location))
                .collect::<Result<BTreeSet<_>>>()?,
        };

        debug!(volume = %entry.volume, devices = devices.len(), "resolved io limit entry");
        limits.push(VolumeIoLimit {
            volume: entry.volume,
            devices,
            throttle: entry.throttle,
        });
    }

    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iolimit::device::StaticDeviceResolver;
    use crate::iolimit::format_io_limit;

    fn fixtures() -> (StaticVolumeCatalog, StaticDeviceResolver) {
        let catalog: StaticVolumeCatalog = [
            ("ts1", "/data/ts1"),
            ("ts2", "/data/ts2"),
            ("ts3", "/mnt/fast/ts3"),
        ]
        .into_iter()
        .collect();

        let mut resolver = StaticDeviceResolver::new();
        resolver.insert("/data/ts1", PhysicalDeviceId::new(8, 0));
        resolver.insert("/data/ts2", PhysicalDeviceId::new(8, 0));
        resolver.insert("/mnt/fast/ts3", PhysicalDeviceId::new(259, 0));
        (catalog, resolver)
    }

    #[test]
    fn test_parse_two_entries() {
        let entries = parse_io_limit_syntax("ts1:rbps=10,riops=50;ts2:wbps=10,rbps=50").unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].volume, VolumeRef::Named("ts1".to_string()));
        assert_eq!(entries[0].throttle.rbps, Some(ThrottleValue::Limit(10)));
        assert_eq!(entries[0].throttle.riops, Some(ThrottleValue::Limit(50)));
        assert_eq!(entries[0].throttle.wbps, None);
        assert_eq!(entries[0].throttle.wiops, None);

        assert_eq!(entries[1].volume, VolumeRef::Named("ts2".to_string()));
        assert_eq!(entries[1].throttle.wbps, Some(ThrottleValue::Limit(10)));
        assert_eq!(entries[1].throttle.rbps, Some(ThrottleValue::Limit(50)));
        assert_eq!(entries[1].throttle.riops, None);
    }

    #[test]
    fn test_parse_duplicate_key() {
        let err = parse_io_limit_syntax("ts1:rbps=10,rbps=20").unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn test_parse_no_limit() {
        assert!(parse_io_limit_syntax("-1").unwrap().is_empty());
        assert!(parse_io_limit_syntax("  -1 ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_max_and_zero() {
        let entries = parse_io_limit_syntax("ts1:rbps=max,wbps=0,wiops=7").unwrap();
        let throttle = entries[0].throttle;
        assert_eq!(throttle.rbps, Some(ThrottleValue::Unlimited));
        assert_eq!(throttle.wbps, Some(ThrottleValue::Unlimited));
        assert_eq!(throttle.wiops, Some(ThrottleValue::Limit(7)));
    }

    #[test]
    fn test_parse_syntax_errors() {
        for text in [
            "",
            "ts1",
            ":rbps=1",
            "ts1:",
            "ts1:rbps",
            "ts1:rbps=",
            "ts1:rbps=-3",
            "ts1:rbps=1.5",
            "ts1:read=1",
            "ts1:rbps=1;",
            "ts1:rbps=99999999999999999999999",
            "ts1:rbps=1;ts1:wbps=2",
            "*:rbps=1;ts1:wbps=2",
        ] {
            let result = parse_io_limit_syntax(text);
            assert!(
                matches!(result, Err(Error::Syntax(_))),
                "expected syntax error for {:?}, got {:?}",
                text,
                result
            );
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let text = "ts1:rbps=10,riops=50;ts2:wbps=10,rbps=50";
        let entries = parse_io_limit_syntax(text).unwrap();
        let limits: Vec<VolumeIoLimit> = entries
            .iter()
            .map(|e| VolumeIoLimit {
                volume: e.volume.clone(),
                devices: BTreeSet::new(),
                throttle: e.throttle,
            })
            .collect();

        let rendered = format_io_limit(&limits);
        assert_eq!(parse_io_limit_syntax(&rendered).unwrap(), entries);
    }

    fn render(entries: &[IoLimitEntry]) -> String {
        let limits: Vec<VolumeIoLimit> = entries
            .iter()
            .map(|e| VolumeIoLimit {
                volume: e.volume.clone(),
                devices: BTreeSet::new(),
                throttle: e.throttle,
            })
            .collect();
        format_io_limit(&limits)
    }

    #[test]
    fn test_format_canonical_key_order() {
        let entries = parse_io_limit_syntax("ts1:wiops=4,riops=3,wbps=2,rbps=1").unwrap();
        let throttle = entries[0].throttle;
        assert_eq!(throttle.rbps, Some(ThrottleValue::Limit(1)));
        assert_eq!(throttle.wbps, Some(ThrottleValue::Limit(2)));
        assert_eq!(throttle.riops, Some(ThrottleValue::Limit(3)));
        assert_eq!(throttle.wiops, Some(ThrottleValue::Limit(4)));

        let rendered = render(&entries);
        assert_eq!(rendered, "ts1:rbps=1,wbps=2,riops=3,wiops=4");
        assert_eq!(parse_io_limit_syntax(&rendered).unwrap(), entries);
    }

    #[test]
    fn test_format_zero_and_max() {
        let entries = parse_io_limit_syntax("ts1:wbps=0,rbps=max").unwrap();
        assert_eq!(render(&entries), "ts1:rbps=max,wbps=max");
    }

    #[test]
    fn test_format_wildcard() {
        let entries = parse_io_limit_syntax("*:rbps=5").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].volume, VolumeRef::All);
        assert_eq!(entries[0].throttle.rbps, Some(ThrottleValue::Limit(5)));

        let rendered = render(&entries);
        assert_eq!(rendered, "*:rbps=5");
        assert_eq!(parse_io_limit_syntax(&rendered).unwrap(), entries);
    }

    #[test]
    fn test_format_no_limit() {
        let entries = parse_io_limit_syntax("-1").unwrap();
        assert_eq!(render(&entries), "-1");
    }

    #[test]
    fn test_parse_surrounding_whitespace() {
        let spaced = parse_io_limit_syntax(" ts1 : rbps = 10 , wiops=max ; ts2:riops= 3 ").unwrap();
        let tight = parse_io_limit_syntax("ts1:rbps=10,wiops=max;ts2:riops=3").unwrap();
        assert_eq!(spaced, tight);
        assert_eq!(render(&spaced), "ts1:rbps=10,wiops=max;ts2:riops=3");
    }

    #[test]
    fn test_parse_volume_rules() {
        let err = parse_io_limit_syntax("ts1:rbps=1;ts1:wbps=2").unwrap_err();
        assert!(matches!(err, Error::Syntax(ref msg) if msg.contains("more than once")));

        let err = parse_io_limit_syntax("*:rbps=1;ts1:wbps=2").unwrap_err();
        assert!(matches!(err, Error::Syntax(ref msg) if msg.contains("only entry")));

        let err = parse_io_limit_syntax("ts1:wbps=2;*:rbps=1").unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn test_resolve_named_volumes() {
        let (catalog, resolver) = fixtures();
        let limits = parse_io_limit("ts1:rbps=10;ts3:wiops=max", &catalog, &resolver).unwrap();

        assert_eq!(limits.len(), 2);
        assert!(limits[0].devices.contains(&PhysicalDeviceId::new(8, 0)));
        assert!(limits[1].devices.contains(&PhysicalDeviceId::new(259, 0)));
    }

    #[test]
    fn test_resolve_same_disk_conflict() {
        let (catalog, resolver) = fixtures();
        let err = parse_io_limit("ts1:rbps=10;ts2:wbps=10", &catalog, &resolver).unwrap_err();
        match err {
            Error::DeviceConflict { device, owner } => {
                assert_eq!(device, "8:0");
                assert!(owner.contains("ts1"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_wildcard() {
        let (catalog, resolver) = fixtures();
        let limits = parse_io_limit("*:wbps=100", &catalog, &resolver).unwrap();

        assert_eq!(limits.len(), 1);
        assert!(limits[0].volume.is_wildcard());
        assert_eq!(limits[0].devices.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_volume() {
        let (catalog, resolver) = fixtures();
        let err = parse_io_limit("nope:rbps=1", &catalog, &resolver).unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue(_)));
    }

    #[test]
    fn test_resolve_failure_is_io_error() {
        let mut catalog = StaticVolumeCatalog::new();
        catalog.insert("lost", "/nowhere");
        let resolver = StaticDeviceResolver::new();

        let err = parse_io_limit("lost:rbps=1", &catalog, &resolver).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
