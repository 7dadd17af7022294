//! Range checks and cross-group invariants
//!
//! Run before a definition is written to the registry: out-of-range
//! values, CPU quota together with a cpuset, cores claimed by two groups
//! and disks throttled by two groups are all rejected here.

use crate::capability::{
    CapabilityBounds, CapabilitySet, CpuHardQuota, CpuSet, GroupId, LimitType,
    MAX_CPU_HARD_QUOTA, MAX_CPU_SOFT_PRIORITY, MAX_MIN_COST, MIN_CPU_HARD_QUOTA,
    MIN_CPU_SOFT_PRIORITY,
};
use crate::error::{Error, Result};
use crate::registry::ResourceGroup;

#[derive(Debug, Clone)]
pub struct Validator {
    bounds: CapabilityBounds,
    cpuset_enabled: bool,
    available_cores: Option<CpuSet>,
}

impl Validator {
    pub fn new(bounds: CapabilityBounds) -> Self {
        Self {
            bounds,
            cpuset_enabled: true,
            available_cores: None,
        }
    }

    pub fn with_cpuset_enabled(mut self, enabled: bool) -> Self {
        self.cpuset_enabled = enabled;
        self
    }

    /// Cores a cpuset may name; unchecked when never set
    pub fn with_available_cores(mut self, cores: CpuSet) -> Self {
        self.available_cores = Some(cores);
        self
    }

    pub fn bounds(&self) -> &CapabilityBounds {
        &self.bounds
    }

    /// Check `candidate` against itself and every other existing group
    ///
    /// `existing` may include the candidate's own previous definition; it is
    /// skipped by id. With `is_new`, an existing group with the same id is
    /// an error.
    pub fn validate<'a, I>(&self, candidate: &ResourceGroup, existing: I, is_new: bool) -> Result<()>
    where
        I: IntoIterator<Item = &'a ResourceGroup>,
    {
        let caps = &candidate.caps;
        self.check_ranges(caps)?;
        self.check_cpu(candidate)?;
        check_io_wildcard(caps)?;

        if candidate.id == GroupId::ADMIN && caps.concurrency == 0 {
            return Err(Error::InvalidParameterValue(
                "admin_group must have at least one concurrency".to_string(),
            ));
        }

        let devices = caps.io_devices();
        for other in existing {
            if other.id == candidate.id {
                if is_new {
                    return Err(Error::AlreadyExists(other.name.clone()));
                }
                continue;
            }

            let shared = caps.cpuset.intersection(&other.caps.cpuset);
            if !shared.is_empty() {
                return Err(Error::CoreConflict {
                    cores: shared.to_string(),
                    group: other.name.clone(),
                });
            }

            if let Some(device) = other.caps.io_devices().intersection(&devices).next() {
                return Err(Error::DeviceConflict {
                    device: device.to_string(),
                    owner: format!("resource group {}", other.name),
                });
            }
        }

        Ok(())
    }

    /// Per-field bounds
    pub fn check_ranges(&self, caps: &CapabilitySet) -> Result<()> {
        if caps.concurrency > self.bounds.max_connections {
            return Err(Error::InvalidParameterValue(format!(
                "{} ({})",
                LimitType::Concurrency.range_message(),
                self.bounds.max_connections
            )));
        }

        if let CpuHardQuota::Percent(p) = caps.cpu_hard_quota {
            if !(MIN_CPU_HARD_QUOTA..=MAX_CPU_HARD_QUOTA).contains(&p) {
                return Err(Error::InvalidParameterValue(
                    LimitType::CpuHardQuota.range_message(),
                ));
            }
        }

        if !(MIN_CPU_SOFT_PRIORITY..=MAX_CPU_SOFT_PRIORITY).contains(&caps.cpu_soft_priority) {
            return Err(Error::InvalidParameterValue(
                LimitType::CpuSoftPriority.range_message(),
            ));
        }

        if caps.min_cost > MAX_MIN_COST {
            return Err(Error::InvalidParameterValue(LimitType::MinCost.range_message()));
        }

        Ok(())
    }

    fn check_cpu(&self, candidate: &ResourceGroup) -> Result<()> {
        let caps = &candidate.caps;
        if caps.cpu_hard_quota.is_active() && caps.uses_cpuset() {
            return Err(Error::InvalidParameterValue(
                "can't specify both cpu_hard_quota_limit and cpuset".to_string(),
            ));
        }

        if !caps.uses_cpuset() {
            return Ok(());
        }

        if !self.cpuset_enabled {
            return Err(Error::InvalidParameterValue(
                "cgroup is not properly configured to use the cpuset feature".to_string(),
            ));
        }

        if let Some(available) = &self.available_cores {
            let missing = caps.cpuset.difference(available);
            if !missing.is_empty() {
                return Err(Error::InvalidParameterValue(format!(
                    "cpu cores {} are unavailable on the system",
                    missing
                )));
            }
        }

        Ok(())
    }
}

/// `*` covers every disk, so it cannot be combined with other entries
fn check_io_wildcard(caps: &CapabilitySet) -> Result<()> {
    let has_wildcard = caps.io_limit.iter().any(|l| l.volume.is_wildcard());
    if has_wildcard && caps.io_limit.len() > 1 {
        return Err(Error::Syntax(
            "io limit: '*' must be the only entry".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MemoryLimit;
    use crate::iolimit::{
        IoThrottle, PhysicalDeviceId, ThrottleKey, ThrottleValue, VolumeIoLimit, VolumeRef,
    };

    fn validator() -> Validator {
        Validator::new(CapabilityBounds {
            max_connections: 100,
        })
    }

    fn quota_group(id: u32, name: &str, percent: u32) -> ResourceGroup {
        ResourceGroup::new(
            GroupId(id),
            name,
            CapabilitySet {
                cpu_hard_quota: CpuHardQuota::Percent(percent),
                ..Default::default()
            },
        )
    }

    fn cpuset_group(id: u32, name: &str, cores: &str) -> ResourceGroup {
        ResourceGroup::new(
            GroupId(id),
            name,
            CapabilitySet {
                cpuset: cores.parse().unwrap(),
                ..Default::default()
            },
        )
    }

    fn io_limit(volume: VolumeRef, devices: &[(u64, u64)], rbps: Option<u64>) -> VolumeIoLimit {
        let mut throttle = IoThrottle::default();
        if let Some(v) = rbps {
            throttle.set(ThrottleKey::Rbps, ThrottleValue::Limit(v)).unwrap();
        }
        VolumeIoLimit {
            volume,
            devices: devices
                .iter()
                .map(|(a, b)| PhysicalDeviceId::new(*a, *b))
                .collect(),
            throttle,
        }
    }

    #[test]
    fn test_valid_group() {
        let group = quota_group(16384, "rg1", 20);
        assert!(validator().validate(&group, &[], true).is_ok());
    }

    #[test]
    fn test_range_checks() {
        let v = validator();

        let mut caps = CapabilitySet::default();
        caps.concurrency = 101;
        assert!(v.check_ranges(&caps).unwrap_err().to_string().contains("concurrency"));

        let mut caps = CapabilitySet::default();
        caps.cpu_hard_quota = CpuHardQuota::Percent(0);
        assert!(v.check_ranges(&caps).is_err());
        caps.cpu_hard_quota = CpuHardQuota::Percent(101);
        assert!(v.check_ranges(&caps).is_err());
        caps.cpu_hard_quota = CpuHardQuota::Percent(100);
        assert!(v.check_ranges(&caps).is_ok());

        let mut caps = CapabilitySet::default();
        caps.cpu_soft_priority = 0;
        assert!(v.check_ranges(&caps).is_err());
        caps.cpu_soft_priority = 501;
        assert!(v.check_ranges(&caps).is_err());

        let mut caps = CapabilitySet::default();
        caps.min_cost = 501;
        assert!(v.check_ranges(&caps).is_err());

        let mut caps = CapabilitySet::default();
        caps.memory_limit = MemoryLimit::Limit(0);
        assert!(v.check_ranges(&caps).is_ok());
    }

    #[test]
    fn test_quota_and_cpuset_exclusive() {
        let mut group = cpuset_group(16384, "rg1", "1");
        group.caps.cpu_hard_quota = CpuHardQuota::Percent(10);

        let err = validator().validate(&group, &[], true).unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue(_)));
    }

    #[test]
    fn test_core_conflict() {
        let a = cpuset_group(16384, "rg_a", "0,1");
        let b = cpuset_group(16385, "rg_b", "1,2");

        let err = validator().validate(&b, [&a], true).unwrap_err();
        match err {
            Error::CoreConflict { cores, group } => {
                assert_eq!(cores, "1");
                assert_eq!(group, "rg_a");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_own_definition_skipped_on_alter() {
        let old = cpuset_group(16384, "rg_a", "0,1");
        let new = cpuset_group(16384, "rg_a", "1,2");

        assert!(validator().validate(&new, [&old], false).is_ok());
        assert!(matches!(
            validator().validate(&new, [&old], true),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_cpuset_disabled() {
        let group = cpuset_group(16384, "rg1", "1");
        let err = validator()
            .with_cpuset_enabled(false)
            .validate(&group, &[], true)
            .unwrap_err();
        assert!(err.to_string().contains("cpuset"));
    }

    #[test]
    fn test_cpuset_unavailable_cores() {
        let group = cpuset_group(16384, "rg1", "2-5");
        let err = validator()
            .with_available_cores("0-3".parse().unwrap())
            .validate(&group, &[], true)
            .unwrap_err();
        assert!(err.to_string().contains("4-5"));
    }

    #[test]
    fn test_device_conflict() {
        let mut a = quota_group(16384, "rg_a", 10);
        a.caps.io_limit = vec![io_limit(VolumeRef::Named("ts1".into()), &[(8, 0)], Some(10))];

        let mut b = quota_group(16385, "rg_b", 10);
        b.caps.io_limit = vec![io_limit(VolumeRef::All, &[(8, 0), (8, 16)], Some(5))];

        let err = validator().validate(&b, [&a], true).unwrap_err();
        match err {
            Error::DeviceConflict { device, owner } => {
                assert_eq!(device, "8:0");
                assert!(owner.contains("rg_a"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_throttle_does_not_conflict() {
        let mut a = quota_group(16384, "rg_a", 10);
        a.caps.io_limit = vec![io_limit(VolumeRef::Named("ts1".into()), &[(8, 0)], None)];

        let mut b = quota_group(16385, "rg_b", 10);
        b.caps.io_limit = vec![io_limit(VolumeRef::Named("ts1".into()), &[(8, 0)], Some(5))];

        assert!(validator().validate(&b, [&a], true).is_ok());
    }

    #[test]
    fn test_wildcard_must_be_alone() {
        let mut group = quota_group(16384, "rg1", 10);
        group.caps.io_limit = vec![
            io_limit(VolumeRef::All, &[(8, 0)], Some(1)),
            io_limit(VolumeRef::Named("ts1".into()), &[(8, 16)], Some(1)),
        ];

        let err = validator().validate(&group, &[], true).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn test_admin_concurrency_not_zero() {
        let mut admin = quota_group(GroupId::ADMIN.0, "admin_group", 10);
        admin.caps.concurrency = 0;

        assert!(validator().validate(&admin, &[], false).is_err());

        let mut other = quota_group(16384, "rg1", 10);
        other.caps.concurrency = 0;
        assert!(validator().validate(&other, &[], false).is_ok());
    }
}
