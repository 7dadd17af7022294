//! Periodic per-group CPU and memory readback

use chrono::{DateTime, Utc};
use resgroup_core::{CgroupController, GroupId, ResourceGroup};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Usage of one group over the last sampling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUsage {
    pub id: GroupId,
    pub name: String,

    /// Percent of the whole host; `None` on the first sample of a group
    pub cpu_percent: Option<f64>,

    pub memory_bytes: u64,

    /// Share of enforcement periods the group spent throttled
    pub throttled_percent: f64,
}

/// One round of readings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub timestamp: DateTime<Utc>,
    pub groups: Vec<GroupUsage>,
}

impl UsageSnapshot {
    /// Sum of every group's CPU share
    pub fn total_cpu_percent(&self) -> f64 {
        self.groups.iter().filter_map(|g| g.cpu_percent).sum()
    }
}

pub struct UsageSampler {
    controller: Arc<CgroupController>,
    previous: HashMap<GroupId, (u64, Instant)>,
}

impl UsageSampler {
    pub fn new(controller: Arc<CgroupController>) -> Self {
        Self {
            controller,
            previous: HashMap::new(),
        }
    }

    pub fn sample(&mut self, groups: &[ResourceGroup]) -> UsageSnapshot {
        self.sample_at(groups, Instant::now())
    }

    /// Read every group's counters, computing CPU share against the
    /// previous reading; groups that cannot be read are skipped
    pub fn sample_at(&mut self, groups: &[ResourceGroup], now: Instant) -> UsageSnapshot {
        let mut usages = Vec::with_capacity(groups.len());

        for group in groups {
            let stat = match self.controller.read_cpu_stat(group.id) {
                Ok(stat) => stat,
                Err(e) => {
                    warn!("Failed to read cpu.stat of {}: {}", group.name, e);
                    continue;
                }
            };
            let memory_bytes = match self.controller.read_memory_usage(group.id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read memory usage of {}: {}", group.name, e);
                    0
                }
            };

            let usage_ns = stat.usage_usec.saturating_mul(1000);
            let cpu_percent = self
                .previous
                .insert(group.id, (usage_ns, now))
                .and_then(|(prev_ns, prev_at)| {
                    let duration_us = now.saturating_duration_since(prev_at).as_micros() as i64;
                    if duration_us == 0 {
                        return None;
                    }
                    let delta = usage_ns.saturating_sub(prev_ns) as i64;
                    Some(self.controller.convert_cpu_usage(delta, duration_us))
                });

            usages.push(GroupUsage {
                id: group.id,
                name: group.name.clone(),
                cpu_percent,
                memory_bytes,
                throttled_percent: stat.throttle_percentage(),
            });
        }

        let live: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        self.previous.retain(|id, _| live.contains(id));

        UsageSnapshot {
            timestamp: Utc::now(),
            groups: usages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resgroup_core::registry::builtin_groups;
    use resgroup_core::{CgroupConfig, MemoryCgroupFs};
    use std::path::PathBuf;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryCgroupFs>, Arc<CgroupController>) {
        let fs = Arc::new(MemoryCgroupFs::new("/cg", "0-7"));
        let config = CgroupConfig {
            mount_point: PathBuf::from("/cg"),
            ..Default::default()
        };
        let controller = Arc::new(CgroupController::with_cores(fs.clone(), config, 8));
        controller.initialize().unwrap();
        (fs, controller)
    }

    fn set_usage(fs: &MemoryCgroupFs, id: GroupId, usage_usec: u64) {
        let stat = format!(
            "usage_usec {}\nuser_usec 0\nsystem_usec 0\nnr_periods 10\nnr_throttled 5\nthrottled_usec 0",
            usage_usec
        );
        fs.set_file(&PathBuf::from(format!("/cg/resgroup/{}/cpu.stat", id)), &stat);
    }

    #[test]
    fn test_first_sample_has_no_cpu_share() {
        let (fs, controller) = setup();
        set_usage(&fs, GroupId::DEFAULT, 1_000_000);

        let mut sampler = UsageSampler::new(controller);
        let snapshot = sampler.sample(&builtin_groups());

        assert_eq!(snapshot.groups.len(), 2);
        assert!(snapshot.groups[0].cpu_percent.is_none());
        assert_eq!(snapshot.groups[0].throttled_percent, 50.0);
        assert_eq!(snapshot.total_cpu_percent(), 0.0);
    }

    #[test]
    fn test_cpu_share_between_samples() {
        let (fs, controller) = setup();
        let groups = builtin_groups();
        let start = Instant::now();

        let mut sampler = UsageSampler::new(controller);
        set_usage(&fs, GroupId::DEFAULT, 0);
        sampler.sample_at(&groups, start);

        // two cores busy for one second on an eight core host
        set_usage(&fs, GroupId::DEFAULT, 2_000_000);
        fs.set_file(
            &PathBuf::from(format!("/cg/resgroup/{}/memory.current", GroupId::DEFAULT)),
            "4096",
        );
        let snapshot = sampler.sample_at(&groups, start + Duration::from_secs(1));

        let default = &snapshot.groups[0];
        assert_eq!(default.id, GroupId::DEFAULT);
        assert!((default.cpu_percent.unwrap() - 25.0).abs() < 1e-9);
        assert_eq!(default.memory_bytes, 4096);
        assert_eq!(snapshot.groups[1].cpu_percent, Some(0.0));
    }

    #[test]
    fn test_unreadable_group_is_skipped() {
        let (_fs, controller) = setup();
        let mut groups = builtin_groups();
        groups.push(ResourceGroup::new(GroupId(16384), "gone", Default::default()));

        let mut sampler = UsageSampler::new(controller);
        let snapshot = sampler.sample(&groups);

        assert_eq!(snapshot.groups.len(), 2);
        assert!(snapshot.groups.iter().all(|g| g.name != "gone"));
    }
}
