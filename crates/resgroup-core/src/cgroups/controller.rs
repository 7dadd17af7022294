//! Cgroup v2 driver for resource groups
//!
//! Layout under the mount point:
//!
//! ```text
//! <mount>/<base_dir>/           tree root, capped at cpu_limit of the host
//! <mount>/<base_dir>/1/         default cpuset: cores no group has pinned
//! <mount>/<base_dir>/<group id>/
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use procfs::{CpuInfo, Current};
use tracing::{debug, error, info, warn};

use super::error::{CgroupError, Result};
use super::fs::CgroupFs;
use super::types::{required_files, CgroupConfig, CgroupNode, GroupState, SUBTREE_CONTROLLERS};
use super::utils::{
    convert_cpu_usage, cpu_max_for_percent, host_quota_us, io_max_record, parse_cpu_stat,
    parse_pid_list, parse_single_value, priority_to_weight, CpuStatValues, CPU_PERIOD_US,
};
use crate::capability::{CpuSet, GroupId};
use crate::iolimit::{IoThrottle, PhysicalDeviceId, VolumeIoLimit};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct CgroupController {
    fs: Arc<dyn CgroupFs>,
    config: CgroupConfig,
    ncores: u32,
    states: Mutex<HashMap<GroupId, GroupState>>,
    /// pid -> group it was attached to by this controller
    attached: Mutex<HashMap<u32, GroupId>>,
}

impl CgroupController {
    /// Controller sized to the host's core count
    pub fn new(fs: Arc<dyn CgroupFs>, config: CgroupConfig) -> Result<Self> {
        let cpuinfo = CpuInfo::current()
            .map_err(|e| CgroupError::ParseError(format!("cannot read /proc/cpuinfo: {}", e)))?;
        let ncores = u32::try_from(cpuinfo.num_cores()).unwrap_or(u32::MAX).max(1);
        Ok(Self::with_cores(fs, config, ncores))
    }

    pub fn with_cores(fs: Arc<dyn CgroupFs>, config: CgroupConfig, ncores: u32) -> Self {
        Self {
            fs,
            config,
            ncores: ncores.max(1),
            states: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CgroupConfig {
        &self.config
    }

    pub fn ncores(&self) -> u32 {
        self.ncores
    }

    pub fn path(&self, node: CgroupNode) -> PathBuf {
        node.path(&self.config.base_path())
    }

    fn group_path(&self, group: GroupId) -> PathBuf {
        self.path(CgroupNode::Group(group))
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        debug!(path = %path.display(), content, "writing cgroup file");
        self.fs.write(path, content)
    }

    pub fn state(&self, group: GroupId) -> Option<GroupState> {
        lock(&self.states).get(&group).copied()
    }

    fn set_state(&self, group: GroupId, state: GroupState) {
        lock(&self.states).insert(group, state);
    }

    fn clear_state(&self, group: GroupId) {
        lock(&self.states).remove(&group);
    }

    /// Check that the mount point is a cgroup v2 hierarchy offering every
    /// controller the tree needs
    pub fn probe_system(&self) -> Result<()> {
        let controllers_file = self.config.mount_point.join("cgroup.controllers");
        if !self.fs.exists(&controllers_file) {
            return Err(CgroupError::CgroupV2NotAvailable);
        }

        let content = self.fs.read(&controllers_file)?;
        let available: BTreeSet<&str> = content.split_whitespace().collect();
        for controller in self.tree_controllers() {
            if !available.contains(controller) {
                return Err(CgroupError::MissingController(controller.to_string()));
            }
        }

        Ok(())
    }

    fn tree_controllers(&self) -> impl Iterator<Item = &'static str> + '_ {
        SUBTREE_CONTROLLERS
            .iter()
            .copied()
            .filter(|c| self.config.enable_cpuset || *c != "cpuset")
    }

    /// Build the tree root, the default cpuset node and the reserved groups
    pub fn initialize(&self) -> Result<()> {
        self.probe_system()?;

        let mount = &self.config.mount_point;
        let base = self.path(CgroupNode::Base);
        let controllers = self
            .tree_controllers()
            .map(|c| format!("+{}", c))
            .collect::<Vec<_>>()
            .join(" ");

        self.write(&mount.join("cgroup.subtree_control"), &controllers)?;
        self.fs.create_dir(&base)?;
        self.write(&base.join("cgroup.subtree_control"), &controllers)?;

        let tree_quota = (host_quota_us(self.ncores) as f64 * self.config.cpu_limit) as u64;
        self.write(
            &base.join("cpu.max"),
            &format!("{} {}", tree_quota, CPU_PERIOD_US),
        )?;
        self.write(
            &base.join("cpu.weight"),
            &(100 * u64::from(self.config.cpu_priority)).to_string(),
        )?;

        if self.config.enable_cpuset {
            let cpus = self.fs.read(&mount.join("cpuset.cpus.effective"))?;
            let mems = self.fs.read(&mount.join("cpuset.mems.effective"))?;

            self.write(&base.join("cpuset.cpus"), cpus.trim())?;
            self.write(&base.join("cpuset.mems"), mems.trim())?;

            let default = self.path(CgroupNode::DefaultCpuset);
            self.fs.create_dir(&default)?;
            self.write(&default.join("cpuset.cpus"), cpus.trim())?;
            self.write(&default.join("cpuset.mems"), mems.trim())?;
        }

        for group in [GroupId::DEFAULT, GroupId::ADMIN, GroupId::SYSTEM] {
            self.create(group)?;
        }

        info!(
            base = %base.display(),
            ncores = self.ncores,
            cpuset = self.config.enable_cpuset,
            "cgroup tree initialized"
        );
        Ok(())
    }

    /// Create a group node and wait until its interface files are usable
    ///
    /// Interface files can show up after the directory does, so the
    /// required files are probed up to `create_retry_budget` times.
    pub fn create(&self, group: GroupId) -> Result<()> {
        let path = self.group_path(group);
        self.set_state(group, GroupState::Creating);

        if let Err(e) = self.fs.create_dir(&path) {
            self.clear_state(group);
            return Err(e);
        }

        let budget = self.config.create_retry_budget.max(1);
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        let mut last_error = None;

        for attempt in 1..=budget {
            match self.probe_files(group) {
                Ok(()) => {
                    self.set_state(group, GroupState::Ready);
                    info!(group = %group, attempt, "created resource group cgroup");
                    return Ok(());
                }
                Err(e) => {
                    debug!(group = %group, attempt, error = %e, "cgroup not ready yet");
                    last_error = Some(e);
                    if attempt < budget {
                        thread::sleep(interval);
                    }
                }
            }
        }

        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        error!(
            group = %group,
            attempts = budget,
            detail = %detail,
            "cgroup interface files never became usable"
        );
        self.clear_state(group);

        Err(CgroupError::NotReady {
            path: path.display().to_string(),
            attempts: budget,
            detail,
        })
    }

    fn probe_files(&self, group: GroupId) -> Result<()> {
        let dir = self.group_path(group);
        for file in required_files(self.config.enable_cpuset) {
            self.fs.check_access(&dir.join(file.name), file.access)?;
        }
        Ok(())
    }

    /// Check every required interface file of a group
    ///
    /// With `fatal` a failed check is returned as an error, otherwise it is
    /// logged and reported as `false`.
    pub fn probe(&self, group: GroupId, fatal: bool) -> Result<bool> {
        match self.probe_files(group) {
            Ok(()) => Ok(true),
            Err(e) if fatal => Err(e),
            Err(e) => {
                debug!(group = %group, error = %e, "cgroup probe failed");
                Ok(false)
            }
        }
    }

    fn update<F>(&self, group: GroupId, apply: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = self.group_path(group);
        if !self.fs.exists(&path) {
            return Err(CgroupError::NotFound(path.display().to_string()));
        }

        self.set_state(group, GroupState::Updating);
        let result = apply(&path);
        self.set_state(group, GroupState::Ready);
        result
    }

    /// Limit a group to `percent` of the whole host; `percent <= 0` lifts it
    pub fn set_cpu_quota(&self, group: GroupId, percent: i64) -> Result<()> {
        let content = cpu_max_for_percent(percent, self.ncores);
        self.update(group, |dir| self.write(&dir.join("cpu.max"), &content))
    }

    pub fn set_cpu_weight(&self, group: GroupId, priority: u32) -> Result<()> {
        let weight = priority_to_weight(priority).to_string();
        self.update(group, |dir| self.write(&dir.join("cpu.weight"), &weight))
    }

    pub fn set_cpuset(&self, group: GroupId, cpuset: &CpuSet) -> Result<()> {
        if !self.config.enable_cpuset {
            debug!(group = %group, "cpuset disabled, not pinning cores");
            return Ok(());
        }

        let cpus = cpuset.to_string();
        self.update(group, |dir| self.write(&dir.join("cpuset.cpus"), &cpus))
    }

    /// Cores the system offers to the tree
    pub fn available_cores(&self) -> Result<CpuSet> {
        let content = self
            .fs
            .read(&self.config.mount_point.join("cpuset.cpus.effective"))?;
        parse_cpuset(&content)
    }

    /// Cores currently held by the default cpuset node
    pub fn default_cpuset(&self) -> Result<CpuSet> {
        if !self.config.enable_cpuset {
            return Ok(CpuSet::new());
        }

        let path = self.path(CgroupNode::DefaultCpuset).join("cpuset.cpus");
        parse_cpuset(&self.fs.read(&path)?)
    }

    pub fn set_default_cpuset(&self, cpuset: &CpuSet) -> Result<()> {
        if !self.config.enable_cpuset {
            return Ok(());
        }

        let path = self.path(CgroupNode::DefaultCpuset).join("cpuset.cpus");
        self.write(&path, &cpuset.to_string())
    }

    /// Write one `io.max` record per device of every volume limit
    pub fn set_io_limits(&self, group: GroupId, limits: &[VolumeIoLimit]) -> Result<()> {
        self.update(group, |dir| {
            let io_max = dir.join("io.max");
            for limit in limits {
                for device in &limit.devices {
                    self.write(&io_max, &io_max_record(*device, &limit.throttle))?;
                }
            }
            Ok(())
        })
    }

    /// Reset every throttle of the given devices to `max`
    pub fn clear_io_devices(
        &self,
        group: GroupId,
        devices: &BTreeSet<PhysicalDeviceId>,
    ) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        let unlimited = IoThrottle::default();
        self.update(group, |dir| {
            let io_max = dir.join("io.max");
            for device in devices {
                self.write(&io_max, &io_max_record(*device, &unlimited))?;
            }
            Ok(())
        })
    }

    /// Move a process into a group
    ///
    /// A pid this controller already attached to the same group, and still
    /// listed in its `cgroup.procs`, is left alone. Cached pids that have
    /// left their group are forgotten on every write.
    pub fn attach(&self, group: GroupId, pid: u32) -> Result<()> {
        let mut attached = lock(&self.attached);
        if attached.get(&pid) == Some(&group) {
            if self.processes(group)?.contains(&pid) {
                debug!(group = %group, pid, "process already attached");
                return Ok(());
            }
            attached.remove(&pid);
        }

        let procs = self.group_path(group).join("cgroup.procs");
        self.write(&procs, &pid.to_string())?;
        self.prune_attached(&mut attached);
        attached.insert(pid, group);
        Ok(())
    }

    /// Drop cache entries whose pid is no longer a member of its group
    fn prune_attached(&self, attached: &mut HashMap<u32, GroupId>) {
        let groups: HashSet<GroupId> = attached.values().copied().collect();
        let members: HashMap<GroupId, Vec<u32>> = groups
            .into_iter()
            .map(|g| (g, self.processes(g).unwrap_or_default()))
            .collect();
        attached.retain(|pid, g| members.get(g).is_some_and(|pids| pids.contains(pid)));
    }

    pub fn processes(&self, group: GroupId) -> Result<Vec<u32>> {
        let content = self.fs.read(&self.group_path(group).join("cgroup.procs"))?;
        parse_pid_list(&content)
    }

    /// Remove a group node
    ///
    /// With `migrate`, member processes are moved one by one to the default
    /// group first; a process that cannot be moved (usually because it has
    /// exited) is logged and skipped. Without it, a non-empty group is an
    /// error.
    pub fn destroy(&self, group: GroupId, migrate: bool) -> Result<()> {
        let path = self.group_path(group);
        if !self.fs.exists(&path) {
            warn!(group = %group, "cgroup already absent, nothing to destroy");
            self.clear_state(group);
            return Ok(());
        }

        self.set_state(group, GroupState::Destroying);

        let pids = match self.processes(group) {
            Ok(pids) => pids,
            Err(e) => {
                self.set_state(group, GroupState::Ready);
                return Err(e);
            }
        };

        if !pids.is_empty() {
            if !migrate {
                self.set_state(group, GroupState::Ready);
                return Err(CgroupError::NotEmpty(path.display().to_string()));
            }

            let target = self.group_path(GroupId::DEFAULT).join("cgroup.procs");
            for pid in pids {
                if let Err(e) = self.write(&target, &pid.to_string()) {
                    warn!(group = %group, pid, error = %e, "failed to migrate process, skipping");
                }
            }
        }

        if let Err(e) = self.fs.remove_dir(&path) {
            self.set_state(group, GroupState::Ready);
            return Err(e);
        }

        self.clear_state(group);
        lock(&self.attached).retain(|_, g| *g != group);
        info!(group = %group, "destroyed resource group cgroup");
        Ok(())
    }

    pub fn read_cpu_stat(&self, group: GroupId) -> Result<CpuStatValues> {
        let content = self.fs.read(&self.group_path(group).join("cpu.stat"))?;
        parse_cpu_stat(&content)
    }

    /// Cumulative CPU time of a group, in nanoseconds
    pub fn read_cpu_usage(&self, group: GroupId) -> Result<u64> {
        Ok(self.read_cpu_stat(group)?.usage_usec.saturating_mul(1000))
    }

    /// Current memory usage of a group, in bytes
    pub fn read_memory_usage(&self, group: GroupId) -> Result<u64> {
        let content = self.fs.read(&self.group_path(group).join("memory.current"))?;
        parse_single_value("memory.current", &content)
    }

    /// Percent of the whole host used by a usage delta over a duration
    pub fn convert_cpu_usage(&self, usage_ns: i64, duration_us: i64) -> f64 {
        convert_cpu_usage(usage_ns, duration_us, self.ncores)
    }
}

fn parse_cpuset(content: &str) -> Result<CpuSet> {
    content
        .trim()
        .parse()
        .map_err(|e: crate::error::Error| CgroupError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::fs::MemoryCgroupFs;
    use crate::iolimit::{ThrottleKey, ThrottleValue, VolumeRef};

    const USER_GROUP: GroupId = GroupId(16384);

    fn setup() -> (Arc<MemoryCgroupFs>, CgroupController) {
        let fs = Arc::new(MemoryCgroupFs::new("/cg", "0-3"));
        let config = CgroupConfig {
            mount_point: PathBuf::from("/cg"),
            ..Default::default()
        };
        let controller = CgroupController::with_cores(fs.clone(), config, 4);
        (fs, controller)
    }

    fn ready() -> (Arc<MemoryCgroupFs>, CgroupController) {
        let (fs, controller) = setup();
        controller.initialize().unwrap();
        controller.create(USER_GROUP).unwrap();
        (fs, controller)
    }

    fn group_file(name: &str) -> PathBuf {
        PathBuf::from("/cg/resgroup/16384").join(name)
    }

    #[test]
    fn test_initialize() {
        let (fs, controller) = setup();
        controller.initialize().unwrap();

        assert_eq!(
            fs.file(Path::new("/cg/cgroup.subtree_control")).unwrap(),
            "+cpuset +cpu +memory +pids +io"
        );
        assert_eq!(
            fs.file(Path::new("/cg/resgroup/cpu.max")).unwrap(),
            "360000 100000"
        );
        assert_eq!(fs.file(Path::new("/cg/resgroup/cpu.weight")).unwrap(), "1000");
        assert_eq!(fs.file(Path::new("/cg/resgroup/1/cpuset.cpus")).unwrap(), "0-3");

        for group in [GroupId::DEFAULT, GroupId::ADMIN, GroupId::SYSTEM] {
            assert_eq!(controller.state(group), Some(GroupState::Ready));
        }
        assert_eq!(controller.default_cpuset().unwrap().to_string(), "0-3");
    }

    #[test]
    fn test_initialize_without_cpuset() {
        let fs = Arc::new(MemoryCgroupFs::new("/cg", "0-3"));
        let config = CgroupConfig {
            mount_point: PathBuf::from("/cg"),
            enable_cpuset: false,
            ..Default::default()
        };
        let controller = CgroupController::with_cores(fs.clone(), config, 4);
        controller.initialize().unwrap();

        assert_eq!(
            fs.file(Path::new("/cg/resgroup/cgroup.subtree_control")).unwrap(),
            "+cpu +memory +pids +io"
        );
        assert!(!fs.dir_exists(Path::new("/cg/resgroup/1")));
        assert!(controller.default_cpuset().unwrap().is_empty());
    }

    #[test]
    fn test_probe_system_missing_controller() {
        let (fs, controller) = setup();
        fs.set_file(Path::new("/cg/cgroup.controllers"), "cpu memory pids");

        let err = controller.probe_system().unwrap_err();
        assert!(matches!(err, CgroupError::MissingController(_)));
    }

    #[test]
    fn test_create_waits_for_interface_files() {
        let (fs, controller) = setup();
        controller.initialize().unwrap();
        fs.delay_interface_files(4);

        controller.create(USER_GROUP).unwrap();
        assert_eq!(controller.state(USER_GROUP), Some(GroupState::Ready));
    }

    #[test]
    fn test_create_exhausts_retry_budget() {
        let (fs, controller) = setup();
        controller.initialize().unwrap();
        fs.delay_interface_files(100);

        let err = controller.create(USER_GROUP).unwrap_err();
        match err {
            CgroupError::NotReady { attempts, detail, .. } => {
                assert_eq!(attempts, 10);
                assert!(detail.contains("cpu.max"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(controller.state(USER_GROUP), None);
    }

    #[test]
    fn test_probe_non_fatal() {
        let (fs, controller) = setup();
        controller.initialize().unwrap();
        fs.delay_interface_files(100);
        fs.create_dir(&controller.group_path(USER_GROUP)).unwrap();

        assert!(!controller.probe(USER_GROUP, false).unwrap());
        assert!(controller.probe(USER_GROUP, true).is_err());
        assert!(controller.probe(GroupId::ADMIN, true).unwrap());
    }

    #[test]
    fn test_set_cpu_quota() {
        let (fs, controller) = ready();

        controller.set_cpu_quota(USER_GROUP, 50).unwrap();
        assert_eq!(fs.file(&group_file("cpu.max")).unwrap(), "200000 100000");

        controller.set_cpu_quota(USER_GROUP, -1).unwrap();
        assert_eq!(fs.file(&group_file("cpu.max")).unwrap(), "max 100000");
        assert_eq!(controller.state(USER_GROUP), Some(GroupState::Ready));
    }

    #[test]
    fn test_set_cpu_weight() {
        let (fs, controller) = ready();
        controller.set_cpu_weight(USER_GROUP, 200).unwrap();
        assert_eq!(fs.file(&group_file("cpu.weight")).unwrap(), "2048");
    }

    #[test]
    fn test_update_missing_group() {
        let (_fs, controller) = setup();
        let err = controller.set_cpu_weight(USER_GROUP, 100).unwrap_err();
        assert!(matches!(err, CgroupError::NotFound(_)));
    }

    #[test]
    fn test_set_cpuset() {
        let (fs, controller) = ready();
        let cores: CpuSet = "1-2".parse().unwrap();

        controller.set_cpuset(USER_GROUP, &cores).unwrap();
        assert_eq!(fs.file(&group_file("cpuset.cpus")).unwrap(), "1-2");

        controller
            .set_default_cpuset(&controller.default_cpuset().unwrap().difference(&cores))
            .unwrap();
        assert_eq!(controller.default_cpuset().unwrap().to_string(), "0,3");
    }

    #[test]
    fn test_set_io_limits() {
        let (fs, controller) = ready();
        let mut throttle = IoThrottle::default();
        throttle.set(ThrottleKey::Wbps, ThrottleValue::Limit(2)).unwrap();

        let limits = vec![VolumeIoLimit {
            volume: VolumeRef::All,
            devices: [PhysicalDeviceId::new(8, 0), PhysicalDeviceId::new(8, 16)]
                .into_iter()
                .collect(),
            throttle,
        }];
        controller.set_io_limits(USER_GROUP, &limits).unwrap();

        let writes = fs.writes_to(&group_file("io.max"));
        assert_eq!(
            writes,
            vec![
                "8:0 rbps=max wbps=2097152 riops=max wiops=max".to_string(),
                "8:16 rbps=max wbps=2097152 riops=max wiops=max".to_string(),
            ]
        );

        let cleared: BTreeSet<_> = [PhysicalDeviceId::new(8, 16)].into_iter().collect();
        controller.clear_io_devices(USER_GROUP, &cleared).unwrap();
        let content = fs.file(&group_file("io.max")).unwrap();
        assert!(content.contains("8:16 rbps=max wbps=max riops=max wiops=max"));
        assert!(content.contains("8:0 rbps=max wbps=2097152"));
    }

    #[test]
    fn test_attach_is_idempotent() {
        let (fs, controller) = ready();
        let procs = group_file("cgroup.procs");

        controller.attach(USER_GROUP, 4242).unwrap();
        controller.attach(USER_GROUP, 4242).unwrap();
        assert_eq!(fs.writes_to(&procs).len(), 1);

        controller.attach(GroupId::ADMIN, 4242).unwrap();
        controller.attach(USER_GROUP, 4242).unwrap();
        assert_eq!(fs.writes_to(&procs).len(), 2);
        assert_eq!(controller.processes(USER_GROUP).unwrap(), vec![4242]);
    }

    #[test]
    fn test_attach_after_pid_reuse() {
        let (fs, controller) = ready();
        let procs = group_file("cgroup.procs");
        let default_dir = controller.group_path(GroupId::DEFAULT);

        controller.attach(USER_GROUP, 4242).unwrap();
        fs.exit_process(4242);
        // the kernel hands the pid to a new process in the default group
        fs.add_process(&default_dir, 4242);

        controller.attach(USER_GROUP, 4242).unwrap();
        assert_eq!(fs.writes_to(&procs).len(), 2);
        assert_eq!(controller.processes(USER_GROUP).unwrap(), vec![4242]);
    }

    #[test]
    fn test_attach_forgets_departed_pids() {
        let (fs, controller) = ready();
        let default_dir = controller.group_path(GroupId::DEFAULT);

        controller.attach(USER_GROUP, 500).unwrap();
        fs.add_process(&default_dir, 500);
        controller.attach(USER_GROUP, 501).unwrap();

        let attached = lock(&controller.attached);
        assert!(!attached.contains_key(&500));
        assert_eq!(attached.get(&501), Some(&USER_GROUP));
    }

    #[test]
    fn test_destroy_migrates_and_skips_exited() {
        let (fs, controller) = ready();
        let dir = controller.group_path(USER_GROUP);
        for pid in [101, 102, 103] {
            fs.add_process(&dir, pid);
        }
        fs.exit_process(102);

        controller.destroy(USER_GROUP, true).unwrap();

        assert!(!fs.dir_exists(&dir));
        assert_eq!(controller.state(USER_GROUP), None);
        assert_eq!(controller.processes(GroupId::DEFAULT).unwrap(), vec![101, 103]);
    }

    #[test]
    fn test_destroy_without_migration_fails_when_busy() {
        let (fs, controller) = ready();
        let dir = controller.group_path(USER_GROUP);
        fs.add_process(&dir, 55);

        let err = controller.destroy(USER_GROUP, false).unwrap_err();
        assert!(matches!(err, CgroupError::NotEmpty(_)));
        assert!(fs.dir_exists(&dir));
        assert_eq!(controller.state(USER_GROUP), Some(GroupState::Ready));
    }

    #[test]
    fn test_destroy_absent_group() {
        let (_fs, controller) = setup();
        assert!(controller.destroy(USER_GROUP, true).is_ok());
    }

    #[test]
    fn test_read_usage() {
        let (fs, controller) = ready();
        fs.set_file(&group_file("cpu.stat"), "usage_usec 1500\nnr_periods 10\nnr_throttled 5");
        fs.set_file(&group_file("memory.current"), "8192\n");

        assert_eq!(controller.read_cpu_usage(USER_GROUP).unwrap(), 1_500_000);
        assert_eq!(controller.read_memory_usage(USER_GROUP).unwrap(), 8192);
        assert_eq!(
            controller.read_cpu_stat(USER_GROUP).unwrap().throttle_percentage(),
            50.0
        );
        assert_eq!(controller.convert_cpu_usage(4_000_000_000, 1_000_000), 100.0);
    }

    #[test]
    fn test_available_cores() {
        let (_fs, controller) = setup();
        assert_eq!(controller.available_cores().unwrap().len(), 4);
    }
}
