//! Wiring of configuration, registry and cgroup controller

use crate::config::Config;
use crate::store::JsonFileRegistry;
use resgroup_core::{
    ChangeApplier, CgroupController, NoopScheduler, RealCgroupFs, ResourceGroupManager, Result,
    SysfsDeviceResolver, Validator,
};
use std::sync::Arc;
use tracing::{info, warn};

pub type GroupManager = ResourceGroupManager<JsonFileRegistry>;

/// Controller over the host's cgroup v2 mount
pub fn open_controller(config: &Config) -> Result<Arc<CgroupController>> {
    let controller = CgroupController::new(Arc::new(RealCgroupFs), config.cgroup.clone())?;
    controller.probe_system()?;
    info!(
        "cgroup v2 tree at {:?}, {} cores",
        controller.config().base_path(),
        controller.ncores()
    );
    Ok(Arc::new(controller))
}

/// Manager over the configured state file
///
/// Without a controller, commits only update the registry.
pub fn open_manager(
    config: &Config,
    controller: Option<Arc<CgroupController>>,
) -> Result<GroupManager> {
    let registry = JsonFileRegistry::open(&config.storage.state_file)?;

    let mut validator =
        Validator::new(config.bounds()).with_cpuset_enabled(config.cgroup.enable_cpuset);
    if let Some(controller) = &controller {
        match controller.available_cores() {
            Ok(cores) => validator = validator.with_available_cores(cores),
            Err(e) => warn!("Available cores unknown, cpuset range not checked: {}", e),
        }
    }

    let applier = ChangeApplier::new(controller, Arc::new(NoopScheduler));

    Ok(ResourceGroupManager::new(
        registry,
        applier,
        validator,
        Arc::new(config.volume_catalog()),
        Arc::new(SysfsDeviceResolver::default()),
        config.limits.max_groups,
    ))
}
