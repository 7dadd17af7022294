//! Staged changes applied at the end of a unit of work
//!
//! DDL records what it did as a [`StagedChange`]; nothing touches the OS
//! until the enclosing transaction ends. At that point each change gets
//! exactly one end hook, with the transaction's outcome.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::capability::{CapabilitySet, CpuSet, GroupId, LimitType};
use crate::cgroups::CgroupController;
use crate::error::Result;
use crate::iolimit::PhysicalDeviceId;
use crate::registry::ResourceGroup;
use crate::scheduler::AdmissionScheduler;

/// One alter: a single capability changed from `old_caps` to `new_caps`
#[derive(Debug, Clone, PartialEq)]
pub struct AlterContext {
    pub group: GroupId,
    pub name: String,
    pub limit: LimitType,
    pub old_caps: CapabilitySet,
    pub new_caps: CapabilitySet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    Create(ResourceGroup),
    Alter(AlterContext),
    Drop(ResourceGroup),
}

impl StagedChange {
    pub fn group(&self) -> GroupId {
        match self {
            StagedChange::Create(g) | StagedChange::Drop(g) => g.id,
            StagedChange::Alter(ctx) => ctx.group,
        }
    }
}

/// Changes recorded by one transaction, in order
#[derive(Debug, Default)]
pub struct PendingChanges {
    changes: Vec<StagedChange>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, change: StagedChange) {
        debug!(group = %change.group(), "staged resource group change");
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagedChange> {
        self.changes.iter()
    }

    /// Fire the commit hook of every change; the list is consumed
    pub fn commit(self, applier: &ChangeApplier) -> Result<()> {
        applier.finish(true, self.changes)
    }

    /// Fire the abort hook of every change; the list is consumed
    pub fn abort(self, applier: &ChangeApplier) -> Result<()> {
        applier.finish(false, self.changes)
    }
}

/// Applies staged changes through the controller and notifies the scheduler
///
/// Without a controller only the scheduler is notified; the registry
/// still changes but no cgroup does.
pub struct ChangeApplier {
    controller: Option<Arc<CgroupController>>,
    scheduler: Arc<dyn AdmissionScheduler>,
}

impl ChangeApplier {
    pub fn new(
        controller: Option<Arc<CgroupController>>,
        scheduler: Arc<dyn AdmissionScheduler>,
    ) -> Self {
        Self {
            controller,
            scheduler,
        }
    }

    pub fn controller(&self) -> Option<&Arc<CgroupController>> {
        self.controller.as_ref()
    }

    /// Run one end hook per change, in staging order
    ///
    /// A failing hook does not stop the remaining ones; the first error is
    /// returned once all have run.
    pub fn finish(&self, committed: bool, changes: Vec<StagedChange>) -> Result<()> {
        let mut first_error = None;

        for change in changes {
            let result = match &change {
                StagedChange::Create(group) => self.on_create_end(committed, group),
                StagedChange::Alter(ctx) => self.on_alter_end(committed, ctx),
                StagedChange::Drop(group) => self.on_drop_end(committed, group),
            };

            if let Err(e) = result {
                error!(group = %change.group(), committed, error = %e, "failed to apply resource group change");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub fn on_create_end(&self, committed: bool, group: &ResourceGroup) -> Result<()> {
        if !committed {
            debug!(group = %group.id, "create aborted, nothing to undo");
            return Ok(());
        }

        if let Some(controller) = &self.controller {
            controller.create(group.id)?;
            self.apply_caps(controller, group.id, &group.caps)?;
        }
        info!(group = %group.id, name = %group.name, "resource group created");
        Ok(())
    }

    pub fn on_alter_end(&self, committed: bool, ctx: &AlterContext) -> Result<()> {
        if !committed {
            debug!(group = %ctx.group, limit = %ctx.limit, "alter aborted, nothing to undo");
            return Ok(());
        }

        if let Some(controller) = &self.controller {
            self.replay_alter(controller, ctx)?;
        }
        if ctx.limit == LimitType::Concurrency {
            self.scheduler.wake(ctx.group);
        }

        info!(group = %ctx.group, limit = %ctx.limit, "resource group altered");
        Ok(())
    }

    pub fn on_drop_end(&self, committed: bool, group: &ResourceGroup) -> Result<()> {
        let result = if committed {
            self.destroy(group)
        } else {
            debug!(group = %group.id, "drop aborted, group kept");
            Ok(())
        };

        self.scheduler.wake(group.id);
        result
    }

    fn destroy(&self, group: &ResourceGroup) -> Result<()> {
        if let Some(controller) = &self.controller {
            controller.destroy(group.id, true)?;
            if group.caps.uses_cpuset() {
                release_cores(controller, &group.caps.cpuset)?;
            }
        }

        self.scheduler.on_group_removed(group.id);
        info!(group = %group.id, name = %group.name, "resource group dropped");
        Ok(())
    }

    /// Write every capability of a group, used for new groups and at startup
    pub fn apply_caps(
        &self,
        controller: &CgroupController,
        group: GroupId,
        caps: &CapabilitySet,
    ) -> Result<()> {
        if caps.uses_cpuset() {
            claim_cores(controller, &caps.cpuset)?;
            controller.set_cpuset(group, &caps.cpuset)?;
        }
        controller.set_cpu_quota(group, i64::from(caps.cpu_hard_quota))?;
        controller.set_cpu_weight(group, caps.cpu_soft_priority)?;
        controller.set_io_limits(group, &caps.io_limit)?;
        Ok(())
    }

    /// Bring the OS tree in line with a full set of definitions
    pub fn apply_existing(&self, groups: &[ResourceGroup]) -> Result<()> {
        let Some(controller) = &self.controller else {
            return Ok(());
        };

        for group in groups {
            if controller.state(group.id).is_none() {
                controller.create(group.id)?;
            }
            self.apply_caps(controller, group.id, &group.caps)?;
        }
        Ok(())
    }

    fn replay_alter(&self, controller: &CgroupController, ctx: &AlterContext) -> Result<()> {
        let (old, new) = (&ctx.old_caps, &ctx.new_caps);

        match ctx.limit {
            LimitType::CpuHardQuota => {
                if old.uses_cpuset() {
                    controller.set_cpuset(ctx.group, &new.cpuset)?;
                    release_cores(controller, &old.cpuset)?;
                }
                controller.set_cpu_quota(ctx.group, i64::from(new.cpu_hard_quota))?;
            }
            LimitType::Cpuset => {
                if old.uses_cpuset() {
                    release_cores(controller, &old.cpuset)?;
                }
                claim_cores(controller, &new.cpuset)?;
                controller.set_cpuset(ctx.group, &new.cpuset)?;
                controller.set_cpu_quota(ctx.group, i64::from(new.cpu_hard_quota))?;
                controller.set_cpu_weight(ctx.group, new.cpu_soft_priority)?;
            }
            LimitType::CpuSoftPriority => {
                controller.set_cpu_weight(ctx.group, new.cpu_soft_priority)?;
            }
            LimitType::IoLimit => {
                let removed: BTreeSet<PhysicalDeviceId> = old
                    .io_devices()
                    .difference(&new.io_devices())
                    .copied()
                    .collect();
                controller.clear_io_devices(ctx.group, &removed)?;
                controller.set_io_limits(ctx.group, &new.io_limit)?;
            }
            LimitType::Concurrency | LimitType::MemoryLimit | LimitType::MinCost => {}
        }
        Ok(())
    }
}

/// Take cores away from the default cpuset node
fn claim_cores(controller: &CgroupController, cores: &CpuSet) -> Result<()> {
    let remaining = controller.default_cpuset()?.difference(cores);
    controller.set_default_cpuset(&remaining)?;
    Ok(())
}

/// Give cores back to the default cpuset node
fn release_cores(controller: &CgroupController, cores: &CpuSet) -> Result<()> {
    let restored = controller.default_cpuset()?.union(cores);
    controller.set_default_cpuset(&restored)?;
    Ok(())
}
