//! Administrative command surface: create, alter and drop resource groups
//!
//! A [`Transaction`] holds the registry lock from [`ResourceGroupManager::begin`]
//! until it commits or aborts, so overlap checks always see every
//! definition made before them. Registry writes happen immediately and are
//! undone on abort; cgroup changes are staged and applied only after the
//! registry has been flushed.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::capability::{CapabilitySet, CapabilityValue, GroupId, LimitType, RESERVED_NAME};
use crate::cgroups::CgroupError;
use crate::error::{Error, Result};
use crate::iolimit::{parse_io_limit, DeviceResolver, VolumeCatalog};
use crate::registry::{Registry, ResourceGroup};
use crate::validator::Validator;
use crate::xact::{AlterContext, ChangeApplier, PendingChanges, StagedChange};

pub struct ResourceGroupManager<R: Registry> {
    registry: Mutex<R>,
    applier: ChangeApplier,
    validator: Validator,
    volumes: Arc<dyn VolumeCatalog>,
    resolver: Arc<dyn DeviceResolver>,
    max_groups: usize,
}

impl<R: Registry> ResourceGroupManager<R> {
    pub fn new(
        registry: R,
        applier: ChangeApplier,
        validator: Validator,
        volumes: Arc<dyn VolumeCatalog>,
        resolver: Arc<dyn DeviceResolver>,
        max_groups: usize,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            applier,
            validator,
            volumes,
            resolver,
            max_groups,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, R>> {
        self.registry
            .lock()
            .map_err(|_| Error::Registry("registry lock poisoned".to_string()))
    }

    /// Start a unit of work; blocks while another one is open
    ///
    /// The transaction holds the registry lock until it commits, aborts or
    /// drops. Calling [`group`](Self::group), [`groups`](Self::groups) or
    /// [`attach_process`](Self::attach_process) from the same thread in that
    /// window deadlocks; read through [`Transaction::group`] instead.
    pub fn begin(&self) -> Result<Transaction<'_, R>> {
        Ok(Transaction {
            manager: self,
            registry: self.lock()?,
            pending: PendingChanges::new(),
            undo: Vec::new(),
            finished: false,
        })
    }

    pub fn groups(&self) -> Result<Vec<ResourceGroup>> {
        self.lock()?.list_all()
    }

    pub fn group(&self, name: &str) -> Result<ResourceGroup> {
        self.lock()?
            .get_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Create every registered group's cgroup and write its limits
    pub fn apply_all(&self) -> Result<()> {
        let groups = self.groups()?;
        self.applier.apply_existing(&groups)
    }

    /// Move a process into the named group
    pub fn attach_process(&self, name: &str, pid: u32) -> Result<()> {
        let group = self.group(name)?;
        let controller = self
            .applier
            .controller()
            .ok_or(Error::Controller(CgroupError::CgroupV2NotAvailable))?;
        controller.attach(group.id, pid)?;
        Ok(())
    }

    /// Parse one `(option, value)` pair
    pub fn parse_option(&self, option: &str, value: &str) -> Result<CapabilityValue> {
        let limit = LimitType::from_option_name(option).ok_or_else(|| {
            Error::InvalidParameterValue(format!(
                "option \"{}\" not recognized",
                option
            ))
        })?;

        CapabilityValue::parse(limit, value, |text| {
            parse_io_limit(text, self.volumes.as_ref(), self.resolver.as_ref())
        })
    }

    /// Capabilities of a new group from its CREATE options
    pub fn parse_create_options(&self, options: &[(&str, &str)]) -> Result<CapabilitySet> {
        let values = options
            .iter()
            .map(|(option, value)| self.parse_option(option, value))
            .collect::<Result<Vec<_>>>()?;
        CapabilitySet::from_options(values)
    }
}

enum Undo {
    Remove(GroupId),
    Restore(ResourceGroup),
}

/// An open unit of work over the group registry
///
/// Dropping it without calling [`Transaction::commit`] aborts it.
pub struct Transaction<'a, R: Registry> {
    manager: &'a ResourceGroupManager<R>,
    registry: MutexGuard<'a, R>,
    pending: PendingChanges,
    undo: Vec<Undo>,
    finished: bool,
}

impl<'a, R: Registry> Transaction<'a, R> {
    pub fn create_group(&mut self, name: &str, options: &[(&str, &str)]) -> Result<GroupId> {
        if name == RESERVED_NAME {
            return Err(Error::InvalidParameterValue(format!(
                "resource group name \"{}\" is reserved",
                RESERVED_NAME
            )));
        }
        if self.registry.get_by_name(name)?.is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let existing = self.registry.list_all()?;
        if existing.len() >= self.manager.max_groups {
            return Err(Error::TooManyGroups(self.manager.max_groups));
        }

        let caps = self.manager.parse_create_options(options)?;
        let group = ResourceGroup::new(self.registry.next_id()?, name, caps);
        self.manager.validator.validate(&group, &existing, true)?;

        self.registry.put(group.clone())?;
        self.undo.push(Undo::Remove(group.id));
        info!(group = %group.id, name, "staged resource group creation");

        let id = group.id;
        self.pending.stage(StagedChange::Create(group));
        Ok(id)
    }

    /// Change exactly one capability of a group
    pub fn alter_group(&mut self, name: &str, option: &str, value: &str) -> Result<()> {
        let group = self
            .registry
            .get_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let parsed = self.manager.parse_option(option, value)?;
        let limit = parsed.limit_type();
        let altered = ResourceGroup::new(group.id, name, group.caps.with_value(parsed));

        let existing = self.registry.list_all()?;
        self.manager.validator.validate(&altered, &existing, false)?;

        self.registry.put(altered.clone())?;
        info!(group = %group.id, name, limit = %limit, "staged resource group alter");

        self.pending.stage(StagedChange::Alter(AlterContext {
            group: group.id,
            name: name.to_string(),
            limit,
            old_caps: group.caps.clone(),
            new_caps: altered.caps,
        }));
        self.undo.push(Undo::Restore(group));
        Ok(())
    }

    pub fn drop_group(&mut self, name: &str) -> Result<()> {
        let group = self
            .registry
            .get_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if group.id.is_reserved() {
            return Err(Error::Reserved(name.to_string()));
        }

        self.registry.delete(group.id)?;
        info!(group = %group.id, name, "staged resource group drop");

        self.pending.stage(StagedChange::Drop(group.clone()));
        self.undo.push(Undo::Restore(group));
        Ok(())
    }

    /// Look up a group as this transaction currently sees it
    pub fn group(&self, name: &str) -> Result<ResourceGroup> {
        self.registry
            .get_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn groups(&self) -> Result<Vec<ResourceGroup>> {
        self.registry.list_all()
    }

    /// Staged changes so far
    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    /// Make the registry durable, then apply every staged change
    ///
    /// If the registry cannot be flushed the transaction aborts instead.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;

        if let Err(e) = self.registry.flush() {
            warn!(error = %e, "registry flush failed, aborting");
            self.rollback();
            if let Err(abort_err) = std::mem::take(&mut self.pending).abort(&self.manager.applier) {
                warn!(error = %abort_err, "abort hooks failed after flush error");
            }
            return Err(e);
        }

        std::mem::take(&mut self.pending).commit(&self.manager.applier)
    }

    /// Undo registry writes and discard staged changes
    pub fn abort(mut self) -> Result<()> {
        self.abort_in_place()
    }

    fn abort_in_place(&mut self) -> Result<()> {
        self.finished = true;
        self.rollback();
        std::mem::take(&mut self.pending).abort(&self.manager.applier)
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            let result = match entry {
                Undo::Remove(id) => self.registry.delete(id).map(|_| ()),
                Undo::Restore(group) => self.registry.put(group),
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to undo registry change");
            }
        }
    }
}

impl<R: Registry> Drop for Transaction<'_, R> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.abort_in_place() {
                warn!(error = %e, "abort of unfinished transaction failed");
            }
        }
    }
}
