//! Durable registry of resource group definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capability::{
    CapabilitySet, CpuHardQuota, GroupId, ADMIN_GROUP_NAME, DEFAULT_GROUP_NAME,
};
use crate::error::Result;

/// A named group and its capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: GroupId,
    pub name: String,
    pub caps: CapabilitySet,
}

impl ResourceGroup {
    pub fn new(id: GroupId, name: impl Into<String>, caps: CapabilitySet) -> Self {
        Self {
            id,
            name: name.into(),
            caps,
        }
    }
}

/// The two reserved groups every registry starts with
pub fn builtin_groups() -> Vec<ResourceGroup> {
    vec![
        ResourceGroup::new(
            GroupId::DEFAULT,
            DEFAULT_GROUP_NAME,
            CapabilitySet {
                concurrency: 20,
                cpu_hard_quota: CpuHardQuota::Percent(20),
                ..Default::default()
            },
        ),
        ResourceGroup::new(
            GroupId::ADMIN,
            ADMIN_GROUP_NAME,
            CapabilitySet {
                concurrency: 10,
                cpu_hard_quota: CpuHardQuota::Percent(10),
                ..Default::default()
            },
        ),
    ]
}

/// Key-value store of group definitions keyed by [`GroupId`]
///
/// Writes become durable at [`Registry::flush`]; callers restore earlier
/// values themselves when a unit of work is abandoned.
pub trait Registry: Send {
    fn get(&self, id: GroupId) -> Result<Option<ResourceGroup>>;

    fn put(&mut self, group: ResourceGroup) -> Result<()>;

    fn delete(&mut self, id: GroupId) -> Result<Option<ResourceGroup>>;

    fn list_all(&self) -> Result<Vec<ResourceGroup>>;

    fn get_by_name(&self, name: &str) -> Result<Option<ResourceGroup>> {
        Ok(self.list_all()?.into_iter().find(|g| g.name == name))
    }

    /// Smallest unused identifier for a user group
    fn next_id(&self) -> Result<GroupId> {
        let next = self
            .list_all()?
            .iter()
            .map(|g| g.id.0.saturating_add(1))
            .fold(GroupId::FIRST_USER.0, u32::max);
        Ok(GroupId(next))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Registry kept in memory only
#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    groups: BTreeMap<GroupId, ResourceGroup>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Registry holding the reserved groups
    pub fn new() -> Self {
        Self::from_groups(builtin_groups())
    }

    pub fn from_groups(groups: impl IntoIterator<Item = ResourceGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Registry for InMemoryRegistry {
    fn get(&self, id: GroupId) -> Result<Option<ResourceGroup>> {
        Ok(self.groups.get(&id).cloned())
    }

    fn put(&mut self, group: ResourceGroup) -> Result<()> {
        self.groups.insert(group.id, group);
        Ok(())
    }

    fn delete(&mut self, id: GroupId) -> Result<Option<ResourceGroup>> {
        Ok(self.groups.remove(&id))
    }

    fn list_all(&self) -> Result<Vec<ResourceGroup>> {
        Ok(self.groups.values().cloned().collect())
    }
}
