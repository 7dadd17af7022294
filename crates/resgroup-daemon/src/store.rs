//! Group registry persisted as a JSON file
//!
//! Writes stay in memory until [`Registry::flush`], which replaces the file
//! through a temporary sibling so a crash never leaves a half-written state.

use chrono::{DateTime, Utc};
use resgroup_core::registry::builtin_groups;
use resgroup_core::{Error, GroupId, Registry, ResourceGroup, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk layout of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// When the file was last flushed
    pub updated_at: DateTime<Utc>,

    pub groups: Vec<ResourceGroup>,
}

#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    groups: BTreeMap<GroupId, ResourceGroup>,
    updated_at: Option<DateTime<Utc>>,
}

impl JsonFileRegistry {
    /// Open the state file, seeding the reserved groups when it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            info!("State file {:?} not found, starting with reserved groups", path);
            return Ok(Self {
                path,
                groups: builtin_groups().into_iter().map(|g| (g.id, g)).collect(),
                updated_at: None,
            });
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Registry(format!("failed to read {:?}: {}", path, e)))?;
        let state: StateFile = serde_json::from_str(&content)
            .map_err(|e| Error::Registry(format!("corrupt state file {:?}: {}", path, e)))?;

        debug!("Loaded {} groups from {:?}", state.groups.len(), path);

        Ok(Self {
            path,
            groups: state.groups.into_iter().map(|g| (g.id, g)).collect(),
            updated_at: Some(state.updated_at),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time of the last flush, if the file was ever written
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Registry for JsonFileRegistry {
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

    fn flush(&mut self) -> Result<()> {
        let state = StateFile {
            updated_at: Utc::now(),
            groups: self.groups.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| Error::Registry(format!("failed to encode state: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Registry(format!("failed to create {:?}: {}", parent, e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| Error::Registry(format!("failed to write {:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Registry(format!("failed to replace {:?}: {}", self.path, e)))?;

        self.updated_at = Some(state.updated_at);
        debug!("Flushed {} groups to {:?}", state.groups.len(), self.path);
        Ok(())
    }
}
