//! Data types for cgroup management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{CgroupError, Result};
use crate::capability::GroupId;

/// Directory name of the node holding cores no group has pinned
pub const DEFAULT_CPUSET_DIR: &str = "1";

/// Controllers enabled for the resource group tree
pub const SUBTREE_CONTROLLERS: &[&str] = &["cpuset", "cpu", "memory", "pids", "io"];

/// Access a required interface file must grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Controller an interface file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Cpu,
    Cpuset,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceFile {
    pub name: &'static str,
    pub access: Access,
    pub component: Component,
}

const fn file(name: &'static str, access: Access, component: Component) -> InterfaceFile {
    InterfaceFile {
        name,
        access,
        component,
    }
}

/// Files a group node must expose before it is usable
pub const REQUIRED_FILES: &[InterfaceFile] = &[
    file("cpu.max", Access::ReadWrite, Component::Cpu),
    file("cpu.pressure", Access::ReadWrite, Component::Cpu),
    file("cpu.weight", Access::ReadWrite, Component::Cpu),
    file("cpu.weight.nice", Access::ReadWrite, Component::Cpu),
    file("cpu.stat", Access::Read, Component::Cpu),
    file("cpuset.cpus", Access::ReadWrite, Component::Cpuset),
    file("cpuset.cpus.partition", Access::ReadWrite, Component::Cpuset),
    file("cpuset.mems", Access::ReadWrite, Component::Cpuset),
    file("cpuset.cpus.effective", Access::Read, Component::Cpuset),
    file("cpuset.mems.effective", Access::Read, Component::Cpuset),
    file("io.max", Access::ReadWrite, Component::Io),
];

/// Required files, leaving out cpuset when it is administratively disabled
pub fn required_files(cpuset_enabled: bool) -> impl Iterator<Item = &'static InterfaceFile> {
    REQUIRED_FILES
        .iter()
        .filter(move |f| cpuset_enabled || f.component != Component::Cpuset)
}

/// Cgroup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgroupConfig {
    /// Mount point of the cgroup v2 hierarchy
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Directory under the mount point holding every resource group
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Allow groups to pin cores
    #[serde(default = "default_true")]
    pub enable_cpuset: bool,

    /// Fraction of host CPU given to the whole resource group tree
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    /// Weight multiplier of the tree relative to its siblings
    #[serde(default = "default_cpu_priority")]
    pub cpu_priority: u32,

    /// Interface file probes before a new group is declared broken
    #[serde(default = "default_retry_budget")]
    pub create_retry_budget: u32,

    /// Sleep between probes
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_base_dir() -> String {
    "resgroup".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cpu_limit() -> f64 {
    0.9
}

fn default_cpu_priority() -> u32 {
    10
}

fn default_retry_budget() -> u32 {
    10
}

fn default_retry_interval_ms() -> u64 {
    1
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            base_dir: default_base_dir(),
            enable_cpuset: true,
            cpu_limit: default_cpu_limit(),
            cpu_priority: default_cpu_priority(),
            create_retry_budget: default_retry_budget(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl CgroupConfig {
    pub fn base_path(&self) -> PathBuf {
        self.mount_point.join(&self.base_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cpu_limit > 0.0 && self.cpu_limit <= 1.0) {
            return Err(CgroupError::InvalidLimit(format!(
                "cpu_limit must be in (0, 1], got {}",
                self.cpu_limit
            )));
        }

        if !(1..=50).contains(&self.cpu_priority) {
            return Err(CgroupError::InvalidLimit(format!(
                "cpu_priority must be in [1, 50], got {}",
                self.cpu_priority
            )));
        }

        if self.create_retry_budget == 0 {
            return Err(CgroupError::InvalidLimit(
                "create_retry_budget must be at least 1".to_string(),
            ));
        }

        if self.base_dir.is_empty() || self.base_dir.contains('/') {
            return Err(CgroupError::InvalidLimit(format!(
                "base_dir must be a single path component, got {:?}",
                self.base_dir
            )));
        }

        Ok(())
    }
}

/// A node of the resource group tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CgroupNode {
    /// Parent of every group
    Base,
    Group(GroupId),
    /// Holds cores not pinned by any group
    DefaultCpuset,
}

impl CgroupNode {
    pub fn path(&self, base: &Path) -> PathBuf {
        match self {
            CgroupNode::Base => base.to_path_buf(),
            CgroupNode::Group(id) => base.join(id.to_string()),
            CgroupNode::DefaultCpuset => base.join(DEFAULT_CPUSET_DIR),
        }
    }
}

/// Lifecycle of a group's OS node; absent groups have no state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Creating,
    Ready,
    Updating,
    Destroying,
}
