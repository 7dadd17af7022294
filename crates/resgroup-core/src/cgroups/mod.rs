//! Cgroup v2 integration module
//!
//! Maps resource group capabilities onto a flat tree of cgroup v2 nodes and
//! reads usage counters back.

pub mod controller;
pub mod error;
pub mod fs;
pub mod types;
pub mod utils;

pub use controller::CgroupController;
pub use error::{CgroupError, Result};
pub use fs::{CgroupFs, MemoryCgroupFs, RealCgroupFs};
pub use types::{
    required_files, Access, CgroupConfig, CgroupNode, Component, GroupState, InterfaceFile,
    DEFAULT_CPUSET_DIR, REQUIRED_FILES,
};
pub use utils::CpuStatValues;
