//! Resource group controller
//!
//! Maps administrator-declared CPU, memory, I/O and concurrency limits of
//! named resource groups onto Linux cgroup v2, with validation in front and
//! commit-time application behind.

pub mod capability;
pub mod cgroups;
pub mod error;
pub mod iolimit;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod validator;
pub mod xact;

pub use capability::{
    CapabilityBounds, CapabilitySet, CapabilityValue, CpuHardQuota, CpuSet, GroupId, LimitType,
    MemoryLimit,
};
pub use cgroups::{CgroupConfig, CgroupController, CgroupError, RealCgroupFs};
#[doc(hidden)]
pub use cgroups::MemoryCgroupFs;
pub use error::{Error, Result};
pub use iolimit::{
    parse_io_limit, parse_io_limit_syntax, DeviceResolver, PhysicalDeviceId, StaticVolumeCatalog,
    SysfsDeviceResolver, VolumeCatalog, VolumeIoLimit,
};
pub use manager::{ResourceGroupManager, Transaction};
pub use registry::{InMemoryRegistry, Registry, ResourceGroup};
pub use scheduler::{AdmissionScheduler, NoopScheduler};
pub use validator::Validator;
pub use xact::{ChangeApplier, PendingChanges, StagedChange};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
