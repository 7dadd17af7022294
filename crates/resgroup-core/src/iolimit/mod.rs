//! Per-volume I/O limits: DSL parsing and device resolution

pub mod device;
pub mod parser;
pub mod types;

pub use device::{
    disk_of, find_mount, read_mounts, DeviceResolver, MountEntry, StaticDeviceResolver,
    SysfsDeviceResolver,
};
pub use parser::{
    parse_io_limit, parse_io_limit_syntax, IoLimitEntry, StaticVolumeCatalog, VolumeCatalog,
    NO_IO_LIMIT,
};
pub use types::{
    format_io_limit, IoThrottle, PhysicalDeviceId, ThrottleKey, ThrottleValue, VolumeIoLimit,
    VolumeRef,
};
