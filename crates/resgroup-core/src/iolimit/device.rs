//! Resolve a storage location to the physical disk it lives on
//!
//! location -> mount point (longest prefix over the mount table)
//! -> mount source block device -> parent disk when it is a partition.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::stat::{major, minor, stat, SFlag};
use procfs::process::Process;
use tracing::debug;

use super::types::PhysicalDeviceId;
use crate::error::{Error, Result};

const DEFAULT_SYSFS_ROOT: &str = "/sys";

pub trait DeviceResolver: Send + Sync {
    fn resolve(&self, location: &Path) -> Result<PhysicalDeviceId>;
}

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: PathBuf,
    pub mount_point: PathBuf,
}

/// Mount entry whose mount point is the longest prefix of `path`
pub fn find_mount<'a>(path: &Path, mounts: &'a [MountEntry]) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
}

/// Current mount table of this process
pub fn read_mounts() -> Result<Vec<MountEntry>> {
    let process = Process::myself()
        .map_err(|e| Error::Io(format!("cannot open /proc/self: {}", e)))?;
    let mounts = process
        .mountinfo()
        .map_err(|e| Error::Io(format!("cannot read mount table: {}", e)))?;

    Ok(mounts
        .into_iter()
        .filter_map(|info| {
            info.mount_source.map(|source| MountEntry {
                source: PathBuf::from(source),
                mount_point: info.mount_point,
            })
        })
        .collect())
}

/// Parent disk of `device` if it is a partition, else `device` itself
///
/// Partitions carry a `start` attribute under `/sys/dev/block/<maj:min>`;
/// the disk is the parent directory of the canonical partition path.
pub fn disk_of(sysfs_root: &Path, device: PhysicalDeviceId) -> Result<PhysicalDeviceId> {
    let node = sysfs_root.join("dev/block").join(device.to_string());
    if !node.join("start").exists() {
        return Ok(device);
    }

    let canonical = fs::canonicalize(&node)
        .map_err(|e| Error::Io(format!("cannot resolve {}: {}", node.display(), e)))?;
    let parent = canonical.parent().ok_or_else(|| {
        Error::Io(format!("partition {} has no parent disk", device))
    })?;

    let dev_file = parent.join("dev");
    let content = fs::read_to_string(&dev_file)
        .map_err(|e| Error::Io(format!("cannot read {}: {}", dev_file.display(), e)))?;
    let disk: PhysicalDeviceId = content.parse()?;

    debug!(partition = %device, disk = %disk, "resolved partition to disk");
    Ok(disk)
}

/// Resolver backed by the live mount table and sysfs
#[derive(Debug, Clone)]
pub struct SysfsDeviceResolver {
    sysfs_root: PathBuf,
}

impl Default for SysfsDeviceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsDeviceResolver {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    fn block_device(source: &Path) -> Result<PhysicalDeviceId> {
        let st = stat(source)
            .map_err(|e| Error::Io(format!("cannot stat {}: {}", source.display(), e)))?;

        let kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
        if kind != SFlag::S_IFBLK {
            return Err(Error::Io(format!(
                "{} is not a block device",
                source.display()
            )));
        }

        Ok(PhysicalDeviceId::new(major(st.st_rdev), minor(st.st_rdev)))
    }
}

impl DeviceResolver for SysfsDeviceResolver {
    fn resolve(&self, location: &Path) -> Result<PhysicalDeviceId> {
        let path = fs::canonicalize(location)
            .map_err(|e| Error::Io(format!("cannot resolve {}: {}", location.display(), e)))?;

        let mounts = read_mounts()?;
        let mount = find_mount(&path, &mounts).ok_or_else(|| {
            Error::Io(format!("no mount point found for {}", path.display()))
        })?;

        let device = Self::block_device(&mount.source)?;
        disk_of(&self.sysfs_root, device)
    }
}

/// Fixed location to device map
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceResolver {
    devices: HashMap<PathBuf, PhysicalDeviceId>,
}

impl StaticDeviceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<PathBuf>, device: PhysicalDeviceId) {
        self.devices.insert(location.into(), device);
    }
}

impl DeviceResolver for StaticDeviceResolver {
    fn resolve(&self, location: &Path) -> Result<PhysicalDeviceId> {
        self.devices
            .get(location)
            .copied()
            .ok_or_else(|| Error::Io(format!("cannot resolve device of {}", location.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn mount(source: &str, point: &str) -> MountEntry {
        MountEntry {
            source: PathBuf::from(source),
            mount_point: PathBuf::from(point),
        }
    }

    #[test]
    fn test_find_mount_longest_prefix() {
        let mounts = vec![
            mount("/dev/sda2", "/"),
            mount("/dev/sdb1", "/data"),
            mount("/dev/nvme0n1p1", "/data/fast"),
        ];

        let m = find_mount(Path::new("/data/fast/ts1"), &mounts).unwrap();
        assert_eq!(m.source, PathBuf::from("/dev/nvme0n1p1"));

        let m = find_mount(Path::new("/data/slow"), &mounts).unwrap();
        assert_eq!(m.source, PathBuf::from("/dev/sdb1"));

        let m = find_mount(Path::new("/home"), &mounts).unwrap();
        assert_eq!(m.source, PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn test_find_mount_component_boundary() {
        let mounts = vec![mount("/dev/sda2", "/"), mount("/dev/sdb1", "/data")];

        // "/database" is not under "/data"
        let m = find_mount(Path::new("/database"), &mounts).unwrap();
        assert_eq!(m.source, PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn test_find_mount_none() {
        let mounts = vec![mount("/dev/sdb1", "/data")];
        assert!(find_mount(Path::new("/home"), &mounts).is_none());
    }

    fn sysfs_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("devices/sda/sda1")).unwrap();
        fs::write(root.join("devices/sda/dev"), "8:0\n").unwrap();
        fs::write(root.join("devices/sda/sda1/dev"), "8:1\n").unwrap();
        fs::write(root.join("devices/sda/sda1/start"), "2048\n").unwrap();

        fs::create_dir_all(root.join("dev/block")).unwrap();
        symlink(root.join("devices/sda"), root.join("dev/block/8:0")).unwrap();
        symlink(root.join("devices/sda/sda1"), root.join("dev/block/8:1")).unwrap();
        dir
    }

    #[test]
    fn test_disk_of_partition() {
        let dir = sysfs_tree();
        let disk = disk_of(dir.path(), PhysicalDeviceId::new(8, 1)).unwrap();
        assert_eq!(disk, PhysicalDeviceId::new(8, 0));
    }

    #[test]
    fn test_disk_of_whole_disk() {
        let dir = sysfs_tree();
        let disk = disk_of(dir.path(), PhysicalDeviceId::new(8, 0)).unwrap();
        assert_eq!(disk, PhysicalDeviceId::new(8, 0));
    }

    #[test]
    fn test_disk_of_unknown_device() {
        let dir = sysfs_tree();
        let disk = disk_of(dir.path(), PhysicalDeviceId::new(253, 3)).unwrap();
        assert_eq!(disk, PhysicalDeviceId::new(253, 3));
    }

    #[test]
    fn test_sysfs_resolver_missing_path() {
        let resolver = SysfsDeviceResolver::default();
        let err = resolver
            .resolve(Path::new("/definitely/not/a/real/path"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_static_resolver() {
        let mut resolver = StaticDeviceResolver::new();
        resolver.insert("/data", PhysicalDeviceId::new(8, 16));

        assert_eq!(
            resolver.resolve(Path::new("/data")).unwrap(),
            PhysicalDeviceId::new(8, 16)
        );
        assert!(resolver.resolve(Path::new("/other")).is_err());
    }
}
