//! Filesystem access behind the controller
//!
//! [`RealCgroupFs`] talks to the mounted cgroup v2 tree. [`MemoryCgroupFs`]
//! models the parts of cgroupfs semantics the controller depends on, so the
//! controller can be exercised without root.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};

use super::error::{CgroupError, Result};
use super::types::Access;
use super::utils::{map_io_error, read_cgroup_file, write_cgroup_file};

pub trait CgroupFs: Send + Sync {
    /// Create a cgroup directory; an existing directory is not an error
    fn create_dir(&self, path: &Path) -> Result<()>;

    fn remove_dir(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<String>;

    fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Check that `path` exists and grants `mode` to this process
    fn check_access(&self, path: &Path, mode: Access) -> Result<()>;
}

/// The mounted cgroup v2 filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct RealCgroupFs;

impl CgroupFs for RealCgroupFs {
    fn create_dir(&self, path: &Path) -> Result<()> {
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(map_io_error(path, e)),
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).map_err(|e| match Errno::from_i32(e.raw_os_error().unwrap_or(0)) {
            Errno::EBUSY | Errno::ENOTEMPTY => CgroupError::NotEmpty(path.display().to_string()),
            _ => map_io_error(path, e),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> Result<String> {
        read_cgroup_file(path)
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        write_cgroup_file(path, content)
    }

    fn check_access(&self, path: &Path, mode: Access) -> Result<()> {
        let flags = match mode {
            Access::Read => AccessFlags::R_OK,
            Access::ReadWrite => AccessFlags::R_OK | AccessFlags::W_OK,
        };

        access(path, flags).map_err(|errno| match errno {
            Errno::ENOENT => CgroupError::NotFound(path.display().to_string()),
            other => CgroupError::PermissionDenied(format!("{}: {}", path.display(), other)),
        })
    }
}

/// Interface files every fake cgroup directory carries, with initial content
const FAKE_INTERFACE_FILES: &[(&str, &str)] = &[
    ("cgroup.controllers", "cpuset cpu io memory pids"),
    ("cgroup.procs", ""),
    ("cgroup.subtree_control", ""),
    ("cpu.max", "max 100000"),
    ("cpu.pressure", "some avg10=0.00 avg60=0.00 avg300=0.00 total=0"),
    ("cpu.stat", "usage_usec 0\nuser_usec 0\nsystem_usec 0\nnr_periods 0\nnr_throttled 0\nthrottled_usec 0"),
    ("cpu.weight", "100"),
    ("cpu.weight.nice", "0"),
    ("cpuset.cpus", ""),
    ("cpuset.cpus.partition", "member"),
    ("cpuset.mems", ""),
    ("cpuset.cpus.effective", ""),
    ("cpuset.mems.effective", ""),
    ("io.max", ""),
    ("memory.current", "0"),
];

const FAKE_READ_ONLY_FILES: &[&str] = &[
    "cgroup.controllers",
    "cpu.stat",
    "cpuset.cpus.effective",
    "cpuset.mems.effective",
    "memory.current",
];

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, String>,
    /// Directories whose interface files have not appeared yet, with the
    /// number of access checks still to fail
    pending: HashMap<PathBuf, u32>,
    exited: HashSet<u32>,
    writes: Vec<(PathBuf, String)>,
    delay: u32,
    effective_cpus: String,
    effective_mems: String,
}

impl MemoryState {
    fn populate(&mut self, dir: &Path) {
        for (name, content) in FAKE_INTERFACE_FILES {
            let content = match *name {
                "cpuset.cpus.effective" => self.effective_cpus.as_str(),
                "cpuset.mems.effective" => self.effective_mems.as_str(),
                _ => content,
            };
            self.files.insert(dir.join(name), content.to_string());
        }
    }

    fn procs_files(&self) -> Vec<PathBuf> {
        self.files
            .keys()
            .filter(|p| p.file_name().is_some_and(|n| n == "cgroup.procs"))
            .cloned()
            .collect()
    }

    fn remove_pid_everywhere(&mut self, pid: u32) {
        for path in self.procs_files() {
            if let Some(content) = self.files.get_mut(&path) {
                *content = without_pid(content, pid);
            }
        }
    }

    fn write_procs(&mut self, path: &Path, content: &str) -> Result<()> {
        let pid: u32 = content.trim().parse().map_err(|_| {
            CgroupError::Io(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))
        })?;

        if self.exited.contains(&pid) {
            self.remove_pid_everywhere(pid);
            return Err(CgroupError::Io(io::Error::from(Errno::ESRCH)));
        }

        self.remove_pid_everywhere(pid);
        if let Some(procs) = self.files.get_mut(path) {
            procs.push_str(&format!("{}\n", pid));
        }
        Ok(())
    }

    /// `io.max` keeps one line per device; a write replaces that device's line
    fn write_io_max(&mut self, path: &Path, content: &str) {
        let device = content.split_whitespace().next().unwrap_or_default().to_string();
        if let Some(current) = self.files.get_mut(path) {
            let mut lines: Vec<String> = current
                .lines()
                .filter(|l| l.split_whitespace().next() != Some(device.as_str()))
                .map(str::to_string)
                .collect();
            lines.push(content.trim().to_string());
            *current = lines.join("\n");
        }
    }
}

fn without_pid(content: &str, pid: u32) -> String {
    content
        .lines()
        .filter(|l| l.trim().parse::<u32>().ok() != Some(pid))
        .map(|l| format!("{}\n", l))
        .collect()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// In-memory cgroup tree for tests
///
/// Not part of the supported API. Production code goes through [`RealCgroupFs`].
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct MemoryCgroupFs {
    state: Mutex<MemoryState>,
}

impl MemoryCgroupFs {
    /// A tree rooted at `root`, with `cpus` as the effective core list
    pub fn new(root: impl Into<PathBuf>, cpus: &str) -> Self {
        let root = root.into();
        let mut state = MemoryState {
            effective_cpus: cpus.to_string(),
            effective_mems: "0".to_string(),
            ..Default::default()
        };
        state.dirs.insert(root.clone());
        state.populate(&root);

        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Interface files of directories created from now on stay missing for
    /// the first `checks` access checks
    pub fn delay_interface_files(&self, checks: u32) {
        self.lock().delay = checks;
    }

    /// Place a process in a cgroup, as if it had been started there
    pub fn add_process(&self, dir: &Path, pid: u32) {
        let mut state = self.lock();
        state.exited.remove(&pid);
        state.remove_pid_everywhere(pid);
        if let Some(procs) = state.files.get_mut(&dir.join("cgroup.procs")) {
            procs.push_str(&format!("{}\n", pid));
        }
    }

    /// The process exits; migrating it fails with ESRCH
    pub fn exit_process(&self, pid: u32) {
        self.lock().exited.insert(pid);
    }

    pub fn set_file(&self, path: &Path, content: &str) {
        self.lock().files.insert(path.to_path_buf(), content.to_string());
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    pub fn dir_exists(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, path: &Path) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

impl CgroupFs for MemoryCgroupFs {
    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if state.dirs.contains(path) {
            return Ok(());
        }

        let parent_exists = path.parent().is_some_and(|p| state.dirs.contains(p));
        if !parent_exists {
            return Err(CgroupError::NotFound(path.display().to_string()));
        }

        state.dirs.insert(path.to_path_buf());
        if state.delay > 0 {
            let delay = state.delay;
            state.pending.insert(path.to_path_buf(), delay);
        } else {
            state.populate(path);
        }
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if !state.dirs.contains(path) {
            return Err(CgroupError::NotFound(path.display().to_string()));
        }

        let has_children = state
            .dirs
            .iter()
            .any(|d| d != path && d.starts_with(path));
        let has_procs = state
            .files
            .get(&path.join("cgroup.procs"))
            .is_some_and(|c| !c.trim().is_empty());
        if has_children || has_procs {
            return Err(CgroupError::NotEmpty(path.display().to_string()));
        }

        state.dirs.remove(path);
        state.pending.remove(path);
        state.files.retain(|p, _| p.parent() != Some(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.dirs.contains(path) || state.files.contains_key(path)
    }

    fn read(&self, path: &Path) -> Result<String> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| CgroupError::NotFound(path.display().to_string()))
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.files.contains_key(path) {
            return Err(CgroupError::NotFound(path.display().to_string()));
        }
        if FAKE_READ_ONLY_FILES.contains(&file_name(path)) {
            return Err(CgroupError::PermissionDenied(path.display().to_string()));
        }

        match file_name(path) {
            "cgroup.procs" => state.write_procs(path, content)?,
            "io.max" => state.write_io_max(path, content),
            _ => {
                state.files.insert(path.to_path_buf(), content.to_string());
            }
        }

        state.writes.push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    fn check_access(&self, path: &Path, mode: Access) -> Result<()> {
        let mut state = self.lock();

        if let Some(dir) = path.parent().map(Path::to_path_buf) {
            if let Some(remaining) = state.pending.get_mut(&dir) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CgroupError::NotFound(path.display().to_string()));
                }
                state.pending.remove(&dir);
                state.populate(&dir);
            }
        }

        if !state.files.contains_key(path) {
            return Err(CgroupError::NotFound(path.display().to_string()));
        }
        if mode == Access::ReadWrite && FAKE_READ_ONLY_FILES.contains(&file_name(path)) {
            return Err(CgroupError::PermissionDenied(path.display().to_string()));
        }
        Ok(())
    }
}
