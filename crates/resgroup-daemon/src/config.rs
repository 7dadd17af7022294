use resgroup_core::{CapabilityBounds, CgroupConfig, StaticVolumeCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Prefix of environment variables overriding file settings,
/// e.g. `RESGROUP__CGROUP__BASE_DIR`
pub const ENV_PREFIX: &str = "RESGROUP";

/// Main configuration for the resource group daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// cgroup v2 tree settings
    pub cgroup: CgroupConfig,

    /// Bounds on group definitions
    pub limits: LimitsConfig,

    /// Logging configuration
    pub logging: LogConfig,

    /// Registry file and storage volumes
    pub storage: StorageConfig,

    /// Usage sampling settings
    pub sampler: SamplerConfig,
}

/// Bounds on group definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound of a group's concurrency (default: 250)
    pub max_connections: u32,

    /// Maximum number of resource groups (default: 100)
    pub max_groups: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log directory path (default: ./logs/)
    pub log_dir: PathBuf,

    /// Daemon log file name, rotated daily (default: resgroupd.log)
    pub log_file: String,

    /// Filter used when RUST_LOG is not set (default: info)
    pub level: String,
}

/// A named storage location I/O limits can refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub location: PathBuf,
}

/// Registry file and storage volumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding group definitions
    pub state_file: PathBuf,

    /// Volumes named by `io_limit` options
    pub volumes: Vec<VolumeConfig>,
}

/// Usage sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Seconds between two samples in `watch` (default: 5)
    pub interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 250,
            max_groups: 100,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_file: "resgroupd.log".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/lib/resgroup/groups.json"),
            volumes: vec![VolumeConfig {
                name: "pg_default".to_string(),
                location: PathBuf::from("/var/lib/resgroup"),
            }],
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply `RESGROUP__*`
    /// environment overrides
    ///
    /// A missing file is not an error: defaults plus environment are used.
    ///
    /// # Example
    /// ```no_run
    /// use resgroup_daemon::config::Config;
    ///
    /// let config = Config::load("/etc/resgroup/config.toml").unwrap();
    /// println!("cgroup base: {:?}", config.cgroup.base_path());
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a TOML file only
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        self.cgroup.validate().map_err(|e| e.to_string())?;

        if self.limits.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.limits.max_groups == 0 {
            return Err("max_groups must be > 0".to_string());
        }

        if self.sampler.interval_secs == 0 {
            return Err("Sampler interval must be > 0".to_string());
        }

        if self.logging.log_file.is_empty() {
            return Err("Log file name must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for volume in &self.storage.volumes {
            if volume.name.is_empty() || volume.name == "*" {
                return Err(format!("Invalid volume name: {:?}", volume.name));
            }
            if !seen.insert(volume.name.as_str()) {
                return Err(format!("Duplicate volume: {}", volume.name));
            }
        }

        Ok(())
    }

    /// Get full path to the daemon log file
    pub fn log_path(&self) -> PathBuf {
        self.logging.log_dir.join(&self.logging.log_file)
    }

    pub fn bounds(&self) -> CapabilityBounds {
        CapabilityBounds {
            max_connections: self.limits.max_connections,
        }
    }

    /// Configured volumes as an I/O limit catalog
    pub fn volume_catalog(&self) -> StaticVolumeCatalog {
        self.storage
            .volumes
            .iter()
            .map(|v| (v.name.clone(), v.location.clone()))
            .collect()
    }
}
