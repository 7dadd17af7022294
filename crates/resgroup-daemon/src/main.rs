use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resgroup_core::{GroupId, LimitType, VERSION};
use resgroup_daemon::{open_controller, open_manager, Config, UsageSampler};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resource group daemon
///
/// Keeps named resource groups and maps their limits onto cgroup v2
#[derive(Parser, Debug)]
#[command(name = "resgroupd")]
#[command(version = VERSION)]
#[command(about = "Resource group daemon - cgroup v2 resource groups", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/resgroup/config.toml")]
    config: PathBuf,

    /// Only update the registry, never touch cgroups
    #[arg(long)]
    registry_only: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the cgroup v2 hierarchy offers every needed controller
    Probe,

    /// Set up the cgroup tree and apply every registered group
    Init,

    /// Create a resource group
    Create {
        name: String,

        /// Option as key=value, e.g. cpu_hard_quota_limit=30
        #[arg(short = 'w', long = "with", value_name = "OPTION=VALUE")]
        options: Vec<String>,
    },

    /// Change one option of a resource group
    Alter {
        name: String,
        option: String,
        value: String,
    },

    /// Remove a resource group, moving its processes to the default group
    Drop { name: String },

    /// List resource groups
    List,

    /// Move a process into a resource group
    Attach { name: String, pid: u32 },

    /// Print per-group CPU and memory usage periodically
    Watch {
        /// Sampling interval, e.g. "5s" (default: from config)
        #[arg(short, long)]
        interval: Option<humantime::Duration>,

        /// Emit one JSON object per sample
        #[arg(long)]
        json: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        return generate_config(output);
    }

    let config = load_config(&cli.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    let _guard = init_logging(&config)?;
    info!("resgroupd v{} starting...", VERSION);

    match cli.command {
        Some(Commands::Probe) => run_probe(&config),
        Some(Commands::Init) => run_init(&config),
        Some(Commands::Create { name, options }) => {
            run_create(&config, cli.registry_only, &name, &options)
        }
        Some(Commands::Alter {
            name,
            option,
            value,
        }) => run_alter(&config, cli.registry_only, &name, &option, &value),
        Some(Commands::Drop { name }) => run_drop(&config, cli.registry_only, &name),
        Some(Commands::List) => run_list(&config),
        Some(Commands::Attach { name, pid }) => run_attach(&config, &name, pid),
        Some(Commands::Watch { interval, json }) => {
            let interval = interval
                .map(Into::into)
                .unwrap_or_else(|| Duration::from_secs(config.sampler.interval_secs));
            run_watch_loop(&config, interval, json).await
        }
        Some(Commands::GenerateConfig { .. }) => Ok(()),
        None => {
            info!("No command specified, listing groups");
            run_list(&config)
        }
    }
}

fn run_probe(config: &Config) -> Result<()> {
    let controller = open_controller(config)?;

    for group in [GroupId::DEFAULT, GroupId::ADMIN, GroupId::SYSTEM] {
        match controller.probe(group, false)? {
            true => info!("group {} ready", group),
            false => warn!("group {} is missing interface files", group),
        }
    }

    info!("cgroup v2 hierarchy usable");
    Ok(())
}

fn run_init(config: &Config) -> Result<()> {
    let controller = open_controller(config)?;
    controller.initialize()?;

    let manager = open_manager(config, Some(controller))?;
    manager.apply_all()?;

    info!("Applied {} resource groups", manager.groups()?.len());
    Ok(())
}

fn manager_for(config: &Config, registry_only: bool) -> Result<resgroup_daemon::GroupManager> {
    let controller = if registry_only {
        None
    } else {
        Some(open_controller(config)?)
    };
    Ok(open_manager(config, controller)?)
}

fn run_create(config: &Config, registry_only: bool, name: &str, options: &[String]) -> Result<()> {
    let pairs = options
        .iter()
        .map(|o| {
            o.split_once('=')
                .ok_or_else(|| anyhow::anyhow!("option {:?} is not OPTION=VALUE", o))
        })
        .collect::<Result<Vec<_>>>()?;

    let manager = manager_for(config, registry_only)?;
    let mut tx = manager.begin()?;
    let id = tx.create_group(name, &pairs)?;
    tx.commit()?;

    info!("Created resource group {} (id {})", name, id);
    Ok(())
}

fn run_alter(
    config: &Config,
    registry_only: bool,
    name: &str,
    option: &str,
    value: &str,
) -> Result<()> {
    let manager = manager_for(config, registry_only)?;
    let mut tx = manager.begin()?;
    tx.alter_group(name, option, value)?;
    tx.commit()?;

    info!("Altered {} of resource group {}", option, name);
    Ok(())
}

fn run_drop(config: &Config, registry_only: bool, name: &str) -> Result<()> {
    let manager = manager_for(config, registry_only)?;
    let mut tx = manager.begin()?;
    tx.drop_group(name)?;
    tx.commit()?;

    info!("Dropped resource group {}", name);
    Ok(())
}

fn run_list(config: &Config) -> Result<()> {
    let manager = open_manager(config, None)?;

    for group in manager.groups()? {
        let caps = LimitType::ALL
            .iter()
            .map(|limit| format!("{}={}", limit.name(), group.caps.value_text(*limit)))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{:<6} {:<20} {}", group.id.to_string(), group.name, caps);
    }

    Ok(())
}

fn run_attach(config: &Config, name: &str, pid: u32) -> Result<()> {
    let manager = manager_for(config, false)?;
    manager.attach_process(name, pid)?;

    info!("Moved process {} into {}", pid, name);
    Ok(())
}

/// Sample group usage until interrupted
async fn run_watch_loop(config: &Config, interval: Duration, json: bool) -> Result<()> {
    info!(
        "Sampling usage every {}",
        humantime::format_duration(interval)
    );

    let controller = open_controller(config)?;
    let manager = open_manager(config, Some(controller.clone()))?;
    let mut sampler = UsageSampler::new(controller);

    loop {
        match manager.groups() {
            Ok(groups) => {
                let snapshot = sampler.sample(&groups);
                if json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    for usage in &snapshot.groups {
                        let cpu = usage
                            .cpu_percent
                            .map(|p| format!("{:.1}%", p))
                            .unwrap_or_else(|| "-".to_string());
                        info!(
                            "{}: cpu={}, memory={}MB, throttled={:.1}%",
                            usage.name,
                            cpu,
                            usage.memory_bytes / 1024 / 1024,
                            usage.throttled_percent
                        );
                    }
                }
            }
            Err(e) => error!("Failed to list groups: {}", e),
        }

        sleep(interval).await;
    }
}

/// Generate default configuration file
fn generate_config(output: &Path) -> Result<()> {
    Config::default()
        .save_to_file(output)
        .map_err(|e| anyhow::anyhow!("Failed to save configuration file: {}", e))?;

    println!("Configuration written to {:?}", output);
    Ok(())
}

/// Load configuration from file and environment, or use defaults
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        eprintln!("Configuration file not found: {:?}, using defaults", path);
    }
    Config::load(path).map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize logging with file and stdout output
///
/// The returned guard flushes the file writer when dropped, so hold it until exit
fn init_logging(config: &Config) -> Result<WorkerGuard> {
    let log_dir = &config.logging.log_dir;
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    // File appender for daemon logs
    let file_appender = tracing_appender::rolling::daily(log_dir, &config.logging.log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    Ok(guard)
}
