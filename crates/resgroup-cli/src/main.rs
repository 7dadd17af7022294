use anyhow::Result;
use byte_unit::{Byte, UnitType};
use clap::{Parser, Subcommand};
use colored::*;
use resgroup_core::iolimit::{IoLimitEntry, ThrottleKey, ThrottleValue};
use resgroup_core::{
    parse_io_limit_syntax, CgroupConfig, CgroupController, GroupId, RealCgroupFs, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "resgroup")]
#[command(version = VERSION)]
#[command(about = "Resource group operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the syntax of an io_limit value
    CheckIo {
        /// e.g. "pg_default:rbps=100,wiops=max;ts1:riops=500"
        value: String,

        /// Print the parsed entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show CPU and memory usage of one group
    Usage {
        /// Group id, e.g. 6437 for the default group
        group: u32,

        /// Window over which CPU share is measured
        #[arg(short, long, default_value = "1s")]
        interval: humantime::Duration,

        /// cgroup v2 mount point
        #[arg(long, default_value = "/sys/fs/cgroup")]
        mount_point: PathBuf,

        /// Directory of the resource group tree under the mount point
        #[arg(long, default_value = "resgroup")]
        base_dir: String,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::CheckIo { value, json }) => check_io(&value, json),
        Some(Commands::Usage {
            group,
            interval,
            mount_point,
            base_dir,
        }) => {
            let config = CgroupConfig {
                mount_point,
                base_dir,
                ..Default::default()
            };
            if let Err(e) = show_usage(config, GroupId(group), interval.into()) {
                println!("{}", format!("❌ {}", e).red());
                std::process::exit(1);
            }
        }
        Some(Commands::Version) => {
            println!("resgroup v{}", VERSION);
            println!("cgroup v2 resource groups");
        }
        None => {
            println!("{}", "Nothing to do, see --help".yellow());
        }
    }
}

fn check_io(value: &str, json: bool) {
    let entries = match parse_io_limit_syntax(value) {
        Ok(entries) => entries,
        Err(e) => {
            println!("{}", format!("❌ {}", e).red());
            std::process::exit(1);
        }
    };

    if json {
        let rendered: Vec<_> = entries
            .iter()
            .map(|e| serde_json::json!({ "volume": e.volume, "throttle": e.throttle }))
            .collect();
        println!("{}", serde_json::Value::Array(rendered));
        return;
    }

    if entries.is_empty() {
        println!("{}", "✅ No I/O limit".green());
        return;
    }

    println!("{}", "✅ Valid io_limit:".green());
    for entry in &entries {
        print_entry(entry);
    }
}

fn print_entry(entry: &IoLimitEntry) {
    println!("  {}", entry.volume.to_string().cyan().bold());
    for key in ThrottleKey::ALL {
        let rendered = match entry.throttle.get(key) {
            None => "-".dimmed().to_string(),
            Some(ThrottleValue::Unlimited) => "max".to_string(),
            Some(ThrottleValue::Limit(n)) if key.is_byte_rate() => format!("{} MiB/s", n),
            Some(ThrottleValue::Limit(n)) => format!("{} IO/s", n),
        };
        println!("    {:<6} {}", key.name(), rendered);
    }
}

fn show_usage(config: CgroupConfig, group: GroupId, interval: Duration) -> Result<()> {
    let controller = CgroupController::new(Arc::new(RealCgroupFs), config)?;

    let before = controller.read_cpu_usage(group)?;
    std::thread::sleep(interval);
    let after = controller.read_cpu_usage(group)?;

    let stat = controller.read_cpu_stat(group)?;
    let memory = controller.read_memory_usage(group)?;
    let cpu = controller.convert_cpu_usage(
        after.saturating_sub(before) as i64,
        interval.as_micros() as i64,
    );

    let cpu_text = format!("{:.1}%", cpu);
    let cpu_text = if cpu > 80.0 {
        cpu_text.red()
    } else {
        cpu_text.green()
    };

    println!("{}", format!("=== Group {} ===", group).green().bold());
    println!("  CPU:        {} of host ({} cores)", cpu_text, controller.ncores());
    println!(
        "  Memory:     {:.2}",
        Byte::from_u64(memory).get_appropriate_unit(UnitType::Binary)
    );
    println!("  Throttled:  {:.1}% of periods", stat.throttle_percentage());
    Ok(())
}
