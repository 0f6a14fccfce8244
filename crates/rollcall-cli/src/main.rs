use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use rollcall_core::{Gallery, GalleryConfig, OnnxPerception};
use rollcall_hw::Camera;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start capturing and recording attendance
    Start,
    /// Stop capturing and release the camera
    Stop,
    /// Show daemon status
    Status,
    /// List attendance recorded today
    List,
    /// Print attendance as it is recorded
    Watch,
    /// Build a gallery offline and report which entries were excluded
    Gallery {
        /// Gallery file (default: $XDG_CONFIG_HOME/rollcall/gallery.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory holding det_10g.onnx and w600k_r50.onnx
        #[arg(short, long)]
        models: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn start(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn attendance_recorded(&self, name: String, time: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn ledger_failed(&self, message: String) -> zbus::Result<()>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let proxy = connect(cli.system).await?;
            println!("{}", proxy.start().await?);
        }
        Commands::Stop => {
            let proxy = connect(cli.system).await?;
            println!("{}", proxy.stop().await?);
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::List => {
            let proxy = connect(cli.system).await?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&proxy.list_attendance().await?)?;
            if records.is_empty() {
                println!("No attendance recorded yet");
            }
            for record in records {
                println!(
                    "{}  {}",
                    record["time"].as_str().unwrap_or("??:??:??"),
                    record["name"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Watch => {
            let proxy = connect(cli.system).await?;
            watch(&proxy).await?;
        }
        Commands::Gallery { config, models } => {
            let config = config.unwrap_or_else(|| xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/gallery.toml"));
            let models = models.unwrap_or_else(|| xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall/models"));
            gallery_report(&config, &models)?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for device in devices {
                println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
            }
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<AttendanceProxy<'static>> {
    tracing::debug!(system, "connecting to rollcalld");
    let connection = if system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    AttendanceProxy::new(&connection)
        .await
        .context("rollcalld is not reachable on D-Bus")
}

async fn watch(proxy: &AttendanceProxy<'_>) -> Result<()> {
    let mut recorded = proxy.receive_attendance_recorded().await?;
    let mut failed = proxy.receive_ledger_failed().await?;
    println!("Watching for attendance (Ctrl-C to quit)");

    loop {
        tokio::select! {
            Some(signal) = recorded.next() => {
                let args = signal.args()?;
                println!("{}  {}", args.time(), args.name());
            }
            Some(signal) = failed.next() => {
                let args = signal.args()?;
                eprintln!("ledger write failed: {}", args.message());
            }
            _ = tokio::signal::ctrl_c() => break,
            else => break,
        }
    }
    Ok(())
}

fn gallery_report(config: &std::path::Path, models: &std::path::Path) -> Result<()> {
    let entries = GalleryConfig::load(config)?.entries;
    let mut perception = OnnxPerception::load(
        &models.join("det_10g.onnx").to_string_lossy(),
        &models.join("w600k_r50.onnx").to_string_lossy(),
    )
    .context("failed to load face models")?;

    let build = Gallery::build(&entries, &mut perception);
    println!(
        "{} of {} identities registered from {}",
        build.gallery.len(),
        entries.len(),
        config.display()
    );
    for identity in build.gallery.identities() {
        println!("  ok        {}", identity.name);
    }
    for exclusion in &build.excluded {
        println!(
            "  excluded  {} ({}): {}",
            exclusion.name,
            exclusion.image.display(),
            exclusion.reason
        );
    }
    Ok(())
}

fn xdg_dir(var: &str, home_fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(home_fallback)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_gallery_options() {
        let cli = Cli::try_parse_from(["rollcall", "gallery", "--config", "/tmp/g.toml", "-m", "/opt/models"]).unwrap();
        match cli.command {
            Commands::Gallery { config, models } => {
                assert_eq!(config, Some(PathBuf::from("/tmp/g.toml")));
                assert_eq!(models, Some(PathBuf::from("/opt/models")));
            }
            _ => panic!("expected gallery command"),
        }
    }

    #[test]
    fn test_cli_system_flag_is_global() {
        let cli = Cli::try_parse_from(["rollcall", "status", "--system"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Status));
    }
}
