use clap::{Args, Parser, Subcommand, ValueEnum};
use dockview_common::{ResourceKind, UpdateOptions};

/// Live, continuously reconciled view of a container daemon
#[derive(Parser)]
#[command(name = "dockview")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Daemon endpoint: unix://, npipe://, tcp:// or http://. Empty uses the local defaults.
    #[arg(short, long, global = true, env = "DOCKVIEW_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream change and connection notifications until Ctrl-C
    Watch(WatchArgs),
    /// List containers
    Ps(PsArgs),
    /// List images, networks or volumes
    Ls(LsArgs),
    /// Show daemon host information
    Info,
    /// Start a container
    Start { id: String },
    /// Stop a container
    Stop(StopArgs),
    /// Change a running container's resource limits
    Update(UpdateArgs),
}

#[derive(Args)]
pub struct WatchArgs {
    /// Also run a full refresh every N seconds
    #[arg(long, env = "DOCKVIEW_POLL_INTERVAL_SECS")]
    pub poll: Option<u64>,
}

#[derive(Args)]
pub struct PsArgs {
    /// Only running containers
    #[arg(short, long)]
    pub running: bool,
    /// Case-insensitive match on container or image name
    #[arg(short, long)]
    pub filter: Option<String>,
    /// Group the listing by container state
    #[arg(long)]
    pub group: bool,
}

#[derive(Args)]
pub struct LsArgs {
    pub kind: KindArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Containers,
    Images,
    Networks,
    Volumes,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Containers => ResourceKind::Container,
            KindArg::Images => ResourceKind::Image,
            KindArg::Networks => ResourceKind::Network,
            KindArg::Volumes => ResourceKind::Volume,
        }
    }
}

#[derive(Args)]
pub struct StopArgs {
    pub id: String,
    /// Seconds to wait before killing; defaults to DOCKVIEW_STOP_GRACE_SECS or 30
    #[arg(short = 't', long)]
    pub grace: Option<i64>,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: String,
    /// Memory limit, e.g. 512m or 2g
    #[arg(long, value_parser = parse_bytes)]
    pub memory: Option<i64>,
    /// Memory plus swap limit; -1 for unlimited swap
    #[arg(long, value_parser = parse_bytes, allow_hyphen_values = true)]
    pub memory_swap: Option<i64>,
    /// Relative CPU weight
    #[arg(long)]
    pub cpu_shares: Option<i64>,
    /// CPU quota in units of 1e-9 CPUs
    #[arg(long)]
    pub nano_cpus: Option<i64>,
    /// Maximum number of processes; -1 for unlimited
    #[arg(long, allow_hyphen_values = true)]
    pub pids_limit: Option<i64>,
}

impl UpdateArgs {
    pub fn options(&self) -> UpdateOptions {
        UpdateOptions {
            memory_bytes: self.memory,
            memory_swap_bytes: self.memory_swap,
            cpu_shares: self.cpu_shares,
            nano_cpus: self.nano_cpus,
            pids_limit: self.pids_limit,
        }
    }
}

/// Parses a byte count with an optional b/k/m/g suffix (binary multiples).
fn parse_bytes(raw: &str) -> Result<i64, String> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = match raw.char_indices().last() {
        Some((i, 'b')) => (&raw[..i], 1),
        Some((i, 'k')) => (&raw[..i], 1 << 10),
        Some((i, 'm')) => (&raw[..i], 1 << 20),
        Some((i, 'g')) => (&raw[..i], 1 << 30),
        _ => (raw.as_str(), 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {raw}"))?;
    if value < 0 {
        return Ok(value);
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {raw}"))
}
