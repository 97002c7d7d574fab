use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::bench::{FailurePolicy, DEFAULT_RESOLUTION};
use crate::servers::{ClientLocation, ServerSelector, SortKey};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List servers from a server list file
    Servers(ListServers),
    /// Measure download and upload throughput
    Run(RunArgs),
}

#[derive(Parser, Clone, Debug)]
pub struct ListServers {
    /// JSON server list
    #[arg(long)]
    pub servers: PathBuf,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Ordering of the listing
    #[arg(long, value_enum, default_value_t = ListingOpt::Distance)]
    pub sort: ListingOpt,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Clone, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["servers", "url"])))]
pub struct RunArgs {
    /// JSON server list to pick a server from
    #[arg(long)]
    pub servers: Option<PathBuf>,

    /// Upload URL of a server to test directly, skipping server selection
    #[arg(long)]
    pub url: Option<String>,

    /// Server id to test (default: nearest)
    #[arg(long, requires = "servers", conflicts_with = "farthest")]
    pub server: Option<u32>,

    /// Test the farthest server instead of the nearest
    #[arg(long, requires = "servers")]
    pub farthest: bool,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Initial number of concurrent transfers
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Maximum number of concurrent transfers
    #[arg(long, default_value_t = 16)]
    pub max_threads: usize,

    /// Sampling period per test, in seconds
    #[arg(long, default_value_t = 10)]
    pub period: u64,

    /// Width of one sample slot, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RESOLUTION.as_millis() as u64)]
    pub resolution_ms: u64,

    /// HTTP connect timeout, in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Bytes per upload request (0 streams until the period ends)
    #[arg(long, default_value_t = 1024 * 1024)]
    pub upload_size: u64,

    /// Skip the download test
    #[arg(long)]
    pub no_download: bool,

    /// Skip the upload test
    #[arg(long)]
    pub no_upload: bool,

    /// Keep measuring when individual transfers fail
    #[arg(long)]
    pub tolerate_failures: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl RunArgs {
    pub fn selector(&self) -> ServerSelector {
        match (self.server, self.farthest) {
            (Some(id), _) => ServerSelector::Id(id),
            (None, true) => ServerSelector::Farthest,
            (None, false) => ServerSelector::Nearest,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn upload_size(&self) -> Option<u64> {
        (self.upload_size > 0).then_some(self.upload_size)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.tolerate_failures {
            FailurePolicy::Tolerate
        } else {
            FailurePolicy::Abort
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct LocationArgs {
    /// Client latitude in degrees (default: from the server list)
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Client longitude in degrees (default: from the server list)
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,
}

impl LocationArgs {
    pub fn resolve(&self, from_list: Option<ClientLocation>) -> ClientLocation {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => ClientLocation { lat, lon },
            _ => from_list.unwrap_or_default(),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingOpt {
    Id,
    Distance,
    Nearest,
    Farthest,
}

impl ListingOpt {
    pub fn sort_key(self) -> SortKey {
        match self {
            ListingOpt::Id => SortKey::Id,
            ListingOpt::Distance | ListingOpt::Nearest | ListingOpt::Farthest => SortKey::Distance,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
