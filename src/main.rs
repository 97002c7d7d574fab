mod bench;
mod cli;
mod metrics;
mod servers;
mod speedtest;
mod stats;
mod transfer;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::bench::{ConfigError, RunError};
use crate::cli::{Cli, Commands};
use crate::servers::SelectError;
use crate::speedtest::{list_servers, run_speedtest};
use crate::transfer::TransferError;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Servers(list)) => list_servers(list),
        Some(Commands::Run(run)) => run_speedtest(run),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: no servers, 3: unknown server, 4: transfer failure, 5: bad settings, 130: interrupted, 1: other
    for cause in err.chain() {
        if let Some(sel) = cause.downcast_ref::<SelectError>() {
            return match sel {
                SelectError::NoServers => 2,
                SelectError::NotFound(_) => 3,
            };
        }
        if let Some(run) = cause.downcast_ref::<RunError>() {
            return match run {
                RunError::Config(_) => 5,
                RunError::Interrupted => 130,
                RunError::Transfer(_) | RunError::NoSuccessfulTransfers { .. } => 4,
            };
        }
        if cause.is::<ConfigError>() {
            return 5;
        }
        if cause.is::<TransferError>() || cause.is::<reqwest::Error>() {
            return 4;
        }
    }
    1
}
