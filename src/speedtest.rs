use anyhow::{Context, Result};
use crossbeam_channel as channel;
use serde::Serialize;
use tracing::{info, warn};

use crate::bench::{run_benchmark_until, BenchmarkConfig, BenchmarkReport};
use crate::cli::{ListServers, ListingOpt, OutputFormat, RunArgs};
use crate::metrics::format_rate;
use crate::servers::{select_server, sort_servers, RankedServer, ServerList, LISTING_LEN};
use crate::transfer::{build_client, DownloadTransfer, Transfer, UploadTransfer};

#[derive(Debug, Serialize)]
pub struct Summary {
    pub url: String,
    pub server: Option<RankedServer>,
    pub download: Option<BenchmarkReport>,
    pub upload: Option<BenchmarkReport>,
}

pub fn run_speedtest(args: RunArgs) -> Result<()> {
    let (interrupt_tx, interrupt_rx) = channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    }) {
        warn!(?e, "Could not install Ctrl-C handler");
    }

    let format = args.format;
    let summary = run_speedtest_until(args, &interrupt_rx)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

pub(crate) fn run_speedtest_until(args: RunArgs, interrupt: &channel::Receiver<()>) -> Result<Summary> {
    let text = args.format == OutputFormat::Text;
    let (url, server) = resolve_target(&args)?;
    if text {
        match &server {
            Some(s) => println!("Using server {}", describe_server(s)),
            None => println!("Using {url}"),
        }
    }
    info!(%url, "Selected server");

    let config = BenchmarkConfig::new(args.threads, args.max_threads, args.period())
        .with_resolution(args.resolution())
        .with_failure_policy(args.failure_policy());
    config.validate().context("Checking benchmark settings")?;
    let client = build_client(args.connect_timeout()).context("Building HTTP client")?;

    let mut summary = Summary {
        url: url.clone(),
        server,
        download: None,
        upload: None,
    };
    if !args.no_download {
        let transfer = DownloadTransfer::new(client.clone(), &url);
        summary.download = Some(measure("Download", &transfer, &config, interrupt, text)?);
    }
    if !args.no_upload {
        let transfer = UploadTransfer::new(client, &url, args.upload_size());
        summary.upload = Some(measure("Upload", &transfer, &config, interrupt, text)?);
    }
    Ok(summary)
}

fn measure(
    label: &str,
    transfer: &dyn Transfer,
    config: &BenchmarkConfig,
    interrupt: &channel::Receiver<()>,
    text: bool,
) -> Result<BenchmarkReport> {
    info!(test = label, "Starting test");
    let report = run_benchmark_until(transfer, config, interrupt)
        .with_context(|| format!("{label} test"))?;
    if report.failed_transfers > 0 {
        warn!(test = label, failed = report.failed_transfers, "Some transfers failed during the test");
    }
    if text {
        let note = match report.failed_transfers {
            0 => String::new(),
            n => format!(" ({n} transfers failed)"),
        };
        println!("{label}: {}{note}", format_rate(report.rate));
    }
    Ok(report)
}

fn resolve_target(args: &RunArgs) -> Result<(String, Option<RankedServer>)> {
    if let Some(url) = &args.url {
        return Ok((url.clone(), None));
    }
    let path = args
        .servers
        .as_deref()
        .context("Either --servers or --url is required")?;
    let list = ServerList::load(path)?;
    let from = args.location.resolve(list.client);
    let server = select_server(list.ranked(from), args.selector())?;
    Ok((server.server.url.clone(), Some(server)))
}

pub fn list_servers(args: ListServers) -> Result<()> {
    let list = ServerList::load(&args.servers)?;
    let from = args.location.resolve(list.client);
    let listing = listing(list.ranked(from), args.sort);

    match args.format {
        OutputFormat::Text => {
            if listing.is_empty() {
                eprintln!("<no servers>");
            }
            for s in &listing {
                println!("{}", listing_line(s));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
    }
    Ok(())
}

fn listing(mut servers: Vec<RankedServer>, opt: ListingOpt) -> Vec<RankedServer> {
    sort_servers(&mut servers, opt.sort_key());
    match opt {
        ListingOpt::Nearest => servers.truncate(LISTING_LEN),
        ListingOpt::Farthest => {
            let skip = servers.len().saturating_sub(LISTING_LEN);
            servers.drain(..skip);
        }
        ListingOpt::Id | ListingOpt::Distance => {}
    }
    servers
}

fn listing_line(s: &RankedServer) -> String {
    format!(
        "{:5}. [{}] ({}km) {}",
        s.server.id, s.server.cc, s.distance_km as u64, s.server.name
    )
}

fn describe_server(s: &RankedServer) -> String {
    format!(
        "{}. {}, {}, {} ({}km)",
        s.server.id, s.server.sponsor, s.server.name, s.server.country, s.distance_km as u64
    )
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::bench::RunError;
    use crate::cli::{Cli, Commands};
    use crate::servers::{ClientLocation, Server};
    use crate::transfer::fixture::serve_forever;

    fn ranked(ids_and_distances: &[(u32, f64)]) -> Vec<RankedServer> {
        ids_and_distances
            .iter()
            .map(|&(id, distance_km)| RankedServer {
                server: Server {
                    id,
                    url: format!("http://s{id}.example.net/upload.php"),
                    lat: 0.0,
                    lon: 0.0,
                    name: format!("Server {id}"),
                    country: "Nowhere".into(),
                    cc: "NW".into(),
                    sponsor: "Acme".into(),
                },
                distance_km,
            })
            .collect()
    }

    fn run_args(args: &[&str]) -> RunArgs {
        let mut argv = vec!["speedprobe", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Commands::Run(run)) => run,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn nearest_and_farthest_listings_are_capped() {
        let servers = ranked(&(1..=15).map(|i| (i, 100.0 * i as f64)).collect::<Vec<_>>());

        let nearest = listing(servers.clone(), ListingOpt::Nearest);
        assert_eq!(nearest.len(), LISTING_LEN);
        assert_eq!(nearest[0].server.id, 1);

        let farthest = listing(servers.clone(), ListingOpt::Farthest);
        assert_eq!(farthest.len(), LISTING_LEN);
        assert_eq!(farthest[0].server.id, 6);
        assert_eq!(farthest[9].server.id, 15);

        assert_eq!(listing(servers, ListingOpt::Id).len(), 15);
    }

    #[test]
    fn listing_line_format() {
        let s = &ranked(&[(42, 1234.9)])[0];
        assert_eq!(listing_line(s), "   42. [NW] (1234km) Server 42");
        assert_eq!(describe_server(s), "42. Acme, Server 42, Nowhere (1234km)");
    }

    #[test]
    fn resolves_server_from_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let list = ServerList {
            client: Some(ClientLocation { lat: 0.0, lon: 0.0 }),
            servers: ranked(&[(1, 0.0), (2, 0.0)]).into_iter().map(|r| r.server).collect(),
        };
        std::fs::write(&path, serde_json::to_string(&list).unwrap()).unwrap();
        let path = path.to_string_lossy().into_owned();

        let (url, server) = resolve_target(&run_args(&["--servers", &path, "--server", "2"])).unwrap();
        assert_eq!(url, "http://s2.example.net/upload.php");
        assert_eq!(server.map(|s| s.server.id), Some(2));
    }

    #[test]
    fn bad_settings_fail_before_any_transfer() {
        let args = run_args(&["--url", "http://127.0.0.1:9/upload.php", "--threads", "8", "--max-threads", "2"]);
        let err = run_speedtest_until(args, &channel::never()).unwrap_err();
        assert!(err.chain().any(|c| c.is::<crate::bench::ConfigError>()), "{err:?}");
    }

    #[test]
    fn end_to_end_against_loopback_server() {
        let url = serve_forever(64 * 1024);
        let args = run_args(&[
            "--url", &url,
            "--threads", "1",
            "--max-threads", "2",
            "--period", "1",
            "--upload-size", "65536",
            "--format", "json",
        ]);

        let summary = run_speedtest_until(args, &channel::never()).unwrap();

        let download = summary.download.unwrap();
        let upload = summary.upload.unwrap();
        assert!(download.total_bytes > 0 && download.rate > 0);
        assert!(upload.total_bytes > 0 && upload.rate > 0);
        assert_eq!(download.samples.len(), 10);
        assert!(download.peak_concurrency <= 2);
    }

    #[test]
    fn interrupt_surfaces_as_run_error() {
        let url = serve_forever(64 * 1024);
        let args = run_args(&["--url", &url, "--period", "30", "--no-upload", "--format", "json"]);
        let (tx, rx) = channel::bounded(1);
        tx.send(()).unwrap();

        let err = run_speedtest_until(args, &rx).unwrap_err();
        assert!(
            err.chain().any(|c| matches!(c.downcast_ref::<RunError>(), Some(RunError::Interrupted))),
            "{err:?}"
        );
    }
}
