use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use shiftstate::backends::{ConfigMountStore, ConfigServerDirectory, DockerComposeLoader, FileTraefikStore};
use shiftstate::config::{Args, Command, Settings};
use shiftstate::model::{DecisionMap, FileCompareResult, TransferOptions};
use shiftstate::orchestrator::{TransferProgress, TransferScanProgress, TransferScanResult, TransferService};
use shiftstate::session::TransferSession;
use shiftstate::transport::{ShellTransport, Transport};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // stdout carries results (and JSON), logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let options = settings.transfer_options();

    let servers = Arc::new(ConfigServerDirectory::new(settings.servers.clone()));
    let transport: Arc<dyn Transport> = Arc::new(ShellTransport::new(servers));
    let service = TransferService::new(
        transport.clone(),
        Arc::new(ConfigMountStore::from_settings(&settings)),
        Arc::new(DockerComposeLoader::new(
            transport.clone(),
            settings.engine.paths.clone(),
            settings.service.compose_file.clone(),
        )),
        Arc::new(FileTraefikStore::new(transport, settings.traefik_dir.clone())),
        settings.engine.clone(),
    );
    let session = TransferSession::new();

    match args.command {
        Command::Scan { json } => run_scan(&service, &options, &session, json, args.quiet),
        Command::Execute { decisions, json, no_progress } => {
            let decisions = match decisions {
                Some(path) => load_decisions(&path)?,
                None => DecisionMap::new(),
            };
            run_execute(&service, &options, &decisions, &session, json, no_progress || args.quiet)
        }
    }
}

fn load_decisions(path: &Path) -> anyhow::Result<DecisionMap> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read decisions file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid decisions file {}", path.display()))
}

fn run_scan(
    service: &TransferService,
    options: &TransferOptions,
    session: &TransferSession,
    json: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let spinner = if quiet { ProgressBar::hidden() } else { ProgressBar::new_spinner() };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = service.scan(options, session, &|progress: TransferScanProgress| {
        let mut msg = format!(
            "{} ({}/{} mounts, {} files",
            progress.phase, progress.processed_mounts, progress.total_mounts, progress.scanned_files
        );
        if progress.total_hashes > 0 {
            msg.push_str(&format!(", {}/{} hashed", progress.processed_hashes, progress.total_hashes));
        }
        msg.push(')');
        if let Some(file) = &progress.current_file {
            msg.push_str(&format!(" {}", file));
        }
        spinner.set_message(msg);
    });
    spinner.finish_and_clear();

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!("Scan failed: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_scan_summary(&result);
    }
    Ok(())
}

fn status_counts<'a>(files: impl Iterator<Item = &'a FileCompareResult>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for file in files {
        *counts.entry(file.status.as_str()).or_default() += 1;
    }
    if counts.is_empty() {
        return "empty".into();
    }
    counts
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_scan_summary(result: &TransferScanResult) {
    if let Some(dir) = &result.service_dir {
        println!("service dir {}: {}", dir.path, status_counts(dir.files.iter()));
    }
    if let Some(traefik) = &result.traefik_config {
        let state = match (traefik.source_exists, traefik.target_exists, traefik.has_conflict) {
            (false, _, _) => "not present on source",
            (true, false, _) => "will be created on target",
            (true, true, true) => "differs on target (will be overwritten)",
            (true, true, false) => "identical",
        };
        println!("traefik config: {}", state);
    }
    for volume in &result.volumes {
        println!(
            "volume {} ({} bytes): {}",
            volume.volume_name,
            volume.size_bytes,
            status_counts(volume.files.iter())
        );
    }
    for bind in &result.binds {
        println!("bind {}: {}", bind.host_path, status_counts(bind.files.iter()));
    }
    println!("total: {} bytes", result.total_size_bytes);

    if result.has_conflicts {
        println!("{} entries need a decision:", result.conflicts.len());
        for conflict in &result.conflicts {
            println!(
                "  {:<13} {}",
                conflict.status.as_str(),
                conflict.decision_key.as_deref().unwrap_or(conflict.path())
            );
        }
    }
}

fn run_execute(
    service: &TransferService,
    options: &TransferOptions,
    decisions: &DecisionMap,
    session: &TransferSession,
    json: bool,
    hide_progress: bool,
) -> anyhow::Result<()> {
    let pb = if hide_progress { ProgressBar::hidden() } else { ProgressBar::new(0) };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")?,
    );

    let result = service.execute(options, decisions, session, &mut |progress: TransferProgress| {
        pb.set_length(progress.total_bytes);
        pb.set_position(progress.transferred_bytes);
        match &progress.current_file {
            Some(file) => pb.set_message(format!("{} {}", progress.phase, file)),
            None => pb.set_message(progress.phase.clone()),
        }
    });
    pb.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Transfer failed: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    for failure in &outcome.errors {
        error!("{}", failure);
    }

    if outcome.cancelled {
        error!("Transfer cancelled");
        std::process::exit(1);
    }
    if !outcome.success {
        error!("Transfer finished with {} errors", outcome.errors.len());
        std::process::exit(1);
    }
    info!("Transfer completed.");
    Ok(())
}
