use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use mirrorsync::cli::{confirm_destination, Cli, RunSettings};
use mirrorsync::config::Config;
use mirrorsync::error::{format_bytes, SyncError, EXIT_GENERIC_FAILURE};
use mirrorsync::lifecycle::{Completion, Controller, SignalListener, Supervisor};
use mirrorsync::sync::journal::{LogMode, SyncLog};
use mirrorsync::sync::output::SyncEvent;
use mirrorsync::sync::stats::TaskReport;
use mirrorsync::sync::{SyncEngine, SyncOptions};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => SyncError::Usage(String::new()).exit_code(),
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut log = SyncLog::disabled();
    let code = match run(&cli, &mut log).await {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            report_error(&cli, &log, &err, code);
            code
        }
    };

    if let Err(e) = log.flush() {
        tracing::warn!("{}", e);
    }

    // Exit without tearing down the runtime: a pending prompt read would block it
    std::process::exit(code);
}

async fn run(cli: &Cli, log: &mut SyncLog) -> Result<i32> {
    cli.validate()?;

    let config = Config::load(cli.config.as_deref())?;
    let settings = cli.settings(&config);

    // Installed before anything else so a signal during the prompt is handled
    let mut signals = SignalListener::install().context("Failed to install signal handlers")?;

    let mode = if cli.append_log {
        LogMode::Append
    } else {
        LogMode::Overwrite
    };
    *log = SyncLog::open(&settings.log_file, mode)?;
    log.block([
        format!(
            "mirrorsync v{} run started at {}",
            env!("CARGO_PKG_VERSION"),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        format!("SOURCE Directory : {}", cli.source.display()),
        format!("TARGET Directory : {}", cli.destination.display()),
    ])?;
    log.flush()?;

    if !cli.quiet && !cli.json {
        println!("mirrorsync v{}", env!("CARGO_PKG_VERSION"));
        println!("Mirroring {} → {}\n", cli.source.display(), cli.destination.display());
    }

    let supervisor = Supervisor::new(settings.parallel);
    let controller = Controller::new(supervisor.clone(), settings.grace_period);
    let engine = SyncEngine::new(
        SyncOptions {
            policy: settings.policy,
            json: cli.json,
        },
        log.clone(),
        supervisor,
    );

    let started = Instant::now();
    let work = async {
        cli.validate_paths()?;
        if !cli.yes {
            prompt(cli).await?;
        }
        let report = engine.sync(&cli.source, &cli.destination).await?;
        Ok::<_, anyhow::Error>(report)
    };

    match controller.supervise(work, signals.recv()).await {
        Completion::Finished(result) => {
            let report = result?;
            print_summary(cli, &settings, &report, started.elapsed());
            log_summary(log, &report, started.elapsed())?;
            Ok(0)
        }
        Completion::Interrupted { signal, drain } => {
            let code = signal.exit_code();
            if !cli.quiet && !cli.json {
                println!("\nSignal {} received : Saving logs and exiting...", signal);
            }
            if cli.json {
                SyncEvent::Interrupted {
                    signal: signal.name().to_string(),
                    exit_code: code,
                }
                .emit();
            }
            let mut lines = vec![
                format!("\nSignal {} received : Starting the children's cleanup...", signal),
                format!("Units running at cancellation: {}", drain.pending),
            ];
            for path in &drain.forced {
                lines.push(format!("Forcing closure of unresponsive unit: {}", path.display()));
            }
            lines.push(format!("Signal {} received : Saving logs and exiting...", signal));
            log.block(lines)?;
            log.flush()?;
            Ok(code)
        }
    }
}

async fn prompt(cli: &Cli) -> Result<()> {
    let destination = cli.destination.clone();
    let json = cli.json;
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        if json {
            confirm_destination(&destination, stdin.lock(), std::io::stderr())
        } else {
            confirm_destination(&destination, stdin.lock(), std::io::stdout())
        }
    })
    .await
    .context("Confirmation prompt failed")??;
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
        .map(SyncError::exit_code)
        .unwrap_or(EXIT_GENERIC_FAILURE)
}

fn report_error(cli: &Cli, log: &SyncLog, err: &anyhow::Error, code: i32) {
    if cli.json {
        SyncEvent::Error {
            error: format!("{:#}", err),
            exit_code: code,
        }
        .emit();
    }
    eprintln!("{} {:#}", "Error detected :".red().bold(), err);
    eprintln!("  Error Code : {}", code);

    let mirrored = log.block([
        format!("Error detected : {:#}", err),
        format!("  Error Code : {}", code),
    ]);
    if let Err(e) = mirrored {
        tracing::warn!("{}", e);
    }
}

fn print_summary(cli: &Cli, settings: &RunSettings, report: &TaskReport, duration: Duration) {
    let totals = report.totals();

    if cli.json {
        SyncEvent::Summary {
            levels: report.levels(),
            files_created: totals.files_created,
            files_updated: totals.files_updated,
            files_skipped: totals.files_skipped,
            files_deleted: totals.dest_files_deleted,
            dirs_deleted: totals.dest_dirs_deleted,
            bytes_copied: totals.bytes_copied,
            duration_secs: duration.as_secs_f64(),
        }
        .emit();
        return;
    }
    if cli.quiet {
        return;
    }

    println!("\n{}\n", "✓ Mirror complete".green().bold());

    println!("  Directories:       {}", report.levels().to_string().blue());
    if totals.files_created > 0 {
        println!("  Files created:     {}", totals.files_created.to_string().green());
    } else {
        println!("  Files created:     {}", totals.files_created.to_string().bright_black());
    }
    if totals.files_updated > 0 {
        println!("  Files updated:     {}", totals.files_updated.to_string().yellow());
    } else {
        println!("  Files updated:     {}", totals.files_updated.to_string().bright_black());
    }
    println!("  Files skipped:     {}", totals.files_skipped.to_string().bright_black());
    if totals.entries_deleted() > 0 {
        println!("  Files deleted:     {}", totals.dest_files_deleted.to_string().red());
        println!("  Dirs deleted:      {}", totals.dest_dirs_deleted.to_string().red());
    } else {
        println!("  Files deleted:     {}", totals.dest_files_deleted.to_string().bright_black());
        println!("  Dirs deleted:      {}", totals.dest_dirs_deleted.to_string().bright_black());
    }
    if totals.entries_renamed > 0 {
        println!("  Renamed in source: {}", totals.entries_renamed.to_string().bright_magenta());
    }

    println!();
    println!("  Bytes copied:      {}", format_bytes(totals.bytes_copied).cyan());
    println!("  Duration:          {}", format_duration(duration).cyan());
    println!("  Log file:          {}", settings.log_file.display());
}

fn log_summary(log: &SyncLog, report: &TaskReport, duration: Duration) -> Result<()> {
    let totals = report.totals();
    log.block([
        "\nRUN SUMMARY :".to_string(),
        format!("Directories processed: {}", report.levels()),
        format!("Files created: {}", totals.files_created),
        format!("Files updated: {}", totals.files_updated),
        format!("Files skipped: {}", totals.files_skipped),
        format!("Files deleted: {}", totals.dest_files_deleted),
        format!("Directories deleted: {}", totals.dest_dirs_deleted),
        format!("Entries renamed in source: {}", totals.entries_renamed),
        format!("Bytes copied: {}", totals.bytes_copied),
        format!("Duration: {}", format_duration(duration)),
    ])?;
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        if mins >= 60 {
            let hours = mins / 60;
            let mins = mins % 60;
            format!("{}h {}m {}s", hours, mins, secs)
        } else {
            format!("{}m {}s", mins, secs)
        }
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
