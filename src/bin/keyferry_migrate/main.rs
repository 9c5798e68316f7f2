//! keyferry-migrate - copy every key from one Redis-protocol store to another
//!
//! Positional arguments follow the classic order
//! `srchost srchostauth srchostport dsthost dsthostauth dsthostport [dsthostcacert]`;
//! with `--config` they may be omitted and anything given overrides the file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use keyferry::config::{LogFormat, MigrationConfig};
use keyferry::migration::orchestrator::ProgressCallback;
use keyferry::migration::{run_migration, MigrationReport, ProgressSnapshot};
use keyferry::telemetry::init_logging;

/// Clean run.
const EXIT_CLEAN: u8 = 0;
/// Run completed but at least one key failed.
const EXIT_KEY_FAILURES: u8 = 1;
/// Run aborted, or the configuration was unusable.
const EXIT_ABORTED: u8 = 2;

/// keyferry-migrate - Redis keyspace migration tool
#[derive(Parser, Debug)]
#[command(name = "keyferry-migrate")]
#[command(author, version, about = "Migrate every key of one Redis-protocol store to another")]
struct MigrateArgs {
    /// Source host
    srchost: Option<String>,
    /// Source credential: empty, password, or user:password
    srchostauth: Option<String>,
    /// Source port
    srchostport: Option<u16>,
    /// Destination host
    dsthost: Option<String>,
    /// Destination credential: empty, password, or user:password
    dsthostauth: Option<String>,
    /// Destination port
    dsthostport: Option<u16>,
    /// CA certificate for the destination (required with --ssldst)
    dsthostcacert: Option<PathBuf>,

    /// Connect to the source over TLS. The certificate is verified against
    /// web PKI roots unless --srccacert is given; a source with a self-signed
    /// or private-CA certificate needs --srccacert
    #[arg(long)]
    sslsrc: bool,

    /// Connect to the destination over TLS
    #[arg(long)]
    ssldst: bool,

    /// CA certificate for the source (web PKI roots when omitted)
    #[arg(long)]
    srccacert: Option<PathBuf>,

    /// Database index on both sides
    #[arg(long)]
    db: Option<u8>,

    /// Flush the destination before migrating (simulated with --dryrun)
    #[arg(long)]
    flush: bool,

    /// Read and classify everything without writing to the destination
    #[arg(long)]
    dryrun: bool,

    /// Keys requested per SCAN round trip
    #[arg(long)]
    scan_count: Option<usize>,

    /// Per-operation timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

/// CLI-friendly log format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Report output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl MigrateArgs {
    /// Layer command-line values over `config`.
    fn apply_to_config(&self, config: &mut MigrationConfig) -> Result<(), String> {
        let from_file = self.config.is_some();
        let required = [
            ("srchost", self.srchost.is_some()),
            ("srchostauth", self.srchostauth.is_some()),
            ("srchostport", self.srchostport.is_some()),
            ("dsthost", self.dsthost.is_some()),
            ("dsthostauth", self.dsthostauth.is_some()),
            ("dsthostport", self.dsthostport.is_some()),
        ];
        if !from_file {
            if let Some((name, _)) = required.iter().find(|(_, given)| !given) {
                return Err(format!(
                    "missing argument <{}> (or pass --config)",
                    name.to_uppercase()
                ));
            }
        }

        if let Some(ref host) = self.srchost {
            config.source.host = host.clone();
        }
        if let Some(ref auth) = self.srchostauth {
            config.source.auth = auth.clone();
        }
        if let Some(port) = self.srchostport {
            config.source.port = port;
        }
        if let Some(ref host) = self.dsthost {
            config.destination.host = host.clone();
        }
        if let Some(ref auth) = self.dsthostauth {
            config.destination.auth = auth.clone();
        }
        if let Some(port) = self.dsthostport {
            config.destination.port = port;
        }
        if let Some(ref ca) = self.dsthostcacert {
            config.destination.ca_cert = Some(ca.clone());
        }
        if let Some(ref ca) = self.srccacert {
            config.source.ca_cert = Some(ca.clone());
        }

        config.source.tls |= self.sslsrc;
        config.destination.tls |= self.ssldst;
        config.flush |= self.flush;
        config.dry_run |= self.dryrun;

        if let Some(db) = self.db {
            config.db = db;
        }
        if let Some(count) = self.scan_count {
            config.scan_count = count;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = Some(secs);
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = MigrateArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_ABORTED);
        }
    };
    init_logging(&config.logging);

    if args.format == OutputFormat::Text {
        println!(
            "{} Migrating {} → {}{}",
            "→".cyan().bold(),
            config.source.label().yellow(),
            config.destination.label().yellow(),
            if config.dry_run {
                " (dry run)".dimmed().to_string()
            } else {
                String::new()
            }
        );
        println!();
    }

    let bar = progress_bar(&args);
    let sink = bar.clone();
    let callback: ProgressCallback = Box::new(move |p: &ProgressSnapshot| {
        sink.set_length(p.estimated_total.max(p.processed));
        sink.set_position(p.processed);
    });

    let result = run_migration(&config, Some(callback)).await;
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            if let Err(e) = print_report(&report, args.format) {
                eprintln!("{} {:#}", "error:".red().bold(), e);
                return ExitCode::from(EXIT_ABORTED);
            }
            if report.is_clean() {
                ExitCode::from(EXIT_CLEAN)
            } else {
                ExitCode::from(EXIT_KEY_FAILURES)
            }
        }
        Err(abort) => {
            if let Err(e) = print_report(&abort.partial, args.format) {
                eprintln!("{} {:#}", "error:".red().bold(), e);
            }
            eprintln!("{} {}", "error:".red().bold(), abort);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn load_config(args: &MigrateArgs) -> anyhow::Result<MigrationConfig> {
    let mut config = match &args.config {
        Some(path) => MigrationConfig::from_file(path)?,
        None => MigrationConfig::default(),
    };
    args.apply_to_config(&mut config).map_err(|e| anyhow!(e))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn progress_bar(args: &MigrateArgs) -> ProgressBar {
    if args.no_progress || args.format == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} keys ({per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

// ── Output ───────────────────────────────────────────────────────────

fn print_report(report: &MigrationReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!("{}", "Migration Report".bold().underline());
            for line in report.render_text().lines() {
                println!("  {}", line);
            }
            println!();
            if report.is_clean() {
                println!("{} {} keys migrated", "✓".green().bold(), report.migrated);
            } else {
                println!(
                    "{} {} of {} keys failed",
                    "✗".red().bold(),
                    report.failed,
                    report.total_source_keys
                );
            }
        }
    }
    Ok(())
}
