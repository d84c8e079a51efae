use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use sysdump::archive::ArchiveReader;
use sysdump::collector::{ConsentDecision, DryRunCollector};
use sysdump::config::CoordinatorConfig;
use sysdump::logging::{init_logging, LogFormat};
use sysdump::sections::{count_matching, parse_bytes, total_bytes};
use sysdump::validate::{validate_archive, ValidationProfile, ValidationReport};
use sysdump::{BugreportMode, EventSink, ReportEvent, ReportRequest, RequestCoordinator};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "sysdump", about = "Single-flight bugreport service and archive tools")]
struct Cli {
    /// Coordinator configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a dry-run bugreport through the coordinator
    Run {
        #[arg(short, long)]
        output: PathBuf,
        /// Screenshot sink (default: <output>.png)
        #[arg(long)]
        screenshot: Option<PathBuf>,
        /// Mode name (full, interactive, remote, wear, telephony, wifi, default) or raw value
        #[arg(short, long, default_value = "default", value_parser = parse_mode)]
        mode: i32,
        #[arg(long, default_value = "0")]
        caller_id: i32,
        #[arg(long, default_value = "com.example.sysdump")]
        package: String,
        /// granted, denied or none
        #[arg(long, default_value = "granted")]
        consent: String,
        /// Delay between dumped services, in milliseconds
        #[arg(long, default_value = "0")]
        step_delay_ms: u64,
        /// Validate the archive after a successful run
        #[arg(long)]
        validate: bool,
    },
    /// List the sections of the main text
    Sections {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List archive entries
    Entries {
        input: PathBuf,
    },
    /// Extract the main text through the pointer entry
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check a finished archive for completeness
    Validate {
        input: PathBuf,
        /// Thresholds (TOML); defaults to a structure-only profile
        #[arg(long, conflicts_with = "smoke")]
        profile: Option<PathBuf>,
        /// Use the full-size bugreport thresholds
        #[arg(long)]
        smoke: bool,
        /// Expected contents of version.txt
        #[arg(long)]
        expect_version: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format)?;
    let config = match &cli.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None       => CoordinatorConfig::default(),
    };

    match cli.command {

        // ── Run ──────────────────────────────────────────────────────────────
        Commands::Run { output, screenshot, mode, caller_id, package, consent, step_delay_ms, validate } => {
            let consent = ConsentDecision::from_name(&consent)
                .ok_or_else(|| format!("Unknown consent decision '{consent}'"))?;
            let screenshot = screenshot.unwrap_or_else(|| output.with_extension("png"));

            let collector = DryRunCollector::from_config(&config, consent)
                .with_step_delay(Duration::from_millis(step_delay_ms));
            let coordinator = RequestCoordinator::with_config(collector, config.clone());

            let request = ReportRequest::new(
                caller_id,
                package,
                File::create(&output)?,
                File::create(&screenshot)?,
                mode,
            );
            let sink = Arc::new(EventSink::new("cli"));
            let events = sink.subscribe();
            let started = Instant::now();
            let id = coordinator.start(request, Arc::clone(&sink))?;
            println!("Started report {id}");

            let deadline = started + config.wait_timeout();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(remaining) {
                    Ok(ReportEvent::Progress(p)) => println!("  progress {p:>3}%"),
                    Ok(_)                          => break,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(format!("No result within {:?}", config.wait_timeout()).into());
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let elapsed = started.elapsed();
            coordinator.wait_idle(config.wait_timeout());

            if let Some(kind) = sink.error_kind() {
                return Err(format!("Report failed: {kind} (code {})", kind.code()).into());
            }
            println!("Finished in {:.2}s → {}", elapsed.as_secs_f64(), output.display());
            if BugreportMode::from_raw(mode).is_some_and(BugreportMode::takes_screenshot) {
                println!("Screenshot → {}", screenshot.display());
            }

            if validate {
                let profile = ValidationProfile::default().with_expected_version(config.version.clone());
                let report = validate_archive(&output, &profile, Some(elapsed))?;
                print_report(&report);
                if !report.passed() {
                    return Err("Validation failed".into());
                }
            }
        }

        // ── Sections ─────────────────────────────────────────────────────────
        Commands::Sections { input, json } => {
            let text = ArchiveReader::open(&input)?.extract_main_text()?;
            let sections = parse_bytes(&text);
            if json {
                println!("{}", serde_json::to_string_pretty(&sections)?);
            } else {
                println!("{:<40} {:>12}", "Section", "Bytes");
                for s in &sections {
                    println!("{:<40} {:>12}", s.name, s.size_bytes);
                }
                println!(
                    "{} section(s), {} bytes  (CRITICAL {}, HIGH {})",
                    sections.len(),
                    total_bytes(&sections),
                    count_matching(&sections, "CRITICAL"),
                    count_matching(&sections, "HIGH"),
                );
            }
        }

        // ── Entries ──────────────────────────────────────────────────────────
        Commands::Entries { input } => {
            let mut ar = ArchiveReader::open(&input)?;
            println!("Archive: {}", input.display());
            println!("{:<60} {:>12} {:>12} {:>8}  BLAKE3", "Name", "Size", "Compressed", "CRC32");
            for name in ar.entry_names() {
                let entry = ar.extract_entry(&name)?;
                let digest = blake3::hash(&entry.payload);
                println!(
                    "{:<60} {:>12} {:>12} {:08x}  {}",
                    entry.info.name,
                    entry.info.uncompressed_length,
                    entry.info.compressed_length,
                    entry.info.crc32,
                    hex::encode(&digest.as_bytes()[..6]),
                );
            }
            match ar.main_entry_name() {
                Ok(main) => println!("Main entry: {main}"),
                Err(e)   => println!("Main entry: unresolved ({e})"),
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output } => {
            let mut ar = ArchiveReader::open(&input)?;
            let mut out = File::create(&output)?;
            let info = ar.extract_main_text_to(&mut out)?;
            println!("Extracted {} ({} bytes) → {}", info.name, info.uncompressed_length, output.display());
        }

        // ── Validate ─────────────────────────────────────────────────────────
        Commands::Validate { input, profile, smoke, expect_version, json } => {
            let mut profile = load_profile(profile.as_deref(), smoke)?;
            if let Some(version) = expect_version {
                profile = profile.with_expected_version(version);
            }
            let report = validate_archive(&input, &profile, None)?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
            if !report.passed() {
                return Err(format!("{} check(s) failed", report.failures().count()).into());
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_mode(s: &str) -> Result<i32, String> {
    if let Some(mode) = BugreportMode::from_name(s) {
        return Ok(mode.raw());
    }
    // Out-of-range numbers pass through; the coordinator rejects them.
    s.parse::<i32>().map_err(|_| format!("'{s}' is neither a mode name nor a number"))
}

fn load_profile(path: Option<&Path>, smoke: bool) -> Result<ValidationProfile, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(p)          => ValidationProfile::load(p)?,
        None if smoke    => ValidationProfile::smoke(),
        None             => ValidationProfile::default(),
    })
}

fn print_report(report: &ValidationReport) {
    println!("── Validation ───────────────────────────────────────────");
    println!("  Archive        {} ({} B)", report.archive, report.archive_bytes);
    println!("  Main entry     {}", report.main_entry);
    println!("  Main BLAKE3    {}", report.main_digest);
    println!("  Sections       {}", report.sections.len());
    for check in &report.checks {
        let mark = if check.passed { "ok  " } else { "FAIL" };
        println!("  [{mark}] {:<40} {}", check.name, check.detail);
    }
}
