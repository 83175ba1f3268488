//! Mender Runtime
//!
//! The entry point for the self-repair subsystem. Handles CLI args,
//! configuration loading, and dispatching into the autonomy engine.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Confirm;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use mender::config::{self, MenderConfig};
use mender::engine::{discover_modules, AutonomyEngine, ENGINE_ENTITY};
use mender::incident::{AuditLog, IncidentHandler};
use mender::inspector::StaticInspector;
use mender::security::{generate_secret, SecurityLayer, DEFAULT_TOKEN_TTL_SECS};
use mender::tester::DEFAULT_ANOMALY_THRESHOLD_MS;
use mender::types::{InspectionReport, RepairOutcome, TestReport};
use mender::workers::{DefaultTaskHandler, WorkerPool};

const VERSION: &str = "0.1.0";

/// Mender -- Autonomous Self-Repair Runtime
#[derive(Parser, Debug)]
#[command(
    name = "mender",
    version = VERSION,
    about = "Mender -- Autonomous Self-Repair Runtime",
    long_about = "Inspects modules for unsafe patterns, applies rule-based patches, re-tests them in a sandbox, and rolls back on failure."
)]
struct Cli {
    /// Initialize the config directory and generate a signing secret
    #[arg(long)]
    init: bool,

    /// Inspect a module and print its issue report
    #[arg(long, value_name = "PATH")]
    inspect: Option<String>,

    /// Run the full repair pipeline on a module
    #[arg(long, value_name = "PATH")]
    repair: Option<String>,

    /// Test a single module in the sandbox
    #[arg(long, value_name = "PATH")]
    test: Option<String>,

    /// Batch test every Python module under a directory
    #[arg(long, value_name = "DIR")]
    batch: Option<String>,

    /// Watch a directory, testing and repairing continuously
    #[arg(long, value_name = "DIR")]
    watch: Option<String>,

    /// Promote a module into the live directory (approval gated)
    #[arg(long, value_name = "PATH")]
    promote: Option<String>,

    /// Destination for --promote, defaults to the configured live dir
    #[arg(long, value_name = "DIR")]
    dest: Option<String>,

    /// Show configuration, recent incidents, and the audit trail
    #[arg(long)]
    status: bool,

    /// Generate a fresh signing secret and print it
    #[arg(long)]
    gen_secret: bool,
}

// ---- Output Helpers ---------------------------------------------------------

fn init_tracing(config: &MenderConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn severity_label(severity: u8) -> colored::ColoredString {
    let label = format!("[{}]", severity);
    match severity {
        8..=10 => label.red(),
        5..=7 => label.yellow(),
        1..=4 => label.normal(),
        _ => label.green(),
    }
}

fn print_report(report: &InspectionReport) {
    println!();
    println!("=== INSPECTION REPORT ===");
    println!("Module:    {}", report.path);
    println!("Severity:  {}", severity_label(report.severity));
    if let Some(error) = &report.error {
        println!("{}", format!("Error:     {}", error).red());
    }
    if let Some(syntax_error) = &report.syntax_error {
        println!("{}", format!("Syntax:    {}", syntax_error).red());
    }
    let m = &report.metrics;
    println!(
        "Counts:    {} function(s), {} class(es), {} import(s), {} loop(s), complexity {}",
        m.functions, m.classes, m.imports, m.loops, m.complexity
    );
    if report.issues.is_empty() {
        println!("{}", "No issues found.".green());
    } else {
        println!("Issues:");
        for issue in &report.issues {
            let mut line = format!("  {} {}", severity_label(issue.severity), issue.pattern);
            if let Some(l) = issue.line {
                line.push_str(&format!(" (line {})", l));
            } else if let Some(p) = issue.position {
                line.push_str(&format!(" (offset {})", p));
            }
            if let Some(f) = &issue.function {
                line.push_str(&format!(" in {}()", f));
            }
            if let Some(matched) = &issue.matched {
                line.push_str(&format!(": {}", matched.trim()));
            }
            println!("{}", line);
        }
    }
    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }
    println!("=========================");
}

fn print_outcome(outcome: &RepairOutcome) {
    if outcome.repaired {
        println!("{}", "Repaired.".green());
        if let Some(id) = &outcome.incident_id {
            println!("  Incident:  {}", id);
        }
        if let Some(id) = &outcome.snapshot_id {
            println!("  Snapshot:  {}", id);
        }
        if let Some(patch) = &outcome.patch {
            println!("  Patch:");
            for r in &patch.replacements {
                println!("    '{}' -> '{}'", r.old, r.new);
            }
        }
    } else {
        let reason = outcome.reason.as_deref().unwrap_or("unknown");
        println!("{}", format!("Not repaired: {}", reason).yellow());
        if outcome.rolled_back == Some(true) {
            println!("{}", "  Rolled back to the pre-patch snapshot.".dimmed());
        }
    }
}

fn print_test_report(report: &TestReport) {
    println!();
    println!("=== TEST REPORT ===");
    println!("Total:     {}", report.total);
    println!("Passed:    {}", format!("{}", report.passed).green());
    println!("Failed:    {}", format!("{}", report.failed).red());
    println!("Pass rate: {:.1}%", report.pass_rate);
    println!("Avg time:  {:.1} ms", report.avg_duration_ms);
    if !report.failures.is_empty() {
        println!("Failures:");
        for failure in &report.failures {
            let detail = failure.details["error"].as_str().unwrap_or("see details");
            println!("  - {}: {}", failure.module_id, detail);
        }
    }
    println!("===================");
}

// ---- Commands ---------------------------------------------------------------

/// Build the security layer and engine from configuration. Fails when
/// no signing secret is configured.
fn build_engine(config: &MenderConfig) -> Result<(AutonomyEngine, Arc<SecurityLayer>)> {
    let secret = config::resolve_signing_secret(config)?;
    let security = Arc::new(SecurityLayer::new(&secret)?);
    let engine = AutonomyEngine::new(config, security.clone())?;
    Ok((engine, security))
}

fn cmd_init() -> Result<()> {
    println!("{}", "  First-run setup for the self-repair runtime.\n".white());

    println!("{}", "  [1/2] Writing configuration...".cyan());
    let config_path = config::get_config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "  {} {}",
                "\u{2192}".cyan(),
                "Config already exists. Overwrite?".white()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("{}", "  Keeping existing configuration.".yellow());
            return Ok(());
        }
    }

    println!("{}", "  [2/2] Generating signing secret...".cyan());
    let config = MenderConfig {
        signing_secret: Some(generate_secret()),
        ..MenderConfig::default()
    };
    config::save_config(&config).context("Failed to write config")?;

    println!(
        "{}",
        format!("  Config written to {}", config_path.display()).green()
    );
    println!(
        "{}",
        format!(
            "  Secret stored with owner-only permissions. Override via {}.",
            config::SECRET_ENV
        )
        .dimmed()
    );
    Ok(())
}

fn cmd_inspect(path: &str) -> Result<()> {
    let inspector = StaticInspector::new()?;
    let report = inspector.inspect(path);
    print_report(&report);
    Ok(())
}

async fn cmd_repair(config: &MenderConfig, path: &str) -> Result<()> {
    let (engine, _security) = build_engine(config)?;
    let outcome = engine.handle_incident(path).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn cmd_test(config: &MenderConfig, path: &str) -> Result<()> {
    let (engine, _security) = build_engine(config)?;
    let result = engine.tester().test_module(path, None).await;

    let verdict = if result.passed {
        "passed".green()
    } else {
        "failed".red()
    };
    println!(
        "Module {} {} in {:.1} ms",
        result.module_id, verdict, result.duration_ms
    );

    if let Some(output) = result.details.get("result") {
        let validation = engine.tester().validate_output(output);
        if !validation.valid {
            println!("{}", "Output contract violations:".yellow());
            for issue in &validation.issues {
                println!("  - {}", issue);
            }
        }
    }
    let anomaly = engine
        .tester()
        .detect_performance_anomaly(&result, DEFAULT_ANOMALY_THRESHOLD_MS);
    if anomaly.has_anomaly {
        println!("{}", "Performance anomalies:".yellow());
        for entry in &anomaly.anomalies {
            println!("  - {}", entry);
        }
    }

    if !result.passed {
        if let Some(error) = result.details.get("error").and_then(|e| e.as_str()) {
            eprintln!("{}", error.red());
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_batch(config: &MenderConfig, dir: &str) -> Result<()> {
    let (engine, _security) = build_engine(config)?;
    let resolved = config::resolve_path(dir);
    let modules = discover_modules(Path::new(&resolved));
    if modules.is_empty() {
        println!("No Python modules found under {}", resolved);
        return Ok(());
    }

    println!("Testing {} module(s)...", modules.len());
    let results = engine.tester().test_batch(&modules, None).await;
    let report = engine.tester().generate_report(&results);
    print_test_report(&report);
    Ok(())
}

async fn cmd_watch(config: &MenderConfig, dir: &str) -> Result<()> {
    let (engine, _security) = build_engine(config)?;
    let watch_dir = config::resolve_path(dir);

    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {
                    println!("\nReceived SIGINT, shutting down...");
                }
                _ = sigterm.recv() => {
                    println!("\nReceived SIGTERM, shutting down...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to register Ctrl+C handler");
            println!("\nReceived shutdown signal...");
        }
    };

    tokio::select! {
        _ = shutdown => {}
        result = engine.run_continuous(&watch_dir, config.watch_interval_secs) => {
            result?;
        }
    }
    Ok(())
}

/// One-shot promotion with the operator as the approval gate.
async fn cmd_promote(config: &MenderConfig, src: &str, dest: Option<&str>) -> Result<()> {
    let (engine, security) = build_engine(config)?;
    let dst_dir = dest
        .map(String::from)
        .unwrap_or_else(|| config::resolve_path(&config.live_dir));

    // Promotion needs the admin tier; the engine normally runs at
    // autonomy tier.
    security.issue_token(ENGINE_ENTITY, "admin", DEFAULT_TOKEN_TTL_SECS)?;
    let approval_id =
        security.request_approval(ENGINE_ENTITY, "promote", json!({"src": src, "dst": dst_dir}));

    println!(
        "{}",
        format!("  Approval request {} to promote:", approval_id).white()
    );
    println!("{}", format!("    {} -> {}", src, dst_dir).dimmed());
    let approved = Confirm::new()
        .with_prompt(format!(
            "  {} {}",
            "\u{2192}".cyan(),
            "Approve this promotion?".white()
        ))
        .default(false)
        .interact()?;

    if !approved {
        security.deny(&approval_id, "operator declined");
        println!("{}", "  Promotion denied.".yellow());
        return Ok(());
    }

    security.approve(&approval_id, "operator");
    if engine.promote_module(src, &dst_dir) {
        println!("{}", format!("  Promoted to {}", dst_dir).green());
        Ok(())
    } else {
        eprintln!("Promotion failed. Check the logs and approval state.");
        std::process::exit(1);
    }
}

// ---- Status Command ---------------------------------------------------------

/// Display configuration and recent repair activity.
fn show_status() {
    let config_path = config::get_config_path();
    if !config_path.exists() {
        println!("Mender is not configured. Run: mender --init");
        return;
    }

    let config = match config::load_config() {
        Some(c) => c,
        None => {
            eprintln!("Failed to parse config at {}", config_path.display());
            return;
        }
    };
    let data_dir = config::resolve_path(&config.data_dir);

    let pool = WorkerPool::new(
        config.worker_count,
        config.hybrid_workers,
        config.max_pool_concurrency,
        Arc::new(DefaultTaskHandler),
    );
    let stats = pool.get_stats();

    println!(
        r#"
=== MENDER STATUS ===
Config:     {}
Data dir:   {}
Live dir:   {}
Threshold:  severity {}
Watch:      every {}s
Workers:    {} ready ({} standard + {} hybrid, ceiling {})
Version:    {}
====================="#,
        config_path.display(),
        data_dir,
        config::resolve_path(&config.live_dir),
        config.severity_threshold,
        config.watch_interval_secs,
        stats.total_workers,
        config.worker_count,
        config.hybrid_workers,
        config.max_pool_concurrency,
        VERSION,
    );

    if !Path::new(&data_dir).exists() {
        println!("No repair activity recorded yet.");
        return;
    }

    match IncidentHandler::new(Path::new(&data_dir)) {
        Ok(incidents) => {
            let recent = incidents.recent_incidents(5);
            if !recent.is_empty() {
                println!("Recent incidents:");
                for incident in recent {
                    println!(
                        "  {}  {}  severity {}",
                        incident.id, incident.module_path, incident.severity
                    );
                }
                println!();
            }
        }
        Err(e) => eprintln!("Failed to open incident store: {}", e),
    }

    let audit = AuditLog::new(Path::new(&data_dir).join("audit.log"));
    println!("{}", audit.render_report());
}

// ---- Entry Point ------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = config::load_config().unwrap_or_default();
    init_tracing(&config);

    if cli.init {
        if let Err(e) = cmd_init() {
            eprintln!("Init failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if cli.gen_secret {
        println!("{}", generate_secret());
        return;
    }

    if cli.status {
        show_status();
        return;
    }

    if let Some(path) = cli.inspect.as_deref() {
        if let Err(e) = cmd_inspect(path) {
            eprintln!("Inspection failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(path) = cli.repair.as_deref() {
        if let Err(e) = cmd_repair(&config, path).await {
            eprintln!("Repair failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(path) = cli.test.as_deref() {
        if let Err(e) = cmd_test(&config, path).await {
            eprintln!("Test failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(dir) = cli.batch.as_deref() {
        if let Err(e) = cmd_batch(&config, dir).await {
            eprintln!("Batch test failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(dir) = cli.watch.as_deref() {
        if let Err(e) = cmd_watch(&config, dir).await {
            eprintln!("Watch failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(src) = cli.promote.as_deref() {
        if let Err(e) = cmd_promote(&config, src, cli.dest.as_deref()).await {
            eprintln!("Promotion failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Default: show help
    println!("Run \"mender --help\" for usage information.");
    println!("Run \"mender --init\" to set up the runtime.");
}
