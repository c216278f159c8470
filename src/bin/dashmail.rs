//! CLI binary for dashmail.
//!
//! A thin shim over the library crate that loads a JSON config file, applies
//! flag overrides, runs the dispatch and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use dashmail::{
    create_daterange, dispatch, DispatchConfig, DispatchProgressCallback, DispatchReport,
    FailurePolicy, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the recipient list; the message shows the current stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} recipients  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Dispatching");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl DispatchProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_recipients: usize) {
        self.bar.set_length(total_recipients as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Sending dashboard to {total_recipients} recipient(s)…"))
        ));
    }

    fn on_recipient_start(&self, _index: usize, _total: usize, email: &str) {
        self.bar.set_message(email.to_string());
    }

    fn on_stage(&self, _index: usize, email: &str, stage: Stage) {
        self.bar.set_message(format!("{email}: {stage}"));
    }

    fn on_recipient_complete(&self, index: usize, total: usize, email: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}",
            green("✓"),
            index,
            total,
            email,
            dim(&format!("{pages} page(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_recipient_error(&self, index: usize, total: usize, email: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}",
            red("✗"),
            index,
            total,
            email,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, attempted: usize, delivered: usize) {
        self.bar.finish_and_clear();
        let failed = attempted.saturating_sub(delivered);
        if failed == 0 {
            eprintln!(
                "{} {} message(s) sent",
                green("✔"),
                bold(&delivered.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} message(s) sent  ({} failed)",
                if delivered == 0 { red("✘") } else { cyan("⚠") },
                bold(&delivered.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Send the configured dashboard to every recipient
  dashmail --config report.json

  # Override the date range
  dashmail --config report.json --start "Jan 1st, 2018" --end "Jan 29, 2018"

  # Keep going when one recipient fails, print the report as JSON
  dashmail --config report.json --continue-on-error --json > report.out.json

  # Show the effective configuration (secrets redacted)
  dashmail --config report.json --print-config

ENVIRONMENT VARIABLES:
  DASHMAIL_API_KEY        Render API key (sent as the partner auth header)
  DASHMAIL_SMTP_PASSWORD  SMTP password for the configured username
  PDFIUM_LIB_PATH         libpdfium file or directory (when pdfium_library_dir is unset)
  RUST_LOG                Overrides the log filter

  A .env file in the working directory is loaded at startup.
"#;

/// Render a dashboard to PDF and e-mail it to each configured recipient.
#[derive(Parser, Debug)]
#[command(
    name = "dashmail",
    version,
    about = "Render a dashboard to PDF and e-mail it to each recipient with their own filters",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, env = "DASHMAIL_CONFIG")]
    config: PathBuf,

    /// Start of the date range (overrides the config file).
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// End of the date range (overrides the config file).
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Record per-recipient failures and keep going instead of stopping.
    #[arg(long, env = "DASHMAIL_CONTINUE_ON_ERROR")]
    continue_on_error: bool,

    /// Print the dispatch report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Disable progress bar.
    #[arg(long, env = "DASHMAIL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DASHMAIL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DASHMAIL_QUIET")]
    quiet: bool,

    /// Render API key.
    #[arg(long, env = "DASHMAIL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// SMTP password.
    #[arg(long, env = "DASHMAIL_SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before clap so env-backed flags see .env values.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.print_config;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DispatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    if cli.print_config {
        println!("{config:#?}");
        return Ok(());
    }

    // ── Run dispatch ─────────────────────────────────────────────────────
    let report = dispatch(config).await.context("Dispatch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }
    if !cli.quiet && !show_progress {
        print_summary(&report);
    }

    if report.stats.failed > 0 {
        report.into_result().context("Some recipients were not served")?;
    }
    Ok(())
}

/// Map the config file plus CLI overrides to a `DispatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DispatchConfig> {
    let mut builder = DispatchConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if let (Some(start), Some(end)) = (&cli.start, &cli.end) {
        builder = builder.daterange(create_daterange(start, end).context("Invalid --start/--end")?);
    }
    if cli.continue_on_error {
        builder = builder.failure_policy(FailurePolicy::Continue);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref password) = cli.smtp_password {
        builder = builder.smtp_password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder
        .secrets_from_env()
        .build()
        .context("Invalid configuration")
}

fn print_summary(report: &DispatchReport) {
    eprintln!(
        "Delivered {}/{} in {}ms  ({} polls, {} pages)",
        report.stats.delivered,
        report.stats.attempted,
        report.stats.total_duration_ms,
        report.stats.total_poll_attempts,
        report.stats.total_pages,
    );
    for failed in report.failed() {
        if let Some(ref err) = failed.error {
            eprintln!("  {} {}", red("✗"), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn start_requires_end() {
        let err = Cli::try_parse_from(["dashmail", "-c", "r.json", "--start", "2018-01-01"]);
        assert!(err.is_err());
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "dashmail",
            "--config",
            "r.json",
            "--continue-on-error",
            "--json",
        ])
        .unwrap();
        assert!(cli.continue_on_error);
        assert!(cli.json);
        assert_eq!(cli.config, PathBuf::from("r.json"));
    }
}
