mod batch;
mod browser;
mod config;
mod download;
mod error;
mod exporter;
mod fetcher;
mod identifier;
mod merger;
mod navigator;
mod section;
mod wait;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use batch::BatchOptions;
use config::{parse_secs, Config, ERROR_LOG};
use fetcher::BrowserFetcher;

#[derive(Parser)]
#[command(
    name = "ekw",
    about = "Download land-registry entries from the EKW viewer as PDF"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one entry (CODE/NUMBER/DIGIT) or every entry listed in a .csv/.tsv file
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Entry number such as WA2M/00436586/7, or a CSV/TSV file with a KW column
    target: String,

    /// Show the browser window (single entry only; batch mode is always headless)
    #[arg(long)]
    show_browser: bool,

    /// Output file for a single entry (default: <CODE>_<NUMBER>_<DIGIT>.pdf in --out-dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for generated PDFs
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Batch error log
    #[arg(long, default_value = ERROR_LOG)]
    error_log: PathBuf,

    /// Extra attempts per batch row after a timeout or navigation error
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Save a screenshot and the page HTML here when a fetch fails
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    #[command(flatten)]
    site: SiteArgs,
}

#[derive(Args)]
struct SiteArgs {
    /// Viewer front page
    #[arg(long, env = "EKW_BASE_URL", default_value = config::BASE_URL)]
    base_url: String,

    /// Chromium/Chrome executable (default: auto-detect)
    #[arg(long, env = "CHROME")]
    chrome: Option<PathBuf>,

    /// Seconds to wait for the anti-bot challenge to clear
    #[arg(long, env = "EKW_CHALLENGE_TIMEOUT", value_parser = parse_secs)]
    challenge_timeout: Option<Duration>,

    /// Seconds to wait for search results and the content view
    #[arg(long, env = "EKW_NAVIGATION_TIMEOUT", value_parser = parse_secs)]
    navigation_timeout: Option<Duration>,

    /// Seconds to wait for each section to render and print
    #[arg(long, env = "EKW_SECTION_TIMEOUT", value_parser = parse_secs)]
    section_timeout: Option<Duration>,
}

impl RunArgs {
    fn config(&self) -> Config {
        let mut cfg = Config {
            base_url: self.site.base_url.clone(),
            chrome_executable: self.site.chrome.clone(),
            debug_dir: self.debug_dir.clone(),
            ..Config::default()
        };
        if let Some(t) = self.site.challenge_timeout {
            cfg.timeouts.challenge = t;
        }
        if let Some(t) = self.site.navigation_timeout {
            cfg.timeouts.navigation = t;
        }
        if let Some(t) = self.site.section_timeout {
            cfg.timeouts.section = t;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("Done in {}", format_duration(elapsed));
    }

    result
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let cfg = args.config();

    if batch::is_tabular(&args.target) {
        if args.show_browser {
            warn!("--show-browser is ignored in batch mode");
        }
        if args.output.is_some() {
            warn!("--output is ignored in batch mode; use --out-dir");
        }
        let opts = BatchOptions {
            out_dir: args.out_dir.clone(),
            error_log: args.error_log.clone(),
            retries: args.retries,
            ..BatchOptions::default()
        };

        let mut fetcher = BrowserFetcher::new(&cfg, true);
        let result = batch::run_batch(&mut fetcher, Path::new(&args.target), &opts).await;
        fetcher.shutdown().await;

        let stats = match result {
            Ok(stats) => stats,
            Err(e) if e.is_fatal_for_batch() => {
                return Err(anyhow::Error::new(e).context(format!("cannot process {}", args.target)))
            }
            Err(e) => return Err(e.into()),
        };
        println!(
            "Done: {} rows ({} ok, {} errors).",
            stats.total, stats.ok, stats.errors
        );
        if stats.errors > 0 {
            println!("Failures logged to {}", args.error_log.display());
        }
        return Ok(());
    }

    let mut fetcher = BrowserFetcher::new(&cfg, !args.show_browser);
    let result = download::run_single(
        &mut fetcher,
        &args.target,
        &args.out_dir,
        args.output.as_deref(),
    )
    .await;
    fetcher.shutdown().await;

    let done = result.with_context(|| format!("download of {} failed", args.target))?;
    println!("{} ({} pages)", done.path.display(), done.page_count);
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
