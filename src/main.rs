//! Article-Digest main entry point
//!
//! This is the command-line interface for fetching, extracting and
//! summarizing articles.

use article_digest::browser::{launch_backend, BackendKind, LaunchOptions};
use article_digest::config::{load_config_with_hash, validate, Config};
use article_digest::cookies::{load_cookie_file, Cookie};
use article_digest::output::{discard_staging, write_article};
use article_digest::recovery::{normalize, ErrorContext, PipelineError, Stage};
use article_digest::{PipelineCoordinator, PipelineResult};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Article-Digest: resilient article extraction and summarization
///
/// Loads each URL with your cookies, extracts the article text and images,
/// and summarizes it with a local LLM server. Optional stages degrade
/// gracefully; a URL only fails when its content cannot be obtained.
#[derive(Parser, Debug)]
#[command(name = "article-digest")]
#[command(version = "1.0.0")]
#[command(about = "Resilient article extraction and summarization", long_about = None)]
struct Cli {
    /// Article URLs to process
    #[arg(value_name = "URL", required = true)]
    urls: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cookie file (Netscape cookies.txt or JSON export)
    #[arg(long, value_name = "FILE")]
    cookies: Option<PathBuf>,

    /// Output directory (overrides output.directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Rendering backend: http or chromium (overrides browser.backend)
    #[arg(short, long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// Preferred LLM model (overrides llm.model)
    #[arg(short, long)]
    model: Option<String>,

    /// Skip image acquisition
    #[arg(long)]
    no_images: bool,

    /// Skip summarization
    #[arg(long)]
    no_summary: bool,

    /// Print the summary as it is generated
    #[arg(long, conflicts_with = "no_summary")]
    stream: bool,

    /// Validate configuration and cookies, then exit
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(error) => {
            report_failure("configuration", &error);
            return Err(error.into());
        }
    };

    let cookies = match &cli.cookies {
        Some(path) => match load_cookie_file(path) {
            Ok(cookies) => {
                tracing::info!("Loaded {} cookies from {}", cookies.len(), path.display());
                cookies
            }
            Err(e) => {
                let error = normalize(&e, ErrorContext::at(Stage::Cookies).path(path));
                report_failure("cookies", &error);
                return Err(error.into());
            }
        },
        None => Vec::new(),
    };

    if cli.dry_run {
        handle_dry_run(&cli, &config, &cookies);
        return Ok(());
    }

    handle_digest(&cli, config, cookies).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("article_digest=info,warn"),
            1 => EnvFilter::new("article_digest=debug,info"),
            2 => EnvFilter::new("article_digest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file (or defaults), applies CLI overrides and validates
fn load_configuration(cli: &Cli) -> Result<Config, PipelineError> {
    let context = || ErrorContext::at(Stage::Config);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) =
                load_config_with_hash(path).map_err(|e| normalize(&e, context().path(path)))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => {
            tracing::debug!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if let Some(output) = &cli.output {
        config.output.directory = output.display().to_string();
    }
    if let Some(backend) = cli.backend {
        config.browser.backend = backend;
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if cli.no_images {
        config.images.enabled = false;
    }
    if cli.no_summary {
        config.llm.enabled = false;
    }
    if cli.stream {
        config.llm.stream = true;
    }

    validate(&config).map_err(|e| normalize(&e, context()))?;
    Ok(config)
}

/// Handles the --dry-run mode: shows what would be done
fn handle_dry_run(cli: &Cli, config: &Config, cookies: &[Cookie]) {
    println!("=== Article-Digest Dry Run ===\n");

    println!("URLs ({}):", cli.urls.len());
    for url in &cli.urls {
        println!("  - {}", url);
    }

    println!("\nBrowser:");
    println!("  Backend: {}", config.browser.backend);
    println!("  Timeout: {}ms", config.browser.timeout_ms);
    println!("  Max retries: {}", config.browser.max_retries);
    println!("  Anti-detection: {}", config.browser.anti_detection);

    println!("\nImages:");
    if config.images.enabled {
        println!("  Max concurrent: {}", config.images.max_concurrent);
        println!(
            "  Max width: {}px, quality {}",
            config.images.max_width, config.images.quality
        );
    } else {
        println!("  Disabled");
    }

    println!("\nSummarization:");
    if config.llm.enabled {
        println!("  Server: {}", config.llm.base_url);
        println!("  Model: {}", config.llm.model);
        println!("  Fallbacks: {}", config.llm.fallback_models.join(", "));
        println!("  Length: {}", config.llm.length);
        println!("  Streaming: {}", config.llm.stream);
    } else {
        println!("  Disabled");
    }

    println!("\nCookies: {}", cookies.len());
    let expired = article_digest::cookies::detect_expired_cookies(cookies);
    if !expired.is_empty() {
        println!("  Expired:");
        for cookie in &expired {
            println!("    * {} ({})", cookie.name, cookie.domain);
        }
    }

    println!("\nOutput: {}", config.output.directory);
    println!("\n=== Dry run complete ===");
}

/// Prefixes streamed fragments with their URL whenever the source changes,
/// so output from concurrently summarized articles stays attributable
#[derive(Default)]
struct StreamLabeler {
    last_url: Mutex<Option<String>>,
}

impl StreamLabeler {
    fn label(&self, url: &str, fragment: &str) -> String {
        let mut last = match self.last_url.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.as_deref() == Some(url) {
            return fragment.to_string();
        }
        *last = Some(url.to_string());
        format!("\n[{}] {}", url, fragment)
    }
}

/// Runs the pipeline for every URL and writes the results
async fn handle_digest(
    cli: &Cli,
    config: Config,
    cookies: Vec<Cookie>,
) -> Result<(), Box<dyn std::error::Error>> {
    let launch = LaunchOptions {
        executable: config.browser.executable.as_ref().map(PathBuf::from),
        ..LaunchOptions::default()
    };
    let backend = launch_backend(config.browser.backend, launch).await?;
    let mut coordinator = PipelineCoordinator::from_config(&config, backend)?;

    if config.llm.stream && !cli.quiet {
        let labeler = StreamLabeler::default();
        coordinator = coordinator.with_chunk_sink(Arc::new(move |url: &str, fragment: &str| {
            let labeled = labeler.label(url, fragment);
            let mut stdout = std::io::stdout().lock();
            let written = stdout.write_all(labeled.as_bytes());
            if let Err(e) = written.and_then(|_| stdout.flush()) {
                tracing::debug!("Failed to write streamed fragment: {}", e);
            }
        }));
    }

    let output_root = PathBuf::from(&config.output.directory);
    let results = coordinator
        .run_batch(&cli.urls, &cookies, config.output.batch_concurrency)
        .await;

    let mut failed = 0;
    for (url, result) in &results {
        match result {
            Ok(result) => {
                if let Err(e) = write_result(result, &output_root).await {
                    failed += 1;
                    report_failure(url, &e);
                }
            }
            Err(error) => {
                failed += 1;
                report_failure(url, error);
            }
        }
    }

    let _ = tokio::fs::remove_dir_all(&coordinator.options().work_dir).await;

    println!(
        "\n{} of {} article(s) digested into {}",
        results.len() - failed,
        results.len(),
        output_root.display()
    );

    if failed > 0 {
        return Err(format!("{} URL(s) failed", failed).into());
    }

    Ok(())
}

async fn write_result(result: &PipelineResult, output_root: &Path) -> Result<(), PipelineError> {
    let context = || ErrorContext::at(Stage::Output).url(&result.url);

    let index = write_article(result, output_root)
        .await
        .map_err(|e| normalize(&e, context()))?;
    if let Err(e) = discard_staging(result).await {
        tracing::warn!("Failed to remove image staging directory: {}", e);
    }

    println!("\n✓ {}", result.url);
    println!("  Written to {}", index.display());
    println!(
        "  {} image(s), {} dropped",
        result.images.len(),
        result.images_dropped
    );
    match &result.summary {
        Some(summary) => println!(
            "  Summary by {} in {:.1}s",
            summary.model,
            summary.duration.as_secs_f64()
        ),
        None => println!("  No summary"),
    }
    for (code, count) in result.suppressed_counts() {
        println!("  Suppressed {} × {}", count, code);
    }

    Ok(())
}

/// Prints a fatal error with its remediation steps
fn report_failure(subject: &str, error: &PipelineError) {
    tracing::error!("{}: {}", subject, error);
    eprintln!("\n✗ {}", subject);
    eprintln!("  {}", error);
    for suggestion in error.suggestions() {
        eprintln!("  → {}", suggestion);
    }
}
