//! Surfacer - Web application input-surface discovery and probing
//!
//! `surfacer discover` maps the pages and inputs of a target.
//! `surfacer test` also injects exploit vectors and reports anomalies.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use surfacer::app::Config;
use surfacer::lists;
use surfacer::reporting::ReportFormat;
use surfacer::session::provider_for;
use surfacer::{Cancellation, Pipeline, SurfacerError, TestInputs};

/// Web application input-surface discovery and probing
#[derive(Parser, Debug)]
#[command(name = "surfacer")]
#[command(author, version, about = "Web application input-surface discovery and probing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SURFACER_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SURFACER_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, global = true, env = "SURFACER_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, global = true, env = "SURFACER_LOG_JSON")]
    log_json: bool,

    /// Report format (defaults to the --output extension, else text)
    #[arg(long, global = true, value_enum, env = "SURFACER_FORMAT")]
    format: Option<ReportFormat>,

    /// Write the report to a file instead of stdout
    #[arg(short, long, global = true, env = "SURFACER_OUTPUT")]
    output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "SURFACER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Maximum concurrent requests for every stage
    #[arg(long, global = true, env = "SURFACER_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl and guess pages, then list every input point
    Discover {
        /// Target URL
        url: String,

        #[command(flatten)]
        discovery: DiscoveryArgs,
    },

    /// Discover, then inject vectors into every input point
    Test {
        /// Target URL
        url: String,

        #[command(flatten)]
        discovery: DiscoveryArgs,

        /// Exploit vectors, one per line; `CATEGORY: name` lines group them
        #[arg(long, env = "SURFACER_VECTORS")]
        vectors: PathBuf,

        /// Data that must never appear in a response, one entry per line
        #[arg(long, env = "SURFACER_SENSITIVE")]
        sensitive: PathBuf,

        /// Characters the target should encode, one per line (default: < and >)
        #[arg(long, env = "SURFACER_SANITIZED_CHARS")]
        sanitized_chars: Option<PathBuf>,

        /// Milliseconds after which a response counts as slow (default: 500)
        #[arg(long, env = "SURFACER_SLOW")]
        slow: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct DiscoveryArgs {
    /// Words to guess pages with, one per line
    #[arg(long, env = "SURFACER_COMMON_WORDS")]
    common_words: PathBuf,

    /// Extensions to combine with every word, one per line (default: bare words only)
    #[arg(long, env = "SURFACER_EXTENSIONS")]
    extensions: Option<PathBuf>,

    /// Built-in authentication to use (dvwa)
    #[arg(long, env = "SURFACER_CUSTOM_AUTH")]
    custom_auth: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle special commands first
    if cli.generate_config {
        return generate_default_config();
    }

    // Initialize logging
    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Surfacer");

    // Load and validate configuration
    let config = load_config(&cli)?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("No command given. Run `surfacer discover --help` or `surfacer test --help`.");
    };

    let cancel = Cancellation::new();
    tokio::spawn(handle_signals(cancel.clone()));

    let output = Output {
        format: cli
            .format
            .or_else(|| cli.output.as_deref().map(ReportFormat::from_path))
            .unwrap_or_default(),
        path: cli.output,
    };

    match run(command, config, cancel, &output).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(err) = e.downcast_ref::<SurfacerError>() {
                tracing::error!(error = %err, "Run failed");
                eprintln!("{}", err.user_message());
                std::process::exit(1);
            }
            Err(e)
        }
    }
}

/// Initialize the logging system. Console logs go to stderr so reports on
/// stdout stay clean.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        // File-based logging with rotation
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = std::path::Path::new(log_path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("surfacer.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            // Use default log directory
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(secs) = cli.timeout_secs {
        config.http.request_timeout = secs;
    }
    if let Some(n) = cli.max_concurrent {
        config.discovery.max_concurrent = n;
        config.guesser.max_concurrent = n;
        config.injection.max_concurrent = n;
    }

    config.validate()?;

    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let toml = Config::default()
        .to_toml()
        .context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Cancel the run on SIGINT/SIGTERM. Results collected so far are still reported.
async fn handle_signals(cancel: Cancellation) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "Could not register signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, cancelling run");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling run");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not register Ctrl+C handler");
            return;
        }
        tracing::info!("Received Ctrl+C, cancelling run");
    }

    cancel.cancel();
}

struct Output {
    format: ReportFormat,
    path: Option<PathBuf>,
}

impl Output {
    fn emit(&self, rendered: String) -> Result<()> {
        match &self.path {
            Some(path) => {
                std::fs::write(path, rendered)
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
                tracing::info!(path = %path.display(), "Report written");
            }
            None => println!("{}", rendered),
        }
        Ok(())
    }
}

/// Run one subcommand
async fn run(command: Command, config: Config, cancel: Cancellation, output: &Output) -> Result<()> {
    match command {
        Command::Discover { url, discovery } => {
            let (pipeline, words, extensions) = prepare(&url, &discovery, config, cancel).await?;
            let (report, _) = pipeline.discover(&words, &extensions).await?;
            output.emit(report.render(output.format)?)
        }
        Command::Test {
            url,
            discovery,
            vectors,
            sensitive,
            sanitized_chars,
            slow,
        } => {
            let inputs = TestInputs {
                vectors: lists::load_lines(&vectors).map_err(SurfacerError::from)?,
                sensitive: lists::load_required(&sensitive).map_err(SurfacerError::from)?,
                sanitized_chars: lists::load_optional(sanitized_chars.as_deref())
                    .map_err(SurfacerError::from)?,
                slow_ms: slow,
            };
            let (pipeline, words, extensions) = prepare(&url, &discovery, config, cancel).await?;
            let report = pipeline.test(&words, &extensions, inputs).await?;
            output.emit(report.render(output.format)?)
        }
    }
}

/// Load the discovery lists and authenticate against the target
async fn prepare(
    url: &str,
    args: &DiscoveryArgs,
    config: Config,
    cancel: Cancellation,
) -> Result<(Pipeline, Vec<String>, Vec<String>)> {
    let seed = Url::parse(url).map_err(|_| SurfacerError::InvalidTarget(url.to_string()))?;

    let words = lists::load_required(&args.common_words).map_err(SurfacerError::from)?;
    let extensions = lists::load_optional(args.extensions.as_deref())
        .map_err(SurfacerError::from)?
        .unwrap_or_default();

    let provider = provider_for(args.custom_auth.as_deref(), &seed, &config.http)?;
    let pipeline = Pipeline::new(config, provider, seed, cancel).await?;

    tracing::info!(
        words = words.len(),
        extensions = extensions.len(),
        "Discovery lists loaded"
    );

    Ok((pipeline, words, extensions))
}
