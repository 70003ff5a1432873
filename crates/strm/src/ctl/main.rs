//! strmctl - Control CLI for conversation streams
//!
//! Tails live stream endpoints, replays captured transcripts through the
//! same pipeline, and manages the strm configuration file.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use strm::client::StreamClient;
use strm::config::{ClientOptions, ReplayOptions, StreamOptions};
use strm::publish::StreamManager;
use strm::replay;
use strm_protocol::Message;

const APP_NAME: &str = "strm";
const BIN_NAME: &str = "strmctl";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_tail(ctx: RuntimeContext, cmd: TailCommand) -> Result<()> {
    handle_tail(&ctx, cmd).await
}

#[tokio::main]
async fn async_replay(ctx: RuntimeContext, cmd: ReplayCommand) -> Result<()> {
    handle_replay(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("using config file {}", ctx.paths.config_file.display());

    match cli.command {
        Command::Tail(cmd) => async_tail(ctx, cmd),
        Command::Replay(cmd) => async_replay(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "strmctl",
    author,
    version,
    about = "Tail and replay conversation streams.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON (snapshots and logs)
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail a live stream endpoint and print messages as they assemble
    Tail(TailCommand),
    /// Replay a captured transcript through the pipeline
    Replay(ReplayCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct TailCommand {
    /// Stream endpoint URL
    url: String,
}

#[derive(Debug, Clone, Args)]
struct ReplayCommand {
    /// Transcript file of frames separated by blank lines
    file: PathBuf,
    /// Speed multiplier over the configured frame delay
    #[arg(long)]
    speed: Option<f64>,
    /// Replay without inter-frame delays
    #[arg(long = "fast-forward")]
    fast_forward: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Recreate the file even if it already exists
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("strm={level},strmctl={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                if path.is_dir() {
                    path.join("config.toml")
                } else {
                    path
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    stream: StreamOptions,
    client: ClientOptions,
    replay: ReplayOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// Command handlers
// ============================================================================

async fn handle_tail(ctx: &RuntimeContext, cmd: TailCommand) -> Result<()> {
    let manager = StreamManager::new(ctx.config.stream.clone());
    let client = StreamClient::new(ctx.config.client.clone())?;
    let token = CancellationToken::new();

    let printer = spawn_printer(manager.subscribe(), ctx.common.json);
    spawn_interrupt_watch(token.clone());

    let stats = client.run(&cmd.url, &manager, &token).await?;
    info!("stream closed: {stats}");

    // Dropping the manager closes the snapshot channel; the printer drains
    // what is left and exits.
    drop(manager);
    printer.await?;
    Ok(())
}

async fn handle_replay(ctx: &RuntimeContext, cmd: ReplayCommand) -> Result<()> {
    let transcript = fs::read_to_string(&cmd.file)
        .with_context(|| format!("reading transcript {}", cmd.file.display()))?;

    let mut options = ctx.config.replay.clone();
    if let Some(speed) = cmd.speed {
        options.speed = speed;
    }

    let (pacing_tx, pacing_rx) = replay::pacing_channel(&options);
    if cmd.fast_forward {
        pacing_tx.send_modify(|pacing| pacing.fast_forward = true);
    }

    let manager = StreamManager::new(ctx.config.stream.clone());
    let token = CancellationToken::new();

    let printer = spawn_printer(manager.subscribe(), ctx.common.json);
    spawn_interrupt_watch(token.clone());

    let stream = replay::paced_stream(&transcript, &options, pacing_rx)?;
    let stats = manager.process(stream, &token).await?;
    info!("replay finished: {stats}");

    drop(manager);
    printer.await?;
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if ctx.paths.config_file.exists() && !force {
                return Err(anyhow!(
                    "config file {} already exists (use --force to overwrite)",
                    ctx.paths.config_file.display()
                ));
            }
            write_default_config(&ctx.paths.config_file)?;
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, BIN_NAME, &mut io::stdout());
    Ok(())
}

// ============================================================================
// Snapshot printing
// ============================================================================

fn spawn_printer(
    rx: broadcast::Receiver<Arc<Message>>,
    json: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut printer = Printer::new(json);
        printer.pump(rx).await;
    })
}

fn spawn_interrupt_watch(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            token.cancel();
        }
    });
}

/// Renders snapshots incrementally: since message content only ever grows,
/// each snapshot is printed as the suffix beyond what was already shown.
struct Printer {
    json: bool,
    shown: HashMap<String, usize>,
    closed: HashSet<String>,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            shown: HashMap::new(),
            closed: HashSet::new(),
        }
    }

    async fn pump(&mut self, mut rx: broadcast::Receiver<Arc<Message>>) {
        loop {
            match rx.recv().await {
                Ok(snapshot) => self.render(&snapshot),
                // Missed snapshots are harmless here: content is
                // append-only, so the next one carries everything.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("printer lagged behind by {skipped} snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn render(&mut self, snapshot: &Message) {
        if self.json {
            match serde_json::to_string(snapshot) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("failed to serialize snapshot {}: {err}", snapshot.id),
            }
            return;
        }

        let shown = self.shown.entry(snapshot.id.clone()).or_insert(0);
        let content = snapshot.content.as_str();
        if content.len() > *shown {
            if *shown == 0 {
                println!("[{} {}]", snapshot.role, snapshot.id);
            }
            print!("{}", &content[*shown..]);
            let _ = io::stdout().flush();
            *shown = content.len();
        }

        if snapshot.finish_reason.is_some() {
            self.render_close(snapshot);
        }
    }

    fn render_close(&mut self, snapshot: &Message) {
        if !self.closed.insert(snapshot.id.clone()) {
            return;
        }
        let Some(reason) = &snapshot.finish_reason else {
            return;
        };

        let mut trailer = String::new();
        for call in &snapshot.tool_calls {
            let state = if call.result.is_some() {
                "done"
            } else {
                "pending"
            };
            trailer.push_str(&format!(" | tool {} {}", call.name, state));
        }
        if let Some(results) = &snapshot.knowledge_base_results
            && !results.is_empty()
        {
            trailer.push_str(&format!(" | {} knowledge", results.len()));
        }
        if let Some(results) = &snapshot.web_search_results
            && !results.is_empty()
        {
            trailer.push_str(&format!(" | {} web", results.len()));
        }
        println!("\n[{} {} {}{}]", snapshot.role, snapshot.id, reason, trailer);
    }
}

// ============================================================================
// Configuration loading
// ============================================================================

fn load_or_init_config(paths: &AppPaths) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        write_default_config(&paths.config_file)?;
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    buffer
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
