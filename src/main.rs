/// Version injected at compile time via LIGHTS_OUT_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("LIGHTS_OUT_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lights_out::aws::client::{AwsClient, AwsProvider};
use lights_out::config::{self, ConfigCache, ConfigLoadError, LightsOutConfig, DEFAULT_CONFIG_TTL};
use lights_out::discovery::{load_resources, DiscoveryFilter};
use lights_out::notification::{DetailLevel, LogNotifier, WebhookNotifier};
use lights_out::provider::CloudProvider;
use lights_out::resource::registry::builtin_validator;
use lights_out::resource::{Action, HandlerRegistry, ResourceDescriptor};
use lights_out::trigger::{TriggerKind, TriggerSource};
use lights_out::{BatchRequest, Orchestrator};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

/// Scheduled start/stop of tagged AWS resources
#[derive(Parser, Debug)]
#[command(name = "lights-out", version = VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or stop every managed resource
    Run(RunArgs),
    /// Show the current state of every managed resource
    Status(StatusArgs),
    /// Load and validate configuration
    Validate(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Configuration file (YAML)
    #[arg(long, conflicts_with = "parameter")]
    config: Option<PathBuf>,

    /// SSM parameter holding the configuration
    #[arg(long)]
    parameter: Option<String>,

    /// AWS region (defaults to the configuration, then the environment)
    #[arg(long)]
    region: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_parser = parse_action)]
    action: Action,

    /// Compute targets without mutating anything
    #[arg(long)]
    dry_run: bool,

    /// Resources file: tag query result or descriptor list (JSON)
    #[arg(long)]
    resources: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    /// Environment tag to select (overrides the configuration)
    #[arg(long)]
    environment: Option<String>,

    /// Overall time budget in seconds
    #[arg(long)]
    time_budget: Option<u64>,

    /// What triggered this run
    #[arg(long, value_parser = parse_trigger, default_value = "manual-invoke")]
    trigger: TriggerKind,

    /// Who triggered this run
    #[arg(long)]
    identity: Option<String>,

    /// Extra webhook to notify
    #[arg(long)]
    webhook: Vec<String>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Resources file: tag query result or descriptor list (JSON)
    #[arg(long)]
    resources: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long)]
    environment: Option<String>,
}

fn parse_action(s: &str) -> std::result::Result<Action, String> {
    s.parse()
}

fn parse_trigger(s: &str) -> std::result::Result<TriggerKind, String> {
    s.parse()
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn setup_logging(
    level: LogLevel,
    format: LogFormat,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    // stdout is reserved for the JSON report
    let (writer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (
                BoxMakeWriter::new(non_blocking.with_max_level(tracing_level)),
                Some(guard),
            )
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(false).init(),
    }

    tracing::debug!("lights-out {} started with log level: {:?}", VERSION, level);
    Ok(guard)
}

/// Where the configuration comes from
enum ConfigSource {
    File(PathBuf),
    Parameter { name: String, store: AwsClient },
}

impl ConfigSource {
    async fn resolve(args: &ConfigArgs) -> Result<Self> {
        if let Some(name) = &args.parameter {
            let store = AwsClient::from_env(args.region.as_deref()).await?;
            return Ok(Self::Parameter {
                name: name.clone(),
                store,
            });
        }
        let path = args
            .config
            .clone()
            .or_else(config::default_config_path)
            .context("No configuration given; use --config or --parameter")?;
        Ok(Self::File(path))
    }

    fn cache_key(&self) -> String {
        match self {
            Self::File(path) => format!("file:{}", path.display()),
            Self::Parameter { name, .. } => format!("ssm:{}", name),
        }
    }

    async fn load(&self) -> Result<LightsOutConfig, ConfigLoadError> {
        match self {
            Self::File(path) => config::load_from_file(path),
            Self::Parameter { name, store } => config::load_from_parameter_store(store, name).await,
        }
    }

    /// Read through the process-wide cache
    async fn cached(&self, cache: &ConfigCache) -> Result<Arc<LightsOutConfig>> {
        Ok(cache.get_or_load(&self.cache_key(), || self.load()).await?)
    }
}

async fn build_provider(args: &ConfigArgs, config: &LightsOutConfig) -> Result<Arc<dyn CloudProvider>> {
    let region = args.region.as_deref().or(config.region.as_deref());
    Ok(Arc::new(AwsProvider::from_env(region).await?))
}

fn load_descriptors(
    path: &Path,
    environment: Option<&str>,
    config: &LightsOutConfig,
) -> Result<Vec<ResourceDescriptor>> {
    let filter = DiscoveryFilter::new(environment, &config.discovery.tags);
    let resources = load_resources(path, &filter)?;
    tracing::info!("Discovered {} managed resource(s)", resources.len());
    Ok(resources)
}

async fn run(args: RunArgs, cache: &ConfigCache) -> Result<ExitCode> {
    let source = ConfigSource::resolve(&args.config).await?;
    let config = source.cached(cache).await?;
    let environment = args.environment.clone().or_else(|| config.environment.clone());
    let resources = load_descriptors(&args.resources, environment.as_deref(), &config)?;

    let registry = Arc::new(HandlerRegistry::with_defaults(
        build_provider(&args.config, &config).await?,
    ));
    let mut orchestrator = Orchestrator::new(registry).with_notifier(Arc::new(LogNotifier {
        detail_level: DetailLevel::Detailed,
    }));
    if config.notifications.enabled {
        for url in config.notifications.webhooks.iter().chain(&args.webhook) {
            orchestrator = orchestrator.with_notifier(Arc::new(WebhookNotifier::new(url)?));
        }
    }
    if let Some(secs) = args.time_budget {
        orchestrator = orchestrator.with_time_budget(Duration::from_secs(secs));
    }

    let identity = args
        .identity
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string());
    let mut request = BatchRequest::new(resources, args.action, TriggerSource::new(args.trigger, identity))
        .dry_run(args.dry_run);
    if let Some(env) = environment {
        request = request.with_environment(env);
    }

    let batch = orchestrator
        .run_cached(request, cache, &source.cache_key(), || source.load())
        .await?;
    println!("{}", serde_json::to_string_pretty(&batch.to_report())?);

    Ok(if batch.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn status(args: StatusArgs, cache: &ConfigCache) -> Result<ExitCode> {
    let loaded = match ConfigSource::resolve(&args.config).await {
        Ok(source) => source.cached(cache).await,
        Err(e) => Err(e),
    };
    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {:#}", e);
        Arc::new(LightsOutConfig::default())
    });
    let environment = args.environment.or_else(|| config.environment.clone());
    let resources = load_descriptors(&args.resources, environment.as_deref(), &config)?;

    let registry = Arc::new(HandlerRegistry::with_defaults(
        build_provider(&args.config, &config).await?,
    ));
    let entries = Orchestrator::new(registry).status(&resources, &config).await;
    println!("{}", serde_json::to_string_pretty(&entries)?);

    Ok(if entries.iter().all(|e| e.error.is_none()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn validate(args: ConfigArgs, cache: &ConfigCache) -> Result<ExitCode> {
    let config = ConfigSource::resolve(&args).await?.cached(cache).await?;

    let mut kinds: Vec<&String> = config.resource_defaults.keys().collect();
    kinds.sort();
    for kind in kinds {
        let Some(check) = builtin_validator(kind) else {
            tracing::warn!("No handler registered for kind '{}'", kind);
            continue;
        };
        if let Some(action_config) = config.action_config(kind) {
            check(action_config).with_context(|| format!("Invalid configuration for {}", kind))?;
        }
    }

    println!(
        "Configuration valid (version {}, {} resource kind(s))",
        config.version,
        config.resource_defaults.len()
    );
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match setup_logging(cli.log_level, cli.log_format, cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    let cache = ConfigCache::with_system_clock(DEFAULT_CONFIG_TTL);
    let result = match cli.command {
        Command::Run(args) => run(args, &cache).await,
        Command::Status(args) => status(args, &cache).await,
        Command::Validate(args) => validate(args, &cache).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
