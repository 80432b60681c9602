//! snow - command line access to a ServiceNow instance
//!
//! Sends one authenticated REST request and prints the response body to
//! stdout, or writes a configuration template.
//!
//! # Configuration
//!
//! The YAML file is taken from `--config`, `SNOW_CONFIG`, or `config.yaml`.
//! Secrets can stay out of it (environment variables or a `.env` file):
//!
//! - `SNOW_PASSWORD`: Basic Authentication password
//! - `SNOW_OAUTH_CLIENT_SECRET`: OAuth client secret
//!
//! # Usage
//!
//! ```bash
//! snow init --kerberos --output config.yaml
//! snow get /api/now/v2/table/incident --param sysparm_query=number=INC0426232
//! snow post /api/now/v2/table/incident --data '{"short_description":"Test"}'
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

use snow_client::config::{ConfigTemplate, LogConfig};
use snow_client::{AuthSession, HttpMethod, RequestOptions, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "snow", version, about = "ServiceNow REST client with SSO/OAuth and Basic authentication")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "SNOW_CONFIG",
        default_value = "config.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a configuration template.
    Init(InitArgs),
    /// Read records.
    Get(RequestArgs),
    /// Insert a record.
    Post(WriteArgs),
    /// Update a record.
    Put(WriteArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Template for Basic Authentication.
    #[arg(long, conflicts_with = "kerberos", required_unless_present = "kerberos")]
    basic: bool,

    /// Template for Kerberos SSO + OAuth.
    #[arg(long)]
    kerberos: bool,

    /// Where to write the template.
    #[arg(long, short = 'o', default_value = "config.yaml")]
    output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Instance-relative URL, e.g. /api/now/v2/table/incident.
    url: String,

    /// Query parameter, repeatable.
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct WriteArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// JSON request body.
    #[arg(long, short = 'd')]
    data: String,
}

fn parse_param(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", input)),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (ignore errors if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Init(args) => {
            let _guard = init_tracing(None)?;
            write_template(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Get(args) => run_request(&cli.config, HttpMethod::Get, args, None).await,
        Command::Post(args) => {
            run_request(&cli.config, HttpMethod::Post, args.request, Some(args.data)).await
        }
        Command::Put(args) => {
            run_request(&cli.config, HttpMethod::Put, args.request, Some(args.data)).await
        }
    }
}

/// Logs to stderr, or to the file named by an enabled `log` block.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(log: Option<&LogConfig>) -> Result<Option<WorkerGuard>> {
    let default_filter = match log {
        Some(log) if log.enabled => {
            let level = log.level.as_directive();
            format!("snow_client={level},snow={level}")
        }
        _ => "snow_client=info".to_string(),
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let Some((log, path)) = log.and_then(|log| log.active_file().map(|path| (log, path))) else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snow.log");
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(log.file_rotations as usize)
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn write_template(args: &InitArgs) -> Result<()> {
    let template = if args.kerberos {
        ConfigTemplate::Kerberos
    } else {
        ConfigTemplate::Basic
    };

    if args.output.exists() && !args.force {
        bail!(
            "{} already exists, use --force to overwrite it",
            args.output.display()
        );
    }

    std::fs::write(&args.output, template.render())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    tracing::info!(path = %args.output.display(), template = ?template, "Configuration template written");
    Ok(())
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    let mut config = SessionConfig::from_yaml_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if let Ok(password) = std::env::var("SNOW_PASSWORD") {
        config.set_basic_auth_password(password);
    }
    if let Ok(secret) = std::env::var("SNOW_OAUTH_CLIENT_SECRET") {
        config.set_oauth_client_secret(secret);
    }
    Ok(config)
}

async fn run_request(
    config_path: &Path,
    method: HttpMethod,
    args: RequestArgs,
    data: Option<String>,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let _guard = init_tracing(Some(&config.log))?;

    tracing::info!("snow v{}", env!("CARGO_PKG_VERSION"));

    let mut options = args
        .params
        .into_iter()
        .fold(RequestOptions::new(), |options, (key, value)| {
            options.with_param(key, value)
        });
    if let Some(data) = data {
        serde_json::from_str::<serde_json::Value>(&data).context("--data is not valid JSON")?;
        options = options.with_body(data);
    }

    let mut session = AuthSession::new(config).context("Failed to create session")?;
    let response = session
        .perform(method, &args.url, options)
        .await
        .with_context(|| format!("{} {} failed", method, args.url))?;

    eprintln!("{}", response.status());
    println!("{}", response.text());

    if response.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
