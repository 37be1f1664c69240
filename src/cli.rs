//! Command surface
//!
//! Flag parsing, configuration resolution and output for the `volrepl`
//! binary. Each invocation performs at most one remote call.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::config::{parse_duration, ClientConfig, FileConfig};
use crate::error::Result;
use crate::network::{ConnectionLossPolicy, ReplicationControl, Session};
use crate::replication::{
    build_request, Operation, ReplicationArgs, ReplicationRequest, ReplicationResponse,
};

/// Log level used when neither flag, config file nor RUST_LOG sets one
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// CLI for volume replication
#[derive(Parser, Debug)]
#[command(name = "volrepl")]
#[command(version, about = "CLI for volume replication")]
#[command(long_about = "CLI tool to communicate with the volume replication controller \
to enable/disable unidirectional or bidirectional replication")]
pub struct Cli {
    /// Controller endpoint (env CSI_ADDRESS, default /run/csi/socket)
    #[arg(long, global = true)]
    pub csi_address: Option<String>,

    /// Call timeout, e.g. 30s, 500ms, 1m30s [default: 30s]
    #[arg(long, global = true, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Path to an optional config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replication commands
    Replication {
        #[command(subcommand)]
        command: Option<ReplicationCommand>,
    },
    /// Wait until the controller reports ready
    Probe,
    /// Print the controller's driver name
    DriverName,
}

#[derive(Subcommand, Debug)]
pub enum ReplicationCommand {
    /// Enable replication on a volume
    #[command(after_help = "Example: volrepl replication enable --parameters=mode=snapshot <VOLUME_ID>")]
    Enable(VolumeArgs),
    /// Disable replication on a volume
    #[command(after_help = "Example: volrepl replication disable --force=true <VOLUME_ID>")]
    Disable(ForceArgs),
    /// Promote volume as primary
    #[command(after_help = "Example: volrepl replication promote --force=true <VOLUME_ID>")]
    Promote(ForceArgs),
    /// Demote volume as secondary
    #[command(after_help = "Example: volrepl replication demote --force=true <VOLUME_ID>")]
    Demote(ForceArgs),
    /// Resync volume to correct split-brain
    #[command(after_help = "Example: volrepl replication resync --force=true <VOLUME_ID>")]
    Resync(ForceArgs),
}

#[derive(Args, Debug)]
pub struct VolumeArgs {
    /// Volume identifier
    pub volume_id: Option<String>,

    /// Parameters to send to the backend (key=value,...)
    #[arg(long, value_parser = parse_key_values)]
    pub parameters: Vec<KeyValues>,

    /// Secrets to send to the backend (key=value,...)
    #[arg(long, value_parser = parse_key_values)]
    pub secrets: Vec<KeyValues>,
}

/// Pairs carried by one `--parameters` or `--secrets` value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValues(pub Vec<(String, String)>);

#[derive(Args, Debug)]
pub struct ForceArgs {
    #[command(flatten)]
    pub volume: VolumeArgs,

    /// Perform force operation
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = parse_bool
    )]
    pub force: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl ReplicationCommand {
    /// Split into the operation and its raw arguments
    pub fn into_parts(self) -> (Operation, ReplicationArgs) {
        let (operation, volume, force) = match self {
            ReplicationCommand::Enable(volume) => (Operation::Enable, volume, None),
            ReplicationCommand::Disable(args) => (Operation::Disable, args.volume, args.force),
            ReplicationCommand::Promote(args) => (Operation::Promote, args.volume, args.force),
            ReplicationCommand::Demote(args) => (Operation::Demote, args.volume, args.force),
            ReplicationCommand::Resync(args) => (Operation::Resync, args.volume, args.force),
        };

        let args = ReplicationArgs {
            volume_id: volume.volume_id,
            parameters: volume.parameters.into_iter().flat_map(|kv| kv.0).collect(),
            secrets: volume.secrets.into_iter().flat_map(|kv| kv.0).collect(),
            force,
        };
        (operation, args)
    }
}

/// A parsed command line with its configuration resolved
#[derive(Debug)]
pub struct Invocation {
    pub config: ClientConfig,
    pub log_level: String,
    pub output: OutputFormat,
    pub command: Option<Commands>,
}

impl Invocation {
    /// Resolve configuration from flags, the endpoint environment variable
    /// and the optional config file
    pub fn from_cli(cli: Cli, address_env: Option<String>) -> Result<Self> {
        let file = cli
            .config
            .as_deref()
            .map(FileConfig::from_file)
            .transpose()?;

        let config = ClientConfig::resolve(
            cli.csi_address.as_deref(),
            address_env.as_deref(),
            cli.timeout,
            file.as_ref(),
        )?;

        let log_level = cli
            .log_level
            .or_else(|| file.and_then(|f| f.log_level))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            config,
            log_level,
            output: cli.output,
            command: cli.command,
        })
    }
}

/// Run an invocation and return the text to print on success
pub async fn run(invocation: Invocation, policy: ConnectionLossPolicy) -> Result<String> {
    let Invocation {
        config,
        output,
        command,
        ..
    } = invocation;

    let Some(command) = command else {
        return Ok(help(None));
    };

    match command {
        Commands::Replication { command: None } => Ok(help(Some("replication"))),
        Commands::Replication {
            command: Some(command),
        } => {
            let (operation, args) = command.into_parts();
            // Usage errors surface here, before any connection is made
            let request = build_request(operation, args)?;

            let mut session = Session::connect_with_policy(&config, policy).await?;
            let response = replicate(&mut session, &request, config.timeout).await?;
            Ok(render_replication(output, &request, &response))
        }
        Commands::Probe => {
            let mut session = Session::connect_with_policy(&config, policy).await?;
            session.probe(config.timeout).await?;
            Ok(render_probe(output, &config))
        }
        Commands::DriverName => {
            let mut session = Session::connect_with_policy(&config, policy).await?;
            let name = session.driver_name(config.timeout).await?;
            Ok(render_driver_name(output, &name))
        }
    }
}

/// Send one request. Failures are returned untouched and never retried.
pub async fn replicate<C: ReplicationControl + ?Sized>(
    control: &mut C,
    request: &ReplicationRequest,
    timeout: Duration,
) -> Result<ReplicationResponse> {
    let response = control.call(request, timeout).await?;
    tracing::info!(
        rpc = request.operation.rpc_name(),
        volume_id = %request.volume_id,
        "Controller acknowledged request"
    );
    Ok(response)
}

fn render_replication(
    output: OutputFormat,
    request: &ReplicationRequest,
    response: &ReplicationResponse,
) -> String {
    match output {
        OutputFormat::Text => response.operation.success_message(&request.volume_id),
        OutputFormat::Json => serde_json::json!({
            "operation": response.operation,
            "rpc": response.operation.rpc_name(),
            "volume_id": request.volume_id,
            "status": "ok",
        })
        .to_string(),
    }
}

fn render_probe(output: OutputFormat, config: &ClientConfig) -> String {
    match output {
        OutputFormat::Text => format!("controller at {} is ready", config.endpoint),
        OutputFormat::Json => serde_json::json!({
            "endpoint": config.endpoint.to_string(),
            "ready": true,
        })
        .to_string(),
    }
}

fn render_driver_name(output: OutputFormat, name: &str) -> String {
    match output {
        OutputFormat::Text => name.to_string(),
        OutputFormat::Json => serde_json::json!({ "driver_name": name }).to_string(),
    }
}

/// Help text for the root command or one of its subcommands
fn help(subcommand: Option<&str>) -> String {
    let mut command = Cli::command();
    if let Some(name) = subcommand {
        if let Some(sub) = command.find_subcommand_mut(name) {
            return sub.render_help().to_string();
        }
    }
    command.render_help().to_string()
}

/// Parse `key=value,...`.
///
/// A value with a single `=` is one pair, commas included. Otherwise the
/// value is split as a CSV record, so `"k=a,b"` keeps its comma.
fn parse_key_values(s: &str) -> std::result::Result<KeyValues, String> {
    let fields = match s.matches('=').count() {
        0 => return Err(format!("{} must be formatted as key=value", s)),
        1 => vec![s.trim_matches('"').to_string()],
        _ => split_csv_record(s)?,
    };

    fields
        .iter()
        .map(|field| match field.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => Err(format!("{} must be formatted as key=value", field)),
        })
        .collect::<std::result::Result<Vec<_>, String>>()
        .map(KeyValues)
}

/// Split one comma-separated record; quoted fields may hold commas and `""`
fn split_csv_record(s: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        let mut field = String::new();

        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err(format!("unterminated quote in {:?}", s)),
                }
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => {}
                Some(_) => return Err(format!("unexpected character after quote in {:?}", s)),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some(',') => break,
                    Some('"') => return Err(format!("bare quote in unquoted field in {:?}", s)),
                    Some(c) => field.push(c),
                }
            }
        }

        fields.push(field);
    }
}

/// Booleans in the forms 1, t, T, TRUE, true, True and their false forms
fn parse_bool(s: &str) -> std::result::Result<bool, String> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(format!("invalid boolean value {:?}", s)),
    }
}
