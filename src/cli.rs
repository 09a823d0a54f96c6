use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::dispatch::BatchOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Parser)]
#[command(name = "ngsi")]
#[command(about = "Command-line client for FIWARE NGSI v2 and NGSI-LD context brokers")]
pub struct Cli {
    /// Configuration file. An empty value keeps the registry in memory.
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Log level written to stderr.
    #[arg(long, global = true, value_enum)]
    pub stderr: Option<LogLevel>,
    /// System log level. Recorded with the previous arguments; no syslog sink is installed.
    #[arg(long, global = true, value_enum)]
    pub syslog: Option<LogLevel>,
    /// HTTP timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Broker {
        #[command(subcommand)]
        command: BrokerCommand,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommand,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    Batch {
        #[command(subcommand)]
        command: BatchCommand,
    },
    Entity {
        #[command(subcommand)]
        command: EntityCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BrokerCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Get {
        #[arg(long)]
        host: String,
        #[arg(long)]
        json: bool,
    },
    Add {
        #[arg(long)]
        host: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        ngsi_type: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    Update {
        #[arg(long)]
        host: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        ngsi_type: Option<String>,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    Delete {
        #[arg(long)]
        host: String,
    },
}

/// Optional broker settings shared by `broker add` and `broker update`.
#[derive(Debug, Clone, Default, Args)]
pub struct ProfileArgs {
    /// Default JSON-LD context: alias or URI.
    #[arg(long)]
    pub context: Option<String>,
    #[arg(long)]
    pub tenant: Option<String>,
    #[arg(long)]
    pub scope: Option<String>,
    #[arg(long)]
    pub inherit: Option<String>,
    #[arg(long, conflicts_with_all = ["username", "auth_header"])]
    pub token: Option<String>,
    #[arg(long, requires = "password", conflicts_with = "auth_header")]
    pub username: Option<String>,
    #[arg(long, requires = "username")]
    pub password: Option<String>,
    /// Custom credential header, `NAME=VALUE`.
    #[arg(long)]
    pub auth_header: Option<String>,
    /// Drop stored credentials.
    #[arg(long, conflicts_with_all = ["token", "username", "auth_header"])]
    pub clear_auth: bool,
}

#[derive(Debug, Subcommand)]
pub enum ContextCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Get {
        #[arg(long)]
        name: String,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        uri: String,
    },
    Update {
        #[arg(long)]
        name: String,
        #[arg(long)]
        uri: String,
    },
    Delete {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Turn reuse of previous arguments on or off.
    PreviousArgs {
        #[arg(value_enum)]
        mode: Toggle,
    },
    /// Forget cached previous arguments.
    Clear,
}

/// Broker selection shared by every command that talks to a broker.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Broker alias. Defaults to the previously used broker.
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub tenant: Option<String>,
    #[arg(long)]
    pub scope: Option<String>,
    /// JSON-LD context alias or URI sent as the Link header.
    #[arg(long)]
    pub link: Option<String>,
    /// Extra request header, `NAME=VALUE`.
    #[arg(long)]
    pub header: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// JSON payload, or `@path` to read it from a file.
    #[arg(long)]
    pub data: String,
    #[arg(long)]
    pub key_values: bool,
    #[arg(long)]
    pub no_overwrite: bool,
    #[arg(long)]
    pub replace: bool,
}

#[derive(Debug, Subcommand)]
pub enum BatchCommand {
    Create(BatchArgs),
    Update(BatchArgs),
    Upsert(BatchArgs),
    Delete(BatchArgs),
}

impl BatchCommand {
    pub fn into_parts(self) -> (BatchOp, BatchArgs) {
        match self {
            BatchCommand::Create(args) => (BatchOp::Create, args),
            BatchCommand::Update(args) => (BatchOp::Update, args),
            BatchCommand::Upsert(args) => (BatchOp::Upsert, args),
            BatchCommand::Delete(args) => (BatchOp::Delete, args),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum EntityCommand {
    Create {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        data: String,
        #[arg(long)]
        safe_string: bool,
    },
    Get {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        id: String,
        #[arg(long = "type")]
        entity_type: Option<String>,
        #[arg(long)]
        attrs: Option<String>,
        #[arg(long)]
        key_values: bool,
        #[arg(long)]
        safe_string: bool,
    },
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        id: String,
        #[arg(long = "type")]
        entity_type: Option<String>,
    },
}
