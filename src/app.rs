use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::broker::{AuthMode, BrokerProfile};
use crate::cli::{
    BatchArgs, BrokerCommand, Cli, Command, ContextCommand, EntityCommand, LogLevel,
    ProfileArgs, SettingsCommand, TargetArgs, Toggle,
};
use crate::client::{Client, ClientBuilder};
use crate::config::{Config, FsStorage, PreviousArgs};
use crate::dispatch::{BatchOp, BatchOptions, Dispatcher, ReadOptions};
use crate::display;
use crate::error::{NgsiError, NgsiResult};
use crate::paths;
use crate::transport::{Header, ReqwestTransport, Transport, DEFAULT_TIMEOUT};

pub fn run(cli: Cli) -> Result<(), String> {
    let flag_level = cli.stderr.map(LogLevel::as_str);

    // Violations found while loading are logged before the final level is known.
    let mut config = {
        let _guard = log_subscriber(flag_level).set_default();
        load_config(cli.config.as_deref()).map_err(|e| describe(&e))?
    };
    let level = log_level(flag_level, config.previous_args());
    if log_subscriber(level.as_deref()).try_init().is_err() {
        tracing::debug!("log subscriber already installed");
    }
    remember_log_levels(&mut config, flag_level, cli.syslog.map(LogLevel::as_str))?;

    match cli.command {
        Command::Broker { command } => run_broker(&mut config, command),
        Command::Context { command } => run_context(&mut config, command),
        Command::Settings { command } => run_settings(&mut config, command),
        Command::Batch { command } => {
            let dispatcher = http_dispatcher(cli.timeout)?;
            let (op, args) = command.into_parts();
            run_batch(&mut config, &dispatcher, op, args)
        }
        Command::Entity { command } => {
            let dispatcher = http_dispatcher(cli.timeout)?;
            run_entity(&mut config, &dispatcher, command)
        }
    }
}

/// `--config` wins over `NGSI_CONFIG`, which wins over the default location.
pub fn load_config(name: Option<&str>) -> NgsiResult<Config> {
    let name = name.map(str::to_string).or_else(paths::config_file_override);
    Config::load(Box::new(FsStorage), name.as_deref())
}

fn log_subscriber(level: Option<&str>) -> impl tracing::Subscriber + Send + Sync + 'static {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
}

fn log_level(flag: Option<&str>, previous: &PreviousArgs) -> Option<String> {
    match flag {
        Some(level) => Some(level.to_string()),
        None if previous.use_previous_args => previous.stderr.clone(),
        None => None,
    }
}

/// Record the log levels given on the command line. Levels not given keep their cached value.
fn remember_log_levels(
    config: &mut Config,
    stderr: Option<&str>,
    syslog: Option<&str>,
) -> Result<(), String> {
    if stderr.is_none() && syslog.is_none() {
        return Ok(());
    }
    let previous = config.previous_args().clone();
    config
        .save_previous_args(PreviousArgs {
            stderr: stderr.map(str::to_string).or(previous.stderr.clone()),
            syslog: syslog.map(str::to_string).or(previous.syslog.clone()),
            ..previous
        })
        .map_err(|e| describe(&e))
}

fn http_dispatcher(timeout: Option<u64>) -> Result<Dispatcher<ReqwestTransport>, String> {
    let timeout = timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
    let transport = ReqwestTransport::new(timeout).map_err(|e| e.to_string())?;
    Ok(Dispatcher::new(transport))
}

/// One line per wrapped failure, outermost first.
fn describe(err: &NgsiError) -> String {
    err.chain().join("\n")
}

fn run_broker(config: &mut Config, command: BrokerCommand) -> Result<(), String> {
    match command {
        BrokerCommand::List { json } => {
            let brokers = config.broker_list();
            if json {
                let list: Vec<Value> = brokers.iter().map(|b| display::broker_json(b)).collect();
                print_json(&list)
            } else {
                display::print_broker_list(&brokers);
                Ok(())
            }
        }
        BrokerCommand::Get { host, json } => {
            let profile = config.broker(&host).map_err(|e| describe(&e))?;
            if json {
                print_json(&display::broker_json(profile))
            } else {
                display::print_broker(profile);
                Ok(())
            }
        }
        BrokerCommand::Add {
            host,
            url,
            ngsi_type,
            profile,
        } => {
            let mut broker = BrokerProfile::new(&host, &url, &ngsi_type)?;
            apply_profile_args(&mut broker, profile)?;
            config.add_broker(broker).map_err(|e| describe(&e))?;
            print_broker_json(config, &host)
        }
        BrokerCommand::Update {
            host,
            url,
            ngsi_type,
            profile,
        } => {
            config
                .edit_broker(&host, |broker| {
                    if let Some(url) = url.as_deref() {
                        broker.set_url(url)?;
                    }
                    if let Some(ngsi_type) = ngsi_type.as_deref() {
                        broker.dialect = ngsi_type.parse()?;
                    }
                    apply_profile_args(broker, profile)
                })
                .map_err(|e| describe(&e))?;
            print_broker_json(config, &host)
        }
        BrokerCommand::Delete { host } => {
            config.remove_broker(&host).map_err(|e| describe(&e))?;
            print_json(&serde_json::json!({ "deleted": host }))
        }
    }
}

fn print_broker_json(config: &Config, host: &str) -> Result<(), String> {
    let profile = config.broker(host).map_err(|e| describe(&e))?;
    print_json(&display::broker_json(profile))
}

/// Apply optional settings. An empty value clears the setting.
fn apply_profile_args(profile: &mut BrokerProfile, args: ProfileArgs) -> Result<(), String> {
    fn set(slot: &mut Option<String>, value: Option<String>) {
        if let Some(value) = value {
            *slot = Some(value).filter(|v| !v.is_empty());
        }
    }
    set(&mut profile.context, args.context);
    set(&mut profile.tenant, args.tenant);
    set(&mut profile.scope, args.scope);
    set(&mut profile.inherit, args.inherit);

    if args.clear_auth {
        profile.auth = None;
    } else if let Some(token) = args.token {
        profile.auth = Some(AuthMode::Bearer { token });
    } else if let (Some(username), Some(password)) = (args.username, args.password) {
        profile.auth = Some(AuthMode::Basic { username, password });
    } else if let Some(raw) = args.auth_header {
        let (name, value) = parse_key_value_pair(&raw, "--auth-header")?;
        profile.auth = Some(AuthMode::Header { name, value });
    }
    Ok(())
}

fn run_context(config: &mut Config, command: ContextCommand) -> Result<(), String> {
    match command {
        ContextCommand::List { json } => {
            let contexts = config.context_list();
            if json {
                let list: Vec<Value> = contexts
                    .iter()
                    .map(|(alias, uri)| serde_json::json!({ "alias": alias, "uri": uri }))
                    .collect();
                print_json(&list)
            } else {
                display::print_context_list(&contexts);
                Ok(())
            }
        }
        ContextCommand::Get { name } => {
            let uri = config.context(&name).map_err(|e| describe(&e))?;
            println!("{}", uri);
            Ok(())
        }
        ContextCommand::Add { name, uri } => {
            config.add_context(&name, &uri).map_err(|e| describe(&e))?;
            print_json(&serde_json::json!({ "alias": name, "uri": uri }))
        }
        ContextCommand::Update { name, uri } => {
            config.update_context(&name, &uri).map_err(|e| describe(&e))?;
            print_json(&serde_json::json!({ "alias": name, "uri": uri }))
        }
        ContextCommand::Delete { name } => {
            config.delete_context(&name).map_err(|e| describe(&e))?;
            print_json(&serde_json::json!({ "deleted": name }))
        }
    }
}

fn run_settings(config: &mut Config, command: SettingsCommand) -> Result<(), String> {
    match command {
        SettingsCommand::List { json } => {
            if json {
                print_json(config.previous_args())
            } else {
                display::print_settings(config.previous_args(), config.path());
                Ok(())
            }
        }
        SettingsCommand::PreviousArgs { mode } => {
            config
                .set_use_previous_args(mode == Toggle::On)
                .map_err(|e| describe(&e))?;
            print_json(config.previous_args())
        }
        SettingsCommand::Clear => {
            config.clear_previous_args().map_err(|e| describe(&e))?;
            print_json(config.previous_args())
        }
    }
}

/// Build a client for `target`, falling back to cached previous arguments, and record what
/// was used.
fn connect(config: &mut Config, target: &TargetArgs, safe_string: bool) -> Result<Client, String> {
    let previous = config.previous_args().clone();
    let reuse = previous.use_previous_args && target.host.is_none();
    let cached = |value: &Option<String>| if reuse { value.clone() } else { None };

    let host = target.host.clone().or_else(|| cached(&previous.host));
    let tenant = target.tenant.clone().or_else(|| cached(&previous.tenant));
    let scope = target.scope.clone().or_else(|| cached(&previous.scope));

    let mut builder = ClientBuilder::new(config).safe_string(safe_string);
    if let Some(host) = &host {
        builder = builder.host(host.as_str());
    }
    if let Some(tenant) = &tenant {
        builder = builder.tenant(tenant.as_str());
    }
    if let Some(scope) = &scope {
        builder = builder.scope(scope.as_str());
    }
    if let Some(link) = &target.link {
        builder = builder.link(link.as_str());
    }
    for header in parse_headers(&target.header)? {
        builder = builder.header(header.name, header.value);
    }
    let client = builder.build().map_err(|e| describe(&e))?;

    config
        .save_previous_args(PreviousArgs {
            host: Some(client.alias().to_string()),
            tenant,
            scope,
            ..previous
        })
        .map_err(|e| describe(&e))?;
    Ok(client)
}

fn run_batch<T: Transport>(
    config: &mut Config,
    dispatcher: &Dispatcher<T>,
    op: BatchOp,
    args: BatchArgs,
) -> Result<(), String> {
    let client = connect(config, &args.target, false)?;
    let body = read_data(&args.data)?;
    let options = BatchOptions {
        key_values: args.key_values,
        no_overwrite: args.no_overwrite,
        replace: args.replace,
    };
    let response = dispatcher
        .batch(&client, op, &body, &options)
        .map_err(|e| describe(&e))?;
    print_body(&response.body)
}

fn run_entity<T: Transport>(
    config: &mut Config,
    dispatcher: &Dispatcher<T>,
    command: EntityCommand,
) -> Result<(), String> {
    match command {
        EntityCommand::Create {
            target,
            data,
            safe_string,
        } => {
            let client = connect(config, &target, safe_string)?;
            let body = read_data(&data)?;
            let response = dispatcher
                .create_entity(&client, &body)
                .map_err(|e| describe(&e))?;
            if let Some(location) = response.header("Location") {
                println!("{}", location);
            }
            Ok(())
        }
        EntityCommand::Get {
            target,
            id,
            entity_type,
            attrs,
            key_values,
            safe_string,
        } => {
            let client = connect(config, &target, safe_string)?;
            let options = ReadOptions {
                entity_type,
                attrs,
                key_values,
            };
            let body = dispatcher
                .read_entity(&client, &id, &options)
                .map_err(|e| describe(&e))?;
            print_body(&body)
        }
        EntityCommand::Delete {
            target,
            id,
            entity_type,
        } => {
            let client = connect(config, &target, false)?;
            dispatcher
                .delete_entity(&client, &id, entity_type.as_deref())
                .map_err(|e| describe(&e))
        }
    }
}

/// `@path` reads the payload from a file; anything else is the payload itself.
fn read_data(raw: &str) -> Result<Vec<u8>, String> {
    match raw.strip_prefix('@') {
        Some(path) => {
            std::fs::read(path).map_err(|e| format!("failed reading '{}': {}", path, e))
        }
        None => Ok(raw.as_bytes().to_vec()),
    }
}

fn parse_headers(raw_headers: &[String]) -> Result<Vec<Header>, String> {
    let mut headers = Vec::new();
    for raw in raw_headers {
        let (name, value) = parse_key_value_pair(raw, "--header")?;
        headers.push(Header { name, value });
    }
    Ok(headers)
}

fn parse_key_value_pair(raw: &str, flag: &str) -> Result<(String, String), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("invalid {} '{}'; expected KEY=VALUE", flag, raw));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid {} '{}'; key cannot be empty", flag, raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_body(body: &[u8]) -> Result<(), String> {
    if body.is_empty() {
        return Ok(());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => print_json(&value),
        Err(_) => {
            println!("{}", String::from_utf8_lossy(body));
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", raw);
    Ok(())
}
