use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerProfile, StoredBroker};
use crate::context::{is_http, ContextAlias};
use crate::error::{failure_sites, ConfigStep, ErrorKind, NgsiError, NgsiResult};

mod storage;

pub use self::storage::{ConfigHandle, ConfigStorage, FsStorage};

/// Location of the configuration file relative to the home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".config/fiware/ngsi-rs-config.json";

const CONFIG_VERSION: u32 = 1;

failure_sites! {
    pub enum LoadSite for "load_config" { HomeDir, ResolvePath, Open, Decode, Validate }
}

failure_sites! {
    pub enum ValidateSite for "validate_config" { Invalid }
}

failure_sites! {
    pub enum SaveSite for "save_config" { Open, Truncate, Encode }
}

failure_sites! {
    pub enum PreviousArgsSite for "save_previous_args" { Save }
}

failure_sites! {
    pub enum SettingsSite for "update_settings" { Save }
}

fn default_true() -> bool {
    true
}

/// Last-used command-line values, reused when the user omits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousArgs {
    #[serde(default = "default_true")]
    pub use_previous_args: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog: Option<String>,
}

impl Default for PreviousArgs {
    fn default() -> Self {
        Self {
            use_previous_args: true,
            host: None,
            tenant: None,
            scope: None,
            stderr: None,
            syslog: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFileData {
    version: u32,
    #[serde(default)]
    brokers: Vec<StoredBroker>,
    #[serde(default)]
    contexts: Vec<ContextAlias>,
    #[serde(default)]
    previous_args: PreviousArgs,
}

/// Everything the configuration file holds, already validated into typed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ConfigState {
    pub(crate) brokers: Vec<BrokerProfile>,
    pub(crate) contexts: Vec<ContextAlias>,
    pub(crate) previous_args: PreviousArgs,
}

impl ConfigState {
    fn from_file(data: ConfigFileData) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        let mut brokers = Vec::with_capacity(data.brokers.len());
        for stored in data.brokers {
            match BrokerProfile::from_stored(stored) {
                Ok(profile) => brokers.push(profile),
                Err(problem) => problems.push(problem),
            }
        }
        if !problems.is_empty() {
            return Err(problems);
        }
        Ok(Self {
            brokers,
            contexts: data.contexts,
            previous_args: data.previous_args,
        })
    }

    fn to_file(&self) -> ConfigFileData {
        ConfigFileData {
            version: CONFIG_VERSION,
            brokers: self.brokers.iter().map(BrokerProfile::to_stored).collect(),
            contexts: self.contexts.clone(),
            previous_args: self.previous_args.clone(),
        }
    }

    pub(crate) fn find_broker(&self, alias: &str) -> Option<&BrokerProfile> {
        self.brokers.iter().find(|b| b.alias == alias)
    }

    pub(crate) fn find_context(&self, alias: &str) -> Option<&ContextAlias> {
        self.contexts.iter().find(|c| c.alias == alias)
    }

    /// Every structural invariant the state violates, in a stable order.
    pub(crate) fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for context in &self.contexts {
            if context.alias.trim().is_empty() {
                problems.push("context alias is empty".to_string());
            }
            if !seen.insert(context.alias.as_str()) {
                problems.push(format!("context {} is duplicated", context.alias));
            }
            if !is_http(&context.uri) {
                problems.push(format!("context {}: {} is not url", context.alias, context.uri));
            }
        }

        let mut seen = HashSet::new();
        for broker in &self.brokers {
            if broker.alias.trim().is_empty() {
                problems.push("broker alias is empty".to_string());
            }
            if !seen.insert(broker.alias.as_str()) {
                problems.push(format!("broker {} is duplicated", broker.alias));
            }
            if let Some(context) = broker.context.as_deref() {
                if !is_http(context) && self.find_context(context).is_none() {
                    problems.push(format!("broker {}: context {} not found", broker.alias, context));
                }
            }
            if let Some(scope) = broker.scope.as_deref() {
                if !scope.starts_with('/') {
                    problems.push(format!(
                        "broker {}: scope {} must start with /",
                        broker.alias, scope
                    ));
                }
            }
            if let Some(parent) = broker.inherit.as_deref() {
                if self.find_broker(parent).is_none() {
                    problems.push(format!("broker {}: inherit {} not found", broker.alias, parent));
                } else if self.inherit_cycle(&broker.alias) {
                    problems.push(format!("broker {}: inherit cycle", broker.alias));
                }
            }
        }

        problems
    }

    fn inherit_cycle(&self, alias: &str) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(alias);
        while let Some(name) = current {
            if !visited.insert(name) {
                return true;
            }
            current = self.find_broker(name).and_then(|b| b.inherit.as_deref());
        }
        false
    }
}

/// The configuration registry: broker profiles, context aliases and the previous-arguments
/// cache, loaded from and saved to a single JSON file.
pub struct Config {
    storage: Box<dyn ConfigStorage>,
    path: Option<PathBuf>,
    pub(crate) state: ConfigState,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

impl Config {
    /// Load the configuration file.
    ///
    /// `name` overrides the default location; an empty name keeps the registry in memory
    /// only. A missing file is a first run and yields an empty registry.
    pub fn load(storage: Box<dyn ConfigStorage>, name: Option<&str>) -> NgsiResult<Self> {
        let path = match name {
            Some("") => None,
            Some(name) => Some(storage.absolute(Path::new(name)).map_err(|e| {
                NgsiError::new(
                    LoadSite::ResolvePath,
                    ErrorKind::ConfigFile(ConfigStep::ResolvePath),
                    format!("{} {}", e, name),
                )
            })?),
            None => {
                let home = storage.home_dir().map_err(|e| {
                    NgsiError::new(
                        LoadSite::HomeDir,
                        ErrorKind::ConfigFile(ConfigStep::HomeDir),
                        e.to_string(),
                    )
                })?;
                Some(home.join(DEFAULT_CONFIG_FILE))
            }
        };

        let state = match path.as_deref() {
            Some(path) if storage.exists(path) => read_state(storage.as_ref(), path)?,
            _ => ConfigState::default(),
        };

        let problems = state.violations();
        if !problems.is_empty() {
            return Err(config_file_error(problems));
        }

        tracing::debug!(path = ?path, brokers = state.brokers.len(), "configuration loaded");
        Ok(Self {
            storage,
            path,
            state,
        })
    }

    /// A registry that never touches the file system.
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(FsStorage),
            path: None,
            state: ConfigState::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn previous_args(&self) -> &PreviousArgs {
        &self.state.previous_args
    }

    /// Persist `args` unless the user turned previous arguments off.
    pub fn save_previous_args(&mut self, args: PreviousArgs) -> NgsiResult<()> {
        if !self.state.previous_args.use_previous_args {
            return Ok(());
        }
        let mut next = self.state.clone();
        next.previous_args = PreviousArgs {
            use_previous_args: true,
            ..args
        };
        if next == self.state {
            return Ok(());
        }
        self.commit(next)
            .map_err(|e| NgsiError::wrap(PreviousArgsSite::Save, e))
    }

    pub fn set_use_previous_args(&mut self, enabled: bool) -> NgsiResult<()> {
        let mut next = self.state.clone();
        next.previous_args.use_previous_args = enabled;
        self.commit(next).map_err(|e| NgsiError::wrap(SettingsSite::Save, e))
    }

    /// Forget cached values, keeping the on/off switch.
    pub fn clear_previous_args(&mut self) -> NgsiResult<()> {
        let mut next = self.state.clone();
        next.previous_args = PreviousArgs {
            use_previous_args: self.state.previous_args.use_previous_args,
            ..PreviousArgs::default()
        };
        self.commit(next).map_err(|e| NgsiError::wrap(SettingsSite::Save, e))
    }

    /// Save `next` and adopt it; on failure the in-memory state is left untouched.
    pub(crate) fn commit(&mut self, next: ConfigState) -> NgsiResult<()> {
        validate(&next)?;
        self.persist(&next)?;
        self.state = next;
        Ok(())
    }

    fn persist(&self, state: &ConfigState) -> NgsiResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let mut handle = self.storage.open(path).map_err(|e| {
            NgsiError::new(
                SaveSite::Open,
                ErrorKind::ConfigFile(ConfigStep::Open),
                e.to_string(),
            )
        })?;
        handle.truncate().map_err(|e| {
            NgsiError::new(
                SaveSite::Truncate,
                ErrorKind::ConfigFile(ConfigStep::Truncate),
                e.to_string(),
            )
        })?;
        let encode_error = |message: String| {
            NgsiError::new(
                SaveSite::Encode,
                ErrorKind::ConfigFile(ConfigStep::Encode),
                message,
            )
        };
        let raw = serde_json::to_vec_pretty(&state.to_file()).map_err(|e| encode_error(e.to_string()))?;
        handle.write_all(&raw).map_err(|e| encode_error(e.to_string()))?;

        tracing::info!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Structural check run before any state is written.
fn validate(state: &ConfigState) -> NgsiResult<()> {
    let problems = state.violations();
    if problems.is_empty() {
        return Ok(());
    }
    Err(NgsiError::new(
        ValidateSite::Invalid,
        ErrorKind::ConfigFile(ConfigStep::Validate),
        problems.join("; "),
    ))
}

fn read_state(storage: &dyn ConfigStorage, path: &Path) -> NgsiResult<ConfigState> {
    let raw = storage.read(path).map_err(|e| {
        NgsiError::new(
            LoadSite::Open,
            ErrorKind::ConfigFile(ConfigStep::Open),
            e.to_string(),
        )
    })?;
    let data: ConfigFileData = serde_json::from_str(&raw).map_err(|e| {
        NgsiError::new(
            LoadSite::Decode,
            ErrorKind::ConfigFile(ConfigStep::Decode),
            e.to_string(),
        )
    })?;
    ConfigState::from_file(data).map_err(config_file_error)
}

fn config_file_error(problems: Vec<String>) -> NgsiError {
    for problem in &problems {
        tracing::error!("{}", problem);
    }
    NgsiError::new(
        LoadSite::Validate,
        ErrorKind::ConfigFile(ConfigStep::Validate),
        "error in config file",
    )
}
