use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::context::is_http;
use crate::error::{failure_sites, ErrorKind, NgsiError, NgsiResult};

/// Wire dialect a broker speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    V2,
    Ld,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::V2 => "v2",
            Dialect::Ld => "ld",
        }
    }

    /// Path prefix every request of this dialect lives under.
    pub fn api_root(self) -> &'static str {
        match self {
            Dialect::V2 => "/v2",
            Dialect::Ld => "/ngsi-ld/v1",
        }
    }

    pub(crate) fn api_segments(self) -> &'static [&'static str] {
        match self {
            Dialect::V2 => &["v2"],
            Dialect::Ld => &["ngsi-ld", "v1"],
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "v2" => Ok(Dialect::V2),
            "ld" => Ok(Dialect::Ld),
            _ => Err(format!("{} is unknown ngsiType", raw)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static credentials applied to every request sent to a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMode {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerProfile {
    pub alias: String,
    pub url: Url,
    pub dialect: Dialect,
    /// Default JSON-LD context: a context alias or an absolute URI.
    pub context: Option<String>,
    pub tenant: Option<String>,
    pub scope: Option<String>,
    pub auth: Option<AuthMode>,
    /// Alias of a profile whose unset settings this one reuses.
    pub inherit: Option<String>,
}

/// On-disk shape of a broker profile. The dialect and URL stay raw text so that a bad value
/// is reported as an invalid config file rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredBroker {
    pub alias: String,
    pub url: String,
    pub ngsi_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
}

impl BrokerProfile {
    /// Build a profile from user-supplied text.
    pub fn new(alias: &str, url: &str, ngsi_type: &str) -> Result<Self, String> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err("broker alias is empty".to_string());
        }
        Ok(Self {
            alias: alias.to_string(),
            url: parse_broker_url(url)?,
            dialect: ngsi_type.parse()?,
            context: None,
            tenant: None,
            scope: None,
            auth: None,
            inherit: None,
        })
    }

    pub(crate) fn from_stored(stored: StoredBroker) -> Result<Self, String> {
        let url = parse_broker_url(&stored.url).map_err(|e| format!("broker {}: {}", stored.alias, e))?;
        let dialect = stored
            .ngsi_type
            .parse()
            .map_err(|e| format!("broker {}: {}", stored.alias, e))?;
        Ok(Self {
            alias: stored.alias,
            url,
            dialect,
            context: stored.context,
            tenant: stored.tenant,
            scope: stored.scope,
            auth: stored.auth,
            inherit: stored.inherit,
        })
    }

    pub(crate) fn to_stored(&self) -> StoredBroker {
        StoredBroker {
            alias: self.alias.clone(),
            url: self.url.to_string(),
            ngsi_type: self.dialect.as_str().to_string(),
            context: self.context.clone(),
            tenant: self.tenant.clone(),
            scope: self.scope.clone(),
            auth: self.auth.clone(),
            inherit: self.inherit.clone(),
        }
    }

    pub fn set_url(&mut self, raw: &str) -> Result<(), String> {
        self.url = parse_broker_url(raw)?;
        Ok(())
    }

    fn fill_from(&mut self, parent: &BrokerProfile) {
        if self.context.is_none() {
            self.context = parent.context.clone();
        }
        if self.tenant.is_none() {
            self.tenant = parent.tenant.clone();
        }
        if self.scope.is_none() {
            self.scope = parent.scope.clone();
        }
        if self.auth.is_none() {
            self.auth = parent.auth.clone();
        }
    }
}

fn parse_broker_url(raw: &str) -> Result<Url, String> {
    let raw = raw.trim();
    if !is_http(raw) {
        return Err(format!("{} is not url", raw));
    }
    Url::parse(raw).map_err(|e| format!("{}: {}", raw, e))
}

failure_sites! {
    pub enum AddBrokerSite for "add_broker" { Duplicate, Invalid, Save }
}

failure_sites! {
    pub enum UpdateBrokerSite for "update_broker" { NotFound, Invalid, Save }
}

failure_sites! {
    pub enum RemoveBrokerSite for "remove_broker" { NotFound, Referenced, Save }
}

failure_sites! {
    pub enum GetBrokerSite for "get_broker" { NotFound }
}

failure_sites! {
    pub enum ResolveBrokerSite for "resolve_broker" { NotFound, Inherit }
}

impl Config {
    pub fn add_broker(&mut self, profile: BrokerProfile) -> NgsiResult<()> {
        if self.state.find_broker(&profile.alias).is_some() {
            return Err(NgsiError::new(
                AddBrokerSite::Duplicate,
                ErrorKind::DuplicateAlias,
                format!("{} already exists", profile.alias),
            ));
        }
        let mut next = self.state.clone();
        next.brokers.push(profile);
        let problems = next.violations();
        if !problems.is_empty() {
            return Err(NgsiError::new(
                AddBrokerSite::Invalid,
                ErrorKind::InvalidValue,
                problems.join("; "),
            ));
        }
        self.commit(next)
            .map_err(|e| NgsiError::wrap(AddBrokerSite::Save, e))
    }

    pub fn update_broker(&mut self, profile: BrokerProfile) -> NgsiResult<()> {
        let Some(idx) = self
            .state
            .brokers
            .iter()
            .position(|b| b.alias == profile.alias)
        else {
            return Err(NgsiError::new(
                UpdateBrokerSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", profile.alias),
            ));
        };
        let mut next = self.state.clone();
        next.brokers[idx] = profile;
        let problems = next.violations();
        if !problems.is_empty() {
            return Err(NgsiError::new(
                UpdateBrokerSite::Invalid,
                ErrorKind::InvalidValue,
                problems.join("; "),
            ));
        }
        self.commit(next)
            .map_err(|e| NgsiError::wrap(UpdateBrokerSite::Save, e))
    }

    /// Change the profile registered as `alias` in place. The alias itself cannot change.
    pub fn edit_broker<F>(&mut self, alias: &str, edit: F) -> NgsiResult<()>
    where
        F: FnOnce(&mut BrokerProfile) -> Result<(), String>,
    {
        let mut profile = self.state.find_broker(alias).cloned().ok_or_else(|| {
            NgsiError::new(
                UpdateBrokerSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", alias),
            )
        })?;
        edit(&mut profile).map_err(|e| {
            NgsiError::new(UpdateBrokerSite::Invalid, ErrorKind::InvalidValue, e)
        })?;
        profile.alias = alias.to_string();
        self.update_broker(profile)
    }

    pub fn remove_broker(&mut self, alias: &str) -> NgsiResult<()> {
        if self.state.find_broker(alias).is_none() {
            return Err(NgsiError::new(
                RemoveBrokerSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", alias),
            ));
        }
        if let Some(child) = self
            .state
            .brokers
            .iter()
            .find(|b| b.inherit.as_deref() == Some(alias))
        {
            tracing::debug!(alias, referenced_by = %child.alias, "broker is inherited");
            return Err(NgsiError::new(
                RemoveBrokerSite::Referenced,
                ErrorKind::ReferencedAlias,
                format!("{} is referenced", alias),
            ));
        }
        let mut next = self.state.clone();
        next.brokers.retain(|b| b.alias != alias);
        if next.previous_args.host.as_deref() == Some(alias) {
            next.previous_args.host = None;
        }
        self.commit(next)
            .map_err(|e| NgsiError::wrap(RemoveBrokerSite::Save, e))
    }

    pub fn broker(&self, alias: &str) -> NgsiResult<&BrokerProfile> {
        self.state.find_broker(alias).ok_or_else(|| {
            NgsiError::new(
                GetBrokerSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", alias),
            )
        })
    }

    /// Profiles sorted by alias.
    pub fn broker_list(&self) -> Vec<&BrokerProfile> {
        let mut out: Vec<_> = self.state.brokers.iter().collect();
        out.sort_by(|a, b| a.alias.cmp(&b.alias));
        out
    }

    /// The profile registered as `alias` with its `inherit` chain folded in.
    pub fn resolve_broker(&self, alias: &str) -> NgsiResult<BrokerProfile> {
        let profile = self.state.find_broker(alias).ok_or_else(|| {
            NgsiError::new(
                ResolveBrokerSite::NotFound,
                ErrorKind::HostNotFound,
                format!("{} not found", alias),
            )
        })?;
        self.fold_inherited(profile.clone())
    }

    /// Fill unset settings of `profile` from its ancestors.
    pub(crate) fn fold_inherited(&self, mut profile: BrokerProfile) -> NgsiResult<BrokerProfile> {
        let mut visited = HashSet::new();
        visited.insert(profile.alias.clone());
        let mut next = profile.inherit.clone();
        while let Some(parent_alias) = next {
            if !visited.insert(parent_alias.clone()) {
                return Err(NgsiError::new(
                    ResolveBrokerSite::Inherit,
                    ErrorKind::InvalidValue,
                    format!("{}: inherit cycle at {}", profile.alias, parent_alias),
                ));
            }
            let parent = self.state.find_broker(&parent_alias).ok_or_else(|| {
                NgsiError::new(
                    ResolveBrokerSite::Inherit,
                    ErrorKind::HostNotFound,
                    format!("{} not found", parent_alias),
                )
            })?;
            profile.fill_from(parent);
            next = parent.inherit.clone();
        }
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigStep, FailureSite};
    use crate::test_support::{memory_config, MemoryStorage};

    fn orion() -> BrokerProfile {
        BrokerProfile::new("orion", "https://orion", "v2").unwrap()
    }

    #[test]
    fn dialect_parses_case_insensitively() {
        assert_eq!("LD".parse::<Dialect>().unwrap(), Dialect::Ld);
        assert_eq!(" v2 ".parse::<Dialect>().unwrap(), Dialect::V2);
        assert!("v1".parse::<Dialect>().is_err());
        assert_eq!(Dialect::Ld.api_root(), "/ngsi-ld/v1");
    }

    #[test]
    fn new_rejects_relative_url() {
        let err = BrokerProfile::new("orion", "orion:1026", "v2").unwrap_err();
        assert!(err.contains("is not url"));
    }

    #[test]
    fn add_then_get_returns_same_profile() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();
        assert_eq!(config.broker("orion").unwrap(), &orion());
    }

    #[test]
    fn add_twice_is_duplicate_alias() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();

        let err = config.add_broker(orion()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateAlias);
        assert_eq!(err.errno(), 1);
        assert_eq!(err.message(), "orion already exists");
    }

    #[test]
    fn add_rejects_unknown_default_context() {
        let mut config = Config::in_memory();
        let mut profile = BrokerProfile::new("orion-ld", "https://orion-ld", "ld").unwrap();
        profile.context = Some("missing".to_string());

        let err = config.add_broker(profile).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(err.errno(), AddBrokerSite::Invalid.errno());
        assert!(config.broker("orion-ld").is_err());
    }

    #[test]
    fn update_missing_is_not_found() {
        let mut config = Config::in_memory();
        let err = config.update_broker(orion()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.errno(), 1);
    }

    #[test]
    fn update_replaces_profile() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();

        let mut updated = orion();
        updated.tenant = Some("openiot".to_string());
        config.update_broker(updated.clone()).unwrap();

        assert_eq!(config.broker("orion").unwrap(), &updated);
    }

    #[test]
    fn remove_blocked_while_inherited() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();
        let mut child = BrokerProfile::new("orion-tenant", "https://orion", "v2").unwrap();
        child.inherit = Some("orion".to_string());
        config.add_broker(child).unwrap();

        let err = config.remove_broker("orion").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferencedAlias);
        assert_eq!(err.errno(), 2);

        config.remove_broker("orion-tenant").unwrap();
        config.remove_broker("orion").unwrap();
        assert!(config.broker_list().is_empty());
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut config = Config::in_memory();
        let err = config.remove_broker("nothing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.errno(), 1);
    }

    #[test]
    fn remove_forgets_cached_host() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();
        config
            .save_previous_args(crate::config::PreviousArgs {
                host: Some("orion".to_string()),
                ..Default::default()
            })
            .unwrap();

        config.remove_broker("orion").unwrap();
        assert_eq!(config.previous_args().host, None);
    }

    #[test]
    fn resolve_folds_inherited_settings() {
        let mut config = Config::in_memory();
        let mut base = orion();
        base.tenant = Some("openiot".to_string());
        base.scope = Some("/foodstore".to_string());
        base.auth = Some(AuthMode::Bearer {
            token: "abc".to_string(),
        });
        config.add_broker(base).unwrap();

        let mut child = BrokerProfile::new("orion-store", "https://orion", "v2").unwrap();
        child.scope = Some("/store001".to_string());
        child.inherit = Some("orion".to_string());
        config.add_broker(child).unwrap();

        let resolved = config.resolve_broker("orion-store").unwrap();
        assert_eq!(resolved.tenant.as_deref(), Some("openiot"));
        assert_eq!(resolved.scope.as_deref(), Some("/store001"));
        assert_eq!(
            resolved.auth,
            Some(AuthMode::Bearer {
                token: "abc".to_string()
            })
        );
    }

    #[test]
    fn update_rejects_inherit_cycle() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();
        let mut child = BrokerProfile::new("child", "https://orion", "v2").unwrap();
        child.inherit = Some("orion".to_string());
        config.add_broker(child).unwrap();

        let mut looped = orion();
        looped.inherit = Some("child".to_string());
        let err = config.update_broker(looped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert!(err.message().contains("inherit cycle"));
        assert_eq!(config.broker("orion").unwrap().inherit, None);
    }

    #[test]
    fn failed_save_leaves_registry_unchanged() {
        let storage = MemoryStorage::default();
        let mut config = memory_config(&storage);
        storage.fail_open("open error");

        let err = config.add_broker(orion()).unwrap_err();
        assert_eq!(err.errno(), AddBrokerSite::Save.errno());
        assert_eq!(err.kind(), ErrorKind::ConfigFile(ConfigStep::Open));
        assert_eq!(err.message(), "open error");
        assert!(config.broker("orion").is_err());
    }

    #[test]
    fn edit_broker_keeps_alias_and_validates() {
        let mut config = Config::in_memory();
        config.add_broker(orion()).unwrap();

        config
            .edit_broker("orion", |p| {
                p.tenant = Some("openiot".to_string());
                p.set_url("http://localhost:1026")
            })
            .unwrap();
        let profile = config.broker("orion").unwrap();
        assert_eq!(profile.tenant.as_deref(), Some("openiot"));
        assert_eq!(profile.url.as_str(), "http://localhost:1026/");

        let err = config
            .edit_broker("orion", |p| p.set_url("localhost"))
            .unwrap_err();
        assert_eq!((err.kind(), err.errno()), (ErrorKind::InvalidValue, 2));

        let err = config
            .edit_broker("orion", |p| {
                p.scope = Some("foodstore".to_string());
                Ok(())
            })
            .unwrap_err();
        assert_eq!((err.kind(), err.errno()), (ErrorKind::InvalidValue, 2));

        let err = config.edit_broker("fiware", |_| Ok(())).unwrap_err();
        assert_eq!((err.kind(), err.errno()), (ErrorKind::NotFound, 1));
    }

    #[test]
    fn broker_list_is_sorted() {
        let mut config = Config::in_memory();
        config
            .add_broker(BrokerProfile::new("zeta", "http://zeta", "ld").unwrap())
            .unwrap();
        config.add_broker(orion()).unwrap();

        let aliases: Vec<_> = config.broker_list().iter().map(|b| b.alias.as_str()).collect();
        assert_eq!(aliases, vec!["orion", "zeta"]);
    }
}
