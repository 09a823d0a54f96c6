use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{failure_sites, ErrorKind, NgsiError, NgsiResult};

/// A named JSON-LD `@context` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAlias {
    pub alias: String,
    pub uri: String,
}

/// True for absolute `http`/`https` URLs with a host.
pub fn is_http(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

failure_sites! {
    pub enum AddContextSite for "add_context" { Duplicate, Invalid, Save }
}

failure_sites! {
    pub enum UpdateContextSite for "update_context" { NotFound, Invalid, Save }
}

failure_sites! {
    pub enum DeleteContextSite for "delete_context" { Referenced, NotFound, Save }
}

failure_sites! {
    pub enum GetContextSite for "get_context" { NotFound }
}

failure_sites! {
    pub enum ContextReferenceSite for "is_context_referenced" { Referenced }
}

impl Config {
    pub fn add_context(&mut self, alias: &str, uri: &str) -> NgsiResult<()> {
        if self.state.find_context(alias).is_some() {
            return Err(NgsiError::new(
                AddContextSite::Duplicate,
                ErrorKind::DuplicateAlias,
                format!("{} already exists", alias),
            ));
        }
        if alias.trim().is_empty() || !is_http(uri) {
            return Err(NgsiError::new(
                AddContextSite::Invalid,
                ErrorKind::InvalidValue,
                format!("{} is not url", uri),
            ));
        }
        let mut next = self.state.clone();
        next.contexts.push(ContextAlias {
            alias: alias.to_string(),
            uri: uri.to_string(),
        });
        self.commit(next)
            .map_err(|e| NgsiError::wrap(AddContextSite::Save, e))
    }

    pub fn update_context(&mut self, alias: &str, uri: &str) -> NgsiResult<()> {
        let Some(idx) = self.state.contexts.iter().position(|c| c.alias == alias) else {
            return Err(NgsiError::new(
                UpdateContextSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", alias),
            ));
        };
        if !is_http(uri) {
            return Err(NgsiError::new(
                UpdateContextSite::Invalid,
                ErrorKind::InvalidValue,
                format!("{} is not url", uri),
            ));
        }
        let mut next = self.state.clone();
        next.contexts[idx].uri = uri.to_string();
        self.commit(next)
            .map_err(|e| NgsiError::wrap(UpdateContextSite::Save, e))
    }

    pub fn delete_context(&mut self, alias: &str) -> NgsiResult<()> {
        self.is_context_referenced(alias).map_err(|e| {
            NgsiError::wrap_with(
                DeleteContextSite::Referenced,
                format!("{} is referenced", alias),
                e,
            )
        })?;
        if self.state.find_context(alias).is_none() {
            return Err(NgsiError::new(
                DeleteContextSite::NotFound,
                ErrorKind::NotFound,
                format!("{} not found", alias),
            ));
        }
        let mut next = self.state.clone();
        next.contexts.retain(|c| c.alias != alias);
        self.commit(next)
            .map_err(|e| NgsiError::wrap(DeleteContextSite::Save, e))
    }

    /// Resolve a context alias. An absolute URI is returned as is without a lookup.
    pub fn context(&self, key: &str) -> NgsiResult<String> {
        if is_http(key) {
            return Ok(key.to_string());
        }
        self.state
            .find_context(key)
            .map(|c| c.uri.clone())
            .ok_or_else(|| {
                NgsiError::new(
                    GetContextSite::NotFound,
                    ErrorKind::NotFound,
                    format!("{} not found", key),
                )
            })
    }

    /// Fails when any broker profile uses `alias` as its default context.
    pub fn is_context_referenced(&self, alias: &str) -> NgsiResult<()> {
        match self
            .state
            .brokers
            .iter()
            .find(|b| b.context.as_deref() == Some(alias))
        {
            Some(broker) => Err(NgsiError::new(
                ContextReferenceSite::Referenced,
                ErrorKind::ReferencedAlias,
                format!("{} is referenced by {}", alias, broker.alias),
            )),
            None => Ok(()),
        }
    }

    /// `(alias, uri)` pairs sorted by alias.
    pub fn context_list(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .state
            .contexts
            .iter()
            .map(|c| (c.alias.as_str(), c.uri.as_str()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerProfile;

    const LD_CONTEXT: &str = "https://fiware.github.io/data-models/context.jsonld";

    #[test]
    fn is_http_requires_absolute_http_url() {
        assert!(is_http("http://orion"));
        assert!(is_http("https://orion:1026/path"));
        assert!(!is_http("ftp://orion"));
        assert!(!is_http("orion"));
        assert!(!is_http("context"));
    }

    #[test]
    fn context_passes_absolute_uri_through() {
        let config = Config::in_memory();
        assert_eq!(config.context(LD_CONTEXT).unwrap(), LD_CONTEXT);
    }

    #[test]
    fn context_resolves_registered_alias() {
        let mut config = Config::in_memory();
        config.add_context("data-models", LD_CONTEXT).unwrap();
        assert_eq!(config.context("data-models").unwrap(), LD_CONTEXT);
        assert_eq!(config.context("data-models").unwrap(), LD_CONTEXT);
    }

    #[test]
    fn context_unknown_is_not_found() {
        let config = Config::in_memory();
        let err = config.context("abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "abc not found");
        assert_eq!(err.errno(), 1);
    }

    #[test]
    fn add_context_rejects_duplicate_and_non_url() {
        let mut config = Config::in_memory();
        config.add_context("ld", LD_CONTEXT).unwrap();

        let err = config.add_context("ld", LD_CONTEXT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateAlias);
        assert_eq!(err.errno(), 1);

        let err = config.add_context("other", "context").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(err.errno(), 2);
        assert_eq!(err.message(), "context is not url");
    }

    #[test]
    fn update_context_missing_is_not_found() {
        let mut config = Config::in_memory();
        let err = config.update_context("ld", LD_CONTEXT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.errno(), 1);
    }

    #[test]
    fn update_context_replaces_uri() {
        let mut config = Config::in_memory();
        config.add_context("ld", LD_CONTEXT).unwrap();
        config
            .update_context("ld", "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld")
            .unwrap();
        assert_eq!(
            config.context("ld").unwrap(),
            "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld"
        );
    }

    #[test]
    fn delete_referenced_context_fails_until_reference_removed() {
        let mut config = Config::in_memory();
        config.add_context("ld", LD_CONTEXT).unwrap();
        let mut profile = BrokerProfile::new("orion-ld", "https://orion-ld", "ld").unwrap();
        profile.context = Some("ld".to_string());
        config.add_broker(profile.clone()).unwrap();

        let err = config.delete_context("ld").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferencedAlias);
        assert_eq!(err.errno(), 1);
        assert_eq!(err.message(), "ld is referenced");
        assert_eq!(err.cause().unwrap().message(), "ld is referenced by orion-ld");

        profile.context = None;
        config.update_broker(profile).unwrap();
        config.delete_context("ld").unwrap();
        assert!(config.context_list().is_empty());
    }

    #[test]
    fn delete_missing_context_is_distinct_from_referenced() {
        let mut config = Config::in_memory();
        let err = config.delete_context("ld").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.errno(), 2);
    }

    #[test]
    fn context_list_is_sorted_by_alias() {
        let mut config = Config::in_memory();
        config.add_context("zeta", "http://zeta/context.jsonld").unwrap();
        config.add_context("alpha", "http://alpha/context.jsonld").unwrap();

        assert_eq!(
            config.context_list(),
            vec![
                ("alpha", "http://alpha/context.jsonld"),
                ("zeta", "http://zeta/context.jsonld")
            ]
        );
    }
}
