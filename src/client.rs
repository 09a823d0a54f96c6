use std::sync::Arc;

use base64::Engine;
use reqwest::{Method, Url};

use crate::broker::{AuthMode, BrokerProfile, Dialect};
use crate::config::Config;
use crate::error::{failure_sites, ErrorKind, NgsiError, NgsiResult};
use crate::safe_string::{Passthrough, PayloadFilter, SafeStringFilter};
use crate::transport::{Header, RequestDescriptor};

const JSON_LD_CONTEXT_REL: &str = "http://www.w3.org/ns/json-ld#context";

failure_sites! {
    pub enum BuildClientSite for "new_client" { Host, Link, Context }
}

/// Collects per-call overrides and resolves them against the registry.
#[derive(Debug)]
pub struct ClientBuilder<'a> {
    config: &'a Config,
    host: Option<String>,
    profile: Option<BrokerProfile>,
    link: Option<String>,
    tenant: Option<String>,
    scope: Option<String>,
    safe_string: bool,
    headers: Vec<Header>,
}

impl<'a> ClientBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            host: None,
            profile: None,
            link: None,
            tenant: None,
            scope: None,
            safe_string: false,
            headers: Vec::new(),
        }
    }

    /// Target a registered broker alias.
    pub fn host(mut self, alias: impl Into<String>) -> Self {
        self.host = Some(alias.into());
        self
    }

    /// Target a profile that is not in the registry. Takes precedence over [`Self::host`].
    pub fn profile(mut self, profile: BrokerProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Context alias or URI sent as the `Link` header, replacing the profile default.
    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn safe_string(mut self, enabled: bool) -> Self {
        self.safe_string = enabled;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn build(self) -> NgsiResult<Client> {
        let mut profile = match (self.profile, self.host.as_deref()) {
            (Some(profile), _) => self
                .config
                .fold_inherited(profile)
                .map_err(|e| NgsiError::wrap(BuildClientSite::Host, e))?,
            (None, Some(alias)) if !alias.trim().is_empty() => {
                self.config.resolve_broker(alias).map_err(|e| {
                    NgsiError::wrap_with(BuildClientSite::Host, format!("{} not found", alias), e)
                })?
            }
            (None, _) => {
                return Err(NgsiError::new(
                    BuildClientSite::Host,
                    ErrorKind::HostNotFound,
                    "Required host not found",
                ))
            }
        };

        if let Some(tenant) = self.tenant {
            profile.tenant = Some(tenant);
        }
        if let Some(scope) = self.scope {
            profile.scope = Some(scope);
        }

        let link = match (self.link.as_deref(), profile.context.as_deref()) {
            (Some(link), _) => Some(resolve_context(self.config, link, BuildClientSite::Link)?),
            (None, Some(context)) => {
                Some(resolve_context(self.config, context, BuildClientSite::Context)?)
            }
            (None, None) => None,
        };

        let filter: Arc<dyn PayloadFilter> = if self.safe_string {
            Arc::new(SafeStringFilter)
        } else {
            Arc::new(Passthrough)
        };

        tracing::debug!(
            host = %profile.alias,
            dialect = %profile.dialect,
            link = ?link,
            safe_string = self.safe_string,
            "client ready"
        );

        Ok(Client {
            alias: profile.alias,
            base_url: profile.url,
            dialect: profile.dialect,
            tenant: profile.tenant.filter(|t| !t.is_empty()),
            scope: profile.scope.filter(|s| !s.is_empty()),
            link,
            auth: profile.auth,
            headers: self.headers,
            safe_string: self.safe_string,
            filter,
        })
    }
}

fn resolve_context(config: &Config, key: &str, site: BuildClientSite) -> NgsiResult<String> {
    config.context(key).map_err(|e| {
        NgsiError::new(site, ErrorKind::ContextNotFound, e.message().to_string())
    })
}

/// A broker binding: where requests go and how they are decorated.
#[derive(Debug, Clone)]
pub struct Client {
    alias: String,
    base_url: Url,
    dialect: Dialect,
    tenant: Option<String>,
    scope: Option<String>,
    link: Option<String>,
    auth: Option<AuthMode>,
    headers: Vec<Header>,
    safe_string: bool,
    filter: Arc<dyn PayloadFilter>,
}

impl Client {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Resolved JSON-LD context URI, if any.
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn safe_string(&self) -> bool {
        self.safe_string
    }

    pub fn filter(&self) -> &dyn PayloadFilter {
        self.filter.as_ref()
    }

    /// `{base}{apiRoot}/{segments...}?{query}`. Segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str], query: &[(String, String)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(self.dialect.api_segments());
            path.extend(segments);
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    pub fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> RequestDescriptor {
        let mut headers = vec![Header::new("Accept", "application/json")];

        match self.dialect {
            Dialect::V2 => {
                if let Some(tenant) = &self.tenant {
                    headers.push(Header::new("Fiware-Service", tenant));
                }
                if let Some(scope) = &self.scope {
                    headers.push(Header::new("Fiware-ServicePath", scope));
                }
                if body.is_some() {
                    headers.push(Header::new("Content-Type", "application/json"));
                }
            }
            Dialect::Ld => {
                if let Some(tenant) = &self.tenant {
                    headers.push(Header::new("NGSILD-Tenant", tenant));
                }
                match &self.link {
                    Some(link) => {
                        headers.push(Header::new(
                            "Link",
                            format!(
                                "<{}>; rel=\"{}\"; type=\"application/ld+json\"",
                                link, JSON_LD_CONTEXT_REL
                            ),
                        ));
                        if body.is_some() {
                            headers.push(Header::new("Content-Type", "application/json"));
                        }
                    }
                    None => {
                        if body.is_some() {
                            headers.push(Header::new("Content-Type", "application/ld+json"));
                        }
                    }
                }
            }
        }

        match &self.auth {
            Some(AuthMode::Bearer { token }) => {
                headers.push(Header::new("Authorization", format!("Bearer {}", token)));
            }
            Some(AuthMode::Basic { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                headers.push(Header::new("Authorization", format!("Basic {}", encoded)));
            }
            Some(AuthMode::Header { name, value }) => {
                headers.push(Header::new(name, value));
            }
            None => {}
        }

        headers.extend(self.headers.iter().cloned());

        RequestDescriptor {
            method,
            url: self.endpoint(segments, query),
            headers,
            body,
        }
    }
}
