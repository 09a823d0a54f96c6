use std::fmt;
use std::str::FromStr;

use reqwest::{Method, StatusCode};

use crate::broker::Dialect;
use crate::client::Client;
use crate::error::{failure_sites, ErrorKind, FailureSite, NgsiError, NgsiResult};
use crate::transport::{HttpResponse, RequestDescriptor, Transport};

/// Kind of `entityOperations` batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Create,
    Update,
    Upsert,
    Delete,
}

impl BatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchOp::Create => "create",
            BatchOp::Update => "update",
            BatchOp::Upsert => "upsert",
            BatchOp::Delete => "delete",
        }
    }

    fn operation(self) -> &'static str {
        match self {
            BatchOp::Create => "batch_create",
            BatchOp::Update => "batch_update",
            BatchOp::Upsert => "batch_upsert",
            BatchOp::Delete => "batch_delete",
        }
    }
}

impl FromStr for BatchOp {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "create" => Ok(BatchOp::Create),
            "update" => Ok(BatchOp::Update),
            "upsert" => Ok(BatchOp::Upsert),
            "delete" => Ok(BatchOp::Delete),
            other => Err(format!("error: {}", other)),
        }
    }
}

impl fmt::Display for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// v2: payload uses simplified key/value attributes.
    pub key_values: bool,
    /// LD update: never overwrite existing attributes.
    pub no_overwrite: bool,
    /// LD upsert: replace whole entities instead of merging.
    pub replace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub entity_type: Option<String>,
    pub attrs: Option<String>,
    pub key_values: bool,
}

failure_sites! {
    pub enum BatchStep for "batch" { ReadPayload, Send, Status }
}

/// A batch step attributed to the concrete batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSite(pub BatchOp, pub BatchStep);

impl FailureSite for BatchSite {
    fn operation(&self) -> &'static str {
        self.0.operation()
    }

    fn errno(&self) -> u32 {
        self.1.errno()
    }
}

failure_sites! {
    pub enum CreateEntitySite for "entity_create" { ReadPayload, Encode, Send, Status }
}

failure_sites! {
    pub enum ReadEntitySite for "entity_read" { EmptyId, Send, Status, EmptyBody, Decode }
}

failure_sites! {
    pub enum DeleteEntitySite for "entity_delete" { EmptyId, Send, Status }
}

const BATCH_OK: &[u16] = &[200, 201, 204];
const CREATED: &[u16] = &[201];
const OK: &[u16] = &[200];
const NO_CONTENT: &[u16] = &[204];

/// Sends entity operations to a broker through a [`Transport`].
#[derive(Debug)]
pub struct Dispatcher<T> {
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `POST {apiRoot}/entityOperations/{op}`. The payload is sent as given.
    pub fn batch(
        &self,
        client: &Client,
        op: BatchOp,
        body: &[u8],
        options: &BatchOptions,
    ) -> NgsiResult<HttpResponse> {
        if is_empty(body) {
            return Err(empty_data(BatchSite(op, BatchStep::ReadPayload)));
        }

        let mut flags = Vec::new();
        match client.dialect() {
            Dialect::V2 => {
                if options.key_values {
                    flags.push("keyValues");
                }
            }
            Dialect::Ld => {
                if options.no_overwrite && op == BatchOp::Update {
                    flags.push("noOverwrite");
                }
                if options.replace && op == BatchOp::Upsert {
                    flags.push("replace");
                }
            }
        }
        let query = options_query(&flags);

        let request = client.request(
            Method::POST,
            &["entityOperations", op.as_str()],
            &query,
            Some(body.to_vec()),
        );
        let response = self.send(&request, BatchSite(op, BatchStep::Send))?;
        check_status(&response, BATCH_OK, BatchSite(op, BatchStep::Status))?;
        Ok(response)
    }

    /// `POST {apiRoot}/entities`.
    pub fn create_entity(&self, client: &Client, body: &[u8]) -> NgsiResult<HttpResponse> {
        if is_empty(body) {
            return Err(empty_data(CreateEntitySite::ReadPayload));
        }
        let payload = client.filter().outbound(body).map_err(|e| {
            NgsiError::new(CreateEntitySite::Encode, ErrorKind::Encoding, e.to_string())
        })?;

        let request = client.request(Method::POST, &["entities"], &[], Some(payload));
        let response = self.send(&request, CreateEntitySite::Send)?;
        check_status(&response, CREATED, CreateEntitySite::Status)?;
        Ok(response)
    }

    /// `GET {apiRoot}/entities/{id}`. Returns the body, passed back through the client's
    /// payload filter.
    pub fn read_entity(
        &self,
        client: &Client,
        id: &str,
        options: &ReadOptions,
    ) -> NgsiResult<Vec<u8>> {
        check_id(id, ReadEntitySite::EmptyId)?;
        let mut query = Vec::new();
        if let Some(entity_type) = options.entity_type.as_deref() {
            query.push(("type".to_string(), entity_type.to_string()));
        }
        if let Some(attrs) = options.attrs.as_deref() {
            query.push(("attrs".to_string(), attrs.to_string()));
        }
        if options.key_values {
            query.extend(options_query(&["keyValues"]));
        }

        let request = client.request(Method::GET, &["entities", id], &query, None);
        let response = self.send(&request, ReadEntitySite::Send)?;
        check_status(&response, OK, ReadEntitySite::Status)?;

        if is_empty(&response.body) {
            return Err(empty_data(ReadEntitySite::EmptyBody));
        }
        let body = client
            .filter()
            .inbound(&response.body)
            .and_then(|body| {
                serde_json::from_slice::<serde_json::Value>(&body)?;
                Ok(body)
            })
            .map_err(|e| {
                NgsiError::new(ReadEntitySite::Decode, ErrorKind::Encoding, e.to_string())
            })?;
        Ok(body)
    }

    /// `DELETE {apiRoot}/entities/{id}`.
    pub fn delete_entity(
        &self,
        client: &Client,
        id: &str,
        entity_type: Option<&str>,
    ) -> NgsiResult<()> {
        check_id(id, DeleteEntitySite::EmptyId)?;
        let query: Vec<(String, String)> = entity_type
            .map(|t| vec![("type".to_string(), t.to_string())])
            .unwrap_or_default();
        let request = client.request(Method::DELETE, &["entities", id], &query, None);
        let response = self.send(&request, DeleteEntitySite::Send)?;
        check_status(&response, NO_CONTENT, DeleteEntitySite::Status)?;
        Ok(())
    }

    fn send(&self, request: &RequestDescriptor, site: impl FailureSite) -> NgsiResult<HttpResponse> {
        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        let response = self
            .transport
            .send(request)
            .map_err(|e| NgsiError::new(site, ErrorKind::Transport, e.to_string()))?;
        tracing::debug!(status = response.status, bytes = response.body.len(), "response received");
        Ok(response)
    }
}

fn is_empty(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn empty_data(site: impl FailureSite) -> NgsiError {
    NgsiError::new(site, ErrorKind::EmptyData, "data is empty")
}

/// An empty id would address the entity collection instead of one entity.
fn check_id(id: &str, site: impl FailureSite) -> NgsiResult<()> {
    if id.trim().is_empty() {
        return Err(NgsiError::new(site, ErrorKind::EmptyData, "id is empty"));
    }
    Ok(())
}

fn options_query(flags: &[&str]) -> Vec<(String, String)> {
    if flags.is_empty() {
        return Vec::new();
    }
    vec![("options".to_string(), flags.join(","))]
}

fn check_status(response: &HttpResponse, accepted: &[u16], site: impl FailureSite) -> NgsiResult<()> {
    if accepted.contains(&response.status) {
        return Ok(());
    }
    let reason = StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default();
    let detail = String::from_utf8_lossy(&response.body);
    let message = format!("{} {} {}", response.status, reason, detail.trim());
    Err(NgsiError::new(
        site,
        ErrorKind::HttpStatus(response.status),
        message.trim_end(),
    ))
}
