//! Read a remote over JSON-RPC 2.0 (HTTP POST).
//!
//! Every remote capability maps to one method (renameable with [Methods]):
//!
//! * `getSiteInfo(site)` returns `{rootAddress, depth, totalSize}` (tree sites).
//! * `getChunkCount(site)` returns the number of chunks (flat sites).
//! * `resolveChunk(site, index)` returns the address of a chunk (flat sites).
//! * `read(address)` returns a payload, either hex-encoded or as text (see [PayloadFormat]).
//!
//! Addresses are always sent and received as `0x`-prefixed hex. A single call is a single
//! attempt: retries are left to the caller.

use crate::{Address, Descriptor, Directory, Reader, Site};
use bytes::Bytes;
use commonware_utils::from_hex_formatted;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tracing::trace;

/// Errors that can occur when calling the remote.
#[derive(Error, Debug)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing result")]
    MissingResult,
}

/// Names of the remote methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Methods {
    pub site_info: String,
    pub chunk_count: String,
    pub resolve_chunk: String,
    pub read: String,
}

impl Default for Methods {
    fn default() -> Self {
        Self {
            site_info: "getSiteInfo".into(),
            chunk_count: "getChunkCount".into(),
            resolve_chunk: "resolveChunk".into(),
            read: "read".into(),
        }
    }
}

/// How the chunks of a site are addressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Look up the root of a tree with `getSiteInfo`.
    #[default]
    Tree,

    /// Look up each chunk by index with `getChunkCount` and `resolveChunk`.
    Flat,
}

/// How `read` encodes payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Hex string (with or without a `0x` prefix).
    #[default]
    Hex,

    /// Text string, used as-is.
    Text,
}

/// Configuration for a [Client].
#[derive(Clone, Debug)]
pub struct Config {
    /// URL requests are posted to.
    pub endpoint: String,

    /// Address identifying the document.
    pub site: Address,

    /// How the chunks of the site are addressed.
    pub mode: Mode,

    /// Names of the remote methods.
    pub methods: Methods,

    /// How `read` encodes payloads.
    pub payload: PayloadFormat,

    /// Maximum duration of a single request.
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a configuration for a tree site with the default method names.
    pub fn new(endpoint: impl Into<String>, site: Address) -> Self {
        Self {
            endpoint: endpoint.into(),
            site,
            mode: Mode::Tree,
            methods: Methods::default(),
            payload: PayloadFormat::Hex,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Failure>,
}

#[derive(Deserialize)]
struct Failure {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteInfo {
    root_address: String,
    depth: u32,
    total_size: u64,
}

/// A remote reachable over JSON-RPC.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    cfg: Arc<Config>,
    id: Arc<AtomicU64>,
}

impl Client {
    /// Creates a client for the remote described by `cfg`.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            cfg: Arc::new(cfg),
            id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        trace!(id, method, "sending request");
        let response: Response = self
            .http
            .post(&self.cfg.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_result(response)
    }
}

impl Reader for Client {
    type Error = Error;

    async fn read(&mut self, address: Address) -> Result<Bytes, Error> {
        let value = self
            .call(&self.cfg.methods.read, json!([address.to_string()]))
            .await?;
        parse_payload(value, self.cfg.payload)
    }
}

impl Directory for Client {
    type Error = Error;

    async fn site(&mut self) -> Result<Site, Error> {
        let site = json!([self.cfg.site.to_string()]);
        match self.cfg.mode {
            Mode::Tree => {
                let value = self.call(&self.cfg.methods.site_info, site).await?;
                parse_site(value).map(Site::Tree)
            }
            Mode::Flat => {
                let value = self.call(&self.cfg.methods.chunk_count, site).await?;
                parse_count(&value).map(|count| Site::Flat { count })
            }
        }
    }

    async fn resolve(&mut self, index: u64) -> Result<Address, Error> {
        let params = json!([self.cfg.site.to_string(), index]);
        let value = self
            .call(&self.cfg.methods.resolve_chunk, params)
            .await?;
        parse_address(&value)
    }
}

/// Extracts the result of a response, surfacing any error object.
fn into_result(response: Response) -> Result<Value, Error> {
    if let Some(failure) = response.error {
        return Err(Error::Rpc {
            code: failure.code,
            message: failure.message,
        });
    }
    match response.result {
        None | Some(Value::Null) => Err(Error::MissingResult),
        Some(value) => Ok(value),
    }
}

fn parse_address(value: &Value) -> Result<Address, Error> {
    let encoded = value
        .as_str()
        .ok_or_else(|| Error::InvalidResponse(format!("expected address, got {value}")))?;
    encoded
        .parse()
        .map_err(|err| Error::InvalidResponse(format!("invalid address {encoded}: {err}")))
}

fn parse_count(value: &Value) -> Result<u64, Error> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(encoded) => encoded.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidResponse(format!("expected count, got {value}")))
}

fn parse_site(value: Value) -> Result<Descriptor, Error> {
    let info: SiteInfo = serde_json::from_value(value)
        .map_err(|err| Error::InvalidResponse(format!("invalid site info: {err}")))?;
    let root = parse_address(&Value::String(info.root_address))?;
    Ok(Descriptor {
        root,
        depth: info.depth,
        total_size: info.total_size,
    })
}

fn parse_payload(value: Value, format: PayloadFormat) -> Result<Bytes, Error> {
    let encoded = match value {
        Value::String(encoded) => encoded,
        other => {
            return Err(Error::InvalidResponse(format!(
                "expected payload, got {other}"
            )))
        }
    };
    match format {
        PayloadFormat::Text => Ok(Bytes::from(encoded)),
        PayloadFormat::Hex => from_hex_formatted(&encoded)
            .map(Bytes::from)
            .ok_or_else(|| Error::InvalidResponse("payload is not hex".into())),
    }
}
