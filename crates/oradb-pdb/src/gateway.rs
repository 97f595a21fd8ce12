//! Data-access gateway client
//!
//! The gateway fronts the container database with a REST API. Every call is
//! authenticated with basic auth and, when a client certificate is
//! configured, mutual TLS. Errors come back on two channels that are checked
//! independently: a non-200 status, and `errorDetails` on an item of an
//! otherwise successful response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use crate::error::PdbError;

/// Path of the PDB collection below the gateway root
pub const PDB_API_PATH: &str = "/ords/_/db-api/latest/database/pdbs/";

/// Timeout of one gateway call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP verb of a gateway call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Read
    Get,
    /// Lifecycle action
    Post,
    /// Drop
    Delete,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One gateway call
#[derive(Clone, PartialEq)]
pub struct GatewayRequest {
    /// HTTP verb
    pub verb: Verb,
    /// Path below the gateway root
    pub path: String,
    /// JSON body; may carry credentials
    pub body: Option<Value>,
}

impl std::fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("body", &self.body.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// PEM material for mutual TLS
pub struct ClientTls {
    /// Client certificate
    pub cert_pem: Zeroizing<String>,
    /// Client private key
    pub key_pem: Zeroizing<String>,
    /// CA bundle the gateway certificate is checked against
    pub ca_pem: Zeroizing<String>,
}

/// Where and as whom a gateway call is made
pub struct GatewayTarget {
    /// PDB the call is about; used in errors
    pub pdb: String,
    /// `http(s)://<cdb>-ords:<port>`
    pub base_url: String,
    /// Basic-auth user
    pub user: Zeroizing<String>,
    /// Basic-auth password
    pub password: Zeroizing<String>,
    /// Client certificate; plain HTTP when unset
    pub tls: Option<ClientTls>,
}

impl GatewayTarget {
    /// Root URL of the gateway service for `cdb_res_name`
    pub fn base_url(cdb_res_name: &str, port: u16, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{cdb_res_name}-ords:{port}")
    }
}

impl std::fmt::Debug for GatewayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTarget")
            .field("pdb", &self.pdb)
            .field("base_url", &self.base_url)
            .field("mtls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Sends requests to the data-access gateway
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Send `request` and return the decoded body.
    ///
    /// Both error channels are checked before `Ok` is returned.
    async fn send(
        &self,
        target: &GatewayTarget,
        request: &GatewayRequest,
    ) -> Result<Value, PdbError>;
}

#[derive(Deserialize)]
struct GatewayFault {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Default, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_details: Option<String>,
}

/// Turn a gateway response into a value or the error it carries
pub fn interpret(pdb: &str, status: u16, body: &str) -> Result<Value, PdbError> {
    if status != 200 {
        let message = serde_json::from_str::<GatewayFault>(body)
            .ok()
            .and_then(|f| f.message)
            .unwrap_or_else(|| body.trim().to_string());
        return Err(PdbError::Http {
            pdb: pdb.to_string(),
            status,
            message,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(body).map_err(|e| PdbError::Decode {
        pdb: pdb.to_string(),
        message: e.to_string(),
    })?;

    let items = serde_json::from_value::<ItemCollection>(value.clone()).unwrap_or_default();
    if let Some(item) = items
        .items
        .into_iter()
        .find(|i| i.error_details.as_deref().is_some_and(|d| !d.is_empty()))
    {
        return Err(PdbError::Database {
            pdb: pdb.to_string(),
            code: item.error_code,
            details: item.error_details.unwrap_or_default(),
        });
    }
    Ok(value)
}

/// Gateway client over reqwest
pub struct ReqwestGateway {
    timeout: Duration,
}

impl Default for ReqwestGateway {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ReqwestGateway {
    /// Client with the given per-call timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, target: &GatewayTarget) -> Result<reqwest::Client, PdbError> {
        let invalid = |message: String| PdbError::InvalidTls {
            pdb: target.pdb.clone(),
            message,
        };

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(tls) = &target.tls {
            let mut pem = Zeroizing::new(Vec::with_capacity(
                tls.cert_pem.len() + tls.key_pem.len() + 1,
            ));
            pem.extend_from_slice(tls.cert_pem.as_bytes());
            pem.push(b'\n');
            pem.extend_from_slice(tls.key_pem.as_bytes());

            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| invalid(format!("client certificate: {e}")))?;
            let ca = reqwest::Certificate::from_pem(tls.ca_pem.as_bytes())
                .map_err(|e| invalid(format!("CA bundle: {e}")))?;
            builder = builder.identity(identity).add_root_certificate(ca);
        }
        builder
            .build()
            .map_err(|e| invalid(format!("failed to create HTTP client: {e}")))
    }
}

#[async_trait]
impl GatewayClient for ReqwestGateway {
    #[instrument(skip(self, target, request), fields(pdb = %target.pdb, verb = %request.verb, path = %request.path))]
    async fn send(
        &self,
        target: &GatewayTarget,
        request: &GatewayRequest,
    ) -> Result<Value, PdbError> {
        let client = self.client(target)?;
        let url = format!("{}{}", target.base_url, request.path);

        let builder = match request.verb {
            Verb::Get => client.get(&url),
            Verb::Post => client.post(&url),
            Verb::Delete => client.delete(&url),
        };
        let mut builder = builder
            .basic_auth(target.user.as_str(), Some(target.password.as_str()))
            .header(ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("calling gateway");
        let response = builder.send().await.map_err(|e| PdbError::Unreachable {
            pdb: target.pdb.clone(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| PdbError::Decode {
            pdb: target.pdb.clone(),
            message: e.to_string(),
        })?;
        debug!(status, "gateway responded");
        interpret(&target.pdb, status, &body)
    }
}
