use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

/// Version exchanged with the server-side extensions during the handshake.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("could not connect to the content server")]
    Connect(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("the server does not support {0}")]
    UnsupportedMethod(String),
    #[error("response carried neither a result nor an error")]
    MissingResult,
    #[error("malformed result payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFailure>,
}

#[derive(Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

/// Client for the content server's JSON-RPC endpoint. All sync traffic goes
/// through `call` / `authenticated_call`; the typed wrappers below cover the
/// procedures the reconcilers use by name.
#[derive(Clone)]
pub struct RpcClient {
    http: Client,
    endpoint: Url,
    username: String,
    password: String,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(
        endpoint: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RpcError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            username: username.into(),
            password: password.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        self.dispatch(method, params, false).await
    }

    pub async fn authenticated_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        self.dispatch(method, params, true).await
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        authenticated: bool,
    ) -> Result<T, RpcError> {
        let envelope = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let mut request = self.http.post(self.endpoint.clone()).json(&envelope);
        if authenticated {
            request = request.basic_auth(&self.username, Some(&self.password));
        }
        let response = request.send().await.map_err(|error| {
            if error.is_connect() {
                RpcError::Connect(error)
            } else {
                RpcError::Request(error)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http { status, body });
        }

        let payload: RpcResponse = response.json().await?;
        if let Some(failure) = payload.error {
            if failure.code == JSONRPC_METHOD_NOT_FOUND {
                return Err(RpcError::UnsupportedMethod(method.to_string()));
            }
            return Err(RpcError::Remote {
                code: failure.code,
                message: failure.message,
            });
        }
        let result = payload.result.ok_or(RpcError::MissingResult)?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_version(&self) -> Result<String, RpcError> {
        self.authenticated_call("pp.getVersion", json!([])).await
    }

    pub async fn get_taxonomies(&self) -> Result<Vec<Taxonomy>, RpcError> {
        self.authenticated_call("pp.getTaxonomies", json!([])).await
    }

    pub async fn get_terms(&self, taxonomy: &str) -> Result<Vec<RemoteTerm>, RpcError> {
        self.authenticated_call("pp.getTerms", json!([taxonomy]))
            .await
    }

    pub async fn new_term(&self, fields: &TermFields) -> Result<String, RpcError> {
        self.authenticated_call("pp.newTerm", json!([fields])).await
    }

    pub async fn edit_term(&self, term_id: &str, fields: &TermFields) -> Result<(), RpcError> {
        let _: Value = self
            .authenticated_call("pp.editTerm", json!([term_id, fields]))
            .await?;
        Ok(())
    }

    pub async fn delete_term(&self, taxonomy: &str, term_id: &str) -> Result<(), RpcError> {
        let _: Value = self
            .authenticated_call("pp.deleteTerm", json!([taxonomy, term_id]))
            .await?;
        Ok(())
    }

    /// Path-keyed index of every post on the server, regardless of type.
    pub async fn get_post_paths(&self) -> Result<HashMap<String, PostStub>, RpcError> {
        self.call("pp.getPostPaths", json!(["any"])).await
    }

    pub async fn get_post(&self, post_id: &str, fields: &[&str]) -> Result<RemotePost, RpcError> {
        self.authenticated_call("pp.getPost", json!([post_id, fields]))
            .await
    }

    pub async fn new_post(&self, fields: &PostFields) -> Result<String, RpcError> {
        self.authenticated_call("pp.newPost", json!([fields])).await
    }

    pub async fn edit_post(&self, post_id: &str, fields: &PostFields) -> Result<(), RpcError> {
        let _: Value = self
            .authenticated_call("pp.editPost", json!([post_id, fields]))
            .await?;
        Ok(())
    }

    /// The first call moves a post to trash, a second call on the same id
    /// purges it permanently.
    pub async fn delete_post(&self, post_id: &str) -> Result<(), RpcError> {
        let _: Value = self
            .authenticated_call("pp.deletePost", json!([post_id]))
            .await?;
        Ok(())
    }

    pub async fn get_resources(&self) -> Result<HashMap<String, String>, RpcError> {
        self.call("pp.getResources", json!([])).await
    }

    /// Pushes a base64-encoded resource payload; returns the server-side
    /// checksum of the stored content.
    pub async fn add_resource(&self, path: &str, content: &str) -> Result<String, RpcError> {
        self.authenticated_call("pp.addResource", json!([path, content]))
            .await
    }

    pub async fn delete_resource(&self, path: &str) -> Result<(), RpcError> {
        let _: Value = self
            .authenticated_call("pp.deleteResource", json!([path]))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Taxonomy {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// A term as the server reports it. `parent` is the immediate parent's id,
/// or `"0"` for a root term; full slug paths are reconstructed client-side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTerm {
    pub term_id: String,
    pub name: String,
    pub slug: String,
    pub parent: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermFields {
    pub taxonomy: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostStub {
    pub id: String,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// A custom-field entry. A populated `id` with no key/value is a deletion
/// marker; a key/value pair with an `id` updates the existing field in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CustomField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl CustomField {
    pub fn pair(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    pub fn deletion(id: Option<String>) -> Self {
        Self {
            id,
            key: None,
            value: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePost {
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFields {
    #[serde(rename = "type")]
    pub post_type: String,
    pub name: String,
    pub title: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub terms: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,
    pub content: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
