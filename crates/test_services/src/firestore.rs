//! Minimal Firestore client for the local emulator.
//!
//! Talks to the emulator's REST interface. Documents are exchanged as JSON
//! objects and translated to and from Firestore's typed value encoding.

use std::env;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "firestore_tests.rs"]
mod tests;

/// Environment variable naming the emulator's `host:port`.
pub const EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";

/// The emulator accepts this token as an all-access credential.
const EMULATOR_TOKEN: &str = "owner";

const DEFAULT_DATABASE: &str = "(default)";

/// Errors returned by [`FirestoreClient`].
#[derive(Error, Debug)]
pub enum FirestoreError {
    #[error("Invalid emulator host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("{EMULATOR_HOST_ENV} is not set")]
    MissingEmulatorHost,

    #[error("Request to the emulator failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Emulator returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    #[error("Document {path} not found")]
    NotFound { path: String },

    #[error("Document {path} already exists")]
    AlreadyExists { path: String },

    #[error("Document data could not be converted: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document data must serialize to a JSON object")]
    NotAnObject,

    #[error("Could not decode value: {reason}")]
    Decode { reason: String },
}

pub type Result<T> = std::result::Result<T, FirestoreError>;

/// Client for one project on a Firestore emulator.
#[derive(Debug, Clone)]
pub struct FirestoreClient {
    http: reqwest::Client,
    base: Url,
    project_id: String,
}

impl FirestoreClient {
    /// Connects to the emulator listening on `emulator_host` (`host:port`).
    pub fn new(emulator_host: &str, project_id: impl Into<String>) -> Result<Self> {
        let base = Url::parse(&format!("http://{}/", emulator_host)).map_err(|e| {
            FirestoreError::InvalidHost {
                host: emulator_host.to_string(),
                reason: e.to_string(),
            }
        })?;
        if base.host_str().is_none() {
            return Err(FirestoreError::InvalidHost {
                host: emulator_host.to_string(),
                reason: "no host".to_string(),
            });
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            project_id: project_id.into(),
        })
    }

    /// Connects to the emulator named by `FIRESTORE_EMULATOR_HOST`.
    pub fn from_env(project_id: impl Into<String>) -> Result<Self> {
        Self::from_host_var(env::var(EMULATOR_HOST_ENV).ok(), project_id)
    }

    fn from_host_var(host: Option<String>, project_id: impl Into<String>) -> Result<Self> {
        match host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => Self::new(host, project_id),
            _ => Err(FirestoreError::MissingEmulatorHost),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn collection(&self, name: impl Into<String>) -> CollectionRef<'_> {
        CollectionRef {
            client: self,
            name: name.into(),
        }
    }

    /// Deletes every document in the project. Emulator only.
    pub async fn reset(&self) -> Result<()> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| self.invalid_base())?
            .extend([
                "emulator",
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                DEFAULT_DATABASE,
                "documents",
            ]);
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await?;
        Self::check(response, "all documents").await.map(|_| ())
    }

    fn documents_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| self.invalid_base())?
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                DEFAULT_DATABASE,
                "documents",
            ])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http.request(method, url).bearer_auth(EMULATOR_TOKEN)
    }

    fn invalid_base(&self) -> FirestoreError {
        FirestoreError::InvalidHost {
            host: self.base.to_string(),
            reason: "cannot be a base URL".to_string(),
        }
    }

    async fn check(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let path = path.to_string();
        match status {
            StatusCode::NOT_FOUND => Err(FirestoreError::NotFound { path }),
            StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists { path }),
            _ => Err(FirestoreError::Status {
                status: status.as_u16(),
                path,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// A collection addressed by name.
#[derive(Debug, Clone)]
pub struct CollectionRef<'a> {
    client: &'a FirestoreClient,
    name: String,
}

impl CollectionRef<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates document `id`, failing with [`FirestoreError::AlreadyExists`]
    /// if it is already there.
    pub async fn create<T: Serialize + ?Sized>(&self, id: &str, data: &T) -> Result<Document> {
        let mut url = self.client.documents_url(&[self.name.as_str()])?;
        url.query_pairs_mut().append_pair("documentId", id);
        let body = encode_document(data)?;

        debug!(collection = %self.name, id = id, "Creating document");
        let response = self
            .client
            .request(Method::POST, url)
            .json(&body)
            .send()
            .await?;
        let response = FirestoreClient::check(response, &self.path(id)).await?;
        decode_response(response).await
    }

    /// Writes document `id`, replacing any existing content.
    pub async fn set<T: Serialize + ?Sized>(&self, id: &str, data: &T) -> Result<Document> {
        let url = self.client.documents_url(&[self.name.as_str(), id])?;
        let body = encode_document(data)?;

        debug!(collection = %self.name, id = id, "Setting document");
        let response = self
            .client
            .request(Method::PATCH, url)
            .json(&body)
            .send()
            .await?;
        let response = FirestoreClient::check(response, &self.path(id)).await?;
        decode_response(response).await
    }

    /// Reads document `id`.
    pub async fn get(&self, id: &str) -> Result<Document> {
        let url = self.client.documents_url(&[self.name.as_str(), id])?;
        let response = self.client.request(Method::GET, url).send().await?;
        let response = FirestoreClient::check(response, &self.path(id)).await?;
        decode_response(response).await
    }

    /// Deletes document `id`. Deleting a missing document succeeds.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let url = self.client.documents_url(&[self.name.as_str(), id])?;
        let response = self.client.request(Method::DELETE, url).send().await?;
        FirestoreClient::check(response, &self.path(id)).await.map(|_| ())
    }

    fn path(&self, id: &str) -> String {
        format!("{}/{}", self.name, id)
    }
}

/// A document read back from the emulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub name: String,
    pub id: String,
    pub fields: Map<String, Value>,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

impl Document {
    /// Field values as plain JSON.
    pub fn data(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    create_time: Option<String>,
    update_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct DocumentBody {
    fields: Map<String, Value>,
}

async fn decode_response(response: reqwest::Response) -> Result<Document> {
    let raw: RawDocument = response.json().await?;
    decode_document(raw)
}

fn decode_document(raw: RawDocument) -> Result<Document> {
    let mut fields = Map::with_capacity(raw.fields.len());
    for (key, value) in &raw.fields {
        fields.insert(key.clone(), decode_value(value)?);
    }
    let id = raw
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    Ok(Document {
        name: raw.name,
        id,
        fields,
        create_time: raw.create_time,
        update_time: raw.update_time,
    })
}

fn encode_document<T: Serialize + ?Sized>(data: &T) -> Result<DocumentBody> {
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(DocumentBody {
            fields: map
                .iter()
                .map(|(key, value)| (key.clone(), encode_value(value)))
                .collect(),
        }),
        _ => Err(FirestoreError::NotAnObject),
    }
}

/// Encodes plain JSON as a Firestore typed value.
pub fn encode_value(value: &Value) -> Value {
    let mut typed = Map::new();
    match value {
        Value::Null => {
            typed.insert("nullValue".to_string(), Value::Null);
        }
        Value::Bool(b) => {
            typed.insert("booleanValue".to_string(), Value::Bool(*b));
        }
        Value::Number(n) => match n.as_i64() {
            // 64-bit integers travel as strings.
            Some(i) => {
                typed.insert("integerValue".to_string(), Value::String(i.to_string()));
            }
            None => {
                typed.insert(
                    "doubleValue".to_string(),
                    n.as_f64().map(Value::from).unwrap_or(Value::Null),
                );
            }
        },
        Value::String(s) => {
            typed.insert("stringValue".to_string(), Value::String(s.clone()));
        }
        Value::Array(items) => {
            let values = items.iter().map(encode_value).collect();
            let mut array = Map::new();
            array.insert("values".to_string(), Value::Array(values));
            typed.insert("arrayValue".to_string(), Value::Object(array));
        }
        Value::Object(entries) => {
            let fields = entries
                .iter()
                .map(|(key, value)| (key.clone(), encode_value(value)))
                .collect();
            let mut map = Map::new();
            map.insert("fields".to_string(), Value::Object(fields));
            typed.insert("mapValue".to_string(), Value::Object(map));
        }
    }
    Value::Object(typed)
}

/// Decodes a Firestore typed value into plain JSON.
///
/// Timestamps, references and bytes decode to their string forms.
pub fn decode_value(value: &Value) -> Result<Value> {
    let typed = value.as_object().ok_or_else(|| FirestoreError::Decode {
        reason: format!("expected a typed value object, got {}", value),
    })?;
    let (kind, inner) = typed.iter().next().ok_or_else(|| FirestoreError::Decode {
        reason: "empty value object".to_string(),
    })?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" | "stringValue" | "timestampValue" | "bytesValue"
        | "referenceValue" => Ok(inner.clone()),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().map_err(|e| FirestoreError::Decode {
                    reason: format!("integerValue '{}': {}", s, e),
                })?,
                Value::Number(n) => n.as_i64().ok_or_else(|| FirestoreError::Decode {
                    reason: format!("integerValue {} out of range", n),
                })?,
                other => {
                    return Err(FirestoreError::Decode {
                        reason: format!("integerValue {}", other),
                    })
                }
            };
            Ok(Value::from(parsed))
        }
        "geoPointValue" => Ok(inner.clone()),
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Ok(Value::Array(values))
        }
        "mapValue" => {
            let mut decoded = Map::new();
            if let Some(Value::Object(fields)) = inner.get("fields") {
                for (key, value) in fields {
                    decoded.insert(key.clone(), decode_value(value)?);
                }
            }
            Ok(Value::Object(decoded))
        }
        other => Err(FirestoreError::Decode {
            reason: format!("unsupported value type '{}'", other),
        }),
    }
}
