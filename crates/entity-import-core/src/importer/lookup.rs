//! Remote entity lookup against a Wikibase-style `wbgetentities` API.

use indexmap::IndexMap;
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ImporterConfig;
use crate::errors::{ImportError, ImportResult};
use crate::guards::{excerpt, MALFORMED_EXCERPT_CHARS};
use crate::models::{
    EntityKind, Rank, RawEntity, RawSiteLink, Reference, RemoteEntityId, Snak, Statement,
};

/// Fetches raw entities from the remote repository. No caching: every call
/// reaches the transport.
pub trait EntityLookup: Send + Sync {
    /// # Errors
    /// `NotFound` when the remote reports no such entity, `TransientFetch` for
    /// network conditions worth retrying, `MalformedResponse` when the payload
    /// does not have the expected shape.
    fn fetch(&self, remote_id: &RemoteEntityId) -> ImportResult<RawEntity>;
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// The remote serializes empty maps as `[]`; accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum MapOrEmptyList<V> {
    Map(IndexMap<String, V>),
    List(Vec<serde::de::IgnoredAny>),
}

fn map_or_empty_list<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    match MapOrEmptyList::deserialize(deserializer)? {
        MapOrEmptyList::Map(map) => Ok(map),
        MapOrEmptyList::List(_) => Ok(IndexMap::new()),
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    entities: Option<IndexMap<String, ApiEntity>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Deserialize)]
struct ApiTerm {
    value: String,
}

#[derive(Deserialize)]
struct ApiEntity {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    missing: Option<serde::de::IgnoredAny>,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    labels: IndexMap<String, ApiTerm>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    descriptions: IndexMap<String, ApiTerm>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    aliases: IndexMap<String, Vec<ApiTerm>>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    claims: IndexMap<String, Vec<ApiStatement>>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    sitelinks: IndexMap<String, RawSiteLink>,
}

#[derive(Deserialize)]
struct ApiStatement {
    #[serde(default)]
    id: Option<String>,
    mainsnak: Snak,
    #[serde(default)]
    rank: Rank,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    qualifiers: IndexMap<String, Vec<Snak>>,
    #[serde(default)]
    references: Vec<ApiReference>,
}

#[derive(Deserialize)]
struct ApiReference {
    #[serde(default, deserialize_with = "map_or_empty_list")]
    snaks: IndexMap<String, Vec<Snak>>,
}

impl From<ApiStatement> for Statement {
    fn from(api: ApiStatement) -> Self {
        let mut statement = Statement::new(api.mainsnak);
        statement.guid = api.id;
        statement.rank = api.rank;
        statement.qualifiers = api.qualifiers.into_values().flatten().collect();
        statement.references = api
            .references
            .into_iter()
            .map(|r| Reference {
                snaks: r.snaks.into_values().flatten().collect(),
            })
            .collect();
        statement
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Short, stable reference to a response body for log correlation.
pub fn payload_reference(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

fn malformed(remote_id: &RemoteEntityId, body: &str, message: String) -> ImportError {
    let payload_ref = payload_reference(body);
    warn!(
        remote_id = %remote_id,
        payload_ref = %payload_ref,
        excerpt = %excerpt(body, MALFORMED_EXCERPT_CHARS),
        "malformed entity response: {message}"
    );
    ImportError::MalformedResponse {
        remote_id: *remote_id,
        payload_ref,
        message,
    }
}

/// Parse a `wbgetentities` response body for `remote_id`.
pub fn parse_entity_response(remote_id: &RemoteEntityId, body: &str) -> ImportResult<RawEntity> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| malformed(remote_id, body, format!("cannot decode response: {e}")))?;

    if let Some(error) = response.error {
        if error.code == "no-such-entity" {
            return Err(ImportError::NotFound {
                remote_id: *remote_id,
            });
        }
        return Err(malformed(
            remote_id,
            body,
            format!("API error {}: {}", error.code, error.info),
        ));
    }

    let mut entities = response
        .entities
        .ok_or_else(|| malformed(remote_id, body, "response has no entities".to_string()))?;
    let key = remote_id.to_string();
    let api_entity = match entities.shift_remove(&key) {
        Some(entity) => entity,
        // A redirected id comes back keyed by its target.
        None if entities.len() == 1 => {
            let (target, entity) = entities
                .pop()
                .ok_or_else(|| malformed(remote_id, body, "response has no entities".to_string()))?;
            debug!(remote_id = %remote_id, target = %target, "remote entity redirected");
            entity
        }
        None => {
            return Err(malformed(
                remote_id,
                body,
                format!("response does not contain {key}"),
            ))
        }
    };

    if api_entity.missing.is_some() {
        return Err(ImportError::NotFound {
            remote_id: *remote_id,
        });
    }

    let kind = match api_entity.kind.as_deref() {
        None => remote_id.kind(),
        Some(t) => EntityKind::from_type_str(t).ok_or_else(|| {
            malformed(remote_id, body, format!("unsupported entity type {t}"))
        })?,
    };

    let mut raw = RawEntity::new(*remote_id);
    raw.kind = kind;
    raw.datatype = api_entity.datatype;
    raw.labels = api_entity
        .labels
        .into_iter()
        .map(|(lang, term)| (lang, term.value))
        .collect();
    raw.descriptions = api_entity
        .descriptions
        .into_iter()
        .map(|(lang, term)| (lang, term.value))
        .collect();
    raw.aliases = api_entity
        .aliases
        .into_iter()
        .map(|(lang, terms)| (lang, terms.into_iter().map(|t| t.value).collect()))
        .collect();
    raw.statements = api_entity
        .claims
        .into_values()
        .flatten()
        .map(Statement::from)
        .collect();
    raw.sitelinks = api_entity.sitelinks;
    Ok(raw)
}

/// Map a non-success HTTP status to an import error. `body` is hashed into
/// the payload reference when the status is neither missing nor transient.
pub fn classify_status(
    remote_id: &RemoteEntityId,
    status: StatusCode,
    body: &str,
) -> Option<ImportError> {
    if status.is_success() {
        return None;
    }
    let error = if status == StatusCode::NOT_FOUND {
        ImportError::NotFound {
            remote_id: *remote_id,
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ImportError::TransientFetch {
            remote_id: *remote_id,
            message: format!("HTTP {status}"),
        }
    } else {
        malformed(remote_id, body, format!("unexpected HTTP {status}"))
    };
    Some(error)
}

// ---------------------------------------------------------------------------
// HTTP lookup
// ---------------------------------------------------------------------------

pub struct ApiEntityLookup {
    client: HttpClient,
    api_url: String,
}

impl ApiEntityLookup {
    /// # Errors
    /// `ImportError::Config` if the HTTP client cannot be created.
    pub fn new(config: &ImporterConfig) -> ImportResult<Self> {
        let client = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| ImportError::Config(format!("cannot create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }

    fn transport_error(remote_id: &RemoteEntityId, err: &reqwest::Error) -> ImportError {
        if err.is_builder() {
            return ImportError::Config(format!("invalid request for {remote_id}: {err}"));
        }
        ImportError::TransientFetch {
            remote_id: *remote_id,
            message: if err.is_timeout() {
                format!("timed out: {err}")
            } else {
                err.to_string()
            },
        }
    }
}

impl EntityLookup for ApiEntityLookup {
    fn fetch(&self, remote_id: &RemoteEntityId) -> ImportResult<RawEntity> {
        let ids = remote_id.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbgetentities"),
                ("ids", ids.as_str()),
                ("format", "json"),
            ])
            .send()
            .map_err(|e| Self::transport_error(remote_id, &e))?;

        let status = response.status();
        let body = if status.is_success() {
            response
                .text()
                .map_err(|e| Self::transport_error(remote_id, &e))?
        } else {
            response.text().unwrap_or_default()
        };
        if let Some(err) = classify_status(remote_id, status, &body) {
            return Err(err);
        }
        parse_entity_response(remote_id, &body)
    }
}
