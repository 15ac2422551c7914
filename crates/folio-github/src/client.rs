use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const GITHUB_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

/// Repositories requested per run. There is no pagination past this page.
pub const PAGE_SIZE: u32 = 100;

/// Public repositories owned (not merely affiliated) by the token's identity.
pub const OWNED_REPOSITORIES_QUERY: &str = r#"
{
  viewer {
    login
    repositories(first: 100, privacy: PUBLIC, ownerAffiliations: OWNER) {
      edges {
        node {
          name
          url
          owner {
            login
            avatarUrl
          }
          description
          updatedAt
          stargazerCount
          forkCount
        }
      }
    }
  }
}
"#;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no GitHub token configured")]
    MissingCredential,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response body is not valid JSON: {0}")]
    Body(#[source] serde_json::Error),
    #[error("graphql errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("graphql response carried no data")]
    MissingData,
}

/// Anything that can produce the raw owned-repositories result.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// The untyped `data` member of the query result.
    async fn fetch_owned_repositories(&self) -> Result<JsonValue, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<JsonValue>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl GithubClient {
    /// A missing token is accepted here and reported on the first fetch.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        config: HttpClientConfig,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RepositorySource for GithubClient {
    async fn fetch_owned_repositories(&self) -> Result<JsonValue, TransportError> {
        let token = self.token.as_deref().ok_or(TransportError::MissingCredential)?;
        let span = info_span!("github_query", endpoint = %self.endpoint);

        async move {
            let resp = self
                .client
                .post(&self.endpoint)
                .header(AUTHORIZATION, format!("bearer {token}"))
                .header(CONTENT_TYPE, "application/json")
                .json(&serde_json::json!({ "query": OWNED_REPOSITORIES_QUERY }))
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let body = resp.bytes().await?;
            debug!(bytes = body.len(), "graphql response received");
            let envelope: GraphQlEnvelope =
                serde_json::from_slice(&body).map_err(TransportError::Body)?;

            if !envelope.errors.is_empty() {
                return Err(TransportError::GraphQl(
                    envelope.errors.into_iter().map(|e| e.message).collect(),
                ));
            }
            match envelope.data {
                Some(JsonValue::Null) | None => Err(TransportError::MissingData),
                Some(data) => Ok(data),
            }
        }
        .instrument(span)
        .await
    }
}
