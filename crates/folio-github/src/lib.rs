//! GitHub GraphQL source for folio: the owned-repositories query and the
//! normalizer that turns its result into typed repositories.

mod client;
mod normalize;

pub use client::{
    GithubClient, HttpClientConfig, RepositorySource, TransportError, GITHUB_GRAPHQL_ENDPOINT,
    OWNED_REPOSITORIES_QUERY, PAGE_SIZE,
};
pub use normalize::{normalize, MalformedResponseError};

pub const CRATE_NAME: &str = "folio-github";
