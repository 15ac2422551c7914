use folio_core::RemoteRepository;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// The upstream payload no longer matches the query contract.
#[derive(Debug, Error)]
pub enum MalformedResponseError {
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("repository #{index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    repositories: RepositoryConnection,
}

#[derive(Debug, Deserialize)]
struct RepositoryConnection {
    edges: Vec<RepositoryEdge>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEdge {
    node: RepositoryNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name: String,
    url: String,
    owner: RepositoryOwner,
    description: Option<String>,
    updated_at: String,
    stargazer_count: u64,
    fork_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryOwner {
    login: String,
    avatar_url: String,
}

/// Decodes the raw query result in one pass. Any structural problem fails the
/// whole batch; upstream order is kept.
pub fn normalize(raw: JsonValue) -> Result<Vec<RemoteRepository>, MalformedResponseError> {
    let data: ViewerData = serde_json::from_value(raw)?;

    data.viewer
        .repositories
        .edges
        .into_iter()
        .enumerate()
        .map(|(index, edge)| {
            let node = edge.node;
            for (field, value) in [
                ("name", &node.name),
                ("url", &node.url),
                ("owner.login", &node.owner.login),
            ] {
                if value.is_empty() {
                    return Err(MalformedResponseError::EmptyField { index, field });
                }
            }
            Ok(RemoteRepository {
                name: node.name,
                url: node.url,
                owner_login: node.owner.login,
                owner_avatar_url: node.owner.avatar_url,
                description: node.description.unwrap_or_default(),
                last_updated_at: node.updated_at,
                star_count: node.stargazer_count,
                fork_count: node.fork_count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> JsonValue {
        json!({
            "name": name,
            "url": format!("https://x/{name}"),
            "owner": {"login": "bob", "avatarUrl": "https://x/a.png"},
            "description": "a thing",
            "updatedAt": "2024-01-01T00:00:00Z",
            "stargazerCount": 3,
            "forkCount": 1
        })
    }

    fn payload(nodes: Vec<JsonValue>) -> JsonValue {
        json!({
            "viewer": {
                "login": "bob",
                "repositories": {
                    "edges": nodes.into_iter().map(|n| json!({"node": n})).collect::<Vec<_>>()
                }
            }
        })
    }

    #[test]
    fn keeps_upstream_order_and_maps_fields() {
        let repos = normalize(payload(vec![node("beta"), node("alpha")])).unwrap();
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["beta", "alpha"]);

        let alpha = &repos[1];
        assert_eq!(alpha.url, "https://x/alpha");
        assert_eq!(alpha.owner_login, "bob");
        assert_eq!(alpha.owner_avatar_url, "https://x/a.png");
        assert_eq!(alpha.last_updated_at, "2024-01-01T00:00:00Z");
        assert_eq!((alpha.star_count, alpha.fork_count), (3, 1));
    }

    #[test]
    fn null_or_absent_description_becomes_empty() {
        let mut with_null = node("alpha");
        with_null["description"] = JsonValue::Null;
        let mut without = node("beta");
        without.as_object_mut().unwrap().remove("description");

        let repos = normalize(payload(vec![with_null, without])).unwrap();
        assert!(repos.iter().all(|r| r.description.is_empty()));
    }

    #[test]
    fn missing_name_rejects_whole_batch() {
        let mut broken = node("beta");
        broken.as_object_mut().unwrap().remove("name");
        let err = normalize(payload(vec![node("alpha"), broken])).unwrap_err();
        assert!(matches!(err, MalformedResponseError::Shape(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn wrong_types_are_malformed() {
        let mut stars_as_text = node("alpha");
        stars_as_text["stargazerCount"] = json!("3");
        assert!(normalize(payload(vec![stars_as_text])).is_err());

        let mut null_avatar = node("alpha");
        null_avatar["owner"]["avatarUrl"] = JsonValue::Null;
        assert!(normalize(payload(vec![null_avatar])).is_err());

        assert!(normalize(json!({"viewer": null})).is_err());
    }

    #[test]
    fn empty_natural_key_is_malformed() {
        let err = normalize(payload(vec![node("")])).unwrap_err();
        assert!(matches!(
            err,
            MalformedResponseError::EmptyField { index: 0, field: "name" }
        ));
    }

    #[test]
    fn empty_avatar_is_allowed() {
        let mut blank_avatar = node("alpha");
        blank_avatar["owner"]["avatarUrl"] = json!("");
        let repos = normalize(payload(vec![blank_avatar])).unwrap();
        assert_eq!(repos[0].owner_avatar_url, "");
    }
}
