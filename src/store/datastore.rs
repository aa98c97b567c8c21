//! Cloud Datastore v1 REST client.
//!
//! Only the four calls the drain engine needs are implemented: `runQuery`,
//! `lookup` and non-transactional `commit` for deletes and upserts. Requests
//! carry an optional bearer token; the emulator needs none.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{
    Cursor, Datastore, Entity, Key, KeyId, Properties, Query, QueryBatch, StoreError, StoreResult,
};

/// Maximum mutations Datastore accepts in one commit.
pub const MAX_MUTATIONS_PER_COMMIT: usize = 500;

/// `moreResults` value of a batch that stopped before the query was exhausted.
const MORE_RESULTS_NOT_FINISHED: &str = "NOT_FINISHED";

/// Datastore REST client for one project.
pub struct RestDatastore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: Option<String>,
}

impl RestDatastore {
    /// Create a client.
    ///
    /// `endpoint` is the API root, e.g. `https://datastore.googleapis.com` or
    /// `http://localhost:8081` for the emulator.
    pub fn new(
        project_id: &str,
        endpoint: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| StoreError::Internal(format!("invalid endpoint {endpoint}: {e}")))?;
        if project_id.is_empty() {
            return Err(StoreError::Internal("project_id must not be empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nsdrain/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.as_str().trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.filter(|token| !token.is_empty()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}:{}", self.base_url, self.project_id, method)
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> StoreResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut request = self.client.post(self.method_url(method)).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn partition(&self, namespace: &str) -> PartitionId {
        PartitionId {
            project_id: self.project_id.clone(),
            namespace_id: namespace.to_string(),
        }
    }

    fn to_wire_key(&self, key: &Key) -> WireKey {
        let mut path = Vec::new();
        push_path(key, &mut path);
        WireKey {
            partition_id: Some(self.partition(&key.namespace)),
            path,
        }
    }

    fn to_wire_entity(&self, entity: &Entity) -> WireEntity {
        WireEntity {
            key: self.to_wire_key(&entity.key),
            properties: entity.properties.clone(),
        }
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> StoreResult<()> {
        for chunk in mutations.chunks(MAX_MUTATIONS_PER_COMMIT) {
            let request = CommitRequest {
                mode: "NON_TRANSACTIONAL",
                mutations: chunk,
            };
            let _: serde_json::Value = self.call("commit", &request).await?;
        }
        Ok(())
    }
}

fn push_path(key: &Key, path: &mut Vec<PathElement>) {
    if let Some(parent) = &key.parent {
        push_path(parent, path);
    }
    let (id, name) = match &key.id {
        KeyId::Id(id) => (Some(id.to_string()), None),
        KeyId::Name(name) => (None, Some(name.clone())),
    };
    path.push(PathElement {
        kind: key.kind.clone(),
        id,
        name,
    });
}

fn from_wire_key(key: WireKey) -> StoreResult<Key> {
    let namespace = key
        .partition_id
        .map(|p| p.namespace_id)
        .unwrap_or_default();

    let mut current: Option<Key> = None;
    for element in key.path {
        let id = match (element.id, element.name) {
            (Some(id), _) => KeyId::Id(
                id.parse()
                    .map_err(|_| StoreError::InvalidKey(format!("non-numeric id {id:?}")))?,
            ),
            (None, Some(name)) => KeyId::Name(name),
            (None, None) => {
                return Err(StoreError::InvalidKey(format!(
                    "incomplete path element for kind {}",
                    element.kind
                )));
            }
        };
        current = Some(Key {
            kind: element.kind,
            namespace: namespace.clone(),
            id,
            parent: current.map(Box::new),
        });
    }

    current.ok_or_else(|| StoreError::InvalidKey("empty key path".to_string()))
}

impl RestDatastore {
    fn query_request(
        &self,
        query: &Query,
        start_cursor: Option<String>,
        limit: Option<usize>,
    ) -> RunQueryRequest {
        RunQueryRequest {
            partition_id: self.partition(&query.namespace),
            query: WireQuery {
                kind: vec![KindExpression {
                    name: query.kind.clone(),
                }],
                projection: if query.keys_only {
                    vec![Projection {
                        property: PropertyReference {
                            name: "__key__".to_string(),
                        },
                    }]
                } else {
                    Vec::new()
                },
                order: query
                    .order
                    .iter()
                    .map(|name| PropertyOrder {
                        property: PropertyReference { name: name.clone() },
                        direction: "ASCENDING",
                    })
                    .collect(),
                start_cursor,
                limit: limit.map(|l| l.min(i32::MAX as usize) as i32),
            },
        }
    }
}

fn from_wire_entity(entity: WireEntity) -> StoreResult<Entity> {
    Ok(Entity {
        key: from_wire_key(entity.key)?,
        properties: entity.properties,
    })
}

#[async_trait]
impl Datastore for RestDatastore {
    async fn run_query(&self, query: &Query) -> StoreResult<QueryBatch> {
        let mut entities = Vec::new();
        let mut cursor = query.start.as_ref().map(|c| c.as_str().to_string());

        // A batch may stop short of the limit with NOT_FINISHED; keep
        // fetching so callers only ever see a short page at the real end.
        loop {
            let remaining = query.limit.map(|limit| limit.saturating_sub(entities.len()));
            let request = self.query_request(query, cursor.clone(), remaining);
            let response: RunQueryResponse = self.call("runQuery", &request).await?;
            let batch = response.batch;

            for result in batch.entity_results {
                entities.push(from_wire_entity(result.entity)?);
            }
            let end_cursor = batch.end_cursor.filter(|c| !c.is_empty());
            let advanced = end_cursor.is_some() && end_cursor != cursor;
            if end_cursor.is_some() {
                cursor = end_cursor;
            }

            let limit_reached = query.limit.is_some_and(|limit| entities.len() >= limit);
            if batch.more_results != MORE_RESULTS_NOT_FINISHED || limit_reached || !advanced {
                break;
            }
            tracing::debug!(
                kind = %query.kind,
                namespace = %query.namespace,
                collected = entities.len(),
                "Query batch not finished, continuing"
            );
        }

        Ok(QueryBatch {
            entities,
            end_cursor: cursor.and_then(Cursor::from_wire),
        })
    }

    async fn lookup(&self, key: &Key) -> StoreResult<Option<Entity>> {
        let request = LookupRequest {
            keys: vec![self.to_wire_key(key)],
        };
        let response: LookupResponse = self.call("lookup", &request).await?;
        response
            .found
            .into_iter()
            .next()
            .map(|result| from_wire_entity(result.entity))
            .transpose()
    }

    async fn delete_multi(&self, keys: &[Key]) -> StoreResult<()> {
        let mutations = keys
            .iter()
            .map(|key| Mutation::Delete(self.to_wire_key(key)))
            .collect();
        self.commit(mutations).await
    }

    async fn put_multi(&self, entities: &[Entity]) -> StoreResult<()> {
        let mutations = entities
            .iter()
            .map(|entity| Mutation::Upsert(self.to_wire_entity(entity)))
            .collect();
        self.commit(mutations).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionId {
    project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    namespace_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PathElement {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partition_id: Option<PartitionId>,
    path: Vec<PathElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntity {
    key: WireKey,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Serialize)]
struct KindExpression {
    name: String,
}

#[derive(Debug, Serialize)]
struct PropertyReference {
    name: String,
}

#[derive(Debug, Serialize)]
struct Projection {
    property: PropertyReference,
}

#[derive(Debug, Serialize)]
struct PropertyOrder {
    property: PropertyReference,
    direction: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery {
    kind: Vec<KindExpression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    projection: Vec<Projection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order: Vec<PropertyOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryRequest {
    partition_id: PartitionId,
    query: WireQuery,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    batch: QueryResultBatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultBatch {
    #[serde(default)]
    entity_results: Vec<EntityResult>,
    #[serde(default)]
    end_cursor: Option<String>,
    #[serde(default)]
    more_results: String,
}

#[derive(Debug, Deserialize)]
struct EntityResult {
    entity: WireEntity,
}

#[derive(Debug, Serialize)]
struct LookupRequest {
    keys: Vec<WireKey>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    found: Vec<EntityResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Mutation {
    Upsert(WireEntity),
    Delete(WireKey),
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    mode: &'static str,
    mutations: &'a [Mutation],
}
