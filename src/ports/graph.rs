use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphStoreError {
    #[error("Graph not connected")]
    NotConnected,
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.properties.get("email").and_then(Value::as_str)
    }
}

/// A typed relationship. Endpoints are optional so that a dangling edge
/// (endpoint deleted underneath it) stays representable; a `None` endpoint
/// is a data-corruption signal, not a valid state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub edge_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphEdge {
    pub fn is_dangling(&self) -> bool {
        self.from.is_none() || self.to.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// The secondary graph representation, owned externally. Mirrored entities
/// are upserted here; this subsystem never manages the engine's lifecycle.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert a node. When `props` carries an `id` the write is idempotent:
    /// re-syncing the same entity converges to the same node state.
    async fn create_node(&self, label: &str, props: Map<String, Value>)
        -> Result<String, GraphStoreError>;

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        props: Map<String, Value>,
    ) -> Result<String, GraphStoreError>;

    /// Delete a node and its incident edges. Returns whether it existed.
    async fn delete_node(&self, id: &str) -> Result<bool, GraphStoreError>;

    /// Delete many nodes in one call. Returns how many existed. Batch
    /// deletion goes through here so N items cost one round trip, not N.
    async fn delete_nodes(&self, ids: &[String]) -> Result<usize, GraphStoreError>;

    async fn find_nodes(
        &self,
        label: &str,
        filter: Map<String, Value>,
        limit: Option<usize>,
    ) -> Result<Vec<GraphNode>, GraphStoreError>;

    /// Advanced traversal escape hatch; not used on the hot paths.
    async fn query(&self, text: &str, params: Map<String, Value>)
        -> Result<Value, GraphStoreError>;

    /// All relationships. Used by the consistency auditor for orphan and
    /// dangling-edge detection.
    async fn list_relationships(&self) -> Result<Vec<GraphEdge>, GraphStoreError>;

    /// Number of edges touching a node.
    async fn node_degree(&self, id: &str) -> Result<usize, GraphStoreError>;

    async fn stats(&self) -> Result<GraphStats, GraphStoreError>;

    /// Drop edges whose endpoints no longer exist. Returns removed count.
    async fn cleanup_orphaned_relationships(&self) -> Result<usize, GraphStoreError>;

    /// Liveness; every reconciler operation degrades to a `skipped` outcome
    /// when this is false.
    fn connected(&self) -> bool;
}
