use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use super::graph::{GraphEdge, GraphNode, GraphStats, GraphStore, GraphStoreError};
use super::records::{Entity, EntityKind, RecordStore, RecordStoreError};

/// In-memory graph backend. Default single-process store and the test double
/// for every component that talks to a graph.
pub struct MemoryGraph {
    nodes: RwLock<HashMap<String, GraphNode>>,
    edges: RwLock<Vec<GraphEdge>>,
    connected: AtomicBool,
    edge_seq: AtomicU64,
    batch_calls: AtomicU64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
            edge_seq: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
        }
    }

    /// How many batched deletion calls have been issued.
    pub fn batch_delete_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::Relaxed)
    }

    /// Simulate the engine going away; every port call then fails with
    /// `NotConnected` and callers degrade to skipped outcomes.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        self.nodes.read().get(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Insert an edge with a missing endpoint. Only reachable from tests and
    /// repair tooling; dangling edges never arise through the normal API.
    pub fn inject_dangling_edge(&self, from: Option<&str>, to: Option<&str>, edge_type: &str) {
        let id = format!("e{}", self.edge_seq.fetch_add(1, Ordering::Relaxed));
        self.edges.write().push(GraphEdge {
            id,
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            edge_type: edge_type.to_string(),
            properties: Map::new(),
        });
    }

    fn ensure_connected(&self) -> Result<(), GraphStoreError> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(GraphStoreError::NotConnected)
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn create_node(
        &self,
        label: &str,
        props: Map<String, Value>,
    ) -> Result<String, GraphStoreError> {
        self.ensure_connected()?;
        let id = props
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("n{}", self.edge_seq.fetch_add(1, Ordering::Relaxed)));

        let node = GraphNode {
            id: id.clone(),
            label: label.to_string(),
            properties: props,
        };
        // Upsert: same id converges to the same node state.
        self.nodes.write().insert(id.clone(), node);
        debug!("MemoryGraph upserted node {} ({})", id, label);
        Ok(id)
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        props: Map<String, Value>,
    ) -> Result<String, GraphStoreError> {
        self.ensure_connected()?;
        let nodes = self.nodes.read();
        if !nodes.contains_key(from_id) {
            return Err(GraphStoreError::NodeNotFound(from_id.to_string()));
        }
        if !nodes.contains_key(to_id) {
            return Err(GraphStoreError::NodeNotFound(to_id.to_string()));
        }
        drop(nodes);

        let mut edges = self.edges.write();
        // Idempotent on (from, to, type).
        if let Some(existing) = edges.iter().find(|e| {
            e.from.as_deref() == Some(from_id)
                && e.to.as_deref() == Some(to_id)
                && e.edge_type == edge_type
        }) {
            return Ok(existing.id.clone());
        }

        let id = format!("e{}", self.edge_seq.fetch_add(1, Ordering::Relaxed));
        edges.push(GraphEdge {
            id: id.clone(),
            from: Some(from_id.to_string()),
            to: Some(to_id.to_string()),
            edge_type: edge_type.to_string(),
            properties: props,
        });
        Ok(id)
    }

    async fn delete_node(&self, id: &str) -> Result<bool, GraphStoreError> {
        self.ensure_connected()?;
        let existed = self.nodes.write().remove(id).is_some();
        if existed {
            self.edges
                .write()
                .retain(|e| e.from.as_deref() != Some(id) && e.to.as_deref() != Some(id));
        }
        Ok(existed)
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize, GraphStoreError> {
        self.ensure_connected()?;
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        let mut deleted = 0;
        {
            let mut nodes = self.nodes.write();
            for id in ids {
                if nodes.remove(id).is_some() {
                    deleted += 1;
                }
            }
        }
        if deleted > 0 {
            let nodes = self.nodes.read();
            self.edges.write().retain(|e| {
                e.from.as_deref().is_none_or(|id| nodes.contains_key(id))
                    && e.to.as_deref().is_none_or(|id| nodes.contains_key(id))
            });
        }
        Ok(deleted)
    }

    async fn find_nodes(
        &self,
        label: &str,
        filter: Map<String, Value>,
        limit: Option<usize>,
    ) -> Result<Vec<GraphNode>, GraphStoreError> {
        self.ensure_connected()?;
        let nodes = self.nodes.read();
        let mut out: Vec<GraphNode> = nodes
            .values()
            .filter(|n| n.label == label)
            .filter(|n| {
                filter
                    .iter()
                    .all(|(k, v)| n.properties.get(k) == Some(v))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn query(
        &self,
        text: &str,
        _params: Map<String, Value>,
    ) -> Result<Value, GraphStoreError> {
        self.ensure_connected()?;
        Err(GraphStoreError::Query(format!(
            "MemoryGraph does not support traversal queries: {}",
            text
        )))
    }

    async fn list_relationships(&self) -> Result<Vec<GraphEdge>, GraphStoreError> {
        self.ensure_connected()?;
        Ok(self.edges.read().clone())
    }

    async fn node_degree(&self, id: &str) -> Result<usize, GraphStoreError> {
        self.ensure_connected()?;
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| e.from.as_deref() == Some(id) || e.to.as_deref() == Some(id))
            .count())
    }

    async fn stats(&self) -> Result<GraphStats, GraphStoreError> {
        self.ensure_connected()?;
        Ok(GraphStats {
            node_count: self.nodes.read().len(),
            edge_count: self.edges.read().len(),
        })
    }

    async fn cleanup_orphaned_relationships(&self) -> Result<usize, GraphStoreError> {
        self.ensure_connected()?;
        let nodes = self.nodes.read();
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| {
            let from_ok = e.from.as_deref().is_some_and(|id| nodes.contains_key(id));
            let to_ok = e.to.as_deref().is_some_and(|id| nodes.contains_key(id));
            from_ok && to_ok
        });
        Ok(before - edges.len())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// In-memory record store keyed kind → entity list, preserving insertion
/// order per kind.
pub struct MemoryRecords {
    collections: RwLock<HashMap<EntityKind, Vec<Entity>>>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, entity: Entity) {
        self.collections
            .write()
            .entry(entity.kind.clone())
            .or_default()
            .push(entity);
    }

    pub fn len(&self, kind: &EntityKind) -> usize {
        self.collections.read().get(kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().values().all(Vec::is_empty)
    }
}

impl Default for MemoryRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn list(&self, kind: &EntityKind) -> Result<Vec<Entity>, RecordStoreError> {
        Ok(self
            .collections
            .read()
            .get(kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, kind: &EntityKind, id: &str) -> Result<Option<Entity>, RecordStoreError> {
        Ok(self
            .collections
            .read()
            .get(kind)
            .and_then(|v| v.iter().find(|e| e.id == id))
            .cloned())
    }

    async fn put(&self, entity: Entity) -> Result<(), RecordStoreError> {
        let mut collections = self.collections.write();
        let list = collections.entry(entity.kind.clone()).or_default();
        if let Some(slot) = list.iter_mut().find(|e| e.id == entity.id) {
            *slot = entity;
        } else {
            list.push(entity);
        }
        Ok(())
    }

    async fn remove(&self, kind: &EntityKind, id: &str) -> Result<bool, RecordStoreError> {
        let mut collections = self.collections.write();
        if let Some(list) = collections.get_mut(kind) {
            let before = list.len();
            list.retain(|e| e.id != id);
            return Ok(list.len() != before);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_node_upsert_is_idempotent() {
        let graph = MemoryGraph::new();
        let mut props = Map::new();
        props.insert("id".into(), json!("c1"));
        props.insert("name".into(), json!("Jane Doe"));

        let id1 = graph.create_node("person", props.clone()).await.unwrap();
        let id2 = graph.create_node("person", props).await.unwrap();
        assert_eq!(id1, "c1");
        assert_eq!(id1, id2);
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_node_removes_incident_edges() {
        let graph = MemoryGraph::new();
        let mut a = Map::new();
        a.insert("id".into(), json!("a"));
        let mut b = Map::new();
        b.insert("id".into(), json!("b"));
        graph.create_node("fact", a).await.unwrap();
        graph.create_node("fact", b).await.unwrap();
        graph
            .create_relationship("a", "b", "DEPENDS_ON", Map::new())
            .await
            .unwrap();

        assert!(graph.delete_node("a").await.unwrap());
        assert_eq!(graph.stats().await.unwrap().edge_count, 0);
    }

    #[test]
    fn test_disconnected_graph_errors() {
        tokio_test::block_on(async {
            let graph = MemoryGraph::new();
            graph.set_connected(false);
            let err = graph.delete_node("x").await.unwrap_err();
            assert!(matches!(err, GraphStoreError::NotConnected));
        });
    }

    #[tokio::test]
    async fn test_records_put_replaces() {
        let records = MemoryRecords::new();
        records.insert(Entity::new("c1", EntityKind::Contact).with_property("name", json!("A")));
        records
            .put(Entity::new("c1", EntityKind::Contact).with_property("name", json!("B")))
            .await
            .unwrap();
        let got = records.get(&EntityKind::Contact, "c1").await.unwrap().unwrap();
        assert_eq!(got.name(), Some("B"));
        assert_eq!(records.len(&EntityKind::Contact), 1);
    }
}
