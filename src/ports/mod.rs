pub mod graph;
pub mod memory;
pub mod ontology;
pub mod records;

pub use graph::{GraphEdge, GraphNode, GraphStats, GraphStore, GraphStoreError};
pub use memory::{MemoryGraph, MemoryRecords};
pub use ontology::Ontology;
pub use records::{Entity, EntityKind, RecordStore, RecordStoreError};
