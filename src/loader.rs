//! Bulk loader: KGX JSON lines -> integer-keyed index.
//!
//! Two forward passes, nodes then edges, each a single streaming scan.
//!
//! Node pass, per line:
//! - next node int id (1-based, one per line)
//! - categories reduced to their deepest members, each mapped to a
//!   first-seen category int id
//! - writes: text id -> int id, int id -> node JSON, category -> int id
//!
//! Edge pass, per line:
//! - `biolink:subclass_of`: object's subclass list gets the subject
//!   (self loops dropped); no edge id is consumed
//! - anything else: next edge int id, first-seen signature int id, edge
//!   JSON, then for every (subject category x object category) pair:
//!
//! ```text
//! forward  "s,+sig,o_cat"  += [edge, o]
//! reverse  "s_cat,-sig,o"  += [edge, s]
//! ```
//!
//! Writes go through a `WriteBatch` flushed every `flush_interval` records
//! and at the end of each pass.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::closure::ClosureEngine;
use crate::config::LoadConfig;
use crate::error::{PfError, Result};
use crate::record::{EdgeRecord, NodeRecord};
use crate::signature::{query_pattern, Signature};
use crate::store::{Keyspace, KvStore, WriteBatch};

/// Counters reported at the end of a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub nodes: u64,
    pub edges: u64,
    pub subclass_edges: u64,
    /// Edges whose subject or object was never loaded as a node.
    pub skipped_edges: u64,
    pub categories: u64,
    pub signatures: u64,
}

/// Single-writer index builder. Holds the in-memory maps the edge pass
/// needs from the node pass.
pub struct IndexBuilder<'a, S: KvStore + ?Sized> {
    store: &'a S,
    closures: &'a ClosureEngine,
    flush_interval: usize,
    progress_interval: usize,
    batch: WriteBatch,

    node_ids: HashMap<String, i64>,
    node_categories: HashMap<i64, Vec<i64>>,
    category_ids: HashMap<String, i64>,
    signature_ids: HashMap<Signature, i64>,

    last_node_id: i64,
    last_edge_id: i64,
    stats: LoadStats,
}

impl<'a, S: KvStore + ?Sized> IndexBuilder<'a, S> {
    pub fn new(store: &'a S, closures: &'a ClosureEngine, config: &LoadConfig) -> Self {
        Self {
            store,
            closures,
            flush_interval: config.flush_interval.max(1),
            progress_interval: config.progress_interval.max(1),
            batch: WriteBatch::new(),
            node_ids: HashMap::new(),
            node_categories: HashMap::new(),
            category_ids: HashMap::new(),
            signature_ids: HashMap::new(),
            last_node_id: 0,
            last_edge_id: 0,
            stats: LoadStats::default(),
        }
    }

    /// Int id assigned to a node text id so far.
    pub fn node_int_id(&self, id: &str) -> Option<i64> {
        self.node_ids.get(id).copied()
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    // -- Node pass ------------------------------------------------------------

    pub async fn load_nodes<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> Result<()> {
        let mut lines = reader.lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let Some(value) = parse_line(&line, "node", line_no)? else {
                continue;
            };
            self.add_node(NodeRecord::from_kgx(value)?)?;

            let count = self.stats.nodes as usize;
            if count % self.flush_interval == 0 {
                self.batch.flush(self.store).await?;
            }
            if count % self.progress_interval == 0 {
                tracing::info!("loaded {} nodes", count);
            }
        }
        self.batch.flush(self.store).await?;
        tracing::info!(
            nodes = self.stats.nodes,
            categories = self.category_ids.len(),
            "node pass done"
        );
        Ok(())
    }

    /// Index one node. Buffered until the next flush.
    pub fn add_node(&mut self, node: NodeRecord) -> Result<()> {
        self.last_node_id += 1;
        let node_id = self.last_node_id;

        let mut cat_ids = Vec::new();
        for category in self.closures.deepest_types(&node.categories) {
            let cat_id = match self.category_ids.get(&category) {
                Some(id) => *id,
                None => {
                    let id = self.category_ids.len() as i64 + 1;
                    self.batch.set(Keyspace::Category, category.clone(), id.to_string());
                    self.category_ids.insert(category, id);
                    id
                }
            };
            cat_ids.push(cat_id);
        }
        if cat_ids.is_empty() {
            tracing::debug!("node {} has no indexable category", node.id);
        }
        self.node_categories.insert(node_id, cat_ids);

        self.batch.set(Keyspace::NodeId, node.id.clone(), node_id.to_string());
        self.batch.set(Keyspace::NodePayload, node_id.to_string(), node.to_json()?);
        self.node_ids.insert(node.id, node_id);

        self.stats.nodes += 1;
        self.stats.categories = self.category_ids.len() as u64;
        Ok(())
    }

    // -- Edge pass ------------------------------------------------------------

    pub async fn load_edges<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> Result<()> {
        let mut lines = reader.lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let Some(value) = parse_line(&line, "edge", line_no)? else {
                continue;
            };
            self.add_edge(EdgeRecord::from_kgx(value)?)?;

            if line_no % self.flush_interval == 0 {
                self.batch.flush(self.store).await?;
            }
            if line_no % self.progress_interval == 0 {
                tracing::info!("processed {} edges", line_no);
            }
        }
        self.batch.flush(self.store).await?;
        tracing::info!(
            edges = self.stats.edges,
            subclass_edges = self.stats.subclass_edges,
            signatures = self.signature_ids.len(),
            "edge pass done"
        );
        Ok(())
    }

    /// Index one edge. Buffered until the next flush.
    pub fn add_edge(&mut self, edge: EdgeRecord) -> Result<()> {
        let (Some(&s), Some(&o)) = (self.node_ids.get(&edge.subject), self.node_ids.get(&edge.object))
        else {
            tracing::debug!("skipping edge {} -> {}: endpoint not loaded", edge.subject, edge.object);
            self.stats.skipped_edges += 1;
            return Ok(());
        };

        if edge.is_subclass_of() {
            if s != o {
                self.batch.append(Keyspace::Subclass, o.to_string(), vec![s]);
                self.stats.subclass_edges += 1;
            }
            return Ok(());
        }

        self.last_edge_id += 1;
        let edge_id = self.last_edge_id;

        let signature = edge.signature();
        let sig_id = match self.signature_ids.get(&signature) {
            Some(id) => *id,
            None => {
                // 0 is never used: -0 could not mark the reverse direction
                let id = self.signature_ids.len() as i64 + 1;
                self.batch.set(Keyspace::Signature, signature.as_str(), id.to_string());
                self.signature_ids.insert(signature, id);
                id
            }
        };

        self.batch.set(Keyspace::EdgePayload, edge_id.to_string(), edge.to_json()?);

        let no_categories = Vec::new();
        let s_cats = self.node_categories.get(&s).unwrap_or(&no_categories);
        let o_cats = self.node_categories.get(&o).unwrap_or(&no_categories);
        for s_cat in s_cats {
            for o_cat in o_cats {
                self.batch.append(Keyspace::Pattern, query_pattern(s, sig_id, *o_cat), vec![edge_id, o]);
                self.batch.append(Keyspace::Pattern, query_pattern(*s_cat, -sig_id, o), vec![edge_id, s]);
            }
        }

        self.stats.edges += 1;
        self.stats.signatures = self.signature_ids.len() as u64;
        Ok(())
    }

    /// Flush anything pending and report.
    pub async fn finish(mut self) -> Result<LoadStats> {
        self.batch.flush(self.store).await?;
        if self.stats.skipped_edges > 0 {
            tracing::warn!(
                "skipped {} edges with endpoints that were never loaded",
                self.stats.skipped_edges
            );
        }
        Ok(self.stats)
    }
}

/// `None` for blank lines.
fn parse_line(line: &str, what: &str, line_no: usize) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| PfError::InvalidRecord(format!("{} line {}: {}", what, line_no, e)))
}

/// Load a node file and an edge file, then store the closure snapshot so a
/// server can start from the store alone.
pub async fn load_files<S: KvStore + ?Sized>(
    store: &S,
    closures: &ClosureEngine,
    nodes: &Path,
    edges: &Path,
    config: &LoadConfig,
) -> Result<LoadStats> {
    let mut builder = IndexBuilder::new(store, closures, config);

    let node_file = tokio::fs::File::open(nodes).await?;
    builder.load_nodes(BufReader::new(node_file)).await?;

    let edge_file = tokio::fs::File::open(edges).await?;
    builder.load_edges(BufReader::new(edge_file)).await?;

    let stats = builder.finish().await?;
    closures.write_to_store(store).await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::taxonomy::BiolinkModel;

    const MINI: &str = include_str!("../tests/fixtures/biolink_mini.yaml");

    const NODES: &str = r#"{"id": "CHEBI:1", "name": "aspirin", "category": ["biolink:SmallMolecule", "biolink:ChemicalEntity", "biolink:NamedThing"]}
{"id": "NCBIGene:239", "name": "ALOX12B", "category": ["biolink:Gene", "biolink:GenomicEntity", "biolink:NamedThing"], "taxon": "NCBITaxon:9606"}

{"id": "MONDO:1", "name": "disease", "category": "biolink:Disease"}
{"id": "MONDO:2", "name": "subtype", "category": "biolink:Disease"}
"#;

    const EDGES: &str = r#"{"subject": "CHEBI:1", "predicate": "biolink:affects", "object": "NCBIGene:239", "object_aspect_qualifier": "activity", "object_direction_qualifier": "decreased", "biolink:primary_knowledge_source": "infores:gtopdb"}
{"subject": "MONDO:2", "predicate": "biolink:subclass_of", "object": "MONDO:1"}
{"subject": "MONDO:1", "predicate": "biolink:subclass_of", "object": "MONDO:1"}
{"subject": "CHEBI:1", "predicate": "biolink:treats", "object": "MONDO:404"}
{"subject": "CHEBI:1", "predicate": "biolink:treats", "object": "MONDO:2"}
"#;

    fn closures() -> ClosureEngine {
        ClosureEngine::build(&BiolinkModel::from_yaml_str(MINI).unwrap()).unwrap()
    }

    async fn load(store: &MemoryStore, config: &LoadConfig) -> LoadStats {
        let closures = closures();
        let mut builder = IndexBuilder::new(store, &closures, config);
        builder.load_nodes(NODES.as_bytes()).await.unwrap();
        builder.load_edges(EDGES.as_bytes()).await.unwrap();
        builder.finish().await.unwrap()
    }

    #[tokio::test]
    async fn test_node_pass() {
        let store = MemoryStore::new();
        let stats = load(&store, &LoadConfig::default()).await;
        assert_eq!(stats.nodes, 4);
        // SmallMolecule, Gene, Disease
        assert_eq!(stats.categories, 3);

        assert_eq!(store.get(Keyspace::NodeId, "CHEBI:1").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(Keyspace::NodeId, "MONDO:2").await.unwrap().as_deref(), Some("4"));
        assert_eq!(store.get(Keyspace::Category, "biolink:SmallMolecule").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(Keyspace::Category, "biolink:Gene").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get(Keyspace::Category, "biolink:NamedThing").await.unwrap(), None);

        let payload = store.get(Keyspace::NodePayload, "2").await.unwrap().unwrap();
        let node: NodeRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(node.id, "NCBIGene:239");
        assert_eq!(node.categories.len(), 3);
        assert_eq!(node.attributes[0].attribute_type_id, "taxon");
    }

    #[tokio::test]
    async fn test_edge_pass_writes_both_directions() {
        let store = MemoryStore::new();
        let stats = load(&store, &LoadConfig::default()).await;
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.signatures, 2);

        let sig = Signature::new(
            "biolink:affects",
            vec![
                ("biolink:object_aspect_qualifier", "activity"),
                ("biolink:object_direction_qualifier", "decreased"),
            ],
        );
        assert_eq!(store.get(Keyspace::Signature, sig.as_str()).await.unwrap().as_deref(), Some("1"));

        // CHEBI:1 = node 1 (cat 1), NCBIGene:239 = node 2 (cat 2), edge 1, sig 1
        assert_eq!(store.range(Keyspace::Pattern, "1,1,2").await.unwrap(), vec![1, 2]);
        assert_eq!(store.range(Keyspace::Pattern, "1,-1,2").await.unwrap(), vec![1, 1]);

        let payload = store.get(Keyspace::EdgePayload, "1").await.unwrap().unwrap();
        let edge: EdgeRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(edge.sources[0].resource_id, "infores:gtopdb");
    }

    #[tokio::test]
    async fn test_subclass_edges_do_not_consume_edge_ids() {
        let store = MemoryStore::new();
        let stats = load(&store, &LoadConfig::default()).await;
        assert_eq!(stats.subclass_edges, 1);

        assert_eq!(store.range(Keyspace::Subclass, "3").await.unwrap(), vec![4]);
        // treats edge to MONDO:2 is edge 2, not edge 4
        assert!(store.get(Keyspace::EdgePayload, "2").await.unwrap().is_some());
        assert!(store.get(Keyspace::EdgePayload, "3").await.unwrap().is_none());
        assert_eq!(store.range(Keyspace::Pattern, "1,2,3").await.unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_dangling_edges_are_skipped() {
        let store = MemoryStore::new();
        let stats = load(&store, &LoadConfig::default()).await;
        assert_eq!(stats.skipped_edges, 1);
    }

    #[tokio::test]
    async fn test_flush_interval_does_not_change_result() {
        let eager = MemoryStore::new();
        let lazy = MemoryStore::new();
        let eager_cfg = LoadConfig { flush_interval: 1, ..LoadConfig::default() };

        assert_eq!(load(&eager, &eager_cfg).await, load(&lazy, &LoadConfig::default()).await);
        for ks in Keyspace::ALL {
            assert_eq!(eager.key_count(ks), lazy.key_count(ks), "{}", ks.name());
        }
        assert_eq!(
            eager.range(Keyspace::Pattern, "1,1,2").await.unwrap(),
            lazy.range(Keyspace::Pattern, "1,1,2").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_malformed_line_reports_position() {
        let store = MemoryStore::new();
        let closures = closures();
        let mut builder = IndexBuilder::new(&store, &closures, &LoadConfig::default());
        let err = builder
            .load_nodes(&b"{\"id\": \"A:1\", \"category\": \"biolink:Gene\"}\n{oops\n"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, PfError::InvalidRecord(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_conflated_endpoint_writes_every_category_pair() {
        use crate::closure::ROOT_TYPE;
        use crate::query::QueryExecutor;

        let nodes = r#"{"id": "CHEBI:1", "category": "biolink:SmallMolecule"}
{"id": "NCBIGene:7", "category": ["biolink:Gene", "biolink:Protein", "biolink:GeneOrGeneProduct", "biolink:NamedThing"]}
"#;
        let edges = r#"{"subject": "CHEBI:1", "predicate": "biolink:treats", "object": "NCBIGene:7"}
"#;
        let store = MemoryStore::new();
        let closures = closures();
        let mut builder = IndexBuilder::new(&store, &closures, &LoadConfig::default());
        builder.load_nodes(nodes.as_bytes()).await.unwrap();
        builder.load_edges(edges.as_bytes()).await.unwrap();
        let stats = builder.finish().await.unwrap();
        // SmallMolecule = 1, Gene = 2, Protein = 3
        assert_eq!(stats.categories, 3);

        // forward: one key per object category
        assert_eq!(store.range(Keyspace::Pattern, "1,1,2").await.unwrap(), vec![1, 2]);
        assert_eq!(store.range(Keyspace::Pattern, "1,1,3").await.unwrap(), vec![1, 2]);
        // reverse: the single subject category key gets one pair per category pair
        assert_eq!(store.range(Keyspace::Pattern, "1,-1,2").await.unwrap(), vec![1, 1, 1, 1]);
        assert_eq!(store.key_count(Keyspace::Pattern), 3);

        let exec = QueryExecutor::new(&store, &closures);
        let sig = Signature::predicate_only("biolink:treats");

        let forward = exec
            .oquery(&["CHEBI:1".to_string()], &sig, ROOT_TYPE, None)
            .await
            .unwrap();
        assert_eq!(forward.input_nodes.len(), 1);
        assert_eq!(forward.output_nodes.len(), 1);
        // edge payloads are per occurrence, not deduplicated
        assert_eq!(forward.edges.len(), 2);

        let backward = exec
            .squery(&["NCBIGene:7".to_string()], &sig, ROOT_TYPE, None)
            .await
            .unwrap();
        assert_eq!(backward.input_nodes.len(), 1);
        assert_eq!(backward.output_nodes.len(), 1);
        assert_eq!(backward.edges.len(), 2);

        let gene_only = exec
            .oquery(&["CHEBI:1".to_string()], &sig, "biolink:Gene", None)
            .await
            .unwrap();
        assert_eq!(gene_only.edges.len(), 1);
    }
}
