//! Query-graph request and result envelope types.
//!
//! Only the fields the engine reads or writes are modeled; anything else in
//! an inbound message is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{Attribute, EdgeRecord, NodeRecord, Qualifier};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_graph: Option<QueryGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<QueryResultEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGraph {
    #[serde(default)]
    pub nodes: BTreeMap<String, QNode>,
    #[serde(default)]
    pub edges: BTreeMap<String, QEdge>,
}

/// A query node: either pinned to known ids or constrained to categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QEdge {
    pub subject: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifier_constraints: Vec<QualifierConstraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifierConstraint {
    #[serde(default)]
    pub qualifier_set: Vec<Qualifier>,
}

/// Resolved nodes keyed by their text id, edges keyed by
/// `knowledge_edge_{n}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: BTreeMap<String, KgNode>,
    pub edges: BTreeMap<String, EdgeRecord>,
}

/// Stored node record without its id, which becomes the map key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl From<NodeRecord> for KgNode {
    fn from(node: NodeRecord) -> Self {
        KgNode {
            name: node.name,
            categories: node.categories,
            attributes: node.attributes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
}

impl Binding {
    pub fn to(id: impl Into<String>) -> Vec<Binding> {
        vec![Binding { id: id.into() }]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub resource_id: String,
    pub edge_bindings: BTreeMap<String, Vec<Binding>>,
}

/// One result per returned knowledge edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResultEntry {
    pub node_bindings: BTreeMap<String, Vec<Binding>>,
    pub analyses: Vec<Analysis>,
}

pub fn knowledge_edge_id(n: usize) -> String {
    format!("knowledge_edge_{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_graph() {
        let message: Message = serde_json::from_value(json!({
            "query_graph": {
                "nodes": {
                    "chemical": {"categories": ["biolink:ChemicalEntity"], "is_set": false, "constraints": []},
                    "f": {"ids": ["MONDO:0005737"], "is_set": false}
                },
                "edges": {
                    "edge_1": {
                        "subject": "chemical",
                        "object": "f",
                        "predicates": ["biolink:treats"],
                        "attribute_constraints": [],
                        "qualifier_constraints": []
                    }
                }
            }
        }))
        .unwrap();

        let qg = message.query_graph.unwrap();
        assert_eq!(qg.nodes["f"].ids.as_deref(), Some(&["MONDO:0005737".to_string()][..]));
        assert!(qg.nodes["chemical"].ids.is_none());
        assert_eq!(qg.edges["edge_1"].predicates.as_ref().unwrap()[0], "biolink:treats");
        assert!(qg.edges["edge_1"].qualifier_constraints.is_empty());
    }

    #[test]
    fn test_qualifier_constraints() {
        let edge: QEdge = serde_json::from_value(json!({
            "subject": "s", "object": "o",
            "qualifier_constraints": [{"qualifier_set": [
                {"qualifier_type_id": "biolink:object_aspect_qualifier", "qualifier_value": "activity"}
            ]}]
        }))
        .unwrap();
        assert!(edge.predicates.is_none());
        assert_eq!(edge.qualifier_constraints[0].qualifier_set[0].qualifier_value, "activity");
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let value = serde_json::to_value(Message::default()).unwrap();
        assert_eq!(value, json!({}));
    }
}
