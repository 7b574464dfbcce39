//! Node and edge records in their stored wire shape.
//!
//! Input comes as flat KGX JSON lines. Nodes keep `id`, `name` and
//! `categories` as typed fields; every other property becomes an
//! `{attribute_type_id, value}` attribute. Edges keep `subject`,
//! `predicate` and `object`, collect `*_qualifier` fields into
//! `qualifiers`, the primary knowledge source into `sources`, and
//! everything else into `attributes`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PfError, Result};
use crate::signature::Signature;

/// Predicate whose edges feed the subclass lists instead of the pattern index.
pub const SUBCLASS_OF: &str = "biolink:subclass_of";

const QUALIFIER_SUFFIX: &str = "_qualifier";
const BIOLINK_PREFIX: &str = "biolink:";
const PRIMARY_SOURCE_KEYS: [&str; 2] = [
    "biolink:primary_knowledge_source",
    "primary_knowledge_source",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_type_id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    pub qualifier_type_id: String,
    pub qualifier_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub resource_role: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub qualifiers: Vec<Qualifier>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl NodeRecord {
    /// Normalize one KGX node line.
    pub fn from_kgx(value: Value) -> Result<Self> {
        let mut fields = into_object(value, "node")?;

        let id = take_string(&mut fields, "id")
            .ok_or_else(|| PfError::InvalidRecord("node without string id".into()))?;

        let categories = match fields.remove("category") {
            Some(Value::String(c)) => vec![c],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Some(other) => {
                return Err(PfError::InvalidRecord(format!(
                    "node {} has non-string category {}",
                    id, other
                )))
            }
            None => Vec::new(),
        };

        let name = match fields.remove("name") {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                fields.insert("name_value".to_string(), other);
                None
            }
            None => None,
        };

        let attributes = fields
            .into_iter()
            .map(|(k, v)| Attribute { attribute_type_id: k, value: v })
            .collect();

        Ok(NodeRecord { id, name, categories, attributes })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl EdgeRecord {
    /// Normalize one KGX edge line.
    pub fn from_kgx(value: Value) -> Result<Self> {
        let fields = into_object(value, "edge")?;

        let mut subject = None;
        let mut predicate = None;
        let mut object = None;
        let mut qualifiers = Vec::new();
        let mut sources = Vec::new();
        let mut attributes = Vec::new();

        for (k, v) in fields {
            match k.as_str() {
                "subject" => subject = Some(value_to_string(v)),
                "predicate" => predicate = Some(value_to_string(v)),
                "object" => object = Some(value_to_string(v)),
                key if key.ends_with(QUALIFIER_SUFFIX) => {
                    let qualifier_type_id = if key.starts_with(BIOLINK_PREFIX) {
                        key.to_string()
                    } else {
                        format!("{}{}", BIOLINK_PREFIX, key)
                    };
                    qualifiers.push(Qualifier {
                        qualifier_type_id,
                        qualifier_value: value_to_string(v),
                    });
                }
                key if PRIMARY_SOURCE_KEYS.contains(&key) => sources.push(Source {
                    resource_role: "primary_knowledge_source".to_string(),
                    resource_id: value_to_string(v),
                }),
                _ => attributes.push(Attribute { attribute_type_id: k, value: v }),
            }
        }

        let missing = |field: &str| PfError::InvalidRecord(format!("edge without {}", field));
        Ok(EdgeRecord {
            subject: subject.ok_or_else(|| missing("subject"))?,
            predicate: predicate.ok_or_else(|| missing("predicate"))?,
            object: object.ok_or_else(|| missing("object"))?,
            qualifiers,
            sources,
            attributes,
        })
    }

    /// Canonical signature of this edge's predicate and qualifiers.
    pub fn signature(&self) -> Signature {
        Signature::new(
            &self.predicate,
            self.qualifiers
                .iter()
                .map(|q| (q.qualifier_type_id.as_str(), q.qualifier_value.as_str())),
        )
    }

    pub fn is_subclass_of(&self) -> bool {
        self.predicate == SUBCLASS_OF
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn into_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PfError::InvalidRecord(format!(
            "{} line is not a JSON object: {}",
            what, other
        ))),
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
