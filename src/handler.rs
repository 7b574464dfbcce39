//! Request handling.
//!
//! `AppContext` is built once at startup and shared read-only by every
//! connection: the store handle, the closure engine, and the resource id
//! stamped on results. `RequestHandler` turns one query graph into one or
//! two executor calls (a second one, in the opposite direction, when the
//! predicate is symmetric) and assembles the result message.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::closure::{ClosureEngine, ROOT_PREDICATE};
use crate::config::ServerConfig;
use crate::error::{PfError, Result};
use crate::metrics::{Metrics, Operation};
use crate::protocol::{Request, Response, ServerStats};
use crate::query::{QueryExecutor, QueryResult};
use crate::record::{EdgeRecord, NodeRecord};
use crate::signature::Signature;
use crate::store::{KvStore, RedisStore};
use crate::taxonomy::BiolinkModel;
use crate::trapi::{
    knowledge_edge_id, Analysis, Binding, KgNode, KnowledgeGraph, Message, QEdge, QNode,
    QueryGraph, QueryResultEntry,
};

/// Process-wide state, constructed once before serving starts.
pub struct AppContext {
    pub store: Arc<dyn KvStore>,
    pub closures: ClosureEngine,
    pub resource_id: String,
}

impl AppContext {
    pub fn new(store: Arc<dyn KvStore>, closures: ClosureEngine, resource_id: impl Into<String>) -> Self {
        Self { store, closures, resource_id: resource_id.into() }
    }

    /// Connect to the store and obtain closures, either from the Biolink
    /// model file or from the snapshot a previous load stored.
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config.store).await?);

        let closures = if config.closures_from_store {
            tracing::info!("reading closure snapshot from store");
            ClosureEngine::read_from_store(store.as_ref()).await?
        } else {
            let path = config.biolink_model.as_ref().ok_or_else(|| {
                PfError::Taxonomy("no biolink model configured and closures_from_store is off".into())
            })?;
            tracing::info!("building closures from {}", path.display());
            ClosureEngine::build(&BiolinkModel::from_path(path)?)?
        };

        Ok(Self::new(store, closures, config.resource_id.clone()))
    }
}

/// Which query node holds the ids the executor starts from.
enum Plan {
    /// Both ends pinned.
    Both { subjects: Vec<String>, objects: Vec<String> },
    /// Subject pinned, objects constrained by type.
    FromSubject { subjects: Vec<String>, object_type: String },
    /// Object pinned, subjects constrained by type.
    FromObject { objects: Vec<String>, subject_type: String },
}

/// The single edge of a validated query graph.
struct EdgeQuery<'q> {
    edge_key: &'q str,
    edge: &'q QEdge,
    predicate: String,
    signature: Signature,
    plan: Plan,
}

pub struct RequestHandler {
    ctx: Arc<AppContext>,
    metrics: Option<Arc<Metrics>>,
}

impl RequestHandler {
    pub fn new(ctx: Arc<AppContext>, metrics: Option<Arc<Metrics>>) -> Self {
        Self { ctx, metrics }
    }

    pub fn operation(request: &Request) -> Operation {
        match request {
            Request::Ping => Operation::Ping,
            Request::Query { .. } => Operation::Query,
            Request::GetStats => Operation::GetStats,
            Request::Shutdown => Operation::Shutdown,
        }
    }

    /// Dispatch one protocol request. Never fails: errors become
    /// `Response::Error` with the error's wire code.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong {
                pong: true,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            Request::Query { message } => match self.handle_query(message).await {
                Ok(message) => {
                    if let Some(m) = &self.metrics {
                        m.record_query_outcome(message.results.as_ref().map_or(0, Vec::len));
                    }
                    Response::Query { message }
                }
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.record_query_error();
                    }
                    if e.is_client_error() {
                        tracing::debug!("rejected query: {}", e);
                    } else {
                        tracing::warn!("query failed: {}", e);
                    }
                    Response::Error { error: e.to_string(), code: e.code().to_string() }
                }
            },
            Request::GetStats => Response::Stats {
                stats: ServerStats {
                    type_closures: self.ctx.closures.type_count(),
                    signature_closures: self.ctx.closures.signature_count(),
                    metrics: self.metrics.as_ref().map(|m| m.snapshot()),
                },
            },
            Request::Shutdown => Response::Ok { ok: true },
        }
    }

    /// Answer one query graph: one edge, two nodes.
    pub async fn handle_query(&self, message: Message) -> Result<Message> {
        let query_graph = message
            .query_graph
            .ok_or_else(|| PfError::UnsupportedQuery("message has no query_graph".into()))?;
        let query = plan_query(&query_graph)?;

        let exec = QueryExecutor::new(self.ctx.store.as_ref(), &self.ctx.closures);
        let symmetric = self.ctx.closures.is_symmetric(&query.predicate);
        let sig = &query.signature;

        let (forward, reverse) = match &query.plan {
            Plan::Both { subjects, objects } => {
                let forward = exec.bquery(subjects, sig, objects).await?;
                let reverse = if symmetric {
                    Some(exec.bquery(objects, sig, subjects).await?)
                } else {
                    None
                };
                (forward, reverse)
            }
            Plan::FromSubject { subjects, object_type } => {
                let forward = exec.oquery(subjects, sig, object_type, None).await?;
                let reverse = if symmetric {
                    Some(exec.squery(subjects, sig, object_type, None).await?)
                } else {
                    None
                };
                (forward, reverse)
            }
            Plan::FromObject { objects, subject_type } => {
                let forward = exec.squery(objects, sig, subject_type, None).await?;
                let reverse = if symmetric {
                    Some(exec.oquery(objects, sig, subject_type, None).await?)
                } else {
                    None
                };
                (forward, reverse)
            }
        };

        let (knowledge_graph, results) =
            self.assemble(&query, forward, reverse.unwrap_or_default())?;

        Ok(Message {
            query_graph: Some(query_graph),
            knowledge_graph: Some(knowledge_graph),
            results: Some(results),
        })
    }

    /// Forward edges bind the query's subject node to the edge subject;
    /// reverse edges were found the other way round, so the bindings swap.
    fn assemble(
        &self,
        query: &EdgeQuery<'_>,
        forward: QueryResult,
        reverse: QueryResult,
    ) -> Result<(KnowledgeGraph, Vec<QueryResultEntry>)> {
        let mut kg = KnowledgeGraph::default();

        for payload in forward
            .input_nodes
            .iter()
            .chain(&forward.output_nodes)
            .chain(&reverse.input_nodes)
            .chain(&reverse.output_nodes)
        {
            let node: NodeRecord = parse_payload(payload, "node")?;
            kg.nodes.insert(node.id.clone(), KgNode::from(node));
        }

        let mut results = Vec::with_capacity(forward.edges.len() + reverse.edges.len());
        let tagged = forward
            .edges
            .iter()
            .map(|e| (e, false))
            .chain(reverse.edges.iter().map(|e| (e, true)));

        for (n, (payload, reversed)) in tagged.enumerate() {
            let edge: EdgeRecord = parse_payload(payload, "edge")?;
            let edge_id = knowledge_edge_id(n);

            let (subject_id, object_id) = if reversed {
                (edge.object.clone(), edge.subject.clone())
            } else {
                (edge.subject.clone(), edge.object.clone())
            };

            let mut node_bindings = BTreeMap::new();
            node_bindings.insert(query.edge.subject.clone(), Binding::to(subject_id));
            node_bindings.insert(query.edge.object.clone(), Binding::to(object_id));

            let mut edge_bindings = BTreeMap::new();
            edge_bindings.insert(query.edge_key.to_string(), Binding::to(edge_id.clone()));

            results.push(QueryResultEntry {
                node_bindings,
                analyses: vec![Analysis {
                    resource_id: self.ctx.resource_id.clone(),
                    edge_bindings,
                }],
            });
            kg.edges.insert(edge_id, edge);
        }

        Ok((kg, results))
    }
}

/// Validate the query graph shape and work out which executor calls to make.
/// Runs before any store access.
fn plan_query(query_graph: &QueryGraph) -> Result<EdgeQuery<'_>> {
    if query_graph.edges.len() != 1 {
        return Err(PfError::UnsupportedQuery(format!(
            "expected exactly one edge, got {}",
            query_graph.edges.len()
        )));
    }
    if query_graph.nodes.len() != 2 {
        return Err(PfError::UnsupportedQuery(format!(
            "expected exactly two nodes, got {}",
            query_graph.nodes.len()
        )));
    }

    let Some((edge_key, edge)) = query_graph.edges.iter().next() else {
        return Err(PfError::UnsupportedQuery("query graph has no edge".into()));
    };
    let subject = lookup_node(query_graph, &edge.subject)?;
    let object = lookup_node(query_graph, &edge.object)?;

    let predicate = match edge.predicates.as_deref() {
        None | Some([]) => ROOT_PREDICATE.to_string(),
        Some([single]) => single.clone(),
        Some(many) => {
            return Err(PfError::UnsupportedQuery(format!(
                "only one predicate per edge is supported, got {}",
                many.len()
            )))
        }
    };

    let qualifiers = match edge.qualifier_constraints.as_slice() {
        [] => &[][..],
        [constraint] => constraint.qualifier_set.as_slice(),
        many => {
            return Err(PfError::UnsupportedQuery(format!(
                "only one qualifier constraint is supported, got {}",
                many.len()
            )))
        }
    };
    let signature = Signature::new(
        &predicate,
        qualifiers
            .iter()
            .map(|q| (q.qualifier_type_id.as_str(), q.qualifier_value.as_str())),
    );

    let plan = match (&subject.ids, &object.ids) {
        (Some(subjects), Some(objects)) => Plan::Both {
            subjects: subjects.clone(),
            objects: objects.clone(),
        },
        (Some(subjects), None) => Plan::FromSubject {
            subjects: subjects.clone(),
            object_type: first_category(object, &edge.object)?,
        },
        (None, Some(objects)) => Plan::FromObject {
            objects: objects.clone(),
            subject_type: first_category(subject, &edge.subject)?,
        },
        (None, None) => {
            return Err(PfError::UnsupportedQuery(
                "at least one query node must carry ids".into(),
            ))
        }
    };

    Ok(EdgeQuery { edge_key, edge, predicate, signature, plan })
}

fn lookup_node<'q>(query_graph: &'q QueryGraph, key: &str) -> Result<&'q QNode> {
    query_graph
        .nodes
        .get(key)
        .ok_or_else(|| PfError::UnsupportedQuery(format!("edge references unknown node {}", key)))
}

fn first_category(node: &QNode, key: &str) -> Result<String> {
    node.categories
        .as_ref()
        .and_then(|c| c.first())
        .cloned()
        .ok_or_else(|| PfError::UnsupportedQuery(format!("node {} has neither ids nor categories", key)))
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &str, what: &str) -> Result<T> {
    serde_json::from_str(payload)
        .map_err(|e| PfError::Corrupt(format!("stored {} payload: {}", what, e)))
}
