//! Pattern-query executor.
//!
//! Answers "which neighbors of these inputs, via this signature, have this
//! type" against the index written by the loader. Each phase is one batched
//! store call; phases run in order because each needs the previous one's
//! output:
//!
//! 1. input text ids -> int ids, widened by their subclass lists
//! 2. filter text ids -> int ids (same widening)
//! 3. signature -> descendant signature ids
//! 4. output type -> descendant category ids
//! 5. cross product -> pattern keys, one `range_many`
//! 6. deinterleave `[edge, neighbor, ...]`, apply filter
//! 7. payloads for matched inputs, neighbors, and edges
//!
//! Unknown text ids, signatures and categories contribute nothing. An
//! unknown output type is an error.

use std::collections::HashSet;
use std::hash::Hash;

use crate::closure::{ClosureEngine, ROOT_TYPE};
use crate::error::{PfError, Result};
use crate::signature::{query_pattern, Signature};
use crate::store::{Keyspace, KvStore};

/// Which end of the edge the input ids sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Subject,
    Object,
}

/// Payload strings of one query, in result order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Input nodes with at least one matching pattern, deduplicated.
    pub input_nodes: Vec<String>,
    /// Neighbor nodes that survived the filter, deduplicated.
    pub output_nodes: Vec<String>,
    /// One payload per surviving (edge, neighbor) pair. Not deduplicated.
    pub edges: Vec<String>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.input_nodes.is_empty() && self.output_nodes.is_empty() && self.edges.is_empty()
    }

    fn swap_nodes(self) -> Self {
        QueryResult {
            input_nodes: self.output_nodes,
            output_nodes: self.input_nodes,
            edges: self.edges,
        }
    }
}

pub struct QueryExecutor<'a, S: KvStore + ?Sized> {
    store: &'a S,
    closures: &'a ClosureEngine,
}

impl<'a, S: KvStore + ?Sized> QueryExecutor<'a, S> {
    pub fn new(store: &'a S, closures: &'a ClosureEngine) -> Self {
        Self { store, closures }
    }

    /// Objects of type `object_type` reachable from `subjects`.
    pub async fn oquery(
        &self,
        subjects: &[String],
        signature: &Signature,
        object_type: &str,
        filter: Option<&[String]>,
    ) -> Result<QueryResult> {
        self.gquery(subjects, signature, object_type, InputRole::Subject, filter).await
    }

    /// Subjects of type `subject_type` pointing at `objects`.
    pub async fn squery(
        &self,
        objects: &[String],
        signature: &Signature,
        subject_type: &str,
        filter: Option<&[String]>,
    ) -> Result<QueryResult> {
        self.gquery(objects, signature, subject_type, InputRole::Object, filter).await
    }

    /// Edges between two known id lists.
    ///
    /// Runs from the shorter side, with the other side as the filter.
    /// The result is always (subject nodes, object nodes, edges).
    pub async fn bquery(
        &self,
        subjects: &[String],
        signature: &Signature,
        objects: &[String],
    ) -> Result<QueryResult> {
        if subjects.len() <= objects.len() {
            self.oquery(subjects, signature, ROOT_TYPE, Some(objects)).await
        } else {
            let result = self.squery(objects, signature, ROOT_TYPE, Some(subjects)).await?;
            Ok(result.swap_nodes())
        }
    }

    pub async fn gquery(
        &self,
        inputs: &[String],
        signature: &Signature,
        output_type: &str,
        role: InputRole,
        filter: Option<&[String]>,
    ) -> Result<QueryResult> {
        // Fail on an unknown type before touching the store.
        let type_names = sorted(self.closures.type_descendants(output_type)?.iter().cloned());
        let signatures = sorted(self.closures.signature_descendants(signature));

        let resolve_filter = async {
            let Some(ids) = filter else {
                return Ok::<Option<HashSet<i64>>, PfError>(None);
            };
            let resolved = self.resolve_nodes(ids).await?;
            Ok(Some(resolved.into_iter().collect()))
        };
        let (input_ids, filter_ids, sig_ids, type_ids) = tokio::try_join!(
            self.resolve_nodes(inputs),
            resolve_filter,
            self.resolve_ids(Keyspace::Signature, &signatures),
            self.resolve_ids(Keyspace::Category, &type_names),
        )?;

        tracing::debug!(
            inputs = input_ids.len(),
            signatures = sig_ids.len(),
            types = type_ids.len(),
            "query fan-out"
        );

        let mut patterns = Vec::with_capacity(input_ids.len() * sig_ids.len() * type_ids.len());
        let mut owners = Vec::with_capacity(patterns.capacity());
        for &iid in &input_ids {
            for &type_id in &type_ids {
                for &sig_id in &sig_ids {
                    patterns.push(match role {
                        InputRole::Subject => query_pattern(iid, sig_id, type_id),
                        InputRole::Object => query_pattern(type_id, -sig_id, iid),
                    });
                    owners.push(iid);
                }
            }
        }
        if patterns.is_empty() {
            return Ok(QueryResult::default());
        }

        let lists = self.store.range_many(Keyspace::Pattern, &patterns).await?;

        let mut matched = Vec::new();
        let mut edge_ids = Vec::new();
        let mut neighbor_ids = Vec::new();
        for ((list, owner), pattern) in lists.iter().zip(&owners).zip(&patterns) {
            if list.is_empty() {
                continue;
            }
            if list.len() % 2 != 0 {
                return Err(PfError::Corrupt(format!(
                    "adjacency list {} has odd length {}",
                    pattern,
                    list.len()
                )));
            }
            matched.push(*owner);
            for pair in list.chunks_exact(2) {
                let (edge, neighbor) = (pair[0], pair[1]);
                if let Some(allowed) = &filter_ids {
                    if !allowed.contains(&neighbor) {
                        continue;
                    }
                }
                edge_ids.push(edge);
                neighbor_ids.push(neighbor);
            }
        }

        let matched = dedup_in_order(matched);
        let neighbors = dedup_in_order(neighbor_ids);
        tracing::debug!(
            patterns = patterns.len(),
            matched = matched.len(),
            neighbors = neighbors.len(),
            edges = edge_ids.len(),
            "query matched"
        );

        let (input_nodes, output_nodes, edges) = tokio::try_join!(
            self.payloads(Keyspace::NodePayload, &matched),
            self.payloads(Keyspace::NodePayload, &neighbors),
            self.payloads(Keyspace::EdgePayload, &edge_ids),
        )?;

        Ok(QueryResult { input_nodes, output_nodes, edges })
    }

    /// Text ids -> int ids, then each id's subclass list appended.
    async fn resolve_nodes(&self, text_ids: &[String]) -> Result<Vec<i64>> {
        let unique = dedup_in_order(text_ids.iter().cloned());
        let ids = self.resolve_ids(Keyspace::NodeId, &unique).await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let subclasses = self.store.range_many(Keyspace::Subclass, &keys).await?;

        let mut all = ids;
        all.extend(subclasses.into_iter().flatten());
        Ok(dedup_in_order(all))
    }

    /// Look up int ids, dropping keys that are not in the store.
    async fn resolve_ids<K: AsRef<str>>(&self, ks: Keyspace, keys: &[K]) -> Result<Vec<i64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        let values = self.store.get_many(ks, &keys).await?;

        let mut ids = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            if let Some(raw) = value {
                ids.push(parse_int(ks, key, &raw)?);
            }
        }
        Ok(ids)
    }

    async fn payloads(&self, ks: Keyspace, ids: &[i64]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let values = self.store.get_many(ks, &keys).await?;

        let mut out = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(payload) => out.push(payload),
                None => tracing::warn!("{} has no payload for {}", ks.name(), key),
            }
        }
        Ok(out)
    }
}

fn parse_int(ks: Keyspace, key: &str, raw: &str) -> Result<i64> {
    raw.trim().parse().map_err(|_| {
        PfError::Corrupt(format!("{} value for {} is not an integer: {:?}", ks.name(), key, raw))
    })
}

fn dedup_in_order<T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

fn sorted<T: Ord, I: IntoIterator<Item = T>>(items: I) -> Vec<T> {
    let mut v: Vec<T> = items.into_iter().collect();
    v.sort();
    v
}
