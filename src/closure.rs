//! Ontology closure engine.
//!
//! Builds, once per process, two reflexive-transitive descendant maps:
//!
//! - **type closure**: `biolink:Gene` -> {Gene, ...every subtype}
//! - **signature closure**: `{"predicate": P, quals...}` -> every more specific
//!   signature (descendant predicates and, for `affects` / `regulates`,
//!   every combination of more specific qualifier values)
//!
//! plus a predicate symmetry table. The taxonomy only knows predicates, so
//! qualifier-bearing signatures are synthesized from a `QualifierLattice`:
//! an explicit build pass produces the immediate-children adjacency, then
//! `redundantize` closes it transitively.
//!
//! After construction the maps are read-only. The only interior mutability
//! is the `deepest_types` memo, guarded by a mutex.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{PfError, Result};
use crate::signature::Signature;
use crate::store::{Keyspace, KvStore};
use crate::taxonomy::{PermissibleValue, Taxonomy};

pub const ROOT_TYPE: &str = "biolink:NamedThing";
pub const ROOT_PREDICATE: &str = "biolink:related_to";
pub const AFFECTS: &str = "biolink:affects";
pub const REGULATES: &str = "biolink:regulates";
pub const ASPECT_ENUM: &str = "GeneOrGeneProductOrChemicalEntityAspectEnum";

pub const SUBJECT_ASPECT: &str = "biolink:subject_aspect_qualifier";
pub const OBJECT_ASPECT: &str = "biolink:object_aspect_qualifier";
pub const SUBJECT_DIRECTION: &str = "biolink:subject_direction_qualifier";
pub const OBJECT_DIRECTION: &str = "biolink:object_direction_qualifier";

/// Lookup key for a qualifier slot that is absent on an edge.
pub const ABSENT: &str = "None";

/// Store keys of the closure snapshot in the `Meta` keyspace.
pub const TYPE_SNAPSHOT_KEY: &str = "type_to_descendants";
pub const SIGNATURE_SNAPSHOT_KEY: &str = "pq_to_descendants";
pub const SYMMETRY_SNAPSHOT_KEY: &str = "predicate_symmetries";

/// Parent qualifier value (`ABSENT` for the root) -> child values.
pub type AxisTree = BTreeMap<String, Vec<String>>;

/// Qualifier values on one synthesized edge, keyed by qualifier slot.
type QualifierSet = BTreeMap<&'static str, String>;

// ============================================================================
// Qualifier lattice
// ============================================================================

/// Combinatorial qualifier sub-taxonomy of one predicate.
///
/// Four slots are expanded: subject/object aspect share the aspect axis,
/// subject/object direction share the direction axis.
#[derive(Debug, Clone)]
pub struct QualifierLattice {
    predicate: String,
    directions: AxisTree,
    aspects: AxisTree,
}

impl QualifierLattice {
    pub fn new(predicate: &str, directions: AxisTree, aspects: AxisTree) -> Self {
        Self { predicate: predicate.to_string(), directions, aspects }
    }

    /// `affects`: increased/decreased directions, aspects from the enum tree.
    pub fn affects(aspects: AxisTree) -> Self {
        Self::new(AFFECTS, root_only(&["increased", "decreased"]), aspects)
    }

    /// `regulates`: upregulated/downregulated directions, no aspects.
    pub fn regulates() -> Self {
        Self::new(REGULATES, root_only(&["upregulated", "downregulated"]), root_only(&[]))
    }

    /// Group enum entries under their declared parent; parentless entries
    /// hang off `ABSENT`.
    pub fn aspect_tree(values: &[(String, PermissibleValue)]) -> AxisTree {
        let mut tree = AxisTree::new();
        for (key, value) in values {
            let parent = value.is_a.clone().unwrap_or_else(|| ABSENT.to_string());
            tree.entry(parent).or_default().push(key.clone());
        }
        tree
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn base_signature(&self) -> Signature {
        Signature::predicate_only(&self.predicate)
    }

    fn signature_of(&self, quals: &QualifierSet) -> Signature {
        Signature::new(&self.predicate, quals.iter().map(|(k, v)| (*k, v.as_str())))
    }

    /// Every edge one qualifier step below `quals`.
    fn children(&self, quals: &QualifierSet) -> Vec<QualifierSet> {
        let slots: [(&'static str, &AxisTree); 4] = [
            (SUBJECT_ASPECT, &self.aspects),
            (OBJECT_ASPECT, &self.aspects),
            (SUBJECT_DIRECTION, &self.directions),
            (OBJECT_DIRECTION, &self.directions),
        ];

        let mut out = Vec::new();
        for (slot, axis) in slots {
            let current = quals.get(slot).map(String::as_str).unwrap_or(ABSENT);
            // No entry means this slot is already at a leaf.
            let Some(values) = axis.get(current) else {
                continue;
            };
            for value in values {
                let mut child = quals.clone();
                child.insert(slot, value.clone());
                out.push(child);
            }
        }
        out
    }

    /// Immediate-children adjacency over every reachable signature.
    /// Each entry contains the signature itself.
    pub fn adjacency(&self) -> HashMap<Signature, HashSet<Signature>> {
        let mut adjacency: HashMap<Signature, HashSet<Signature>> = HashMap::new();
        let mut pending: Vec<QualifierSet> = vec![QualifierSet::new()];

        while let Some(quals) = pending.pop() {
            let sig = self.signature_of(&quals);
            if adjacency.contains_key(&sig) {
                continue;
            }
            let mut immediate = HashSet::new();
            immediate.insert(sig.clone());
            for child in self.children(&quals) {
                immediate.insert(self.signature_of(&child));
                pending.push(child);
            }
            adjacency.insert(sig, immediate);
        }
        adjacency
    }
}

fn root_only(values: &[&str]) -> AxisTree {
    let mut tree = AxisTree::new();
    tree.insert(ABSENT.to_string(), values.iter().map(|v| v.to_string()).collect());
    tree
}

// ============================================================================
// Transitive closure
// ============================================================================

/// Close an immediate-descendant map transitively from `root`.
///
/// Every node reachable from `root` gets the union of its own set and the
/// resolved sets of its children. Nodes outside `root`'s reach keep their
/// immediate sets. A node met again while still being resolved (a cycle)
/// contributes only what it already lists. The input is not modified.
pub fn redundantize<K>(adjacency: &HashMap<K, HashSet<K>>, root: &K) -> HashMap<K, HashSet<K>>
where
    K: Eq + Hash + Clone,
{
    let mut resolved: HashMap<K, HashSet<K>> = HashMap::new();
    let mut in_progress: HashSet<K> = HashSet::new();
    resolve(adjacency, root, &mut in_progress, &mut resolved);

    let mut out = adjacency.clone();
    out.extend(resolved);
    out
}

fn resolve<K>(
    adjacency: &HashMap<K, HashSet<K>>,
    node: &K,
    in_progress: &mut HashSet<K>,
    resolved: &mut HashMap<K, HashSet<K>>,
) where
    K: Eq + Hash + Clone,
{
    if resolved.contains_key(node) {
        return;
    }
    let Some(immediate) = adjacency.get(node) else {
        return;
    };
    if !in_progress.insert(node.clone()) {
        return;
    }

    let mut all = immediate.clone();
    for child in immediate {
        if child == node {
            continue;
        }
        resolve(adjacency, child, in_progress, resolved);
        if let Some(sub) = resolved.get(child) {
            all.extend(sub.iter().cloned());
        }
    }

    in_progress.remove(node);
    resolved.insert(node.clone(), all);
}

// ============================================================================
// Snapshot
// ============================================================================

/// Serializable form of the closure maps, so a serving process can start
/// without the taxonomy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosureSnapshot {
    pub type_to_descendants: BTreeMap<String, BTreeSet<String>>,
    pub pq_to_descendants: BTreeMap<Signature, BTreeSet<Signature>>,
    pub predicate_symmetries: BTreeMap<String, bool>,
}

// ============================================================================
// ClosureEngine
// ============================================================================

pub struct ClosureEngine {
    type_closure: HashMap<String, HashSet<String>>,
    signature_closure: HashMap<Signature, HashSet<Signature>>,
    symmetric: HashMap<String, bool>,
    /// unordered input set -> deepest types
    deepest_cache: Mutex<HashMap<BTreeSet<String>, Vec<String>>>,
}

impl ClosureEngine {
    /// Build all closures from the taxonomy.
    ///
    /// Individual elements that fail to resolve are logged and skipped;
    /// only a failure to enumerate the two roots is fatal.
    pub fn build<T: Taxonomy + ?Sized>(taxonomy: &T) -> Result<Self> {
        let type_closure = build_type_closure(taxonomy)?;
        let signature_closure = build_signature_closure(taxonomy)?;
        let symmetric = build_symmetry(taxonomy)?;

        tracing::info!(
            types = type_closure.len(),
            signatures = signature_closure.len(),
            predicates = symmetric.len(),
            "closures built"
        );

        Ok(Self::from_parts(type_closure, signature_closure, symmetric))
    }

    fn from_parts(
        type_closure: HashMap<String, HashSet<String>>,
        signature_closure: HashMap<Signature, HashSet<Signature>>,
        symmetric: HashMap<String, bool>,
    ) -> Self {
        Self {
            type_closure,
            signature_closure,
            symmetric,
            deepest_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the predicate's meaning is direction-invariant.
    /// Unknown predicates are not symmetric.
    pub fn is_symmetric(&self, predicate: &str) -> bool {
        self.symmetric.get(predicate).copied().unwrap_or(false)
    }

    /// Descendants of a registered type, itself included.
    pub fn type_descendants(&self, type_id: &str) -> Result<&HashSet<String>> {
        self.type_closure
            .get(type_id)
            .ok_or_else(|| PfError::UnknownType(type_id.to_string()))
    }

    /// Descendants of a signature, itself included. An unrecognized
    /// signature is its own only descendant.
    pub fn signature_descendants(&self, signature: &Signature) -> Vec<Signature> {
        match self.signature_closure.get(signature) {
            Some(set) => set.iter().cloned().collect(),
            None => vec![signature.clone()],
        }
    }

    /// The members of `types` with no other member below them, in input
    /// order. Types outside the closure (mixins) are dropped.
    pub fn deepest_types(&self, types: &[String]) -> Vec<String> {
        let key: BTreeSet<String> = types.iter().cloned().collect();
        let mut cache = self.deepest_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&key) {
            return hit.clone();
        }

        let deepest: Vec<String> = types
            .iter()
            .filter(|t| match self.type_closure.get(t.as_str()) {
                // The closure contains the type itself, so exactly one hit
                // means nothing else in the list is below it.
                Some(decs) => key.iter().filter(|other| decs.contains(*other)).count() == 1,
                None => false,
            })
            .cloned()
            .collect();

        cache.insert(key, deepest.clone());
        deepest
    }

    pub fn type_count(&self) -> usize {
        self.type_closure.len()
    }

    pub fn signature_count(&self) -> usize {
        self.signature_closure.len()
    }

    pub fn snapshot(&self) -> ClosureSnapshot {
        ClosureSnapshot {
            type_to_descendants: self
                .type_closure
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            pq_to_descendants: self
                .signature_closure
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            predicate_symmetries: self
                .symmetric
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: ClosureSnapshot) -> Self {
        Self::from_parts(
            snapshot
                .type_to_descendants
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            snapshot
                .pq_to_descendants
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            snapshot.predicate_symmetries.into_iter().collect(),
        )
    }

    /// Persist the snapshot into the `Meta` keyspace.
    pub async fn write_to_store<S: KvStore + ?Sized>(&self, store: &S) -> Result<()> {
        let snapshot = self.snapshot();
        store
            .set_many(
                Keyspace::Meta,
                vec![
                    (TYPE_SNAPSHOT_KEY.to_string(), serde_json::to_string(&snapshot.type_to_descendants)?),
                    (SIGNATURE_SNAPSHOT_KEY.to_string(), serde_json::to_string(&snapshot.pq_to_descendants)?),
                    (SYMMETRY_SNAPSHOT_KEY.to_string(), serde_json::to_string(&snapshot.predicate_symmetries)?),
                ],
            )
            .await
    }

    /// Load a snapshot previously written by `write_to_store`.
    pub async fn read_from_store<S: KvStore + ?Sized>(store: &S) -> Result<Self> {
        let keys = vec![
            TYPE_SNAPSHOT_KEY.to_string(),
            SIGNATURE_SNAPSHOT_KEY.to_string(),
            SYMMETRY_SNAPSHOT_KEY.to_string(),
        ];
        let mut values = store.get_many(Keyspace::Meta, &keys).await?.into_iter();
        let mut next = |key: &str| {
            values
                .next()
                .flatten()
                .ok_or_else(|| PfError::Store(format!("closure snapshot key {} missing", key)))
        };

        let types = next(TYPE_SNAPSHOT_KEY)?;
        let signatures = next(SIGNATURE_SNAPSHOT_KEY)?;
        let symmetries = next(SYMMETRY_SNAPSHOT_KEY)?;

        Ok(Self::from_snapshot(ClosureSnapshot {
            type_to_descendants: serde_json::from_str(&types)?,
            pq_to_descendants: serde_json::from_str(&signatures)?,
            predicate_symmetries: serde_json::from_str(&symmetries)?,
        }))
    }
}

fn build_type_closure<T: Taxonomy + ?Sized>(taxonomy: &T) -> Result<HashMap<String, HashSet<String>>> {
    let mut closure = HashMap::new();
    for type_id in taxonomy.descendants(ROOT_TYPE)? {
        match taxonomy.descendants(&type_id) {
            Ok(decs) => {
                closure.insert(type_id, decs.into_iter().collect());
            }
            Err(e) => tracing::warn!("skipping type {}: {}", type_id, e),
        }
    }
    Ok(closure)
}

fn build_signature_closure<T: Taxonomy + ?Sized>(
    taxonomy: &T,
) -> Result<HashMap<Signature, HashSet<Signature>>> {
    let mut closure: HashMap<Signature, HashSet<Signature>> = HashMap::new();
    for predicate in taxonomy.descendants(ROOT_PREDICATE)? {
        match taxonomy.descendants(&predicate) {
            Ok(decs) => {
                let set = decs.iter().map(|d| Signature::predicate_only(d)).collect();
                closure.insert(Signature::predicate_only(&predicate), set);
            }
            Err(e) => tracing::warn!("skipping predicate {}: {}", predicate, e),
        }
    }

    let aspects = match taxonomy.enum_permissible_values(ASPECT_ENUM) {
        Ok(values) => QualifierLattice::aspect_tree(&values),
        Err(e) => {
            tracing::warn!("no aspect tree, affects expands on direction only: {}", e);
            AxisTree::new()
        }
    };

    for lattice in [QualifierLattice::regulates(), QualifierLattice::affects(aspects)] {
        merge_lattice(&mut closure, &lattice);
    }
    Ok(closure)
}

/// Fold a lattice's closed adjacency into the closure, then extend every
/// ancestor of the bare predicate with the synthesized descendants.
fn merge_lattice(closure: &mut HashMap<Signature, HashSet<Signature>>, lattice: &QualifierLattice) {
    let base = lattice.base_signature();
    let closed = redundantize(&lattice.adjacency(), &base);
    let base_descendants = closed.get(&base).cloned().unwrap_or_default();

    tracing::debug!(
        predicate = lattice.predicate(),
        synthesized = closed.len(),
        "qualifier lattice expanded"
    );

    for (sig, decs) in closed {
        closure.entry(sig).or_default().extend(decs);
    }
    for decs in closure.values_mut() {
        if decs.contains(&base) {
            decs.extend(base_descendants.iter().cloned());
        }
    }
}

fn build_symmetry<T: Taxonomy + ?Sized>(taxonomy: &T) -> Result<HashMap<String, bool>> {
    let mut symmetric = HashMap::new();
    for predicate in taxonomy.descendants(ROOT_PREDICATE)? {
        match taxonomy.element(&predicate) {
            Ok(element) => {
                symmetric.insert(predicate, element.symmetric.unwrap_or(false));
            }
            Err(e) => tracing::warn!("skipping symmetry of {}: {}", predicate, e),
        }
    }
    Ok(symmetric)
}
