//! Taxonomy collaborator: "descendants of X", "is predicate symmetric",
//! and enum permissible-value trees.
//!
//! `Taxonomy` is the seam the closure engine consumes. `BiolinkModel` is the
//! bundled implementation, read from a Biolink-model-style YAML document
//! (`classes`, `slots`, `enums`). Element names are exposed as formatted
//! CURIEs: class `named thing` becomes `biolink:NamedThing`, slot
//! `related to` becomes `biolink:related_to`. Enum names are used verbatim.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::Deserialize;

use crate::error::{PfError, Result};

pub const BIOLINK_PREFIX: &str = "biolink:";

/// The facts the closure engine needs about one taxonomy element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub symmetric: Option<bool>,
    pub is_a: Option<String>,
}

/// One entry of an enumeration, with its declared parent entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissibleValue {
    pub is_a: Option<String>,
}

/// External taxonomy/schema service.
///
/// Any single lookup may fail; callers are expected to log and skip.
pub trait Taxonomy: Send + Sync {
    /// `id` itself followed by every element below it.
    fn descendants(&self, id: &str) -> Result<Vec<String>>;

    fn element(&self, id: &str) -> Result<Element>;

    /// Entries of enum `enum_name`, in a stable order.
    fn enum_permissible_values(&self, enum_name: &str) -> Result<Vec<(String, PermissibleValue)>>;
}

// ============================================================================
// YAML schema document
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SchemaDoc {
    #[serde(default)]
    classes: BTreeMap<String, Option<ElementDef>>,
    #[serde(default)]
    slots: BTreeMap<String, Option<ElementDef>>,
    #[serde(default)]
    enums: BTreeMap<String, Option<EnumDef>>,
}

#[derive(Debug, Default, Deserialize)]
struct ElementDef {
    #[serde(default)]
    is_a: Option<String>,
    #[serde(default)]
    mixins: Option<Vec<String>>,
    #[serde(default)]
    symmetric: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EnumDef {
    #[serde(default)]
    permissible_values: Option<BTreeMap<String, Option<PermissibleValueDef>>>,
}

#[derive(Debug, Default, Deserialize)]
struct PermissibleValueDef {
    #[serde(default)]
    is_a: Option<String>,
}

// ============================================================================
// BiolinkModel
// ============================================================================

/// In-memory Biolink model built from the YAML schema.
#[derive(Debug, Default)]
pub struct BiolinkModel {
    elements: HashMap<String, Element>,
    /// parent CURIE -> direct children (via `is_a` or `mixins`)
    children: HashMap<String, Vec<String>>,
    enums: HashMap<String, Vec<(String, PermissibleValue)>>,
}

impl BiolinkModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: SchemaDoc = serde_yaml::from_str(text)?;
        let mut model = BiolinkModel::default();

        for (name, def) in doc.classes {
            model.add_element(format_class(&name), def.unwrap_or_default(), format_class);
        }
        for (name, def) in doc.slots {
            model.add_element(format_slot(&name), def.unwrap_or_default(), format_slot);
        }
        for (name, def) in doc.enums {
            let values = def
                .and_then(|d| d.permissible_values)
                .unwrap_or_default()
                .into_iter()
                .map(|(key, pv)| {
                    let is_a = pv.and_then(|p| p.is_a);
                    (key, PermissibleValue { is_a })
                })
                .collect();
            model.enums.insert(name, values);
        }

        // Deterministic child order regardless of map iteration order.
        for kids in model.children.values_mut() {
            kids.sort();
            kids.dedup();
        }

        Ok(model)
    }

    fn add_element(&mut self, curie: String, def: ElementDef, format: fn(&str) -> String) {
        let is_a = def.is_a.as_deref().map(format);
        if let Some(parent) = &is_a {
            self.children.entry(parent.clone()).or_default().push(curie.clone());
        }
        for mixin in def.mixins.unwrap_or_default() {
            self.children.entry(format(&mixin)).or_default().push(curie.clone());
        }
        self.elements.insert(curie, Element { symmetric: def.symmetric, is_a });
    }

    /// Number of classes and slots known to the model.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Taxonomy for BiolinkModel {
    fn descendants(&self, id: &str) -> Result<Vec<String>> {
        if !self.elements.contains_key(id) {
            return Err(PfError::Taxonomy(format!("unknown element {}", id)));
        }

        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(id);
        seen.insert(id);

        while let Some(current) = queue.pop_front() {
            out.push(current.to_string());
            if let Some(kids) = self.children.get(current) {
                for kid in kids {
                    if seen.insert(kid.as_str()) {
                        queue.push_back(kid.as_str());
                    }
                }
            }
        }
        Ok(out)
    }

    fn element(&self, id: &str) -> Result<Element> {
        self.elements
            .get(id)
            .cloned()
            .ok_or_else(|| PfError::Taxonomy(format!("unknown element {}", id)))
    }

    fn enum_permissible_values(&self, enum_name: &str) -> Result<Vec<(String, PermissibleValue)>> {
        self.enums
            .get(enum_name)
            .cloned()
            .ok_or_else(|| PfError::Taxonomy(format!("unknown enum {}", enum_name)))
    }
}

/// `gene or gene product` -> `biolink:GeneOrGeneProduct`
pub fn format_class(name: &str) -> String {
    if name.starts_with(BIOLINK_PREFIX) {
        return name.to_string();
    }
    let mut out = String::from(BIOLINK_PREFIX);
    for word in name.split_whitespace() {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// `related to` -> `biolink:related_to`
pub fn format_slot(name: &str) -> String {
    if name.starts_with(BIOLINK_PREFIX) {
        return name.to_string();
    }
    format!("{}{}", BIOLINK_PREFIX, name.split_whitespace().collect::<Vec<_>>().join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINI: &str = include_str!("../tests/fixtures/biolink_mini.yaml");

    fn model() -> BiolinkModel {
        BiolinkModel::from_yaml_str(MINI).unwrap()
    }

    #[test]
    fn test_name_formatting() {
        assert_eq!(format_class("named thing"), "biolink:NamedThing");
        assert_eq!(format_class("RNA product"), "biolink:RNAProduct");
        assert_eq!(format_slot("related to"), "biolink:related_to");
        assert_eq!(format_slot("biolink:treats"), "biolink:treats");
    }

    #[test]
    fn test_descendants_include_self_and_mixin_children() {
        let m = model();
        let decs = m.descendants("biolink:GeneOrGeneProduct").unwrap();
        assert_eq!(decs[0], "biolink:GeneOrGeneProduct");
        assert!(decs.contains(&"biolink:Gene".to_string()));
        assert!(decs.contains(&"biolink:GeneProductMixin".to_string()));
        assert!(decs.contains(&"biolink:Protein".to_string()));
        assert!(decs.contains(&"biolink:ProteinIsoform".to_string()));
    }

    #[test]
    fn test_named_thing_does_not_reach_mixins() {
        let m = model();
        let decs = m.descendants("biolink:NamedThing").unwrap();
        assert!(decs.contains(&"biolink:Gene".to_string()));
        assert!(decs.contains(&"biolink:SmallMolecule".to_string()));
        assert!(!decs.contains(&"biolink:GenomicEntity".to_string()));
        assert!(!decs.contains(&"biolink:Entity".to_string()));
    }

    #[test]
    fn test_slot_hierarchy_and_symmetry() {
        let m = model();
        let decs = m.descendants("biolink:affects").unwrap();
        assert!(decs.contains(&"biolink:regulates".to_string()));
        assert!(decs.contains(&"biolink:disrupts".to_string()));
        assert!(!decs.contains(&"biolink:treats".to_string()));

        assert_eq!(m.element("biolink:interacts_with").unwrap().symmetric, Some(true));
        assert_eq!(m.element("biolink:treats").unwrap().symmetric, None);
        assert_eq!(
            m.element("biolink:regulates").unwrap().is_a.as_deref(),
            Some("biolink:affects")
        );
    }

    #[test]
    fn test_unknown_element() {
        let m = model();
        assert!(matches!(m.descendants("biolink:Nope"), Err(PfError::Taxonomy(_))));
        assert!(m.element("biolink:Nope").is_err());
    }

    #[test]
    fn test_enum_values() {
        let m = model();
        let values = m
            .enum_permissible_values("GeneOrGeneProductOrChemicalEntityAspectEnum")
            .unwrap();
        let activity = values.iter().find(|(k, _)| k == "activity").unwrap();
        assert_eq!(activity.1.is_a.as_deref(), Some("activity_or_abundance"));
        let root = values.iter().find(|(k, _)| k == "activity_or_abundance").unwrap();
        assert_eq!(root.1.is_a, None);
        assert!(m.enum_permissible_values("NopeEnum").is_err());
    }
}
