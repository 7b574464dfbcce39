//! Canonical predicate/qualifier signatures and query-pattern keys.
//!
//! A signature is the JSON object `{"predicate": P, <qualifier>: <value>, ...}`
//! with keys sorted ascending and `", "` / `": "` separators:
//!
//! ```text
//! {"biolink:object_aspect_qualifier": "activity", "predicate": "biolink:affects"}
//! ```
//!
//! The same multiset of qualifiers always produces the same bytes, so the
//! string is usable directly as a store key and as a map key.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

/// Reserved key holding the predicate inside a signature.
pub const PREDICATE_KEY: &str = "predicate";

/// Canonical predicate + qualifier key ("pq").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Build a signature from a predicate and an unordered set of qualifiers.
    ///
    /// A qualifier named `predicate` is shadowed by the real predicate.
    pub fn new<I, K, V>(predicate: &str, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let owned: Vec<(K, V)> = qualifiers.into_iter().collect();
        let mut fields: BTreeMap<&str, &str> = owned
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
            .collect();
        fields.insert(PREDICATE_KEY, predicate);

        let mut buf = Vec::with_capacity(64);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter);
        if let Err(e) = fields.serialize(&mut ser) {
            // A map of strings into a Vec has no failure path.
            unreachable!("signature serialization failed: {}", e);
        }
        // The formatter only ever writes ASCII.
        Signature(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Signature of a bare predicate with no qualifiers.
    pub fn predicate_only(predicate: &str) -> Self {
        Self::new(predicate, std::iter::empty::<(&str, &str)>())
    }

    /// Wrap a string that is already in canonical form (e.g. read back from the store).
    pub fn from_canonical(s: impl Into<String>) -> Self {
        Signature(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Positional key `"a,b,c"` into the adjacency index.
///
/// Forward patterns are `(subject, +sig, object_category)`, reverse patterns
/// are `(subject_category, -sig, object)`.
pub fn query_pattern(a: i64, b: i64, c: i64) -> String {
    format!("{},{},{}", a, b, c)
}

/// `json.dumps(sort_keys=True)` layout: `", "` and `": "` separators, and
/// every char outside printable ASCII as `\uXXXX` (UTF-16 units).
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_predicate_only() {
        let sig = Signature::predicate_only("biolink:related_to");
        assert_eq!(sig.as_str(), r#"{"predicate": "biolink:related_to"}"#);
    }

    #[test]
    fn test_qualifier_order_is_irrelevant() {
        let a = Signature::new(
            "biolink:affects",
            vec![
                ("biolink:object_aspect_qualifier", "activity"),
                ("biolink:object_direction_qualifier", "decreased"),
            ],
        );
        let b = Signature::new(
            "biolink:affects",
            vec![
                ("biolink:object_direction_qualifier", "decreased"),
                ("biolink:object_aspect_qualifier", "activity"),
            ],
        );
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            r#"{"biolink:object_aspect_qualifier": "activity", "biolink:object_direction_qualifier": "decreased", "predicate": "biolink:affects"}"#
        );
    }

    #[test]
    fn test_predicate_key_shadows_qualifier() {
        let sig = Signature::new("biolink:affects", vec![("predicate", "biolink:causes")]);
        assert_eq!(sig, Signature::predicate_only("biolink:affects"));
    }

    #[test]
    fn test_escaping() {
        let sig = Signature::new("p", vec![("q", "a\"b\u{e9}")]);
        assert_eq!(sig.as_str(), r#"{"predicate": "p", "q": "a\"b\u00e9"}"#);
    }

    #[test]
    fn test_escaping_outside_printable_ascii() {
        let sig = Signature::new("p", vec![("q", "a\u{7f}b\n\u{1f600}")]);
        assert_eq!(sig.as_str(), r#"{"predicate": "p", "q": "a\u007fb\n\ud83d\ude00"}"#);

        let tilde = Signature::new("p", vec![("q", "~ ")]);
        assert_eq!(tilde.as_str(), r#"{"predicate": "p", "q": "~ "}"#);
    }

    #[test]
    fn test_query_pattern() {
        assert_eq!(query_pattern(12, 3, 7), "12,3,7");
        assert_eq!(query_pattern(7, -3, 12), "7,-3,12");
    }

    proptest! {
        #[test]
        fn prop_signature_is_permutation_invariant(
            quals in proptest::collection::btree_map("[a-z_:]{1,12}", "[a-z]{1,8}", 0..6),
            seed in any::<u64>(),
        ) {
            let forward: Vec<(String, String)> = quals.clone().into_iter().collect();
            let mut shuffled = forward.clone();
            // Deterministic rotation + reversal driven by the seed.
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
                if seed % 2 == 0 {
                    shuffled.reverse();
                }
            }
            let a = Signature::new("biolink:affects", forward);
            let b = Signature::new("biolink:affects", shuffled);
            prop_assert_eq!(a, b);
        }
    }
}
