//! Content fingerprints for cache signatures
//!
//! A fingerprint is a tagged sha256 digest over a value's shape plus a
//! bounded sample of its content. Stable across process restarts for
//! identical inputs; never a cryptographic commitment.

use sha2::{Digest, Sha256};

use crate::value::Value;

/// Row sample size for tabular values.
const SAMPLE_ROWS: usize = 30;
/// Element sample size for sequences.
const SAMPLE_ELEMENTS: usize = 10;
/// Key sample size for maps.
const SAMPLE_KEYS: usize = 20;
/// Cap on the canonical text of scalar fallbacks.
const REPR_CAP: usize = 500;

/// Compute the tagged fingerprint of a value.
///
/// | Kind | Tag | Digested content |
/// |------|-----|------------------|
/// | Table | `df:` | shape, column names, first 30 rows |
/// | List | `seq:` | type, length, types of first 10 elements |
/// | Map | `dict:` | length, first 20 sorted keys + value types |
/// | other | `obj:` | type + truncated canonical text |
pub fn fingerprint(value: &Value) -> String {
    match value {
        Value::Table(t) => {
            let mut hasher = Sha256::new();
            let (rows, cols) = t.shape();
            hasher.update(format!("({rows},{cols})"));
            hasher.update(t.columns.join("|"));
            for row in t.head(SAMPLE_ROWS) {
                for cell in row {
                    hasher.update(cell.canonical());
                    hasher.update(",");
                }
                hasher.update("\n");
            }
            format!("df:{:x}", hasher.finalize())
        }
        Value::List(items) => {
            let mut hasher = Sha256::new();
            hasher.update(value.type_tag());
            hasher.update(items.len().to_string());
            for item in items.iter().take(SAMPLE_ELEMENTS) {
                hasher.update(item.type_tag());
            }
            format!("seq:{:x}", hasher.finalize())
        }
        Value::Map(m) => {
            let mut hasher = Sha256::new();
            hasher.update(m.len().to_string());
            for (key, val) in m.iter().take(SAMPLE_KEYS) {
                hasher.update(key);
                hasher.update(val.type_tag());
            }
            format!("dict:{:x}", hasher.finalize())
        }
        other => {
            let mut hasher = Sha256::new();
            let mut repr = other.canonical();
            repr.truncate(REPR_CAP);
            hasher.update(other.type_tag());
            hasher.update(repr);
            format!("obj:{:x}", hasher.finalize())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Table;
    use std::collections::BTreeMap;

    #[test]
    fn equal_values_fingerprint_equal() {
        let a = Value::List(vec![Value::Int(1), Value::Str("x".into())]);
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn tags_match_value_kind() {
        assert!(fingerprint(&Value::table(Table::new(vec!["c".into()]))).starts_with("df:"));
        assert!(fingerprint(&Value::List(vec![])).starts_with("seq:"));
        assert!(fingerprint(&Value::Map(BTreeMap::new())).starts_with("dict:"));
        assert!(fingerprint(&Value::Int(7)).starts_with("obj:"));
        assert!(fingerprint(&Value::Null).starts_with("obj:"));
    }

    #[test]
    fn table_content_changes_fingerprint() {
        let mut a = Table::new(vec!["x".into()]);
        a.push_row(vec![Value::Int(1)]);
        let mut b = Table::new(vec!["x".into()]);
        b.push_row(vec![Value::Int(2)]);
        assert_ne!(
            fingerprint(&Value::table(a)),
            fingerprint(&Value::table(b))
        );
    }

    #[test]
    fn sequence_length_changes_fingerprint() {
        let a = Value::List(vec![Value::Int(1)]);
        let b = Value::List(vec![Value::Int(1), Value::Int(1)]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn scalar_fingerprint_tracks_content() {
        assert_ne!(
            fingerprint(&Value::Str("a".into())),
            fingerprint(&Value::Str("b".into()))
        );
    }
}
