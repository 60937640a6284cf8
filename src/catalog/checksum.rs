use sha2::{Digest, Sha256};

/// Recursively sort object keys so two semantically-equal JSON values hash
/// and compare identically regardless of field order. Used both to decide
/// "byte-equivalent under canonical encoding" and to compute
/// the indexer's per-record checksum.
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(String, serde_json::Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

pub fn canonical_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonical JSON always serializes")
}

/// `sha256(canonical(name, description, tags))` step 2.
pub fn text_checksum(name: &str, description: &str, tags: &[String]) -> String {
    let payload = serde_json::json!({
        "name": name,
        "description": description,
        "tags": tags,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(&payload));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_key_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn checksum_changes_with_content() {
        let a = text_checksum("com.ex/foo", "desc", &["x".to_string()]);
        let b = text_checksum("com.ex/foo", "desc2", &["x".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = text_checksum("com.ex/foo", "desc", &["x".to_string(), "y".to_string()]);
        let b = text_checksum("com.ex/foo", "desc", &["x".to_string(), "y".to_string()]);
        assert_eq!(a, b);
    }
}
