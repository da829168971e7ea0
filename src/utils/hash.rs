use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of a string
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute SHA-256 hash of a value's canonical JSON form.
///
/// Maps are serialized with sorted keys (`BTreeMap`), so equal values hash equally.
pub fn compute_json_hash<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let content = serde_json::to_string(value)?;
    Ok(compute_hash(&content))
}
