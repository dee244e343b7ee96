//! Encoding helpers between typed documents and stored JSON rows.

use rollout_core::{
  patch::{self, PatchOp},
  store::Versioned,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Result;

/// A document as stored: its JSON text and the ETag of that text.
pub struct Encoded {
  pub doc:  String,
  pub etag: String,
}

/// Serialise `document` and compute its ETag.
pub fn encode<T: Serialize>(document: &T) -> Result<Encoded> {
  let doc = serde_json::to_string(document)?;
  let etag = compute_etag(&doc);
  Ok(Encoded { doc, etag })
}

pub fn decode<T: DeserializeOwned>(doc: &str, etag: String) -> Result<Versioned<T>> {
  Ok(Versioned { etag, document: serde_json::from_str(doc)? })
}

/// Apply `ops` to a stored document.
///
/// The result is round-tripped through `T` so a patch can never persist a
/// document that no longer parses.
pub fn patched<T: Serialize + DeserializeOwned>(
  doc: &str,
  ops: &[PatchOp],
) -> Result<(T, Encoded)> {
  let mut value: Value = serde_json::from_str(doc)?;
  patch::apply(&mut value, ops)?;
  let document: T = serde_json::from_value(value)?;
  let encoded = encode(&document)?;
  Ok((document, encoded))
}

/// Quoted hex SHA-256 of the stored text, usable as an HTTP ETag verbatim.
pub fn compute_etag(doc: &str) -> String {
  let hash = Sha256::digest(doc.as_bytes());
  format!("\"{}\"", hex::encode(hash))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn etag_is_stable_and_content_sensitive() {
    assert_eq!(compute_etag("{}"), compute_etag("{}"));
    assert_ne!(compute_etag("{\"a\":1}"), compute_etag("{\"a\":2}"));
    assert!(compute_etag("{}").starts_with('"'));
  }
}
