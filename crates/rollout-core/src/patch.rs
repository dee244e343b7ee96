//! Field-path patch operations over JSON documents.
//!
//! The engine expresses every state change as a list of [`PatchOp`]s so a
//! document store can apply them atomically under one concurrency check.
//! Paths are JSON-pointer style (`/stores/3/devicesStatus/-`), `-` meaning
//! "append" on arrays.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A single mutation of a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
  /// Insert into an object (overwriting) or into an array at an index;
  /// `-` appends.
  Add { path: String, value: Value },
  /// Overwrite an object member (created if absent) or an existing array
  /// element.
  Set { path: String, value: Value },
}

impl PatchOp {
  pub fn add(path: impl Into<String>, value: impl Serialize) -> Result<Self> {
    Ok(Self::Add { path: path.into(), value: serde_json::to_value(value)? })
  }

  pub fn set(path: impl Into<String>, value: impl Serialize) -> Result<Self> {
    Ok(Self::Set { path: path.into(), value: serde_json::to_value(value)? })
  }

  pub fn path(&self) -> &str {
    match self {
      Self::Add { path, .. } | Self::Set { path, .. } => path,
    }
  }
}

/// Path of a field on the store at `index`.
pub fn store_field(index: usize, field: &str) -> String {
  format!("/stores/{index}/{field}")
}

/// Apply `ops` in order. On error the document may be partially patched;
/// callers apply to a scratch copy.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<()> {
  for op in ops {
    apply_one(doc, op)?;
  }
  Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<()> {
  let path = op.path();
  let invalid = |reason: &str| Error::InvalidPatch {
    path:   path.to_owned(),
    reason: reason.to_owned(),
  };

  let tokens = parse_pointer(path).ok_or_else(|| invalid("not a pointer"))?;
  let (last, parents) = tokens.split_last().ok_or_else(|| invalid("empty path"))?;

  let mut target = &mut *doc;
  for token in parents {
    target = match target {
      Value::Object(map) => map.get_mut(token),
      Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
      _ => None,
    }
    .ok_or_else(|| invalid("missing parent"))?;
  }

  match (op, target) {
    (PatchOp::Add { value, .. } | PatchOp::Set { value, .. }, Value::Object(map)) => {
      map.insert(last.clone(), value.clone());
    }
    (PatchOp::Add { value, .. }, Value::Array(items)) => {
      if last == "-" {
        items.push(value.clone());
      } else {
        let index = last.parse::<usize>().map_err(|_| invalid("bad index"))?;
        if index > items.len() {
          return Err(invalid("index out of bounds"));
        }
        items.insert(index, value.clone());
      }
    }
    (PatchOp::Set { value, .. }, Value::Array(items)) => {
      let slot = last
        .parse::<usize>()
        .ok()
        .and_then(|i| items.get_mut(i))
        .ok_or_else(|| invalid("index out of bounds"))?;
      *slot = value.clone();
    }
    _ => return Err(invalid("parent is not a container")),
  }
  Ok(())
}

fn parse_pointer(path: &str) -> Option<Vec<String>> {
  let rest = path.strip_prefix('/')?;
  Some(
    rest
      .split('/')
      .map(|t| t.replace("~1", "/").replace("~0", "~"))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn set_and_append() {
    let mut doc = json!({
      "status": "Scheduled",
      "stores": [{ "storeId": "US001", "devicesStatus": [1] }]
    });
    let ops = vec![
      PatchOp::set("/status", "Completed").unwrap(),
      PatchOp::add(store_field(0, "devicesStatus/-"), 2).unwrap(),
      PatchOp::set(store_field(0, "dateCompleted"), "2024-03-01T10:00:00Z").unwrap(),
    ];
    apply(&mut doc, &ops).unwrap();

    assert_eq!(doc["status"], "Completed");
    assert_eq!(doc["stores"][0]["devicesStatus"], json!([1, 2]));
    assert_eq!(doc["stores"][0]["dateCompleted"], "2024-03-01T10:00:00Z");
  }

  #[test]
  fn add_initialises_missing_list() {
    let mut doc = json!({ "stores": [{ "storeId": "US001" }] });
    apply(&mut doc, &[PatchOp::add("/stores/0/devicesStatus", [7]).unwrap()]).unwrap();
    assert_eq!(doc["stores"][0]["devicesStatus"], json!([7]));
  }

  #[test]
  fn missing_parent_is_rejected() {
    let mut doc = json!({ "stores": [] });
    let err = apply(&mut doc, &[PatchOp::set("/stores/4/status", "Failed").unwrap()]);
    assert!(matches!(err, Err(Error::InvalidPatch { .. })));
  }

  #[test]
  fn escaped_tokens_are_decoded() {
    let mut doc = json!({});
    apply(&mut doc, &[PatchOp::set("/a~1b", 1).unwrap()]).unwrap();
    assert_eq!(doc["a/b"], 1);
  }

  #[test]
  fn ops_serialise_with_tag() {
    let op = PatchOp::set("/status", "Canceled").unwrap();
    assert_eq!(
      serde_json::to_value(&op).unwrap(),
      json!({ "op": "set", "path": "/status", "value": "Canceled" })
    );
  }
}
