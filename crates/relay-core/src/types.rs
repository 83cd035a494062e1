//! Core type definitions for the relay coordination substrate

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier assigned to a node by the coordinator
pub type NodeId = i64;

/// Id reserved for the coordinator itself
pub const COORDINATOR_ID: NodeId = 0;

/// Id carried by a communicator that has not registered yet
pub const UNASSIGNED_ID: NodeId = -1;

/// Result captured from the first successful `finished` report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalResult {
    entries: Map<String, Value>,
}

impl FinalResult {
    /// Build a result from a reported body.
    ///
    /// Objects are taken as-is; any other value is kept under the `result` key.
    pub fn from_body(body: Value) -> Self {
        let entries = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self { entries }
    }

    /// Look up a single entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the result has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

impl fmt::Display for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                writeln!(f)?;
            }
            first = false;
            match value {
                Value::String(s) => write!(f, "{}: {}", key, s)?,
                other => write!(f, "{}: {}", key, other)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_final_result_display() {
        let result = FinalResult::from_body(json!({"status": "ok", "bugs": 2}));
        assert_eq!(result.to_string(), "bugs: 2\nstatus: ok");
        assert_eq!(result.get("status"), Some(&json!("ok")));
    }

    #[test]
    fn test_final_result_wraps_scalars() {
        let result = FinalResult::from_body(json!("verified"));
        assert_eq!(result.len(), 1);
        assert_eq!(result.to_string(), "result: verified");

        let empty = FinalResult::from_body(json!({}));
        assert!(empty.is_empty());
    }
}
