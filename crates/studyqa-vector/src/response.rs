//! Shape checks for raw index responses.

use serde_json::Value;
use std::collections::HashMap;

use studyqa_core::types::{Document, Match, MatchMetadata, Namespace};
use studyqa_core::{Error, Result};

/// Parse `{"matches": [...]}`. Metadata is dropped unless `include_metadata`.
pub fn parse_matches(namespace: &Namespace, raw: &Value, include_metadata: bool) -> Result<Vec<Match>> {
    let list = raw
        .get("matches")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::shape(namespace, "expected a `matches` array"))?;

    let mut matches = Vec::with_capacity(list.len());
    for (i, item) in list.iter().enumerate() {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::shape(namespace, format!("match {} has no string `id`", i)))?;
        let score = item
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::shape(namespace, format!("match `{}` has no numeric `score`", id)))?;
        let metadata = if include_metadata { parse_metadata(namespace, id, item.get("metadata"))? } else { None };
        matches.push(Match { id: id.to_string(), score: score as f32, metadata });
    }
    Ok(matches)
}

/// Parse `{"vectors": {"<id>": {...}}}` into documents keyed by id.
pub fn parse_documents(namespace: &Namespace, raw: &Value) -> Result<HashMap<String, Document>> {
    let vectors = raw
        .get("vectors")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::shape(namespace, "expected a `vectors` object"))?;

    let mut out = HashMap::with_capacity(vectors.len());
    for (key, entry) in vectors {
        if !entry.is_object() {
            return Err(Error::shape(namespace, format!("vector `{}` is not an object", key)));
        }
        let id = entry.get("id").and_then(Value::as_str).unwrap_or(key).to_string();
        let metadata = parse_metadata(namespace, &id, entry.get("metadata"))?.unwrap_or_default();
        out.insert(key.clone(), Document { id, metadata });
    }
    Ok(out)
}

fn parse_metadata(namespace: &Namespace, id: &str, raw: Option<&Value>) -> Result<Option<MatchMetadata>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| Error::shape(namespace, format!("metadata of `{}`: {}", id, e))),
        Some(_) => Err(Error::shape(namespace, format!("metadata of `{}` is not an object", id))),
    }
}
