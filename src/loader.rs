//! Policy document loading
//!
//! A file holds either one policy or a list of policies:
//! - JSON: a policy object, or an array of policy objects
//! - TOML: a policy table, or `[[policy]]` tables
//!
//! Policies without an `id` get `<file stem>#<index>`.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::access::{AccessPolicy, PolicyMutation};
use crate::error::{PbacError, Result};

/// Load the policies in `path`, optionally running create-time validation
pub fn load_policies(path: impl AsRef<Path>, validate: bool) -> Result<Vec<AccessPolicy>> {
    let path = path.as_ref();
    let policies = read_documents(path)
        .and_then(|docs| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            docs.into_iter()
                .enumerate()
                .map(|(index, doc)| {
                    let id = document_id(&doc).unwrap_or_else(|| format!("{stem}#{index}"));
                    parse_policy(doc, id, validate)
                })
                .collect::<Result<Vec<_>>>()
        })
        .map_err(|source| PbacError::PolicyFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;

    info!(
        path = %path.display(),
        policies = policies.len(),
        statements = policies.iter().map(|p| p.statement.len()).sum::<usize>(),
        "Loaded policy file"
    );
    Ok(policies)
}

/// Parse policies from a JSON string
pub fn policies_from_json(json: &str, validate: bool) -> Result<Vec<AccessPolicy>> {
    let docs = split_documents(serde_json::from_str(json)?, None);
    docs.into_iter()
        .enumerate()
        .map(|(index, doc)| {
            let id = document_id(&doc).unwrap_or_else(|| format!("policy#{index}"));
            parse_policy(doc, id, validate)
        })
        .collect()
}

fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let text = match extension.as_deref() {
        Some("json") | Some("toml") => std::fs::read_to_string(path)?,
        _ => return Err(PbacError::UnsupportedFormat(path.to_path_buf())),
    };

    match extension.as_deref() {
        Some("toml") => Ok(split_documents(toml::from_str(&text)?, Some("policy"))),
        _ => Ok(split_documents(serde_json::from_str(&text)?, None)),
    }
}

fn split_documents(root: Value, list_key: Option<&str>) -> Vec<Value> {
    match root {
        Value::Array(items) => items,
        Value::Object(mut map) => match list_key.and_then(|key| map.remove(key)) {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

fn document_id(doc: &Value) -> Option<String> {
    doc.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(String::from)
}

fn parse_policy(doc: Value, id: String, validate: bool) -> Result<AccessPolicy> {
    if validate {
        let mutation: PolicyMutation = serde_json::from_value(doc)?;
        return Ok(mutation.into_policy(id)?);
    }

    let mut policy: AccessPolicy = serde_json::from_value(doc)?;
    policy.id = id;
    Ok(policy)
}
