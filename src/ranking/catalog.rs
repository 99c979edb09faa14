//! Turns server tool definitions into ranking entries.

use serde::{Deserialize, Serialize};

use super::{FieldKind, ToolEntry};
use crate::mcp_client::McpToolDefinition;

/// Per-field priority weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub service: f64,
    pub operation: f64,
    pub tag: f64,
    pub path: f64,
    pub description: f64,
    pub param_desc: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            service: 3.0,
            operation: 3.0,
            tag: 2.0,
            path: 1.5,
            description: 1.0,
            param_desc: 0.5,
        }
    }
}

impl FieldWeights {
    pub fn weight(&self, kind: FieldKind) -> f64 {
        match kind {
            FieldKind::Service => self.service,
            FieldKind::Operation => self.operation,
            FieldKind::Tag => self.tag,
            FieldKind::Path => self.path,
            FieldKind::Description => self.description,
            FieldKind::ParamDesc => self.param_desc,
        }
    }
}

/// `server:tool`.
pub fn doc_id(server: &str, tool: &str) -> String {
    format!("{server}:{tool}")
}

/// Split a doc id at the first `:`. Both halves must be non-empty; the tool
/// half may itself contain `:`.
pub fn split_doc_id(id: &str) -> Option<(&str, &str)> {
    let (server, tool) = id.split_once(':')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Build the ranking entry for one tool.
///
/// - `service`: the server name
/// - `operation`: last segment of a dotted or slashed tool name
/// - `path`: the preceding segments (`repos.issues.list` → `repos issues`)
/// - `tag`: strings under `annotations.tags` or `_meta.tags`
/// - `param_desc`: input schema property names and descriptions
pub fn tool_entry(server: &str, tool: &McpToolDefinition, weights: &FieldWeights) -> ToolEntry {
    let (path, operation) = match tool.name.rfind(['.', '/']) {
        Some(i) if i > 0 && i + 1 < tool.name.len() => {
            (Some(&tool.name[..i]), &tool.name[i + 1..])
        }
        _ => (None, tool.name.as_str()),
    };

    let mut entry = ToolEntry::new(doc_id(server, &tool.name))
        .field(FieldKind::Service, server, weights.service)
        .field(FieldKind::Operation, operation, weights.operation)
        .field(FieldKind::Description, tool.description.as_str(), weights.description);

    if let Some(path) = path {
        entry = entry.field(FieldKind::Path, path.replace(['.', '/'], " "), weights.path);
    }

    for tag in tags(tool) {
        entry = entry.field(FieldKind::Tag, tag, weights.tag);
    }

    entry.field(FieldKind::ParamDesc, param_text(&tool.input_schema), weights.param_desc)
}

/// Entries for a whole catalog, in input order.
pub fn entries_for(tools: &[(String, McpToolDefinition)], weights: &FieldWeights) -> Vec<ToolEntry> {
    tools
        .iter()
        .map(|(server, tool)| tool_entry(server, tool, weights))
        .collect()
}

fn tags(tool: &McpToolDefinition) -> Vec<String> {
    let mut tags: Vec<String> = [tool.annotations.as_ref(), tool.meta.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|v| v.get("tags").and_then(|t| t.as_array()))
        .flatten()
        .filter_map(|t| t.as_str().map(str::to_string))
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn param_text(schema: &serde_json::Value) -> String {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return String::new();
    };
    properties
        .iter()
        .map(|(name, prop)| match prop.get("description").and_then(|d| d.as_str()) {
            Some(desc) => format!("{name} {desc}"),
            None => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
