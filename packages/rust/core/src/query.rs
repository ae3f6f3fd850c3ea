//! Query synthesis: question + schema to a validated, parametrized query plan.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use medgraph_shared::{Label, MedGraphError, RelationKind, Result};
use medgraph_storage::{ensure_read_only, split_literals};

use crate::assistant::Assistant;

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:$@]([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// A raw entity mention the query needs bound to a canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityMention {
    /// Placeholder name without its sigil.
    pub param_name: String,
    pub entity: String,
    pub label: Label,
}

/// A validated query and the mentions feeding its placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    pub query: String,
    pub entities: Vec<EntityMention>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(alias = "cypher_query")]
    query: Option<String>,
    #[serde(default)]
    entities_to_align: Vec<RawMention>,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    param_name: String,
    entity: String,
    label: String,
}

/// Turns questions into query plans through the assistant.
pub struct QuerySynthesizer {
    assistant: Arc<dyn Assistant>,
}

impl QuerySynthesizer {
    pub fn new(assistant: Arc<dyn Assistant>) -> Self {
        Self { assistant }
    }

    /// Ask the assistant for a plan and validate it.
    ///
    /// A reply that is not a well-formed plan is a generation error.
    #[instrument(skip_all)]
    pub async fn synthesize(&self, question: &str, schema: &str) -> Result<QueryPlan> {
        let reply = self.assistant.synthesize_query(question, schema).await?;
        let plan = parse_plan(&reply)?;
        debug!(query = %plan.query, entities = plan.entities.len(), "query synthesized");
        Ok(plan)
    }
}

/// Parse and validate a plan from a model reply.
pub fn parse_plan(reply: &str) -> Result<QueryPlan> {
    let json = extract_json_object(reply)
        .ok_or_else(|| MedGraphError::Generation("reply contains no JSON object".into()))?;
    let raw: RawPlan = serde_json::from_str(json)
        .map_err(|e| MedGraphError::Generation(format!("reply is not a query plan: {e}")))?;

    let query = raw.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(MedGraphError::Generation("query plan has an empty query".into()));
    }

    let mut entities = Vec::with_capacity(raw.entities_to_align.len());
    let mut seen = HashSet::new();
    for mention in raw.entities_to_align {
        let param_name = mention.param_name.trim().trim_start_matches([':', '$', '@']);
        if !PARAM_NAME.is_match(param_name) {
            return Err(MedGraphError::Generation(format!(
                "invalid parameter name '{}'",
                mention.param_name
            )));
        }
        if !seen.insert(param_name.to_string()) {
            return Err(MedGraphError::Generation(format!(
                "duplicate parameter '{param_name}'"
            )));
        }
        let label: Label = mention.label.parse().map_err(|_| {
            MedGraphError::Generation(format!("unknown entity label '{}'", mention.label))
        })?;
        let entity = mention.entity.trim();
        if entity.is_empty() {
            return Err(MedGraphError::Generation(format!(
                "empty entity for parameter '{param_name}'"
            )));
        }
        entities.push(EntityMention {
            param_name: param_name.to_string(),
            entity: entity.to_string(),
            label,
        });
    }

    validate_query(&query, &seen)?;
    Ok(QueryPlan { query, entities })
}

/// Check placeholders and literals of a synthesized query.
fn validate_query(query: &str, params: &HashSet<String>) -> Result<()> {
    ensure_read_only(query).map_err(|e| MedGraphError::Generation(e.to_string()))?;

    let (code, literals) = split_literals(query);
    let used: HashSet<String> = PLACEHOLDER
        .captures_iter(&code)
        .map(|c| c[1].to_string())
        .collect();

    if let Some(missing) = used.iter().find(|p| !params.contains(*p)) {
        return Err(MedGraphError::Generation(format!(
            "placeholder '{missing}' has no entity to bind"
        )));
    }
    if let Some(unused) = params.iter().find(|p| !used.contains(*p)) {
        return Err(MedGraphError::Generation(format!(
            "entity parameter '{unused}' is not used by the query"
        )));
    }
    if let Some(literal) = literals.iter().find(|l| !is_schema_constant(l)) {
        return Err(MedGraphError::Generation(format!(
            "query embeds the literal value '{literal}' instead of a parameter"
        )));
    }
    Ok(())
}

/// Labels, relation types, and pure punctuation such as `'%'` are allowed.
fn is_schema_constant(literal: &str) -> bool {
    literal.chars().all(|c| !c.is_alphanumeric())
        || Label::ALL.iter().any(|l| l.as_str() == literal)
        || RelationKind::ALL.iter().any(|k| k.as_str() == literal)
}

/// Find the first balanced JSON object in `text`, ignoring code fences and prose.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
