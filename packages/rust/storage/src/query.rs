//! Read-only parametrized query execution over the graph tables.

use std::fmt::Write as _;
use std::sync::LazyLock;

use libsql::Value;
use libsql::params::Params;
use medgraph_shared::{Label, MedGraphError, RelationKind, Result};
use regex::Regex;

use crate::Storage;

/// One result row, column name to JSON value, in column order.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

static WRITE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|upsert|drop|alter|create|attach|detach|pragma|vacuum|reindex|analyze|begin|commit|rollback|savepoint|release)\b",
    )
    .expect("valid regex")
});

/// `REPLACE` as a statement; `replace(...)` the string function is read-only.
static REPLACE_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\breplace\b\s*(?:[^\s(]|$)").expect("valid regex"));

impl Storage {
    /// Run a synthesized query with named string parameters.
    ///
    /// Parameter names may be given with or without the leading `:`. Rows
    /// come back in store order.
    pub async fn query_rows(&self, sql: &str, params: &[(String, String)]) -> Result<Vec<QueryRow>> {
        ensure_read_only(sql)?;

        let named: Vec<(String, Value)> = params
            .iter()
            .map(|(name, value)| {
                let key = if name.starts_with([':', '@', '$']) {
                    name.clone()
                } else {
                    format!(":{name}")
                };
                (key, Value::Text(value.clone()))
            })
            .collect();

        let mut rows = self
            .conn
            .query(sql, Params::Named(named))
            .await
            .map_err(|e| MedGraphError::Execution(e.to_string()))?;

        let columns: Vec<String> = (0..rows.column_count())
            .map(|i| {
                rows.column_name(i)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("column_{i}"))
            })
            .collect();

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| MedGraphError::Execution(e.to_string()))?
        {
            let mut record = QueryRow::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row
                    .get_value(i as i32)
                    .map_err(|e| MedGraphError::Execution(e.to_string()))?;
                record.insert(column.clone(), to_json(value));
            }
            results.push(record);
        }
        Ok(results)
    }
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(i),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Reject anything but a single `SELECT` or `WITH` statement without writes.
///
/// String literals, quoted identifiers, and comments are blanked before the
/// keyword scan so a value such as `'drop'` does not trip it.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let (code, _) = split_literals(sql);
    let trimmed = code.trim().trim_end_matches(';').trim_end();

    if trimmed.is_empty() {
        return Err(MedGraphError::Execution("empty query".into()));
    }
    if trimmed.contains(';') {
        return Err(MedGraphError::Execution(
            "only a single statement may be executed".into(),
        ));
    }
    let first = trimmed
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if first != "select" && first != "with" {
        return Err(MedGraphError::Execution(format!(
            "only SELECT queries are allowed, got '{first}'"
        )));
    }
    if let Some(m) = WRITE_KEYWORD.find(trimmed) {
        return Err(MedGraphError::Execution(format!(
            "query contains forbidden keyword '{}'",
            m.as_str()
        )));
    }
    if REPLACE_STATEMENT.is_match(trimmed) {
        return Err(MedGraphError::Execution(
            "query contains forbidden keyword 'replace'".into(),
        ));
    }
    Ok(())
}

/// Split SQL into code and the contents of its single-quoted string literals.
///
/// In the returned code every quoted span and comment is blanked to one
/// space. Double-quoted and backtick identifiers are blanked but not collected.
pub fn split_literals(sql: &str) -> (String, Vec<String>) {
    let mut code = String::with_capacity(sql.len());
    let mut literals = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut content = String::new();
                // Doubled quote inside a literal is an escaped quote
                loop {
                    match chars.next() {
                        Some(q) if q == c => {
                            if chars.peek() == Some(&c) {
                                chars.next();
                                content.push(c);
                            } else {
                                break;
                            }
                        }
                        Some(other) => content.push(other),
                        None => break,
                    }
                }
                if c == '\'' {
                    literals.push(content);
                }
                code.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                code.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                code.push(' ');
            }
            _ => code.push(c),
        }
    }
    (code, literals)
}

/// Textual description of the graph schema for query synthesis.
pub fn describe_schema() -> String {
    let mut out = String::new();
    out.push_str("Tables:\n");
    out.push_str(
        "- nodes(label TEXT, id TEXT, name TEXT, description TEXT), primary key (label, id)\n",
    );
    out.push_str(
        "- relations(rel_type TEXT, start_label TEXT, start_id TEXT, end_label TEXT, end_id TEXT)\n",
    );
    out.push_str("\nNode labels and the column holding their text:\n");
    for label in Label::ALL {
        let _ = writeln!(out, "- {label}: {}", label.text_attribute());
    }
    out.push_str("\nRelation types (start label -> end label):\n");
    for kind in RelationKind::ALL {
        let (start, end) = kind.endpoints();
        let _ = writeln!(out, "- {kind}: {start} -> {end}");
    }
    out
}
