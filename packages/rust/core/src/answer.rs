//! Renders result rows into a natural-language answer.

use std::sync::Arc;

use tracing::{debug, instrument};

use medgraph_shared::Result;
use medgraph_storage::QueryRow;

use crate::assistant::Assistant;

/// Character budget for serialised rows in the prompt.
const MAX_ROW_CHARS: usize = 12_000;

pub struct AnswerSynthesizer {
    assistant: Arc<dyn Assistant>,
    max_rows: usize,
}

impl AnswerSynthesizer {
    pub fn new(assistant: Arc<dyn Assistant>, max_rows: usize) -> Self {
        Self {
            assistant,
            max_rows,
        }
    }

    /// Answer `question` from `rows`, returning the model text verbatim.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn synthesize(&self, question: &str, rows: &[QueryRow]) -> Result<String> {
        let rendered = render_rows(rows, self.max_rows, MAX_ROW_CHARS);
        debug!(chars = rendered.chars().count(), "rows rendered for answer");
        self.assistant.synthesize_answer(question, &rendered).await
    }
}

/// Serialise at most `max_rows` rows as JSON, cut to `max_chars` characters.
pub fn render_rows(rows: &[QueryRow], max_rows: usize, max_chars: usize) -> String {
    let shown = &rows[..rows.len().min(max_rows)];
    let json = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());
    let mut out = truncate_chars(&json, max_chars);
    if shown.len() < rows.len() {
        out.push_str(&format!(" ({} more rows omitted)", rows.len() - shown.len()));
    }
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}
