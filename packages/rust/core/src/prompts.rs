//! Prompt templates for the assistant.

use crate::intent::{KNOWLEDGE_CATEGORIES, TRANSACTIONAL_CATEGORIES};

/// Role shared by the answering prompts.
pub const ASSISTANT_ROLE: &str = "You are a hospital assistant with sound medical knowledge \
who knows how hospital diagnosis and service processes work. Always reply in the language \
of the user's question.";

/// Reply the model should give when it cannot answer a free-form question.
pub const CANNOT_ANSWER: &str = "暂未支持该需求，请换个问题试试";

pub fn classify(question: &str) -> String {
    format!(
        "Decide which intent the user question belongs to:\n\
         - request (hospital service transaction): questions about {}\n\
         - consult (medical knowledge): questions about {}\n\
         If it belongs to neither, the intent is unknown.\n\
         Reply with exactly one word: request, consult or unknown. No other text.\n\n\
         Question: {question}",
        TRANSACTIONAL_CATEGORIES.join("、"),
        KNOWLEDGE_CATEGORIES.join("、"),
    )
}

pub fn synthesize_query(question: &str, schema: &str) -> String {
    format!(
        r#"You translate questions into one SQLite SELECT statement over a medical knowledge graph.

Graph schema:
{schema}
Rules:
1. Only read from the nodes and relations tables. Write a single SELECT (or WITH ... SELECT).
2. Never put values taken from the question into the query. Use named placeholders
   :param_0, :param_1, ... instead, one per entity mention.
3. Only label and relation type names may appear as quoted string literals.
4. Match entity placeholders against the text column of their label (name or description).
5. List every placeholder in entities_to_align with the raw mention and its node label.

Reply with JSON only, in exactly this shape:
{{
  "query": "SELECT ...",
  "entities_to_align": [
    {{"param_name": "param_0", "entity": "raw entity text", "label": "Disease"}}
  ]
}}

Example for "感冒有哪些症状":
{{
  "query": "SELECT s.name AS symptom FROM nodes d JOIN relations r ON r.rel_type = 'HAVE' AND r.start_label = d.label AND r.start_id = d.id JOIN nodes s ON s.label = r.end_label AND s.id = r.end_id WHERE d.label = 'Disease' AND d.name = :param_0",
  "entities_to_align": [{{"param_name": "param_0", "entity": "感冒", "label": "Disease"}}]
}}

Question: {question}"#
    )
}

pub fn synthesize_answer(question: &str, rows: &str) -> String {
    format!(
        "Answer the user question using only the database rows below.\n\
         Requirements:\n\
         1. Be concise and accurate, in natural language.\n\
         2. Output plain text only.\n\
         3. Give the conclusion directly without filler.\n\
         4. If the rows are empty, say that no matching information was found.\n\n\
         Question: {question}\n\
         Database rows: {rows}"
    )
}

pub fn answer_freely(question: &str) -> String {
    format!(
        "Answer the user question from your own knowledge as well as you can. \
         If you really cannot answer it, reply exactly \"{CANNOT_ANSWER}\".\n\
         Requirements:\n\
         1. Be concise and accurate, in natural language.\n\
         2. Output plain text only.\n\
         3. Give the conclusion directly without filler.\n\n\
         Question: {question}"
    )
}
