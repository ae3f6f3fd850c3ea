//! Test doubles shared by the serving tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use medgraph_llm::Embedder;
use medgraph_shared::{IdStrategy, MedGraphError, Result};
use medgraph_storage::Storage;

use crate::assistant::Assistant;
use crate::loader::{GraphLoader, SilentProgress};
use crate::source::parse_records;

/// Assistant with canned replies that records every call.
#[derive(Default)]
pub struct ScriptedAssistant {
    intent: String,
    query: String,
    answer: String,
    free: String,
    fail_on: Option<&'static str>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
    rows: Mutex<Option<String>>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self {
            intent: "unknown".into(),
            ..Self::default()
        }
    }

    pub fn with_intent(mut self, reply: &str) -> Self {
        self.intent = reply.into();
        self
    }

    pub fn with_query(mut self, reply: &str) -> Self {
        self.query = reply.into();
        self
    }

    pub fn with_answer(mut self, reply: &str) -> Self {
        self.answer = reply.into();
        self
    }

    pub fn with_free(mut self, reply: &str) -> Self {
        self.free = reply.into();
        self
    }

    /// Make the named capability return a generation error.
    pub fn failing(mut self, method: &'static str) -> Self {
        self.fail_on = Some(method);
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Questions in the order the assistant received them.
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }

    /// Rows handed to the last answer synthesis.
    pub fn last_rows(&self) -> Option<String> {
        self.rows.lock().unwrap().clone()
    }

    async fn reply(&self, method: &'static str, question: &str, text: &str) -> Result<String> {
        self.calls.lock().unwrap().push(method.to_string());
        self.questions.lock().unwrap().push(question.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(method) {
            return Err(MedGraphError::Generation(format!("{method} failed")));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn classify(&self, question: &str) -> Result<String> {
        self.reply("classify", question, &self.intent).await
    }

    async fn synthesize_query(&self, question: &str, _schema: &str) -> Result<String> {
        self.reply("synthesize_query", question, &self.query).await
    }

    async fn synthesize_answer(&self, question: &str, rows: &str) -> Result<String> {
        *self.rows.lock().unwrap() = Some(rows.to_string());
        self.reply("synthesize_answer", question, &self.answer).await
    }

    async fn answer_freely(&self, question: &str) -> Result<String> {
        self.reply("answer_freely", question, &self.free).await
    }
}

/// Embedder with fixed vectors; unknown texts get a zero vector.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            dim: 2,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        if self.vectors.is_empty() {
            self.dim = vector.len();
        }
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model(&self) -> &str {
        "fake-embedder"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dim])
            })
            .collect())
    }
}

const SEED_RECORDS: &str = r#"{"name":"感冒","desc":"上呼吸道病毒感染","symptom":["发热","咳嗽"],"drug":["布洛芬"]}
{"name":"流行性感冒","symptom":["发热","咳痰"]}
{"name":"肺炎","symptom":["咳嗽","咳痰"]}
"#;

/// A fresh store holding three diseases and their symptoms.
pub async fn seeded_storage() -> Arc<Storage> {
    let path = std::env::temp_dir().join(format!("medgraph_seed_{}.db", Uuid::now_v7()));
    let storage = Storage::open(&path).await.expect("open seed db");
    let records = parse_records(SEED_RECORDS.as_bytes()).expect("parse seed");
    let report = GraphLoader::new(&storage, IdStrategy::Sequential)
        .ingest(records, &SilentProgress)
        .await;
    assert_eq!(report.records_written, 3);
    Arc::new(storage)
}
