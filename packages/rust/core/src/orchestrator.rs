//! Per-question routing: intent, then guidance, free answer, or the
//! four-stage knowledge pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use medgraph_llm::Embedder;
use medgraph_shared::{Answer, MedGraphError, Question, Result, ServingConfig};
use medgraph_storage::{Storage, describe_schema};

use crate::align::EntityAligner;
use crate::answer::AnswerSynthesizer;
use crate::assistant::Assistant;
use crate::executor::QueryExecutor;
use crate::intent::{self, Intent, IntentClassifier};
use crate::query::QuerySynthesizer;

/// Reply used whenever a serving stage fails.
pub const APOLOGY: &str = "抱歉，暂时无法回答这个问题，请稍后再试。";

/// Handles shared by every request.
#[derive(Clone)]
pub struct ServiceContext {
    pub storage: Arc<Storage>,
    pub assistant: Arc<dyn Assistant>,
    /// Vector side of alignment; lexical only when `None`.
    pub embedder: Option<Arc<dyn Embedder>>,
    pub serving: ServingConfig,
}

/// Answers questions; holds no per-request state.
pub struct ChatService {
    assistant: Arc<dyn Assistant>,
    classifier: IntentClassifier,
    synthesizer: QuerySynthesizer,
    aligner: EntityAligner,
    executor: QueryExecutor,
    answerer: AnswerSynthesizer,
    schema: String,
    llm_timeout: Duration,
    store_timeout: Duration,
    embedder_enabled: bool,
}

impl ChatService {
    pub fn new(ctx: ServiceContext) -> Self {
        let ServiceContext {
            storage,
            assistant,
            embedder,
            serving,
        } = ctx;
        Self {
            classifier: IntentClassifier::new(assistant.clone()),
            synthesizer: QuerySynthesizer::new(assistant.clone()),
            embedder_enabled: embedder.is_some(),
            aligner: EntityAligner::new(
                storage.clone(),
                embedder,
                serving.candidate_pool,
                serving.on_alignment_miss,
            )
            .with_store_timeout(serving.store_timeout()),
            executor: QueryExecutor::new(storage, serving.store_timeout()),
            answerer: AnswerSynthesizer::new(assistant.clone(), serving.max_answer_rows),
            assistant,
            schema: describe_schema(),
            llm_timeout: serving.llm_timeout(),
            store_timeout: serving.store_timeout(),
        }
    }

    /// Override both stage bounds.
    pub fn with_timeouts(mut self, llm: Duration, store: Duration) -> Self {
        self.llm_timeout = llm;
        self.store_timeout = store;
        self.aligner = self.aligner.with_store_timeout(store);
        self.executor = self.executor.with_timeout(store);
        self
    }

    /// Serving entry point. Never fails; stage errors become [`APOLOGY`].
    pub async fn ask(&self, message: &str) -> String {
        let request_id = Uuid::now_v7();
        let span = info_span!("ask", %request_id);
        async {
            let start = Instant::now();
            match self.answer(message).await {
                Ok(text) => {
                    info!(elapsed_ms = start.elapsed().as_millis() as u64, "question answered");
                    text
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "serving failed, replying with apology"
                    );
                    APOLOGY.to_string()
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Wire-shaped variant of [`ChatService::ask`].
    pub async fn respond(&self, question: &Question) -> Answer {
        Answer {
            message: self.ask(&question.message).await,
        }
    }

    /// Route one question, surfacing the first stage error.
    pub async fn answer(&self, message: &str) -> Result<String> {
        let question = message.trim();
        if question.is_empty() {
            return Err(MedGraphError::validation("question is empty"));
        }

        let intent = bounded("classify", self.llm_timeout, self.classifier.classify(question)).await?;
        info!(intent = %intent, "intent classified");

        match intent {
            Intent::Transactional => Ok(intent::guidance(question)),
            // Forwarded as received
            Intent::Unknown => {
                bounded("answer_freely", self.llm_timeout, self.assistant.answer_freely(message)).await
            }
            Intent::Knowledge => self.knowledge(question).await,
        }
    }

    async fn knowledge(&self, question: &str) -> Result<String> {
        let plan = bounded(
            "synthesize_query",
            self.llm_timeout,
            self.synthesizer.synthesize(question, &self.schema),
        )
        .await?;

        // Embedding calls go to the provider, so they get the LLM bound.
        let align_timeout = if self.embedder_enabled {
            self.llm_timeout
        } else {
            self.store_timeout
        };
        let entities = bounded("align", align_timeout, self.aligner.align(&plan.entities)).await?;

        let rows = bounded(
            "execute",
            self.store_timeout,
            self.executor.execute(&plan.query, &entities),
        )
        .await?;
        debug!(rows = rows.len(), "knowledge rows fetched");

        bounded(
            "synthesize_answer",
            self.llm_timeout,
            self.answerer.synthesize(question, &rows),
        )
        .await
    }
}

/// Run one stage under a deadline.
async fn bounded<T>(
    stage: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.inspect_err(|e| warn!(stage, error = %e, "stage failed")),
        Err(_) => Err(MedGraphError::timeout(stage, limit.as_secs())),
    }
}
