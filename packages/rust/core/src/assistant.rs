//! The language-model capability used by the serving pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use medgraph_llm::ChatModel;
use medgraph_shared::Result;

use crate::prompts;

/// Narrow interface over the language model.
///
/// Every method returns the model's raw reply; callers validate it.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Name the intent of `question`.
    async fn classify(&self, question: &str) -> Result<String>;

    /// Produce a JSON query plan for `question` over `schema`.
    async fn synthesize_query(&self, question: &str, schema: &str) -> Result<String>;

    /// Phrase an answer to `question` from serialised result rows.
    async fn synthesize_answer(&self, question: &str, rows: &str) -> Result<String>;

    /// Answer without graph context, or say it cannot.
    async fn answer_freely(&self, question: &str) -> Result<String>;
}

/// [`Assistant`] backed by a chat model and the prompt templates.
pub struct LlmAssistant {
    model: Arc<dyn ChatModel>,
}

impl LlmAssistant {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Assistant for LlmAssistant {
    async fn classify(&self, question: &str) -> Result<String> {
        self.model.complete("", &prompts::classify(question)).await
    }

    async fn synthesize_query(&self, question: &str, schema: &str) -> Result<String> {
        self.model
            .complete("", &prompts::synthesize_query(question, schema))
            .await
    }

    async fn synthesize_answer(&self, question: &str, rows: &str) -> Result<String> {
        self.model
            .complete(
                prompts::ASSISTANT_ROLE,
                &prompts::synthesize_answer(question, rows),
            )
            .await
    }

    async fn answer_freely(&self, question: &str) -> Result<String> {
        self.model
            .complete(prompts::ASSISTANT_ROLE, &prompts::answer_freely(question))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoModel {
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn each_capability_uses_its_prompt() {
        let model = Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
        });
        let assistant = LlmAssistant::new(model.clone());

        assistant.classify("q1").await.unwrap();
        assistant.synthesize_query("q2", "schema").await.unwrap();
        assistant.synthesize_answer("q3", "[]").await.unwrap();
        assistant.answer_freely("q4").await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[0].1.contains("request, consult or unknown"));
        assert!(prompts[1].1.contains("schema"));
        assert!(prompts[2].1.contains("Database rows: []"));
        assert_eq!(prompts[3].0, prompts::ASSISTANT_ROLE);
        assert!(prompts[3].1.contains(prompts::CANNOT_ANSWER));
    }
}
