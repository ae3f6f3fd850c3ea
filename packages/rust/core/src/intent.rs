//! Intent taxonomy, classification, and transactional guidance.

use std::sync::{Arc, LazyLock};

use serde::Serialize;
use tracing::{debug, instrument};

use medgraph_shared::Result;

use crate::assistant::Assistant;

/// Transactional categories, in priority order.
pub const TRANSACTIONAL_CATEGORIES: [&str; 11] = [
    "挂号预约",
    "检查预约",
    "住院预约",
    "报告查询/下载",
    "费用支付/退费",
    "转诊/转院申请",
    "病例邮寄",
    "个人信息修改",
    "服务投诉",
    "建议反馈",
    "系统故障反馈",
];

/// Knowledge categories answerable from the graph.
pub const KNOWLEDGE_CATEGORIES: [&str; 21] = [
    "疾病对应详情",
    "疾病对应科室",
    "疾病对应症状",
    "疾病对应并发症",
    "疾病对应诱因",
    "疾病对应药物",
    "疾病宜食用",
    "疾病忌食用",
    "疾病对应传播途径",
    "疾病对应预防措施",
    "疾病对应易感人群",
    "疾病对应检查",
    "疾病对应治疗方式",
    "疾病对应治疗周期",
    "症状解读",
    "诱因导致疾病",
    "药物用于疾病",
    "食物益于疾病",
    "食物忌于疾病",
    "人群类别易感疾病",
    "检查项目用于疾病",
];

/// Reply when no transactional category matches.
pub const GENERIC_GUIDANCE: &str = "请选择页面中的事务功能按钮（如挂号预约、报告查询等）进行操作";

/// Core words of one transactional category.
struct CoreWords {
    category: &'static str,
    /// Whole segments of the category phrase.
    phrases: Vec<String>,
    /// Two-character words cut from the longer segments.
    fragments: Vec<String>,
}

static CORE_WORDS: LazyLock<Vec<CoreWords>> = LazyLock::new(|| {
    TRANSACTIONAL_CATEGORIES
        .iter()
        .map(|&category| {
            let (phrases, fragments) = split_core_words(category);
            CoreWords {
                category,
                phrases,
                fragments,
            }
        })
        .collect()
});

/// Where a question is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Transactional,
    Knowledge,
    Unknown,
}

impl Intent {
    /// Read a classifier reply. Anything unrecognised is `Unknown`.
    pub fn parse(reply: &str) -> Self {
        let label: String = reply
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_ascii_lowercase();
        match label.as_str() {
            "request" | "transactional" => Self::Transactional,
            "consult" | "knowledge" => Self::Knowledge,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactional => "transactional",
            Self::Knowledge => "knowledge",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delegates intent decisions to the assistant.
pub struct IntentClassifier {
    assistant: Arc<dyn Assistant>,
}

impl IntentClassifier {
    pub fn new(assistant: Arc<dyn Assistant>) -> Self {
        Self { assistant }
    }

    #[instrument(skip_all)]
    pub async fn classify(&self, question: &str) -> Result<Intent> {
        let reply = self.assistant.classify(question).await?;
        let intent = Intent::parse(&reply);
        debug!(%intent, reply = %reply.trim(), "intent classified");
        Ok(intent)
    }
}

/// Split a category phrase into the words matched against questions.
///
/// Segments come from splitting on `/` and whitespace. A segment of four or
/// more CJK characters also yields its two-character words.
pub fn core_words(category: &str) -> Vec<String> {
    let mut words = Vec::new();
    for segment in segments(category) {
        words.push(segment.to_string());
        words.extend(fragments(segment));
    }
    words
}

fn split_core_words(category: &str) -> (Vec<String>, Vec<String>) {
    let phrases = segments(category).map(str::to_lowercase).collect();
    let fragments = segments(category)
        .flat_map(fragments)
        .map(|w| w.to_lowercase())
        .collect();
    (phrases, fragments)
}

fn segments(category: &str) -> impl Iterator<Item = &str> {
    category
        .split(|c: char| c == '/' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

fn fragments(segment: &str) -> Vec<String> {
    let chars: Vec<char> = segment.chars().collect();
    if chars.len() < 4 || !chars.iter().all(|c| is_cjk(*c)) {
        return Vec::new();
    }
    chars
        .chunks(2)
        .filter(|p| p.len() == 2)
        .map(|p| p.iter().collect())
        .collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// First transactional category with a core word in `question`.
///
/// Whole segments are tried across every category before any two-character
/// fragment.
pub fn match_transactional(question: &str) -> Option<&'static str> {
    let question = question.to_lowercase();
    let first_with = |words: fn(&CoreWords) -> &[String]| {
        CORE_WORDS
            .iter()
            .find(|entry| words(entry).iter().any(|w| question.contains(w.as_str())))
            .map(|entry| entry.category)
    };
    first_with(|entry| entry.phrases.as_slice())
        .or_else(|| first_with(|entry| entry.fragments.as_slice()))
}

/// Guidance text for a transactional question.
pub fn guidance(question: &str) -> String {
    match match_transactional(question) {
        Some(category) => format!("请通过【{category}】功能入口进行操作（点击页面对应按钮即可）"),
        None => GENERIC_GUIDANCE.to_string(),
    }
}
