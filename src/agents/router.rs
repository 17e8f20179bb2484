//! Decide whether a request needs a planning pass and which model serves each pass.

use crate::config::ModelConfig;

/// Kind of completion an agent turn needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Cross-cutting request: plan first, then edit.
    Plan,
    /// Direct edit.
    Edit,
}

/// Classifies the user's message.
pub trait TaskClassifier: Send + Sync {
    fn classify(&self, message: &str) -> TaskKind;
}

pub const DEFAULT_PLAN_KEYWORDS: &[&str] = &[
    "refactor",
    "restructure",
    "reorganize",
    "multiple files",
    "several files",
    "architecture",
    "design",
    "plan",
    "how should",
    "what approach",
];

/// Plans whenever the message contains one of the keywords (case-insensitive substring).
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl KeywordClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_KEYWORDS.iter().copied())
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, message: &str) -> TaskKind {
        let lower = message.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            TaskKind::Plan
        } else {
            TaskKind::Edit
        }
    }
}

/// Maps task kinds to configured model ids.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    models: ModelConfig,
}

impl ModelRouter {
    pub fn new(models: ModelConfig) -> Self {
        Self { models }
    }

    pub fn select(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::Plan => &self.models.plan_model,
            TaskKind::Edit => &self.models.edit_model,
        }
    }
}
