//! Planning - turns a task description into subtask drafts.
//!
//! # Strategy
//! Planning is a pure function of `(description, context)`: no I/O and no
//! side effects besides fresh id generation. The [`Planner`] trait is the
//! seam; [`KeywordPlanner`] is the default strategy and is itself driven by
//! a list of [`KeywordRule`]s, so the capability set and matching can be
//! changed without touching the scheduler.

use crate::task::{CapabilityType, SubtaskDraft, TaskContext};

/// Planner strategy plug-in.
pub trait Planner: Send + Sync {
    /// Produce subtask drafts with dependency edges.
    ///
    /// # Postconditions
    /// - every draft has a fresh id
    /// - dependencies only name drafts in the returned set
    /// - empty only if nothing in the description matched
    fn plan(&self, description: &str, context: &TaskContext) -> Vec<SubtaskDraft>;

    fn name(&self) -> &str {
        "planner"
    }
}

/// One capability and the words that select it.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub capability: CapabilityType,
    /// Lowercase word prefixes ("analy" matches "analyze" and "analysis")
    pub keywords: Vec<String>,
    pub description: String,
    /// Capabilities that, when also planned, must complete first
    pub after: Vec<CapabilityType>,
}

impl KeywordRule {
    pub fn new(
        capability: CapabilityType,
        keywords: &[&str],
        description: impl Into<String>,
    ) -> Self {
        Self {
            capability,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            description: description.into(),
            after: Vec::new(),
        }
    }

    pub fn after(mut self, capabilities: &[CapabilityType]) -> Self {
        self.after.extend(capabilities.iter().cloned());
        self
    }

    fn matches(&self, words: &[String]) -> bool {
        words
            .iter()
            .any(|word| self.keywords.iter().any(|k| word.starts_with(k.as_str())))
    }
}

/// Keyword-driven planner.
///
/// Rules are evaluated in order; each matching rule yields one draft that
/// depends on the earlier drafts named in its `after` list.
#[derive(Debug, Clone)]
pub struct KeywordPlanner {
    rules: Vec<KeywordRule>,
    fallback: Option<(CapabilityType, String)>,
}

impl KeywordPlanner {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self {
            rules,
            fallback: None,
        }
    }

    /// Plan a single subtask of `capability` when no rule matches.
    pub fn with_fallback(mut self, capability: CapabilityType, description: impl Into<String>) -> Self {
        self.fallback = Some((capability, description.into()));
        self
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

impl Default for KeywordPlanner {
    fn default() -> Self {
        use CapabilityType::*;

        Self::new(vec![
            KeywordRule::new(
                WebResearch,
                &["research", "find", "search"],
                "Research information related to the task",
            ),
            KeywordRule::new(
                DataAnalysis,
                &["analy", "data", "statistic"],
                "Analyze data related to the task",
            )
            .after(&[WebResearch]),
            KeywordRule::new(
                CodeGeneration,
                &["code", "program", "script"],
                "Generate code based on task requirements",
            )
            .after(&[DataAnalysis]),
            KeywordRule::new(
                ContentCreation,
                &["write", "create", "generate", "summar"],
                "Create content based on task requirements",
            )
            .after(&[WebResearch, DataAnalysis, CodeGeneration]),
        ])
    }
}

impl Planner for KeywordPlanner {
    fn plan(&self, description: &str, _context: &TaskContext) -> Vec<SubtaskDraft> {
        let words = tokenize(description);
        let mut drafts: Vec<SubtaskDraft> = Vec::new();

        for rule in &self.rules {
            if !rule.matches(&words) {
                continue;
            }
            if drafts.iter().any(|d| d.capability == rule.capability) {
                continue;
            }
            let upstream: Vec<_> = drafts
                .iter()
                .filter(|d| rule.after.contains(&d.capability))
                .map(|d| d.id)
                .collect();
            drafts.push(
                SubtaskDraft::new(rule.capability.clone(), rule.description.clone())
                    .with_dependencies(upstream),
            );
        }

        if drafts.is_empty() {
            if let Some((capability, text)) = &self.fallback {
                drafts.push(SubtaskDraft::new(capability.clone(), text.clone()));
            }
        }

        drafts
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Lowercase alphanumeric words of `text`.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
