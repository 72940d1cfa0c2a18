//! Intent Classifier
//!
//! Keyword-driven gate in front of the analysis pipeline. Matching is plain
//! substring containment against the configured vocabulary; no model call is
//! made here, so an unanswerable question is rejected before any LLM or
//! SQL-engine traffic happens.

use crate::config::DomainVocabulary;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Statistical,
    Detail,
    Relational,
    Temporal,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Statistical => "statistical",
            IntentType::Detail => "detail",
            IntentType::Relational => "relational",
            IntentType::Temporal => "temporal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Outcome of classification. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Recognized business domains, in vocabulary order.
    pub entities: Vec<String>,
    pub intent_types: Vec<IntentType>,
    pub requires_relations: bool,
    pub complexity: Complexity,
    pub valid: bool,
    pub confidence: f32,
}

impl Intent {
    /// The artifact produced when classification itself fails.
    pub fn invalid() -> Self {
        Self {
            entities: Vec::new(),
            intent_types: Vec::new(),
            requires_relations: false,
            complexity: Complexity::Simple,
            valid: false,
            confidence: 0.0,
        }
    }
}

pub struct IntentClassifier {
    vocabulary: DomainVocabulary,
}

impl IntentClassifier {
    pub fn new(vocabulary: DomainVocabulary) -> Self {
        Self { vocabulary }
    }

    /// Classify a question. This must never propagate a failure: the gate
    /// either passes or reports the question as not analyzable, so a panic
    /// inside is downgraded to an invalid intent with zero confidence.
    pub fn classify(&self, question: &str, pinned_domain: Option<&str>) -> Intent {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.classify_inner(question, pinned_domain)
        }));
        match outcome {
            Ok(intent) => intent,
            Err(_) => {
                warn!("Intent classification panicked, treating question as not analyzable");
                Intent::invalid()
            }
        }
    }

    fn classify_inner(&self, question: &str, pinned_domain: Option<&str>) -> Intent {
        let text = question.to_lowercase();

        let mut entities = self.extract_entities(&text);
        // A caller-pinned table contributes its domain even when the
        // question never names it.
        if let Some(domain) = pinned_domain {
            if !entities.iter().any(|e| e == domain) {
                entities.push(domain.to_string());
            }
        }

        let intent_types = self.extract_intent_types(&text);
        let requires_relations = self
            .vocabulary
            .relation_indicators
            .iter()
            .any(|t| text.contains(t.as_str()));

        let complexity = if entities.len() > 1 || requires_relations {
            Complexity::Complex
        } else if !intent_types.is_empty() {
            Complexity::Medium
        } else {
            Complexity::Simple
        };

        let valid = !entities.is_empty() && !intent_types.is_empty();
        let confidence = if valid { 0.8 } else { 0.2 };

        Intent {
            entities,
            intent_types,
            requires_relations,
            complexity,
            valid,
            confidence,
        }
    }

    fn extract_entities(&self, text: &str) -> Vec<String> {
        let mut entities = Vec::new();
        for entry in &self.vocabulary.domains {
            let matched = entry.keywords.iter().any(|k| text.contains(k.as_str()))
                || entry.concepts.iter().any(|c| text.contains(c.as_str()));
            if matched {
                entities.push(entry.name.clone());
            }
        }
        entities
    }

    fn extract_intent_types(&self, text: &str) -> Vec<IntentType> {
        let v = &self.vocabulary;
        let mut types = Vec::new();
        if contains_any(text, &v.statistical_terms) {
            types.push(IntentType::Statistical);
        }
        if contains_any(text, &v.detail_terms) {
            types.push(IntentType::Detail);
        }
        if contains_any(text, &v.relational_terms) {
            types.push(IntentType::Relational);
        }
        if contains_any(text, &v.temporal_terms) {
            types.push(IntentType::Temporal);
        }
        types
    }
}

fn contains_any(haystack: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|t| haystack.contains(t.as_str()))
}
