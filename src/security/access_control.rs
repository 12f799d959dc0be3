//! Access-control predicates evaluated before any proxy state is touched.

use serde::{Deserialize, Serialize};

use crate::backend::InvokeOptions;

/// A named predicate over `(prompt, options)`.
pub trait AccessPolicy: Send + Sync {
    /// Short identifier reported in `AccessDenied` errors.
    fn name(&self) -> &str;

    fn allows(&self, prompt: &str, options: &InvokeOptions) -> bool;
}

/// Adapts a closure into an [`AccessPolicy`].
pub struct FnPolicy<F> {
    name: String,
    check: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&str, &InvokeOptions) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> AccessPolicy for FnPolicy<F>
where
    F: Fn(&str, &InvokeOptions) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn allows(&self, prompt: &str, options: &InvokeOptions) -> bool {
        (self.check)(prompt, options)
    }
}

/// Rejects prompts longer than a character budget.
pub struct MaxPromptLength(pub usize);

impl AccessPolicy for MaxPromptLength {
    fn name(&self) -> &str {
        "max_prompt_chars"
    }

    fn allows(&self, prompt: &str, _options: &InvokeOptions) -> bool {
        prompt.chars().count() <= self.0
    }
}

/// Only lets through calls whose `model` option is on the list.
///
/// Calls without a `model` option are allowed; the backend picks its default.
pub struct AllowedModels(pub Vec<String>);

impl AccessPolicy for AllowedModels {
    fn name(&self) -> &str {
        "allowed_models"
    }

    fn allows(&self, _prompt: &str, options: &InvokeOptions) -> bool {
        match options.model() {
            Some(model) => self.0.iter().any(|m| m == model),
            None => true,
        }
    }
}

/// Case-insensitive substring block list.
pub struct BlockedTerms {
    terms: Vec<String>,
}

impl BlockedTerms {
    pub fn new(terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl AccessPolicy for BlockedTerms {
    fn name(&self) -> &str {
        "blocked_terms"
    }

    fn allows(&self, prompt: &str, _options: &InvokeOptions) -> bool {
        let prompt = prompt.to_lowercase();
        !self.terms.iter().any(|term| prompt.contains(term.as_str()))
    }
}

/// Declarative policy set, as read from a backend's `[access]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Maximum prompt length in characters.
    pub max_prompt_chars: Option<usize>,

    /// Models callers may request. Empty means any.
    pub allowed_models: Vec<String>,

    /// Substrings that cause a prompt to be rejected.
    pub blocked_terms: Vec<String>,
}

impl AccessConfig {
    /// Build the policies this config describes, in evaluation order.
    pub fn build_policies(&self) -> Vec<Box<dyn AccessPolicy>> {
        let mut policies: Vec<Box<dyn AccessPolicy>> = Vec::new();
        if let Some(max) = self.max_prompt_chars {
            policies.push(Box::new(MaxPromptLength(max)));
        }
        if !self.allowed_models.is_empty() {
            policies.push(Box::new(AllowedModels(self.allowed_models.clone())));
        }
        if !self.blocked_terms.is_empty() {
            policies.push(Box::new(BlockedTerms::new(self.blocked_terms.clone())));
        }
        policies
    }
}
