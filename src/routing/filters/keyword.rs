//! Keyword-based semantic filter.
//!
//! All message content is lower-cased into one string; the first group in
//! registration order with a substring keyword match wins, otherwise the
//! policy's default group applies. The matched group's allow-list is
//! intersected with the candidates case-insensitively. Groups without an
//! allow-list, and unknown default groups, leave the candidates unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{IntentGroup, SemanticPolicy};
use crate::error::GatewayError;
use crate::routing::filters::defaults::effective_groups;
use crate::routing::filters::{FilterInput, ProviderFilter};
use crate::traits::ChatProvider;

/// Substring-matching intent filter.
pub struct KeywordFilter {
    policy: SemanticPolicy,
    groups: Vec<IntentGroup>,
}

impl KeywordFilter {
    pub fn new(policy: SemanticPolicy) -> Self {
        let groups = effective_groups(&policy);
        Self { policy, groups }
    }

    fn match_group(&self, prompt: &str) -> String {
        for group in &self.groups {
            for keyword in &group.keywords {
                if prompt.contains(&keyword.to_lowercase()) {
                    debug!(keyword = %keyword, group = %group.name, "keyword match found");
                    return group.name.clone();
                }
            }
        }
        self.policy.default_group.clone()
    }
}

#[async_trait]
impl ProviderFilter for KeywordFilter {
    fn name(&self) -> &str {
        "semantic-keyword"
    }

    async fn filter(
        &self,
        input: FilterInput<'_>,
    ) -> Result<Vec<Arc<dyn ChatProvider>>, GatewayError> {
        if !self.policy.enabled {
            return Ok(input.candidates);
        }

        let prompt = input
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let matched = self.match_group(&prompt);
        if matched == self.policy.default_group {
            info!(default_group = %matched, "no keyword match found, using default group");
        } else {
            info!(intent = %matched, "semantic match found (keyword)");
        }

        let Some(group) = self.groups.iter().find(|g| g.name == matched) else {
            return Ok(input.candidates);
        };
        if group.allow_providers.is_empty() {
            return Ok(input.candidates);
        }

        let kept: Vec<Arc<dyn ChatProvider>> = input
            .candidates
            .into_iter()
            .filter(|p| {
                group
                    .allow_providers
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(p.name()))
            })
            .collect();

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::traits::ChatMessage;

    fn candidates(names: &[&str]) -> Vec<Arc<dyn ChatProvider>> {
        names
            .iter()
            .map(|n| Arc::new(MockProvider::new(*n)) as Arc<dyn ChatProvider>)
            .collect()
    }

    fn policy() -> SemanticPolicy {
        SemanticPolicy {
            enabled: true,
            default_group: "general".to_string(),
            groups: vec![
                IntentGroup {
                    name: "coding".to_string(),
                    keywords: vec!["function".to_string(), "Rust".to_string()],
                    allow_providers: vec!["Anthropic".to_string()],
                    ..Default::default()
                },
                IntentGroup {
                    name: "general".to_string(),
                    keywords: vec![],
                    allow_providers: vec![],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_keyword_match_intersects_allow_list() {
        let filter = KeywordFilter::new(policy());
        let messages = vec![ChatMessage::user("Write a FUNCTION that parses JSON")];

        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["openai", "anthropic", "gemini"]),
                messages: &messages,
                tier: None,
            })
            .await
            .unwrap();

        let names: Vec<&str> = kept.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["anthropic"]);
    }

    #[tokio::test]
    async fn test_no_match_uses_default_group_unchanged() {
        let filter = KeywordFilter::new(policy());
        let messages = vec![ChatMessage::user("what's the weather like?")];

        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["openai", "anthropic"]),
                messages: &messages,
                tier: None,
            })
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_policy_passthrough() {
        let mut p = policy();
        p.enabled = false;
        let filter = KeywordFilter::new(p);
        let messages = vec![ChatMessage::user("function")];

        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["openai"]),
                messages: &messages,
                tier: None,
            })
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_first_group_in_order_wins() {
        let mut p = policy();
        p.groups.insert(
            0,
            IntentGroup {
                name: "priority".to_string(),
                keywords: vec!["function".to_string()],
                allow_providers: vec!["openai".to_string()],
                ..Default::default()
            },
        );
        let filter = KeywordFilter::new(p);
        let messages = vec![ChatMessage::user("a function please")];

        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["openai", "anthropic"]),
                messages: &messages,
                tier: None,
            })
            .await
            .unwrap();
        let names: Vec<&str> = kept.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["openai"]);
    }

    #[tokio::test]
    async fn test_same_input_same_outcome() {
        let filter = KeywordFilter::new(policy());
        let messages = vec![ChatMessage::user("rust traits")];

        for _ in 0..5 {
            let kept = filter
                .filter(FilterInput {
                    candidates: candidates(&["openai", "anthropic"]),
                    messages: &messages,
                    tier: None,
                })
                .await
                .unwrap();
            let names: Vec<&str> = kept.iter().map(|p| p.name()).collect();
            assert_eq!(names, vec!["anthropic"]);
        }
    }
}
