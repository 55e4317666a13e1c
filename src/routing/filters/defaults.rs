//! System-defined intent groups.
//!
//! A pre-tuned starting set for semantic routing. Policies opt in with
//! `extend_defaults`; configured groups keep priority and shadow a default
//! with the same name.

use crate::config::{IntentGroup, SemanticPolicy};

/// The built-in intent groups.
pub fn system_default_groups() -> Vec<IntentGroup> {
    vec![
        IntentGroup {
            name: "coding".to_string(),
            keywords: vec![],
            description: "Software development, programming, and technical problem solving."
                .to_string(),
            examples: vec![
                "write a binary search algorithm in python".to_string(),
                "how do I fix a null pointer exception in java?".to_string(),
                "refactor this function to be more efficient".to_string(),
                "write a unit test for this go struct".to_string(),
                "implement a linked list in c++".to_string(),
                "explain this code snippet to me".to_string(),
                "generate a regex for email validation".to_string(),
            ],
            allow_providers: vec![],
            required_capability: Some("coding".to_string()),
        },
        IntentGroup {
            name: "fast-chat".to_string(),
            keywords: vec![],
            description:
                "Simple conversational interactions, chit-chat, and basic knowledge questions."
                    .to_string(),
            examples: vec![
                "hello! how is your day going?".to_string(),
                "tell me a joke about robots".to_string(),
                "what is the capital of france?".to_string(),
                "how cold is it in london today?".to_string(),
                "who won the world cup in 2022?".to_string(),
                "translate 'hello' to spanish".to_string(),
                "what is 2 + 2?".to_string(),
            ],
            allow_providers: vec!["gemini".to_string()],
            required_capability: None,
        },
    ]
}

/// The groups a policy actually routes with: configured groups first, then
/// the system defaults when `extend_defaults` is set, minus name collisions.
pub fn effective_groups(policy: &SemanticPolicy) -> Vec<IntentGroup> {
    let mut groups = policy.groups.clone();
    if policy.extend_defaults {
        for default in system_default_groups() {
            if !groups.iter().any(|g| g.name == default.name) {
                groups.push(default);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_shape() {
        let groups = system_default_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "coding");
        assert_eq!(groups[0].required_capability.as_deref(), Some("coding"));
        assert!(groups[1].allow_providers.contains(&"gemini".to_string()));
    }

    #[test]
    fn test_extend_defaults_appends() {
        let policy = SemanticPolicy {
            extend_defaults: true,
            groups: vec![IntentGroup {
                name: "custom".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let groups = effective_groups(&policy);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].name, "custom");
    }

    #[test]
    fn test_configured_group_shadows_default() {
        let policy = SemanticPolicy {
            extend_defaults: true,
            groups: vec![IntentGroup {
                name: "coding".to_string(),
                allow_providers: vec!["openai".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let groups = effective_groups(&policy);
        assert_eq!(groups.len(), 2);
        let coding = groups.iter().find(|g| g.name == "coding").unwrap();
        assert_eq!(coding.allow_providers, vec!["openai"]);
    }

    #[test]
    fn test_without_extend_only_configured() {
        let policy = SemanticPolicy::default();
        assert!(effective_groups(&policy).is_empty());
    }
}
