use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Execution mode of the backing agent. Supplied by the session configuration,
/// never inferred from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
    ToolEnabled,
    LlmOnly,
    RagFocused,
    ConversationWithTools,
    Genie,
}

impl ProfileType {
    pub const ALL: [ProfileType; 5] = [
        ProfileType::ToolEnabled,
        ProfileType::LlmOnly,
        ProfileType::RagFocused,
        ProfileType::ConversationWithTools,
        ProfileType::Genie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::ToolEnabled => "tool_enabled",
            ProfileType::LlmOnly => "llm_only",
            ProfileType::RagFocused => "rag_focused",
            ProfileType::ConversationWithTools => "conversation_with_tools",
            ProfileType::Genie => "genie",
        }
    }
}

impl Default for ProfileType {
    fn default() -> Self {
        Self::ToolEnabled
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown profile type '{0}'")]
pub struct ParseProfileError(pub String);

impl FromStr for ProfileType {
    type Err = ParseProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ProfileType::ALL
            .into_iter()
            .find(|profile| profile.as_str() == normalized)
            .ok_or_else(|| ParseProfileError(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_and_cli_spellings() {
        for profile in ProfileType::ALL {
            assert_eq!(profile.as_str().parse::<ProfileType>(), Ok(profile));
        }
        assert_eq!(
            "Conversation-With-Tools".parse::<ProfileType>(),
            Ok(ProfileType::ConversationWithTools)
        );
        let err = "planner".parse::<ProfileType>().expect_err("unknown profile");
        assert_eq!(err.to_string(), "unknown profile type 'planner'");
    }

    #[test]
    fn serde_uses_snake_case() {
        let encoded = serde_json::to_string(&ProfileType::RagFocused).expect("encode");
        assert_eq!(encoded, "\"rag_focused\"");
    }
}
