use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates the assistant CLIs Sidekick can drive.
pub enum Provider {
    Codex,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Codex, Provider::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Codex => "codex",
            Provider::Gemini => "gemini",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProviderParseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(Provider::Codex),
            "gemini" => Ok(Provider::Gemini),
            _ => Err(ProviderParseError::UnknownProvider(raw.trim().to_string())),
        }
    }

    /// Name of the MCP tool that asks this provider.
    pub fn ask_tool_name(self) -> &'static str {
        match self {
            Provider::Codex => "ask_codex",
            Provider::Gemini => "ask_gemini",
        }
    }

    pub fn supports_reasoning_effort(self) -> bool {
        matches!(self, Provider::Codex)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Reasoning effort levels accepted by `codex exec`.
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProviderParseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            "xhigh" => Ok(ReasoningEffort::Xhigh),
            _ => Err(ProviderParseError::UnknownReasoningEffort(
                raw.trim().to_string(),
            )),
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderParseError {
    #[error("unknown provider '{0}'; expected codex or gemini")]
    UnknownProvider(String),
    #[error("unknown reasoning effort '{0}'; expected minimal, low, medium, high, or xhigh")]
    UnknownReasoningEffort(String),
}
