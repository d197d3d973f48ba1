//! Argument-vector construction for `codex exec` and `gemini --prompt`.
//!
//! The prompt is always passed as a single argv element; no shell is involved,
//! so prompt text never needs quoting.

use crate::{Provider, ProviderCatalog, ReasoningEffort};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Caller-facing ask parameters before model resolution.
pub struct AskRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A ready-to-run provider invocation.
pub struct ProviderCommand {
    pub provider: Provider,
    pub command: String,
    pub args: Vec<String>,
    pub model: String,
}

pub fn build_command(
    catalog: &ProviderCatalog,
    provider: Provider,
    request: &AskRequest,
) -> ProviderCommand {
    let model = catalog.resolve_model(provider, request.model.as_deref());
    let args = match provider {
        Provider::Codex => {
            let mut args = vec![
                "exec".to_string(),
                "--ephemeral".to_string(),
                "--model".to_string(),
                model.clone(),
            ];
            if let Some(effort) = request.reasoning_effort {
                args.push("-c".to_string());
                args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
            }
            args.push(request.prompt.clone());
            args
        }
        Provider::Gemini => vec![
            "--prompt".to_string(),
            request.prompt.clone(),
            "--model".to_string(),
            model.clone(),
        ],
    };

    ProviderCommand {
        provider,
        command: catalog.executable(provider).to_string(),
        args,
        model,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_command, AskRequest};
    use crate::{Provider, ProviderCatalog, ReasoningEffort, DEFAULT_GEMINI_MODEL};

    #[test]
    fn unit_codex_command_places_prompt_last() {
        let command = build_command(
            &ProviderCatalog::default(),
            Provider::Codex,
            &AskRequest {
                prompt: "review src/main.rs".to_string(),
                model: Some("gpt-5.3-codex".to_string()),
                reasoning_effort: None,
            },
        );
        assert_eq!(command.command, "codex");
        assert_eq!(
            command.args,
            vec!["exec", "--ephemeral", "--model", "gpt-5.3-codex", "review src/main.rs"]
        );
    }

    #[test]
    fn unit_codex_command_includes_reasoning_effort_override() {
        let command = build_command(
            &ProviderCatalog::default(),
            Provider::Codex,
            &AskRequest {
                prompt: "plan".to_string(),
                model: None,
                reasoning_effort: Some(ReasoningEffort::High),
            },
        );
        let position = command
            .args
            .iter()
            .position(|arg| arg == "-c")
            .expect("config flag");
        assert_eq!(command.args[position + 1], "model_reasoning_effort=\"high\"");
        assert_eq!(command.args.last().map(String::as_str), Some("plan"));
    }

    #[test]
    fn unit_gemini_command_ignores_reasoning_effort() {
        let command = build_command(
            &ProviderCatalog::default(),
            Provider::Gemini,
            &AskRequest {
                prompt: "summarize".to_string(),
                model: None,
                reasoning_effort: Some(ReasoningEffort::Low),
            },
        );
        assert_eq!(
            command.args,
            vec!["--prompt", "summarize", "--model", DEFAULT_GEMINI_MODEL]
        );
        assert_eq!(command.model, DEFAULT_GEMINI_MODEL);
    }
}
