//! Per-provider executable and default-model selection.

use crate::Provider;

pub const DEFAULT_CODEX_MODEL: &str = "gpt-5.3-codex";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Executable and fallback model for one provider.
pub struct ProviderProfile {
    pub executable: String,
    pub default_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Resolved profiles for every supported provider.
pub struct ProviderCatalog {
    pub codex: ProviderProfile,
    pub gemini: ProviderProfile,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self {
            codex: ProviderProfile {
                executable: Provider::Codex.as_str().to_string(),
                default_model: DEFAULT_CODEX_MODEL.to_string(),
            },
            gemini: ProviderProfile {
                executable: Provider::Gemini.as_str().to_string(),
                default_model: DEFAULT_GEMINI_MODEL.to_string(),
            },
        }
    }
}

impl ProviderCatalog {
    pub fn profile(&self, provider: Provider) -> &ProviderProfile {
        match provider {
            Provider::Codex => &self.codex,
            Provider::Gemini => &self.gemini,
        }
    }

    pub fn executable(&self, provider: Provider) -> &str {
        &self.profile(provider).executable
    }

    /// Returns the trimmed requested model, or the provider default when the
    /// request is absent or blank.
    pub fn resolve_model(&self, provider: Provider, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|model| !model.is_empty()) {
            Some(model) => model.to_string(),
            None => self.profile(provider).default_model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderCatalog, DEFAULT_CODEX_MODEL, DEFAULT_GEMINI_MODEL};
    use crate::Provider;

    #[test]
    fn unit_resolve_model_prefers_trimmed_request() {
        let catalog = ProviderCatalog::default();
        assert_eq!(
            catalog.resolve_model(Provider::Codex, Some("  o4-mini ")),
            "o4-mini"
        );
    }

    #[test]
    fn unit_resolve_model_falls_back_on_blank_or_missing() {
        let catalog = ProviderCatalog::default();
        assert_eq!(
            catalog.resolve_model(Provider::Codex, Some("   ")),
            DEFAULT_CODEX_MODEL
        );
        assert_eq!(
            catalog.resolve_model(Provider::Gemini, None),
            DEFAULT_GEMINI_MODEL
        );
    }

    #[test]
    fn unit_catalog_overrides_are_respected() {
        let mut catalog = ProviderCatalog::default();
        catalog.gemini.executable = "/opt/bin/gemini".to_string();
        catalog.gemini.default_model = "gemini-2.5-flash".to_string();
        assert_eq!(catalog.executable(Provider::Gemini), "/opt/bin/gemini");
        assert_eq!(catalog.executable(Provider::Codex), "codex");
        assert_eq!(
            catalog.resolve_model(Provider::Gemini, None),
            "gemini-2.5-flash"
        );
    }
}
