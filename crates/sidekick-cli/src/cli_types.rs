use clap::ValueEnum;

use sidekick_provider::{Provider, ReasoningEffort};
use sidekick_runtime::{JobListFilter, JobSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliProvider {
    Codex,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(value: CliProvider) -> Self {
        match value {
            CliProvider::Codex => Provider::Codex,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl From<CliReasoningEffort> for ReasoningEffort {
    fn from(value: CliReasoningEffort) -> Self {
        match value {
            CliReasoningEffort::Minimal => ReasoningEffort::Minimal,
            CliReasoningEffort::Low => ReasoningEffort::Low,
            CliReasoningEffort::Medium => ReasoningEffort::Medium,
            CliReasoningEffort::High => ReasoningEffort::High,
            CliReasoningEffort::Xhigh => ReasoningEffort::Xhigh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliJobStatusFilter {
    Active,
    Completed,
    Failed,
    All,
}

impl From<CliJobStatusFilter> for JobListFilter {
    fn from(value: CliJobStatusFilter) -> Self {
        match value {
            CliJobStatusFilter::Active => JobListFilter::Active,
            CliJobStatusFilter::Completed => JobListFilter::Completed,
            CliJobStatusFilter::Failed => JobListFilter::Failed,
            CliJobStatusFilter::All => JobListFilter::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliKillSignal {
    Sigterm,
    Sigint,
}

impl From<CliKillSignal> for JobSignal {
    fn from(value: CliKillSignal) -> Self {
        match value {
            CliKillSignal::Sigterm => JobSignal::Term,
            CliKillSignal::Sigint => JobSignal::Int,
        }
    }
}
