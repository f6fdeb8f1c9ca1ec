pub mod anthropic;
pub mod error;
pub mod json;

/// Everything the reasoning service sees for one decision run.
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub system_instructions: String,
    pub portfolio_context: String,
    pub signals_context: String,
}

impl DecisionInput {
    pub fn user_prompt(&self) -> String {
        format!(
            "PORTFOLIO\n{}\n\nSIGNALS\n{}",
            self.portfolio_context.trim_end(),
            self.signals_context.trim_end()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

/// Untrusted text producer. Callers parse the returned text with
/// [`json::parse_decisions`] before acting on any of it.
#[async_trait::async_trait]
pub trait ReasoningClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn invoke(&self, input: &DecisionInput) -> anyhow::Result<String>;
}
