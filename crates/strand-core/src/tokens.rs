use serde::{Deserialize, Serialize};

/// Per-turn token usage, raw from provider. A response carrying no usage
/// data is represented as the default (all zeros) — counts are never
/// estimated or fabricated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Thread-level accumulated totals (incremented per turn).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedTokens {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub turn_count: u32,
}

impl AccumulatedTokens {
    /// Incorporate a new turn's usage into thread totals.
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.total_prompt_tokens += u64::from(usage.prompt_tokens);
        self.total_completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.prompt_tokens) + u64::from(usage.completion_tokens);
        self.turn_count += 1;
    }
}

/// Snapshot of the token budget, as reported to operators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetState {
    pub total_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub max_tokens: u64,
    pub reserve_tokens: u64,
    pub warning_threshold: f64,
}

impl BudgetState {
    /// The real ceiling usage is compared against.
    pub fn effective_limit(&self) -> u64 {
        self.max_tokens.saturating_sub(self.reserve_tokens)
    }

    pub fn available_tokens(&self) -> u64 {
        self.effective_limit().saturating_sub(self.total_used)
    }

    pub fn usage_percentage(&self) -> f64 {
        let limit = self.effective_limit();
        if limit == 0 {
            return 0.0;
        }
        self.total_used as f64 / limit as f64
    }
}
