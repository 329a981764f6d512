//! Token budget monitor.
//!
//! Strictly optional: an agent without a budget config behaves identically
//! to one that never checks. Usage totals only ever move on real provider
//! usage data; a response with no usage counts as zero.

use strand_core::tokens::BudgetState;

/// Budget configuration. `warning_threshold` is a fraction of the
/// effective limit (max − reserve).
#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub max_tokens: u64,
    pub reserve_tokens: u64,
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1_000_000,
            reserve_tokens: 50_000,
            warning_threshold: 0.8,
        }
    }
}

/// Result of a pre-call budget check. Blocked attempts re-warn on every
/// call; only the approaching-limit warning is edge-triggered.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Raised at most once per threshold crossing, from `record_usage`.
#[derive(Clone, Debug)]
pub struct BudgetWarning {
    pub message: String,
    pub recommendations: Vec<String>,
}

pub struct TokenBudget {
    config: BudgetConfig,
    prompt_tokens: u64,
    completion_tokens: u64,
    warned_above_threshold: bool,
}

impl TokenBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            prompt_tokens: 0,
            completion_tokens: 0,
            warned_above_threshold: false,
        }
    }

    pub fn total_used(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn effective_limit(&self) -> u64 {
        self.config.max_tokens.saturating_sub(self.config.reserve_tokens)
    }

    fn warning_tokens(&self) -> u64 {
        (self.config.warning_threshold * self.effective_limit() as f64) as u64
    }

    /// Whether a new provider call is permitted. `requested_tokens` is the
    /// call's declared completion budget when known (configuration, never
    /// an estimate); a request that cannot fit in the remaining headroom
    /// is refused before the provider is invoked.
    pub fn can_proceed(&self, requested_tokens: Option<u64>) -> Verdict {
        let used = self.total_used();
        let limit = self.effective_limit();

        if used >= limit {
            return Verdict {
                allowed: false,
                reason: Some(format!(
                    "token budget exhausted: {used} of {limit} effective tokens used"
                )),
            };
        }

        if let Some(requested) = requested_tokens {
            if used + requested > limit {
                return Verdict {
                    allowed: false,
                    reason: Some(format!(
                        "requested {requested} tokens but only {} remain of the {limit} effective limit",
                        limit - used
                    )),
                };
            }
        }

        Verdict {
            allowed: true,
            reason: None,
        }
    }

    /// Record real usage from a provider response. Returns a warning
    /// exactly once when the total crosses the warning threshold —
    /// subsequent calls above the threshold stay silent until `reset`.
    pub fn record_usage(&mut self, prompt_tokens: u64, completion_tokens: u64) -> Option<BudgetWarning> {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;

        let used = self.total_used();
        if !self.warned_above_threshold && used >= self.warning_tokens() {
            self.warned_above_threshold = true;
            return Some(BudgetWarning {
                message: format!(
                    "token usage at {used} of {} effective tokens ({:.0}%)",
                    self.effective_limit(),
                    self.status().usage_percentage() * 100.0
                ),
                recommendations: vec![
                    "consider starting a new thread".into(),
                    "trim or summarize long tool output".into(),
                ],
            });
        }
        None
    }

    pub fn status(&self) -> BudgetState {
        BudgetState {
            total_used: self.total_used(),
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            max_tokens: self.config.max_tokens,
            reserve_tokens: self.config.reserve_tokens,
            warning_threshold: self.config.warning_threshold,
        }
    }

    /// Zero usage and re-arm the threshold warning. Operator action only.
    pub fn reset(&mut self) {
        self.prompt_tokens = 0;
        self.completion_tokens = 0;
        self.warned_above_threshold = false;
    }
}
