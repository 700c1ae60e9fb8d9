//! Token usage and cost tracking types.

use serde::{Deserialize, Serialize};

/// Token and cost counters for one iteration.
///
/// Absent fields deserialize as zero, so partial reports from sub-calls merge
/// cleanly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct UsageTotals {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl UsageTotals {
    /// Pure reducer: the sum of `self` and `other`.
    pub fn merge(self, other: &UsageTotals) -> UsageTotals {
        UsageTotals {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
            cost_usd: self.cost_usd + other.cost_usd,
        }
    }

    /// Merge an optional report, treating `None` as zero.
    pub fn merge_opt(self, other: Option<&UsageTotals>) -> UsageTotals {
        match other {
            Some(other) => self.merge(other),
            None => self,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    pub fn is_empty(&self) -> bool {
        *self == UsageTotals::default()
    }
}

impl std::iter::Sum for UsageTotals {
    fn sum<I: Iterator<Item = UsageTotals>>(iter: I) -> Self {
        iter.fold(UsageTotals::default(), |acc, next| acc.merge(&next))
    }
}
