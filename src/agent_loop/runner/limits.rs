//! Iteration budget and the approaching-limit warning.

/// Tracks where the limit warning goes once the run nears its cap.
#[derive(Debug, Clone)]
pub(super) struct IterationBudget {
    max_iterations: usize,
    /// Zero-based turn index from which the warning is shown.
    threshold: usize,
    /// Trajectory length captured on the first warned turn.
    anchor: Option<usize>,
}

impl IterationBudget {
    pub(super) fn new(max_iterations: usize, warning_ratio: f64) -> Self {
        let max_iterations = max_iterations.max(1);
        let scaled = (max_iterations as f64 * warning_ratio).floor() as usize;
        Self {
            max_iterations,
            threshold: scaled.saturating_sub(1),
            anchor: None,
        }
    }

    pub(super) fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// `turn` is 1-based.
    pub(super) fn is_final_turn(&self, turn: usize) -> bool {
        turn >= self.max_iterations
    }

    /// The warning for this turn and the fixed position to insert it at.
    ///
    /// The position is captured once, on the first turn past the threshold,
    /// and reused afterwards however long the trajectory grows.
    pub(super) fn warning(
        &mut self,
        turn: usize,
        trajectory_len: usize,
    ) -> Option<(usize, String)> {
        if turn.saturating_sub(1) < self.threshold {
            return None;
        }
        let anchor = *self.anchor.get_or_insert(trajectory_len);
        let remaining = self.max_iterations.saturating_sub(turn) + 1;
        let text = if remaining <= 1 {
            "You are approaching the iteration limit: this is the last turn. \
             Reply with your final answer now."
                .to_string()
        } else {
            format!(
                "You are approaching the iteration limit: {remaining} turns remain. \
                 Wrap up and give a final answer soon."
            )
        };
        Some((anchor, text))
    }
}
